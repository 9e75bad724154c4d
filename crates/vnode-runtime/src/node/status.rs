use vnode_core::patch::node_status_patch;
use vnode_core::{Node, NodeStore, Result};

/// Publish the local node's status to the store.
///
/// Reads the current remote node, replaces its status with the local one and
/// sends the difference as a merge patch on the status sub-resource. Callers
/// are responsible for serializing concurrent publishes.
pub(crate) async fn update_node_status(nodes: &dyn NodeStore, local: &Node) -> Result<Node> {
    let old = nodes.get(local.name()).await?;
    tracing::debug!(node = %local.name(), "Got node from store");

    let mut desired = old.clone();
    desired.metadata.resource_version = None;
    desired.status = local.status.clone();

    let patch = node_status_patch(&old, &desired)?;
    let updated = nodes.patch_status(local.name(), &patch).await?;

    tracing::debug!(node = %local.name(), "Updated node status in store");
    Ok(updated)
}
