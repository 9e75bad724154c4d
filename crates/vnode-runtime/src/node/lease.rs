use vnode_core::{Lease, LeaseStore, Result, RetryConfig};

/// Create the lease, replacing a stale one left behind by a previous run.
///
/// A `NotFound` from the create means the control plane has no lease
/// support and is returned unchanged.
pub(crate) async fn ensure_lease(leases: &dyn LeaseStore, lease: &Lease) -> Result<Lease> {
    match leases.create(lease).await {
        Ok(created) => Ok(created),
        Err(e) if e.is_not_found() => {
            tracing::warn!(lease = %lease.name(), error = %e, "Node lease not supported");
            Err(e)
        }
        Err(e) if e.is_already_exists() => {
            match leases.delete(lease.name()).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    tracing::error!(lease = %lease.name(), error = %e, "Could not delete old node lease");
                    return Err(e);
                }
            }
            leases.create(lease).await
        }
        Err(e) => Err(e),
    }
}

/// Write a renewed lease, retrying a bounded number of times on conflict.
///
/// A conflict re-reads the remote lease and renews the fresh copy before the
/// next attempt. A missing lease is recreated.
pub(crate) async fn update_node_lease(
    leases: &dyn LeaseStore,
    lease: Lease,
    retry: &RetryConfig,
) -> Result<Lease> {
    let mut lease = lease;
    let mut attempt = 1;

    loop {
        let err = match leases.update(&lease).await {
            Ok(updated) => {
                tracing::debug!(lease = %lease.name(), "Updated lease");
                return Ok(updated);
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(lease = %lease.name(), "Lease not found, recreating");
                match ensure_lease(leases, &lease).await {
                    Ok(created) => {
                        tracing::debug!(lease = %lease.name(), "Created new lease");
                        return Ok(created);
                    }
                    Err(e) => e,
                }
            }
            Err(e) => e,
        };

        if !err.is_conflict() {
            return Err(err);
        }

        if attempt >= retry.max_attempts {
            tracing::warn!(
                lease = %lease.name(),
                attempts = attempt,
                "Giving up on lease renewal after repeated conflicts"
            );
            return Err(err);
        }

        tokio::time::sleep(retry.calculate_backoff(attempt)).await;
        attempt += 1;

        tracing::debug!(lease = %lease.name(), attempt, "Conflict, re-reading lease");
        let fresh = leases.get(lease.name()).await.map_err(|e| {
            tracing::error!(lease = %lease.name(), error = %e, "Failed to re-read lease");
            e
        })?;
        lease = fresh.renewed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{LeaseOp, MemoryLeaseStore};
    use std::time::Duration;
    use vnode_core::{Node, VnodeError};

    fn node_lease() -> Lease {
        let mut lease = Lease::from_base(None);
        lease.apply_node_defaults(&Node::new("vk-remote"), Duration::from_secs(50));
        lease
    }

    #[tokio::test]
    async fn test_ensure_lease_creates() {
        let store = MemoryLeaseStore::new();
        let created = ensure_lease(&store, &node_lease()).await.unwrap();
        assert_eq!(created.name(), "vk-remote");
        assert!(created.metadata.resource_version.is_some());
    }

    #[tokio::test]
    async fn test_ensure_lease_replaces_stale_lease() {
        let store = MemoryLeaseStore::new();
        let stale = store.create(&node_lease()).await.unwrap();

        let created = ensure_lease(&store, &node_lease()).await.unwrap();
        assert_ne!(created.metadata.uid, stale.metadata.uid);
        assert_eq!(store.calls(LeaseOp::Delete), 1);
        assert_eq!(store.calls(LeaseOp::Create), 3);
    }

    #[tokio::test]
    async fn test_ensure_lease_unsupported() {
        let store = MemoryLeaseStore::unsupported();
        let err = ensure_lease(&store, &node_lease()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_recreates_missing_lease() {
        let store = MemoryLeaseStore::new();
        let renewed = update_node_lease(&store, node_lease(), &RetryConfig::default())
            .await
            .unwrap();
        assert_eq!(renewed.name(), "vk-remote");
        assert_eq!(store.calls(LeaseOp::Create), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_refetches_on_conflict() {
        let store = MemoryLeaseStore::new();
        let created = store.create(&node_lease()).await.unwrap();
        store.fail_next(LeaseOp::Update, VnodeError::Conflict("stale".into()));

        let renewed = update_node_lease(&store, created.renewed(), &RetryConfig::default())
            .await
            .unwrap();

        assert_eq!(store.calls(LeaseOp::Update), 2);
        assert_eq!(store.calls(LeaseOp::Get), 1);
        assert!(renewed.spec.renew_time >= created.spec.renew_time);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_gives_up_after_max_attempts() {
        let store = MemoryLeaseStore::new();
        let created = store.create(&node_lease()).await.unwrap();
        for _ in 0..10 {
            store.fail_next(LeaseOp::Update, VnodeError::Conflict("stale".into()));
        }

        let retry = RetryConfig {
            max_attempts: 3,
            ..Default::default()
        };
        let err = update_node_lease(&store, created.renewed(), &retry)
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(store.calls(LeaseOp::Update), 3);
    }

    #[tokio::test]
    async fn test_update_other_errors_abort() {
        let store = MemoryLeaseStore::new();
        let created = store.create(&node_lease()).await.unwrap();
        store.fail_next(LeaseOp::Update, VnodeError::Unavailable("down".into()));

        let err = update_node_lease(&store, created.renewed(), &RetryConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.calls(LeaseOp::Update), 1);
    }
}
