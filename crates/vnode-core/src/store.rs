//! Remote stores the supervisor writes to.
//!
//! Implementations own transport, auth and serialization. They report the
//! outcome through [`VnodeError`] variants: `NotFound`, `AlreadyExists` and
//! `Conflict` drive the supervisor's protocols, everything else is treated as
//! transient.

use std::future::Future;
use std::pin::Pin;

use crate::error::Result;
use crate::lease::Lease;
use crate::node::Node;

/// Boxed future returned by store and provider methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Store of node objects, addressed by name.
pub trait NodeStore: Send + Sync {
    /// Fetch a node.
    fn get<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Node>>;

    /// Create a node, returning the stored copy with server-assigned fields.
    fn create<'a>(&'a self, node: &'a Node) -> BoxFuture<'a, Result<Node>>;

    /// Apply a merge patch to the status sub-resource of a node.
    fn patch_status<'a>(&'a self, name: &'a str, patch: &'a [u8]) -> BoxFuture<'a, Result<Node>>;
}

/// Store of lease objects, one per node.
///
/// A `NotFound` from [`LeaseStore::create`] means the control plane has no
/// lease support at all.
pub trait LeaseStore: Send + Sync {
    /// Fetch a lease.
    fn get<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Lease>>;

    /// Create a lease.
    fn create<'a>(&'a self, lease: &'a Lease) -> BoxFuture<'a, Result<Lease>>;

    /// Replace a lease, failing with `Conflict` on a stale resource version.
    fn update<'a>(&'a self, lease: &'a Lease) -> BoxFuture<'a, Result<Lease>>;

    /// Delete a lease.
    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>>;
}
