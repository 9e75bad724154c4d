//! Testing utilities for node supervision.
//!
//! In-memory stores and a scriptable provider that record every call, so
//! tests can assert on exactly which remote writes the supervisor made.
//! Failures are injected per operation and consumed in order.

mod provider;
mod store;

pub use provider::MockProvider;
pub use store::{LeaseOp, MemoryLeaseStore, MemoryNodeStore, NodeOp};
