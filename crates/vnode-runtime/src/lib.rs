//! Heartbeat supervision for virtual nodes.
//!
//! A [`NodeController`] keeps one synthetic node registered and alive in a
//! remote control plane: it registers the node, probes for lease support,
//! and then multiplexes pings, lease renewals and status publishes on a
//! single loop until cancelled.

pub mod node;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use node::{ErrorHandler, LeaseMode, NodeController, NodeControllerOptions};
