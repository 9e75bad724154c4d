pub mod config;
pub mod error;
pub mod lease;
pub mod meta;
pub mod node;
pub mod patch;
pub mod provider;
pub mod store;

pub use config::{LeaseConfig, RetryConfig, SupervisorConfig};
pub use error::{Result, VnodeError};
pub use lease::{Lease, LeaseSpec};
pub use meta::ObjectMeta;
pub use node::{
    ConditionStatus, Node, NodeAddress, NodeCondition, NodeSpec, NodeStatus, Taint,
};
pub use provider::{NaiveNodeProvider, NodeProvider, StatusCallback};
pub use store::{BoxFuture, LeaseStore, NodeStore};
