use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::meta::ObjectMeta;
use crate::node::Node;

/// Lightweight liveness record, one per node, named after the node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: LeaseSpec,
}

/// Lease specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder_identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_duration_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquire_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renew_time: Option<DateTime<Utc>>,
}

impl Lease {
    /// Build a fresh lease from an optional template, renewed now.
    pub fn from_base(base: Option<&Lease>) -> Self {
        let mut lease = base.cloned().unwrap_or_default();
        lease.renew(Utc::now());
        lease
    }

    /// Get the lease name.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Fill in the node-derived attributes the template left unset.
    pub fn apply_node_defaults(&mut self, node: &Node, duration: Duration) {
        if self.metadata.name.is_empty() {
            self.metadata.name = node.name().to_string();
        }
        if self.spec.holder_identity.is_none() {
            self.spec.holder_identity = Some(node.name().to_string());
        }
        if self.spec.lease_duration_seconds.is_none() {
            let secs = i32::try_from(duration.as_secs()).unwrap_or(i32::MAX);
            self.spec.lease_duration_seconds = Some(secs);
        }
    }

    /// Set the renew time, never moving it backwards.
    pub fn renew(&mut self, now: DateTime<Utc>) {
        self.spec.renew_time = Some(match self.spec.renew_time {
            Some(prev) if prev > now => prev,
            _ => now,
        });
    }

    /// A copy of this lease renewed now.
    pub fn renewed(&self) -> Self {
        let mut lease = self.clone();
        lease.renew(Utc::now());
        lease
    }
}
