use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::meta::ObjectMeta;

/// A synthetic node standing in for the capacity of a remote cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub metadata: ObjectMeta,
    /// Immutable after creation; status publishes never touch it.
    #[serde(default)]
    pub spec: NodeSpec,
    #[serde(default)]
    pub status: NodeStatus,
}

impl Node {
    /// Create a node descriptor with an empty spec and status.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            ..Default::default()
        }
    }

    /// Get the node name.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Stamp every condition's heartbeat time.
    ///
    /// The stamp never moves a condition's heartbeat backwards, so a clock
    /// step during a run cannot make a condition look older than before.
    pub fn stamp_heartbeats(&mut self, now: DateTime<Utc>) {
        for condition in &mut self.status.conditions {
            condition.last_heartbeat_time = Some(match condition.last_heartbeat_time {
                Some(prev) if prev > now => prev,
                _ => now,
            });
        }
    }

    /// Look up a condition by type.
    pub fn condition(&self, condition_type: &str) -> Option<&NodeCondition> {
        self.status
            .conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }
}

/// Node specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_cidr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unschedulable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,
}

/// A scheduling taint carried by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub effect: String,
}

/// Node status. Its content is produced by the node provider and is opaque
/// to the supervisor apart from the condition heartbeats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capacity: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub allocatable: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<NodeCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<NodeAddress>,
}

/// A named node condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl NodeCondition {
    /// Create a condition with no timestamps.
    pub fn new(condition_type: impl Into<String>, status: ConditionStatus) -> Self {
        Self {
            condition_type: condition_type.into(),
            status,
            last_heartbeat_time: None,
            last_transition_time: None,
            reason: None,
            message: None,
        }
    }
}

/// Value of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// An address the node is reachable at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    #[serde(rename = "type")]
    pub address_type: String,
    pub address: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_node() -> Node {
        let mut node = Node::new("vk-remote");
        node.status.conditions = vec![
            NodeCondition::new("Ready", ConditionStatus::True),
            NodeCondition::new("MemoryPressure", ConditionStatus::False),
        ];
        node
    }

    #[test]
    fn test_stamp_heartbeats_touches_every_condition() {
        let mut node = ready_node();
        let now = Utc::now();
        node.stamp_heartbeats(now);

        for condition in &node.status.conditions {
            assert_eq!(condition.last_heartbeat_time, Some(now));
        }
    }

    #[test]
    fn test_stamp_heartbeats_never_moves_backwards() {
        let mut node = ready_node();
        let later = Utc::now() + chrono::Duration::seconds(30);
        node.stamp_heartbeats(later);
        node.stamp_heartbeats(Utc::now());

        assert_eq!(
            node.condition("Ready").and_then(|c| c.last_heartbeat_time),
            Some(later)
        );
    }

    #[test]
    fn test_serialized_shape() {
        let node = ready_node();
        let value = serde_json::to_value(&node).unwrap();

        assert_eq!(value["metadata"]["name"], "vk-remote");
        assert_eq!(value["status"]["conditions"][0]["type"], "Ready");
        assert_eq!(value["status"]["conditions"][0]["status"], "True");
        assert!(value["metadata"].get("resourceVersion").is_none());
    }
}
