//! JSON merge patches (RFC 7386) for node status writes.
//!
//! Objects merge key by key, a `null` member removes the key, and any other
//! value (arrays included) replaces the target wholesale.

use serde_json::{Map, Value};

use crate::error::Result;
use crate::node::Node;

/// Compute the merge patch that turns `old` into `new`.
pub fn create_merge_patch(old: &Value, new: &Value) -> Value {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            let mut patch = Map::new();

            for key in old_map.keys() {
                if !new_map.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }

            for (key, new_value) in new_map {
                match old_map.get(key) {
                    Some(old_value) if old_value == new_value => {}
                    Some(old_value @ Value::Object(_)) if new_value.is_object() => {
                        patch.insert(key.clone(), create_merge_patch(old_value, new_value));
                    }
                    _ => {
                        patch.insert(key.clone(), new_value.clone());
                    }
                }
            }

            Value::Object(patch)
        }
        _ => new.clone(),
    }
}

/// Apply a merge patch to `target` in place.
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }

    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                apply_merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Build the status sub-resource patch between two node representations.
///
/// `spec` is pinned to the old value before diffing, so the patch can only
/// carry `status` and non-spec `metadata` changes.
pub fn node_status_patch(old: &Node, new: &Node) -> Result<Vec<u8>> {
    let old_data = serde_json::to_value(old)?;

    let mut pinned = new.clone();
    pinned.spec = old.spec.clone();
    let new_data = serde_json::to_value(&pinned)?;

    let patch = create_merge_patch(&old_data, &new_data);
    Ok(serde_json::to_vec(&patch)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ConditionStatus, NodeCondition, Taint};
    use serde_json::json;

    #[test]
    fn test_identical_documents_produce_empty_patch() {
        let doc = json!({"a": 1, "b": {"c": [1, 2]}});
        assert_eq!(create_merge_patch(&doc, &doc), json!({}));
    }

    #[test]
    fn test_nested_changes_and_removals() {
        let old = json!({"a": 1, "b": {"c": 1, "d": 2}, "gone": true});
        let new = json!({"a": 1, "b": {"c": 3, "d": 2}, "added": [1]});

        let patch = create_merge_patch(&old, &new);
        assert_eq!(patch, json!({"b": {"c": 3}, "gone": null, "added": [1]}));

        let mut target = old.clone();
        apply_merge_patch(&mut target, &patch);
        assert_eq!(target, new);
    }

    #[test]
    fn test_apply_replaces_non_object_target() {
        let mut target = json!("scalar");
        apply_merge_patch(&mut target, &json!({"a": {"b": 1}}));
        assert_eq!(target, json!({"a": {"b": 1}}));
    }

    #[test]
    fn test_node_status_patch_never_touches_spec() {
        let mut old = Node::new("vk-remote");
        old.spec.pod_cidr = Some("10.0.0.0/24".into());

        let mut new = old.clone();
        new.spec.unschedulable = true;
        new.spec.taints.push(Taint {
            key: "virtual-node".into(),
            value: None,
            effect: "NoExecute".into(),
        });
        new.status.conditions = vec![NodeCondition::new("Ready", ConditionStatus::True)];
        new.metadata
            .annotations
            .insert("vnode/heartbeat".into(), "1".into());

        let bytes = node_status_patch(&old, &new).unwrap();
        let patch: Value = serde_json::from_slice(&bytes).unwrap();

        assert!(patch.get("spec").is_none());
        assert_eq!(patch["status"]["conditions"][0]["type"], "Ready");
        assert_eq!(patch["metadata"]["annotations"]["vnode/heartbeat"], "1");
    }
}
