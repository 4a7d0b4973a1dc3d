//! Helper functions for the mock store

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::KubevirtError;

/// Lock a mutex, ignoring poisoning from a panicked test thread
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reject a patch whose `metadata.resourceVersion` does not match the stored object
pub(crate) fn check_resource_version(current: &ObjectMeta, patch: &Value) -> Result<(), KubevirtError> {
    let Some(expected) = patch
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
    else {
        return Ok(());
    };

    match current.resource_version.as_deref() {
        Some(actual) if actual == expected => Ok(()),
        actual => Err(KubevirtError::Conflict(format!(
            "the object has been modified; resourceVersion {} does not match {}",
            expected,
            actual.unwrap_or("<none>")
        ))),
    }
}

/// Apply an RFC 7386 JSON merge patch to a typed object
pub(crate) fn apply_merge_patch<K>(current: &K, patch: &Value) -> Result<K, KubevirtError>
where
    K: Serialize + DeserializeOwned,
{
    let mut target = serde_json::to_value(current)?;
    merge(&mut target, patch);
    Ok(serde_json::from_value(target)?)
}

fn merge(target: &mut Value, patch: &Value) {
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
                merge(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_replaces_arrays_and_removes_nulls() {
        let mut target = json!({"a": {"b": 1, "c": 2}, "list": [1, 2, 3], "gone": true});
        merge(&mut target, &json!({"a": {"c": 3}, "list": [4], "gone": null}));
        assert_eq!(target, json!({"a": {"b": 1, "c": 3}, "list": [4]}));
    }

    #[test]
    fn test_resource_version_absent_from_patch_is_accepted() {
        let meta = ObjectMeta {
            resource_version: Some("7".to_string()),
            ..Default::default()
        };
        assert!(check_resource_version(&meta, &json!({"spec": {}})).is_ok());
        assert!(check_resource_version(&meta, &json!({"metadata": {"resourceVersion": "7"}})).is_ok());
        assert!(check_resource_version(&meta, &json!({"metadata": {"resourceVersion": "6"}})).is_err());
    }
}
