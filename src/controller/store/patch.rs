//! # Merge Patch
//!
//! RFC 7386 merge-patch generation. The patch carries only the fields that
//! differ between a snapshot and its modified copy, so unrelated concurrent
//! edits to the same object survive the write.

use serde_json::{Map, Value};

/// Merge patch turning `original` into `modified`.
///
/// Removed object members become `null`; arrays and scalars are replaced whole.
#[must_use]
pub fn merge_patch_diff(original: &Value, modified: &Value) -> Value {
    match (original, modified) {
        (Value::Object(original), Value::Object(modified)) => {
            let mut patch = Map::new();
            for (key, before) in original {
                match modified.get(key) {
                    None => {
                        patch.insert(key.clone(), Value::Null);
                    }
                    Some(after) if after != before => {
                        let value = if before.is_object() && after.is_object() {
                            merge_patch_diff(before, after)
                        } else {
                            after.clone()
                        };
                        patch.insert(key.clone(), value);
                    }
                    Some(_) => {}
                }
            }
            for (key, after) in modified {
                if !original.contains_key(key) {
                    patch.insert(key.clone(), after.clone());
                }
            }
            Value::Object(patch)
        }
        _ => modified.clone(),
    }
}

/// True when applying `patch` would change nothing
#[must_use]
pub fn is_noop(patch: &Value) -> bool {
    patch.as_object().is_some_and(Map::is_empty)
}

/// Pin the patch to the snapshot's `resourceVersion`; the API server answers
/// 409 Conflict if the object moved on in the meantime.
pub fn with_resource_version(mut patch: Value, resource_version: Option<&str>) -> Value {
    if let (Some(version), Some(root)) = (resource_version, patch.as_object_mut()) {
        let metadata = root
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert(
                "resourceVersion".to_string(),
                Value::String(version.to_string()),
            );
        }
    }
    patch
}
