//! # Patch Applier
//!
//! Writes the fingerprint annotation to one workload, unless it is already there.

use crate::controller::fingerprint::Fingerprint;
use crate::controller::model::Workload;
use crate::controller::store::{ObjectStore, StoreError};

/// Set `key` to `fingerprint` on the workload's pod template.
///
/// Returns `Ok(false)` without writing when the annotation already holds the
/// fingerprint. Otherwise the modified copy is diffed against the snapshot and
/// written conditionally; conflicts are returned as-is.
///
/// # Errors
///
/// Returns the store's error when the write fails
pub async fn apply_fingerprint(
    store: &dyn ObjectStore,
    workload: &Workload,
    key: &str,
    fingerprint: &Fingerprint,
) -> Result<bool, StoreError> {
    if workload.template_annotation(key) == Some(fingerprint.as_str()) {
        return Ok(false);
    }

    let mut modified = workload.clone();
    modified.set_template_annotation(key, fingerprint.as_str());
    store.patch_workload(workload, &modified).await?;
    Ok(true)
}
