//! # Source Fingerprint
//!
//! Digest of one configuration source.
//!
//! Surviving keys are tagged with their value kind (`s` text, `b` binary,
//! `d` secret data), sorted, and fed to SHA-256 as
//! `tag ‖ key ‖ NUL ‖ value ‖ NUL` per entry. The tag keeps a text entry and
//! a binary entry with the same name and bytes apart.

use crate::controller::fingerprint::filter::KeyFilter;
use crate::controller::model::{ConfigSource, EntryValue, SourceKind};
use sha2::{Digest, Sha256};
use std::fmt;

const TEXT_TAG: u8 = b's';
const BINARY_TAG: u8 = b'b';
const SECRET_TAG: u8 = b'd';

/// Hex-encoded SHA-256 digest; the empty string means "no signal"
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn from_hasher(hasher: Sha256) -> Self {
        Self(format!("{:x}", hasher.finalize()))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Feed one `tag ‖ key ‖ NUL ‖ value ‖ NUL` record
pub(crate) fn write_record(hasher: &mut Sha256, tag: Option<u8>, key: &[u8], value: &[u8]) {
    if let Some(tag) = tag {
        hasher.update([tag]);
    }
    hasher.update(key);
    hasher.update([0u8]);
    hasher.update(value);
    hasher.update([0u8]);
}

fn value_tag(kind: SourceKind, value: &EntryValue) -> u8 {
    match (kind, value) {
        (SourceKind::Sensitive, _) => SECRET_TAG,
        (SourceKind::Plain, EntryValue::Text(_)) => TEXT_TAG,
        (SourceKind::Plain, EntryValue::Binary(_)) => BINARY_TAG,
    }
}

/// Fingerprint a single source after dropping excluded keys.
///
/// Returns the empty fingerprint when nothing survives the filter.
#[must_use]
pub fn fingerprint_source(source: &ConfigSource, filter: &KeyFilter) -> Fingerprint {
    let mut tagged: Vec<(u8, &str, &EntryValue)> = source
        .entries
        .iter()
        .filter(|(key, _)| !filter.should_exclude(key))
        .map(|(key, value)| (value_tag(source.kind, value), key.as_str(), value))
        .collect();

    if tagged.is_empty() {
        return Fingerprint::empty();
    }

    tagged.sort_unstable_by(|a, b| (a.0, a.1.as_bytes()).cmp(&(b.0, b.1.as_bytes())));

    let mut hasher = Sha256::new();
    for (tag, key, value) in tagged {
        write_record(&mut hasher, Some(tag), key.as_bytes(), value.as_bytes());
    }
    Fingerprint::from_hasher(hasher)
}
