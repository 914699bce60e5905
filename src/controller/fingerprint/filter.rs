//! # Key Filter
//!
//! Entry keys excluded from fingerprinting. Excluded keys are dropped before
//! sorting and hashing, so they are indistinguishable from absent keys.

use crate::controller::model::SourceKind;
use std::collections::BTreeSet;

/// Set of entry keys left out of the fingerprint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyFilter {
    excluded: BTreeSet<String>,
}

impl KeyFilter {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a comma-separated key list. Items are trimmed and blank items
    /// dropped, so `"a, b ,,"` excludes `a` and `b`.
    #[must_use]
    pub fn parse(list: &str) -> Self {
        Self::new(
            list.split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty()),
        )
    }

    #[must_use]
    pub fn should_exclude(&self, key: &str) -> bool {
        !self.excluded.is_empty() && self.excluded.contains(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.excluded.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.excluded.iter().map(String::as_str)
    }
}

/// Exclusions partitioned by source kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionFilters {
    pub plain: KeyFilter,
    pub sensitive: KeyFilter,
}

impl ExclusionFilters {
    #[must_use]
    pub fn new(plain: KeyFilter, sensitive: KeyFilter) -> Self {
        Self { plain, sensitive }
    }

    #[must_use]
    pub fn for_kind(&self, kind: SourceKind) -> &KeyFilter {
        match kind {
            SourceKind::Plain => &self.plain,
            SourceKind::Sensitive => &self.sensitive,
        }
    }
}
