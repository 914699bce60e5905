//! # Aggregate Fingerprint
//!
//! Combines the fingerprints of every source in a scope into one value.
//! Sources without signal are skipped; the rest are keyed by canonical
//! identity (`configmap/<name>`, `secret/<name>`), sorted, and hashed as
//! `identity ‖ NUL ‖ fingerprint ‖ NUL`.

use crate::controller::fingerprint::filter::ExclusionFilters;
use crate::controller::fingerprint::source::{fingerprint_source, write_record, Fingerprint};
use crate::controller::model::ConfigSource;
use sha2::{Digest, Sha256};

/// Fingerprint over all sources, independent of their order.
///
/// Returns the empty fingerprint when no source carries signal.
pub fn aggregate_fingerprint<'a, I>(sources: I, filters: &ExclusionFilters) -> Fingerprint
where
    I: IntoIterator<Item = &'a ConfigSource>,
{
    let mut entries: Vec<(String, Fingerprint)> = sources
        .into_iter()
        .filter_map(|source| {
            let fingerprint = fingerprint_source(source, filters.for_kind(source.kind));
            (!fingerprint.is_empty()).then(|| (source.identity(), fingerprint))
        })
        .collect();

    if entries.is_empty() {
        return Fingerprint::empty();
    }

    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (identity, fingerprint) in &entries {
        write_record(
            &mut hasher,
            None,
            identity.as_bytes(),
            fingerprint.as_str().as_bytes(),
        );
    }
    Fingerprint::from_hasher(hasher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::fingerprint::filter::KeyFilter;
    use crate::controller::model::SourceKind;

    #[test]
    fn test_no_sources_is_empty() {
        let sources: Vec<ConfigSource> = Vec::new();
        assert!(aggregate_fingerprint(&sources, &ExclusionFilters::default()).is_empty());
    }

    #[test]
    fn test_layout_over_single_source() {
        let source = ConfigSource::new("apps", "app", SourceKind::Plain).with_text("k", "v");
        let inner = fingerprint_source(&source, &KeyFilter::default());
        let expected = format!(
            "{:x}",
            Sha256::digest(format!("configmap/app\0{inner}\0").as_bytes())
        );
        let aggregate = aggregate_fingerprint([&source], &ExclusionFilters::default());
        assert_eq!(aggregate.as_str(), expected);
        assert_ne!(aggregate, inner);
    }

    #[test]
    fn test_same_name_different_kind_do_not_collide() {
        let plain = ConfigSource::new("apps", "app", SourceKind::Plain).with_binary("k", "v");
        let secret = ConfigSource::new("apps", "app", SourceKind::Sensitive).with_binary("k", "v");
        let filters = ExclusionFilters::default();
        assert_ne!(
            aggregate_fingerprint([&plain], &filters),
            aggregate_fingerprint([&secret], &filters)
        );
    }

    #[test]
    fn test_sources_without_signal_are_skipped() {
        let filters = ExclusionFilters::new(KeyFilter::parse("upstreams.yaml"), KeyFilter::default());
        let app = ConfigSource::new("apps", "app", SourceKind::Plain).with_text("app.conf", "x=1");
        let upstreams = ConfigSource::new("apps", "routes", SourceKind::Plain)
            .with_text("upstreams.yaml", "routes: []");
        let empty = ConfigSource::new("apps", "empty", SourceKind::Sensitive);

        assert_eq!(
            aggregate_fingerprint([&app, &upstreams, &empty], &filters),
            aggregate_fingerprint([&app], &filters)
        );
        assert!(aggregate_fingerprint([&upstreams, &empty], &filters).is_empty());
    }
}
