//! # Fingerprint Property Tests
//!
//! Determinism, sensitivity, exclusion invariance and order independence of
//! the source and aggregate fingerprints.

use config_rollout_controller::prelude::*;
use std::collections::HashMap;

fn filters() -> ExclusionFilters {
    ExclusionFilters::new(
        KeyFilter::parse("upstreams.yaml"),
        KeyFilter::parse("tls.key"),
    )
}

fn plain(name: &str, entries: &[(&str, &str)]) -> ConfigSource {
    entries
        .iter()
        .fold(ConfigSource::new("apps", name, SourceKind::Plain), |source, (k, v)| {
            source.with_text(*k, *v)
        })
}

#[test]
fn test_fingerprint_ignores_entry_insertion_order() {
    let entries = [("a.conf", "1"), ("b.conf", "2"), ("c.conf", "3"), ("d.conf", "4")];
    let forward = plain("app", &entries);

    let mut reversed = ConfigSource::new("apps", "app", SourceKind::Plain);
    reversed.entries = entries
        .iter()
        .rev()
        .map(|(k, v)| ((*k).to_string(), EntryValue::Text((*v).to_string())))
        .collect::<HashMap<_, _>>();

    let filter = filters();
    assert_eq!(
        fingerprint_source(&forward, filter.for_kind(SourceKind::Plain)),
        fingerprint_source(&reversed, filter.for_kind(SourceKind::Plain))
    );
}

#[test]
fn test_single_byte_changes_are_detected() {
    let original = plain("app", &[("app.conf", "listen=8080"), ("log.conf", "level=info")]);
    let filter = KeyFilter::default();
    let baseline = fingerprint_source(&original, &filter);

    for key in ["app.conf", "log.conf"] {
        let mut mutated = original.clone();
        if let Some(EntryValue::Text(value)) = mutated.entries.get_mut(key) {
            value.replace_range(0..1, "X");
        }
        assert_ne!(fingerprint_source(&mutated, &filter), baseline, "mutating {key}");
    }
}

#[test]
fn test_key_rename_is_detected() {
    let filter = KeyFilter::default();
    assert_ne!(
        fingerprint_source(&plain("app", &[("a", "v")]), &filter),
        fingerprint_source(&plain("app", &[("b", "v")]), &filter)
    );
}

#[test]
fn test_excluded_entries_are_invisible() {
    let filter = filters();
    let base = plain("app", &[("app.conf", "x=1")]);
    let with_excluded = base.clone().with_text("upstreams.yaml", "a");
    let with_changed_excluded = base.clone().with_text("upstreams.yaml", "b");
    let with_binary_excluded = base.clone().with_binary("upstreams.yaml", vec![0u8, 1]);

    let expected = fingerprint_source(&base, filter.for_kind(SourceKind::Plain));
    for source in [&with_excluded, &with_changed_excluded, &with_binary_excluded] {
        assert_eq!(fingerprint_source(source, filter.for_kind(SourceKind::Plain)), expected);
    }
}

#[test]
fn test_exclusions_are_per_kind() {
    let filter = filters();
    let plain_source = plain("app", &[("tls.key", "k")]);
    let secret_source =
        ConfigSource::new("apps", "app", SourceKind::Sensitive).with_binary("tls.key", "k");

    assert!(!fingerprint_source(&plain_source, filter.for_kind(SourceKind::Plain)).is_empty());
    assert!(fingerprint_source(&secret_source, filter.for_kind(SourceKind::Sensitive)).is_empty());
}

#[test]
fn test_text_and_binary_values_never_collide() {
    let filter = KeyFilter::default();
    let text = plain("app", &[("k", "v")]);
    let binary = ConfigSource::new("apps", "app", SourceKind::Plain).with_binary("k", "v");
    assert_ne!(fingerprint_source(&text, &filter), fingerprint_source(&binary, &filter));
}

#[test]
fn test_fingerprint_is_lowercase_sha256_hex() {
    let fingerprint = fingerprint_source(&plain("app", &[("k", "v")]), &KeyFilter::default());
    assert_eq!(fingerprint.as_str().len(), 64);
    assert!(fingerprint
        .as_str()
        .chars()
        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
}

#[test]
fn test_aggregate_is_permutation_invariant() {
    let sources = vec![
        plain("a", &[("app.conf", "1")]),
        plain("b", &[("app.conf", "2")]),
        ConfigSource::new("apps", "a", SourceKind::Sensitive).with_binary("token", "t"),
    ];
    let filter = filters();
    let expected = aggregate_fingerprint(&sources, &filter);

    let permutations = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
    for order in permutations {
        let permuted = order.iter().map(|&i| &sources[i]);
        assert_eq!(aggregate_fingerprint(permuted, &filter), expected, "order {order:?}");
    }
}

#[test]
fn test_same_name_across_kinds_is_distinct() {
    let filter = ExclusionFilters::default();
    let config_map = plain("app", &[("k", "v")]);
    let secret = ConfigSource::new("apps", "app", SourceKind::Sensitive).with_binary("k", "v");

    assert_ne!(
        aggregate_fingerprint([&config_map], &filter),
        aggregate_fingerprint([&secret], &filter)
    );
}

#[test]
fn test_empty_sources_do_not_contribute() {
    let filter = filters();
    let real = plain("app", &[("app.conf", "x=1")]);
    let empty = plain("routes", &[("upstreams.yaml", "a")]);

    assert_eq!(
        aggregate_fingerprint([&real, &empty], &filter),
        aggregate_fingerprint([&real], &filter)
    );
    assert!(aggregate_fingerprint([&empty], &filter).is_empty());
    assert!(aggregate_fingerprint(std::iter::empty::<&ConfigSource>(), &filter).is_empty());
}
