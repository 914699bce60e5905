//! # Fingerprinting
//!
//! Deterministic SHA-256 digests over configuration content.
//!
//! - `filter`: per-kind exclusion of entry keys
//! - `source`: digest of a single ConfigMap/Secret
//! - `aggregate`: order-independent digest over every source in a namespace
//!
//! Identical filtered content always yields the same fingerprint, whatever
//! order the entries or sources were read in. Content that is empty after
//! filtering yields the empty fingerprint, which means "no signal".

pub mod aggregate;
pub mod filter;
pub mod source;

pub use aggregate::aggregate_fingerprint;
pub use filter::{ExclusionFilters, KeyFilter};
pub use source::{fingerprint_source, Fingerprint};
