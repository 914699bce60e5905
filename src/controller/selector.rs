//! # Label Selector
//!
//! Typed label predicate shared by the watch layer and the listing calls.
//!
//! The external syntax is the Kubernetes label-selector grammar:
//!
//! ```text
//! app=synapse,tier!=cache,env in (dev,prod),release notin (canary),managed,!legacy
//! ```
//!
//! It is parsed once at startup into a [`LabelSelector`], a validated
//! [`kube::core::Selector`]. An empty selector matches everything.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::core::{Expression, Selector, SelectorExt};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

static DNS_SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("DNS subdomain regex is valid")
});

static QUALIFIED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$")
        .expect("qualified name regex is valid")
});

static LABEL_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])?$")
        .expect("label value regex is valid")
});

static SET_REQUIREMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+)\s+(in|notin)\s*\((.*)\)$").expect("set requirement regex is valid")
});

/// Anything that carries a label set.
///
/// Implemented for the Kubernetes source and workload kinds and for the
/// controller's own model types.
pub trait Labeled {
    fn label_set(&self) -> Option<&BTreeMap<String, String>>;
}

macro_rules! impl_labeled_for_objects {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Labeled for $ty {
                fn label_set(&self) -> Option<&BTreeMap<String, String>> {
                    self.metadata.labels.as_ref()
                }
            }
        )*
    };
}

impl_labeled_for_objects!(ConfigMap, Secret, Deployment, DaemonSet, StatefulSet);

impl Labeled for BTreeMap<String, String> {
    fn label_set(&self) -> Option<&BTreeMap<String, String>> {
        Some(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("empty requirement in label selector {selector:?}")]
    EmptyRequirement { selector: String },
    #[error("invalid label key {key:?}")]
    InvalidKey { key: String },
    #[error("invalid label value {value:?} for key {key:?}")]
    InvalidValue { key: String, value: String },
    #[error("set requirement for key {key:?} needs at least one value")]
    EmptyValueSet { key: String },
    #[error("unbalanced parentheses in label selector {selector:?}")]
    UnbalancedParentheses { selector: String },
    #[error("unable to parse requirement {requirement:?}")]
    Unparseable { requirement: String },
}

/// Conjunction of label expressions; no expressions means "match everything".
///
/// Matching and query rendering are delegated to [`kube::core::Selector`];
/// this wrapper owns the string grammar and the key/value validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector(Selector);

impl LabelSelector {
    #[must_use]
    pub fn everything() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_everything(&self) -> bool {
        self.0.selects_all()
    }

    /// The typed selector, for `ListParams::labels_from` and
    /// `watcher::Config::labels_from`.
    #[must_use]
    pub fn as_selector(&self) -> &Selector {
        &self.0
    }

    /// Evaluate the selector against an object's labels. Objects without
    /// labels are treated as carrying an empty label set.
    pub fn matches<L: Labeled + ?Sized>(&self, object: &L) -> bool {
        static EMPTY: BTreeMap<String, String> = BTreeMap::new();
        self.0.matches(object.label_set().unwrap_or(&EMPTY))
    }
}

impl From<Selector> for LabelSelector {
    fn from(selector: Selector) -> Self {
        Self(selector)
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for LabelSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Self::everything());
        }
        let selector = split_top_level(s)?
            .into_iter()
            .map(|term| parse_expression(term, s))
            .collect::<Result<Selector, _>>()?;
        Ok(Self(selector))
    }
}

/// Whether `key` is a valid Kubernetes qualified name (`[prefix/]name`).
/// Label keys and annotation keys share this syntax.
#[must_use]
pub fn is_qualified_name(key: &str) -> bool {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };
    if let Some(prefix) = prefix {
        if !is_dns_subdomain(prefix) {
            return false;
        }
    }
    !name.is_empty() && name.len() <= 63 && QUALIFIED_NAME.is_match(name)
}

/// Whether `name` is a valid DNS subdomain, the syntax of most object names
#[must_use]
pub fn is_dns_subdomain(name: &str) -> bool {
    !name.is_empty() && name.len() <= 253 && DNS_SUBDOMAIN.is_match(name)
}

#[must_use]
pub fn is_label_value(value: &str) -> bool {
    value.len() <= 63 && LABEL_VALUE.is_match(value)
}

// Commas inside `in (...)` sets do not separate requirements.
fn split_top_level(selector: &str) -> Result<Vec<&str>, SelectorError> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in selector.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| SelectorError::UnbalancedParentheses {
                        selector: selector.to_string(),
                    })?;
            }
            ',' if depth == 0 => {
                terms.push(&selector[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(SelectorError::UnbalancedParentheses {
            selector: selector.to_string(),
        });
    }
    terms.push(&selector[start..]);
    Ok(terms)
}

fn parse_expression(term: &str, selector: &str) -> Result<Expression, SelectorError> {
    let term = term.trim();
    if term.is_empty() {
        return Err(SelectorError::EmptyRequirement {
            selector: selector.to_string(),
        });
    }

    if let Some(key) = term.strip_prefix('!') {
        let key = validate_key(key.trim())?;
        return Ok(Expression::DoesNotExist(key));
    }

    if let Some(captures) = SET_REQUIREMENT.captures(term) {
        let key = validate_key(&captures[1])?;
        let values = parse_value_set(&key, &captures[3])?;
        return Ok(if &captures[2] == "in" {
            Expression::In(key, values)
        } else {
            Expression::NotIn(key, values)
        });
    }

    if let Some((key, value)) = term.split_once("!=") {
        let key = validate_key(key.trim())?;
        let value = validate_value(&key, value.trim())?;
        return Ok(Expression::NotEqual(key, value));
    }

    if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
        let key = validate_key(key.trim())?;
        let value = validate_value(&key, value.trim())?;
        return Ok(Expression::Equal(key, value));
    }

    if term.chars().any(char::is_whitespace) || term.contains(['(', ')']) {
        return Err(SelectorError::Unparseable {
            requirement: term.to_string(),
        });
    }
    let key = validate_key(term)?;
    Ok(Expression::Exists(key))
}

fn parse_value_set(key: &str, raw: &str) -> Result<BTreeSet<String>, SelectorError> {
    let values = raw
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| validate_value(key, v))
        .collect::<Result<BTreeSet<_>, _>>()?;
    if values.is_empty() {
        return Err(SelectorError::EmptyValueSet {
            key: key.to_string(),
        });
    }
    Ok(values)
}

fn validate_key(key: &str) -> Result<String, SelectorError> {
    if is_qualified_name(key) {
        Ok(key.to_string())
    } else {
        Err(SelectorError::InvalidKey {
            key: key.to_string(),
        })
    }
}

fn validate_value(key: &str, value: &str) -> Result<String, SelectorError> {
    if is_label_value(value) {
        Ok(value.to_string())
    } else {
        Err(SelectorError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}
