//! Label selector matching
//!
//! A selector maps a label key to the list of acceptable value patterns.
//! Matching is a conjunction across keys and a disjunction across the
//! patterns listed for one key. The `*: [*]` selector short-circuits to a
//! match for any resource, labeled or not.

use regex::Regex;
use serde::de::{Deserializer, Error as _};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The wildcard token used for label keys, label values, resource kinds,
/// verbs and namespaces.
pub const WILDCARD: &str = "*";

/// A label selector: label key to acceptable value patterns.
///
/// Accepts both scalar and list forms when deserialized, so `env = "prod"`
/// and `env = ["prod", "stage"]` are equivalent in role definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LabelSelector(pub BTreeMap<String, Vec<String>>);

impl LabelSelector {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// The `{*: [*]}` selector.
    pub fn wildcard() -> Self {
        let mut map = BTreeMap::new();
        map.insert(WILDCARD.to_string(), vec![WILDCARD.to_string()]);
        Self(map)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&mut self, key: impl Into<String>, patterns: Vec<String>) {
        self.0.insert(key.into(), patterns);
    }

    fn is_full_wildcard(&self) -> bool {
        self.0
            .get(WILDCARD)
            .is_some_and(|patterns| patterns.iter().any(|p| p == WILDCARD))
    }

    /// Whether this selector matches the given resource labels.
    ///
    /// An empty selector matches only resources with zero labels; `{*: [*]}`
    /// matches everything; an empty pattern list for a present key matches
    /// nothing.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        if self.is_full_wildcard() {
            return true;
        }
        if self.0.is_empty() {
            return labels.is_empty();
        }
        self.0.iter().all(|(key, patterns)| {
            labels
                .get(key)
                .is_some_and(|value| patterns.iter().any(|p| value_matches(p, value)))
        })
    }

    /// Validates every pattern in the selector, returning the first invalid
    /// one. Called at role load so malformed regexes fail the load instead of
    /// silently never matching.
    pub fn validate(&self) -> Result<(), String> {
        for patterns in self.0.values() {
            for pattern in patterns {
                if is_anchored_regex(pattern) && Regex::new(pattern).is_err() {
                    return Err(format!("invalid label pattern '{pattern}'"));
                }
            }
        }
        Ok(())
    }
}

impl<'de> Deserialize<'de> for LabelSelector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            One(String),
            Many(Vec<String>),
        }

        let raw: BTreeMap<String, OneOrMany> = BTreeMap::deserialize(deserializer)?;
        let mut map = BTreeMap::new();
        for (key, value) in raw {
            if key.is_empty() {
                return Err(D::Error::custom("empty label key"));
            }
            let patterns = match value {
                OneOrMany::One(v) => vec![v],
                OneOrMany::Many(vs) => vs,
            };
            map.insert(key, patterns);
        }
        Ok(LabelSelector(map))
    }
}

impl<const N: usize> From<[(&str, &[&str]); N]> for LabelSelector {
    fn from(entries: [(&str, &[&str]); N]) -> Self {
        let mut selector = LabelSelector::new();
        for (key, patterns) in entries {
            selector.insert(key, patterns.iter().map(|p| p.to_string()).collect());
        }
        selector
    }
}

fn is_anchored_regex(pattern: &str) -> bool {
    pattern.starts_with('^') && pattern.ends_with('$')
}

/// Whether a single pattern matches a label value.
///
/// Exact equality, an anchored regex (`^...$`), or a glob (`*` expands to
/// `(.*)`, everything else taken literally). A pattern that fails to compile
/// matches nothing.
pub fn value_matches(pattern: &str, value: &str) -> bool {
    if pattern == value {
        return true;
    }
    let source = if is_anchored_regex(pattern) {
        pattern.to_string()
    } else if pattern.contains('*') {
        format!("^{}$", regex::escape(pattern).replace(r"\*", "(.*)"))
    } else {
        return false;
    };
    Regex::new(&source).is_ok_and(|re| re.is_match(value))
}

/// Whether a namespace is in scope for a list of condition namespaces.
pub fn namespace_in_scope(namespaces: &[String], namespace: &str) -> bool {
    namespaces
        .iter()
        .any(|ns| ns == WILDCARD || ns.eq_ignore_ascii_case(namespace))
}
