//! Trait interpolation for role fields
//!
//! Role condition fields may reference a principal's traits with
//! `{{external.name}}` / `{{internal.name}}` variables or a single-level
//! function call such as `{{email.local(external.email)}}`. Templates are
//! parsed once at role load into a small tagged variant and evaluated per
//! check; a missing trait expands to no output at all, never to a blank
//! value.

use crate::policy::labels::LabelSelector;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// A principal's traits: named, multi-valued string attributes.
pub type Traits = BTreeMap<String, Vec<String>>;

/// Which trait namespace a variable reads from.
///
/// `external` traits arrive from the identity provider; `internal` traits
/// are set locally on the principal. Both resolve against the same map here;
/// the namespace is kept so role definitions stay faithful to their source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraitNamespace {
    External,
    Internal,
}

/// A parsed role field template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Template {
    /// No interpolation; passes through as-is.
    Literal(String),
    /// `prefix{{expr}}suffix` with exactly one interpolation.
    Interpolation {
        prefix: String,
        expr: TraitExpr,
        suffix: String,
    },
}

/// The expression inside `{{...}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraitExpr {
    /// `external.name`, `internal.name`, or the bracket form
    /// `external["name"]` for names that are not identifiers.
    Var { namespace: TraitNamespace, name: String },
    /// `email.local(var)`: the local part of an email address.
    EmailLocal(Box<TraitExpr>),
}

fn variable_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.*)\{\{(.*?)\}\}(.*)$").unwrap())
}

fn var_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // external.name or external["name"]
    RE.get_or_init(|| {
        Regex::new(r#"^(external|internal)(?:\.([A-Za-z0-9_/-]+)|\["([^"]+)"\])$"#).unwrap()
    })
}

impl Template {
    /// Parses a role field value.
    ///
    /// A string without `{{` or `}}` is a literal. A string with braces must
    /// contain exactly one well-formed interpolation, otherwise the template
    /// is malformed and the whole entry is rejected.
    pub fn parse(input: &str) -> Result<Template, String> {
        if !input.contains("{{") && !input.contains("}}") {
            return Ok(Template::Literal(input.to_string()));
        }
        let caps = variable_re()
            .captures(input)
            .ok_or_else(|| format!("malformed template {input:?}"))?;
        let prefix = caps[1].to_string();
        let inner = caps[2].trim();
        let suffix = caps[3].to_string();
        if prefix.contains("{{") || suffix.contains("}}") || suffix.contains("{{") {
            return Err(format!("malformed template {input:?}"));
        }
        let expr = TraitExpr::parse(inner)?;
        Ok(Template::Interpolation { prefix, expr, suffix })
    }

    /// Expands the template against a trait map.
    ///
    /// A literal yields itself; an interpolation yields one output per trait
    /// value, or nothing when the trait is absent.
    pub fn expand(&self, traits: &Traits) -> Vec<String> {
        match self {
            Template::Literal(value) => vec![value.clone()],
            Template::Interpolation { prefix, expr, suffix } => expr
                .resolve(traits)
                .into_iter()
                .map(|value| format!("{prefix}{value}{suffix}"))
                .collect(),
        }
    }
}

impl TraitExpr {
    fn parse(input: &str) -> Result<TraitExpr, String> {
        if let Some(caps) = var_name_re().captures(input) {
            let namespace = match &caps[1] {
                "external" => TraitNamespace::External,
                _ => TraitNamespace::Internal,
            };
            let name = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().to_string())
                .ok_or_else(|| format!("malformed variable {input:?}"))?;
            return Ok(TraitExpr::Var { namespace, name });
        }
        if let Some(args) = input
            .strip_prefix("email.local(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let args = args.trim();
            if args.is_empty() || args.contains(',') {
                return Err(format!("email.local takes exactly one variable, got {input:?}"));
            }
            let inner = TraitExpr::parse(args)?;
            if matches!(inner, TraitExpr::EmailLocal(_)) {
                return Err("email.local does not nest".to_string());
            }
            return Ok(TraitExpr::EmailLocal(Box::new(inner)));
        }
        if let Some(name) = input.find('(').map(|i| &input[..i]) {
            return Err(format!("unsupported function: {name}"));
        }
        Err(format!("unsupported variable {input:?}"))
    }

    fn resolve(&self, traits: &Traits) -> Vec<String> {
        match self {
            TraitExpr::Var { name, .. } => traits.get(name).cloned().unwrap_or_default(),
            TraitExpr::EmailLocal(inner) => inner
                .resolve(traits)
                .iter()
                .filter_map(|value| email_local(value))
                .collect(),
        }
    }
}

/// The local part of an email address, accepting the `Name <addr@host>` form.
fn email_local(value: &str) -> Option<String> {
    let addr = match (value.rfind('<'), value.rfind('>')) {
        (Some(open), Some(close)) if open < close => &value[open + 1..close],
        _ => value,
    };
    let local = addr.split('@').next().filter(|_| addr.contains('@'))?;
    if local.is_empty() {
        return None;
    }
    Some(local.to_string())
}

/// Expands a list of role field values against a trait map.
///
/// Literals pass through, interpolations fan out per trait value, malformed
/// templates and missing traits are dropped, and the output is deduplicated
/// preserving first-seen order.
pub fn expand_values(inputs: &[String], traits: &Traits) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for input in inputs {
        let Ok(template) = Template::parse(input) else {
            continue;
        };
        for value in template.expand(traits) {
            if !out.contains(&value) {
                out.push(value);
            }
        }
    }
    out
}

/// Expands a label selector against a trait map.
///
/// Selector keys take the first trait value; selector values fan out over
/// all of them. Keys and values whose trait is missing are dropped.
pub fn expand_selector(selector: &LabelSelector, traits: &Traits) -> LabelSelector {
    let mut out = LabelSelector::new();
    for (key, patterns) in &selector.0 {
        let Ok(key_template) = Template::parse(key) else {
            continue;
        };
        let Some(expanded_key) = key_template.expand(traits).into_iter().next() else {
            continue;
        };
        let mut expanded_patterns: Vec<String> = Vec::new();
        for pattern in patterns {
            let Ok(template) = Template::parse(pattern) else {
                continue;
            };
            for value in template.expand(traits) {
                if !expanded_patterns.contains(&value) {
                    expanded_patterns.push(value);
                }
            }
        }
        out.insert(expanded_key, expanded_patterns);
    }
    out
}

/// Whether an expanded value is safe to use as an OS login name.
///
/// Interpolated logins that fail this check are filtered out rather than
/// passed to the target host.
pub fn is_valid_unix_login(login: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9_.-]*\$?$").unwrap());
    !login.is_empty() && login.len() <= 32 && re.is_match(login)
}

/// A regex-capture mapping from one trait's values to derived names.
///
/// `pattern` is matched against every value of the named trait; matching
/// values emit each output with `$1`/`$2` capture groups substituted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraitMapping {
    /// Trait to read values from.
    pub trait_name: String,
    /// Anchored regex or glob tested against each trait value.
    pub pattern: String,
    /// Output templates; `$1`-style references expand to capture groups.
    pub outputs: Vec<String>,
}

/// Applies a set of trait mappings, collecting deduplicated outputs.
///
/// Non-matching values contribute nothing; outputs that expand to the empty
/// string are dropped.
pub fn map_traits(mappings: &[TraitMapping], traits: &Traits) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for mapping in mappings {
        let source = if mapping.pattern.starts_with('^') && mapping.pattern.ends_with('$') {
            mapping.pattern.clone()
        } else {
            format!("^{}$", regex::escape(&mapping.pattern).replace(r"\*", "(.*)"))
        };
        let Ok(re) = Regex::new(&source) else {
            continue;
        };
        let Some(values) = traits.get(&mapping.trait_name) else {
            continue;
        };
        for value in values {
            let Some(caps) = re.captures(value) else {
                continue;
            };
            for output in &mapping.outputs {
                let mut expanded = String::new();
                caps.expand(output, &mut expanded);
                if !expanded.is_empty() && !out.contains(&expanded) {
                    out.push(expanded);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn traits(entries: &[(&str, &[&str])]) -> Traits {
        entries
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_literal_passes_through() {
        let out = expand_values(&strings(&["root"]), &traits(&[("foo", &["bar"])]));
        assert_eq!(out, strings(&["root"]));
    }

    #[test]
    fn test_external_variable_substitutes() {
        let out = expand_values(
            &strings(&["{{external.foo}}", "root"]),
            &traits(&[("foo", &["bar"])]),
        );
        assert_eq!(out, strings(&["bar", "root"]));
    }

    #[test]
    fn test_bracket_form_substitutes() {
        let out = expand_values(
            &strings(&[r#"{{external["my claim/name"]}}"#]),
            &traits(&[("my claim/name", &["ops"])]),
        );
        assert_eq!(out, strings(&["ops"]));
    }

    #[test]
    fn test_email_local_function() {
        let out = expand_values(
            &strings(&["{{email.local(external.foo)}}", "root"]),
            &traits(&[("foo", &["Bar <bar@example.com>"])]),
        );
        assert_eq!(out, strings(&["bar", "root"]));
    }

    #[test]
    fn test_prefix_and_suffix_preserved() {
        let out = expand_values(
            &strings(&["IAM#{{external.foo}};"]),
            &traits(&[("foo", &["bar"])]),
        );
        assert_eq!(out, strings(&["IAM#bar;"]));
    }

    #[test]
    fn test_missing_trait_drops_entry() {
        let out = expand_values(
            &strings(&["{{internal.bar}}", "root"]),
            &traits(&[("foo", &["bar"])]),
        );
        assert_eq!(out, strings(&["root"]));
    }

    #[test]
    fn test_malformed_templates_dropped() {
        let cases = [
            "external.foo}}",
            "{{external.foo",
            "{{email.local(external.foo, 1)}}",
            "{{email.local()}}",
            "{{email.local(email.local)}}",
            "{{email.local(email.local())}}",
        ];
        for case in cases {
            let out = expand_values(&strings(&[case]), &traits(&[("foo", &["bar"])]));
            assert!(out.is_empty(), "expected {case:?} to be dropped, got {out:?}");
        }
    }

    #[test]
    fn test_multivalued_trait_fans_out() {
        let out = expand_values(
            &strings(&["{{internal.logins}}", "root"]),
            &traits(&[("logins", &["bar", "baz"])]),
        );
        assert_eq!(out, strings(&["bar", "baz", "root"]));
    }

    #[test]
    fn test_output_deduplicated() {
        let out = expand_values(
            &strings(&["{{external.foo}}", "bar"]),
            &traits(&[("foo", &["bar"])]),
        );
        assert_eq!(out, strings(&["bar"]));
    }

    #[test]
    fn test_unix_login_filter() {
        assert!(is_valid_unix_login("bar"));
        assert!(is_valid_unix_login("svc$"));
        assert!(!is_valid_unix_login("-foo"));
        assert!(!is_valid_unix_login(""));
        assert!(!is_valid_unix_login("a".repeat(33).as_str()));
    }

    #[test]
    fn test_selector_key_uses_first_value() {
        let selector = LabelSelector::from([("{{external.foo}}", ["value"].as_slice())]);
        let out = expand_selector(&selector, &traits(&[("foo", &["bar", "baz"])]));
        assert_eq!(out.0["bar"], strings(&["value"]));
        assert!(!out.0.contains_key("baz"));
    }

    #[test]
    fn test_selector_values_expand_all() {
        let selector = LabelSelector::from([("key", ["{{external.foo}}"].as_slice())]);
        let out = expand_selector(&selector, &traits(&[("foo", &["bar", "baz"])]));
        assert_eq!(out.0["key"], strings(&["bar", "baz"]));
    }

    #[test]
    fn test_selector_missing_trait_drops_key_and_value() {
        let selector = LabelSelector::from([
            ("{{external.foo}}", ["value"].as_slice()),
            ("{{external.missing}}", ["whatever"].as_slice()),
            ("static", ["{{external.missing}}", "kept"].as_slice()),
        ]);
        let out = expand_selector(&selector, &traits(&[("foo", &["bar"])]));
        assert_eq!(out.0.len(), 2);
        assert_eq!(out.0["bar"], strings(&["value"]));
        assert_eq!(out.0["static"], strings(&["kept"]));
    }

    #[test]
    fn test_trait_mapping_captures() {
        let mappings = vec![TraitMapping {
            trait_name: "groups".into(),
            pattern: "^env-(.*)$".into(),
            outputs: strings(&["role-$1"]),
        }];
        let out = map_traits(
            &mappings,
            &traits(&[("groups", &["env-prod", "env-stage", "ops"])]),
        );
        assert_eq!(out, strings(&["role-prod", "role-stage"]));
    }

    #[test]
    fn test_trait_mapping_exact_and_glob() {
        let mappings = vec![
            TraitMapping {
                trait_name: "groups".into(),
                pattern: "admins".into(),
                outputs: strings(&["admin"]),
            },
            TraitMapping {
                trait_name: "groups".into(),
                pattern: "dev-*".into(),
                outputs: strings(&["developer"]),
            },
        ];
        let out = map_traits(&mappings, &traits(&[("groups", &["admins", "dev-tools"])]));
        assert_eq!(out, strings(&["admin", "developer"]));
    }

    #[test]
    fn test_trait_mapping_no_match_contributes_nothing() {
        let mappings = vec![TraitMapping {
            trait_name: "groups".into(),
            pattern: "^env-(.*)$".into(),
            outputs: strings(&["role-$1"]),
        }];
        assert!(map_traits(&mappings, &traits(&[("groups", &["ops"])])).is_empty());
        assert!(map_traits(&mappings, &traits(&[])).is_empty());
    }
}
