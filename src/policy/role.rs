//! Role definitions
//!
//! A role is a named policy unit with an allow and a deny condition block.
//! Deny always wins. Roles are defined by administrators (TOML/JSON),
//! validated when loaded, and immutable for the duration of a decision.

use crate::error::{PolicyError, PolicyResult};
use crate::policy::labels::LabelSelector;
use crate::policy::resources::DEFAULT_NAMESPACE;
use crate::policy::rules::{Rule, ScopedRule};
use crate::policy::templates::{self, Template, Traits};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Default cap on session TTL when a role doesn't set one: 30 hours.
pub const DEFAULT_MAX_SESSION_TTL_SECS: u64 = 30 * 60 * 60;

/// Roles this role's holders may request, and how many approvals such a
/// request needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConditions {
    /// Requestable role names; `*` makes every role requestable.
    pub roles: Vec<String>,

    /// Approvals required for a grant through this condition.
    /// 0 is treated as 1.
    pub min_approvals: u32,
}

/// Roles this role's holders may vote on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApproveConditions {
    /// Approvable role names; `*` covers every role.
    pub roles: Vec<String>,
}

/// One condition block (allow or deny) of a role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleConditions {
    /// OS logins granted/withheld on matching servers.
    pub logins: Vec<String>,

    /// Namespaces this block applies to.
    pub namespaces: Vec<String>,

    pub node_labels: LabelSelector,
    pub app_labels: LabelSelector,
    #[serde(rename = "kubernetes_labels")]
    pub kube_labels: LabelSelector,
    pub db_labels: LabelSelector,
    pub cluster_labels: LabelSelector,

    pub db_names: Vec<String>,
    pub db_users: Vec<String>,
    pub kube_groups: Vec<String>,
    pub kube_users: Vec<String>,

    /// Fine-grained access rules for gateway resources.
    pub rules: Vec<Rule>,

    /// Elevation requests this block permits/withholds.
    pub request: RequestConditions,

    /// Elevation votes this block permits/withholds.
    pub approve: ApproveConditions,
}

/// Role-wide options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleOptions {
    /// Cap on issued session TTL in seconds; 0 means unset.
    pub max_session_ttl_secs: u64,

    /// Concurrent connection cap; 0 means unset.
    pub max_connections: u64,

    /// Concurrent session cap; 0 means unset.
    pub max_sessions: u64,
}

impl RoleOptions {
    pub fn max_session_ttl(&self) -> Duration {
        Duration::from_secs(self.max_session_ttl_secs)
    }
}

/// A named policy unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Role {
    pub name: String,
    pub options: RoleOptions,
    pub allow: RoleConditions,
    pub deny: RoleConditions,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Fills in what an administrator left out: condition namespaces default
    /// to `default`, allow-side app/kube/db selectors default to the full
    /// wildcard, and the session TTL cap gets its standard value.
    pub fn apply_defaults(&mut self) {
        if self.allow.namespaces.is_empty() {
            self.allow.namespaces = vec![DEFAULT_NAMESPACE.to_string()];
        }
        if self.deny.namespaces.is_empty() {
            self.deny.namespaces = vec![DEFAULT_NAMESPACE.to_string()];
        }
        if self.allow.app_labels.is_empty() {
            self.allow.app_labels = LabelSelector::wildcard();
        }
        if self.allow.kube_labels.is_empty() {
            self.allow.kube_labels = LabelSelector::wildcard();
        }
        if self.allow.db_labels.is_empty() {
            self.allow.db_labels = LabelSelector::wildcard();
        }
        if self.options.max_session_ttl_secs == 0 {
            self.options.max_session_ttl_secs = DEFAULT_MAX_SESSION_TTL_SECS;
        }
    }

    /// Validates the role definition. Any malformed rule, selector pattern,
    /// or field template fails the whole load; a half-loaded role must never
    /// degrade to "always deny" or "always allow".
    pub fn validate(&self) -> PolicyResult<()> {
        if self.name.is_empty() {
            return Err(PolicyError::bad_parameter("role name is required"));
        }
        for (block, conditions) in [("allow", &self.allow), ("deny", &self.deny)] {
            conditions
                .validate()
                .map_err(|message| {
                    PolicyError::bad_parameter(format!(
                        "role {:?}, {block} block: {message}",
                        self.name
                    ))
                })?;
            // Compiling every rule here rejects unsupported where/actions
            // functions at load time instead of evaluation time.
            for rule in &conditions.rules {
                ScopedRule::compile(&self.name, &conditions.namespaces, rule).map_err(
                    |message| {
                        PolicyError::bad_parameter(format!(
                            "role {:?}, {block} block: {message}",
                            self.name
                        ))
                    },
                )?;
            }
        }
        Ok(())
    }

    /// Expands every trait template in both condition blocks, producing the
    /// effective role for one principal. Logins additionally pass through the
    /// OS username filter.
    pub fn apply_traits(&self, traits: &Traits) -> Role {
        let mut role = self.clone();
        for conditions in [&mut role.allow, &mut role.deny] {
            conditions.logins = templates::expand_values(&conditions.logins, traits)
                .into_iter()
                .filter(|login| templates::is_valid_unix_login(login))
                .collect();
            conditions.db_names = templates::expand_values(&conditions.db_names, traits);
            conditions.db_users = templates::expand_values(&conditions.db_users, traits);
            conditions.kube_groups = templates::expand_values(&conditions.kube_groups, traits);
            conditions.kube_users = templates::expand_values(&conditions.kube_users, traits);
            conditions.node_labels = templates::expand_selector(&conditions.node_labels, traits);
            conditions.app_labels = templates::expand_selector(&conditions.app_labels, traits);
            conditions.kube_labels = templates::expand_selector(&conditions.kube_labels, traits);
            conditions.db_labels = templates::expand_selector(&conditions.db_labels, traits);
            conditions.cluster_labels =
                templates::expand_selector(&conditions.cluster_labels, traits);
        }
        role
    }
}

impl RoleConditions {
    fn validate(&self) -> Result<(), String> {
        for (field, values) in [
            ("logins", &self.logins),
            ("db_names", &self.db_names),
            ("db_users", &self.db_users),
            ("kube_groups", &self.kube_groups),
            ("kube_users", &self.kube_users),
        ] {
            for value in values {
                Template::parse(value)
                    .map_err(|err| format!("invalid {field} entry: {err}"))?;
            }
        }
        for (field, selector) in [
            ("node_labels", &self.node_labels),
            ("app_labels", &self.app_labels),
            ("kubernetes_labels", &self.kube_labels),
            ("db_labels", &self.db_labels),
            ("cluster_labels", &self.cluster_labels),
        ] {
            selector
                .validate()
                .map_err(|err| format!("{field}: {err}"))?;
        }
        Ok(())
    }
}

/// Validated role definitions keyed by name.
#[derive(Debug, Clone, Default)]
pub struct RoleCatalog {
    roles: BTreeMap<String, Role>,
}

impl RoleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies defaults, validates, and stores a role. Replaces any previous
    /// definition with the same name.
    pub fn insert(&mut self, mut role: Role) -> PolicyResult<()> {
        role.apply_defaults();
        role.validate()?;
        self.roles.insert(role.name.clone(), role);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Role> {
        self.roles.get(name)
    }

    /// Resolves assigned role names to their definitions.
    pub fn resolve(&self, names: &[String]) -> PolicyResult<Vec<Role>> {
        names
            .iter()
            .map(|name| {
                self.roles
                    .get(name)
                    .cloned()
                    .ok_or_else(|| PolicyError::not_found(format!("role {name:?} is not defined")))
            })
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}
