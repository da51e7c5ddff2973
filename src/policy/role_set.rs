//! Role set checks
//!
//! A role set is the union of all roles assigned to a principal for one
//! authorization decision. Every check composes the same way: deny blocks
//! are consulted first across the whole set, then a single role's allow
//! block must fully match. Insertion order never affects the outcome.

use crate::error::{AccessDeniedError, PolicyError, PolicyResult};
use crate::policy::labels::{LabelSelector, WILDCARD, namespace_in_scope};
use crate::policy::resources::{DatabaseServer, KubeCluster, RemoteCluster, Server};
use crate::policy::role::{Role, RoleCatalog};
use crate::policy::rules::{RuleContext, RuleSet, ScopedRule};
use crate::policy::templates::Traits;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// The union of roles backing one authorization decision.
#[derive(Debug, Clone)]
pub struct RoleSet {
    roles: Vec<Role>,
    rules: RuleSet,
}

impl RoleSet {
    /// Builds a set from resolved roles, compiling every access rule once.
    ///
    /// Compilation only fails on definitions that skipped validation, so
    /// sets built from a `RoleCatalog` cannot fail here.
    pub fn new(roles: Vec<Role>) -> PolicyResult<RoleSet> {
        let mut deny = Vec::new();
        let mut allow = Vec::new();
        for role in &roles {
            for rule in &role.deny.rules {
                deny.push(
                    ScopedRule::compile(&role.name, &role.deny.namespaces, rule)
                        .map_err(PolicyError::bad_parameter)?,
                );
            }
            for rule in &role.allow.rules {
                allow.push(
                    ScopedRule::compile(&role.name, &role.allow.namespaces, rule)
                        .map_err(PolicyError::bad_parameter)?,
                );
            }
        }
        Ok(RoleSet {
            roles,
            rules: RuleSet::build(deny, allow),
        })
    }

    /// Resolves assigned role names against the catalog and applies the
    /// principal's traits to each, yielding the effective set for one
    /// decision.
    pub fn for_principal(
        catalog: &RoleCatalog,
        role_names: &[String],
        traits: &Traits,
    ) -> PolicyResult<RoleSet> {
        let roles = catalog
            .resolve(role_names)?
            .into_iter()
            .map(|role| role.apply_traits(traits))
            .collect();
        RoleSet::new(roles)
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn role_names(&self) -> Vec<&str> {
        self.roles.iter().map(|role| role.name.as_str()).collect()
    }

    /// Whether the principal may open an SSH session on the server as
    /// `login`.
    ///
    /// Deny side: a matching namespace plus either a label or a login match
    /// prohibits access. Allow side: namespace, labels, and login must all
    /// match within a single role.
    pub fn check_access_to_server(&self, login: &str, server: &Server) -> PolicyResult<()> {
        let resource = format!("node/{}", server.name);
        for role in &self.roles {
            if namespace_in_scope(&role.deny.namespaces, &server.namespace)
                && (selector_denies(&role.deny.node_labels, &server.labels)
                    || role.deny.logins.iter().any(|l| l == login))
            {
                debug!(role = %role.name, server = %server.name, login, "server access denied");
                return Err(AccessDeniedError::denied_by_rule(resource, role.name.clone()).into());
            }
        }
        let mut labels_matched = false;
        for role in &self.roles {
            if !namespace_in_scope(&role.allow.namespaces, &server.namespace)
                || !role.allow.node_labels.matches(&server.labels)
            {
                continue;
            }
            labels_matched = true;
            if role.allow.logins.iter().any(|l| l == login) {
                return Ok(());
            }
        }
        if labels_matched {
            Err(AccessDeniedError::login_not_listed(resource, login).into())
        } else {
            Err(AccessDeniedError::labels_not_matched(resource).into())
        }
    }

    /// Whether the principal may route to a federated leaf cluster.
    pub fn check_access_to_remote_cluster(&self, cluster: &RemoteCluster) -> PolicyResult<()> {
        let resource = format!("remote_cluster/{}", cluster.name);
        for role in &self.roles {
            if selector_denies(&role.deny.cluster_labels, &cluster.labels) {
                return Err(AccessDeniedError::denied_by_rule(resource, role.name.clone()).into());
            }
        }
        for role in &self.roles {
            if role.allow.cluster_labels.matches(&cluster.labels) {
                return Ok(());
            }
        }
        Err(AccessDeniedError::labels_not_matched(resource).into())
    }

    /// Whether the principal may see and connect to a database server at
    /// all, before any database name or user is chosen.
    pub fn check_access_to_database_server(&self, db: &DatabaseServer) -> PolicyResult<()> {
        self.check_database(db, None, None)
    }

    /// Whether the principal may connect to a specific database as a
    /// specific database user.
    pub fn check_access_to_database(
        &self,
        db: &DatabaseServer,
        db_name: &str,
        db_user: &str,
    ) -> PolicyResult<()> {
        self.check_database(db, Some(db_name), Some(db_user))
    }

    fn check_database(
        &self,
        db: &DatabaseServer,
        db_name: Option<&str>,
        db_user: Option<&str>,
    ) -> PolicyResult<()> {
        let resource = format!("db/{}", db.name);
        let labels = db.combined_labels();
        // Deny blocks constrain only what they specify; every specified
        // matcher must hit for the deny to fire, and a deny that specifies
        // nothing fires never.
        for role in &self.roles {
            if !namespace_in_scope(&role.deny.namespaces, &db.namespace) {
                continue;
            }
            let mut specified = false;
            let mut all_matched = true;
            if !role.deny.db_labels.is_empty() {
                specified = true;
                all_matched &= role.deny.db_labels.matches(&labels);
            }
            if let Some(name) = db_name
                && !role.deny.db_names.is_empty()
            {
                specified = true;
                all_matched &= name_listed(&role.deny.db_names, name);
            }
            if let Some(user) = db_user
                && !role.deny.db_users.is_empty()
            {
                specified = true;
                all_matched &= name_listed(&role.deny.db_users, user);
            }
            if specified && all_matched {
                debug!(role = %role.name, db = %db.name, "database access denied");
                return Err(AccessDeniedError::denied_by_rule(resource, role.name.clone()).into());
            }
        }
        for role in &self.roles {
            if !namespace_in_scope(&role.allow.namespaces, &db.namespace)
                || !role.allow.db_labels.matches(&labels)
            {
                continue;
            }
            let name_ok = db_name.is_none_or(|name| name_listed(&role.allow.db_names, name));
            let user_ok = db_user.is_none_or(|user| name_listed(&role.allow.db_users, user));
            if name_ok && user_ok {
                return Ok(());
            }
        }
        Err(AccessDeniedError::labels_not_matched(resource).into())
    }

    /// Whether the principal may access a Kubernetes cluster.
    pub fn check_access_to_kube_cluster(
        &self,
        namespace: &str,
        cluster: &KubeCluster,
    ) -> PolicyResult<()> {
        let resource = format!("kube_cluster/{}", cluster.name);
        let labels = cluster.combined_labels();
        for role in &self.roles {
            if namespace_in_scope(&role.deny.namespaces, namespace)
                && selector_denies(&role.deny.kube_labels, &labels)
            {
                return Err(AccessDeniedError::denied_by_rule(resource, role.name.clone()).into());
            }
        }
        for role in &self.roles {
            if namespace_in_scope(&role.allow.namespaces, namespace)
                && role.allow.kube_labels.matches(&labels)
            {
                return Ok(());
            }
        }
        Err(AccessDeniedError::labels_not_matched(resource).into())
    }

    /// Database names and users this set can ask for within a session TTL.
    ///
    /// Only roles whose TTL cap covers the requested TTL contribute. A TTL
    /// no role can cover is AccessDenied; a covered TTL with nothing granted
    /// at all is NotFound, so callers can tell an explicit lock-out from an
    /// empty grant.
    pub fn check_db_names_and_users(
        &self,
        ttl: Duration,
        override_ttl: bool,
    ) -> PolicyResult<(Vec<String>, Vec<String>)> {
        self.aggregate_names(ttl, override_ttl, "database", |conditions| {
            (&conditions.db_names, &conditions.db_users)
        })
    }

    /// Kubernetes groups and users this set can assume within a session TTL.
    /// Same aggregation contract as [`check_db_names_and_users`].
    ///
    /// [`check_db_names_and_users`]: RoleSet::check_db_names_and_users
    pub fn check_kube_groups_and_users(
        &self,
        ttl: Duration,
        override_ttl: bool,
    ) -> PolicyResult<(Vec<String>, Vec<String>)> {
        self.aggregate_names(ttl, override_ttl, "kubernetes", |conditions| {
            (&conditions.kube_groups, &conditions.kube_users)
        })
    }

    fn aggregate_names(
        &self,
        ttl: Duration,
        override_ttl: bool,
        class: &str,
        pick: impl Fn(&crate::policy::role::RoleConditions) -> (&Vec<String>, &Vec<String>),
    ) -> PolicyResult<(Vec<String>, Vec<String>)> {
        let mut names: Vec<String> = Vec::new();
        let mut users: Vec<String> = Vec::new();
        let mut ttl_matched = false;
        for role in &self.roles {
            let max_ttl = role.options.max_session_ttl();
            if override_ttl || (!max_ttl.is_zero() && ttl <= max_ttl) {
                ttl_matched = true;
                let (allow_names, allow_users) = pick(&role.allow);
                for name in allow_names {
                    if !names.contains(name) {
                        names.push(name.clone());
                    }
                }
                for user in allow_users {
                    if !users.contains(user) {
                        users.push(user.clone());
                    }
                }
            }
        }
        for role in &self.roles {
            let (deny_names, deny_users) = pick(&role.deny);
            names.retain(|name| !name_listed(deny_names, name));
            users.retain(|user| !name_listed(deny_users, user));
        }
        if !ttl_matched {
            return Err(AccessDeniedError::session_ttl(class.to_string()).into());
        }
        if names.is_empty() && users.is_empty() {
            return Err(PolicyError::not_found(format!(
                "no {class} names or users are granted by any role"
            )));
        }
        Ok((names, users))
    }

    /// Clamps a requested session TTL to what every role in the set permits.
    pub fn adjust_session_ttl(&self, mut ttl: Duration) -> Duration {
        for role in &self.roles {
            let max_ttl = role.options.max_session_ttl();
            if !max_ttl.is_zero() && ttl > max_ttl {
                ttl = max_ttl;
            }
        }
        ttl
    }

    /// The effective concurrent connection cap: smallest nonzero value
    /// across the set, 0 when no role sets one.
    pub fn max_connections(&self) -> u64 {
        min_nonzero(self.roles.iter().map(|role| role.options.max_connections))
    }

    /// The effective concurrent session cap; same resolution as
    /// [`max_connections`].
    ///
    /// [`max_connections`]: RoleSet::max_connections
    pub fn max_sessions(&self) -> u64 {
        min_nonzero(self.roles.iter().map(|role| role.options.max_sessions))
    }

    /// Fine-grained rule check: may the principal apply `verb` to `resource`
    /// in `namespace`? Deny rules win; the deciding allow rule's actions run.
    pub fn check_access_to_rule(
        &self,
        ctx: &RuleContext,
        namespace: &str,
        resource: &str,
        verb: &str,
    ) -> PolicyResult<()> {
        self.rules.evaluate(ctx, namespace, resource, verb)
    }

    /// Whether holders of this set may request elevation to `role`.
    pub fn can_request_role(&self, role: &str) -> bool {
        let denied = self
            .roles
            .iter()
            .any(|r| name_listed(&r.deny.request.roles, role));
        !denied
            && self
                .roles
                .iter()
                .any(|r| name_listed(&r.allow.request.roles, role))
    }

    /// The smallest approval count among this set's grants of `role`, floored
    /// at 1. `None` when no role here grants requesting it.
    pub fn min_approvals_for(&self, role: &str) -> Option<u32> {
        self.roles
            .iter()
            .filter(|r| name_listed(&r.allow.request.roles, role))
            .map(|r| r.allow.request.min_approvals.max(1))
            .min()
    }

    /// Whether holders of this set may vote on requests for `role`.
    pub fn can_approve_role(&self, role: &str) -> bool {
        let denied = self
            .roles
            .iter()
            .any(|r| name_listed(&r.deny.approve.roles, role));
        !denied
            && self
                .roles
                .iter()
                .any(|r| name_listed(&r.allow.approve.roles, role))
    }
}

/// Exact-or-wildcard membership used for db names/users, kube groups/users
/// and request/approve role lists.
fn name_listed(list: &[String], name: &str) -> bool {
    list.iter().any(|entry| entry == WILDCARD || entry == name)
}

/// Deny-side selector matching: an absent selector is "no constraint", not
/// "matches unlabeled resources".
fn selector_denies(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    !selector.is_empty() && selector.matches(labels)
}

fn min_nonzero(values: impl Iterator<Item = u64>) -> u64 {
    values.filter(|v| *v != 0).min().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::labels::LabelSelector;

    fn role_with_logins(name: &str, logins: &[&str], node_labels: LabelSelector) -> Role {
        let mut role = Role::new(name);
        role.allow.namespaces = vec!["default".to_string()];
        role.deny.namespaces = vec!["default".to_string()];
        role.allow.logins = logins.iter().map(|l| l.to_string()).collect();
        role.allow.node_labels = node_labels;
        role
    }

    #[test]
    fn test_empty_set_grants_nothing() {
        let set = RoleSet::new(Vec::new()).unwrap();
        let server = Server::new("a", "default");
        assert!(set.check_access_to_server("root", &server).is_err());
    }

    #[test]
    fn test_server_access_requires_login_and_labels() {
        let set = RoleSet::new(vec![role_with_logins(
            "name1",
            &["admin"],
            LabelSelector::from([("role", ["worker"].as_slice())]),
        )])
        .unwrap();

        let worker = Server::new("b", "default").with_labels(&[("role", "worker")]);
        let db = Server::new("c", "default").with_labels(&[("role", "db")]);

        assert!(set.check_access_to_server("admin", &worker).is_ok());
        assert!(set.check_access_to_server("root", &worker).is_err());
        assert!(set.check_access_to_server("admin", &db).is_err());
    }

    #[test]
    fn test_server_namespace_scoping() {
        let set = RoleSet::new(vec![role_with_logins(
            "name1",
            &["admin"],
            LabelSelector::wildcard(),
        )])
        .unwrap();
        let in_scope = Server::new("a", "default");
        let out_of_scope = Server::new("c", "namespace-c").with_labels(&[("role", "db")]);
        assert!(set.check_access_to_server("admin", &in_scope).is_ok());
        assert!(set.check_access_to_server("admin", &out_of_scope).is_err());
    }

    #[test]
    fn test_server_deny_login_wins() {
        let mut role = role_with_logins("name1", &["admin", "root"], LabelSelector::wildcard());
        role.deny.logins = vec!["root".to_string()];
        let set = RoleSet::new(vec![role]).unwrap();
        let server = Server::new("a", "default");
        assert!(set.check_access_to_server("admin", &server).is_ok());
        assert!(set.check_access_to_server("root", &server).is_err());
    }

    #[test]
    fn test_server_empty_label_list_locks_out() {
        let set = RoleSet::new(vec![role_with_logins(
            "name1",
            &["admin"],
            LabelSelector::from([("role", [].as_slice())]),
        )])
        .unwrap();
        let server = Server::new("b", "default").with_labels(&[("role", "worker")]);
        assert!(set.check_access_to_server("admin", &server).is_err());
        assert!(
            set.check_access_to_server("admin", &Server::new("a", "default"))
                .is_err()
        );
    }

    #[test]
    fn test_more_permissive_role_wins() {
        let narrow = role_with_logins(
            "narrow",
            &["admin"],
            LabelSelector::from([("role", ["worker"].as_slice())]),
        );
        let mut broad = role_with_logins("broad", &["root", "admin"], LabelSelector::wildcard());
        broad.allow.namespaces = vec![WILDCARD.to_string()];
        let set = RoleSet::new(vec![narrow, broad]).unwrap();
        let server = Server::new("c", "namespace-c").with_labels(&[("role", "db")]);
        assert!(set.check_access_to_server("root", &server).is_ok());
        assert!(set.check_access_to_server("admin", &server).is_ok());
    }

    #[test]
    fn test_remote_cluster_label_match() {
        let mut role = Role::new("name1");
        role.allow.cluster_labels = LabelSelector::from([("role", ["worker2", "worker"].as_slice())]);
        let set = RoleSet::new(vec![role]).unwrap();

        let unlabeled = RemoteCluster::new("a");
        let worker = RemoteCluster::new("b").with_labels(&[("role", "worker"), ("status", "follower")]);
        let db = RemoteCluster::new("c").with_labels(&[("role", "db"), ("status", "follower")]);

        assert!(set.check_access_to_remote_cluster(&unlabeled).is_err());
        assert!(set.check_access_to_remote_cluster(&worker).is_ok());
        assert!(set.check_access_to_remote_cluster(&db).is_err());
    }

    #[test]
    fn test_remote_cluster_empty_selector_matches_only_unlabeled() {
        let set = RoleSet::new(vec![Role::new("name1")]).unwrap();
        let unlabeled = RemoteCluster::new("a");
        let labeled = RemoteCluster::new("b").with_labels(&[("role", "worker")]);
        assert!(set.check_access_to_remote_cluster(&unlabeled).is_ok());
        assert!(set.check_access_to_remote_cluster(&labeled).is_err());
    }

    #[test]
    fn test_remote_cluster_regex_labels() {
        let mut role = Role::new("name1");
        role.allow.cluster_labels = LabelSelector::from([
            ("role", ["^db(.*)$"].as_slice()),
            ("status", ["follow*"].as_slice()),
        ]);
        let set = RoleSet::new(vec![role]).unwrap();
        let matching = RemoteCluster::new("c").with_labels(&[("role", "db"), ("status", "follower")]);
        let other = RemoteCluster::new("b").with_labels(&[("role", "worker"), ("status", "follower")]);
        assert!(set.check_access_to_remote_cluster(&matching).is_ok());
        assert!(set.check_access_to_remote_cluster(&other).is_err());
    }

    #[test]
    fn test_kube_cluster_dynamic_labels() {
        let mut role = Role::new("matching-labels");
        role.allow.namespaces = vec!["default".to_string()];
        role.allow.kube_labels = LabelSelector::from([
            ("foo", ["bar"].as_slice()),
            ("baz", ["qux"].as_slice()),
        ]);
        let set = RoleSet::new(vec![role]).unwrap();
        let cluster = KubeCluster::new("c")
            .with_static_labels(&[("foo", "bar")])
            .with_dynamic_labels(&[("baz", "qux")]);
        assert!(set.check_access_to_kube_cluster("default", &cluster).is_ok());

        let mismatched = KubeCluster::new("c").with_static_labels(&[("foo", "other")]);
        assert!(
            set.check_access_to_kube_cluster("default", &mismatched)
                .is_err()
        );
    }

    #[test]
    fn test_max_connections_and_sessions() {
        let cases: &[(&[u64], u64)] = &[
            (&[8, 6, 7, 5, 3, 0, 9], 3),
            (&[5, 6, 7, 8], 5),
            (&[0, 0, 0, 0, 0, 0, 0], 0),
        ];
        for (values, want) in cases {
            let roles = values
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    let mut role = Role::new(format!("role-{i}"));
                    role.options.max_connections = *v;
                    role.options.max_sessions = *v;
                    role
                })
                .collect();
            let set = RoleSet::new(roles).unwrap();
            assert_eq!(set.max_connections(), *want, "values {values:?}");
            assert_eq!(set.max_sessions(), *want, "values {values:?}");
        }
    }

    #[test]
    fn test_adjust_session_ttl() {
        let mut short = Role::new("short");
        short.options.max_session_ttl_secs = 3600;
        let mut long = Role::new("long");
        long.options.max_session_ttl_secs = 72000;
        let set = RoleSet::new(vec![long, short]).unwrap();
        assert_eq!(
            set.adjust_session_ttl(Duration::from_secs(7200)),
            Duration::from_secs(3600)
        );
        assert_eq!(
            set.adjust_session_ttl(Duration::from_secs(60)),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_request_and_approve_helpers() {
        let mut lead = Role::new("lead");
        lead.allow.request.roles = vec!["dbadmin".to_string()];
        lead.allow.request.min_approvals = 2;
        lead.allow.approve.roles = vec!["dbadmin".to_string()];
        let mut intern = Role::new("intern");
        intern.allow.request.roles = vec!["dbadmin".to_string()];
        intern.allow.request.min_approvals = 3;
        let set = RoleSet::new(vec![lead, intern]).unwrap();

        assert!(set.can_request_role("dbadmin"));
        assert!(!set.can_request_role("root"));
        assert_eq!(set.min_approvals_for("dbadmin"), Some(2));
        assert_eq!(set.min_approvals_for("root"), None);
        assert!(set.can_approve_role("dbadmin"));
        assert!(!set.can_approve_role("root"));
    }

    #[test]
    fn test_deny_request_blocks_grant() {
        let mut role = Role::new("restricted");
        role.allow.request.roles = vec![WILDCARD.to_string()];
        role.deny.request.roles = vec!["root".to_string()];
        let set = RoleSet::new(vec![role]).unwrap();
        assert!(set.can_request_role("dbadmin"));
        assert!(!set.can_request_role("root"));
    }

    #[test]
    fn test_min_approvals_floors_at_one() {
        let mut role = Role::new("lead");
        role.allow.request.roles = vec!["dbadmin".to_string()];
        role.allow.request.min_approvals = 0;
        let set = RoleSet::new(vec![role]).unwrap();
        assert_eq!(set.min_approvals_for("dbadmin"), Some(1));
    }
}
