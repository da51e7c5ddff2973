//! Configuration loading tests

use gatewarden::config::{LogFormat, load_config, load_config_from_str};
use gatewarden::policy::templates::Traits;
use gatewarden::policy::{RoleSet, Server};
use std::io::Write;
use tempfile::NamedTempFile;

const MINIMAL_CONFIG: &str = r#"
[logging]
level = "debug"
"#;

const FULL_CONFIG: &str = r#"
[logging]
level = "warn"
format = "json"

[requests]
max_cas_attempts = 5
deny_authority = "full_request"

[roles.dev]
[roles.dev.options]
max_session_ttl_secs = 28800

[roles.dev.allow]
logins = ["dev", "{{external.logins}}"]
node_labels = { env = ["stage"] }
db_names = ["test"]
db_users = ["dev"]

[roles.dev.allow.request]
roles = ["dbadmin"]
min_approvals = 2

[roles.dev.deny]
logins = ["root"]

[roles.lead]
[roles.lead.allow.approve]
roles = ["dbadmin"]

[roles.dbadmin]
[roles.dbadmin.allow]
db_names = ["*"]
db_users = ["*"]

[[trait_mappings]]
trait_name = "groups"
pattern = "^team-(.*)$"
outputs = ["$1"]
"#;

#[test]
fn test_minimal_config() {
    let config = load_config_from_str(MINIMAL_CONFIG).unwrap();
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, LogFormat::Pretty);
    assert_eq!(config.requests.max_cas_attempts, 7);
    assert!(config.roles.is_empty());
    assert!(config.trait_mappings.is_empty());
}

#[test]
fn test_full_config() {
    let config = load_config_from_str(FULL_CONFIG).unwrap();
    assert_eq!(config.logging.level, "warn");
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.requests.max_cas_attempts, 5);

    let catalog = config.build_catalog().unwrap();
    assert_eq!(catalog.len(), 3);

    let dev = catalog.get("dev").unwrap();
    assert_eq!(dev.name, "dev");
    assert_eq!(dev.options.max_session_ttl_secs, 28800);
    assert_eq!(dev.allow.request.roles, vec!["dbadmin"]);
    assert_eq!(dev.allow.request.min_approvals, 2);
    assert_eq!(dev.deny.logins, vec!["root"]);

    let lead = catalog.get("lead").unwrap();
    assert_eq!(lead.allow.approve.roles, vec!["dbadmin"]);

    assert_eq!(config.trait_mappings.len(), 1);
    assert_eq!(config.trait_mappings[0].trait_name, "groups");
}

#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(FULL_CONFIG.as_bytes()).unwrap();

    let config = load_config(Some(file.path().to_str().unwrap())).unwrap();
    assert_eq!(config.logging.level, "warn");
    assert_eq!(config.roles.len(), 3);
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let err = load_config(Some("/nonexistent/gatewarden.toml")).unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[test]
fn test_invalid_toml_is_an_error() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"[roles.dev\nlogins = [").unwrap();
    assert!(load_config(Some(file.path().to_str().unwrap())).is_err());
}

#[test]
fn test_malformed_role_fails_the_load() {
    let toml = r#"
[roles.broken]
[[roles.broken.allow.rules]]
resources = ["role"]
verbs = []
"#;
    let err = load_config_from_str(toml).unwrap_err();
    assert!(err.to_string().contains("missing verbs"));
}

#[test]
fn test_unsupported_where_function_fails_the_load() {
    let toml = r#"
[roles.broken]
[[roles.broken.allow.rules]]
resources = ["role"]
verbs = ["read"]
where = 'matches(user.name, ".*")'
"#;
    let err = load_config_from_str(toml).unwrap_err();
    assert!(err.to_string().contains("unsupported function: matches"));
}

#[test]
fn test_invalid_label_pattern_fails_the_load() {
    let toml = r#"
[roles.broken]
[roles.broken.allow]
node_labels = { env = ["^prod[$"] }
"#;
    let err = load_config_from_str(toml).unwrap_err();
    assert!(err.to_string().contains("invalid label pattern"));
}

// A configuration loaded from disk drives real access decisions end to end.
#[test]
fn test_loaded_roles_answer_access_checks() {
    let config = load_config_from_str(FULL_CONFIG).unwrap();
    let catalog = config.build_catalog().unwrap();

    let mut traits = Traits::new();
    traits.insert("logins".to_string(), vec!["alice".to_string()]);

    let set = RoleSet::for_principal(&catalog, &["dev".to_string()], &traits).unwrap();
    let stage = Server::new("s1", "default").with_labels(&[("env", "stage")]);
    let prod = Server::new("s2", "default").with_labels(&[("env", "prod")]);

    assert!(set.check_access_to_server("alice", &stage).is_ok());
    assert!(set.check_access_to_server("dev", &stage).is_ok());
    assert!(set.check_access_to_server("root", &stage).is_err());
    assert!(set.check_access_to_server("dev", &prod).is_err());
}

#[test]
fn test_request_policy_from_config() {
    let config = load_config_from_str(FULL_CONFIG).unwrap();
    let policy = config.requests.to_policy();
    assert_eq!(policy.max_cas_attempts, 5);
    assert_eq!(
        policy.deny_authority,
        gatewarden::requests::DenyAuthority::FullRequest
    );
}
