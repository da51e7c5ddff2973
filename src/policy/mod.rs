//! Policy evaluation engine
//!
//! Role and label based access decisions: selectors match resources, trait
//! templates specialize roles per principal, rules govern verbs on gateway
//! resources, and the role set composes it all with deny-overrides-allow
//! semantics.

pub mod labels;
pub mod resources;
pub mod role;
pub mod role_set;
pub mod rules;
pub mod templates;

pub use labels::{LabelSelector, WILDCARD};
pub use resources::{DEFAULT_NAMESPACE, DatabaseServer, KubeCluster, RemoteCluster, Server};
pub use role::{Role, RoleCatalog, RoleConditions, RoleOptions};
pub use role_set::RoleSet;
pub use rules::{ActionSink, CapturingSink, Rule, RuleContext, TracingSink};
pub use templates::{Template, TraitMapping, Traits};
