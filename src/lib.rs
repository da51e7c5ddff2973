//! Gatewarden authorization engine
//!
//! The access-control plane of a multi-protocol remote-access gateway: for
//! every resource-access attempt it decides whether a principal is
//! permitted, and it governs the workflow by which temporary elevated
//! access is granted through independent approvals.
//!
//! ## Policy model
//!
//! ```text
//! roles (allow/deny blocks) → role set → per-resource-class checks
//! ```
//!
//! A role carries label selectors per resource class, login and database
//! name/user lists (trait-interpolable), and fine-grained rules over
//! gateway resources. A principal's role set composes them with
//! deny-overrides-allow semantics: access is granted iff no deny matches
//! and at least one allow does.
//!
//! ## Elevation model
//!
//! An access request starts PENDING with a computed approval threshold.
//! Reviewers submit proposals; approvals tally per exact role subset, a
//! single authorized denial terminates the request, and persistence is a
//! bounded compare-and-swap loop against a pluggable backend.
//!
//! ## Example configuration
//!
//! ```toml
//! [roles.dev.allow]
//! logins = ["dev", "{{external.logins}}"]
//! node_labels = { env = ["stage"] }
//!
//! [roles.dev.allow.request]
//! roles = ["dbadmin"]            # dev holders may request dbadmin
//! min_approvals = 2              # with two matching approvals
//!
//! [roles.lead.allow.approve]
//! roles = ["dbadmin"]            # lead holders may vote on dbadmin
//! ```

pub mod config;
pub mod error;
pub mod policy;
pub mod requests;
pub mod storage;

// Re-export main types
pub use config::{AppConfig, load_config};
pub use error::{AppError, Result};
pub use policy::{Role, RoleCatalog, RoleSet};
pub use requests::{AccessRequest, RequestService};
pub use storage::{MemoryBackend, RequestBackend};
