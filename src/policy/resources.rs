//! Resource descriptors consumed by role set checks
//!
//! These carry only what the policy engine needs: a name, a namespace where
//! applicable, and static plus dynamically computed labels. The protocol
//! front-ends own everything else about a resource.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Namespace assigned to resources and role conditions that don't name one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Resource kind names used in access rules.
pub mod kind {
    pub const ROLE: &str = "role";
    pub const USER: &str = "user";
    pub const SESSION: &str = "session";
    pub const SSH_SESSION: &str = "ssh_session";
    pub const NODE: &str = "node";
    pub const DATABASE: &str = "db";
    pub const KUBE_CLUSTER: &str = "kube_cluster";
    pub const REMOTE_CLUSTER: &str = "remote_cluster";
    pub const ACCESS_REQUEST: &str = "access_request";
}

/// Verb names used in access rules.
pub mod verb {
    pub const READ: &str = "read";
    pub const LIST: &str = "list";
    pub const CREATE: &str = "create";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";
}

/// A server (SSH node) registered with the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Server {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_labels(mut self, labels: &[(&str, &str)]) -> Self {
        self.labels = to_label_map(labels);
        self
    }
}

/// A database server proxied by the gateway.
///
/// Dynamic labels are computed by the serving agent (command output, cloud
/// metadata) and participate in matching alongside the static ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseServer {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub dynamic_labels: BTreeMap<String, String>,
}

impl DatabaseServer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            labels: BTreeMap::new(),
            dynamic_labels: BTreeMap::new(),
        }
    }

    pub fn with_labels(mut self, labels: &[(&str, &str)]) -> Self {
        self.labels = to_label_map(labels);
        self
    }

    pub fn with_dynamic_labels(mut self, labels: &[(&str, &str)]) -> Self {
        self.dynamic_labels = to_label_map(labels);
        self
    }

    /// Static and dynamic labels merged; static wins on key collisions.
    pub fn combined_labels(&self) -> BTreeMap<String, String> {
        merge_labels(&self.labels, &self.dynamic_labels)
    }
}

/// A Kubernetes cluster reachable through the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubeCluster {
    pub name: String,
    #[serde(default)]
    pub static_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub dynamic_labels: BTreeMap<String, String>,
}

impl KubeCluster {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            static_labels: BTreeMap::new(),
            dynamic_labels: BTreeMap::new(),
        }
    }

    pub fn with_static_labels(mut self, labels: &[(&str, &str)]) -> Self {
        self.static_labels = to_label_map(labels);
        self
    }

    pub fn with_dynamic_labels(mut self, labels: &[(&str, &str)]) -> Self {
        self.dynamic_labels = to_label_map(labels);
        self
    }

    pub fn combined_labels(&self) -> BTreeMap<String, String> {
        merge_labels(&self.static_labels, &self.dynamic_labels)
    }
}

/// A leaf cluster federated behind this gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCluster {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl RemoteCluster {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_labels(mut self, labels: &[(&str, &str)]) -> Self {
        self.labels = to_label_map(labels);
        self
    }
}

fn to_label_map(labels: &[(&str, &str)]) -> BTreeMap<String, String> {
    labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn merge_labels(
    static_labels: &BTreeMap<String, String>,
    dynamic_labels: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut combined = dynamic_labels.clone();
    for (key, value) in static_labels {
        combined.insert(key.clone(), value.clone());
    }
    combined
}
