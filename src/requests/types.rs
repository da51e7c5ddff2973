//! Access request data model
//!
//! An access request is a pending elevation of privilege awaiting one or
//! more approvals. The request exclusively owns its proposals; a proposal
//! is immutable once appended.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Reviewer annotations attached to proposals and resolved requests:
/// annotation key to list of values.
pub type Annotations = BTreeMap<String, Vec<String>>;

/// Lifecycle state of an access request.
///
/// PENDING is initial; APPROVED and DENIED are terminal and admit no
/// further proposals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestState {
    Pending,
    Approved,
    Denied,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestState::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Pending => "PENDING",
            RequestState::Approved => "APPROVED",
            RequestState::Denied => "DENIED",
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A reviewer's vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProposalDecision {
    Approve,
    Deny,
}

impl fmt::Display for ProposalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProposalDecision::Approve => write!(f, "APPROVE"),
            ProposalDecision::Deny => write!(f, "DENY"),
        }
    }
}

/// One principal's recorded vote on an access request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub author: String,
    pub decision: ProposalDecision,

    /// The normalized role subset voted on. Defaults to the full originally
    /// requested set when the author supplied no override.
    pub roles: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: Annotations,

    pub created_at: SystemTime,
}

/// A pending or resolved elevation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub id: String,
    pub requester: String,

    /// The originally requested roles, normalized.
    pub roles: Vec<String>,

    pub state: RequestState,

    /// Matching approvals needed before the request auto-approves.
    /// Always at least 1.
    pub approval_threshold: u32,

    #[serde(default)]
    pub proposals: Vec<Proposal>,

    /// Populated only on APPROVED: the exact subset that won.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resolved_roles: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resolved_annotations: Annotations,

    /// Opaque hints for external notifiers; never interpreted as
    /// authorization.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_reviewers: Vec<String>,

    pub created_at: SystemTime,
}

impl AccessRequest {
    /// Approve-votes recorded for exactly this normalized subset.
    pub fn tally(&self, subset: &[String]) -> u32 {
        self.proposals
            .iter()
            .filter(|p| p.decision == ProposalDecision::Approve && p.roles == subset)
            .count() as u32
    }

    pub fn has_proposal_from(&self, author: &str) -> bool {
        self.proposals.iter().any(|p| p.author == author)
    }
}

/// Normalizes a role list for tallying: deduplicated and sorted, so two
/// proposals for the same subset compare equal regardless of spelling order.
pub fn normalize_roles(roles: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = roles.to_vec();
    normalized.sort();
    normalized.dedup();
    normalized
}

/// Generates a fresh request id.
pub fn new_request_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_normalize_roles() {
        assert_eq!(
            normalize_roles(&strings(&["bar", "foo", "bar"])),
            strings(&["bar", "foo"])
        );
        assert_eq!(
            normalize_roles(&strings(&["foo", "bar"])),
            normalize_roles(&strings(&["bar", "foo", "foo"]))
        );
    }

    #[test]
    fn test_state_terminality() {
        assert!(!RequestState::Pending.is_terminal());
        assert!(RequestState::Approved.is_terminal());
        assert!(RequestState::Denied.is_terminal());
    }

    #[test]
    fn test_tally_counts_exact_subsets_only() {
        let request = AccessRequest {
            id: "r1".into(),
            requester: "alice".into(),
            roles: strings(&["bar", "bin", "foo"]),
            state: RequestState::Pending,
            approval_threshold: 2,
            proposals: vec![
                Proposal {
                    author: "bob".into(),
                    decision: ProposalDecision::Approve,
                    roles: strings(&["bar", "foo"]),
                    reason: None,
                    annotations: Annotations::new(),
                    created_at: SystemTime::now(),
                },
                Proposal {
                    author: "carol".into(),
                    decision: ProposalDecision::Approve,
                    roles: strings(&["bar", "bin"]),
                    reason: None,
                    annotations: Annotations::new(),
                    created_at: SystemTime::now(),
                },
            ],
            resolved_roles: Vec::new(),
            resolved_annotations: Annotations::new(),
            suggested_reviewers: Vec::new(),
            created_at: SystemTime::now(),
        };
        assert_eq!(request.tally(&strings(&["bar", "foo"])), 1);
        assert_eq!(request.tally(&strings(&["bar", "bin"])), 1);
        assert_eq!(request.tally(&strings(&["bar", "bin", "foo"])), 0);
        assert!(request.has_proposal_from("bob"));
        assert!(!request.has_proposal_from("alice"));
    }

    #[test]
    fn test_request_ids_are_distinct() {
        assert_ne!(new_request_id(), new_request_id());
        assert_eq!(new_request_id().len(), 32);
    }

    #[test]
    fn test_request_serialization_round_trip() {
        let request = AccessRequest {
            id: "r1".into(),
            requester: "alice".into(),
            roles: strings(&["dbadmin"]),
            state: RequestState::Pending,
            approval_threshold: 1,
            proposals: Vec::new(),
            resolved_roles: Vec::new(),
            resolved_annotations: Annotations::new(),
            suggested_reviewers: strings(&["bob"]),
            created_at: SystemTime::now(),
        };
        let encoded = serde_json::to_string(&request).unwrap();
        assert!(encoded.contains("\"PENDING\""));
        let decoded: AccessRequest = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, request);
    }
}
