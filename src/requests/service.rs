//! Access request approval state machine
//!
//! Requests start PENDING and move to APPROVED or DENIED exactly once.
//! Votes are tallied per exact normalized role subset: an approval counts
//! only toward the subset it names, so a request never resolves to a role
//! set that wasn't backed by the configured number of identical approvals.
//! A single authorized denial terminates the request.
//!
//! Persistence is optimistic: every submission is a read-modify-write inside
//! a bounded compare-and-swap retry loop. Admission failures never mutate
//! the request.

use crate::error::{AccessDeniedError, RequestError, RequestResult, StorageError};
use crate::policy::RoleSet;
use crate::requests::types::{
    AccessRequest, Annotations, Proposal, ProposalDecision, RequestState, new_request_id,
    normalize_roles,
};
use crate::storage::backend::RequestBackend;
use serde::Deserialize;
use std::time::SystemTime;
use tracing::{debug, info};

/// Whose roles a denial must cover before it is admitted.
///
/// The approval side always checks authority against the exact subset being
/// proposed; whether the same applies to denials is a product decision, so
/// it is configuration here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyAuthority {
    /// The denier needs authority over the subset named in their proposal.
    #[default]
    ProposedSubset,
    /// The denier needs authority over the full originally requested set.
    FullRequest,
}

/// Tunables for the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPolicy {
    /// Conditional-write attempts before a submission is surfaced as
    /// retryable.
    pub max_cas_attempts: u32,

    pub deny_authority: DenyAuthority,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            max_cas_attempts: 7,
            deny_authority: DenyAuthority::default(),
        }
    }
}

/// A vote to submit against a pending request.
#[derive(Debug, Clone, Default)]
pub struct ProposalInput {
    pub decision: Option<ProposalDecision>,

    /// Role subset voted on; `None` means the full originally requested set.
    pub roles: Option<Vec<String>>,

    pub reason: Option<String>,

    pub annotations: Annotations,
}

impl ProposalInput {
    pub fn approve() -> Self {
        Self {
            decision: Some(ProposalDecision::Approve),
            ..Default::default()
        }
    }

    pub fn deny() -> Self {
        Self {
            decision: Some(ProposalDecision::Deny),
            ..Default::default()
        }
    }

    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.roles = Some(roles.iter().map(|r| r.to_string()).collect());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, values: &[&str]) -> Self {
        self.annotations
            .insert(key.into(), values.iter().map(|v| v.to_string()).collect());
        self
    }
}

/// The approval state machine over a conditional-write backend.
#[derive(Debug)]
pub struct RequestService<B> {
    backend: B,
    policy: RequestPolicy,
}

impl<B: RequestBackend> RequestService<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            policy: RequestPolicy::default(),
        }
    }

    pub fn with_policy(backend: B, policy: RequestPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Creates a PENDING elevation request.
    ///
    /// Every requested role must be grantable through the requester's static
    /// roles; the approval threshold is the smallest `min_approvals` across
    /// all contributing grants, floored at 1.
    pub async fn create_request(
        &self,
        requester: &str,
        requester_roles: &RoleSet,
        roles: &[String],
        suggested_reviewers: &[String],
    ) -> RequestResult<AccessRequest> {
        if roles.is_empty() {
            return Err(RequestError::bad_parameter(
                "an access request must name at least one role",
            ));
        }
        let roles = normalize_roles(roles);
        let mut threshold = u32::MAX;
        for role in &roles {
            if !requester_roles.can_request_role(role) {
                return Err(AccessDeniedError::new(
                    format!("access_request/{role}"),
                    format!("user {requester:?} cannot request role {role:?}"),
                )
                .into());
            }
            // can_request_role passed, so at least one grant contributes.
            if let Some(min) = requester_roles.min_approvals_for(role) {
                threshold = threshold.min(min);
            }
        }
        let threshold = if threshold == u32::MAX { 1 } else { threshold };
        let request = AccessRequest {
            id: new_request_id(),
            requester: requester.to_string(),
            roles,
            state: RequestState::Pending,
            approval_threshold: threshold,
            proposals: Vec::new(),
            resolved_roles: Vec::new(),
            resolved_annotations: Annotations::new(),
            suggested_reviewers: suggested_reviewers.to_vec(),
            created_at: SystemTime::now(),
        };
        self.backend.create(request.clone()).await?;
        info!(
            id = %request.id,
            requester,
            threshold = request.approval_threshold,
            "access request created"
        );
        Ok(request)
    }

    pub async fn get_request(&self, id: &str) -> RequestResult<AccessRequest> {
        match self.backend.get(id).await {
            Ok((request, _)) => Ok(request),
            Err(StorageError::NotFound { id }) => Err(RequestError::NotFound { id }),
            Err(err) => Err(err.into()),
        }
    }

    /// Submits one principal's vote.
    ///
    /// Admission re-runs against freshly read state on every conditional
    /// write conflict, so a replayed proposal observes whatever competing
    /// submissions landed in between.
    pub async fn submit_proposal(
        &self,
        id: &str,
        proposer: &str,
        proposer_roles: &RoleSet,
        input: &ProposalInput,
    ) -> RequestResult<AccessRequest> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let (mut request, revision) = match self.backend.get(id).await {
                Ok(found) => found,
                Err(StorageError::NotFound { id }) => {
                    return Err(RequestError::NotFound { id });
                }
                Err(err) => return Err(err.into()),
            };
            self.admit(&mut request, proposer, proposer_roles, input)?;
            match self
                .backend
                .compare_and_swap(id, revision, request.clone())
                .await
            {
                Ok(_) => {
                    if request.state.is_terminal() {
                        info!(id, state = %request.state, "access request resolved");
                    }
                    return Ok(request);
                }
                Err(StorageError::Conflict { .. }) if attempts < self.policy.max_cas_attempts => {
                    debug!(id, attempts, "conditional write conflict, retrying");
                }
                Err(StorageError::Conflict { .. }) => {
                    return Err(RequestError::Exhausted { attempts });
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Steps 1-5 of proposal admission, applied to an in-memory copy. Any
    /// error leaves the stored request untouched.
    fn admit(
        &self,
        request: &mut AccessRequest,
        proposer: &str,
        proposer_roles: &RoleSet,
        input: &ProposalInput,
    ) -> RequestResult<()> {
        if request.state.is_terminal() {
            return Err(RequestError::InvalidState {
                id: request.id.clone(),
                state: request.state.to_string(),
            });
        }
        if proposer == request.requester {
            return Err(RequestError::permission_denied(
                "requesters cannot vote on their own access request",
            ));
        }
        if request.has_proposal_from(proposer) {
            return Err(RequestError::permission_denied(format!(
                "user {proposer:?} has already voted on this request"
            )));
        }
        let decision = input
            .decision
            .ok_or_else(|| RequestError::bad_parameter("a proposal must carry a decision"))?;
        let subset = match &input.roles {
            Some(roles) => normalize_roles(roles),
            None => request.roles.clone(),
        };
        if subset.is_empty() {
            return Err(RequestError::bad_parameter(
                "a proposal must cover at least one role",
            ));
        }
        if let Some(extra) = subset.iter().find(|role| !request.roles.contains(role)) {
            return Err(RequestError::bad_parameter(format!(
                "role {extra:?} was not part of the original request"
            )));
        }

        let authority_scope: &[String] = match decision {
            ProposalDecision::Approve => &subset,
            ProposalDecision::Deny => match self.policy.deny_authority {
                DenyAuthority::ProposedSubset => &subset,
                DenyAuthority::FullRequest => &request.roles,
            },
        };
        for role in authority_scope {
            if !proposer_roles.can_approve_role(role) {
                return Err(RequestError::permission_denied(format!(
                    "user {proposer:?} is not authorized to vote on role {role:?}"
                )));
            }
        }

        let proposal = Proposal {
            author: proposer.to_string(),
            decision,
            roles: subset.clone(),
            reason: input.reason.clone(),
            annotations: input.annotations.clone(),
            created_at: SystemTime::now(),
        };
        request.proposals.push(proposal);

        match decision {
            ProposalDecision::Deny => {
                request.state = RequestState::Denied;
                request.resolved_annotations = Annotations::new();
                merge_annotations(&mut request.resolved_annotations, &input.annotations);
                debug!(id = %request.id, proposer, "request denied by proposal");
            }
            ProposalDecision::Approve => {
                let tally = request.tally(&subset);
                debug!(
                    id = %request.id,
                    proposer,
                    tally,
                    threshold = request.approval_threshold,
                    "approval recorded"
                );
                if tally >= request.approval_threshold {
                    request.state = RequestState::Approved;
                    request.resolved_roles = subset.clone();
                    let mut merged = Annotations::new();
                    for proposal in &request.proposals {
                        if proposal.decision == ProposalDecision::Approve
                            && proposal.roles == subset
                        {
                            merge_annotations(&mut merged, &proposal.annotations);
                        }
                    }
                    request.resolved_annotations = merged;
                }
            }
        }
        Ok(())
    }
}

/// Key-wise union with per-key value deduplication; merging the same
/// annotations twice yields the same result as merging once.
fn merge_annotations(into: &mut Annotations, from: &Annotations) {
    for (key, values) in from {
        let entry = into.entry(key.clone()).or_default();
        for value in values {
            if !entry.contains(value) {
                entry.push(value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotations(entries: &[(&str, &[&str])]) -> Annotations {
        entries
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_merge_annotations_unions_and_dedups() {
        let mut merged = Annotations::new();
        merge_annotations(&mut merged, &annotations(&[("env", &["prod"])]));
        merge_annotations(&mut merged, &annotations(&[("env", &["stage", "prod"]), ("ticket", &["T-1"])]));
        assert_eq!(merged, annotations(&[("env", &["prod", "stage"]), ("ticket", &["T-1"])]));
    }

    #[test]
    fn test_merge_annotations_idempotent() {
        let from = annotations(&[("env", &["prod", "stage"])]);
        let mut once = Annotations::new();
        merge_annotations(&mut once, &from);
        let mut twice = once.clone();
        merge_annotations(&mut twice, &from);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_default_policy() {
        let policy = RequestPolicy::default();
        assert_eq!(policy.max_cas_attempts, 7);
        assert_eq!(policy.deny_authority, DenyAuthority::ProposedSubset);
    }
}
