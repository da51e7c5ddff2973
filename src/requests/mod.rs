//! Multi-party access request approval

pub mod service;
pub mod types;

pub use service::{DenyAuthority, ProposalInput, RequestPolicy, RequestService};
pub use types::{
    AccessRequest, Annotations, Proposal, ProposalDecision, RequestState, normalize_roles,
};
