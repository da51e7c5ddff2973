//! Storage collaborator contract
//!
//! The access request record is the only shared mutable resource in the
//! engine. Concurrent writers are serialized exclusively by the backend's
//! conditional write: a compare-and-swap keyed on the record's revision.

use crate::error::StorageError;
use crate::requests::types::AccessRequest;
// async_trait required for dyn-compatibility with Arc<dyn RequestBackend>
use async_trait::async_trait;
use std::sync::Arc;

/// Monotonic per-record revision assigned by the backend.
pub type Revision = u64;

/// Conditional-write store for access requests.
///
/// Implementations must guarantee that two concurrent `compare_and_swap`
/// calls against the same stale revision cannot both succeed. No ordering
/// between competing writers is promised beyond that.
#[async_trait]
pub trait RequestBackend: Send + Sync {
    /// Stores a new record, failing if the id already exists.
    async fn create(&self, request: AccessRequest) -> Result<Revision, StorageError>;

    /// Reads a record and its current revision.
    async fn get(&self, id: &str) -> Result<(AccessRequest, Revision), StorageError>;

    /// Replaces a record only if its current revision matches `expected`,
    /// returning the new revision. A mismatch is a [`StorageError::Conflict`].
    async fn compare_and_swap(
        &self,
        id: &str,
        expected: Revision,
        request: AccessRequest,
    ) -> Result<Revision, StorageError>;
}

/// Shared handle type for backends.
pub type SharedBackend = Arc<dyn RequestBackend>;

#[async_trait]
impl<B: RequestBackend + ?Sized> RequestBackend for Arc<B> {
    async fn create(&self, request: AccessRequest) -> Result<Revision, StorageError> {
        (**self).create(request).await
    }

    async fn get(&self, id: &str) -> Result<(AccessRequest, Revision), StorageError> {
        (**self).get(id).await
    }

    async fn compare_and_swap(
        &self,
        id: &str,
        expected: Revision,
        request: AccessRequest,
    ) -> Result<Revision, StorageError> {
        (**self).compare_and_swap(id, expected, request).await
    }
}
