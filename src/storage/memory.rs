//! In-memory request store
//!
//! Revisioned map with the same conditional-write contract a production
//! backend provides. Used by tests and by embedders that don't need
//! durability.

use crate::error::StorageError;
use crate::requests::types::AccessRequest;
use crate::storage::backend::{RequestBackend, Revision};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// An in-memory [`RequestBackend`].
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<String, (AccessRequest, Revision)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (AccessRequest, Revision)>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RequestBackend for MemoryBackend {
    async fn create(&self, request: AccessRequest) -> Result<Revision, StorageError> {
        let mut records = self.lock();
        if records.contains_key(&request.id) {
            return Err(StorageError::AlreadyExists {
                id: request.id.clone(),
            });
        }
        let revision = 1;
        records.insert(request.id.clone(), (request, revision));
        Ok(revision)
    }

    async fn get(&self, id: &str) -> Result<(AccessRequest, Revision), StorageError> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound { id: id.to_string() })
    }

    async fn compare_and_swap(
        &self,
        id: &str,
        expected: Revision,
        request: AccessRequest,
    ) -> Result<Revision, StorageError> {
        let mut records = self.lock();
        let Some((stored, revision)) = records.get_mut(id) else {
            return Err(StorageError::NotFound { id: id.to_string() });
        };
        if *revision != expected {
            return Err(StorageError::Conflict {
                id: id.to_string(),
                expected,
                actual: *revision,
            });
        }
        *stored = request;
        *revision += 1;
        Ok(*revision)
    }
}
