//! Conditional-write storage for access requests

pub mod backend;
pub mod memory;

pub use backend::{RequestBackend, Revision, SharedBackend};
pub use memory::MemoryBackend;
