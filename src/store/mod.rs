pub mod memory;

pub use memory::MemoryStore;

use std::future::Future;

use thiserror::Error;

/// Current content of the tally document and its version tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub content: String,
    pub sha: String,
}

/// Failures reported by a document store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store credential is not configured")]
    MissingCredential,

    /// The presented version tag no longer matches the stored document
    #[error("version conflict writing {path}")]
    Conflict { path: String },

    #[error("store returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("store request failed: {0}")]
    Transport(#[source] Box<octocrab::Error>),

    #[error("unreadable document content: {0}")]
    Content(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// HTTP status reported by the store, when there was one
    pub fn status(&self) -> Option<u16> {
        match self {
            StoreError::Conflict { .. } => Some(409),
            StoreError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// A versioned single-document store with check-and-set writes
pub trait DocumentStore: Send + Sync {
    /// Location of the document, used in commit messages and logs
    fn path(&self) -> &str;

    /// Fetch the document, `None` when it does not exist yet
    fn fetch(&self) -> impl Future<Output = Result<Option<StoredDocument>, StoreError>> + Send;

    /// Write the document. With `sha` the write only succeeds if it matches
    /// the current version; without it the document must not exist yet.
    fn write(
        &self,
        content: &str,
        sha: Option<&str>,
        message: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
