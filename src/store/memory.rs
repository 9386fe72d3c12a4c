use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use super::{DocumentStore, StoreError, StoredDocument};

/// One committed revision of the document
#[derive(Debug, Clone)]
pub struct Revision {
    pub content: String,
    pub sha: String,
    pub message: String,
}

/// In-process document store for local runs and tests.
///
/// Version tags are content hashes, and writes follow the same
/// check-and-set rules as the GitHub contents API.
pub struct MemoryStore {
    path: String,
    revisions: Mutex<Vec<Revision>>,
}

impl MemoryStore {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            revisions: Mutex::new(Vec::new()),
        }
    }

    /// Start with an existing document
    pub fn with_content(path: impl Into<String>, content: impl Into<String>) -> Self {
        let store = Self::new(path);
        store.commit(content.into(), "seed".to_string());
        store
    }

    /// All committed revisions, oldest first
    pub fn history(&self) -> Vec<Revision> {
        self.lock().clone()
    }

    pub fn current(&self) -> Option<Revision> {
        self.lock().last().cloned()
    }

    fn commit(&self, content: String, message: String) -> String {
        let sha = content_sha(&content);
        self.lock().push(Revision {
            content,
            sha: sha.clone(),
            message,
        });
        sha
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Revision>> {
        // A panic while holding the lock cannot leave a half-written revision
        self.revisions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DocumentStore for MemoryStore {
    fn path(&self) -> &str {
        &self.path
    }

    async fn fetch(&self) -> Result<Option<StoredDocument>, StoreError> {
        Ok(self.lock().last().map(|rev| StoredDocument {
            content: rev.content.clone(),
            sha: rev.sha.clone(),
        }))
    }

    async fn write(
        &self,
        content: &str,
        sha: Option<&str>,
        message: &str,
    ) -> Result<(), StoreError> {
        let mut revisions = self.lock();
        let current = revisions.last().map(|rev| rev.sha.as_str());

        if current != sha {
            debug!(path = %self.path, expected = ?sha, current = ?current, "Rejecting stale write");
            return Err(StoreError::Conflict {
                path: self.path.clone(),
            });
        }

        revisions.push(Revision {
            content: content.to_string(),
            sha: content_sha(content),
            message: message.to_string(),
        });

        Ok(())
    }
}

fn content_sha(content: &str) -> String {
    format!("{:x}", md5::compute(content.as_bytes()))
}
