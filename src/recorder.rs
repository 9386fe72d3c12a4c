use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::models::Tally;
use crate::store::{DocumentStore, StoreError};

/// Default number of fetch/write cycles per vote
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// A vote that was durably written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub key: String,
    /// Count for the key after the vote
    pub votes: u64,
    /// Cycle that succeeded, starting at 1
    pub attempts: u32,
    pub created_document: bool,
}

/// Why a vote could not be recorded
#[derive(Debug, Error)]
pub enum RecordError {
    /// The store failed in a way that retrying cannot fix
    #[error("store failure on attempt {attempt}: {source}")]
    Fatal {
        attempt: u32,
        #[source]
        source: StoreError,
    },

    /// The stored tally document could not be parsed
    #[error("tally document is malformed: {source}")]
    Malformed {
        attempt: u32,
        #[source]
        source: serde_json::Error,
    },

    /// The key's count cannot grow any further
    #[error("vote count for {key} is at its maximum")]
    CountOverflow { attempt: u32, key: String },

    /// Every attempt lost the race to another writer
    #[error("gave up after {attempts} conflicting writes")]
    Exhausted { attempts: u32 },
}

impl RecordError {
    pub fn is_missing_credential(&self) -> bool {
        matches!(
            self,
            RecordError::Fatal {
                source: StoreError::MissingCredential,
                ..
            }
        )
    }
}

enum AttemptOutcome {
    Committed(Recorded),
    Conflict,
}

/// Increments vote counts in a versioned tally document with
/// check-and-set writes and a bounded number of retries
pub struct VoteRecorder<S> {
    store: S,
    max_attempts: u32,
}

impl<S: DocumentStore> VoteRecorder<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Current tally, empty when the document does not exist yet
    pub async fn snapshot(&self) -> Result<Tally, RecordError> {
        match self.store.fetch().await {
            Ok(Some(doc)) => Tally::parse(&doc.content)
                .map_err(|source| RecordError::Malformed { attempt: 1, source }),
            Ok(None) => Ok(Tally::new()),
            Err(source) => Err(RecordError::Fatal { attempt: 1, source }),
        }
    }

    /// Add exactly one vote for `key`
    #[instrument(skip(self), fields(path = %self.store.path(), max_attempts = self.max_attempts))]
    pub async fn record(&self, key: &str) -> Result<Recorded, RecordError> {
        for attempt in 1..=self.max_attempts {
            match self.attempt(key, attempt).await? {
                AttemptOutcome::Committed(recorded) => {
                    info!(
                        votes = recorded.votes,
                        attempt,
                        created = recorded.created_document,
                        "Vote recorded"
                    );
                    return Ok(recorded);
                }
                AttemptOutcome::Conflict => {
                    warn!(attempt, "Tally changed while voting, retrying with fresh data");
                }
            }
        }

        error!(attempts = self.max_attempts, "Retry bound exhausted");
        Err(RecordError::Exhausted {
            attempts: self.max_attempts,
        })
    }

    async fn attempt(&self, key: &str, attempt: u32) -> Result<AttemptOutcome, RecordError> {
        let current = self.store.fetch().await.map_err(|source| {
            error!(attempt, status = ?source.status(), error = %source, "Failed to fetch tally");
            RecordError::Fatal { attempt, source }
        })?;

        let (mut tally, sha) = match current {
            Some(doc) => {
                let tally = Tally::parse(&doc.content).map_err(|source| {
                    error!(attempt, error = %source, "Stored tally is not valid JSON");
                    RecordError::Malformed { attempt, source }
                })?;
                (tally, Some(doc.sha))
            }
            None => {
                debug!(attempt, "No tally yet, creating it");
                (Tally::new(), None)
            }
        };

        let new_key = !tally.contains(key);
        let Some(votes) = tally.increment(key) else {
            error!(attempt, key, "Vote count at maximum, refusing to write");
            return Err(RecordError::CountOverflow {
                attempt,
                key: key.to_string(),
            });
        };
        let message = commit_message(self.store.path(), key, sha.is_some(), new_key, attempt);

        match self
            .store
            .write(&tally.to_pretty_json(), sha.as_deref(), &message)
            .await
        {
            Ok(()) => Ok(AttemptOutcome::Committed(Recorded {
                key: key.to_string(),
                votes,
                attempts: attempt,
                created_document: sha.is_none(),
            })),
            Err(err) if err.is_conflict() => Ok(AttemptOutcome::Conflict),
            Err(source) => {
                error!(
                    attempt,
                    status = ?source.status(),
                    error = %source,
                    "Failed to write tally"
                );
                Err(RecordError::Fatal { attempt, source })
            }
        }
    }
}

/// Commit message for one write of the tally document
pub fn commit_message(path: &str, key: &str, exists: bool, new_key: bool, attempt: u32) -> String {
    if !exists {
        format!(
            "Initial commit: creating {} with vote for {} (attempt {})",
            path, key, attempt
        )
    } else if new_key {
        format!("Updated vote for {}: new entry (attempt {})", key, attempt)
    } else {
        format!("Updated vote for {} (attempt {})", key, attempt)
    }
}
