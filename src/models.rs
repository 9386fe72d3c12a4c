use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest photo key accepted by the vote endpoint
pub const MAX_KEY_LEN: usize = 128;

/// Persisted mapping from photo key to vote count
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tally(BTreeMap<String, u64>);

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the JSON text of a tally document
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Render as two-space indented JSON, the format kept in the repository
    pub fn to_pretty_json(&self) -> String {
        // A map of string keys to integers always serializes
        serde_json::to_string_pretty(&self.0).unwrap_or_else(|_| "{}".to_string())
    }

    /// Add one vote for `key`, returning the new count. Returns `None` and
    /// leaves the tally untouched when the count is already at its maximum.
    pub fn increment(&mut self, key: &str) -> Option<u64> {
        let next = self.get(key).unwrap_or(0).checked_add(1)?;
        self.0.insert(key.to_string(), next);
        Some(next)
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.0.get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Standings ordered by descending vote count, ties broken by key
    pub fn ranked(&self) -> Vec<Standing> {
        let mut entries: Vec<(&str, u64)> = self.iter().collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        entries
            .into_iter()
            .enumerate()
            .map(|(i, (key, votes))| Standing {
                rank: i + 1,
                key: key.to_string(),
                votes,
            })
            .collect()
    }
}

/// Body of `POST /vote`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoteRequest {
    #[serde(default)]
    pub photo: Option<String>,
}

impl VoteRequest {
    pub fn new(photo: impl Into<String>) -> Self {
        Self {
            photo: Some(photo.into()),
        }
    }

    /// The trimmed photo key, or `None` when missing or unusable
    pub fn validated_key(&self) -> Option<&str> {
        let key = self.photo.as_deref()?.trim();

        if key.is_empty() || key.len() > MAX_KEY_LEN || key.chars().any(char::is_control) {
            return None;
        }

        Some(key)
    }
}

/// Successful vote response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub id: Uuid,
    pub photo: String,
    /// Count for the photo after this vote
    pub votes: u64,
    /// Number of fetch/write cycles it took
    pub attempts: u32,
    /// Whether the tally document was created by this vote
    pub created_document: bool,
    pub recorded_at: DateTime<Utc>,
}

/// One leaderboard row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    pub rank: usize,
    pub key: String,
    pub votes: u64,
}
