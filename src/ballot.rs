use rand::seq::index::sample;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::WidgetConfig;
use crate::models::Tally;

/// A photo in the voting roster with its locally known count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    pub id: u32,
    pub file: String,
    pub name: String,
    pub votes: u64,
}

/// Which of the two photos in a round was picked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// The two photos shown in the current round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pair {
    pub round: u32,
    pub left: usize,
    pub right: usize,
}

/// Photo ranked by its local count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedPhoto {
    pub rank: usize,
    pub photo: Photo,
}

/// In-memory mirror of the tally that drives the voting rounds.
///
/// Counts here are optimistic; the stored tally stays the source of truth.
#[derive(Debug, Clone)]
pub struct Ballot {
    key_prefix: String,
    photos: Vec<Photo>,
    round: u32,
    current: Option<Pair>,
}

impl Ballot {
    pub fn new(key_prefix: impl Into<String>, photos: Vec<Photo>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            photos,
            round: 0,
            current: None,
        }
    }

    pub fn from_config(config: &WidgetConfig) -> Self {
        let photos = config
            .photos
            .iter()
            .map(|p| Photo {
                id: p.id,
                file: p.file.clone(),
                name: p.name.clone().unwrap_or_else(|| format!("Photo {}", p.id)),
                votes: 0,
            })
            .collect();

        Self::new(config.key_prefix.clone(), photos)
    }

    pub fn photos(&self) -> &[Photo] {
        &self.photos
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn current(&self) -> Option<Pair> {
        self.current
    }

    /// Tally key for a photo
    pub fn key_for(&self, photo: &Photo) -> String {
        format!("{}-{}", self.key_prefix, photo.id)
    }

    /// Take counts from a tally snapshot; photos missing from it keep
    /// their current count
    pub fn seed(&mut self, tally: &Tally) {
        for i in 0..self.photos.len() {
            let key = self.key_for(&self.photos[i]);
            if let Some(votes) = tally.get(&key) {
                self.photos[i].votes = votes;
            }
        }
        debug!(photos = self.photos.len(), keys = tally.len(), "Seeded ballot from snapshot");
    }

    /// Start a new round with two distinct random photos
    pub fn next_round<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Pair> {
        if self.photos.len() < 2 {
            return None;
        }

        let picked = sample(rng, self.photos.len(), 2);
        self.round += 1;

        let pair = Pair {
            round: self.round,
            left: picked.index(0),
            right: picked.index(1),
        };
        self.current = Some(pair);

        Some(pair)
    }

    pub fn photo(&self, index: usize) -> Option<&Photo> {
        self.photos.get(index)
    }

    /// Count a pick in the current round and return the key to relay.
    /// Returns `None` when no round is in progress.
    pub fn choose(&mut self, side: Side) -> Option<String> {
        let pair = self.current.take()?;
        let index = match side {
            Side::Left => pair.left,
            Side::Right => pair.right,
        };

        let photo = self.photos.get_mut(index)?;
        photo.votes += 1;
        let key = format!("{}-{}", self.key_prefix, photo.id);

        debug!(key = %key, votes = photo.votes, "Counted local vote");
        Some(key)
    }

    /// Photos ordered by descending local count
    pub fn leaderboard(&self) -> Vec<RankedPhoto> {
        let mut photos = self.photos.clone();
        photos.sort_by(|a, b| b.votes.cmp(&a.votes).then_with(|| a.id.cmp(&b.id)));

        photos
            .into_iter()
            .enumerate()
            .map(|(i, photo)| RankedPhoto { rank: i + 1, photo })
            .collect()
    }
}

/// Render a leaderboard as plain text, one line per photo
pub fn render_leaderboard(ranked: &[RankedPhoto]) -> String {
    if ranked.is_empty() {
        return "No photos to rank.\n".to_string();
    }

    let mut out = String::new();
    for entry in ranked {
        out.push_str(&format!(
            "Rank {}: {} - {} votes ({})\n",
            entry.rank, entry.photo.name, entry.photo.votes, entry.photo.file
        ));
    }
    out
}
