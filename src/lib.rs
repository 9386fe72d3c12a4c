pub mod ballot;
pub mod config;
pub mod github;
pub mod models;
pub mod recorder;
pub mod relay;
pub mod server;
pub mod store;

pub use ballot::{render_leaderboard, Ballot, Pair, Photo, RankedPhoto, Side};
pub use config::Config;
pub use github::{GitHubClient, GitHubContentsStore};
pub use models::*;
pub use recorder::{RecordError, Recorded, VoteRecorder};
pub use relay::VoteRelay;
pub use server::{router, serve, ApiError};
pub use store::{DocumentStore, MemoryStore, StoreError, StoredDocument};
