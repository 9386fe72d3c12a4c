pub mod client;
pub mod contents;

pub use client::{parse_repo, GitHubClient, RepoAccess};
pub use contents::GitHubContentsStore;
