//! External social platform API.

mod http;

use async_trait::async_trait;

use crate::models::{MemberPage, Profile};

pub use http::HttpPlatformClient;

/// Errors from platform API calls.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("Rate limited by platform")]
    RateLimited,
    #[error("{0}")]
    Other(String),
}

/// Read access to the platform's social graph.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn fetch_friend_ids(&self, user_id: u64) -> Result<Vec<u64>, PlatformError>;

    async fn fetch_friend_count(&self, user_id: u64) -> Result<u64, PlatformError>;

    /// One page of a group roster. `cursor` is `None` for the first page.
    async fn fetch_group_member_page(
        &self,
        group_id: u64,
        cursor: Option<&str>,
    ) -> Result<MemberPage, PlatformError>;

    /// Full profiles. Deleted accounts are simply missing from the result.
    async fn fetch_profiles(&self, ids: &[u64]) -> Result<Vec<Profile>, PlatformError>;

    /// The subset of `ids` the platform has banned.
    async fn fetch_banned_status(&self, ids: &[u64]) -> Result<Vec<u64>, PlatformError>;
}
