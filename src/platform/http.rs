//! JSON-over-HTTP platform client.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{PlatformApi, PlatformError};
use crate::config::PlatformConfig;
use crate::models::{MemberPage, Profile};

#[derive(Debug, Deserialize)]
struct IdList {
    ids: Vec<u64>,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct ProfileList {
    profiles: Vec<Profile>,
}

#[derive(Debug, Serialize)]
struct IdsRequest<'a> {
    ids: &'a [u64],
}

/// Platform API client.
pub struct HttpPlatformClient {
    client: Client,
    base_url: String,
    profile_chunk_size: usize,
}

impl HttpPlatformClient {
    pub fn new(config: &PlatformConfig) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("graphwarden/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            profile_chunk_size: config.profile_chunk_size.max(1),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, PlatformError> {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(PlatformError::RateLimited);
        }
        if !status.is_success() {
            return Err(PlatformError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }
        Ok(response.json::<T>().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, PlatformError> {
        let response = self.client.get(self.url(path)).send().await?;
        Self::decode(response).await
    }

    async fn post_ids<T: DeserializeOwned>(
        &self,
        path: &str,
        ids: &[u64],
    ) -> Result<T, PlatformError> {
        let response = self
            .client
            .post(self.url(path))
            .json(&IdsRequest { ids })
            .send()
            .await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl PlatformApi for HttpPlatformClient {
    async fn fetch_friend_ids(&self, user_id: u64) -> Result<Vec<u64>, PlatformError> {
        let list: IdList = self.get(&format!("/users/{}/friends", user_id)).await?;
        Ok(list.ids)
    }

    async fn fetch_friend_count(&self, user_id: u64) -> Result<u64, PlatformError> {
        let count: CountResponse = self
            .get(&format!("/users/{}/friends/count", user_id))
            .await?;
        Ok(count.count)
    }

    async fn fetch_group_member_page(
        &self,
        group_id: u64,
        cursor: Option<&str>,
    ) -> Result<MemberPage, PlatformError> {
        let mut request = self
            .client
            .get(self.url(&format!("/groups/{}/members", group_id)));
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        Self::decode(request.send().await?).await
    }

    async fn fetch_profiles(&self, ids: &[u64]) -> Result<Vec<Profile>, PlatformError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            "Fetching {} profiles in chunks of {}",
            ids.len(),
            self.profile_chunk_size
        );
        let chunks = ids.chunks(self.profile_chunk_size).map(|chunk| async move {
            let list: ProfileList = self.post_ids("/users/profiles", chunk).await?;
            Ok::<_, PlatformError>(list.profiles)
        });
        let profiles = try_join_all(chunks).await?;
        Ok(profiles.into_iter().flatten().collect())
    }

    async fn fetch_banned_status(&self, ids: &[u64]) -> Result<Vec<u64>, PlatformError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let list: IdList = self.post_ids("/users/banned", ids).await?;
        Ok(list.ids)
    }
}
