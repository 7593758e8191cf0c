//! Content classification service.
//!
//! The classifier is opaque to the workers: it receives enriched profiles
//! and returns the ones it flagged plus the IDs it could not validate.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::config::ClassifierConfig;
use crate::models::{Classification, Profile};

/// Errors from the classification service.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Classifier returned status {0}")]
    Status(u16),
    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, profiles: &[Profile]) -> Result<Classification, ClassifierError>;
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    profiles: &'a [Profile],
}

/// Classifier reached over HTTP (`POST {endpoint}/classify`).
pub struct HttpClassifier {
    config: ClassifierConfig,
    client: Client,
}

impl HttpClassifier {
    pub fn new(config: ClassifierConfig) -> Result<Self, ClassifierError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, profiles: &[Profile]) -> Result<Classification, ClassifierError> {
        if profiles.is_empty() {
            return Ok(Classification::default());
        }

        let url = format!("{}/classify", self.config.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&ClassifyRequest { profiles })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClassifierError::Status(response.status().as_u16()));
        }

        let classification: Classification = response.json().await?;
        tracing::debug!(
            "Classified {} profiles: {} flagged, {} failed validation",
            profiles.len(),
            classification.flagged.len(),
            classification.failed.len()
        );
        Ok(classification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_batch_skips_request() {
        let classifier = HttpClassifier::new(ClassifierConfig::default()).unwrap();
        let result = classifier.classify(&[]).await.unwrap();
        assert_eq!(result, Classification::default());
    }
}
