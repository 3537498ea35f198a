//! Imagga tagging API client (Service A)
//!
//! `POST /v2/tags` with a multipart image body returns suggested tags;
//! `GET /v2/usage` reports the monthly quota, from which the remaining
//! allowance is computed. Auth is a basic credential from settings.

use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::error::{Error, Result};
use crate::types::ImaggaApi;

const IMAGGA_BASE_URL: &str = "https://api.imagga.com/v2";
const USER_AGENT: &str = concat!("picmeta/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Imagga client errors
#[derive(Debug, Error)]
pub enum ImaggaError {
    #[error("network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    result: TagsResult,
}

#[derive(Debug, Deserialize)]
struct TagsResult {
    tags: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    tag: TagTranslations,
}

#[derive(Debug, Deserialize)]
struct TagTranslations {
    en: String,
}

#[derive(Debug, Deserialize)]
struct UsageResponse {
    result: UsageResult,
}

#[derive(Debug, Deserialize)]
struct UsageResult {
    monthly_limit: u64,
    monthly_processed: u64,
}

/// Imagga API client
pub struct ImaggaClient {
    http: reqwest::Client,
    base_url: String,
}

impl ImaggaClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(IMAGGA_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Imagga(ImaggaError::Network(e.to_string())))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// Submit an image and return the suggested English tags.
    pub async fn fetch_tags(
        &self,
        credentials: &str,
        image: Vec<u8>,
    ) -> std::result::Result<Vec<String>, ImaggaError> {
        let form = reqwest::multipart::Form::new()
            .part("image", reqwest::multipart::Part::bytes(image).file_name("image"));

        let response = self
            .http
            .post(format!("{}/tags", self.base_url))
            .header(reqwest::header::AUTHORIZATION, basic_auth(credentials))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ImaggaError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ImaggaError::Api(status.as_u16(), body));
        }

        let parsed: TagsResponse = response
            .json()
            .await
            .map_err(|e| ImaggaError::Parse(e.to_string()))?;

        let tags: Vec<String> = parsed.result.tags.into_iter().map(|t| t.tag.en).collect();
        tracing::info!(count = tags.len(), "Imagga tag suggestions received");
        Ok(tags)
    }

    /// Remaining monthly quota (`monthly_limit - monthly_processed`).
    pub async fn fetch_remaining_quota(
        &self,
        credentials: &str,
    ) -> std::result::Result<u64, ImaggaError> {
        let response = self
            .http
            .get(format!("{}/usage", self.base_url))
            .header(reqwest::header::AUTHORIZATION, basic_auth(credentials))
            .send()
            .await
            .map_err(|e| ImaggaError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ImaggaError::Api(status.as_u16(), body));
        }

        let parsed: UsageResponse = response
            .json()
            .await
            .map_err(|e| ImaggaError::Parse(e.to_string()))?;

        Ok(parsed
            .result
            .monthly_limit
            .saturating_sub(parsed.result.monthly_processed))
    }
}

#[async_trait::async_trait]
impl ImaggaApi for ImaggaClient {
    async fn tags(&self, credentials: &str, image: Vec<u8>) -> Result<Vec<String>> {
        Ok(self.fetch_tags(credentials, image).await?)
    }

    async fn remaining_quota(&self, credentials: &str) -> Result<u64> {
        Ok(self.fetch_remaining_quota(credentials).await?)
    }
}

fn basic_auth(credentials: &str) -> String {
    format!("Basic {}", general_purpose::STANDARD.encode(credentials))
}
