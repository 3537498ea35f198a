//! Shutterstock API client (Service B)
//!
//! Keyword suggestion is a two-step protocol: `POST /v2/cv/images` uploads the
//! image (base64 JSON body) and returns an upload id, `GET /v2/cv/keywords`
//! fetches suggestions for that id. The client also serves the image-search
//! and category endpoints used by the search entity. Auth is a basic
//! credential from settings.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::error::{Error, Result};
use crate::types::ShutterstockApi;

const SHUTTERSTOCK_BASE_URL: &str = "https://api.shutterstock.com/v2";
const USER_AGENT: &str = concat!("picmeta/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_PER_PAGE: u32 = 10;

/// Shutterstock client errors
#[derive(Debug, Error)]
pub enum ShutterstockError {
    #[error("network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("parse error: {0}")]
    Parse(String),

    /// The upload endpoint returned no id for the submitted image
    #[error("upload failed: service returned no upload id")]
    UploadFailed,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    upload_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KeywordsResponse {
    data: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    data: Vec<SearchAsset>,
    total_count: u64,
}

#[derive(Debug, Deserialize)]
struct SearchAsset {
    id: String,
    description: Option<String>,
    assets: Option<AssetSet>,
}

#[derive(Debug, Deserialize)]
struct AssetSet {
    preview: Option<AssetRef>,
}

#[derive(Debug, Deserialize)]
struct AssetRef {
    url: String,
}

#[derive(Debug, Deserialize)]
struct CategoriesResponse {
    data: Vec<Category>,
}

/// Image category as reported by the categories endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: Option<String>,
    pub name: String,
}

/// One search hit, reduced to the fields the tool displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSummary {
    pub id: String,
    pub description: Option<String>,
    pub preview_url: Option<String>,
}

/// Search query; blank fields are omitted from the request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: Option<String>,
    pub category: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPage {
    pub items: Vec<ImageSummary>,
    pub total_count: u64,
}

/// Shutterstock API client
pub struct ShutterstockClient {
    http: reqwest::Client,
    base_url: String,
}

impl ShutterstockClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(SHUTTERSTOCK_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Shutterstock(ShutterstockError::Network(e.to_string())))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// Upload a base64-encoded image, returning its upload id.
    pub async fn upload_image(
        &self,
        credentials: &str,
        base64_image: String,
    ) -> std::result::Result<String, ShutterstockError> {
        let body = serde_json::json!({ "base64_image": base64_image });
        let response = self
            .http
            .post(format!("{}/cv/images", self.base_url))
            .header(reqwest::header::AUTHORIZATION, basic_auth(credentials))
            .json(&body)
            .send()
            .await
            .map_err(|e| ShutterstockError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ShutterstockError::Api(status.as_u16(), body));
        }

        let parsed: UploadResponse = response
            .json()
            .await
            .map_err(|e| ShutterstockError::Parse(e.to_string()))?;
        require_upload_id(parsed)
    }

    /// Fetch keyword suggestions for a previously uploaded image.
    pub async fn fetch_keywords(
        &self,
        credentials: &str,
        upload_id: &str,
    ) -> std::result::Result<Vec<String>, ShutterstockError> {
        let response = self
            .http
            .get(format!("{}/cv/keywords", self.base_url))
            .query(&[("asset_id", upload_id)])
            .header(reqwest::header::AUTHORIZATION, basic_auth(credentials))
            .send()
            .await
            .map_err(|e| ShutterstockError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ShutterstockError::Api(status.as_u16(), body));
        }

        let parsed: KeywordsResponse = response
            .json()
            .await
            .map_err(|e| ShutterstockError::Parse(e.to_string()))?;
        tracing::info!(count = parsed.data.len(), "Shutterstock keyword suggestions received");
        Ok(parsed.data)
    }

    /// Full-view image search, ten results per page unless overridden.
    pub async fn search_images(
        &self,
        credentials: &str,
        request: &SearchRequest,
    ) -> std::result::Result<SearchPage, ShutterstockError> {
        let mut params: Vec<(&str, String)> = vec![
            ("view", "full".to_string()),
            (
                "per_page",
                request.per_page.unwrap_or(DEFAULT_PER_PAGE).to_string(),
            ),
        ];
        if let Some(query) = request.query.as_deref().filter(|q| !q.is_empty()) {
            params.push(("query", query.to_string()));
        }
        if let Some(category) = request.category.as_deref().filter(|c| !c.is_empty()) {
            params.push(("category", category.to_string()));
        }
        if let Some(page) = request.page {
            params.push(("page", page.to_string()));
        }

        let response = self
            .http
            .get(format!("{}/images/search", self.base_url))
            .query(&params)
            .header(reqwest::header::AUTHORIZATION, basic_auth(credentials))
            .header(reqwest::header::ACCEPT_LANGUAGE, "en")
            .send()
            .await
            .map_err(|e| ShutterstockError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ShutterstockError::Api(status.as_u16(), body));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| ShutterstockError::Parse(e.to_string()))?;

        Ok(SearchPage {
            items: parsed
                .data
                .into_iter()
                .map(|asset| ImageSummary {
                    id: asset.id,
                    description: asset.description,
                    preview_url: asset.assets.and_then(|a| a.preview).map(|p| p.url),
                })
                .collect(),
            total_count: parsed.total_count,
        })
    }

    /// List the service's image categories.
    pub async fn fetch_categories(
        &self,
        credentials: &str,
    ) -> std::result::Result<Vec<Category>, ShutterstockError> {
        let response = self
            .http
            .get(format!("{}/images/categories", self.base_url))
            .header(reqwest::header::AUTHORIZATION, basic_auth(credentials))
            .header(reqwest::header::ACCEPT_LANGUAGE, "en")
            .send()
            .await
            .map_err(|e| ShutterstockError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ShutterstockError::Api(status.as_u16(), body));
        }

        let parsed: CategoriesResponse = response
            .json()
            .await
            .map_err(|e| ShutterstockError::Parse(e.to_string()))?;
        Ok(parsed.data)
    }
}

#[async_trait::async_trait]
impl ShutterstockApi for ShutterstockClient {
    async fn upload(&self, credentials: &str, base64_image: String) -> Result<String> {
        Ok(self.upload_image(credentials, base64_image).await?)
    }

    async fn keywords(&self, credentials: &str, upload_id: &str) -> Result<Vec<String>> {
        Ok(self.fetch_keywords(credentials, upload_id).await?)
    }

    async fn search(&self, credentials: &str, request: &SearchRequest) -> Result<SearchPage> {
        Ok(self.search_images(credentials, request).await?)
    }

    async fn categories(&self, credentials: &str) -> Result<Vec<Category>> {
        Ok(self.fetch_categories(credentials).await?)
    }
}

fn basic_auth(credentials: &str) -> String {
    format!("Basic {}", general_purpose::STANDARD.encode(credentials))
}

/// A missing or blank upload id means the service could not use the image.
fn require_upload_id(
    parsed: UploadResponse,
) -> std::result::Result<String, ShutterstockError> {
    match parsed.upload_id {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(ShutterstockError::UploadFailed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_without_id_is_upload_failed() {
        let parsed: UploadResponse = serde_json::from_str("{}").unwrap();
        assert!(matches!(
            require_upload_id(parsed),
            Err(ShutterstockError::UploadFailed)
        ));
    }

    #[test]
    fn test_upload_with_blank_id_is_upload_failed() {
        let parsed: UploadResponse = serde_json::from_str(r#"{"upload_id": ""}"#).unwrap();
        assert!(matches!(
            require_upload_id(parsed),
            Err(ShutterstockError::UploadFailed)
        ));
    }

    #[test]
    fn test_upload_with_id_passes_it_through() {
        let parsed: UploadResponse =
            serde_json::from_str(r#"{"upload_id": "u-123"}"#).unwrap();
        assert_eq!(require_upload_id(parsed).unwrap(), "u-123");
    }

    #[test]
    fn test_search_response_parsing() {
        let json = r#"{
            "data": [
                {"id": "123", "description": "A beach",
                 "assets": {"preview": {"url": "https://example.com/p.jpg"}}},
                {"id": "456", "description": null, "assets": null}
            ],
            "total_count": 42
        }"#;
        let parsed: SearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.total_count, 42);
        assert_eq!(parsed.data.len(), 2);
        assert_eq!(parsed.data[0].id, "123");
        assert!(parsed.data[1].assets.is_none());
    }

    #[test]
    fn test_keywords_response_parsing() {
        let json = r#"{"data": ["sunset", "beach", "waves"]}"#;
        let parsed: KeywordsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.data, vec!["sunset", "beach", "waves"]);
    }

    #[test]
    fn test_client_creation() {
        assert!(ShutterstockClient::new().is_ok());
    }
}
