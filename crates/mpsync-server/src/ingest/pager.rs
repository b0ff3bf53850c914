//! Paginated access to the marketplace order search
//!
//! One call fetches one page. Every call is bounded by a timeout so a slow
//! marketplace turns into a page error instead of a hung worker.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::accounts::SourceAccount;
use super::config::SourceApiConfig;

/// Raw order as returned by the search endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord(pub serde_json::Value);

impl RawRecord {
    /// Marketplace id of the record, numeric or numeric string
    pub fn external_id(&self) -> Option<i64> {
        match self.0.get("id")? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// Page fetch failures
#[derive(Debug, Error)]
pub enum FetchError {
    /// Token rejected; the worker re-resolves credentials before giving up
    #[error("Marketplace rejected the access token ({0})")]
    Unauthorized(StatusCode),

    #[error("Marketplace returned HTTP {0}")]
    Status(StatusCode),

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected response body: {0}")]
    Decode(String),
}

/// One page of records at a time
#[async_trait]
pub trait Pager: Send + Sync {
    /// Records `[offset, offset + limit)` in source order
    async fn fetch_page(
        &self,
        account: &SourceAccount,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<RawRecord>, FetchError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<serde_json::Value>,
}

/// Pager over `GET {base_url}/orders/search`
pub struct HttpPager {
    client: Client,
    config: SourceApiConfig,
}

impl HttpPager {
    pub fn new(client: Client, config: SourceApiConfig) -> Self {
        Self { client, config }
    }

    fn search_url(&self) -> String {
        format!("{}/orders/search", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Pager for HttpPager {
    async fn fetch_page(
        &self,
        account: &SourceAccount,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<RawRecord>, FetchError> {
        debug!(seller_id = %account.seller_id, offset, limit, "Fetching order page");

        let response = self
            .client
            .get(self.search_url())
            .bearer_auth(&account.access_token)
            .query(&[
                ("seller", account.seller_id.as_str()),
                ("sort", "date_desc"),
            ])
            .query(&[("limit", limit), ("offset", offset)])
            .timeout(self.config.page_timeout)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::Unauthorized(status));
        }
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body = response.bytes().await?;
        let page: SearchResponse =
            serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))?;

        Ok(page.results.into_iter().map(RawRecord).collect())
    }
}
