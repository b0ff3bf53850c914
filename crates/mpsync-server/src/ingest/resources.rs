//! Per-worker resources
//!
//! Every import worker opens its own database pool and HTTP client instead of
//! borrowing the request handler's. A [`ResourceProvider`] builds that set for
//! one job.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

use super::accounts::{AccountResolver, PgAccountResolver};
use super::config::SourceApiConfig;
use super::fetcher::{HttpItemFetcher, ItemFetcher};
use super::jobs::OwnerKey;
use super::pager::{HttpPager, Pager};
use super::sink::{PgRecordSink, RecordSink};

/// Connections held by the sink transaction and the resolver at the same time
const WORKER_POOL_CONNECTIONS: u32 = 2;

/// Collaborators owned by one worker for the lifetime of its job
pub struct WorkerResources {
    pub accounts: Box<dyn AccountResolver>,
    pub pager: Box<dyn Pager>,
    pub fetcher: Box<dyn ItemFetcher>,
    pub sink: Box<dyn RecordSink>,
}

/// Opens the resources for a new worker
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn open(&self, owner: &OwnerKey) -> Result<WorkerResources>;
}

/// PostgreSQL and marketplace HTTP resources
pub struct LiveResourceProvider {
    database_url: String,
    connect_timeout: Duration,
    source: SourceApiConfig,
}

impl LiveResourceProvider {
    pub fn new(database_url: impl Into<String>, connect_timeout: Duration, source: SourceApiConfig) -> Self {
        Self {
            database_url: database_url.into(),
            connect_timeout,
            source,
        }
    }
}

#[async_trait]
impl ResourceProvider for LiveResourceProvider {
    async fn open(&self, owner: &OwnerKey) -> Result<WorkerResources> {
        let pool = PgPoolOptions::new()
            .max_connections(WORKER_POOL_CONNECTIONS)
            .acquire_timeout(self.connect_timeout)
            .connect(&self.database_url)
            .await
            .with_context(|| format!("Failed to open worker database pool for {owner}"))?;

        // Per-request timeouts are applied by the pager and fetcher
        let client = Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(concat!("mpsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(WorkerResources {
            accounts: Box::new(PgAccountResolver::new(pool.clone())),
            pager: Box::new(HttpPager::new(client.clone(), self.source.clone())),
            fetcher: Box::new(HttpItemFetcher::new(client, self.source.clone())),
            sink: Box::new(PgRecordSink::new(pool)),
        })
    }
}
