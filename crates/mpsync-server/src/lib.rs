//! mpsync Server Library
//!
//! HTTP server that imports marketplace orders in the background.
//!
//! # Overview
//!
//! - **Import orchestration**: detached workers page through the marketplace
//!   order search under a fixed pacing, fetch each order in detail and upsert it
//! - **Job registry**: in-memory job state polled and cancelled over HTTP
//! - **Database**: PostgreSQL via SQLx, one dedicated pool per worker
//! - **Configuration**: environment-based (`MPSYNC_*`, `DATABASE_*`, `IMPORT_*`)
//! - **Middleware**: CORS and request tracing
//!
//! # Example
//!
//! ```no_run
//! use mpsync_server::ingest::{JobRegistry, ImportConfig, ImportOrchestrator, LiveResourceProvider, OwnerKey};
//! use std::{sync::Arc, time::Duration};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ImportConfig::from_env()?;
//!     let provider = LiveResourceProvider::new(
//!         "postgresql://localhost/mpsync",
//!         Duration::from_secs(10),
//!         config.source.clone(),
//!     );
//!     let orchestrator = ImportOrchestrator::new(Arc::new(JobRegistry::new()), Arc::new(provider), config);
//!     let job_id = orchestrator.start_import(OwnerKey::new(1, 2), 500)?;
//!     println!("{:?}", orchestrator.get_status(job_id));
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod middleware;

pub use error::AppError;
