//! Background marketplace order imports
//!
//! # Architecture
//!
//! - **jobs**: Job model and snapshots (`JobSnapshot`, `JobStatus`, `OwnerKey`)
//! - **registry**: In-memory job registry shared by workers and pollers
//! - **config**: Import configuration (IMPORT_* environment variables)
//! - **accounts**: Marketplace account and token resolution
//! - **pager**: Paginated order search
//! - **fetcher**: Per-order detail fetching
//! - **sink**: Record persistence (PostgreSQL upsert, in-memory)
//! - **resources**: Per-worker database pool and HTTP client
//! - **worker**: The import loop
//! - **orchestrator**: Start, status, cancel and the finished-job reaper
//!
//! # Public API
//!
//! Exposed through the `api` module:
//! - `POST /api/v1/import-background` - Start an import
//! - `GET /api/v1/import-status/:job_id` - Poll a job
//! - `POST /api/v1/import-cancel/:job_id` - Request cancellation
//! - `GET /api/v1/import-jobs` - List jobs of one account
//!
//! Job state lives in memory only and is lost on restart.

pub mod accounts;
pub mod config;
pub mod fetcher;
pub mod jobs;
pub mod orchestrator;
pub mod pager;
pub mod registry;
pub mod resources;
pub mod sink;
pub mod worker;

pub use accounts::{AccountResolver, PgAccountResolver, SourceAccount};
pub use config::{DuplicatePolicy, ImportConfig, Pacing, SourceApiConfig};
pub use fetcher::{DetailedRecord, HttpItemFetcher, ItemFetcher};
pub use jobs::{JobCounters, JobId, JobSnapshot, JobStatus, OwnerKey};
pub use orchestrator::{CancelResponse, ImportError, ImportOrchestrator};
pub use pager::{FetchError, HttpPager, Pager, RawRecord};
pub use registry::{CancelOutcome, JobRegistry, RegistryError};
pub use resources::{LiveResourceProvider, ResourceProvider, WorkerResources};
pub use sink::{InMemorySink, InMemoryStore, PersistOutcome, PgRecordSink, RecordSink};
pub use worker::{ImportWorker, WorkerError};
