//! mpsync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging setup for the mpsync workspace.
//!
//! - **Error Handling**: [`MpsyncError`] and the [`Result`] alias
//! - **Logging**: tracing subscriber initialisation driven by `LOG_*` variables
//!
//! # Example
//!
//! ```no_run
//! use mpsync_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     let _guard = init_logging(&config)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

pub use error::{MpsyncError, Result};
