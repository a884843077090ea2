//! pbiq Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Ambient utilities shared by the pbiq workspace members:
//!
//! - **Logging**: tracing subscriber setup driven by [`logging::LogConfig`]
//! - **Timing**: phase stopwatches and human readable durations
//!
//! # Example
//!
//! ```no_run
//! use pbiq_common::logging::{init_logging, LogConfig};
//! use pbiq_common::timing::Stopwatch;
//! use tracing::info;
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     let watch = Stopwatch::start();
//!     info!(elapsed = %watch.elapsed_human(), "Nothing done");
//!     Ok(())
//! }
//! ```

pub mod logging;
pub mod timing;

pub use timing::{format_elapsed, Stopwatch};
