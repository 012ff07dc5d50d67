//! CKS Telemetry - Logging for the CKS tool-call gate.
//!
//! This crate provides:
//! - Configurable `tracing` subscriber setup with multiple formats
//! - Stdout, stderr or rolling-file output
//! - A bridge from `cks_config::LoggingSection` (feature `config`)
//!
//! # Example
//!
//! ```rust,no_run
//! use cks_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), cks_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Json)
//!     .with_directive("cks_approval=debug");
//!
//! setup_logging(&config)?;
//! tracing::info!("gate started");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileLogConfig, FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging,
    setup_logging,
};
