//! CKS Desktop - Executes approved tool calls on the local machine.
//!
//! The approval engine in `cks-approval` decides *whether* a call may run;
//! this crate performs it. [`DesktopExecutor`] implements
//! [`cks_approval::ToolExecutor`] for the desktop tools, guarding terminal
//! commands with a [`CommandPolicy`]. [`run_dispatcher`] connects the two by
//! draining the engine's dispatch channel and reporting each outcome back.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cks_approval::{EngineConfig, ToolCallEngine};
//! use cks_desktop::{DesktopExecutor, spawn_dispatcher};
//!
//! # async fn run() {
//! let engine = ToolCallEngine::new(EngineConfig::default());
//! let executor = Arc::new(DesktopExecutor::new().with_work_dir("/srv/workspace"));
//! let _dispatcher = spawn_dispatcher(&engine, executor);
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod dispatcher;
/// Error types for desktop tool execution.
pub mod error;
pub mod executor;
pub mod policy;

pub use dispatcher::{run_dispatcher, spawn_dispatcher};
pub use error::{DesktopError, DesktopResult};
pub use executor::{DEFAULT_COMMAND_TIMEOUT, DesktopExecutor, FileInfo};
pub use policy::{CommandPolicy, PolicyMode, has_shell_chaining, tokenize};
