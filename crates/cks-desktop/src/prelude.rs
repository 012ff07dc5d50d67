//! Prelude module - commonly used types for convenient import.
//!
//! Use `use cks_desktop::prelude::*;` to import all essential types.

// Execution
pub use crate::{DesktopError, DesktopExecutor, DesktopResult};

// Terminal policy
pub use crate::{CommandPolicy, PolicyMode};

// Dispatch
pub use crate::{run_dispatcher, spawn_dispatcher};
