//! Prelude module - commonly used types for convenient import.
//!
//! Use `use cks_approval::prelude::*;` to import all essential types.

// Engine
pub use crate::{Decision, EngineConfig, Submission, ToolCallEngine};

// Classification
pub use crate::{ClassifierConfig, RiskClassifier};

// Grants and queue
pub use crate::{ApprovalHandle, ApprovalQueue, GrantStore, GrantStoreError, InMemoryGrantStore};

// Execution hand-off
pub use crate::{Dispatch, ToolExecutor};
