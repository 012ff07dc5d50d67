use cks_core::{GateError, RequestId};

/// The grant store could not be read or written.
///
/// Reads that fail are treated as "no grant" by the engine. Writes that fail
/// are fatal to the request that asked for the grant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("grant store unavailable: {0}")]
pub struct GrantStoreError(pub String);

impl From<GrantStoreError> for GateError {
    fn from(err: GrantStoreError) -> Self {
        GateError::GrantStore(err.0)
    }
}

/// A queue operation targeted a request that is not queued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("request {request_id} is not queued")]
pub struct QueueConflict {
    /// The targeted request.
    pub request_id: RequestId,
}

impl From<QueueConflict> for GateError {
    fn from(err: QueueConflict) -> Self {
        GateError::QueueConflict {
            request_id: err.request_id,
        }
    }
}
