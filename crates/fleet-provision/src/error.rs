//! Provisioning error types.

use thiserror::Error;

/// Errors from a provisioning backend. Scoped to a single action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvisionError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("instance creation failed: {0}")]
    CreateFailed(String),

    #[error("instance {id} did not reach state {state:?} in time")]
    StateTimeout { id: String, state: String },

    #[error("backend error: {0}")]
    Backend(String),
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;
