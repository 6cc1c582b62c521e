//! Registry service error types.

use thiserror::Error;

/// Errors that can occur in the registration and discovery services.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: registering a new {0} is disabled")]
    PermissionDenied(&'static str),

    #[error("store error: {0}")]
    Store(#[from] appreg_store::StoreError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
