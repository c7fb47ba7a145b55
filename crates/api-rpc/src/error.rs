//! RPC Error Types
//!
//! Maps application errors to JSON-RPC error codes.

use courier_core::error::AppError;
use jsonrpsee::types::ErrorObjectOwned;
use thiserror::Error;

/// RPC Error Codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const THROTTLED: i32 = 4003;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const DB_ERROR: i32 = 5001;
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    let code = match &err {
        AppError::Validation(_) | AppError::Domain(_) | AppError::Serialization(_) => {
            code::VALIDATION_ERROR
        }
        AppError::NotFound(_) => code::NOT_FOUND,
        AppError::Conflict(_) | AppError::InvalidState(_) => code::CONFLICT,
        AppError::Database(_) => code::DB_ERROR,
        AppError::Execution(_) | AppError::Config(_) | AppError::Internal(_) => {
            code::INTERNAL_ERROR
        }
    };

    // Validation messages are shown to callers verbatim
    let message = match err {
        AppError::Validation(msg)
        | AppError::NotFound(msg)
        | AppError::Conflict(msg)
        | AppError::InvalidState(msg) => msg,
        other => other.to_string(),
    };

    ErrorObjectOwned::owned(code, message, None::<()>)
}

pub fn throttled() -> ErrorObjectOwned {
    ErrorObjectOwned::owned(
        code::THROTTLED,
        "Rate limit exceeded. Please slow down.",
        None::<()>,
    )
}

/// Server startup errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind JSON-RPC server on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to register method {method}: {message}")]
    Register {
        method: &'static str,
        message: String,
    },
}
