use std::error::Error;
use std::fmt;

use crate::relay::error::TransportError;

/// Unified application error for startup and wiring.
///
/// Pipeline faults have their own enums in `relay::error` and are handled
/// inside the loop; only what stops the process ends up here.
#[derive(Debug)]
pub enum AppError {
    Config(String),
    Storage(String),
    Network(String),
    Startup(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(msg) => write!(f, "Config error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Network(msg) => write!(f, "Network error: {}", msg),
            AppError::Startup(msg) => write!(f, "Startup error: {}", msg),
        }
    }
}

impl Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<TransportError> for AppError {
    fn from(err: TransportError) -> Self {
        AppError::Network(err.to_string())
    }
}

impl From<prometheus::Error> for AppError {
    fn from(err: prometheus::Error) -> Self {
        AppError::Startup(format!("metrics registry: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Startup(err.to_string())
    }
}
