use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("VALIDATION: {0}")]
    Validation(String),
    #[error("CONFIG_INCOMPLETE: missing {}", .0.join(", "))]
    ConfigIncomplete(Vec<String>),
    #[error("UPSTREAM_FAILURE: {0}")]
    Upstream(String),
    #[error("NETWORK_FAILURE: {0}")]
    Network(String),
    #[error("TIMEOUT: {0}")]
    Timeout(String),
    #[error("STORAGE_FAULT: {0}")]
    Storage(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable lowercase tag rendered into JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation",
            Self::ConfigIncomplete(_) => "config_incomplete",
            Self::Upstream(_) => "upstream_failure",
            Self::Network(_) => "network_failure",
            Self::Timeout(_) => "timeout",
            Self::Storage(_) => "storage_fault",
            Self::Io(_) => "io_failure",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<zip::result::ZipError> for AppError {
    fn from(value: zip::result::ZipError) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
