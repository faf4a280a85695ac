use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("ADAPTER_FETCH: {0}")]
    AdapterFetch(String),
    #[error("MALFORMED_RECORD: {0}")]
    MalformedRecord(String),
    #[error("STORE_FAILURE: {0}")]
    Store(String),
    #[error("CONFIG_INVALID: {0}")]
    Config(String),
    #[error("METHOD_NOT_ALLOWED: {0}")]
    MethodNotAllowed(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::AdapterFetch(_) => "ADAPTER_FETCH",
            Self::MalformedRecord(_) => "MALFORMED_RECORD",
            Self::Store(_) => "STORE_FAILURE",
            Self::Config(_) => "CONFIG_INVALID",
            Self::MethodNotAllowed(_) => "METHOD_NOT_ALLOWED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Io(_) => "IO_FAILURE",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::MethodNotAllowed(_) => 405,
            Self::NotFound(_) => 404,
            Self::Config(_) | Self::MalformedRecord(_) => 400,
            Self::AdapterFetch(_) => 502,
            Self::Store(_) | Self::Io(_) | Self::Internal(_) => 500,
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
        Self::Store(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for AppError {
    fn from(value: tokio::time::error::Elapsed) -> Self {
        Self::AdapterFetch(format!("upstream fetch timed out ({})", value))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
