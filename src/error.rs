use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Date parsing error: {0}")]
    DateParse(#[from] chrono::ParseError),

    #[error("Extraction failed at offset {offset} after {attempts} attempt(s): {source}")]
    Extraction {
        offset: u64,
        attempts: u32,
        #[source]
        source: PageError,
    },

    #[error("Schema mismatch in batch {batch_id}: missing columns {missing:?}, incompatible columns {incompatible:?}")]
    SchemaMismatch {
        batch_id: String,
        missing: Vec<String>,
        incompatible: Vec<String>,
    },

    #[error("Parquet write error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Settings could not be loaded: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Invalid coordinate format: {0}")]
    InvalidCoordinate(String),

    #[error("Invalid region geometry: {0}")]
    InvalidGeometry(String),

    #[error("Missing required data: {0}")]
    MissingData(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Pipeline cancelled before stage '{stage}'")]
    Cancelled { stage: &'static str },

    #[error("Async task error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl PipelineError {
    /// Offset a caller can resume extraction from, when the failure was a fetch failure.
    pub fn resume_offset(&self) -> Option<u64> {
        match self {
            PipelineError::Extraction { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

/// Failure of a single page request against the remote source.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PageError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("server error (HTTP {0})")]
    Server(u16),

    #[error("rate limited by source")]
    RateLimited { retry_after: Option<Duration> },

    #[error("request rejected (HTTP {0})")]
    Client(u16),

    #[error("response could not be decoded: {0}")]
    Decode(String),
}

impl PageError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PageError::Timeout(_)
                | PageError::Connection(_)
                | PageError::Server(_)
                | PageError::RateLimited { .. }
        )
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, PageError::RateLimited { .. })
    }

    pub fn from_status(status: u16, retry_after: Option<Duration>) -> Self {
        match status {
            429 => PageError::RateLimited { retry_after },
            500..=599 => PageError::Server(status),
            _ => PageError::Client(status),
        }
    }
}

impl From<reqwest::Error> for PageError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PageError::Timeout(Duration::ZERO)
        } else if let Some(status) = err.status() {
            PageError::from_status(status.as_u16(), None)
        } else if err.is_decode() {
            PageError::Decode(err.to_string())
        } else {
            PageError::Connection(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(PageError::from_status(503, None).is_retryable());
        assert!(PageError::from_status(429, None).is_rate_limit());
        assert!(PageError::from_status(429, None).is_retryable());
        assert!(!PageError::from_status(400, None).is_retryable());
        assert!(!PageError::Decode("bad json".to_string()).is_retryable());
    }

    #[test]
    fn test_resume_offset() {
        let err = PipelineError::Extraction {
            offset: 1500,
            attempts: 4,
            source: PageError::Server(502),
        };
        assert_eq!(err.resume_offset(), Some(1500));
        assert_eq!(PipelineError::Config("x".into()).resume_offset(), None);
    }
}
