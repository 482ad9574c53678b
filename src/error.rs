use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("HTTP status {status}")]
    Http { status: u16 },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("Invalid time range: start {start} > end {end}")]
    DataRange { start: f64, end: f64 },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SyncError::Connectivity(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => SyncError::Http {
                status: status.as_u16(),
            },
            None => SyncError::Connectivity(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

impl SyncError {
    /// Whether this failure is worth retrying: transport-level faults,
    /// server errors, timeouts and throttling. Client-side errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Connectivity(_) => true,
            SyncError::Http { status } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SyncError::Connectivity("refused".into()).is_retryable());
        assert!(SyncError::Http { status: 503 }.is_retryable());
        assert!(SyncError::Http { status: 408 }.is_retryable());
        assert!(SyncError::Http { status: 429 }.is_retryable());
        assert!(!SyncError::Http { status: 404 }.is_retryable());
        assert!(!SyncError::Protocol("bad frame".into()).is_retryable());
        assert!(!SyncError::Exhausted { attempts: 5 }.is_retryable());
    }
}
