use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Remote error: {0}")]
    Remote(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Unauthorized: sign in again to continue tracking time")]
    Unauthorized,
    #[error("Audio error: {0}")]
    Audio(String),
    #[error("State poisoned: {0}")]
    StatePoisoned(String),
}

impl InfraError {
    /// Transport failures that are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            InfraError::Remote(message) => {
                let message = message.to_ascii_lowercase();
                message.contains("network error")
                    || message.contains("timeout")
                    || message.contains("timed out")
                    || message.contains("connection reset")
            }
            InfraError::Http { status, .. } => *status == 502 || *status == 503 || *status == 504,
            _ => false,
        }
    }
}
