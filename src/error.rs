use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The raw input sequence itself could not be read. Fatal for the run.
    #[error("Input error: {message}")]
    Input { message: String },

    /// A store write or read failed. Retryable on the write path.
    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl PipelineError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
