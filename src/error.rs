use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A download or upload probe could not complete.
    #[error("Measurement failed: {0}")]
    Measurement(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller broke an operation's precondition (start while running,
    /// last result of an empty history).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
