use thiserror::Error;

/// Errors raised by the shared host capabilities
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Failed to parse settings: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Failed to serialize settings: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Timed out acquiring the store lock")]
    LockTimeout,

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Could not determine the platform config directory")]
    NoConfigDir,
}

pub type Result<T> = std::result::Result<T, CoreError>;
