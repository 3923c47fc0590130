use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // Domain value errors
    #[error("Slot {slot} out of range, valid slots are 1-{max}")]
    InvalidSlot { slot: i64, max: u8 },

    #[error("Invalid record id: {0}")]
    InvalidRecordId(String),

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing configuration key: {0}")]
    MissingConfig(String),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns `true` for the configuration error kinds.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Config(_) | Self::MissingConfig(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
