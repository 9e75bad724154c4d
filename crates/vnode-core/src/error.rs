use thiserror::Error;

/// Core error type for virtual node operations.
#[derive(Error, Debug)]
pub enum VnodeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Setup failed ({context}): {source}")]
    Setup {
        context: String,
        #[source]
        source: Box<VnodeError>,
    },
}

impl VnodeError {
    /// Wrap an error that aborted startup.
    pub fn setup(context: impl Into<String>, source: VnodeError) -> Self {
        Self::Setup {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// The remote object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// The write lost an optimistic-concurrency race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// A create collided with an existing object.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    /// Errors that are absorbed and retried at the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Timeout(_) | Self::Provider(_)
        )
    }
}

impl From<serde_json::Error> for VnodeError {
    fn from(e: serde_json::Error) -> Self {
        VnodeError::Serialization(e.to_string())
    }
}

/// Result type alias using VnodeError.
pub type Result<T> = std::result::Result<T, VnodeError>;
