use thiserror::Error;

#[derive(Error, Debug)]
pub enum CubeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown counter code: {0}")]
    UnknownCounter(String),

    #[error("Unknown database: {0}")]
    UnknownDatabase(String),

    #[error("No active process in this context")]
    NoActiveProcess,

    #[error("Process '{name}' is not the current process of this context")]
    NotCurrentProcess { name: String },

    #[error("Analytics engine has been disposed")]
    Disposed,

    #[error("Failed to spawn flush thread: {0}")]
    Spawn(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, CubeError>;

impl CubeError {
    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new unknown counter error
    pub fn unknown_counter<S: Into<String>>(code: S) -> Self {
        Self::UnknownCounter(code.into())
    }

    /// Creates a new unknown database error
    pub fn unknown_database<S: Into<String>>(name: S) -> Self {
        Self::UnknownDatabase(name.into())
    }

    /// Returns true if the caller may retry the same call later
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Spawn(_))
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::UnknownCounter(_) => "config",
            Self::UnknownDatabase(_) => "lookup",
            Self::NoActiveProcess | Self::NotCurrentProcess { .. } => "process",
            Self::Disposed => "lifecycle",
            Self::Spawn(_) => "thread",
            Self::Io(_) => "io",
        }
    }
}
