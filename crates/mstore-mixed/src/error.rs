use mstore_store::StoreError;
use thiserror::Error;

/// Errors raised while building a mixed store from configuration.
///
/// Errors from routed operations are [`StoreError`]s passed through
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// No store is named `default`.
    #[error("no store named \"default\" is configured")]
    MissingDefault,

    #[error("store name configured twice: {0}")]
    DuplicateStore(String),

    /// No factory is registered for the engine name.
    #[error("unknown store engine: {0}")]
    UnknownEngine(String),

    /// An engine was registered twice.
    #[error("store engine registered twice: {0}")]
    DuplicateEngine(String),

    /// A course mapping names a store that is not configured.
    #[error("course {course} is mapped to unknown store {store}")]
    UnknownStore { course: String, store: String },

    /// A store option is missing or has the wrong type.
    #[error("invalid option {option} for store {store}: {reason}")]
    InvalidOption {
        store: String,
        option: String,
        reason: String,
    },

    /// The configuration text could not be parsed.
    #[error("config parse error: {0}")]
    Parse(String),

    #[error("config i/o error: {0}")]
    Io(String),

    /// Building a store or its translation entries failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(e: toml::ser::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Result alias for configuration.
pub type ConfigResult<T> = Result<T, ConfigError>;
