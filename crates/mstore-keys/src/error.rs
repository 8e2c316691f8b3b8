use thiserror::Error;

/// Errors produced while parsing, constructing or deriving keys.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The serialized key has no `namespace:` prefix.
    #[error("serialized key has no namespace: {0:?}")]
    MissingNamespace(String),

    /// No registered key implementation accepts the serialized key.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// Not enough fields are present to perform the operation.
    #[error("insufficient specification: {0}")]
    InsufficientSpecification(String),

    /// Mutually exclusive construction inputs were supplied together.
    #[error("over specification: {0}")]
    OverSpecification(String),

    /// A field value is malformed or a key invariant does not hold.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// A version guid is not 24 hex characters.
    #[error("invalid version guid: {0:?}")]
    InvalidVersionGuid(String),

    /// Positional/named construction arguments do not bind to the key fields.
    #[error("invalid key arguments: {0}")]
    Arguments(String),

    /// A legacy location is malformed.
    #[error("invalid location: {0}")]
    InvalidLocation(String),

    /// A namespace was registered twice in the same registry.
    #[error("namespace already registered in {key_type}: {namespace}")]
    DuplicateNamespace {
        key_type: &'static str,
        namespace: String,
    },
}

/// Result alias for key operations.
pub type KeyResult<T> = Result<T, KeyError>;
