use thiserror::Error;

/// Raised when a host, address or network pattern cannot be understood.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("empty host")]
    Empty,

    #[error("invalid host \"{0}\"")]
    InvalidHost(String),

    #[error("invalid network \"{input}\": {reason}")]
    InvalidNetwork { input: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config must be a mapping, got {0}")]
    NotAMapping(String),

    #[error("invalid config key {0:?}: keys must be strings, numbers or booleans")]
    InvalidKey(String),

    #[error("invalid config assignment \"{0}\", expected key.path=value")]
    InvalidAssignment(String),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("invalid {event_type} data \"{data}\": {source}")]
    InvalidHostData {
        event_type: String,
        data: String,
        source: ScopeError,
    },

    #[error("{event_type} events require string data")]
    ExpectedText { event_type: String },
}
