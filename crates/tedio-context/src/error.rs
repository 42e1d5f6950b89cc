//! Error type shared by the runtime and the context accessors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("runtime is already running on this thread")]
    AlreadyRunning,

    #[error("invalid runtime configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to encode context field `{key}`: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode context field `{key}`: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("context data must be an object, got {0}")]
    NotAnObject(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
