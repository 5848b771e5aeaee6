//! Error types for the sonification engine.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the engine and its collaborators.
///
/// Out-of-range weather input never fails: every mapping clamps, so odd
/// values degrade to boundary behaviour.
#[derive(Debug, Error)]
pub enum Error {
    #[error("weather data not found at {}: {source}", path.display())]
    DataNotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed weather data: {0}")]
    MalformedTimeline(#[source] serde_json::Error),

    #[error("weather timeline contains no hourly samples")]
    EmptyTimeline,

    #[error("unknown control key: {}", keys.join(", "))]
    UnknownControlKey { keys: Vec<String> },

    #[error("no playable source attached")]
    SourceUnavailable,

    #[error("invalid chain topology: {0}")]
    InvalidTopology(String),

    #[error("audio engine command queue is full")]
    EngineBusy,

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("audio file error: {0}")]
    AudioFile(#[from] hound::Error),

    #[error("config file not found at {}: {source}", path.display())]
    ConfigNotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn unknown_key(key: impl Into<String>) -> Self {
        Error::UnknownControlKey {
            keys: vec![key.into()],
        }
    }
}
