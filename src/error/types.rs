//! Error type definitions

use thiserror::Error;

/// The engine's single error type.
///
/// Every variant carries a human-readable `message` plus an optional
/// `source`, mirroring how callers want to log and (for the CLI) print
/// these errors: the message is always meaningful on its own.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration could not be resolved (missing env var, bad path, ...).
    #[error("config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Filesystem I/O failure reading or writing engine state.
    #[error("io error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Failure talking to the upstream provider.
    #[error("network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// JSON (de)serialization failure.
    #[error("serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Authentication is permanently broken for a credential (invalid_grant, 401).
    #[error("auth error: {message}")]
    Auth {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Keyring state is inconsistent in a way callers must not ignore.
    #[error("keyring error: {message}")]
    Keyring { message: String },

    /// Anything else.
    #[error("internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },
}

impl EngineError {
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn config_with_source(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn network_with_source(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Serialization {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    #[must_use]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn keyring(message: impl Into<String>) -> Self {
        Self::Keyring {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn internal_with_source(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            message: source.to_string(),
            source,
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(source: serde_json::Error) -> Self {
        Self::serialization_with_source(source.to_string(), source)
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(source: reqwest::Error) -> Self {
        Self::network_with_source(source.to_string(), source)
    }
}
