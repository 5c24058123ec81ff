//! Error handling: unified error type and context helpers.

mod macros;
mod types;

pub use types::EngineError;

/// Engine-wide result type.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error context extension trait, for turning a lower-level error into
/// an `EngineError` of a specific kind without losing the source chain.
pub trait ErrorContext<T> {
    /// Attach config-error context.
    fn with_config_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// Attach network-error context.
    fn with_network_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// Attach auth-error context.
    fn with_auth_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn with_config_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| EngineError::config_with_source(f(), e.into()))
    }

    fn with_network_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| EngineError::network_with_source(f(), e.into()))
    }

    fn with_auth_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| EngineError::auth(format!("{}: {}", f(), e.into())))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn with_config_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.ok_or_else(|| EngineError::config(f()))
    }

    fn with_network_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.ok_or_else(|| EngineError::network(f()))
    }

    fn with_auth_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.ok_or_else(|| EngineError::auth(f()))
    }
}
