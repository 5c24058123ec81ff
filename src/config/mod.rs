//! Engine configuration.
//!
//! A plain value, never a global: built once at process entry and threaded
//! through [`crate::engine::Engine`].

use std::path::PathBuf;

use crate::error::{ErrorContext, Result};

const DEFAULT_PROVIDER_BASE_URL: &str = "https://api.anthropic.com";
const ENGINE_DIR_NAME: &str = "rotation-engine";

/// All file-system paths, the provider base URL, and tunables the engine
/// needs, resolved once from the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the keyring JSON state file.
    pub state_path: PathBuf,
    /// Path to the append-only human-readable log.
    pub human_log_path: PathBuf,
    /// Primary on-disk credential source (host-managed, e.g. the assistant's own
    /// credentials file).
    pub primary_credential_source: PathBuf,
    /// Optional per-project override credential source.
    pub project_credential_source: Option<PathBuf>,
    /// Where the engine writes the currently-active credential for the
    /// external proxy to pick up.
    pub active_credentials_path: PathBuf,
    /// Base URL of the upstream provider (usage/profile/token endpoints hang
    /// off this).
    pub provider_base_url: String,
    /// OAuth client id registered with the provider.
    pub oauth_client_id: String,
    /// Set when this invocation is running inside a spawned child session;
    /// such invocations must no-op.
    pub spawned_session: bool,
}

impl EngineConfig {
    /// Build configuration from environment variables, falling back to
    /// documented defaults rooted at `$HOME`.
    pub fn from_env() -> Result<Self> {
        let home = dirs::home_dir().with_config_context(|| {
            "could not resolve home directory ($HOME unset)".to_string()
        })?;

        let state_dir = home.join(".config").join(ENGINE_DIR_NAME);

        let state_path = env_path("ROTATION_ENGINE_STATE_PATH")
            .unwrap_or_else(|| state_dir.join("keyring.json"));
        let human_log_path = env_path("ROTATION_ENGINE_LOG_PATH")
            .unwrap_or_else(|| state_dir.join("rotation.log"));
        let active_credentials_path = env_path("ROTATION_ENGINE_ACTIVE_CREDENTIALS_PATH")
            .unwrap_or_else(|| state_dir.join("active-credentials.json"));
        let primary_credential_source = env_path("ROTATION_ENGINE_CREDENTIAL_SOURCE")
            .unwrap_or_else(|| home.join(".config").join("assistant").join("credentials.json"));
        let project_credential_source = env_path("ROTATION_ENGINE_PROJECT_CREDENTIAL_SOURCE");

        let provider_base_url = std::env::var("ROTATION_ENGINE_PROVIDER_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_PROVIDER_BASE_URL.to_string());
        let oauth_client_id = std::env::var("ROTATION_ENGINE_OAUTH_CLIENT_ID")
            .unwrap_or_else(|_| "rotation-engine".to_string());

        let spawned_session = std::env::var("ROTATION_ENGINE_SPAWNED_SESSION")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        ensure_non_empty(&provider_base_url, "provider base URL")?;
        ensure_non_empty(&oauth_client_id, "OAuth client id")?;

        Ok(Self {
            state_path,
            human_log_path,
            primary_credential_source,
            project_credential_source,
            active_credentials_path,
            provider_base_url,
            oauth_client_id,
            spawned_session,
        })
    }

    /// Candidate credential sources in priority order (project override first).
    #[must_use]
    pub fn credential_sources(&self) -> Vec<PathBuf> {
        let mut sources = Vec::with_capacity(2);
        if let Some(project) = &self.project_credential_source {
            sources.push(project.clone());
        }
        sources.push(self.primary_credential_source.clone());
        sources
    }
}

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var(var).ok().map(PathBuf::from)
}

fn ensure_non_empty(value: &str, what: &str) -> Result<()> {
    crate::ensure_config!(!value.trim().is_empty(), "{what} must not be empty");
    Ok(())
}
