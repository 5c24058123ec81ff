//! Lifecycle glue: the explicit `Engine` value and the one-shot hook entry point.
//!
//! No mutable globals anywhere in this crate: `Engine` is built once from an
//! [`EngineConfig`] and owns every subsystem handle, matching the host
//! proxy's own `AppContext`/`AppResources` construction pattern.

use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;

use crate::config::EngineConfig;
use crate::keyring::{KeyRecord, KeyStatus, Keyring, KeyringStore};
use crate::probe::HealthProber;
use crate::refresh::RefreshClient;
use crate::selector::select;
use crate::sources::sync;

/// A total-wall-clock cap on one hook cycle, so the host is never blocked
/// indefinitely on network or disk.
const HOOK_CYCLE_DEADLINE: Duration = Duration::from_secs(20);

/// The JSON envelope printed to stdout for the host's hook dispatch.
#[derive(Debug, Serialize)]
pub struct HookEnvelope {
    #[serde(rename = "continue")]
    pub continue_: bool,
    #[serde(rename = "suppressOutput")]
    pub suppress_output: bool,
    #[serde(rename = "systemMessage", skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
}

impl HookEnvelope {
    fn suppressed() -> Self {
        Self {
            continue_: true,
            suppress_output: true,
            system_message: None,
        }
    }
}

/// Owns the configuration and every subsystem handle; threaded by reference
/// (or cloned `Arc`) into each operation.
pub struct Engine {
    config: EngineConfig,
    store: KeyringStore,
    refresh_client: RefreshClient,
    prober: HealthProber,
}

impl Engine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let http = reqwest::Client::new();
        let store = KeyringStore::new(config.state_path.clone(), config.human_log_path.clone());
        let refresh_client = RefreshClient::new(
            http.clone(),
            config.provider_base_url.clone(),
            config.oauth_client_id.clone(),
        );
        let prober = HealthProber::new(http, config.provider_base_url.clone());

        Self {
            config,
            store,
            refresh_client,
            prober,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// One-shot entry point for the host's hook dispatch. Never propagates
    /// an error: every exit path yields `{continue: true, ...}`.
    pub async fn run_hook_cycle(&self) -> HookEnvelope {
        if self.config.spawned_session {
            return HookEnvelope::suppressed();
        }

        match tokio::time::timeout(HOOK_CYCLE_DEADLINE, self.run_cycle()).await {
            Ok(keyring) => self.build_envelope(&keyring),
            Err(_) => {
                tracing::warn!("hook cycle exceeded deadline, returning suppressed envelope");
                HookEnvelope::suppressed()
            }
        }
    }

    /// Run credential discovery/sync once. Exposed to the `sync` CLI subcommand.
    pub async fn run_sync_once(&self) -> Keyring {
        let mut keyring = self.store.load();
        let now = chrono::Utc::now().timestamp_millis();
        sync(
            &mut keyring,
            &self.config.credential_sources(),
            &self.refresh_client,
            &self.prober,
            &self.store,
            now,
        )
        .await;
        self.store.save(&keyring);
        keyring
    }

    /// Read-only snapshot for the `status` CLI subcommand.
    #[must_use]
    pub fn load_keyring(&self) -> Keyring {
        self.store.load()
    }

    async fn run_cycle(&self) -> Keyring {
        let mut keyring = self.store.load();
        let now = chrono::Utc::now().timestamp_millis();

        sync(
            &mut keyring,
            &self.config.credential_sources(),
            &self.refresh_client,
            &self.prober,
            &self.store,
            now,
        )
        .await;

        self.probe_non_invalid(&mut keyring, now).await;

        let mut pending_log_line = None;
        if let Some(selected) = select(&keyring, now) {
            if keyring.active_key_id.as_deref() != Some(selected.as_str()) {
                pending_log_line = Some(self.apply_selection(&mut keyring, &selected, now));
            }
        }

        self.store.save(&keyring);
        if let Some(line) = pending_log_line {
            self.store.write_human_log_line(&line);
        }
        keyring
    }

    async fn probe_non_invalid(&self, keyring: &mut Keyring, now: i64) {
        let targets: Vec<(String, String)> = keyring
            .keys
            .iter()
            .filter(|(_, r)| !matches!(r.status, KeyStatus::Invalid | KeyStatus::Expired))
            .map(|(id, r)| (id.clone(), r.access_token.clone()))
            .collect();

        let results = self.prober.probe_many(&targets, now).await;

        for (key_id, outcome) in results {
            let mut newly_exhausted = false;
            {
                let Some(record) = keyring.keys.get_mut(&key_id) else {
                    continue;
                };
                match outcome {
                    crate::probe::ProbeOutcome::Valid(usage) => {
                        record.last_health_check = Some(now);
                        record.last_usage = Some(usage);
                        newly_exhausted = usage.max_usage() >= crate::selector::EXHAUSTED_THRESHOLD;
                        record.status = if newly_exhausted { KeyStatus::Exhausted } else { KeyStatus::Active };
                    }
                    crate::probe::ProbeOutcome::Unauthorized => {
                        record.status = KeyStatus::Invalid;
                    }
                    crate::probe::ProbeOutcome::Transient(reason) => {
                        tracing::debug!(key_id = %key_id, reason = %reason, "transient probe failure in hook cycle");
                    }
                }
            }
            if newly_exhausted {
                use crate::keyring::{RotationEvent, RotationEventKind};
                self.store.append_event(
                    keyring,
                    RotationEvent {
                        timestamp: now,
                        event: RotationEventKind::KeyExhausted,
                        key_id: Some(key_id),
                        reason: Some("probe_usage_at_or_above_threshold".to_string()),
                        from_key_id: None,
                        to_key_id: None,
                        account_email: None,
                        predictive: None,
                    },
                );
            }
        }
    }

    /// Switch the active key and write the active-credentials file. Returns
    /// the human-log line for the `key_switched` event without writing it;
    /// the caller writes it only once persistence of `keyring` has succeeded.
    #[must_use]
    fn apply_selection(&self, keyring: &mut Keyring, selected: &str, now: i64) -> String {
        use crate::keyring::{RotationEvent, RotationEventKind};

        let from = keyring.active_key_id.clone();
        keyring.active_key_id = Some(selected.to_string());
        let line = self.store.append_event_deferred(
            keyring,
            RotationEvent {
                timestamp: now,
                event: RotationEventKind::KeySwitched,
                key_id: Some(selected.to_string()),
                reason: Some("selector".to_string()),
                from_key_id: from,
                to_key_id: Some(selected.to_string()),
                account_email: None,
                predictive: None,
            },
        );

        if let Some(record) = keyring.keys.get(selected) {
            if let Err(e) = write_active_credentials(&self.config, record) {
                tracing::error!(error = %e, "failed to write active credentials after selection");
            }
        }

        line
    }

    fn build_envelope(&self, keyring: &Keyring) -> HookEnvelope {
        let responding: Vec<&KeyRecord> = keyring
            .keys
            .values()
            .filter(|r| r.last_usage.is_some())
            .collect();

        let mut seen = HashSet::new();
        let mut distinct_accounts = 0usize;
        let mut peak = 0.0f64;
        let mut fallback_used = false;

        for record in &responding {
            let fingerprint = account_fingerprint(record);
            if fingerprint == AccountFingerprint::FingerprintFallback {
                fallback_used = true;
            }
            if seen.insert(fingerprint.clone_key(record)) {
                distinct_accounts += 1;
            }
            if let Some(usage) = record.last_usage {
                peak = peak.max(usage.max_usage());
            }
        }

        if fallback_used {
            tracing::debug!("multi-account dedup fell back to usage fingerprinting; uuid was missing on at least one account");
        }

        let system_message = if distinct_accounts > 1 {
            Some(format!(
                "rotation-engine: {distinct_accounts} accounts in rotation, peak usage {peak:.0}%"
            ))
        } else {
            None
        };

        HookEnvelope {
            continue_: true,
            suppress_output: system_message.is_none(),
            system_message,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum AccountFingerprint {
    Uuid,
    FingerprintFallback,
}

impl AccountFingerprint {
    fn clone_key(&self, record: &KeyRecord) -> String {
        match self {
            Self::Uuid => format!("uuid:{}", record.account_uuid.as_deref().unwrap_or_default()),
            Self::FingerprintFallback => {
                let usage = record.last_usage;
                format!(
                    "fp:{:.1}:{:.1}",
                    usage.map_or(0.0, |u| u.seven_day),
                    usage.map_or(0.0, |u| u.seven_day_sonnet)
                )
            }
        }
    }
}

fn account_fingerprint(record: &KeyRecord) -> AccountFingerprint {
    if record.account_uuid.is_some() {
        AccountFingerprint::Uuid
    } else {
        AccountFingerprint::FingerprintFallback
    }
}

fn write_active_credentials(config: &EngineConfig, record: &KeyRecord) -> std::io::Result<()> {
    let payload = serde_json::json!({
        "access_token": record.access_token,
        "refresh_token": record.refresh_token,
        "expires_at": record.expires_at,
    });
    if let Some(parent) = config.active_credentials_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&config.active_credentials_path, serde_json::to_vec_pretty(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> EngineConfig {
        let dir = tempfile::tempdir().unwrap();
        EngineConfig {
            state_path: dir.path().join("keyring.json"),
            human_log_path: dir.path().join("rotation.log"),
            primary_credential_source: dir.path().join("credentials.json"),
            project_credential_source: None,
            active_credentials_path: dir.path().join("active.json"),
            provider_base_url: "http://127.0.0.1:0".to_string(),
            oauth_client_id: "test".to_string(),
            spawned_session: false,
        }
    }

    #[tokio::test]
    async fn spawned_session_short_circuits_with_suppressed_envelope() {
        let mut config = test_config();
        config.spawned_session = true;
        let engine = Engine::new(config);

        let envelope = engine.run_hook_cycle().await;
        assert!(envelope.continue_);
        assert!(envelope.suppress_output);
        assert!(envelope.system_message.is_none());
    }

    #[test]
    fn build_envelope_suppresses_single_account() {
        let engine = Engine::new(test_config());
        let mut keyring = Keyring::default();
        keyring.keys.insert(
            "a".to_string(),
            KeyRecord {
                access_token: "t".to_string(),
                refresh_token: "r".to_string(),
                expires_at: None,
                status: KeyStatus::Active,
                account_uuid: Some("uuid-1".to_string()),
                account_email: None,
                last_health_check: Some(0),
                last_usage: Some(crate::keyring::UsageSnapshot {
                    five_hour: 10.0,
                    seven_day: 10.0,
                    seven_day_sonnet: 10.0,
                    checked_at: 0,
                }),
                added_at: 0,
            },
        );

        let envelope = engine.build_envelope(&keyring);
        assert!(envelope.suppress_output);
        assert!(envelope.system_message.is_none());
    }

    #[test]
    fn build_envelope_emits_message_for_multiple_distinct_accounts() {
        let engine = Engine::new(test_config());
        let mut keyring = Keyring::default();
        for (id, uuid) in [("a", "uuid-1"), ("b", "uuid-2")] {
            keyring.keys.insert(
                id.to_string(),
                KeyRecord {
                    access_token: "t".to_string(),
                    refresh_token: "r".to_string(),
                    expires_at: None,
                    status: KeyStatus::Active,
                    account_uuid: Some(uuid.to_string()),
                    account_email: None,
                    last_health_check: Some(0),
                    last_usage: Some(crate::keyring::UsageSnapshot {
                        five_hour: 50.0,
                        seven_day: 50.0,
                        seven_day_sonnet: 50.0,
                        checked_at: 0,
                    }),
                    added_at: 0,
                },
            );
        }

        let envelope = engine.build_envelope(&keyring);
        assert!(!envelope.suppress_output);
        assert!(envelope.system_message.unwrap().contains('2'));
    }
}
