//! Adaptive quota monitor: the long-lived daemon loop.

use std::collections::VecDeque;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::keyring::{KeyStatus, Keyring, KeyringStore, RotationEvent, RotationEventKind};
use crate::probe::{HealthProber, ProbeOutcome};
use crate::refresh::{RefreshClient, RefreshOutcome};
use crate::selector::select;

/// Ring capacity for the usage-velocity window.
pub const USAGE_HISTORY_MAX: usize = 5;
/// Below this peak usage, a positive velocity triggers a predictive rotation.
pub const PROACTIVE_THRESHOLD: f64 = 95.0;

/// `(peak usage threshold, next interval)`; the last row is the fallback.
const INTERVAL_TIERS: &[(f64, Duration)] = &[
    (70.0, Duration::from_secs(5 * 60)),
    (85.0, Duration::from_secs(2 * 60)),
    (95.0, Duration::from_secs(60)),
    (f64::MAX, Duration::from_secs(30)),
];

/// One `{timestamp, usage}` sample of the active key's peak utilization.
#[derive(Debug, Clone, Copy)]
struct UsageSample {
    timestamp: i64,
    usage: f64,
}

/// Pick the next check interval for a given peak usage via a linear scan of
/// the tier table.
#[must_use]
pub fn adaptive_interval(peak_usage: f64) -> Duration {
    for (threshold, interval) in INTERVAL_TIERS {
        if peak_usage < *threshold {
            return *interval;
        }
    }
    INTERVAL_TIERS.last().map_or(Duration::from_secs(30), |(_, d)| *d)
}

/// Percent-per-minute velocity between the oldest and newest sample.
/// Zero with fewer than two samples or a non-positive timespan.
fn compute_velocity(history: &VecDeque<UsageSample>) -> f64 {
    let (Some(oldest), Some(newest)) = (history.front(), history.back()) else {
        return 0.0;
    };
    let elapsed_minutes = (newest.timestamp - oldest.timestamp) as f64 / 60_000.0;
    if elapsed_minutes <= 0.0 {
        return 0.0;
    }
    (newest.usage - oldest.usage) / elapsed_minutes
}

/// Runs the adaptive-interval tick loop until cancelled.
pub struct QuotaMonitor {
    config: EngineConfig,
    store: KeyringStore,
    refresh_client: RefreshClient,
    prober: HealthProber,
    usage_history: VecDeque<UsageSample>,
}

impl QuotaMonitor {
    #[must_use]
    pub fn new(
        config: EngineConfig,
        store: KeyringStore,
        refresh_client: RefreshClient,
        prober: HealthProber,
    ) -> Self {
        Self {
            config,
            store,
            refresh_client,
            prober,
            usage_history: VecDeque::with_capacity(USAGE_HISTORY_MAX),
        }
    }

    /// Run until a termination signal arrives, sleeping `adaptive_interval`
    /// between ticks.
    pub async fn run(&mut self) {
        loop {
            let now = chrono::Utc::now().timestamp_millis();
            let peak_usage = self.tick(now).await;

            let interval = adaptive_interval(peak_usage);
            tracing::debug!(peak_usage, interval_secs = interval.as_secs(), "sleeping until next tick");

            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = wait_for_termination() => {
                    tracing::info!("quota monitor received termination signal, exiting after current tick");
                    break;
                }
            }
        }
    }

    /// Run one full tick, returning the active key's peak usage (0.0 if none).
    async fn tick(&mut self, now: i64) -> f64 {
        let mut keyring = self.store.load();

        self.probe_all(&mut keyring, now).await;
        self.refresh_expired(&mut keyring, now).await;

        let peak_usage = active_peak_usage(&keyring);
        self.push_sample(now, peak_usage);

        let velocity = compute_velocity(&self.usage_history);
        let current_interval = adaptive_interval(peak_usage);

        let mut pending_log_lines = Vec::new();

        if let Some(new_active) = select(&keyring, now) {
            if keyring.active_key_id.as_deref() != Some(new_active.as_str()) {
                pending_log_lines.push(self.rotate_to(&mut keyring, &new_active, now, false));
            }
        }

        if self.is_predictive(peak_usage, velocity, current_interval) {
            if let Some(target) = pick_predictive_target(&keyring, now) {
                pending_log_lines.push(self.rotate_to(&mut keyring, &target, now, true));
            }
        }

        self.store.save(&keyring);
        for line in pending_log_lines {
            self.store.write_human_log_line(&line);
        }
        peak_usage
    }

    async fn probe_all(&self, keyring: &mut Keyring, now: i64) {
        let targets: Vec<(String, String)> = keyring
            .keys
            .iter()
            .filter(|(_, r)| !matches!(r.status, KeyStatus::Invalid | KeyStatus::Expired))
            .map(|(id, r)| (id.clone(), r.access_token.clone()))
            .collect();

        let results = self.prober.probe_many(&targets, now).await;

        for (key_id, outcome) in results {
            let mut newly_exhausted = false;
            let mut unauthorized = false;
            {
                let Some(record) = keyring.keys.get_mut(&key_id) else {
                    continue;
                };
                match outcome {
                    ProbeOutcome::Valid(usage) => {
                        record.last_health_check = Some(now);
                        record.last_usage = Some(usage);
                        newly_exhausted = usage.max_usage() >= crate::selector::EXHAUSTED_THRESHOLD;
                        record.status = if newly_exhausted { KeyStatus::Exhausted } else { KeyStatus::Active };
                    }
                    ProbeOutcome::Unauthorized => {
                        record.status = KeyStatus::Invalid;
                        unauthorized = true;
                    }
                    ProbeOutcome::Transient(reason) => {
                        tracing::debug!(key_id = %key_id, reason = %reason, "transient probe failure");
                    }
                }
            }
            if newly_exhausted {
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
            } else if unauthorized {
                self.store.append_event(
                    keyring,
                    RotationEvent {
                        timestamp: now,
                        event: RotationEventKind::KeyRemoved,
                        key_id: Some(key_id),
                        reason: Some("unauthorized".to_string()),
                        from_key_id: None,
                        to_key_id: None,
                        account_email: None,
                        predictive: None,
                    },
                );
            }
        }
    }

    async fn refresh_expired(&self, keyring: &mut Keyring, now: i64) {
        let expired: Vec<String> = keyring
            .keys
            .iter()
            .filter(|(_, r)| r.status == KeyStatus::Expired && r.expires_at.is_some_and(|e| e < now))
            .map(|(id, _)| id.clone())
            .collect();

        for key_id in expired {
            let Some(refresh_token) = keyring.keys.get(&key_id).map(|r| r.refresh_token.clone()) else {
                continue;
            };

            match self.refresh_client.refresh(&refresh_token).await {
                Ok(RefreshOutcome::Refreshed { access_token, refresh_token, expires_at }) => {
                    if let Some(record) = keyring.keys.get_mut(&key_id) {
                        record.access_token = access_token;
                        record.refresh_token = refresh_token;
                        record.expires_at = Some(expires_at);
                        record.status = KeyStatus::Active;
                    }
                }
                Ok(RefreshOutcome::InvalidGrant) => {
                    if let Some(record) = keyring.keys.get_mut(&key_id) {
                        record.status = KeyStatus::Invalid;
                    }
                }
                Ok(RefreshOutcome::Transient(reason)) => {
                    tracing::debug!(key_id = %key_id, reason = %reason, "transient refresh failure during tick");
                }
                Err(e) => {
                    tracing::error!(key_id = %key_id, error = %e, "unexpected refresh error during tick");
                }
            }
        }
    }

    fn push_sample(&mut self, now: i64, usage: f64) {
        self.usage_history.push_back(UsageSample { timestamp: now, usage });
        while self.usage_history.len() > USAGE_HISTORY_MAX {
            self.usage_history.pop_front();
        }
    }

    fn is_predictive(&self, peak_usage: f64, velocity: f64, current_interval: Duration) -> bool {
        if peak_usage >= PROACTIVE_THRESHOLD || velocity <= 0.0 {
            return false;
        }
        let minutes_to_exhaustion = (100.0 - peak_usage) / velocity;
        let interval_minutes = current_interval.as_secs_f64() / 60.0;
        minutes_to_exhaustion < interval_minutes * 1.5
    }

    /// Switch the active key and write the active-credentials file. Returns
    /// the human-log line for the `key_switched` event without writing it;
    /// the caller writes it only once persistence of `keyring` has succeeded.
    #[must_use]
    fn rotate_to(&self, keyring: &mut Keyring, new_active: &str, now: i64, predictive: bool) -> String {
        let from = keyring.active_key_id.clone();
        keyring.active_key_id = Some(new_active.to_string());
        let line = self.store.append_event_deferred(
            keyring,
            RotationEvent {
                timestamp: now,
                event: RotationEventKind::KeySwitched,
                key_id: Some(new_active.to_string()),
                reason: Some(if predictive {
                    "quota_monitor_predictive".to_string()
                } else {
                    "quota_monitor".to_string()
                }),
                from_key_id: from,
                to_key_id: Some(new_active.to_string()),
                account_email: None,
                predictive: predictive.then_some(true),
            },
        );
        if let Err(e) = write_active_credentials(&self.config, keyring, new_active) {
            tracing::error!(error = %e, "failed to write active credentials file");
        }
        line
    }
}

/// Usable key other than the current active one with the lowest known usage,
/// for a forced predictive rotation. `None` if there's no better candidate.
fn pick_predictive_target(keyring: &Keyring, now: i64) -> Option<String> {
    let current = keyring.active_key_id.clone();
    let mut candidates: Vec<(String, i64, f64)> = keyring
        .keys
        .iter()
        .filter(|(id, r)| {
            Some((*id).as_str()) != current.as_deref()
                && matches!(r.status, KeyStatus::Active | KeyStatus::Exhausted)
        })
        .filter_map(|(id, r)| {
            let usage = r.last_usage?;
            let check = r.last_health_check?;
            if now.saturating_sub(check) > crate::selector::HEALTH_DATA_MAX_AGE_MS {
                return None;
            }
            if usage.max_usage() >= crate::selector::EXHAUSTED_THRESHOLD {
                return None;
            }
            Some((id.clone(), r.added_at, usage.max_usage()))
        })
        .collect();

    candidates.sort_by(|a, b| {
        a.2.partial_cmp(&b.2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
            .then_with(|| a.0.cmp(&b.0))
    });

    candidates.into_iter().next().map(|(id, _, _)| id)
}

fn active_peak_usage(keyring: &Keyring) -> f64 {
    keyring
        .active_key_id
        .as_deref()
        .and_then(|id| keyring.keys.get(id))
        .and_then(|r| r.last_usage)
        .map_or(0.0, |u| u.max_usage())
}

fn write_active_credentials(config: &EngineConfig, keyring: &Keyring, key_id: &str) -> std::io::Result<()> {
    let Some(record) = keyring.keys.get(key_id) else {
        return Ok(());
    };
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

async fn wait_for_termination() {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
