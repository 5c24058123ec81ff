//! Health probing: query the provider's usage endpoint and classify the result.

use std::time::Duration;

use serde::Deserialize;

use crate::keyring::UsageSnapshot;

const ANTHROPIC_BETA_HEADER: &str = "oauth-2025-04-20";
const USER_AGENT: &str = "rotation-engine/1.0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of probing one credential's usage.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// 2xx, parsed utilization.
    Valid(UsageSnapshot),
    /// 401: the access token is no longer accepted by the provider.
    Unauthorized,
    /// Anything else: wrong status, network error, parse failure. No status
    /// change; retried next tick.
    Transient(String),
}

#[derive(Debug, Default, Deserialize)]
struct UsageResponse {
    #[serde(default)]
    five_hour: BucketField,
    #[serde(default)]
    seven_day: BucketField,
    #[serde(default)]
    seven_day_sonnet: BucketField,
}

#[derive(Debug, Default, Deserialize)]
struct BucketField {
    #[serde(default)]
    utilization: f64,
}

/// Minimal account identity, from the best-effort profile lookup.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountProfile {
    pub uuid: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    account: AccountProfile,
}

/// Issues authenticated `GET` requests to the provider's usage and profile
/// endpoints.
pub struct HealthProber {
    http: reqwest::Client,
    provider_base_url: String,
}

impl HealthProber {
    #[must_use]
    pub fn new(http: reqwest::Client, provider_base_url: String) -> Self {
        Self {
            http,
            provider_base_url,
        }
    }

    /// Probe a single key's usage. `now` is the timestamp stamped onto a
    /// successful result's `checked_at`.
    pub async fn probe_usage(&self, access_token: &str, now: i64) -> ProbeOutcome {
        let url = format!("{}/usage", self.provider_base_url);

        let request = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .header("anthropic-beta", ANTHROPIC_BETA_HEADER)
            .header("Content-Type", "application/json")
            .header("User-Agent", USER_AGENT)
            .timeout(REQUEST_TIMEOUT);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return ProbeOutcome::Transient(e.to_string()),
        };

        let status = response.status();

        if status.as_u16() == 401 {
            return ProbeOutcome::Unauthorized;
        }

        if !status.is_success() {
            return ProbeOutcome::Transient(format!("http_{}", status.as_u16()));
        }

        match response.json::<UsageResponse>().await {
            Ok(body) => ProbeOutcome::Valid(UsageSnapshot {
                five_hour: body.five_hour.utilization,
                seven_day: body.seven_day.utilization,
                seven_day_sonnet: body.seven_day_sonnet.utilization,
                checked_at: now,
            }),
            Err(e) => ProbeOutcome::Transient(e.to_string()),
        }
    }

    /// Best-effort account identity lookup. Any failure yields `None`,
    /// logged at debug, never propagated.
    pub async fn fetch_profile(&self, access_token: &str) -> Option<AccountProfile> {
        let url = format!("{}/oauth/profile", self.provider_base_url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .inspect_err(|e| tracing::debug!(error = %e, "profile lookup request failed"))
            .ok()?;

        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), "profile lookup returned non-200");
            return None;
        }

        response
            .json::<ProfileResponse>()
            .await
            .inspect_err(|e| tracing::debug!(error = %e, "profile lookup body unparseable"))
            .ok()
            .map(|body| body.account)
    }

    /// Probe every given `(key_id, access_token)` pair concurrently, joined
    /// before returning. Callers wrap this in a per-tick deadline.
    pub async fn probe_many(&self, keys: &[(String, String)], now: i64) -> Vec<(String, ProbeOutcome)> {
        let futures = keys.iter().map(|(key_id, access_token)| {
            let key_id = key_id.clone();
            async move {
                let outcome = self.probe_usage(access_token, now).await;
                (key_id, outcome)
            }
        });
        futures::future::join_all(futures).await
    }
}
