//! OAuth refresh-token exchange.

use serde::Deserialize;

use crate::error::Result;

/// Outcome of a refresh attempt. A tagged union, not a sentinel string or
/// falsy value: every caller must match all three arms explicitly.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum RefreshOutcome {
    /// The provider issued a new access token.
    Refreshed {
        access_token: String,
        refresh_token: String,
        expires_at: i64,
    },
    /// The refresh token has been revoked; this is terminal.
    InvalidGrant,
    /// Anything else: network error, non-200/400 status, unparseable body.
    /// Callers leave the key's status unchanged and retry next tick.
    Transient(String),
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
}

const DEFAULT_EXPIRY_SECONDS: i64 = 3600;

/// Exchanges a refresh token for a new access token against the provider's
/// token endpoint.
pub struct RefreshClient {
    http: reqwest::Client,
    provider_base_url: String,
    oauth_client_id: String,
}

impl RefreshClient {
    #[must_use]
    pub fn new(http: reqwest::Client, provider_base_url: String, oauth_client_id: String) -> Self {
        Self {
            http,
            provider_base_url,
            oauth_client_id,
        }
    }

    /// Attempt to refresh `refresh_token`. Never returns an `Err` for
    /// provider-side failures — those are folded into [`RefreshOutcome::Transient`]
    /// or [`RefreshOutcome::InvalidGrant`]; `Err` is reserved for truly
    /// unexpected internal states.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshOutcome> {
        let url = format!("{}/oauth/token", self.provider_base_url);
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.oauth_client_id.as_str()),
        ];

        let response = match self.http.post(&url).form(&form).send().await {
            Ok(response) => response,
            Err(e) => return Ok(RefreshOutcome::Transient(e.to_string())),
        };

        let status = response.status();

        if status.is_success() {
            return match response.json::<TokenResponse>().await {
                Ok(body) => Ok(Self::refreshed_from(body)),
                Err(e) => Ok(RefreshOutcome::Transient(format!(
                    "failed to parse token response: {e}"
                ))),
            };
        }

        if status.as_u16() == 400 {
            let body = response.text().await.unwrap_or_default();
            return match serde_json::from_str::<OAuthErrorBody>(&body) {
                Ok(err) if err.error == "invalid_grant" => Ok(RefreshOutcome::InvalidGrant),
                Ok(err) => Ok(RefreshOutcome::Transient(format!("oauth error: {}", err.error))),
                Err(_) => Ok(RefreshOutcome::Transient(format!(
                    "400 response with unparseable body: {body}"
                ))),
            };
        }

        Ok(RefreshOutcome::Transient(format!(
            "unexpected refresh status: {status}"
        )))
    }

    fn refreshed_from(body: TokenResponse) -> RefreshOutcome {
        let expires_in = body.expires_in.unwrap_or(DEFAULT_EXPIRY_SECONDS);
        let expires_at = chrono::Utc::now().timestamp_millis() + expires_in * 1000;
        RefreshOutcome::Refreshed {
            refresh_token: body.refresh_token.unwrap_or_default(),
            access_token: body.access_token,
            expires_at,
        }
    }
}
