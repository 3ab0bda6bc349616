//! Access-token lifecycle for the Hanteo API.
//!
//! States: Unauthenticated → (handshake) → Valid → (safety margin reached,
//! or the server rejects the token) → Unauthenticated. The state mutex is
//! held across the handshake so concurrent `ensure_valid` callers await one
//! in-flight authentication instead of issuing duplicates.

use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Url};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::hanteo::model::{codes, Envelope, TokenData};
use crate::hanteo::HanteoError;

/// Lead time before actual expiry at which a token is treated as invalid.
const SAFETY_MARGIN_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct AuthToken {
    pub value: String,
    pub token_kind: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthToken {
    fn is_usable(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(SAFETY_MARGIN_SECS) < self.expires_at
    }
}

pub struct TokenManager {
    http: Client,
    base_url: Url,
    client_key: String,
    state: Mutex<Option<AuthToken>>,
    clock: Clock,
}

impl TokenManager {
    pub fn new(http: Client, base_url: Url, client_key: String, clock: Clock) -> Self {
        Self {
            http,
            base_url,
            client_key,
            state: Mutex::new(None),
            clock,
        }
    }

    /// Returns a usable token value, performing the client-credentials
    /// handshake first if the current token is absent or inside the safety
    /// margin. No-op when the token is still valid.
    pub async fn ensure_valid(&self) -> Result<String, HanteoError> {
        let mut state = self.state.lock().await;
        if let Some(token) = state.as_ref() {
            if token.is_usable(self.clock.now()) {
                return Ok(token.value.clone());
            }
            debug!("token inside safety margin; re-authenticating");
        }
        let token = self.authenticate().await?;
        let value = token.value.clone();
        *state = Some(token);
        Ok(value)
    }

    /// Drops the current token. Called when the server signals an
    /// invalid/expired token so the next `ensure_valid` re-authenticates.
    pub async fn invalidate(&self) {
        *self.state.lock().await = None;
    }

    async fn authenticate(&self) -> Result<AuthToken, HanteoError> {
        let url = self
            .base_url
            .join("oauth/token")
            .map_err(|e| HanteoError::InvalidBaseUrl(e.to_string()))?;
        let res = self
            .http
            .post(url)
            .query(&[("grant_type", "client_credentials")])
            .header(reqwest::header::AUTHORIZATION, format!("Basic {}", self.client_key))
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(HanteoError::AuthFailed {
                code: i64::from(status.as_u16()),
                message: res.text().await.unwrap_or_default(),
            });
        }

        let body = res.text().await?;
        let envelope: Envelope<TokenData> =
            serde_json::from_str(&body).map_err(|e| HanteoError::Deserialize {
                context: "token response".into(),
                source: e,
            })?;
        if envelope.code != codes::SUCCESS {
            return Err(HanteoError::AuthFailed {
                code: envelope.code,
                message: envelope.message.unwrap_or_default(),
            });
        }
        let data = envelope.result_data.ok_or_else(|| HanteoError::AuthFailed {
            code: envelope.code,
            message: "token response missing resultData".into(),
        })?;

        let expires_at = self.clock.now() + Duration::seconds(data.expires_in);
        info!(expires_at = %expires_at, "authenticated against chart API");
        Ok(AuthToken {
            value: data.access_token,
            token_kind: data.token_type,
            expires_at,
        })
    }
}
