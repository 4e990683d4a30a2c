//! Bearer token lifecycle.
//!
//! [`TokenManager`] owns the credentials and the current token pair. Callers
//! ask it for a valid `Authorization` header before every request; it logs in,
//! refreshes or does nothing as needed. Renewal is serialized per manager, so
//! any number of concurrent callers that find the token stale share a single
//! login/refresh round-trip.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use log::{debug, error, info, warn};
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use crate::error::{Error, Result};

pub const API_VERSION: &str = "v5";

/// Default margin subtracted from a token's expiry.
pub const DEFAULT_TOKEN_SKEW: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct Credentials {
    email: String,
    password: String,
    api_key: String,
}

impl Credentials {
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            api_key: api_key.into(),
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Source of the current time in unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    token: &'a str,
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    token: String,
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    exp: i64,
}

/// Read the `exp` claim of a JWT without verifying its signature.
///
/// The signing key is the server's; the expiry is only used to decide when to
/// renew. A token without `exp` yields 0, i.e. already expired.
pub fn decode_expiry(token: &str) -> Result<i64> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims.exp)
        .map_err(|e| Error::Authentication(format!("Unable to decode token: {}", e)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    NoToken,
    Valid,
    Expired,
}

#[derive(Default)]
struct TokenState {
    token: Option<String>,
    refresh_token: Option<String>,
    expires_at: i64,
    authorization: Option<HeaderValue>,
}

pub struct TokenManager {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    skew: i64,
    clock: Arc<dyn Clock>,
    state: RwLock<TokenState>,
    renewal: Mutex<()>,
}

impl TokenManager {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        credentials: Credentials,
        skew: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            skew: i64::try_from(skew.as_secs()).unwrap_or(i64::MAX),
            clock,
            state: RwLock::new(TokenState::default()),
            renewal: Mutex::new(()),
        }
    }

    fn is_fresh(&self, expires_at: i64) -> bool {
        expires_at.saturating_sub(self.skew) > self.clock.now()
    }

    pub async fn status(&self) -> TokenStatus {
        let state = self.state.read().await;
        match state.authorization {
            None => TokenStatus::NoToken,
            Some(_) if self.is_fresh(state.expires_at) => TokenStatus::Valid,
            Some(_) => TokenStatus::Expired,
        }
    }

    /// Decoded expiry of the current token, if there is one.
    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        let state = self.state.read().await;
        state
            .token
            .as_ref()
            .and_then(|_| DateTime::from_timestamp(state.expires_at, 0))
    }

    async fn current(&self) -> Option<HeaderValue> {
        let state = self.state.read().await;
        if self.is_fresh(state.expires_at) {
            state.authorization.clone()
        } else {
            None
        }
    }

    /// Make sure a token that is valid beyond the skew is installed and return
    /// its `Authorization` header value.
    pub async fn ensure_valid(&self) -> Result<HeaderValue> {
        if let Some(authorization) = self.current().await {
            return Ok(authorization);
        }

        {
            let state = self.state.read().await;
            if state.token.is_none() {
                info!("Token not found");
            } else if state.expires_at > 0 {
                info!("Token expired");
            }
        }

        let _renewal = self.renewal.lock().await;

        // Another caller may have renewed while we waited for the lock.
        if let Some(authorization) = self.current().await {
            debug!("Token renewed by a concurrent request");
            return Ok(authorization);
        }

        self.renew().await
    }

    /// Force renewal on the next [`ensure_valid`](Self::ensure_valid), unless
    /// `rejected` has already been replaced by a newer token.
    pub async fn invalidate(&self, rejected: &HeaderValue) {
        let mut state = self.state.write().await;
        if state.authorization.as_ref() == Some(rejected) {
            info!("Token rejected by server");
            state.expires_at = 0;
        }
    }

    /// Drop all token state.
    pub async fn clear(&self) {
        *self.state.write().await = TokenState::default();
    }

    // Must be called with the renewal lock held. A new token is only written
    // once its network call has finished. A failed refresh drops the token
    // pair so the next attempt goes straight to login.
    async fn renew(&self) -> Result<HeaderValue> {
        let (token, refresh_token) = {
            let state = self.state.read().await;
            (state.token.clone(), state.refresh_token.clone())
        };

        let mut renewed = None;
        if let (Some(token), Some(refresh_token)) = (token, refresh_token) {
            info!("Found refresh token, try refresh");
            match self.refresh(&token, &refresh_token).await {
                Ok(response) => {
                    debug!("Refresh successful");
                    renewed = Some(response);
                }
                Err(e) => {
                    warn!("Token refresh failed: {}", e);
                    self.clear().await;
                }
            }
        }

        let response = match renewed {
            Some(response) => response,
            None => {
                debug!("Try login");
                match self.login().await {
                    Ok(response) => {
                        debug!("Login successful");
                        response
                    }
                    Err(e) => {
                        error!("Login failed: {}", e);
                        self.clear().await;
                        return Err(e);
                    }
                }
            }
        };

        self.install(response).await
    }

    async fn install(&self, response: TokenResponse) -> Result<HeaderValue> {
        let expires_at = decode_expiry(&response.token).unwrap_or_else(|e| {
            warn!("{}", e);
            0
        });

        if !self.is_fresh(expires_at) {
            error!("Server issued a token that is already expired");
            self.clear().await;
            return Err(Error::Authentication(
                "Server issued a token that is already expired".to_string(),
            ));
        }

        let mut authorization = HeaderValue::from_str(&format!("Bearer {}", response.token))
            .map_err(|_| {
                Error::Authentication("Token contains invalid header characters".to_string())
            })?;
        authorization.set_sensitive(true);

        let mut state = self.state.write().await;
        *state = TokenState {
            token: Some(response.token),
            refresh_token: Some(response.refresh_token),
            expires_at,
            authorization: Some(authorization.clone()),
        };
        debug!(
            "Token valid until {}",
            DateTime::from_timestamp(expires_at, 0).unwrap_or_default()
        );

        Ok(authorization)
    }

    fn auth_url(&self, endpoint: &str) -> String {
        format!("{}/api/{}/auth/{}", self.base_url, API_VERSION, endpoint)
    }

    async fn login(&self) -> Result<TokenResponse> {
        let request = LoginRequest {
            email: &self.credentials.email,
            password: &self.credentials.password,
        };

        let response = self
            .http
            .post(self.auth_url("login"))
            .header("apiKey", &self.credentials.api_key)
            .json(&request)
            .send()
            .await?;

        Self::token_response(response, "login").await
    }

    async fn refresh(&self, token: &str, refresh_token: &str) -> Result<TokenResponse> {
        let request = RefreshRequest {
            token,
            refresh_token,
        };

        let response = self
            .http
            .post(self.auth_url("refreshToken"))
            .header("apiKey", &self.credentials.api_key)
            .json(&request)
            .send()
            .await?;

        Self::token_response(response, "refresh").await
    }

    async fn token_response(response: reqwest::Response, action: &str) -> Result<TokenResponse> {
        let status = response.status();
        let response_text = response.text().await?;

        if !status.is_success() {
            debug!("Token {} failed with status: {}", action, status);
            return Err(Error::Authentication(format!(
                "Token {} failed with status {}: {}",
                action, status, response_text
            )));
        }

        serde_json::from_str::<TokenResponse>(&response_text).map_err(|e| {
            Error::Authentication(format!("Failed to parse {} response: {}", action, e))
        })
    }
}
