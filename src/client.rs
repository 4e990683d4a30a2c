use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{
    Clock, Credentials, SystemClock, TokenManager, API_VERSION, DEFAULT_TOKEN_SKEW,
};
use crate::error::{Error, Result};
use crate::rfid::StartAuth;
use crate::types::{
    format_timestamp, ChargePoint, ChargePointConnectorSettings, ChargePointSettings,
    ChargePointStatus, ChargingSession,
};

pub const API_BASE_URL: &str = "https://eapi.charge.space";

/// Operations every Charge Amps client offers.
#[async_trait]
pub trait ChargeAmpsApi: Send + Sync {
    /// All charge points owned by the account
    async fn get_chargepoints(&self) -> Result<Vec<ChargePoint>>;

    async fn get_chargepoint_status(&self, charge_point_id: &str) -> Result<ChargePointStatus>;

    async fn get_chargepoint_settings(&self, charge_point_id: &str)
        -> Result<ChargePointSettings>;

    async fn set_chargepoint_settings(&self, settings: &ChargePointSettings) -> Result<()>;

    async fn get_chargepoint_connector_settings(
        &self,
        charge_point_id: &str,
        connector_id: u32,
    ) -> Result<ChargePointConnectorSettings>;

    async fn set_chargepoint_connector_settings(
        &self,
        settings: &ChargePointConnectorSettings,
    ) -> Result<()>;

    /// Charging sessions, optionally limited to a time window
    async fn get_all_chargingsessions(
        &self,
        charge_point_id: &str,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChargingSession>>;

    async fn get_chargingsession(
        &self,
        charge_point_id: &str,
        session_id: u64,
    ) -> Result<ChargingSession>;

    async fn remote_start(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        start_auth: &StartAuth,
    ) -> Result<()>;

    async fn remote_stop(&self, charge_point_id: &str, connector_id: u32) -> Result<()>;

    async fn reboot(&self, charge_point_id: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: String,
    /// Renew tokens this long before they expire
    pub token_skew: Duration,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: API_BASE_URL.to_string(),
            token_skew: DEFAULT_TOKEN_SKEW,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// A single API call, relative to the versioned API prefix.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    headers: HeaderMap,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Header for this call only; it takes precedence over the shared ones.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

fn empty_body() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Client for the Charge Amps external API.
///
/// Cheap to share by reference across concurrent tasks: authentication state
/// lives in the [`TokenManager`] and is renewed transparently.
pub struct ChargeAmpsClient {
    http: reqwest::Client,
    base_url: String,
    tokens: TokenManager,
}

impl ChargeAmpsClient {
    pub fn new(credentials: Credentials) -> Result<Self> {
        Self::with_options(credentials, ClientOptions::default())
    }

    pub fn new_with_base_url(credentials: Credentials, base_url: String) -> Result<Self> {
        Self::with_options(
            credentials,
            ClientOptions {
                base_url,
                ..ClientOptions::default()
            },
        )
    }

    pub fn with_options(credentials: Credentials, options: ClientOptions) -> Result<Self> {
        Self::with_clock(credentials, options, Arc::new(SystemClock))
    }

    pub fn with_clock(
        credentials: Credentials,
        options: ClientOptions,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .connect_timeout(options.connect_timeout)
            .build()?;

        Ok(Self::with_http_client(http, credentials, &options, clock))
    }

    /// Build on an existing transport; the connection pool is shared with
    /// whoever else holds `http`.
    pub fn with_http_client(
        http: reqwest::Client,
        credentials: Credentials,
        options: &ClientOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let base_url = options.base_url.trim_end_matches('/').to_string();
        let tokens = TokenManager::new(
            http.clone(),
            &base_url,
            credentials,
            options.token_skew,
            clock,
        );

        Self {
            http,
            base_url,
            tokens,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token_manager(&self) -> &TokenManager {
        &self.tokens
    }

    /// Release the transport and forget the token.
    pub async fn shutdown(self) {
        debug!("Shutting down client for {}", self.base_url);
        self.tokens.clear().await;
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}{}", self.base_url, API_VERSION, path)
    }

    /// Issue an authenticated call.
    ///
    /// A 401 response invalidates the token used, re-authenticates and retries
    /// the call once. Every other non-2xx status is returned as
    /// [`Error::Http`] without retrying.
    pub async fn request(&self, request: &ApiRequest) -> Result<Response> {
        let authorization = self.tokens.ensure_valid().await?;
        let response = self.send(request, &authorization).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::check(request, response).await;
        }

        warn!(
            "{} {} was unauthorized, re-authenticating",
            request.method, request.path
        );
        self.tokens.invalidate(&authorization).await;
        let authorization = self.tokens.ensure_valid().await?;
        let response = self.send(request, &authorization).await?;

        Self::check(request, response).await
    }

    async fn send(&self, request: &ApiRequest, authorization: &HeaderValue) -> Result<Response> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, authorization.clone());
        headers.extend(request.headers.clone());

        let mut builder = self
            .http
            .request(request.method.clone(), self.url(&request.path))
            .headers(headers);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!("{} {}", request.method, request.path);
        Ok(builder.send().await?)
    }

    async fn check(request: &ApiRequest, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await?;
        error!(
            "{} {} failed with status {}: {}",
            request.method, request.path, status, body
        );
        Err(Error::Http { status, body })
    }

    pub(crate) async fn fetch<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
        context: &str,
    ) -> Result<T> {
        let response = self.request(&request).await?;
        let response_text = response.text().await?;

        serde_json::from_str::<T>(&response_text).map_err(|source| {
            error!("Failed to parse {}: {}", context, source);
            debug!("Raw response: {}", response_text);
            Error::Decode {
                context: context.to_string(),
                source,
            }
        })
    }

    pub(crate) async fn execute(&self, request: ApiRequest) -> Result<()> {
        self.request(&request).await?;
        Ok(())
    }
}

#[async_trait]
impl ChargeAmpsApi for ChargeAmpsClient {
    async fn get_chargepoints(&self) -> Result<Vec<ChargePoint>> {
        debug!("Fetching owned chargepoints");
        let chargepoints: Vec<ChargePoint> = self
            .fetch(ApiRequest::get("/chargepoints/owned"), "chargepoints")
            .await?;
        debug!("Found {} chargepoints", chargepoints.len());
        Ok(chargepoints)
    }

    async fn get_chargepoint_status(&self, charge_point_id: &str) -> Result<ChargePointStatus> {
        let path = format!("/chargepoints/{}/status", charge_point_id);
        self.fetch(ApiRequest::get(path), "chargepoint status").await
    }

    async fn get_chargepoint_settings(
        &self,
        charge_point_id: &str,
    ) -> Result<ChargePointSettings> {
        let path = format!("/chargepoints/{}/settings", charge_point_id);
        self.fetch(ApiRequest::get(path), "chargepoint settings").await
    }

    async fn set_chargepoint_settings(&self, settings: &ChargePointSettings) -> Result<()> {
        debug!("Updating settings for chargepoint {}", settings.id);
        let path = format!("/chargepoints/{}/settings", settings.id);
        self.execute(ApiRequest::put(path).json(settings)?).await
    }

    async fn get_chargepoint_connector_settings(
        &self,
        charge_point_id: &str,
        connector_id: u32,
    ) -> Result<ChargePointConnectorSettings> {
        let path = format!(
            "/chargepoints/{}/connectors/{}/settings",
            charge_point_id, connector_id
        );
        self.fetch(ApiRequest::get(path), "connector settings").await
    }

    async fn set_chargepoint_connector_settings(
        &self,
        settings: &ChargePointConnectorSettings,
    ) -> Result<()> {
        debug!(
            "Updating settings for connector {} on chargepoint {}",
            settings.connector_id, settings.charge_point_id
        );
        let path = format!(
            "/chargepoints/{}/connectors/{}/settings",
            settings.charge_point_id, settings.connector_id
        );
        self.execute(ApiRequest::put(path).json(settings)?).await
    }

    async fn get_all_chargingsessions(
        &self,
        charge_point_id: &str,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChargingSession>> {
        let mut request =
            ApiRequest::get(format!("/chargepoints/{}/chargingsessions", charge_point_id));
        if let Some(start) = start_time {
            request = request.query("startTime", format_timestamp(&start));
        }
        if let Some(end) = end_time {
            request = request.query("endTime", format_timestamp(&end));
        }
        self.fetch(request, "charging sessions").await
    }

    async fn get_chargingsession(
        &self,
        charge_point_id: &str,
        session_id: u64,
    ) -> Result<ChargingSession> {
        let path = format!(
            "/chargepoints/{}/chargingsessions/{}",
            charge_point_id, session_id
        );
        self.fetch(ApiRequest::get(path), "charging session").await
    }

    async fn remote_start(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        start_auth: &StartAuth,
    ) -> Result<()> {
        debug!(
            "Remote start of connector {} on chargepoint {} (transaction {})",
            connector_id, charge_point_id, start_auth.external_transaction_id
        );
        let path = format!(
            "/chargepoints/{}/connectors/{}/remotestart",
            charge_point_id, connector_id
        );
        self.execute(ApiRequest::put(path).json(start_auth)?).await
    }

    async fn remote_stop(&self, charge_point_id: &str, connector_id: u32) -> Result<()> {
        debug!(
            "Remote stop of connector {} on chargepoint {}",
            connector_id, charge_point_id
        );
        let path = format!(
            "/chargepoints/{}/connectors/{}/remotestop",
            charge_point_id, connector_id
        );
        self.execute(ApiRequest::put(path).json(&empty_body())?).await
    }

    async fn reboot(&self, charge_point_id: &str) -> Result<()> {
        debug!("Rebooting chargepoint {}", charge_point_id);
        let path = format!("/chargepoints/{}/reboot", charge_point_id);
        self.execute(ApiRequest::put(path).json(&empty_body())?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials::new("user@example.com", "mekmitasdigoat", "xyzzy")
    }

    #[test]
    fn test_client_creation() {
        let client = ChargeAmpsClient::new(credentials()).unwrap();
        assert_eq!(client.base_url(), "https://eapi.charge.space");
    }

    #[test]
    fn test_client_with_custom_base_url() {
        let client = ChargeAmpsClient::new_with_base_url(
            credentials(),
            "https://test.example.com/".to_string(),
        )
        .unwrap();
        assert_eq!(client.base_url(), "https://test.example.com");
        assert_eq!(
            client.url("/chargepoints/owned"),
            "https://test.example.com/api/v5/chargepoints/owned"
        );
    }

    #[test]
    fn test_default_options() {
        let options = ClientOptions::default();
        assert_eq!(options.base_url, API_BASE_URL);
        assert_eq!(options.token_skew, Duration::from_secs(30));
    }

    #[test]
    fn test_api_request_builder() {
        let request = ApiRequest::get("/chargepoints/cp1/chargingsessions")
            .query("startTime", "2024-01-01T00:00:00")
            .header(
                HeaderName::from_static("x-trace"),
                HeaderValue::from_static("abc"),
            );

        assert_eq!(*request.method(), Method::GET);
        assert_eq!(request.path(), "/chargepoints/cp1/chargingsessions");
        assert_eq!(request.query.len(), 1);
        assert_eq!(request.headers["x-trace"], "abc");
        assert!(request.body.is_none());
    }

    #[test]
    fn test_empty_body_is_object() {
        let request = ApiRequest::put("/chargepoints/cp1/reboot")
            .json(&empty_body())
            .unwrap();
        assert_eq!(request.body, Some(serde_json::json!({})));
    }

    #[tokio::test]
    async fn test_shutdown_consumes_client() {
        let client = ChargeAmpsClient::new(credentials()).unwrap();
        client.shutdown().await;
    }
}
