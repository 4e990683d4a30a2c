//! Organisation level API, available to accounts with the organisations
//! feature enabled.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::ops::Deref;

use crate::auth::Credentials;
use crate::client::{ApiRequest, ChargeAmpsApi, ChargeAmpsClient, ClientOptions};
use crate::error::{Error, Result};
use crate::rfid::{Rfid, RfidFormat, StartAuth};
use crate::types::{
    format_timestamp, timestamp, ChargePoint, ChargePointConnectorSettings, ChargePointSettings,
    ChargePointStatus, ChargingSession,
};

pub const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organisation {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partner {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// An RFID tag as registered with an organisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RfidTag {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub rfid: Option<String>,
    #[serde(default)]
    pub rfid_length: Option<u8>,
    #[serde(default)]
    pub rfid_format: Option<RfidFormat>,
    #[serde(default)]
    pub rfid_dec: Option<String>,
    #[serde(default)]
    pub rfid_dec_reverse: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub mobile: Option<String>,
    #[serde(default)]
    pub rfid_tags: Option<Vec<RfidTag>>,
    #[serde(default)]
    pub user_status: Option<String>,
}

/// Payload for creating or updating an organisation user.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rfid_tags: Vec<Rfid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl NewUser {
    pub fn validate(&self) -> Result<()> {
        match &self.password {
            Some(password) if password.chars().count() < MIN_PASSWORD_LENGTH => {
                Err(Error::Validation(format!(
                    "The provided password is too short, must be at least {} characters",
                    MIN_PASSWORD_LENGTH
                )))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganisationChargingSession {
    pub id: String,
    pub charge_point_id: String,
    pub connector_id: u32,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub rfid: Option<String>,
    #[serde(default)]
    pub rfid_length: Option<u8>,
    #[serde(default)]
    pub rfid_format: Option<RfidFormat>,
    #[serde(default)]
    pub rfid_dec: Option<String>,
    #[serde(default)]
    pub rfid_dec_reverse: Option<String>,
    #[serde(default)]
    pub organisation_id: Option<String>,
    pub session_type: String,
    #[serde(default, with = "timestamp")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub external_transaction_id: Option<String>,
    pub total_consumption_kwh: f64,
    #[serde(default)]
    pub external_id: Option<String>,
}

/// Filter for organisation charging sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionQuery {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub rfid: Option<Rfid>,
}

impl SessionQuery {
    fn apply(&self, mut request: ApiRequest) -> ApiRequest {
        if let Some(start) = &self.start_time {
            request = request.query("startTime", format_timestamp(start));
        }
        if let Some(end) = &self.end_time {
            request = request.query("endTime", format_timestamp(end));
        }
        if let Some(rfid) = &self.rfid {
            for (key, value) in rfid.query_params() {
                request = request.query(key, value);
            }
        }
        request
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UserQuery {
    /// Include each user's RFID tags
    pub expand_rfid: bool,
    pub rfid_decimal_format_length: Option<u32>,
}

impl UserQuery {
    fn apply(&self, mut request: ApiRequest) -> ApiRequest {
        if let Some(len) = self.rfid_decimal_format_length {
            request = request.query("rfidDecimalFormatLength", len);
        }
        if self.expand_rfid {
            request = request.query("expand", "rfid");
        }
        request
    }
}

#[async_trait]
pub trait OrganisationApi: ChargeAmpsApi {
    async fn get_organisations(&self) -> Result<Vec<Organisation>>;

    async fn get_organisation(&self, org_id: &str) -> Result<Organisation>;

    async fn get_organisation_chargepoints(&self, org_id: &str) -> Result<Vec<ChargePoint>>;

    async fn get_organisation_chargepoint_statuses(
        &self,
        org_id: &str,
    ) -> Result<Vec<ChargePointStatus>>;

    async fn get_organisation_charging_sessions(
        &self,
        org_id: &str,
        query: &SessionQuery,
    ) -> Result<Vec<OrganisationChargingSession>>;

    async fn get_partner(&self, org_id: &str) -> Result<Partner>;

    async fn get_organisation_rfids(&self, org_id: &str) -> Result<Vec<RfidTag>>;

    async fn add_organisation_rfid(&self, org_id: &str, rfid: &Rfid) -> Result<()>;

    async fn get_organisation_rfid(&self, org_id: &str, rfid: &Rfid) -> Result<RfidTag>;

    async fn revoke_organisation_rfid(&self, org_id: &str, rfid: &Rfid) -> Result<()>;

    async fn get_organisation_users(&self, org_id: &str, query: &UserQuery) -> Result<Vec<User>>;

    async fn get_organisation_user(
        &self,
        org_id: &str,
        user_id: &str,
        query: &UserQuery,
    ) -> Result<User>;

    async fn add_organisation_user(&self, org_id: &str, user: &NewUser) -> Result<User>;

    async fn update_organisation_user(
        &self,
        org_id: &str,
        user_id: &str,
        user: &NewUser,
    ) -> Result<User>;
}

/// Client for accounts with organisation access. Derefs to the plain
/// [`ChargeAmpsClient`] it wraps.
pub struct OrganisationClient {
    client: ChargeAmpsClient,
}

impl OrganisationClient {
    pub fn new(credentials: Credentials) -> Result<Self> {
        Ok(Self::from_client(ChargeAmpsClient::new(credentials)?))
    }

    pub fn with_options(credentials: Credentials, options: ClientOptions) -> Result<Self> {
        Ok(Self::from_client(ChargeAmpsClient::with_options(
            credentials,
            options,
        )?))
    }

    pub fn from_client(client: ChargeAmpsClient) -> Self {
        Self { client }
    }

    pub async fn shutdown(self) {
        self.client.shutdown().await
    }
}

impl Deref for OrganisationClient {
    type Target = ChargeAmpsClient;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[async_trait]
impl ChargeAmpsApi for OrganisationClient {
    async fn get_chargepoints(&self) -> Result<Vec<ChargePoint>> {
        self.client.get_chargepoints().await
    }

    async fn get_chargepoint_status(&self, charge_point_id: &str) -> Result<ChargePointStatus> {
        self.client.get_chargepoint_status(charge_point_id).await
    }

    async fn get_chargepoint_settings(
        &self,
        charge_point_id: &str,
    ) -> Result<ChargePointSettings> {
        self.client.get_chargepoint_settings(charge_point_id).await
    }

    async fn set_chargepoint_settings(&self, settings: &ChargePointSettings) -> Result<()> {
        self.client.set_chargepoint_settings(settings).await
    }

    async fn get_chargepoint_connector_settings(
        &self,
        charge_point_id: &str,
        connector_id: u32,
    ) -> Result<ChargePointConnectorSettings> {
        self.client
            .get_chargepoint_connector_settings(charge_point_id, connector_id)
            .await
    }

    async fn set_chargepoint_connector_settings(
        &self,
        settings: &ChargePointConnectorSettings,
    ) -> Result<()> {
        self.client
            .set_chargepoint_connector_settings(settings)
            .await
    }

    async fn get_all_chargingsessions(
        &self,
        charge_point_id: &str,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChargingSession>> {
        self.client
            .get_all_chargingsessions(charge_point_id, start_time, end_time)
            .await
    }

    async fn get_chargingsession(
        &self,
        charge_point_id: &str,
        session_id: u64,
    ) -> Result<ChargingSession> {
        self.client
            .get_chargingsession(charge_point_id, session_id)
            .await
    }

    async fn remote_start(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        start_auth: &StartAuth,
    ) -> Result<()> {
        self.client
            .remote_start(charge_point_id, connector_id, start_auth)
            .await
    }

    async fn remote_stop(&self, charge_point_id: &str, connector_id: u32) -> Result<()> {
        self.client.remote_stop(charge_point_id, connector_id).await
    }

    async fn reboot(&self, charge_point_id: &str) -> Result<()> {
        self.client.reboot(charge_point_id).await
    }
}

#[async_trait]
impl OrganisationApi for OrganisationClient {
    async fn get_organisations(&self) -> Result<Vec<Organisation>> {
        self.client
            .fetch(ApiRequest::get("/organisations"), "organisations")
            .await
    }

    async fn get_organisation(&self, org_id: &str) -> Result<Organisation> {
        let path = format!("/organisations/{}", org_id);
        self.client.fetch(ApiRequest::get(path), "organisation").await
    }

    async fn get_organisation_chargepoints(&self, org_id: &str) -> Result<Vec<ChargePoint>> {
        let path = format!("/organisations/{}/chargepoints", org_id);
        self.client
            .fetch(ApiRequest::get(path), "organisation chargepoints")
            .await
    }

    async fn get_organisation_chargepoint_statuses(
        &self,
        org_id: &str,
    ) -> Result<Vec<ChargePointStatus>> {
        let path = format!("/organisations/{}/chargepoints/statuses", org_id);
        self.client
            .fetch(ApiRequest::get(path), "organisation chargepoint statuses")
            .await
    }

    async fn get_organisation_charging_sessions(
        &self,
        org_id: &str,
        query: &SessionQuery,
    ) -> Result<Vec<OrganisationChargingSession>> {
        let path = format!("/organisations/{}/chargingsessions", org_id);
        let request = query.apply(ApiRequest::get(path));
        self.client
            .fetch(request, "organisation charging sessions")
            .await
    }

    async fn get_partner(&self, org_id: &str) -> Result<Partner> {
        let path = format!("/organisations/{}/partner", org_id);
        self.client.fetch(ApiRequest::get(path), "partner").await
    }

    async fn get_organisation_rfids(&self, org_id: &str) -> Result<Vec<RfidTag>> {
        let path = format!("/organisations/{}/rfids", org_id);
        self.client
            .fetch(ApiRequest::get(path), "organisation rfids")
            .await
    }

    async fn add_organisation_rfid(&self, org_id: &str, rfid: &Rfid) -> Result<()> {
        debug!("Adding RFID tag to organisation {}", org_id);
        let path = format!("/organisations/{}/rfids", org_id);
        self.client.execute(ApiRequest::put(path).json(rfid)?).await
    }

    async fn get_organisation_rfid(&self, org_id: &str, rfid: &Rfid) -> Result<RfidTag> {
        let path = format!("/organisations/{}/rfids/{}", org_id, rfid.value());
        let request = ApiRequest::get(path)
            .query("rfidFormat", rfid.format())
            .query("rfidLength", rfid.length());
        self.client.fetch(request, "organisation rfid").await
    }

    async fn revoke_organisation_rfid(&self, org_id: &str, rfid: &Rfid) -> Result<()> {
        debug!("Revoking RFID tag in organisation {}", org_id);
        let path = format!("/organisations/{}/rfids/revoke", org_id);
        self.client.execute(ApiRequest::put(path).json(rfid)?).await
    }

    async fn get_organisation_users(&self, org_id: &str, query: &UserQuery) -> Result<Vec<User>> {
        let path = format!("/organisations/{}/users", org_id);
        let request = query.apply(ApiRequest::get(path));
        self.client.fetch(request, "organisation users").await
    }

    async fn get_organisation_user(
        &self,
        org_id: &str,
        user_id: &str,
        query: &UserQuery,
    ) -> Result<User> {
        let path = format!("/organisations/{}/users/{}", org_id, user_id);
        let request = query.apply(ApiRequest::get(path));
        self.client.fetch(request, "organisation user").await
    }

    async fn add_organisation_user(&self, org_id: &str, user: &NewUser) -> Result<User> {
        user.validate()?;
        debug!("Adding user to organisation {}", org_id);
        let path = format!("/organisations/{}/users", org_id);
        self.client
            .fetch(ApiRequest::post(path).json(user)?, "organisation user")
            .await
    }

    async fn update_organisation_user(
        &self,
        org_id: &str,
        user_id: &str,
        user: &NewUser,
    ) -> Result<User> {
        user.validate()?;
        debug!("Updating user {} in organisation {}", user_id, org_id);
        let path = format!("/organisations/{}/users/{}", org_id, user_id);
        self.client
            .fetch(ApiRequest::put(path).json(user)?, "organisation user")
            .await
    }
}
