#![allow(dead_code)]

use chargeamps::{ChargeAmpsClient, Clock, ClientOptions, Credentials};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const EMAIL: &str = "user@example.com";
pub const PASSWORD: &str = "mekmitasdigoat";
pub const API_KEY: &str = "xyzzy";

/// Fixed starting point for test clocks.
pub const NOW: i64 = 1_700_000_000;

pub const LOGIN_PATH: &str = "/api/v5/auth/login";
pub const REFRESH_PATH: &str = "/api/v5/auth/refreshToken";

/// Clock that only moves when told to.
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now: i64) -> Arc<Self> {
        Arc::new(Self(AtomicI64::new(now)))
    }

    pub fn set(&self, now: i64) {
        self.0.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    sub: &'a str,
    exp: i64,
}

/// Mint a signed JWT; `subject` keeps tokens with the same expiry apart.
pub fn token(subject: &str, exp: i64) -> String {
    encode(
        &Header::default(),
        &Claims { sub: subject, exp },
        &EncodingKey::from_secret(b"server-secret"),
    )
    .unwrap()
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

pub fn token_response(token: &str, refresh_token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "token": token,
        "refreshToken": refresh_token,
        "user": {"id": "u1", "email": EMAIL}
    }))
}

/// Login mock matching the configured credentials.
pub fn login() -> wiremock::MockBuilder {
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .and(header("apiKey", API_KEY))
        .and(body_json(json!({"email": EMAIL, "password": PASSWORD})))
}

pub fn refresh(token: &str, refresh_token: &str) -> wiremock::MockBuilder {
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(header("apiKey", API_KEY))
        .and(body_json(
            json!({"token": token, "refreshToken": refresh_token}),
        ))
}

pub fn credentials() -> Credentials {
    Credentials::new(EMAIL, PASSWORD, API_KEY)
}

pub fn client(server: &MockServer, clock: Arc<ManualClock>) -> ChargeAmpsClient {
    let options = ClientOptions {
        base_url: server.uri(),
        ..ClientOptions::default()
    };
    ChargeAmpsClient::with_clock(credentials(), options, clock).unwrap()
}

pub fn chargepoints_body() -> serde_json::Value {
    json!([{
        "id": "2012000123",
        "name": "Garage",
        "password": "12345678",
        "type": "HALO",
        "isLoadbalanced": false,
        "firmwareVersion": "1.2.3",
        "hardwareVersion": "A",
        "connectors": [
            {"chargePointId": "2012000123", "connectorId": 1, "type": "Type2"},
            {"chargePointId": "2012000123", "connectorId": 2, "type": "Schuko"}
        ]
    }])
}

pub fn status_body() -> serde_json::Value {
    json!({
        "id": "2012000123",
        "status": "Online",
        "connectorStatuses": [
            {
                "chargePointId": "2012000123",
                "connectorId": 1,
                "totalConsumptionKwh": 12.5,
                "status": "Charging",
                "measurements": [{"phase": "L1", "current": 15.8, "voltage": 231.0}],
                "startTime": "2024-03-01T18:00:00",
                "sessionId": "991"
            },
            {
                "chargePointId": "2012000123",
                "connectorId": 2,
                "totalConsumptionKwh": 0.0,
                "status": "Available",
                "measurements": null
            }
        ]
    })
}

pub fn connector_settings_body(connector_id: u32, max_current: f64) -> serde_json::Value {
    json!({
        "chargePointId": "2012000123",
        "connectorId": connector_id,
        "mode": "On",
        "rfidLock": true,
        "cableLock": false,
        "maxCurrent": max_current
    })
}
