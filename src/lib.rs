pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod organisation;
pub mod rfid;
pub mod types;

pub use auth::{Clock, Credentials, SystemClock, TokenManager, TokenStatus};
pub use client::{ApiRequest, ChargeAmpsApi, ChargeAmpsClient, ClientOptions};
pub use error::{Error, Result};
pub use organisation::{OrganisationApi, OrganisationClient};
pub use rfid::{Rfid, RfidFormat, StartAuth};
pub use types::{
    ChargePoint, ChargePointConnectorSettings, ChargePointSettings, ChargePointStatus,
    ChargingSession,
};
