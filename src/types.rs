use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargePointConnector {
    pub charge_point_id: String,
    pub connector_id: u32,
    #[serde(rename = "type")]
    pub connector_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargePoint {
    pub id: String,
    pub name: String,
    pub password: String,
    #[serde(rename = "type")]
    pub charge_point_type: String,
    pub is_loadbalanced: bool,
    pub firmware_version: String,
    pub hardware_version: String,
    pub connectors: Vec<ChargePointConnector>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargePointMeasurement {
    pub phase: String,
    pub current: f64,
    pub voltage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargePointConnectorStatus {
    pub charge_point_id: String,
    pub connector_id: u32,
    pub total_consumption_kwh: f64,
    pub status: String,
    pub measurements: Option<Vec<ChargePointMeasurement>>,
    #[serde(default, with = "timestamp")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargePointStatus {
    pub id: String,
    pub status: String,
    pub connector_statuses: Vec<ChargePointConnectorStatus>,
}

impl ChargePointStatus {
    pub fn connector(&self, connector_id: u32) -> Option<&ChargePointConnectorStatus> {
        self.connector_statuses
            .iter()
            .find(|c| c.connector_id == connector_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargePointSettings {
    pub id: String,
    pub dimmer: String,
    pub down_light: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargePointConnectorSettings {
    pub charge_point_id: String,
    pub connector_id: u32,
    pub mode: String,
    pub rfid_lock: bool,
    pub cable_lock: bool,
    #[serde(default)]
    pub max_current: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingSession {
    pub id: String,
    pub charge_point_id: String,
    pub connector_id: u32,
    pub session_type: String,
    pub total_consumption_kwh: f64,
    #[serde(default, with = "timestamp")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp")]
    pub end_time: Option<DateTime<Utc>>,
}

/// Format used for timestamps in query parameters and request bodies.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse an ISO 8601 timestamp. Values without an offset are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M"))
        .ok()
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

/// Serde adapter for the vendor's optional, usually zone-less, timestamps.
pub mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_str(&super::format_timestamp(dt)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) => super::parse_timestamp(&raw)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", raw))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_chargepoint_parsing() {
        let json = r#"{
            "id": "2012000123",
            "name": "Garage",
            "password": "12345678",
            "type": "HALO",
            "isLoadbalanced": false,
            "firmwareVersion": "1.2.3",
            "hardwareVersion": "A",
            "connectors": [{"chargePointId": "2012000123", "connectorId": 1, "type": "Type2"}]
        }"#;

        let cp: ChargePoint = serde_json::from_str(json).unwrap();
        assert_eq!(cp.id, "2012000123");
        assert_eq!(cp.charge_point_type, "HALO");
        assert_eq!(cp.connectors.len(), 1);
        assert_eq!(cp.connectors[0].connector_type, "Type2");
    }

    #[test]
    fn test_connector_status_without_session() {
        let json = r#"{
            "id": "cp1",
            "status": "Online",
            "connectorStatuses": [{
                "chargePointId": "cp1",
                "connectorId": 1,
                "totalConsumptionKwh": 0.0,
                "status": "Available",
                "measurements": null
            }]
        }"#;

        let status: ChargePointStatus = serde_json::from_str(json).unwrap();
        let connector = status.connector(1).unwrap();
        assert_eq!(connector.status, "Available");
        assert!(connector.start_time.is_none());
        assert!(connector.session_id.is_none());
        assert!(status.connector(2).is_none());
    }

    #[test]
    fn test_session_timestamps() {
        let json = r#"{
            "id": "42",
            "chargePointId": "cp1",
            "connectorId": 1,
            "sessionType": "Private",
            "totalConsumptionKwh": 7.5,
            "startTime": "2024-03-01T18:00:00",
            "endTime": "2024-03-01T21:30:00Z"
        }"#;

        let session: ChargingSession = serde_json::from_str(json).unwrap();
        assert_eq!(
            session.start_time,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 18, 0, 0).unwrap())
        );
        assert_eq!(
            session.end_time,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 21, 30, 0).unwrap())
        );

        let out = serde_json::to_value(&session).unwrap();
        assert_eq!(out["startTime"], "2024-03-01T18:00:00");
    }

    #[test]
    fn test_invalid_timestamp_is_rejected() {
        let json = r#"{
            "id": "42",
            "chargePointId": "cp1",
            "connectorId": 1,
            "sessionType": "Private",
            "totalConsumptionKwh": 7.5,
            "startTime": "yesterday"
        }"#;

        let err = serde_json::from_str::<ChargingSession>(json).unwrap_err();
        assert!(err.to_string().contains("invalid timestamp"));
    }

    #[test]
    fn test_connector_settings_wire_keys() {
        let settings = ChargePointConnectorSettings {
            charge_point_id: "cp1".to_string(),
            connector_id: 1,
            mode: "On".to_string(),
            rfid_lock: true,
            cable_lock: false,
            max_current: Some(16.0),
        };

        let value = serde_json::to_value(&settings).unwrap();
        assert_eq!(value["chargePointId"], "cp1");
        assert_eq!(value["rfidLock"], true);
        assert_eq!(value["maxCurrent"], 16.0);
    }

    #[test]
    fn test_parse_timestamp_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-02"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02T00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02T01:00:00+01:00"), Some(expected));
        assert_eq!(parse_timestamp("not a date"), None);
    }
}
