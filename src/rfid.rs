//! RFID tag identifiers and their validation.
//!
//! Every constructor validates eagerly, so an [`Rfid`] that exists is always
//! well-formed and can be sent without further checks.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Byte lengths accepted by the charge points.
pub const VALID_RFID_LENGTHS: [u8; 3] = [4, 7, 10];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RfidFormat {
    Hex,
    Dec,
    ReverseDec,
}

impl fmt::Display for RfidFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RfidFormat::Hex => "Hex",
            RfidFormat::Dec => "Dec",
            RfidFormat::ReverseDec => "ReverseDec",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rfid {
    rfid: String,
    rfid_format: RfidFormat,
    rfid_length: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    rfid_decimal_format_length: Option<u32>,
}

impl Rfid {
    /// A hex encoded tag; the byte length is derived from the digits.
    ///
    /// Surrounding whitespace is trimmed and the digits are uppercased, so
    /// `0a1b2c3d` is sent as `0A1B2C3D`.
    pub fn hex(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(Error::Validation("RFID must not be empty".to_string()));
        }
        if let Some(bad) = value.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(Error::Validation(format!(
                "RFID {:?} is not a hex string (invalid character {:?})",
                value, bad
            )));
        }
        if value.len() % 2 != 0 {
            return Err(Error::Validation(format!(
                "RFID {:?} has an odd number of hex digits",
                value
            )));
        }
        let length = check_length(value.len() / 2)?;

        Ok(Self {
            rfid: value.to_ascii_uppercase(),
            rfid_format: RfidFormat::Hex,
            rfid_length: length,
            rfid_decimal_format_length: None,
        })
    }

    /// A decimal tag. Decimal digits do not determine the tag size, so the
    /// byte length has to be given.
    pub fn decimal(
        value: &str,
        format: RfidFormat,
        byte_length: usize,
        decimal_format_length: Option<u32>,
    ) -> Result<Self> {
        if format == RfidFormat::Hex {
            return Self::hex(value);
        }
        let value = value.trim();
        if value.is_empty() {
            return Err(Error::Validation("RFID must not be empty".to_string()));
        }
        if !value.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::Validation(format!(
                "RFID {:?} is not a decimal string",
                value
            )));
        }
        let length = check_length(byte_length)?;

        Ok(Self {
            rfid: value.to_string(),
            rfid_format: format,
            rfid_length: length,
            rfid_decimal_format_length: decimal_format_length,
        })
    }

    pub fn value(&self) -> &str {
        &self.rfid
    }

    pub fn format(&self) -> RfidFormat {
        self.rfid_format
    }

    pub fn length(&self) -> u8 {
        self.rfid_length
    }

    pub fn decimal_format_length(&self) -> Option<u32> {
        self.rfid_decimal_format_length
    }

    /// Query parameters identifying this tag in a filtered listing.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("rfid", self.rfid.clone()),
            ("rfidFormat", self.rfid_format.to_string()),
            ("rfidLength", self.rfid_length.to_string()),
        ];
        if let Some(len) = self.rfid_decimal_format_length {
            params.push(("rfidDecimalFormatLength", len.to_string()));
        }
        params
    }
}

fn check_length(bytes: usize) -> Result<u8> {
    VALID_RFID_LENGTHS
        .iter()
        .copied()
        .find(|&valid| usize::from(valid) == bytes)
        .ok_or_else(|| {
            Error::Validation(format!(
                "RFID length {} bytes is invalid, should be either 4, 7 or 10 bytes",
                bytes
            ))
        })
}

/// Authorization payload for a remote start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAuth {
    pub rfid_length: u8,
    pub rfid_format: RfidFormat,
    pub rfid: String,
    pub external_transaction_id: String,
}

impl StartAuth {
    /// Builds the payload with a freshly generated transaction id.
    pub fn new(rfid: &Rfid) -> Self {
        Self {
            rfid_length: rfid.length(),
            rfid_format: rfid.format(),
            rfid: rfid.value().to_string(),
            external_transaction_id: Uuid::new_v4().to_string(),
        }
    }
}
