//! Standard INQUIRY data returned by packet devices

use crate::command::SHORT_INQUIRY_LENGTH;
use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};

/// Peripheral qualifier: a logical unit is connected
pub const QUALIFIER_CONNECTED: u8 = 0;

/// Decoded standard INQUIRY data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InquiryData {
    pub peripheral_qualifier: u8,
    pub device_type: u8,
    pub removable: bool,
    /// SPC version claimed by the device
    pub version: u8,
    /// Bytes of data available after byte 4
    pub additional_length: u8,
    pub vendor: String,
    pub product: String,
    pub revision: String,
}

impl InquiryData {
    /// Decode at least [`SHORT_INQUIRY_LENGTH`] bytes of INQUIRY data
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let needed = SHORT_INQUIRY_LENGTH as usize;
        if raw.len() < needed {
            return Err(ProtocolError::ShortData {
                what: "INQUIRY",
                needed,
                available: raw.len(),
            });
        }

        Ok(Self {
            peripheral_qualifier: raw[0] >> 5,
            device_type: raw[0] & 0x1f,
            removable: raw[1] & 0x80 != 0,
            version: raw[2] & 0x07,
            additional_length: raw[4],
            vendor: ascii_field(&raw[8..16]),
            product: ascii_field(&raw[16..32]),
            revision: ascii_field(&raw[32..36]),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.peripheral_qualifier == QUALIFIER_CONNECTED
    }

    /// The device has more data than the short request fetched
    pub fn has_more_data(&self) -> bool {
        self.additional_length as u16 > SHORT_INQUIRY_LENGTH - 4
    }

    /// Allocation length that fetches everything the device offers
    pub fn full_length(&self) -> u16 {
        self.additional_length as u16 + 4
    }
}

fn ascii_field(raw: &[u8]) -> String {
    let text: String = raw
        .iter()
        .map(|&b| if b.is_ascii_graphic() { b as char } else { ' ' })
        .collect();
    text.trim().to_string()
}
