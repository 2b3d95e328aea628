use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reader_logic::error::ProductDataError;

/// Operator name used when no badge was matched inside the window.
pub const UNASSIGNED_OPERATOR: &str = "unassigned";

/// Status code pushed to the data API when a pallet passes the portal.
pub const STATUS_ARRIVED: i32 = 2;

/// EPC length classes. Pallet labels are encoded as 16 hex characters,
/// operator badges as 12.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagClass {
    Pallet,
    Operator,
}

impl TagClass {
    /// Classifies an EPC by its length class, or `None` for tags that belong
    /// to neither population (foreign tags drifting through the portal).
    pub fn classify(epc: &str) -> Option<TagClass> {
        if !epc.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        match epc.len() {
            16 => Some(TagClass::Pallet),
            12 => Some(TagClass::Operator),
            _ => None,
        }
    }
}

/// A single tag observation as delivered by the reader driver.
#[derive(Debug, Clone)]
pub struct TagRead {
    pub epc: String,
    pub peak_rssi_dbm: f64,
    pub antenna_port: u16,
}

/// Merged product record sent downstream with every resolution outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInfo {
    pub id: String,
    pub name: String,
    pub epc: String,
    pub status: String,
    pub image_url: String,
    pub net_weight: String,
    pub pieces: String,
    pub unit_of_measure: String,
    pub print_card: String,
    pub operator: String,
    pub label_type: String,
    pub area: String,
    pub product_key: String,
    pub gross_weight: String,
    pub pallet_weight: String,
    pub entry_time: DateTime<Utc>,
    pub rfid: String,
    pub product_type: String,
}

impl ProductInfo {
    /// Required-field validation. A record that fails here is a processing
    /// failure, not a silent pass.
    pub fn validate(&self) -> Result<(), ProductDataError> {
        let missing = [
            ("id", &self.id),
            ("epc", &self.epc),
            ("netWeight", &self.net_weight),
            ("pieces", &self.pieces),
            ("unitOfMeasure", &self.unit_of_measure),
        ]
        .iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| *field);

        match missing {
            Some(field) => Err(ProductDataError::InvalidData {
                epc: self.epc.clone(),
                reason: format!("required field '{field}' is empty"),
            }),
            None => Ok(()),
        }
    }
}

/// Operator record as returned by the data API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorInfo {
    pub operator_epc: String,
    pub operator_name: String,
    pub area: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
}

/// Snapshot of the reader lifecycle, served by the status route and the
/// keep-alive announcer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderStatus {
    pub is_connected: bool,
    pub is_reconnecting: bool,
    pub reconnection_attempts: u32,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_epc_length_classes() {
        assert_eq!(TagClass::classify("A1B2C3D4E5F60718"), Some(TagClass::Pallet));
        assert_eq!(TagClass::classify("A1B2C3D4E5F6"), Some(TagClass::Operator));
        assert_eq!(TagClass::classify("A1B2"), None);
        assert_eq!(TagClass::classify("Z1B2C3D4E5F60718"), None);
    }

    #[test]
    fn validation_rejects_empty_required_fields() {
        let mut product = ProductInfo {
            id: "A1B2C3D4E5F60718".into(),
            name: "Stand-up pouch".into(),
            epc: "A1B2C3D4E5F60718".into(),
            status: "pending".into(),
            image_url: String::new(),
            net_weight: "120".into(),
            pieces: "4000".into(),
            unit_of_measure: "kg".into(),
            print_card: "N/A".into(),
            operator: UNASSIGNED_OPERATOR.into(),
            label_type: "N/A".into(),
            area: "N/A".into(),
            product_key: "N/A".into(),
            gross_weight: "N/A".into(),
            pallet_weight: "N/A".into(),
            entry_time: Utc::now(),
            rfid: "A1B2C3D4E5F60718".into(),
            product_type: "N/A".into(),
        };
        assert!(product.validate().is_ok());

        product.net_weight = String::new();
        let err = product.validate().unwrap_err();
        assert!(matches!(err, ProductDataError::InvalidData { .. }));
    }
}
