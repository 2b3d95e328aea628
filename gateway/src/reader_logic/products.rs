//! HTTP client for the plant data API.
//!
//! Built on `reqwest_middleware` with an exponential-backoff retry policy;
//! every call carries the client-level timeout so a stuck service cannot pin
//! a resolution task.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use url::Url;

use crate::reader_logic::error::ProductDataError;
use crate::reader_logic::model::{OperatorInfo, ProductInfo, UNASSIGNED_OPERATOR};

/// The five operations the engine needs from the business data service.
#[async_trait]
pub trait ProductDataService: Send + Sync {
    async fn get_product(&self, epc: &str) -> Result<ProductInfo, ProductDataError>;

    /// `Ok(None)` means the badge is unknown to the system, which is a valid
    /// business outcome (operator stays "unassigned"), not an error.
    async fn get_operator(&self, epc: &str) -> Result<Option<OperatorInfo>, ProductDataError>;

    async fn update_status(&self, epc: &str, status: i32) -> Result<(), ProductDataError>;
    async fn register_arrival(&self, epc: &str) -> Result<(), ProductDataError>;
    async fn register_antenna_record(
        &self,
        epc: &str,
        operator_epc: &str,
    ) -> Result<(), ProductDataError>;
}

/// Wire shape of the product lookup response. Everything is optional; the
/// mapping below decides which absences are tolerable.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductResponse {
    product_name: Option<String>,
    image_url: Option<String>,
    net_weight: Option<String>,
    pieces: Option<String>,
    uom: Option<String>,
    product_print_card: Option<String>,
    label_type: Option<String>,
    area: Option<String>,
    product_key: Option<String>,
    gross_weight: Option<String>,
    pallet_weight: Option<String>,
    rfid: Option<String>,
    product_type: Option<String>,
}

pub struct ProductApi {
    inner: ClientWithMiddleware,
    base_url: Url,
}

impl ProductApi {
    /// Creates the API client. `base_url` must be absolute and should end
    /// with a slash so relative paths join under it.
    pub fn new(base_url: &str, call_timeout: Duration) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)?;
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = reqwest::Client::builder().timeout(call_timeout).build()?;
        let inner = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        Ok(Self { inner, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProductDataError> {
        self.base_url
            .join(path)
            .map_err(|e| ProductDataError::Network(format!("bad endpoint '{path}': {e}")))
    }
}

#[async_trait]
impl ProductDataService for ProductApi {
    async fn get_product(&self, epc: &str) -> Result<ProductInfo, ProductDataError> {
        let url = self.endpoint(&format!("products/{epc}"))?;
        let response = self.inner.get(url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(ProductDataError::NotFound { epc: epc.to_string() }),
            status if !status.is_success() => Err(ProductDataError::Unexpected {
                epc: epc.to_string(),
                status: status.as_u16(),
            }),
            _ => {
                let data: ProductResponse = response.json().await?;
                // Required fields map empty-on-absence so validation catches
                // them; cosmetic fields get a placeholder.
                Ok(ProductInfo {
                    id: epc.to_string(),
                    name: data.product_name.unwrap_or_else(|| "Unnamed product".into()),
                    epc: epc.to_string(),
                    status: "pending".into(),
                    image_url: data.image_url.unwrap_or_default(),
                    net_weight: data.net_weight.unwrap_or_default(),
                    pieces: data.pieces.unwrap_or_default(),
                    unit_of_measure: data.uom.unwrap_or_default(),
                    print_card: data.product_print_card.unwrap_or_else(|| "N/A".into()),
                    operator: UNASSIGNED_OPERATOR.into(),
                    label_type: data.label_type.unwrap_or_else(|| "N/A".into()),
                    area: data.area.unwrap_or_else(|| "N/A".into()),
                    product_key: data.product_key.unwrap_or_else(|| "N/A".into()),
                    gross_weight: data.gross_weight.unwrap_or_else(|| "N/A".into()),
                    pallet_weight: data.pallet_weight.unwrap_or_else(|| "N/A".into()),
                    entry_time: Utc::now(),
                    rfid: data.rfid.unwrap_or_else(|| epc.to_string()),
                    product_type: data.product_type.unwrap_or_else(|| "N/A".into()),
                })
            }
        }
    }

    async fn get_operator(&self, epc: &str) -> Result<Option<OperatorInfo>, ProductDataError> {
        let url = self.endpoint(&format!("operators/{epc}"))?;
        let response = self.inner.get(url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                log::warn!("Operator badge {epc} not registered");
                Ok(None)
            }
            status if !status.is_success() => Err(ProductDataError::Unexpected {
                epc: epc.to_string(),
                status: status.as_u16(),
            }),
            _ => Ok(Some(response.json().await?)),
        }
    }

    async fn update_status(&self, epc: &str, status: i32) -> Result<(), ProductDataError> {
        let url = self.endpoint(&format!("labels/{epc}/status"))?;
        let response = self.inner.put(url).json(&json!({ "status": status })).send().await?;

        match response.status() {
            StatusCode::CONFLICT => Err(ProductDataError::AlreadyRegistered {
                epc: epc.to_string(),
                detail: "label already carries another status".into(),
            }),
            s if !s.is_success() => Err(ProductDataError::Unexpected {
                epc: epc.to_string(),
                status: s.as_u16(),
            }),
            _ => Ok(()),
        }
    }

    async fn register_arrival(&self, epc: &str) -> Result<(), ProductDataError> {
        let url = self.endpoint(&format!("arrivals/{epc}"))?;
        let response = self.inner.post(url).json(&json!({})).send().await?;

        match response.status() {
            StatusCode::CONFLICT => Err(ProductDataError::AlreadyRegistered {
                epc: epc.to_string(),
                detail: "arrival already registered".into(),
            }),
            s if !s.is_success() => Err(ProductDataError::Unexpected {
                epc: epc.to_string(),
                status: s.as_u16(),
            }),
            _ => Ok(()),
        }
    }

    async fn register_antenna_record(
        &self,
        epc: &str,
        operator_epc: &str,
    ) -> Result<(), ProductDataError> {
        let url = self.endpoint("antenna-records")?;
        let response = self
            .inner
            .post(url)
            .json(&json!({ "epc": epc, "operatorEpc": operator_epc }))
            .send()
            .await?;

        match response.status() {
            StatusCode::CONFLICT => Err(ProductDataError::AlreadyRegistered {
                epc: epc.to_string(),
                detail: "antenna record already exists".into(),
            }),
            s if !s.is_success() => Err(ProductDataError::Unexpected {
                epc: epc.to_string(),
                status: s.as_u16(),
            }),
            _ => Ok(()),
        }
    }
}
