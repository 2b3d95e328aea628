//! Exactly-once resolution paths for pending pallets.
//!
//! Both entry points claim the store entry before any I/O, so the resolver
//! and the expiry sweeper can race on the same pallet and only one performs
//! the side effects and emits the outcome. Either way the entry is removed
//! after its event goes out.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

use crate::reader_logic::engine::ReaderEngine;
use crate::reader_logic::error::ProductDataError;
use crate::reader_logic::model::{OperatorInfo, ProductInfo, STATUS_ARRIVED, UNASSIGNED_OPERATOR};
use crate::reader_logic::store::PalletDetection;

/// Resolves one pallet against an operator badge read inside the window.
pub(crate) async fn resolve_association(
    engine: Arc<ReaderEngine>,
    pallet_epc: String,
    operator_epc: String,
) {
    let Some(detection) = engine.pending.claim(&pallet_epc) else {
        return;
    };

    match associate(&engine, &pallet_epc, &operator_epc).await {
        Ok((product, operator)) => {
            log::info!("Pallet {pallet_epc} associated with operator {operator_epc}");
            engine.hub.publish(
                "NewAssociation",
                json!({
                    "success": true,
                    "product": product,
                    "operatorInfo": operator,
                    "rssi": detection.rssi_dbm,
                    "antennaPort": detection.antenna_port,
                    "timestamp": Utc::now().to_rfc3339(),
                }),
            );
        }
        Err(e) => {
            log::error!("Association of pallet {pallet_epc} with {operator_epc} failed: {e}");
            engine.hub.publish(
                "NewAssociation",
                json!({
                    "success": false,
                    "palletEpc": pallet_epc,
                    "operatorEpc": operator_epc,
                    "error": e.to_string(),
                    "rssi": detection.rssi_dbm,
                    "antennaPort": detection.antenna_port,
                    "timestamp": Utc::now().to_rfc3339(),
                }),
            );
        }
    }

    engine.pending.remove(&pallet_epc);
}

/// Resolves one pallet whose window elapsed without a badge ("unattended").
pub(crate) async fn resolve_unattended(engine: Arc<ReaderEngine>, pallet_epc: String) {
    let Some(detection) = engine.pending.claim(&pallet_epc) else {
        return;
    };

    match register_unattended(&engine, &pallet_epc).await {
        Ok(product) => {
            log::info!("Pallet {pallet_epc} resolved without operator");
            engine
                .hub
                .publish("NewPallet", success_payload(product, &detection));
        }
        Err(e) => {
            log::error!("Unattended resolution of pallet {pallet_epc} failed: {e}");
            engine.hub.publish(
                "NewPallet",
                json!({
                    "success": false,
                    "palletEpc": pallet_epc,
                    "error": e.to_string(),
                    "rssi": detection.rssi_dbm,
                    "antennaPort": detection.antenna_port,
                    "timestamp": Utc::now().to_rfc3339(),
                }),
            );
        }
    }

    engine.pending.remove(&pallet_epc);
}

/// Lookup, merge, validate, then apply the three side effects concurrently.
async fn associate(
    engine: &ReaderEngine,
    pallet_epc: &str,
    operator_epc: &str,
) -> Result<(ProductInfo, Option<OperatorInfo>), ProductDataError> {
    let (mut product, operator) = tokio::try_join!(
        engine.products.get_product(pallet_epc),
        engine.products.get_operator(operator_epc),
    )?;

    product.operator = operator
        .as_ref()
        .map(|o| o.operator_name.clone())
        .unwrap_or_else(|| UNASSIGNED_OPERATOR.to_string());
    product.validate()?;

    tokio::try_join!(
        engine.products.update_status(pallet_epc, STATUS_ARRIVED),
        engine.products.register_arrival(pallet_epc),
        engine.products.register_antenna_record(pallet_epc, operator_epc),
    )?;

    Ok((product, operator))
}

/// The unattended path skips the operator lookup and the antenna record.
async fn register_unattended(
    engine: &ReaderEngine,
    pallet_epc: &str,
) -> Result<ProductInfo, ProductDataError> {
    let mut product = engine.products.get_product(pallet_epc).await?;
    product.operator = UNASSIGNED_OPERATOR.to_string();
    product.validate()?;

    tokio::try_join!(
        engine.products.update_status(pallet_epc, STATUS_ARRIVED),
        engine.products.register_arrival(pallet_epc),
    )?;

    Ok(product)
}

fn success_payload(product: ProductInfo, detection: &PalletDetection) -> serde_json::Value {
    json!({
        "success": true,
        "product": product,
        "rssi": detection.rssi_dbm,
        "antennaPort": detection.antenna_port,
        "timestamp": Utc::now().to_rfc3339(),
    })
}
