//! Shared fixtures for the behavioral tests: an in-memory data service that
//! records every call, a counting notifier, and event-wait helpers.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

use gateway::reader_logic::alert::Notifier;
use gateway::reader_logic::engine::{EngineConfig, ReaderEngine};
use gateway::reader_logic::error::ProductDataError;
use gateway::reader_logic::hardware::SimulatedReader;
use gateway::reader_logic::hub::{EventFrame, EventHub};
use gateway::reader_logic::model::{OperatorInfo, ProductInfo, UNASSIGNED_OPERATOR};
use gateway::reader_logic::products::ProductDataService;

pub const PALLET_EPC: &str = "A1B2C3D4E5F60718";
pub const BADGE_EPC: &str = "0102030405A6";

pub fn sample_product(epc: &str) -> ProductInfo {
    ProductInfo {
        id: epc.to_string(),
        name: "Stand-up pouch".into(),
        epc: epc.to_string(),
        status: "pending".into(),
        image_url: String::new(),
        net_weight: "120".into(),
        pieces: "4000".into(),
        unit_of_measure: "kg".into(),
        print_card: "N/A".into(),
        operator: UNASSIGNED_OPERATOR.into(),
        label_type: "N/A".into(),
        area: "Dock 3".into(),
        product_key: "N/A".into(),
        gross_weight: "N/A".into(),
        pallet_weight: "N/A".into(),
        entry_time: Utc::now(),
        rfid: epc.to_string(),
        product_type: "N/A".into(),
    }
}

/// Data service double. Counts every call, and can be scripted to delay
/// lookups, forget the operator, or hand back a record that fails validation.
#[derive(Default)]
pub struct RecordingProducts {
    pub product_calls: AtomicU32,
    pub operator_calls: AtomicU32,
    pub status_updates: AtomicU32,
    pub arrivals: AtomicU32,
    pub antenna_records: AtomicU32,
    pub lookup_delay_ms: AtomicU32,
    pub operator_unknown: AtomicBool,
    pub blank_required_fields: AtomicBool,
    pub product_missing: AtomicBool,
    pub antenna_record_conflict: AtomicBool,
}

impl RecordingProducts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ProductDataService for RecordingProducts {
    async fn get_product(&self, epc: &str) -> Result<ProductInfo, ProductDataError> {
        self.product_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.lookup_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.product_missing.load(Ordering::SeqCst) {
            return Err(ProductDataError::NotFound {
                epc: epc.to_string(),
            });
        }
        let mut product = sample_product(epc);
        if self.blank_required_fields.load(Ordering::SeqCst) {
            product.net_weight = String::new();
        }
        Ok(product)
    }

    async fn get_operator(&self, epc: &str) -> Result<Option<OperatorInfo>, ProductDataError> {
        self.operator_calls.fetch_add(1, Ordering::SeqCst);
        if self.operator_unknown.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(OperatorInfo {
            operator_epc: epc.to_string(),
            operator_name: "Alex Petrov".into(),
            area: Some("Dock 3".into()),
            registered_at: Some(Utc::now()),
        }))
    }

    async fn update_status(&self, _epc: &str, _status: i32) -> Result<(), ProductDataError> {
        self.status_updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn register_arrival(&self, _epc: &str) -> Result<(), ProductDataError> {
        self.arrivals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn register_antenna_record(
        &self,
        epc: &str,
        _operator_epc: &str,
    ) -> Result<(), ProductDataError> {
        self.antenna_records.fetch_add(1, Ordering::SeqCst);
        if self.antenna_record_conflict.load(Ordering::SeqCst) {
            return Err(ProductDataError::AlreadyRegistered {
                epc: epc.to_string(),
                detail: "antenna record already exists".into(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub alerts: std::sync::Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.lock().expect("notifier lock poisoned").len()
    }

    pub fn alert_messages(&self) -> Vec<String> {
        self.alerts.lock().expect("notifier lock poisoned").clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_alert(&self, message: &str) -> anyhow::Result<()> {
        self.alerts
            .lock()
            .expect("notifier lock poisoned")
            .push(message.to_string());
        Ok(())
    }
}

/// Millisecond-scale tuning so the window, sweep, and cooldown elapse fast.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        reader_addr: "sim".into(),
        rssi_threshold_dbm: -60.0,
        cooldown_window: Duration::from_millis(150),
        correlation_window: Duration::from_millis(120),
        sweep_interval: Duration::from_millis(25),
        keep_alive_interval: Duration::from_secs(3600),
        cleanup_interval: Duration::from_secs(3600),
        reconnect_backoff: Duration::from_millis(25),
        max_reconnect_attempts: 5,
        shutdown_grace: Duration::from_secs(2),
    }
}

pub struct Rig {
    pub engine: Arc<ReaderEngine>,
    pub reader: Arc<SimulatedReader>,
    pub hub: EventHub,
    pub products: Arc<RecordingProducts>,
    pub shutdown: broadcast::Sender<()>,
}

pub fn build_rig(config: EngineConfig) -> Rig {
    let products = RecordingProducts::new();
    let reader = Arc::new(SimulatedReader::new());
    let hub = EventHub::new(64);
    let (shutdown, _) = broadcast::channel(1);
    let engine = ReaderEngine::new(
        config,
        Arc::clone(&reader) as _,
        Arc::clone(&products) as _,
        hub.clone(),
        shutdown.clone(),
    );
    Rig {
        engine,
        reader,
        hub,
        products,
        shutdown,
    }
}

/// Receives frames until one matches `event`, or panics at the deadline.
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<Arc<EventFrame>>,
    event: &str,
    deadline: Duration,
) -> Arc<EventFrame> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(frame) if frame.event == event => return frame,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    };
    timeout(deadline, wait)
        .await
        .unwrap_or_else(|_| panic!("no '{event}' event within {deadline:?}"))
}

/// Waits for a `ReaderStatus` frame whose status payload matches exactly.
pub async fn wait_for_status(
    events: &mut broadcast::Receiver<Arc<EventFrame>>,
    status: &str,
    deadline: Duration,
) -> Arc<EventFrame> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(frame)
                    if frame.event == "ReaderStatus"
                        && frame.payload["status"] == Value::from(status) =>
                {
                    return frame;
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    };
    timeout(deadline, wait)
        .await
        .unwrap_or_else(|_| panic!("no ReaderStatus '{status}' within {deadline:?}"))
}

/// Drains every frame published inside the given span.
pub async fn collect_events(
    events: &mut broadcast::Receiver<Arc<EventFrame>>,
    span: Duration,
) -> Vec<Arc<EventFrame>> {
    let mut frames = Vec::new();
    let deadline = tokio::time::Instant::now() + span;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, events.recv()).await {
            Ok(Ok(frame)) => frames.push(frame),
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => break,
            Err(_) => break,
        }
    }
    frames
}
