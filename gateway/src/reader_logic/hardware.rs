use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::reader_logic::error::ReaderError;
use crate::reader_logic::model::TagRead;

/// Inventory search mode, opaque to the engine beyond "apply and cache".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    SingleTarget,
    DualTarget,
}

#[derive(Debug, Clone)]
pub struct AntennaConfig {
    pub port: u16,
    pub enabled: bool,
    pub tx_power_dbm: f64,
    pub rx_sensitivity_dbm: f64,
    pub max_tx_power: bool,
    pub max_rx_sensitivity: bool,
}

#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub individual_mode: bool,
    pub include_antenna_port: bool,
    pub include_peak_rssi: bool,
    pub include_phase_angle: bool,
}

/// Hardware configuration applied to the reader. The engine caches the last
/// applied value so a reconnection re-applies identical settings instead of
/// recomputing defaults.
#[derive(Debug, Clone)]
pub struct ReaderSettings {
    pub session: u8,
    pub search_mode: SearchMode,
    pub tag_population_estimate: u16,
    pub report: ReportConfig,
    pub antennas: Vec<AntennaConfig>,
}

impl ReaderSettings {
    /// Tunes the driver defaults for a dock-door portal: individual reports
    /// with antenna/RSSI/phase included, session 2 dual-target inventory for
    /// the small pallet+badge population, all antennas at full power and
    /// sensitivity to punch through strip curtains.
    pub fn tune_for_portal(&mut self) {
        self.report.individual_mode = true;
        self.report.include_antenna_port = true;
        self.report.include_peak_rssi = true;
        self.report.include_phase_angle = true;

        self.session = 2;
        self.search_mode = SearchMode::DualTarget;
        self.tag_population_estimate = 8;

        for antenna in &mut self.antennas {
            antenna.enabled = true;
            antenna.tx_power_dbm = 28.0;
            antenna.rx_sensitivity_dbm = -65.0;
            antenna.max_tx_power = true;
            antenna.max_rx_sensitivity = true;
        }
    }
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            session: 1,
            search_mode: SearchMode::SingleTarget,
            tag_population_estimate: 32,
            report: ReportConfig {
                individual_mode: false,
                include_antenna_port: false,
                include_peak_rssi: false,
                include_phase_angle: false,
            },
            antennas: (1..=4)
                .map(|port| AntennaConfig {
                    port,
                    enabled: false,
                    tx_power_dbm: 20.0,
                    rx_sensitivity_dbm: -70.0,
                    max_tx_power: false,
                    max_rx_sensitivity: false,
                })
                .collect(),
        }
    }
}

/// Events pushed by the reader driver.
#[derive(Debug, Clone)]
pub enum ReaderEvent {
    TagsReported(Vec<TagRead>),
    ConnectionLost,
}

/// Seam for the physical reader driver. A vendor SDK binding implements this
/// trait; the engine only ever talks to it through `Arc<dyn RfidReader>`.
///
/// `subscribe` replaces the driver's event sink, so re-subscribing after a
/// reconnect re-arms event delivery and lets the previous pump drain out.
#[async_trait]
pub trait RfidReader: Send + Sync {
    async fn connect(&self, addr: &str) -> Result<(), ReaderError>;
    async fn disconnect(&self) -> Result<(), ReaderError>;
    async fn start(&self) -> Result<(), ReaderError>;
    async fn stop(&self) -> Result<(), ReaderError>;
    async fn query_default_settings(&self) -> Result<ReaderSettings, ReaderError>;
    async fn apply_settings(&self, settings: &ReaderSettings) -> Result<(), ReaderError>;
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ReaderEvent>;
}

#[derive(Default)]
struct SimState {
    connected: bool,
    started: bool,
    tx: Option<mpsc::UnboundedSender<ReaderEvent>>,
}

/// In-process reader driver used by the demo feeder and the tests. Connection
/// failures can be scripted ahead of time to exercise the recovery paths.
#[derive(Default)]
pub struct SimulatedReader {
    state: Mutex<SimState>,
    failing_connects: AtomicU32,
    failing_applies: AtomicU32,
    connect_delay_ms: AtomicU32,
    connect_attempts: AtomicU32,
}

impl SimulatedReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` connect calls fail with a hardware error.
    pub fn fail_next_connects(&self, n: u32) {
        self.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` settings applications fail with a hardware error.
    pub fn fail_next_applies(&self, n: u32) {
        self.failing_applies.store(n, Ordering::SeqCst);
    }

    /// Adds latency to every connect call, like a reader behind a slow link.
    pub fn set_connect_delay(&self, delay: std::time::Duration) {
        self.connect_delay_ms
            .store(delay.as_millis() as u32, Ordering::SeqCst);
    }

    /// Total connect calls seen, including failed ones.
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().expect("sim reader lock poisoned").connected
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().expect("sim reader lock poisoned").started
    }

    /// Delivers a tag report to the current subscriber, if any.
    pub fn inject_tags(&self, tags: Vec<TagRead>) {
        let state = self.state.lock().expect("sim reader lock poisoned");
        if let Some(tx) = &state.tx {
            let _ = tx.send(ReaderEvent::TagsReported(tags));
        }
    }

    /// Simulates the link dropping: the driver goes offline and the
    /// connection-lost event reaches the subscriber.
    pub fn inject_connection_lost(&self) {
        let mut state = self.state.lock().expect("sim reader lock poisoned");
        state.connected = false;
        state.started = false;
        if let Some(tx) = &state.tx {
            let _ = tx.send(ReaderEvent::ConnectionLost);
        }
    }
}

#[async_trait]
impl RfidReader for SimulatedReader {
    async fn connect(&self, _addr: &str) -> Result<(), ReaderError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ReaderError::Hardware("simulated connect failure".into()));
        }
        let delay = self.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay as u64)).await;
        }
        let mut state = self.state.lock().expect("sim reader lock poisoned");
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ReaderError> {
        let mut state = self.state.lock().expect("sim reader lock poisoned");
        state.connected = false;
        state.started = false;
        Ok(())
    }

    async fn start(&self) -> Result<(), ReaderError> {
        let mut state = self.state.lock().expect("sim reader lock poisoned");
        if !state.connected {
            return Err(ReaderError::Hardware("start requested while disconnected".into()));
        }
        state.started = true;
        Ok(())
    }

    async fn stop(&self) -> Result<(), ReaderError> {
        let mut state = self.state.lock().expect("sim reader lock poisoned");
        state.started = false;
        Ok(())
    }

    async fn query_default_settings(&self) -> Result<ReaderSettings, ReaderError> {
        let state = self.state.lock().expect("sim reader lock poisoned");
        if !state.connected {
            return Err(ReaderError::Hardware("settings query while disconnected".into()));
        }
        Ok(ReaderSettings::default())
    }

    async fn apply_settings(&self, _settings: &ReaderSettings) -> Result<(), ReaderError> {
        if self
            .failing_applies
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ReaderError::Hardware("simulated configure failure".into()));
        }
        let state = self.state.lock().expect("sim reader lock poisoned");
        if !state.connected {
            return Err(ReaderError::Hardware("apply settings while disconnected".into()));
        }
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ReaderEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().expect("sim reader lock poisoned");
        state.tx = Some(tx);
        rx
    }
}
