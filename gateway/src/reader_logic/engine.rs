//! Tag correlation and reader-lifecycle engine.
//!
//! One event pump per reader subscription plus four periodic loops
//! (processing sweep, keep-alive, dedup cleanup, reconnection backoff) share
//! the stores below. The dedup cache and the pending store synchronize
//! internally; the connection state sits behind a single async mutex whose
//! critical sections are the lifecycle transitions themselves.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinSet;
use tokio::time::{interval, sleep};

use crate::reader_logic::dedup::TagDedup;
use crate::reader_logic::error::ReaderError;
use crate::reader_logic::hardware::{ReaderEvent, ReaderSettings, RfidReader};
use crate::reader_logic::hub::EventHub;
use crate::reader_logic::model::{ReaderStatus, TagClass, TagRead};
use crate::reader_logic::products::ProductDataService;
use crate::reader_logic::resolver;
use crate::reader_logic::store::{PalletDetection, PendingStore};

/// Engine tuning. Defaults match the portal deployment; tests shrink the
/// windows to milliseconds.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub reader_addr: String,
    pub rssi_threshold_dbm: f64,
    pub cooldown_window: Duration,
    pub correlation_window: Duration,
    pub sweep_interval: Duration,
    pub keep_alive_interval: Duration,
    pub cleanup_interval: Duration,
    pub reconnect_backoff: Duration,
    pub max_reconnect_attempts: u32,
    pub shutdown_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reader_addr: "172.16.100.198".into(),
            rssi_threshold_dbm: -60.0,
            cooldown_window: Duration::from_secs(5),
            correlation_window: Duration::from_secs(3),
            sweep_interval: Duration::from_secs(1),
            keep_alive_interval: Duration::from_secs(20),
            cleanup_interval: Duration::from_secs(60),
            reconnect_backoff: Duration::from_secs(5),
            max_reconnect_attempts: 5,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Reader connectivity, exactly one logical instance process-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Reconnecting { attempt: u32 },
}

struct Link {
    state: ConnectionState,
}

pub struct ReaderEngine {
    pub(crate) config: EngineConfig,
    reader: Arc<dyn RfidReader>,
    pub(crate) products: Arc<dyn ProductDataService>,
    pub(crate) hub: EventHub,
    dedup: TagDedup,
    pub(crate) pending: PendingStore,
    link: Mutex<Link>,
    settings: Mutex<Option<ReaderSettings>>,
    // Serializes start commands so the link lock stays free during connect.
    start_gate: Mutex<()>,
    // Every claim-bearing resolution task lands here; shutdown joins them.
    resolutions: Mutex<JoinSet<()>>,
    shutdown: broadcast::Sender<()>,
}

impl ReaderEngine {
    /// Builds the engine and starts its maintenance loops (processing sweep,
    /// keep-alive, dedup cleanup). The loops run for the process lifetime,
    /// independent of reader start/stop, and exit on the shutdown signal.
    pub fn new(
        config: EngineConfig,
        reader: Arc<dyn RfidReader>,
        products: Arc<dyn ProductDataService>,
        hub: EventHub,
        shutdown: broadcast::Sender<()>,
    ) -> Arc<Self> {
        let engine = Arc::new(Self {
            dedup: TagDedup::new(config.cooldown_window),
            pending: PendingStore::new(config.correlation_window),
            config,
            reader,
            products,
            hub,
            link: Mutex::new(Link {
                state: ConnectionState::Disconnected,
            }),
            settings: Mutex::new(None),
            start_gate: Mutex::new(()),
            resolutions: Mutex::new(JoinSet::new()),
            shutdown,
        });
        engine.spawn_maintenance();
        engine
    }

    /// Starts the reader: connect, apply settings, arm event delivery, begin
    /// acquisition. Rejected with `IllegalState` unless fully stopped.
    ///
    /// The start gate serializes concurrent start commands (HTTP and the
    /// monitor backstop); the link lock itself is only held for the state
    /// checks, so status reads never wait out a slow hardware connect.
    pub async fn start(self: &Arc<Self>) -> Result<(), ReaderError> {
        let _gate = self.start_gate.lock().await;
        {
            let link = self.link.lock().await;
            match link.state {
                ConnectionState::Disconnected => {}
                ConnectionState::Connected => {
                    return Err(ReaderError::IllegalState("reader is already started".into()));
                }
                ConnectionState::Reconnecting { .. } => {
                    return Err(ReaderError::IllegalState(
                        "reader is recovering from a connection loss".into(),
                    ));
                }
            }
        }

        match self.connect_and_arm().await {
            Ok(()) => {
                self.link.lock().await.state = ConnectionState::Connected;
                self.publish_status("Started");
                Ok(())
            }
            Err(e) => {
                self.hub.publish(
                    "ReaderError",
                    json!({ "error": e.to_string(), "timestamp": Utc::now().to_rfc3339() }),
                );
                Err(e)
            }
        }
    }

    /// Stops acquisition and disconnects. Only legal while connected.
    pub async fn stop(&self) -> Result<(), ReaderError> {
        let mut link = self.link.lock().await;
        if link.state != ConnectionState::Connected {
            return Err(ReaderError::IllegalState("reader is not started".into()));
        }

        self.reader.stop().await?;
        self.reader.disconnect().await?;
        link.state = ConnectionState::Disconnected;
        drop(link);
        self.publish_status("Stopped");
        Ok(())
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.link.lock().await.state
    }

    pub async fn status(&self) -> ReaderStatus {
        let state = self.connection_state().await;
        let (is_connected, is_reconnecting, attempts, message) = match state {
            ConnectionState::Connected => (true, false, 0, "reader connected"),
            ConnectionState::Reconnecting { attempt } => {
                (false, true, attempt, "attempting to reconnect")
            }
            ConnectionState::Disconnected => (false, false, 0, "reader disconnected"),
        };
        ReaderStatus {
            is_connected,
            is_reconnecting,
            reconnection_attempts: attempts,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Number of pallets still awaiting resolution, for health views.
    pub fn pending_pallets(&self) -> usize {
        self.pending.pending_count()
    }

    /// Final teardown on process exit: stop the hardware if it is running,
    /// then give in-flight resolutions a bounded grace period to finish.
    /// Stragglers are aborted. The periodic loops exit through the shutdown
    /// broadcast.
    pub async fn shutdown(&self) {
        {
            let mut link = self.link.lock().await;
            if link.state == ConnectionState::Connected {
                if let Err(e) = self.reader.stop().await {
                    log::warn!("Reader stop during shutdown failed: {e}");
                }
                if let Err(e) = self.reader.disconnect().await {
                    log::warn!("Reader disconnect during shutdown failed: {e}");
                }
                link.state = ConnectionState::Disconnected;
            }
        }

        let grace = self.config.shutdown_grace;
        let mut tasks = self.resolutions.lock().await;
        if tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await
        .is_err()
        {
            log::warn!("Resolutions still running after {grace:?}, aborting them");
            tasks.abort_all();
        }
    }

    /// Connect, apply cached (or freshly tuned default) settings, re-arm the
    /// event pump and start acquisition. Shared by `start` and the
    /// reconnection loop; the caller owns the state transition.
    async fn connect_and_arm(self: &Arc<Self>) -> Result<(), ReaderError> {
        self.reader.connect(&self.config.reader_addr).await?;
        if let Err(e) = self.configure_and_start().await {
            // Leave the driver fully disconnected rather than half-armed.
            if let Err(d) = self.reader.disconnect().await {
                log::warn!("Disconnect after failed configure also failed: {d}");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn configure_and_start(self: &Arc<Self>) -> Result<(), ReaderError> {
        let settings = match self.settings.lock().await.clone() {
            Some(cached) => cached,
            None => {
                let mut fresh = self.reader.query_default_settings().await?;
                fresh.tune_for_portal();
                fresh
            }
        };
        self.reader.apply_settings(&settings).await?;
        *self.settings.lock().await = Some(settings);

        let events = self.reader.subscribe();
        self.spawn_event_pump(events);

        self.reader.start().await?;
        Ok(())
    }

    fn spawn_event_pump(self: &Arc<Self>, mut events: tokio::sync::mpsc::UnboundedReceiver<ReaderEvent>) {
        let engine = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    event = events.recv() => match event {
                        Some(ReaderEvent::TagsReported(tags)) => {
                            // Reports may arrive back to back; resolution work
                            // must not block the pump.
                            engine.track(Arc::clone(&engine).handle_tag_report(tags)).await;
                        }
                        Some(ReaderEvent::ConnectionLost) => {
                            engine.handle_connection_lost().await;
                        }
                        // Driver replaced its sink (re-subscribe) or dropped.
                        None => break,
                    }
                }
            }
        });
    }

    /// Per-report processing: RSSI gate, dedup, then class dispatch.
    /// Failures for one tag never affect its siblings in the report.
    pub(crate) async fn handle_tag_report(self: Arc<Self>, tags: Vec<TagRead>) {
        for tag in tags {
            if tag.peak_rssi_dbm < self.config.rssi_threshold_dbm {
                log::trace!(
                    "Discarding {} at {:.1} dBm (below {:.1})",
                    tag.epc,
                    tag.peak_rssi_dbm,
                    self.config.rssi_threshold_dbm
                );
                continue;
            }
            if !self.dedup.should_process(&tag.epc) {
                continue;
            }

            match TagClass::classify(&tag.epc) {
                Some(TagClass::Pallet) => self.handle_pallet_read(&tag),
                Some(TagClass::Operator) => self.handle_operator_read(&tag).await,
                None => {
                    log::debug!("Ignoring tag {} outside both length classes", tag.epc);
                }
            }
        }
    }

    fn handle_pallet_read(self: &Arc<Self>, tag: &TagRead) {
        let detection = PalletDetection {
            detected_at: Instant::now(),
            rssi_dbm: tag.peak_rssi_dbm,
            antenna_port: tag.antenna_port,
        };
        if !self.pending.insert_if_absent(&tag.epc, detection) {
            return;
        }
        log::info!("Pallet {} detected at {:.1} dBm", tag.epc, tag.peak_rssi_dbm);

        // Speculative pre-fetch to warm the data service; the outcome is
        // deliberately discarded and the pending entry is untouched.
        let products = Arc::clone(&self.products);
        let epc = tag.epc.clone();
        tokio::spawn(async move {
            let _ = products.get_product(&epc).await;
        });
    }

    /// An operator badge resolves every unresolved pallet still inside the
    /// correlation window. Entries are processed concurrently and fail
    /// independently.
    async fn handle_operator_read(self: &Arc<Self>, tag: &TagRead) {
        let candidates = self.pending.unresolved_within_window();
        if candidates.is_empty() {
            log::debug!("Operator {} read with no pending pallets", tag.epc);
            return;
        }
        let resolutions = candidates.into_iter().map(|pallet_epc| {
            resolver::resolve_association(Arc::clone(self), pallet_epc, tag.epc.clone())
        });
        futures_util::future::join_all(resolutions).await;
    }

    async fn handle_connection_lost(self: &Arc<Self>) {
        {
            let mut link = self.link.lock().await;
            match link.state {
                // Already recovering; the signal is a no-op.
                ConnectionState::Reconnecting { .. } => return,
                // A loss event after an explicit stop carries no information.
                ConnectionState::Disconnected => return,
                ConnectionState::Connected => {
                    link.state = ConnectionState::Reconnecting { attempt: 0 };
                }
            }
        }
        log::warn!("Reader connection lost, starting recovery");
        self.publish_status("ConnectionLost");
        self.spawn_reconnect_loop();
    }

    /// Bounded-retry recovery: wait the fixed backoff, bump the attempt
    /// counter, retry the full connect sequence. Success returns to
    /// `Connected` with the counter reset; exhaustion parks the engine in
    /// `Disconnected` until an explicit start.
    fn spawn_reconnect_loop(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let max = self.config.max_reconnect_attempts;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = sleep(engine.config.reconnect_backoff) => {}
                }

                let attempt = {
                    let mut link = engine.link.lock().await;
                    match link.state {
                        ConnectionState::Reconnecting { attempt } => {
                            let next = attempt + 1;
                            link.state = ConnectionState::Reconnecting { attempt: next };
                            next
                        }
                        // Someone else settled the state; stand down.
                        _ => return,
                    }
                };
                engine.publish_status(&format!("Reconnecting ({attempt}/{max})"));

                match engine.connect_and_arm().await {
                    Ok(()) => {
                        engine.link.lock().await.state = ConnectionState::Connected;
                        log::info!("Reader reconnected after {attempt} attempt(s)");
                        engine.publish_status("Reconnected");
                        return;
                    }
                    Err(e) => {
                        log::error!("Reconnection attempt {attempt}/{max} failed: {e}");
                        engine.hub.publish(
                            "ReaderError",
                            json!({
                                "error": format!("reconnection failed: {e}"),
                                "attempt": attempt,
                                "timestamp": Utc::now().to_rfc3339(),
                            }),
                        );
                        if attempt >= max {
                            engine.link.lock().await.state = ConnectionState::Disconnected;
                            engine.publish_status("ReconnectionFailed");
                            return;
                        }
                    }
                }
            }
        });
    }

    fn spawn_maintenance(self: &Arc<Self>) {
        // Processing sweep: resolve pallets whose window elapsed unattended.
        let engine = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut tick = interval(engine.config.sweep_interval);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    // Claim semantics make overlapping sweep passes safe.
                    _ = tick.tick() => {
                        engine.track(Arc::clone(&engine).process_expired()).await;
                    }
                }
            }
        });

        // Keep-alive announcer.
        let engine = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut tick = interval(engine.config.keep_alive_interval);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tick.tick() => {
                        let status = engine.status().await;
                        match serde_json::to_value(&status) {
                            Ok(payload) => engine.hub.publish("KeepAlive", payload),
                            Err(e) => log::warn!("Keep-alive serialization failed: {e}"),
                        }
                    }
                }
            }
        });

        // Dedup cleanup.
        let engine = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut tick = interval(engine.config.cleanup_interval);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tick.tick() => {
                        let purged = engine.dedup.purge_expired();
                        if purged > 0 {
                            log::debug!("Purged {purged} expired dedup entries");
                        }
                    }
                }
            }
        });
    }

    /// One sweep pass: claim-and-resolve every expired entry concurrently.
    /// Each resolution catches its own failures, so a bad entry cannot stall
    /// the sweep loop.
    async fn process_expired(self: Arc<Self>) {
        let expired = self.pending.expired_unresolved();
        if expired.is_empty() {
            return;
        }
        let resolutions = expired
            .into_iter()
            .map(|epc| resolver::resolve_unattended(Arc::clone(&self), epc));
        futures_util::future::join_all(resolutions).await;
    }

    /// Registers a resolution-bearing task with the shutdown join set.
    async fn track<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.resolutions.lock().await.spawn(fut);
    }

    fn publish_status(&self, status: &str) {
        self.hub.publish(
            "ReaderStatus",
            json!({ "status": status, "timestamp": Utc::now().to_rfc3339() }),
        );
    }
}
