//! Slow connectivity backstop, independent of the event-driven recovery.
//!
//! Polls the lifecycle state, raises a rate-limited alert when a previously
//! connected reader is found down, alerts immediately on observed recovery,
//! and opportunistically retries a start. Start rejections (already running,
//! already recovering) are expected and swallowed.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::interval;

use crate::reader_logic::alert::Notifier;
use crate::reader_logic::engine::ReaderEngine;

pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub alert_rate_limit: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            alert_rate_limit: Duration::from_secs(300),
        }
    }
}

pub async fn run(
    engine: Arc<ReaderEngine>,
    notifier: Arc<dyn Notifier>,
    config: MonitorConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut tick = interval(config.poll_interval);
    let mut was_connected = true;
    let mut last_alert: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                log::info!("Connectivity monitor shutting down.");
                break;
            }
            _ = tick.tick() => {
                let status = engine.status().await;

                if !status.is_connected {
                    if was_connected {
                        let due = last_alert.is_none_or(|t| t.elapsed() >= config.alert_rate_limit);
                        if due {
                            if let Err(e) = notifier
                                .send_alert("RFID reader found disconnected by the monitor")
                                .await
                            {
                                log::warn!("Disconnect alert failed: {e}");
                            }
                            last_alert = Some(Instant::now());
                        }
                    }

                    // Backstop restart; the lifecycle layer rejects it while
                    // the event-driven recovery is active.
                    match engine.start().await {
                        Ok(()) => log::info!("Monitor restarted the reader"),
                        Err(e) => log::debug!("Monitor start attempt rejected: {e}"),
                    }
                } else if !was_connected && status.is_connected {
                    if let Err(e) = notifier.send_alert("RFID reader is back online").await {
                        log::warn!("Recovery alert failed: {e}");
                    }
                    last_alert = Some(Instant::now());
                }

                was_connected = status.is_connected;
            }
        }
    }
}
