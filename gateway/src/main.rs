use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use gateway::reader_logic::{alert, config, engine, hardware, hub, logger, monitor, products};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config();

    let log_dir = config
        .log_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("./logs"));
    let log_level = config.log_level.clone().unwrap_or_else(|| "info".into());
    logger::setup_logging(&log_dir, &log_level)?;

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let event_hub = hub::EventHub::new(256);

    let product_api_url = config
        .product_api_url
        .clone()
        .unwrap_or_else(|| "http://172.16.10.31/api/".into());
    let http_timeout = Duration::from_secs(config.http_timeout_seconds.unwrap_or(30));
    let products: Arc<dyn products::ProductDataService> =
        Arc::new(products::ProductApi::new(&product_api_url, http_timeout)?);

    let notifier: Arc<dyn alert::Notifier> = match (&config.mail_api_key, &config.alert_from, &config.alert_to) {
        (Some(key), Some(from), Some(to)) => {
            let endpoint = config
                .mail_api_url
                .clone()
                .unwrap_or_else(|| "https://api.sendgrid.com/v3/mail/send".into());
            Arc::new(alert::EmailNotifier::new(&endpoint, key, from, to)?)
        }
        _ => {
            log::info!("Mail credentials not configured, alerts go to the log only.");
            Arc::new(alert::NoopNotifier)
        }
    };

    let sim_reader = Arc::new(hardware::SimulatedReader::new());
    let reader: Arc<dyn hardware::RfidReader> = Arc::clone(&sim_reader) as _;

    let reader_engine = engine::ReaderEngine::new(
        config.engine_config(),
        reader,
        products,
        event_hub.clone(),
        shutdown_tx.clone(),
    );

    let port = config.port.unwrap_or(9010);
    let app_state = hub::AppState {
        engine: Arc::clone(&reader_engine),
        hub: event_hub,
        notifier: Arc::clone(&notifier),
    };
    let hub_handle = tokio::spawn(hub::run(port, app_state, shutdown_tx.subscribe()));

    let monitor_handle = tokio::spawn(monitor::run(
        Arc::clone(&reader_engine),
        Arc::clone(&notifier),
        config.monitor_config(),
        shutdown_tx.subscribe(),
    ));

    match reader_engine.start().await {
        Ok(()) => log::info!("Reader started."),
        // The monitor keeps retrying, so a failed initial start is not fatal.
        Err(e) => log::error!("Initial reader start failed: {e}"),
    }

    if config.simulate {
        log::info!("Simulation enabled, feeding synthetic tag traffic.");
        tokio::spawn(feed_synthetic_traffic(sim_reader, shutdown_tx.subscribe()));
    }

    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Failed to install SIGTERM handler: {e}");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());
    reader_engine.shutdown().await;

    let _ = tokio::try_join!(hub_handle, monitor_handle);

    log::info!("Shutdown complete.");
    Ok(())
}

/// Pushes a random pallet read every few seconds, usually followed by an
/// operator badge inside the correlation window.
async fn feed_synthetic_traffic(
    reader: Arc<hardware::SimulatedReader>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    use rand::Rng;

    loop {
        let (pallet, badge, pallet_rssi, badge_rssi, with_badge, pause) = {
            let mut rng = rand::rng();
            (
                random_epc(&mut rng, 16),
                random_epc(&mut rng, 12),
                rng.random_range(-75.0..-40.0),
                rng.random_range(-75.0..-40.0),
                rng.random_range(0..10) < 8,
                Duration::from_secs(rng.random_range(4..10)),
            )
        };

        reader.inject_tags(vec![gateway::reader_logic::model::TagRead {
            epc: pallet,
            peak_rssi_dbm: pallet_rssi,
            antenna_port: 1,
        }]);

        if with_badge {
            tokio::time::sleep(Duration::from_millis(800)).await;
            reader.inject_tags(vec![gateway::reader_logic::model::TagRead {
                epc: badge,
                peak_rssi_dbm: badge_rssi,
                antenna_port: 2,
            }]);
        }

        tokio::select! {
            _ = shutdown.recv() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

fn random_epc(rng: &mut impl rand::Rng, len: usize) -> String {
    const HEX: &[u8] = b"0123456789ABCDEF";
    (0..len)
        .map(|_| HEX[rng.random_range(0..HEX.len())] as char)
        .collect()
}
