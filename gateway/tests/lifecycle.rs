//! Behavioral tests for the reader lifecycle: start/stop legality, the
//! bounded reconnection loop, and event delivery after recovery.

mod common;

use common::*;
use std::time::Duration;

use gateway::reader_logic::engine::EngineConfig;
use gateway::reader_logic::error::ReaderError;
use gateway::reader_logic::model::TagRead;

#[tokio::test]
async fn start_and_stop_enforce_lifecycle_legality() {
    let rig = build_rig(fast_config());

    assert!(matches!(
        rig.engine.stop().await,
        Err(ReaderError::IllegalState(_))
    ));

    rig.engine.start().await.unwrap();
    assert!(rig.reader.is_started());
    assert!(matches!(
        rig.engine.start().await,
        Err(ReaderError::IllegalState(_))
    ));

    rig.engine.stop().await.unwrap();
    assert!(!rig.reader.is_started());
    assert!(matches!(
        rig.engine.stop().await,
        Err(ReaderError::IllegalState(_))
    ));
}

#[tokio::test]
async fn connection_loss_recovers_within_the_attempt_budget() {
    let rig = build_rig(fast_config());
    rig.engine.start().await.unwrap();
    let mut events = rig.hub.subscribe();

    rig.reader.fail_next_connects(2);
    rig.reader.inject_connection_lost();

    wait_for_status(&mut events, "ConnectionLost", Duration::from_secs(1)).await;
    wait_for_status(&mut events, "Reconnecting (1/5)", Duration::from_secs(1)).await;
    wait_for_status(&mut events, "Reconnected", Duration::from_secs(2)).await;

    let status = rig.engine.status().await;
    assert!(status.is_connected);
    assert!(!status.is_reconnecting);
    // Initial start plus two failed and one successful reconnect.
    assert_eq!(rig.reader.connect_attempts(), 4);

    // Event delivery is re-armed after the recovery.
    rig.reader.inject_tags(vec![TagRead {
        epc: PALLET_EPC.to_string(),
        peak_rssi_dbm: -45.0,
        antenna_port: 1,
    }]);
    wait_for_event(&mut events, "NewPallet", Duration::from_secs(1)).await;
}

#[tokio::test]
async fn exhausted_retries_park_the_reader_until_explicit_start() {
    let config = EngineConfig {
        max_reconnect_attempts: 3,
        reconnect_backoff: Duration::from_millis(20),
        ..fast_config()
    };
    let rig = build_rig(config);
    rig.engine.start().await.unwrap();
    let mut events = rig.hub.subscribe();

    rig.reader.fail_next_connects(u32::MAX);
    rig.reader.inject_connection_lost();

    wait_for_status(&mut events, "ReconnectionFailed", Duration::from_secs(2)).await;

    let status = rig.engine.status().await;
    assert!(!status.is_connected);
    assert!(!status.is_reconnecting);
    // Initial start plus exactly three reconnect attempts, then nothing.
    assert_eq!(rig.reader.connect_attempts(), 4);
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(rig.reader.connect_attempts(), 4);

    // An explicit start is legal again; it fails only because the hardware
    // is still scripted to refuse.
    assert!(matches!(
        rig.engine.start().await,
        Err(ReaderError::Hardware(_))
    ));
}

#[tokio::test]
async fn duplicate_loss_signals_trigger_one_recovery() {
    let rig = build_rig(fast_config());
    rig.engine.start().await.unwrap();
    let mut events = rig.hub.subscribe();

    rig.reader.fail_next_connects(1);
    rig.reader.inject_connection_lost();
    rig.reader.inject_connection_lost();

    wait_for_status(&mut events, "Reconnected", Duration::from_secs(2)).await;

    // Initial start, one failed reconnect, one successful reconnect. A
    // second recovery loop would have added more.
    assert_eq!(rig.reader.connect_attempts(), 3);
}

#[tokio::test]
async fn start_is_rejected_while_recovery_is_running() {
    let config = EngineConfig {
        reconnect_backoff: Duration::from_millis(300),
        ..fast_config()
    };
    let rig = build_rig(config);
    rig.engine.start().await.unwrap();
    let mut events = rig.hub.subscribe();

    rig.reader.fail_next_connects(u32::MAX);
    rig.reader.inject_connection_lost();
    wait_for_status(&mut events, "ConnectionLost", Duration::from_secs(1)).await;

    assert!(matches!(
        rig.engine.start().await,
        Err(ReaderError::IllegalState(_))
    ));
}

#[tokio::test]
async fn status_stays_readable_during_a_slow_connect() {
    let rig = build_rig(fast_config());
    rig.reader.set_connect_delay(Duration::from_millis(300));

    let engine = std::sync::Arc::clone(&rig.engine);
    let starting = tokio::spawn(async move { engine.start().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // A status read must not wait out the hardware connect.
    let status = tokio::time::timeout(Duration::from_millis(50), rig.engine.status())
        .await
        .expect("status blocked behind an in-flight connect");
    assert!(!status.is_connected);

    starting.await.unwrap().unwrap();
    assert!(rig.engine.status().await.is_connected);
}

#[tokio::test]
async fn failed_configure_leaves_the_hardware_disconnected() {
    let rig = build_rig(fast_config());
    rig.reader.fail_next_applies(1);

    assert!(matches!(
        rig.engine.start().await,
        Err(ReaderError::Hardware(_))
    ));
    assert!(!rig.reader.is_connected());
    assert!(!rig.engine.status().await.is_connected);

    // The driver is back in a clean state, so the retry goes through.
    rig.engine.start().await.unwrap();
    assert!(rig.reader.is_connected());
    assert!(rig.reader.is_started());
}

#[tokio::test]
async fn keep_alive_frames_carry_the_lifecycle_snapshot() {
    let config = EngineConfig {
        keep_alive_interval: Duration::from_millis(40),
        ..fast_config()
    };
    let rig = build_rig(config);
    let mut events = rig.hub.subscribe();

    let frame = wait_for_event(&mut events, "KeepAlive", Duration::from_secs(1)).await;
    assert_eq!(frame.payload["isConnected"], serde_json::Value::Bool(false));

    rig.engine.start().await.unwrap();
    let frame = loop {
        let f = wait_for_event(&mut events, "KeepAlive", Duration::from_secs(1)).await;
        if f.payload["isConnected"] == serde_json::Value::Bool(true) {
            break f;
        }
    };
    assert_eq!(frame.payload["reconnectionAttempts"], serde_json::Value::from(0));
}
