//! End-to-end runs of the orchestrator against the in-memory connection.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use bytes::Bytes;
use devicevisor::{
    CommandFn, ConfigError, Connection, ConnectionState, DeviceError, DeviceRegistry,
    MemoryConnection, Orchestrator, Phase, Registrations, RuntimeConfig, RuntimeError, SampleFn,
    StrategySpec, Telemetry, TransportError,
};
use serde_json::{Value, json};

fn cfg() -> RuntimeConfig {
    RuntimeConfig {
        prefix: "farm".into(),
        version: "9.9.9".into(),
        heartbeat: Some(Duration::from_secs(2)),
        grace: Duration::from_secs(1),
        ..RuntimeConfig::default()
    }
}

fn parse(payload: &str) -> Value {
    serde_json::from_str(payload).unwrap()
}

/// Runs `orch` while `driver` executes, then requests shutdown.
async fn run_with<F>(orch: &Orchestrator, driver: F) -> Result<(), RuntimeError>
where
    F: Future<Output = ()>,
{
    let token = orch.shutdown_token();
    let mut phase = orch.phase();
    let control = async move {
        let _ = phase.wait_for(|p| *p == Phase::Running).await;
        driver.await;
        token.cancel();
    };
    let (res, ()) = tokio::join!(orch.run(), control);
    res
}

fn build(conn: &Arc<MemoryConnection>, cfg: RuntimeConfig, regs: Registrations) -> Orchestrator {
    Orchestrator::builder(cfg, conn.clone(), regs)
        .handle_os_signals(false)
        .build()
}

#[tokio::test(start_paused = true)]
async fn repeated_faults_are_deduplicated_until_recovery() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = DeviceRegistry::new();
    registry
        .telemetry(
            "gauge",
            Telemetry::new(
                Duration::from_secs(1),
                SampleFn::arc({
                    let calls = calls.clone();
                    move || {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        async move {
                            match n {
                                0..=2 => {
                                    Err(DeviceError::new("timeout", format!("no answer #{n}")))
                                }
                                3 => Err(DeviceError::new("value_error", "garbled frame")),
                                _ => Ok(Some(json!(7))),
                            }
                        }
                    }
                }),
            ),
        )
        .unwrap();

    let conn = Arc::new(MemoryConnection::new());
    let orch = build(&conn, cfg(), registry.close());
    run_with(&orch, tokio::time::sleep(Duration::from_millis(10_500)))
        .await
        .unwrap();

    let own: Vec<Value> = conn.payloads("farm/gauge/error").iter().map(|p| parse(p)).collect();
    assert_eq!(own.len(), 2);
    assert_eq!(own[0]["error_type"], "timeout");
    assert_eq!(own[0]["message"], "no answer #0");
    assert_eq!(own[0]["device"], "gauge");
    assert_eq!(own[1]["error_type"], "value_error");
    assert_eq!(conn.payloads("farm/error").len(), 2);

    assert_eq!(conn.retained_str("farm/gauge/state").as_deref(), Some("7"));

    let heartbeats: Vec<Value> = conn.payloads("farm/status").iter().map(|p| parse(p)).collect();
    assert!(
        heartbeats
            .iter()
            .any(|hb| hb["devices"]["gauge"]["status"] == "error")
    );
    let last = heartbeats.last().unwrap();
    assert_eq!(last["devices"]["gauge"]["status"], "ok");
    assert_eq!(last["version"], "9.9.9");
}

#[tokio::test(start_paused = true)]
async fn recovery_is_published_when_enabled() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = DeviceRegistry::new();
    registry
        .telemetry(
            "gauge",
            Telemetry::new(
                Duration::from_secs(1),
                SampleFn::arc({
                    let calls = calls.clone();
                    move || {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        async move {
                            if n < 2 {
                                Err(DeviceError::new("i2c_nack", "no ack"))
                            } else {
                                Ok(None)
                            }
                        }
                    }
                }),
            ),
        )
        .unwrap();

    let conn = Arc::new(MemoryConnection::new());
    let orch = build(
        &conn,
        RuntimeConfig {
            publish_recovery: true,
            ..cfg()
        },
        registry.close(),
    );
    run_with(&orch, tokio::time::sleep(Duration::from_millis(4_500)))
        .await
        .unwrap();

    let events: Vec<Value> = conn.payloads("farm/gauge/error").iter().map(|p| parse(p)).collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["error_type"], "i2c_nack");
    assert_eq!(events[1]["recovered"], "i2c_nack");
}

#[tokio::test(start_paused = true)]
async fn session_loss_fires_sentinel_and_reconnect_overwrites_it() {
    let mut registry = DeviceRegistry::new();
    registry
        .telemetry(
            "meter",
            Telemetry::new(
                Duration::from_secs(1),
                SampleFn::arc(|| async { Ok::<_, DeviceError>(Some(json!({"kwh": 12}))) }),
            )
            .with_strategy(StrategySpec::always()),
        )
        .unwrap()
        .command(
            "relay",
            CommandFn::arc(|_payload: Bytes| async { Ok::<_, DeviceError>(None) }),
        )
        .unwrap();

    let conn = Arc::new(MemoryConnection::new());
    let orch = build(&conn, cfg(), registry.close());

    let broker = conn.clone();
    let driver = async move {
        while broker.sent_to("farm/meter/state").len() < 10 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        broker.drop_connection();
        assert_eq!(broker.state(), ConnectionState::Reconnecting);
        assert_eq!(broker.retained_str("farm/status").as_deref(), Some("offline"));
        assert_eq!(broker.wills_fired(), 1);

        // Publishes while the session is down are dropped.
        tokio::time::sleep(Duration::from_secs(3)).await;
        broker.clear_sent();

        broker.restore_connection();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let hb = parse(&broker.retained_str("farm/status").unwrap());
        assert_eq!(hb["status"], "online");
        assert_eq!(hb["devices"]["meter"]["status"], "ok");
        assert_eq!(hb["devices"]["relay"]["status"], "ok");
        for device in ["meter", "relay"] {
            let topic = format!("farm/{device}/availability");
            assert_eq!(broker.payloads(&topic), vec!["online"]);
        }
    };

    run_with(&orch, driver).await.unwrap();

    assert_eq!(conn.wills_fired(), 1);
    assert_eq!(
        conn.retained_str("farm/meter/availability").as_deref(),
        Some("offline")
    );
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn commands_round_trip_through_the_broker() {
    let mut registry = DeviceRegistry::new();
    registry
        .command(
            "valve",
            CommandFn::arc(|payload: Bytes| async move {
                let open = payload.as_ref() == b"open";
                Ok::<_, DeviceError>(Some(json!({ "open": open })))
            }),
        )
        .unwrap();

    let conn = Arc::new(MemoryConnection::new());
    let orch = build(&conn, cfg(), registry.close());

    let broker = conn.clone();
    let driver = async move {
        assert_eq!(broker.inject("farm/valve/set", "open"), 1);
        for _ in 0..100 {
            if broker.retained_str("farm/valve/state").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    run_with(&orch, driver).await.unwrap();

    let state = parse(&conn.retained_str("farm/valve/state").unwrap());
    assert_eq!(state, json!({ "open": true }));
}

#[tokio::test(start_paused = true)]
async fn root_device_errors_are_published_once() {
    let mut registry = DeviceRegistry::new();
    registry
        .telemetry(
            "",
            Telemetry::new(
                Duration::from_secs(1),
                SampleFn::arc(|| async {
                    Err::<Option<Value>, _>(DeviceError::new("offline", "bus down"))
                }),
            ),
        )
        .unwrap();

    let conn = Arc::new(MemoryConnection::new());
    let orch = build(&conn, cfg(), registry.close());
    run_with(&orch, tokio::time::sleep(Duration::from_millis(3_500)))
        .await
        .unwrap();

    let events = conn.payloads("farm/error");
    assert_eq!(events.len(), 1);
    assert!(parse(&events[0]).get("device").is_none());
    assert_eq!(conn.retained_str("farm/availability").as_deref(), Some("offline"));
}

#[test]
fn registration_faults_surface_before_startup() {
    let mut registry = DeviceRegistry::new();
    let err = registry
        .telemetry(
            "bad/name",
            Telemetry::new(
                Duration::from_secs(1),
                SampleFn::arc(|| async { Ok::<_, DeviceError>(None) }),
            ),
        )
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidName { .. }));

    let err = registry.resolve::<String>().unwrap_err();
    assert!(matches!(err, ConfigError::UnresolvedParameter { .. }));
}

#[tokio::test]
async fn closed_connection_aborts_startup() {
    let conn = Arc::new(MemoryConnection::new());
    conn.disconnect().await.unwrap();

    let orch = build(&conn, cfg(), Registrations::default());
    let err = orch.run().await.unwrap_err();
    assert!(matches!(err, RuntimeError::Transport(TransportError::Closed)));
    assert_eq!(*orch.phase().borrow(), Phase::Stopped);
}

