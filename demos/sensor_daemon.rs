//! # Example: sensor_daemon
//!
//! A small greenhouse daemon with one device of each archetype:
//!
//! - `climate`: telemetry, sampled every 2s, published when temperature moves by
//!   more than 0.5 or humidity by more than 2 (or at least every 60s);
//! - `vent`: command device, accepts `open` / `close` on `greenhouse/vent/set`;
//! - `watchdog`: free-form routine that reports a fault when the vent has been open
//!   for too long and clears it once the vent closes.
//!
//! ## Flow
//! ```text
//! connect (sentinel: greenhouse/status = "offline")
//!   ├─► greenhouse/{climate,vent,watchdog}/availability = "online"
//!   ├─► greenhouse/status = {"status":"online",...}      (every heartbeat)
//!   ├─► climate: sample → OnChange | Every(60s) → greenhouse/climate/state
//!   ├─► vent:    greenhouse/vent/set "open" → greenhouse/vent/state {"open":true}
//!   └─► watchdog: fault "vent_stuck" → greenhouse/watchdog/error + greenhouse/error
//! Ctrl-C
//!   └─► drain devices → availability "offline" → clean disconnect
//! ```
//!
//! ## Run
//! ```bash
//! # optional: DEVICEVISOR_CONFIG=demos/greenhouse.toml
//! cargo run --example sensor_daemon
//! mosquitto_pub -t greenhouse/vent/set -m open
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use devicevisor::{
    CommandFn, DeviceError, DeviceRegistry, HookError, HookFn, LogWriter, MqttConnection,
    OnChangeSpec, Orchestrator, RoutineFn, RuntimeConfig, Sample, StrategySpec, Telemetry,
    logging::{LogFormat, init},
};
use rand::Rng;
use serde_json::{Value, json};

/// Simulated temperature/humidity sensor drifting around a set point.
struct Climate {
    base_temp: f64,
}

#[async_trait]
impl Sample for Climate {
    async fn sample(&self) -> Result<Option<Value>, DeviceError> {
        let mut rng = rand::rng();
        if rng.random_ratio(1, 50) {
            return Err(DeviceError::new("sensor_crc", "checksum mismatch"));
        }
        let temp = self.base_temp + rng.random_range(-0.8..0.8);
        let humidity = 55.0_f64 + rng.random_range(-3.0..3.0);
        Ok(Some(json!({
            "temperature": (temp * 10.0).round() / 10.0,
            "humidity": humidity.round(),
        })))
    }
}

fn load_config() -> Result<RuntimeConfig, Box<dyn std::error::Error>> {
    match std::env::var("DEVICEVISOR_CONFIG") {
        Ok(path) => Ok(RuntimeConfig::from_toml_str(&std::fs::read_to_string(path)?)?),
        Err(_) => {
            let mut cfg = RuntimeConfig::default();
            cfg.prefix = "greenhouse".into();
            cfg.version = env!("CARGO_PKG_VERSION").into();
            cfg.heartbeat = Some(Duration::from_secs(30));
            cfg.publish_recovery = true;
            Ok(cfg)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init(LogFormat::Text, "sensor_daemon", "info,devicevisor=debug");
    let cfg = load_config()?;

    let mut registry = DeviceRegistry::new();
    registry.resources_mut().insert(AtomicBool::new(false));
    let vent_open = registry.resolve::<AtomicBool>()?;

    registry.telemetry(
        "climate",
        Telemetry::new(Duration::from_secs(2), Arc::new(Climate { base_temp: 22.0 }))
            .with_strategy(
                StrategySpec::on_change(
                    OnChangeSpec::exact()
                        .with_path("temperature", 0.5)
                        .with_path("humidity", 2.0),
                ) | StrategySpec::every_period(Duration::from_secs(60)),
            )
            .with_timeout(Duration::from_secs(1)),
    )?;

    let vent = Arc::clone(&vent_open);
    registry.command(
        "vent",
        CommandFn::arc(move |payload: Bytes| {
            let vent = Arc::clone(&vent);
            async move {
                let open = match payload.as_ref() {
                    b"open" => true,
                    b"close" => false,
                    other => {
                        return Err(DeviceError::new(
                            "bad_command",
                            format!(
                                "expected open|close, got {:?}",
                                String::from_utf8_lossy(other)
                            ),
                        ));
                    }
                };
                vent.store(open, Ordering::SeqCst);
                Ok(Some(json!({ "open": open })))
            }
        }),
    )?;

    let vent = Arc::clone(&vent_open);
    registry.free_form(
        "watchdog",
        RoutineFn::arc(move |mut ctx| {
            let vent = Arc::clone(&vent);
            async move {
                let mut open_for = Duration::ZERO;
                let step = Duration::from_secs(5);
                while ctx.sleep(step).await {
                    if vent.load(Ordering::SeqCst) {
                        open_for += step;
                    } else {
                        open_for = Duration::ZERO;
                        ctx.recovered().await;
                    }
                    if open_for >= Duration::from_secs(120) {
                        let err = DeviceError::new("vent_stuck", "vent open for over two minutes")
                            .with_detail("open_s", open_for.as_secs());
                        ctx.report(&err).await;
                    }
                    let _ = ctx.publish_state(&json!({ "vent_open_s": open_for.as_secs() })).await;
                }
                Ok(())
            }
        }),
    )?;

    let conn = Arc::new(MqttConnection::from_config(&cfg));
    let orchestrator = Orchestrator::builder(cfg, conn, registry.close())
        .with_subscriber(Arc::new(LogWriter::new()))
        .on_start(HookFn::arc("close-vent", {
            let vent = Arc::clone(&vent_open);
            move || {
                let vent = Arc::clone(&vent);
                async move {
                    vent.store(false, Ordering::SeqCst);
                    Ok::<_, HookError>(())
                }
            }
        }))
        .on_shutdown(HookFn::arc("park-vent", move || {
            let vent = Arc::clone(&vent_open);
            async move {
                vent.store(false, Ordering::SeqCst);
                Ok::<_, HookError>(())
            }
        }))
        .build();

    orchestrator.run().await?;
    Ok(())
}
