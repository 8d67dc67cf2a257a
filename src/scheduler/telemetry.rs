//! # Telemetry loop.
//!
//! ```text
//! loop {
//!   ├─ sample (panic-isolated, optional timeout)   ── cancellable
//!   │    ├─ Ok(None)        → recovered?, nothing to publish
//!   │    ├─ Ok(Some(v))     → recovered?, first sample or strategy says yes → publish
//!   │    └─ Err(e)          → error reporter (dedup), keep looping
//!   └─ sleep(interval)                              ── cancellable
//! }
//! ```
//!
//! `previous` handed to the strategy is the last reading that was actually sent.
//! A reading whose publish fails is not remembered and the strategy is not told,
//! so the next cycle decides again against what observers really have.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::devices::{ROOT_LABEL, Telemetry};
use crate::events::{Event, EventKind};
use crate::observability::ErrorTracker;

use super::{DeviceIo, guarded};

pub(crate) async fn run(
    io: Arc<DeviceIo>,
    name: Option<Arc<str>>,
    spec: Telemetry,
    token: CancellationToken,
) {
    let device = name.as_deref();
    let mut strategy = spec.strategy.build(Arc::clone(&io.clock));
    let mut tracker = ErrorTracker::new();
    let mut last_published: Option<Value> = None;

    loop {
        let sampled = tokio::select! {
            _ = token.cancelled() => break,
            res = guarded(spec.handler.sample(), spec.timeout) => res,
        };

        match sampled {
            Ok(reading) => {
                io.errors.recovered(&mut tracker, device).await;
                if let Some(reading) = reading {
                    let publish = match &last_published {
                        None => true,
                        Some(prev) => strategy.should_publish(&reading, Some(prev)),
                    };
                    if publish && io.publish_state(device, &reading).await.is_ok() {
                        strategy.on_published();
                        last_published = Some(reading);
                    }
                }
            }
            Err(e) => io.errors.report(&mut tracker, device, &e).await,
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(spec.interval) => {}
        }
    }

    io.lifecycle(Event::new(EventKind::DeviceStopped).with_device(device.unwrap_or(ROOT_LABEL)));
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use serde_json::json;

    use super::super::testing::io_for;
    use super::*;
    use crate::devices::{DeviceRegistry, SampleFn};
    use crate::error::DeviceError;
    use crate::health::DeviceStatus;
    use crate::strategy::{OnChangeSpec, StrategySpec};

    async fn run_for(
        registry: DeviceRegistry,
        secs: u64,
    ) -> (Arc<crate::transport::MemoryConnection>, Arc<DeviceIo>) {
        let (conn, io, regs) = io_for(registry, false).await;
        let token = CancellationToken::new();
        let reg = regs.iter().next().unwrap().clone();
        let crate::devices::Archetype::Telemetry(spec) = reg.archetype().clone() else {
            panic!("not telemetry");
        };
        let task = tokio::spawn(run(Arc::clone(&io), reg.name_arc(), spec, token.clone()));
        tokio::time::sleep(Duration::from_secs(secs)).await;
        token.cancel();
        task.await.unwrap();
        (conn, io)
    }

    #[tokio::test(start_paused = true)]
    async fn first_sample_bypasses_strategy() {
        let mut registry = DeviceRegistry::new();
        let strategy = StrategySpec::every_samples(1_000);
        registry
            .telemetry(
                "gauge",
                Telemetry::new(
                    Duration::from_secs(1),
                    SampleFn::arc(|| async { Ok::<_, DeviceError>(Some(json!(10))) }),
                )
                .with_strategy(strategy),
            )
            .unwrap();
        let (conn, _io) = run_for(registry, 10).await;
        assert_eq!(conn.payloads("farm/gauge/state"), vec!["10"]);
        assert!(conn.sent_to("farm/gauge/state")[0].retain);
    }

    #[tokio::test(start_paused = true)]
    async fn dead_band_sequence() {
        let readings = [20.0, 20.4, 20.6, 21.2];
        let idx = Arc::new(AtomicU32::new(0));
        let sensor = {
            let idx = Arc::clone(&idx);
            SampleFn::arc(move || {
                let i = idx.fetch_add(1, Ordering::SeqCst) as usize;
                let reading = readings.get(i).map(|v| json!(v));
                async move { Ok::<_, DeviceError>(reading) }
            })
        };
        let mut registry = DeviceRegistry::new();
        registry
            .telemetry(
                "gauge",
                Telemetry::new(Duration::from_secs(1), sensor)
                    .with_strategy(StrategySpec::on_change(OnChangeSpec::threshold(0.5))),
            )
            .unwrap();
        let (conn, _io) = run_for(registry, 10).await;
        assert_eq!(conn.payloads("farm/gauge/state"), vec!["20.0", "20.6", "21.2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn faults_are_deduplicated_and_recovery_resets_status() {
        // timeout ×3, value ×1, then good readings.
        let calls = Arc::new(AtomicU32::new(0));
        let sensor = {
            let calls = Arc::clone(&calls);
            SampleFn::arc(move || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    match n {
                        0..=2 => Err(DeviceError::new("timeout", "no answer")),
                        3 => Err(DeviceError::new("value", "garbage")),
                        _ => Ok(Some(json!(1))),
                    }
                }
            })
        };
        let mut registry = DeviceRegistry::new();
        registry
            .telemetry("gauge", Telemetry::new(Duration::from_secs(1), sensor))
            .unwrap();
        let (conn, io) = run_for(registry, 10).await;

        let kinds: Vec<String> = conn
            .payloads("farm/gauge/error")
            .iter()
            .map(|p| {
                let v: Value = serde_json::from_str(p).unwrap();
                v["error_type"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(kinds, vec!["timeout", "value"]);
        assert_eq!(io.health.status(Some("gauge")), Some(DeviceStatus::Ok));
        assert!(!conn.payloads("farm/gauge/state").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_sample_times_out() {
        let mut registry = DeviceRegistry::new();
        registry
            .telemetry(
                "slow",
                Telemetry::new(
                    Duration::from_secs(1),
                    SampleFn::arc(|| async {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Ok::<_, DeviceError>(Some(json!(1)))
                    }),
                )
                .with_timeout(Duration::from_secs(2)),
            )
            .unwrap();
        let (conn, io) = run_for(registry, 5).await;
        let first: Value = serde_json::from_str(&conn.payloads("farm/slow/error")[0]).unwrap();
        assert_eq!(first["error_type"], "timeout");
        assert_eq!(io.health.status(Some("slow")), Some(DeviceStatus::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_publish_is_retried_as_first_sample() {
        let mut registry = DeviceRegistry::new();
        registry
            .telemetry(
                "gauge",
                Telemetry::new(
                    Duration::from_secs(1),
                    SampleFn::arc(|| async { Ok::<_, DeviceError>(Some(json!(5))) }),
                )
                .with_strategy(StrategySpec::on_change(OnChangeSpec::exact())),
            )
            .unwrap();
        let (conn, io, regs) = io_for(registry, false).await;
        conn.reject_sends(true);
        let reg = regs.iter().next().unwrap().clone();
        let crate::devices::Archetype::Telemetry(spec) = reg.archetype().clone() else {
            panic!("not telemetry");
        };
        let token = CancellationToken::new();
        let task = tokio::spawn(run(io, reg.name_arc(), spec, token.clone()));
        tokio::time::sleep(Duration::from_millis(2500)).await;
        conn.reject_sends(false);
        tokio::time::sleep(Duration::from_secs(3)).await;
        token.cancel();
        task.await.unwrap();
        assert_eq!(conn.payloads("farm/gauge/state"), vec!["5"]);
    }
}
