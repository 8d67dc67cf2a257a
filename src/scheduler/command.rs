//! # Command loop.
//!
//! Every inbound message becomes its own handler invocation in a local
//! [`JoinSet`], so a slow command does not hold up the next one. Results are
//! settled back on the device task, which keeps the dedup state exclusive:
//!
//! ```text
//! select {
//!   inbound msg      → spawn guarded(handler.handle(payload))
//!   invocation done  → Some(state) → publish {prefix}/{dev}/state (retained)
//!                      Err(e)      → error reporter
//!   cancelled        → stop accepting, settle in-flight invocations, exit
//! }
//! ```

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::devices::{Command, ROOT_LABEL};
use crate::error::DeviceError;
use crate::events::{Event, EventKind};
use crate::observability::ErrorTracker;
use crate::transport::Inbound;

use super::{DeviceIo, guarded};

type Invocation = Result<Option<Value>, DeviceError>;

pub(crate) async fn run(
    io: Arc<DeviceIo>,
    name: Option<Arc<str>>,
    handler: Arc<dyn Command>,
    mut inbox: mpsc::Receiver<Inbound>,
    token: CancellationToken,
) {
    let device = name.as_deref();
    let mut tracker = ErrorTracker::new();
    let mut inflight: JoinSet<Invocation> = JoinSet::new();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            msg = inbox.recv() => match msg {
                Some(msg) => {
                    let handler = Arc::clone(&handler);
                    inflight.spawn(async move { guarded(handler.handle(msg.payload), None).await });
                }
                None => break,
            },
            Some(done) = inflight.join_next(), if !inflight.is_empty() => {
                settle(&io, &mut tracker, device, done).await;
            }
        }
    }

    inbox.close();
    while let Some(done) = inflight.join_next().await {
        settle(&io, &mut tracker, device, done).await;
    }
    io.lifecycle(Event::new(EventKind::DeviceStopped).with_device(device.unwrap_or(ROOT_LABEL)));
}

async fn settle(
    io: &DeviceIo,
    tracker: &mut ErrorTracker,
    device: Option<&str>,
    done: Result<Invocation, JoinError>,
) {
    let outcome = done.unwrap_or_else(|e| Err(DeviceError::new("aborted", e.to_string())));
    match outcome {
        Ok(state) => {
            io.errors.recovered(tracker, device).await;
            if let Some(state) = state {
                let _ = io.publish_state(device, &state).await;
            }
        }
        Err(e) => io.errors.report(tracker, device, &e).await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use serde_json::json;

    use super::super::testing::io_for;
    use super::*;
    use crate::devices::{CommandFn, DeviceRegistry};
    use crate::transport::Connection;

    #[tokio::test]
    async fn commands_publish_state_and_report_faults() {
        let mut registry = DeviceRegistry::new();
        let lamp = CommandFn::arc(|payload: Bytes| async move {
            match payload.as_ref() {
                b"on" => Ok(Some(json!({"on": true}))),
                b"off" => Ok(Some(json!({"on": false}))),
                b"noop" => Ok(None),
                _ => Err(DeviceError::new("bad_command", "unknown command")),
            }
        });
        registry.command("lamp", Arc::clone(&lamp)).unwrap();
        let (conn, io, _regs) = io_for(registry, false).await;

        let (tx, rx) = mpsc::channel(8);
        conn.subscribe("farm/lamp/set", tx).await.unwrap();
        let token = CancellationToken::new();
        let task = tokio::spawn(run(
            Arc::clone(&io),
            Some(Arc::from("lamp")),
            lamp,
            rx,
            token.clone(),
        ));

        for cmd in ["on", "blink", "blink", "noop"] {
            conn.inject("farm/lamp/set", cmd);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        token.cancel();
        task.await.unwrap();

        assert_eq!(conn.payloads("farm/lamp/state"), vec![r#"{"on":true}"#]);
        assert_eq!(conn.sent_to("farm/lamp/error").len(), 1);
        assert_eq!(io.health.status(Some("lamp")), Some(crate::health::DeviceStatus::Ok));
    }

    #[tokio::test]
    async fn handler_panic_does_not_stop_the_device() {
        let mut registry = DeviceRegistry::new();
        let flaky = CommandFn::arc(|payload: Bytes| async move {
            if payload.as_ref() == b"crash" {
                panic!("handler bug");
            }
            Ok::<_, DeviceError>(Some(json!("ok")))
        });
        registry.command("", Arc::clone(&flaky)).unwrap();
        let (conn, io, _regs) = io_for(registry, false).await;

        let (tx, rx) = mpsc::channel(8);
        conn.subscribe("farm/set", tx).await.unwrap();
        let token = CancellationToken::new();
        let task = tokio::spawn(run(io, None, flaky, rx, token.clone()));

        conn.inject("farm/set", "crash");
        tokio::time::sleep(Duration::from_millis(20)).await;
        conn.inject("farm/set", "again");
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        task.await.unwrap();

        let err: Value = serde_json::from_str(&conn.payloads("farm/error")[0]).unwrap();
        assert_eq!(err["error_type"], "panic");
        assert_eq!(conn.payloads("farm/state"), vec![r#""ok""#]);
    }
}
