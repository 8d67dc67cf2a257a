//! # Free-form runner.
//!
//! The routine owns its loop; the runner only starts it and reacts to its exit:
//!
//! - `Ok(())` after cancellation → `DeviceStopped`;
//! - `Ok(())` before cancellation → `DeviceStopped`, device goes offline;
//! - error or panic → fault reported, device goes offline, `DeviceFailed`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::devices::{DeviceContext, ROOT_LABEL, Routine};
use crate::events::{Event, EventKind};
use crate::observability::ErrorTracker;

use super::{DeviceIo, guarded};

pub(crate) async fn run(
    io: Arc<DeviceIo>,
    name: Option<Arc<str>>,
    handler: Arc<dyn Routine>,
    token: CancellationToken,
) {
    let device = name.as_deref();
    let label = device.unwrap_or(ROOT_LABEL);
    let ctx = DeviceContext::new(Arc::clone(&io), name.clone(), token.clone());

    match guarded(handler.run(ctx), None).await {
        Ok(()) => {
            if !token.is_cancelled() {
                info!(device = label, "routine returned before shutdown");
                io.health.set_online(device, false).await;
            }
            io.lifecycle(Event::new(EventKind::DeviceStopped).with_device(label));
        }
        Err(e) => {
            warn!(device = label, error = %e, "routine failed, device offline");
            // A terminal failure is always published, whatever the routine reported before.
            let mut tracker = ErrorTracker::new();
            io.errors.report(&mut tracker, device, &e).await;
            io.health.set_online(device, false).await;
            io.lifecycle(
                Event::new(EventKind::DeviceFailed)
                    .with_device(label)
                    .with_reason(e.to_string()),
            );
        }
    }
}
