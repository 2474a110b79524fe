//! Per-subscriber delivery loops. Each subscriber pulls the latest cached
//! value on its own cadence; nothing is fanned out from the refresh side.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::cache::MetricsCache;
use super::{Dimension, EngineInner};
use crate::format::now_timestamp;

pub const DISABLED_MESSAGE: &str = "Monitoring is disabled";
pub const COLLECTING_MESSAGE: &str = "Collecting data...";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusFrame {
    monitoring_enabled: bool,
    message: &'static str,
    #[serde(flatten)]
    placeholder: Option<Placeholder>,
}

/// Zeroed fields sent alongside the collecting message.
#[derive(Serialize)]
#[serde(untagged)]
enum Placeholder {
    Cpu {
        cpu: u8,
        timestamp: String,
    },
    Memory {
        #[serde(rename = "memoryUsage")]
        memory_usage: u8,
        #[serde(rename = "usedMB")]
        used_mb: u8,
        #[serde(rename = "totalMemory")]
        total_memory: u8,
        timestamp: String,
    },
}

fn collecting_frame(placeholder: Option<Placeholder>) -> Result<String, serde_json::Error> {
    serde_json::to_string(&StatusFrame {
        monitoring_enabled: true,
        message: COLLECTING_MESSAGE,
        placeholder,
    })
}

/// Renders the frame a subscriber of `dimension` receives right now.
pub async fn render_frame(
    dimension: Dimension,
    monitoring_enabled: bool,
    cache: &MetricsCache,
) -> Result<String, serde_json::Error> {
    if !monitoring_enabled {
        return disabled_frame();
    }

    match dimension {
        Dimension::Cpu => match cache.cpu().await {
            Some(payload) => serde_json::to_string(&*payload),
            None => collecting_frame(Some(Placeholder::Cpu {
                cpu: 0,
                timestamp: now_timestamp(),
            })),
        },
        Dimension::Memory => match cache.memory().await {
            Some(payload) => serde_json::to_string(&*payload),
            None => collecting_frame(Some(Placeholder::Memory {
                memory_usage: 0,
                used_mb: 0,
                total_memory: 0,
                timestamp: now_timestamp(),
            })),
        },
        Dimension::Processes => match cache.processes().await {
            Some(snapshots) => serde_json::to_string(&*snapshots),
            None => collecting_frame(None),
        },
    }
}

pub fn disabled_frame() -> Result<String, serde_json::Error> {
    serde_json::to_string(&StatusFrame {
        monitoring_enabled: false,
        message: DISABLED_MESSAGE,
        placeholder: None,
    })
}

/// Sends one frame immediately, then one per period, until the receiver
/// goes away, a frame fails to render, or `cancel` fires.
pub(super) async fn run_subscriber(
    engine: Arc<EngineInner>,
    dimension: Dimension,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(engine.config.interval(dimension));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let enabled = engine.monitoring.is_enabled().await;
        let frame = match render_frame(dimension, enabled, &engine.cache).await {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%dimension, "failed to serialize frame: {err}");
                break;
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = tx.send(frame) => {
                if sent.is_err() {
                    debug!(%dimension, "subscriber went away");
                    break;
                }
            }
        }
    }
    debug!(%dimension, "subscriber loop finished");
}
