use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::store::{AlertKind, NewAlert, Store};

/// Per-dimension alert thresholds in percent. A value `<= 0` disables
/// alerting for that dimension.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertThresholds {
    pub cpu: f64,
    pub memory: f64,
}

/// Alerts raised by one reading. A breach is `value > threshold` with a
/// positive threshold; repeated breaches are reported every time.
pub fn breaches(thresholds: AlertThresholds, cpu: f64, memory: f64) -> Vec<NewAlert> {
    let mut out = Vec::new();
    if thresholds.cpu > 0.0 && cpu > thresholds.cpu {
        out.push(NewAlert {
            kind: AlertKind::Cpu,
            threshold: thresholds.cpu,
            current_value: cpu,
            message: format!(
                "CPU threshold exceeded: {cpu:.2}% (threshold: {:.2}%)",
                thresholds.cpu
            ),
        });
    }
    if thresholds.memory > 0.0 && memory > thresholds.memory {
        out.push(NewAlert {
            kind: AlertKind::Memory,
            threshold: thresholds.memory,
            current_value: memory,
            message: format!(
                "Memory threshold exceeded: {memory:.2}% (threshold: {:.2}%)",
                thresholds.memory
            ),
        });
    }
    out
}

pub struct AlertEvaluator {
    thresholds: RwLock<AlertThresholds>,
    store: Option<Store>,
}

impl AlertEvaluator {
    pub fn new(thresholds: AlertThresholds, store: Option<Store>) -> Self {
        AlertEvaluator {
            thresholds: RwLock::new(thresholds),
            store,
        }
    }

    pub async fn set_thresholds(&self, thresholds: AlertThresholds) {
        *self.thresholds.write().await = thresholds;
        info!(
            cpu = thresholds.cpu,
            memory = thresholds.memory,
            "alert thresholds updated"
        );
    }

    pub async fn thresholds(&self) -> AlertThresholds {
        *self.thresholds.read().await
    }

    /// Evaluates one reading and persists every breach. Returns the breaches
    /// found, whether or not they could be stored.
    pub async fn check(&self, cpu: f64, memory: f64) -> Vec<NewAlert> {
        let thresholds = self.thresholds().await;
        let found = breaches(thresholds, cpu, memory);

        if let Some(store) = &self.store {
            for alert in &found {
                if let Err(err) = store.insert_alert(alert).await {
                    warn!("failed to persist {} alert: {err}", alert.kind.as_str());
                }
            }
        }
        found
    }
}
