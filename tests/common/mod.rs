#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use hostpulse::config::EngineConfig;
use hostpulse::system::{RawProcess, StaticProbe};
use hostpulse::{AlertThresholds, Engine, Store};
use tempfile::TempDir;

/// Refresh loops that never tick during a test; refreshes are driven by hand.
pub fn manual_config() -> EngineConfig {
    let hour = Duration::from_secs(3600);
    EngineConfig {
        cpu_interval: hour,
        memory_interval: hour,
        processes_interval: hour,
        recording_interval: hour,
        max_workers: 4,
        history_queue_capacity: 16,
    }
}

pub async fn temp_store() -> (TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("monitor.db")).await.unwrap();
    (dir, store)
}

pub fn engine_with(
    probe: Arc<StaticProbe>,
    store: Option<Store>,
    config: EngineConfig,
) -> Engine {
    Engine::new(probe, store, config, AlertThresholds::default())
}

pub fn process(pid: u32, name: &str, cpu: f64, memory: f64) -> RawProcess {
    RawProcess {
        name: Some(name.to_string()),
        exe: Some(format!("/usr/bin/{name}")),
        cmdline: Some(format!("{name} --serve")),
        username: Some("tester".to_string()),
        cpu_percent: Some(cpu),
        memory_percent: Some(memory),
        memory_rss: Some(64 * 1024 * 1024),
        ..RawProcess::new(pid)
    }
}

/// Polls `check` for up to five seconds.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
