//! The monitoring engine: three gated refresh loops feeding a latest-value
//! cache, alert checks on every memory refresh, recording sessions, and
//! per-subscriber streams over the cache.

pub mod cache;
pub mod history;
pub mod stream;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alerts::{AlertEvaluator, AlertThresholds};
use crate::config::EngineConfig;
use crate::error::{EngineError, ProbeError, Result};
use crate::format::now_timestamp;
use crate::recording::{self, Recorder, RecordingSession};
use crate::store::{Alert, MetricsSample, RecordedProcess, SessionRecord, Store};
use crate::system::network::{NetworkProcessStat, top_network_processes};
use crate::system::{Collector, ProcessSnapshot, SystemProbe};

pub use cache::{CpuPayload, MemoryPayload, MetricsCache};
pub use history::HistoryWriter;
pub use stream::render_frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Cpu,
    Memory,
    Processes,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Dimension::Cpu, Dimension::Memory, Dimension::Processes];

    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::Cpu => "cpu",
            Dimension::Memory => "memory",
            Dimension::Processes => "processes",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Dimension::Cpu),
            "memory" | "mem" => Ok(Dimension::Memory),
            "processes" | "procs" => Ok(Dimension::Processes),
            other => Err(format!("unknown dimension: {other}")),
        }
    }
}

impl EngineConfig {
    /// Refresh and delivery period for one dimension.
    pub fn interval(&self, dimension: Dimension) -> Duration {
        match dimension {
            Dimension::Cpu => self.cpu_interval,
            Dimension::Memory => self.memory_interval,
            Dimension::Processes => self.processes_interval,
        }
    }
}

/// What a call to [`MonitoringState::set`] changed.
enum Transition {
    Started(CancellationToken),
    Stopped,
    Unchanged,
}

struct MonitoringFlag {
    enabled: bool,
    cancel: Option<CancellationToken>,
}

/// The process-wide on/off switch and the cancellation scope of the refresh
/// loops it launched.
pub struct MonitoringState {
    flag: RwLock<MonitoringFlag>,
    generation: AtomicU64,
}

impl Default for MonitoringState {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitoringState {
    pub fn new() -> Self {
        MonitoringState {
            flag: RwLock::new(MonitoringFlag {
                enabled: false,
                cancel: None,
            }),
            generation: AtomicU64::new(0),
        }
    }

    pub async fn is_enabled(&self) -> bool {
        self.flag.read().await.enabled
    }

    /// How many times the refresh loops have been launched.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    async fn set(&self, enabled: bool, parent: &CancellationToken) -> Transition {
        let mut flag = self.flag.write().await;
        match (flag.enabled, enabled) {
            (false, true) => {
                let token = parent.child_token();
                flag.enabled = true;
                flag.cancel = Some(token.clone());
                self.generation.fetch_add(1, Ordering::Relaxed);
                Transition::Started(token)
            }
            (true, false) => {
                flag.enabled = false;
                if let Some(token) = flag.cancel.take() {
                    token.cancel();
                }
                Transition::Stopped
            }
            _ => Transition::Unchanged,
        }
    }
}

struct EngineInner {
    config: EngineConfig,
    collector: Arc<Collector>,
    cache: MetricsCache,
    monitoring: MonitoringState,
    alerts: AlertEvaluator,
    recorder: Recorder,
    store: Option<Store>,
    history: Option<HistoryWriter>,
    history_task: Mutex<Option<JoinHandle<()>>>,
    root: CancellationToken,
}

/// Handle to the monitoring engine. Clones share the same engine.
///
/// Must be created inside a Tokio runtime; construction spawns the history
/// writer when a store is configured.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(
        probe: Arc<dyn SystemProbe>,
        store: Option<Store>,
        config: EngineConfig,
        thresholds: AlertThresholds,
    ) -> Self {
        let root = CancellationToken::new();
        let collector = Arc::new(Collector::new(probe, config.max_workers));
        let (history, history_task) = match &store {
            Some(store) => {
                let (writer, task) =
                    HistoryWriter::spawn(store.clone(), config.history_queue_capacity, root.child_token());
                (Some(writer), Some(task))
            }
            None => (None, None),
        };

        Engine {
            inner: Arc::new(EngineInner {
                collector: Arc::clone(&collector),
                cache: MetricsCache::new(),
                monitoring: MonitoringState::new(),
                alerts: AlertEvaluator::new(thresholds, store.clone()),
                recorder: Recorder::new(store.clone(), collector, config.recording_interval),
                store,
                history,
                history_task: Mutex::new(history_task),
                root,
                config,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn has_store(&self) -> bool {
        self.inner.store.is_some()
    }

    /// Turns monitoring on or off. Repeating the current state is a no-op.
    pub async fn set_monitoring_enabled(&self, enabled: bool) {
        match self.inner.monitoring.set(enabled, &self.inner.root).await {
            Transition::Started(token) => {
                info!("monitoring enabled, starting metric collection");
                for dimension in Dimension::ALL {
                    tokio::spawn(refresh_loop(
                        Arc::clone(&self.inner),
                        dimension,
                        token.clone(),
                    ));
                }
            }
            Transition::Stopped => info!("monitoring disabled, metric collection stopped"),
            Transition::Unchanged => debug!(enabled, "monitoring already in requested state"),
        }
    }

    pub async fn monitoring_enabled(&self) -> bool {
        self.inner.monitoring.is_enabled().await
    }

    pub fn generation(&self) -> u64 {
        self.inner.monitoring.generation()
    }

    /// Runs one refresh of `dimension` now, through the same gate as the
    /// timers. Returns false when monitoring is off.
    pub async fn refresh(&self, dimension: Dimension) -> bool {
        self.inner.refresh(dimension).await
    }

    pub async fn latest_cpu(&self) -> Option<Arc<CpuPayload>> {
        self.inner.cache.cpu().await
    }

    pub async fn latest_memory(&self) -> Option<Arc<MemoryPayload>> {
        self.inner.cache.memory().await
    }

    pub async fn latest_processes(&self) -> Option<Arc<Vec<ProcessSnapshot>>> {
        self.inner.cache.processes().await
    }

    pub fn cache_writes(&self, dimension: Dimension) -> u64 {
        self.inner.cache.writes(dimension)
    }

    /// Streams `dimension` frames into `tx` until the receiver is dropped or
    /// the engine shuts down.
    pub fn subscribe(&self, dimension: Dimension, tx: mpsc::Sender<String>) -> JoinHandle<()> {
        debug!(%dimension, "subscriber attached");
        tokio::spawn(stream::run_subscriber(
            Arc::clone(&self.inner),
            dimension,
            tx,
            self.inner.root.child_token(),
        ))
    }

    pub async fn start_recording(
        &self,
        cpu_threshold: f64,
        ram_threshold: f64,
        duration_sec: u64,
    ) -> Result<i64> {
        recording::validate(cpu_threshold, ram_threshold, duration_sec)?;
        if !self.monitoring_enabled().await {
            return Err(EngineError::MonitoringDisabled);
        }
        self.inner
            .recorder
            .start(cpu_threshold, ram_threshold, duration_sec)
            .await
    }

    pub async fn stop_recording(&self) -> Result<()> {
        self.inner.recorder.stop().await
    }

    pub async fn recording_status(&self) -> (bool, Option<RecordingSession>) {
        self.inner.recorder.status().await
    }

    pub async fn recorded_processes(&self, session_id: i64, limit: i64) -> Result<Vec<RecordedProcess>> {
        match &self.inner.store {
            Some(store) => Ok(store.recorded_processes(session_id, limit).await?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn sessions(&self, limit: i64) -> Result<Vec<SessionRecord>> {
        match &self.inner.store {
            Some(store) => Ok(store.sessions(limit).await?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn set_alert_thresholds(&self, cpu: f64, memory: f64) {
        self.inner
            .alerts
            .set_thresholds(AlertThresholds { cpu, memory })
            .await;
    }

    pub async fn alert_thresholds(&self) -> AlertThresholds {
        self.inner.alerts.thresholds().await
    }

    pub async fn alerts(&self, limit: i64, unacknowledged_only: bool) -> Result<Vec<Alert>> {
        match &self.inner.store {
            Some(store) => Ok(store.alerts(limit, unacknowledged_only).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Returns whether an alert with `id` existed.
    pub async fn acknowledge_alert(&self, id: i64) -> Result<bool> {
        match &self.inner.store {
            Some(store) => Ok(store.acknowledge_alert(id).await?),
            None => Ok(false),
        }
    }

    pub async fn metrics_history(
        &self,
        from: &DateTime<Local>,
        to: &DateTime<Local>,
        limit: i64,
    ) -> Result<Vec<MetricsSample>> {
        match &self.inner.store {
            Some(store) => Ok(store.metrics_history(from, to, limit).await?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn prune_metrics_history(&self, days_to_keep: u32) -> Result<u64> {
        match &self.inner.store {
            Some(store) => Ok(store.prune_metrics_history(days_to_keep).await?),
            None => Ok(0),
        }
    }

    pub async fn clear_metrics_history(&self) -> Result<u64> {
        match &self.inner.store {
            Some(store) => Ok(store.clear_metrics_history().await?),
            None => Ok(0),
        }
    }

    pub async fn top_network_processes(&self, limit: usize) -> Result<Vec<NetworkProcessStat>> {
        let probe = Arc::clone(self.inner.collector.probe());
        Ok(blocking(move || top_network_processes(probe.as_ref(), limit)).await?)
    }

    /// Stops everything the engine started: refresh loops, the active
    /// recording, subscriber loops and the history writer. Returns once
    /// queued history samples are written.
    pub async fn shutdown(&self) {
        self.set_monitoring_enabled(false).await;
        self.inner.recorder.close().await;
        self.inner.root.cancel();

        let task = self.inner.history_task.lock().await.take();
        if let Some(task) = task
            && let Err(err) = task.await
        {
            warn!("history writer ended abnormally: {err}");
        }
        info!("engine shut down");
    }
}

impl EngineInner {
    async fn refresh(&self, dimension: Dimension) -> bool {
        if !self.monitoring.is_enabled().await {
            return false;
        }
        match dimension {
            Dimension::Cpu => self.refresh_cpu().await,
            Dimension::Memory => self.refresh_memory().await,
            Dimension::Processes => self.refresh_processes().await,
        }
        true
    }

    async fn refresh_cpu(&self) {
        let probe = Arc::clone(self.collector.probe());
        match blocking(move || probe.cpu_percent()).await {
            Ok(cpu) => {
                self.cache
                    .set_cpu(CpuPayload {
                        cpu,
                        timestamp: now_timestamp(),
                    })
                    .await;
            }
            Err(err) => warn!("failed to refresh cpu metrics: {err}"),
        }
    }

    async fn refresh_memory(&self) {
        let probe = Arc::clone(self.collector.probe());
        let reading = match blocking(move || probe.memory()).await {
            Ok(reading) => reading,
            Err(err) => {
                warn!("failed to refresh memory metrics: {err}");
                return;
            }
        };
        let timestamp = now_timestamp();
        self.cache
            .set_memory(MemoryPayload {
                memory_usage: reading.percent,
                used_mb: reading.used_mb,
                total_memory: reading.total_mb,
                timestamp: timestamp.clone(),
            })
            .await;

        let cpu = self.cache.cpu().await.map(|c| c.cpu).unwrap_or(0.0);

        if let Some(history) = &self.history
            && let Some(session) = self.recorder.active_session().await
            && session.matches(cpu, reading.percent)
        {
            history.submit(MetricsSample {
                timestamp,
                cpu_percent: cpu,
                memory_percent: reading.percent,
                memory_used_mb: reading.used_mb,
                memory_total_mb: reading.total_mb,
            });
        }

        let raised = self.alerts.check(cpu, reading.percent).await;
        if !raised.is_empty() {
            debug!(count = raised.len(), "alert thresholds breached");
        }
    }

    async fn refresh_processes(&self) {
        let ports = Arc::new(self.collector.port_map().await);
        match self.collector.collect(ports).await {
            Ok(snapshots) => self.cache.set_processes(snapshots).await,
            Err(err) => warn!("failed to refresh process list: {err}"),
        }
    }
}

/// Runs a probe read on the blocking pool.
async fn blocking<T, F>(read: F) -> std::result::Result<T, ProbeError>
where
    T: Send + 'static,
    F: FnOnce() -> std::result::Result<T, ProbeError> + Send + 'static,
{
    tokio::task::spawn_blocking(read).await?
}

async fn refresh_loop(engine: Arc<EngineInner>, dimension: Dimension, cancel: CancellationToken) {
    let period = engine.config.interval(dimension);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        engine.refresh(dimension).await;
    }
    debug!(%dimension, "refresh loop stopped");
}
