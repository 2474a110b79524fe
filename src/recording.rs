//! Recording sessions: a time-boxed pass that periodically snapshots every
//! process and stores the ones above both session thresholds.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Local};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::format::format_timestamp;
use crate::store::{RecordedProcess, Store};
use crate::system::{Collector, PortMap, ProcessSnapshot};

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub id: i64,
    pub cpu_threshold: f64,
    pub ram_threshold: f64,
    pub duration_sec: u64,
    pub started_at: DateTime<Local>,
    pub end_time: DateTime<Local>,
}

impl RecordingSession {
    /// Both thresholds must be exceeded.
    pub fn matches(&self, cpu_percent: f64, memory_percent: f64) -> bool {
        cpu_percent > self.cpu_threshold && memory_percent > self.ram_threshold
    }
}

enum Slot {
    Idle,
    /// Reserved while the session row is being written.
    Starting,
    Active {
        session: RecordingSession,
        cancel: CancellationToken,
    },
}

struct Inner {
    slot: RwLock<Slot>,
    store: Option<Store>,
    collector: Arc<Collector>,
    sample_interval: Duration,
    closed: CancellationToken,
}

/// Owner of the single recording slot. Clones share the slot.
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<Inner>,
}

impl Recorder {
    pub fn new(store: Option<Store>, collector: Arc<Collector>, sample_interval: Duration) -> Self {
        Recorder {
            inner: Arc::new(Inner {
                slot: RwLock::new(Slot::Idle),
                store,
                collector,
                sample_interval,
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Opens a session and launches its sampling loop. Returns the session id.
    pub async fn start(&self, cpu_threshold: f64, ram_threshold: f64, duration_sec: u64) -> Result<i64> {
        validate(cpu_threshold, ram_threshold, duration_sec)?;
        let store = self
            .inner
            .store
            .clone()
            .ok_or(EngineError::PersistenceUnavailable)?;

        {
            let mut slot = self.inner.slot.write().await;
            if self.inner.closed.is_cancelled() {
                return Err(EngineError::ShuttingDown);
            }
            if !matches!(*slot, Slot::Idle) {
                return Err(EngineError::RecordingAlreadyActive);
            }
            *slot = Slot::Starting;
        }

        let started_at = Local::now();
        let end_time = started_at
            + ChronoDuration::seconds(i64::try_from(duration_sec).unwrap_or(i64::MAX));

        let id = match store
            .insert_session(&started_at, &end_time, cpu_threshold, ram_threshold, duration_sec)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                *self.inner.slot.write().await = Slot::Idle;
                return Err(err.into());
            }
        };

        let session = RecordingSession {
            id,
            cpu_threshold,
            ram_threshold,
            duration_sec,
            started_at,
            end_time,
        };
        let cancel = CancellationToken::new();
        {
            let mut slot = self.inner.slot.write().await;
            if self.inner.closed.is_cancelled() {
                *slot = Slot::Idle;
                drop(slot);
                if let Err(err) = store.finish_session(id, &Local::now()).await {
                    warn!(session = id, "failed to mark session stopped: {err}");
                }
                info!(session = id, "recording abandoned during shutdown");
                return Err(EngineError::ShuttingDown);
            }
            *slot = Slot::Active {
                session: session.clone(),
                cancel: cancel.clone(),
            };
        }

        tokio::spawn(sample_loop(self.clone(), store, session, cancel));
        info!(
            session = id,
            cpu_threshold, ram_threshold, duration_sec, "recording started"
        );
        Ok(id)
    }

    /// Ends the active session and marks its row stopped.
    pub async fn stop(&self) -> Result<()> {
        self.stop_matching(None).await
    }

    /// Refuses further sessions and stops the active one. A start that is
    /// still writing its session row gives up instead of going active.
    pub async fn close(&self) {
        self.inner.closed.cancel();
        match self.stop().await {
            Ok(()) | Err(EngineError::RecordingNotActive) => {}
            Err(err) => warn!("failed to stop recording on close: {err}"),
        }
    }

    pub async fn status(&self) -> (bool, Option<RecordingSession>) {
        match &*self.inner.slot.read().await {
            Slot::Active { session, .. } => (true, Some(session.clone())),
            _ => (false, None),
        }
    }

    pub async fn active_session(&self) -> Option<RecordingSession> {
        self.status().await.1
    }

    /// Stops the active session, only when it is `only_id` if one is given.
    async fn stop_matching(&self, only_id: Option<i64>) -> Result<()> {
        let session = {
            let mut slot = self.inner.slot.write().await;
            match &*slot {
                Slot::Active { session, .. } if only_id.is_none_or(|id| id == session.id) => {}
                _ => return Err(EngineError::RecordingNotActive),
            }
            match std::mem::replace(&mut *slot, Slot::Idle) {
                Slot::Active { session, cancel } => {
                    cancel.cancel();
                    session
                }
                _ => return Err(EngineError::RecordingNotActive),
            }
        };

        if let Some(store) = &self.inner.store
            && let Err(err) = store.finish_session(session.id, &Local::now()).await
        {
            warn!(session = session.id, "failed to mark session stopped: {err}");
        }
        info!(session = session.id, "recording stopped");
        Ok(())
    }
}

/// NaN is not positive.
fn positive(value: f64) -> bool {
    value > 0.0
}

pub(crate) fn validate(cpu_threshold: f64, ram_threshold: f64, duration_sec: u64) -> Result<()> {
    if !positive(cpu_threshold) {
        return Err(EngineError::InvalidArgument(
            "cpu threshold must be greater than 0".to_string(),
        ));
    }
    if !positive(ram_threshold) {
        return Err(EngineError::InvalidArgument(
            "ram threshold must be greater than 0".to_string(),
        ));
    }
    if duration_sec == 0 {
        return Err(EngineError::InvalidArgument(
            "duration must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

async fn sample_loop(
    recorder: Recorder,
    store: Store,
    session: RecordingSession,
    cancel: CancellationToken,
) {
    let period = recorder.inner.sample_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        if Local::now() >= session.end_time {
            debug!(session = session.id, "recording duration elapsed");
            // Err here means someone else already stopped the session.
            let _ = recorder.stop_matching(Some(session.id)).await;
            return;
        }

        let snapshots = match recorder.inner.collector.collect(Arc::new(PortMap::new())).await {
            Ok(snapshots) => snapshots,
            Err(err) => {
                warn!(session = session.id, "recording pass failed: {err}");
                continue;
            }
        };

        let recorded_at = format_timestamp(&Local::now());
        let mut saved = 0usize;
        for snapshot in snapshots
            .into_iter()
            .filter(|s| session.matches(s.cpu_percent, s.memory_percent))
        {
            if cancel.is_cancelled() {
                return;
            }
            let row = recorded_row(session.id, &recorded_at, snapshot);
            match store.insert_recorded_process(&row).await {
                Ok(()) => saved += 1,
                Err(err) => warn!(session = session.id, pid = row.pid, "failed to save process: {err}"),
            }
        }
        debug!(session = session.id, saved, "recording pass complete");
    }
}

fn recorded_row(session_id: i64, recorded_at: &str, snapshot: ProcessSnapshot) -> RecordedProcess {
    RecordedProcess {
        session_id,
        recorded_at: recorded_at.to_string(),
        pid: snapshot.pid,
        name: snapshot.name,
        cpu_percent: snapshot.cpu_percent,
        memory_percent: snapshot.memory_percent,
        memory_rss: snapshot.memory_rss,
        exe: snapshot.exe,
        cmdline: snapshot.cmdline,
        username: snapshot.username,
    }
}
