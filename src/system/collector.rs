use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::network::ports_by_pid;
use super::probe::SystemProbe;
use super::process::{PortMap, ProcessSnapshot};
use crate::error::ProbeError;

pub const DEFAULT_MAX_WORKERS: usize = 10;

/// Produces point-in-time process snapshots from a [`SystemProbe`].
pub struct Collector {
    probe: Arc<dyn SystemProbe>,
    max_workers: usize,
}

impl Collector {
    pub fn new(probe: Arc<dyn SystemProbe>, max_workers: usize) -> Self {
        Collector {
            probe,
            max_workers: max_workers.max(1),
        }
    }

    pub fn probe(&self) -> &Arc<dyn SystemProbe> {
        &self.probe
    }

    /// Current socket ports per pid. A failed socket read yields an empty
    /// map so the process pass can still go ahead.
    pub async fn port_map(&self) -> PortMap {
        let probe = Arc::clone(&self.probe);
        match tokio::task::spawn_blocking(move || probe.connections()).await {
            Ok(Ok(connections)) => ports_by_pid(&connections),
            Ok(Err(err)) => {
                warn!("failed to read network connections: {err}");
                PortMap::new()
            }
            Err(err) => {
                warn!("network connection task failed: {err}");
                PortMap::new()
            }
        }
    }

    /// Snapshots every live process with at most `max_workers` inspections
    /// in flight. Output order is unspecified.
    pub async fn collect(&self, ports: Arc<PortMap>) -> Result<Vec<ProcessSnapshot>, ProbeError> {
        let probe = Arc::clone(&self.probe);
        let pids = tokio::task::spawn_blocking(move || probe.refresh_processes()).await??;

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();
        let mut snapshots = Vec::with_capacity(pids.len());

        for pid in pids {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let probe = Arc::clone(&self.probe);
            let ports = Arc::clone(&ports);
            tasks.spawn_blocking(move || {
                let _permit = permit;
                ProcessSnapshot::from_raw(probe.inspect(pid), ports.get(&pid))
            });

            // Drain whatever already finished so the set stays small.
            while let Some(done) = tasks.try_join_next() {
                push_result(&mut snapshots, done);
            }
        }

        while let Some(done) = tasks.join_next().await {
            push_result(&mut snapshots, done);
        }

        debug!(count = snapshots.len(), "process pass complete");
        Ok(snapshots)
    }

    /// Sequential variant for small top-N views. `limit == 0` means all.
    pub fn collect_limited(
        &self,
        limit: usize,
        ports: &PortMap,
    ) -> Result<Vec<ProcessSnapshot>, ProbeError> {
        let mut pids = self.probe.refresh_processes()?;
        if limit > 0 {
            pids.truncate(limit);
        }
        Ok(pids
            .into_iter()
            .map(|pid| ProcessSnapshot::from_raw(self.probe.inspect(pid), ports.get(&pid)))
            .collect())
    }
}

fn push_result(
    snapshots: &mut Vec<ProcessSnapshot>,
    done: Result<ProcessSnapshot, tokio::task::JoinError>,
) {
    match done {
        Ok(snapshot) => snapshots.push(snapshot),
        Err(err) => warn!("process inspection failed: {err}"),
    }
}
