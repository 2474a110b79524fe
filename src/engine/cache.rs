use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::RwLock;

use super::Dimension;
use crate::system::ProcessSnapshot;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CpuPayload {
    pub cpu: f64,
    pub timestamp: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryPayload {
    pub memory_usage: f64,
    #[serde(rename = "usedMB")]
    pub used_mb: u64,
    /// Total memory in MiB.
    pub total_memory: u64,
    pub timestamp: String,
}

/// A latest-value slot. Writers swap in a whole new `Arc`, so readers only
/// ever see complete payloads.
struct Slot<T> {
    value: RwLock<Option<Arc<T>>>,
    writes: AtomicU64,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Slot {
            value: RwLock::new(None),
            writes: AtomicU64::new(0),
        }
    }

    async fn get(&self) -> Option<Arc<T>> {
        self.value.read().await.clone()
    }

    async fn put(&self, value: T) {
        *self.value.write().await = Some(Arc::new(value));
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

/// Most recent reading for each dimension. Each field has exactly one
/// writer, its refresh loop.
pub struct MetricsCache {
    cpu: Slot<CpuPayload>,
    memory: Slot<MemoryPayload>,
    processes: Slot<Vec<ProcessSnapshot>>,
}

impl Default for MetricsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCache {
    pub fn new() -> Self {
        MetricsCache {
            cpu: Slot::new(),
            memory: Slot::new(),
            processes: Slot::new(),
        }
    }

    pub async fn cpu(&self) -> Option<Arc<CpuPayload>> {
        self.cpu.get().await
    }

    pub async fn memory(&self) -> Option<Arc<MemoryPayload>> {
        self.memory.get().await
    }

    pub async fn processes(&self) -> Option<Arc<Vec<ProcessSnapshot>>> {
        self.processes.get().await
    }

    pub async fn set_cpu(&self, payload: CpuPayload) {
        self.cpu.put(payload).await;
    }

    pub async fn set_memory(&self, payload: MemoryPayload) {
        self.memory.put(payload).await;
    }

    pub async fn set_processes(&self, snapshots: Vec<ProcessSnapshot>) {
        self.processes.put(snapshots).await;
    }

    /// Number of completed writes to one dimension since construction.
    pub fn writes(&self, dimension: Dimension) -> u64 {
        match dimension {
            Dimension::Cpu => self.cpu.writes(),
            Dimension::Memory => self.memory.writes(),
            Dimension::Processes => self.processes.writes(),
        }
    }
}
