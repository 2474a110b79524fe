use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::store::{MetricsSample, Store};

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Bounded queue in front of the metrics-history table. Submitting never
/// waits on the database; a full queue drops the sample.
#[derive(Clone)]
pub struct HistoryWriter {
    tx: mpsc::Sender<MetricsSample>,
}

impl HistoryWriter {
    /// Starts the drain task. It runs until `cancel` fires or every writer
    /// handle is dropped, flushing whatever is already queued.
    pub fn spawn(store: Store, capacity: usize, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(drain(store, rx, cancel));
        (HistoryWriter { tx }, handle)
    }

    /// Queues a sample. Returns false when it was dropped.
    pub fn submit(&self, sample: MetricsSample) -> bool {
        match self.tx.try_send(sample) {
            Ok(()) => true,
            Err(TrySendError::Full(sample)) => {
                warn!(timestamp = %sample.timestamp, "history queue full, dropping sample");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("history writer closed, dropping sample");
                false
            }
        }
    }
}

async fn drain(store: Store, mut rx: mpsc::Receiver<MetricsSample>, cancel: CancellationToken) {
    loop {
        let sample = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(sample) => sample,
                None => return,
            },
        };
        save(&store, &sample).await;
    }

    rx.close();
    while let Ok(sample) = rx.try_recv() {
        save(&store, &sample).await;
    }
}

async fn save(store: &Store, sample: &MetricsSample) {
    if let Err(err) = store.insert_metrics_sample(sample).await {
        warn!("failed to save metrics history: {err}");
    }
}
