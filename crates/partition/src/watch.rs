//! Aggregated watch: one logical event stream over every partition's watch.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use kpart_core::{EventStream, ListRequest, Object, PartialWatchErrors, PartitionError, TransportError};
use kube::core::WatchEvent;
use metrics::counter;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::WatchConfig;
use crate::set::PartitionSet;
use crate::util::bounded;

pub type WatchItem<K> = Result<WatchEvent<K>, TransportError>;

/// Fan-in of per-partition watch streams.
///
/// Events of one partition arrive in the order that partition produced them; no order
/// is imposed across partitions. The stream ends once every sub-stream has ended.
pub struct AggregatedWatch<K> {
    rx: mpsc::Receiver<WatchItem<K>>,
    tx: Option<mpsc::Sender<WatchItem<K>>>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    failures: PartialWatchErrors,
    close_timeout: Duration,
}

impl<K: Object> AggregatedWatch<K> {
    pub fn new(queue_cap: usize, close_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(queue_cap.max(1));
        let (shutdown, _) = watch::channel(false);
        Self { rx, tx: Some(tx), shutdown, tasks: Vec::new(), failures: PartialWatchErrors::default(), close_timeout }
    }

    /// Register an opened sub-stream; its events are forwarded until it ends or the
    /// aggregate is closed. Returns false, dropping the stream, once the aggregate is sealed.
    pub fn add_stream(&mut self, partition: usize, stream: EventStream<K>) -> bool {
        let Some(tx) = self.tx.clone() else {
            warn!(partition, "aggregated watch already sealed; sub-stream dropped");
            return false;
        };
        let shutdown = self.shutdown.subscribe();
        self.tasks.push(tokio::spawn(forward(partition, stream, tx, shutdown)));
        true
    }

    pub fn add_failure(&mut self, partition: usize, error: TransportError) {
        self.failures.push(partition, error);
    }

    /// Stop accepting sub-streams; the aggregate ends when the registered ones do.
    pub fn seal(&mut self) {
        self.tx = None;
    }

    pub fn live_streams(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_finished()).count()
    }

    /// Failures recorded while opening; empty if every partition opened or was tolerated.
    pub fn errors(&self) -> &PartialWatchErrors {
        &self.failures
    }

    pub fn error(&self) -> Option<PartitionError> {
        if self.failures.is_empty() {
            None
        } else {
            Some(PartitionError::PartialWatch(self.failures.clone()))
        }
    }

    pub async fn recv(&mut self) -> Option<WatchItem<K>> {
        self.rx.recv().await
    }

    /// Close every sub-stream. Waits at most the close timeout, then aborts stragglers.
    pub async fn close(mut self) {
        self.tx = None;
        let _ = self.shutdown.send(true);
        self.rx.close();
        let tasks = std::mem::take(&mut self.tasks);
        let aborts: Vec<_> = tasks.iter().map(|t| t.abort_handle()).collect();
        let n = tasks.len();
        if tokio::time::timeout(self.close_timeout, futures::future::join_all(tasks)).await.is_err() {
            warn!(streams = n, timeout_ms = %self.close_timeout.as_millis(), "aggregated watch close timed out; aborting");
            for a in aborts {
                a.abort();
            }
        }
        info!(streams = n, "aggregated watch closed");
    }
}

impl<K> Drop for AggregatedWatch<K> {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        for t in self.tasks.drain(..) {
            t.abort();
        }
    }
}

impl<K> Stream for AggregatedWatch<K> {
    type Item = WatchItem<K>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

async fn forward<K>(
    partition: usize,
    mut stream: EventStream<K>,
    tx: mpsc::Sender<WatchItem<K>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut forwarded = 0usize;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            next = stream.next() => match next {
                Some(item) => {
                    if let Err(e) = &item {
                        debug!(partition, error = %e, "sub-stream error forwarded");
                    }
                    if tx.send(item).await.is_err() {
                        break;
                    }
                    forwarded += 1;
                }
                None => break,
            },
        }
    }
    debug!(partition, forwarded, "sub-stream forwarder ended");
}

/// Open a watch on every partition and aggregate them.
///
/// Opening never stops early: a partition that fails is recorded and the rest are still
/// tried. With `allow_partial_watch`, non-membership rejections are skipped silently.
pub async fn watch_partitioned<K>(set: &PartitionSet<K>, req: &ListRequest, cfg: &WatchConfig) -> AggregatedWatch<K>
where
    K: Object,
{
    let mut req = req.clone();
    req.watch = true;
    let timeout = req.timeout_duration();
    let mut agg = AggregatedWatch::new(cfg.queue_cap, timeout.unwrap_or(cfg.close_timeout));
    for (idx, handle) in set.handles().iter().enumerate() {
        match bounded(timeout, handle.watch(&req)).await {
            Ok(stream) => {
                agg.add_stream(idx, stream);
            }
            Err(e) if req.allow_partial_watch && e.is_non_membership() => {
                debug!(partition = idx, error = %e, "watch error for partial watch; skipping");
            }
            Err(e) => {
                warn!(partition = idx, error = %e, "watch open failed");
                counter!("kpart_watch_open_failures_total", 1);
                agg.add_failure(idx, e);
            }
        }
    }
    agg.seal();
    info!(partitions = set.len(), streams = agg.tasks.len(), failed = agg.failures.len(), "aggregated watch open");
    agg
}
