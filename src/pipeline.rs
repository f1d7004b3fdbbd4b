//! Batched ingestion pipeline.
//!
//! A single shared intake queue feeds a pool of worker tasks. Each worker
//! dequeues messages, builds records, and accumulates them in a private
//! batch that is flushed to the storage backend at a size threshold and on
//! shutdown. Queue depth is observed after every flush and a warning is
//! emitted past the high-water mark — advisory only, the broker is
//! auto-ack so there is nothing upstream to throttle.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::element::Element;
use crate::hooks::HookRegistry;
use crate::influx::RecordWriter;
use crate::intake::Intake;
use crate::record::Record;
use crate::transform::build_record;

/// Write attempts per batch before it is dropped.
const FLUSH_ATTEMPTS: u32 = 3;

/// Delay before the first write retry; doubles per attempt.
const RETRY_INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Tunables for the worker pool.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of worker tasks draining the intake queue.
    pub workers: usize,
    /// Batch size that triggers a flush.
    pub batch_size: usize,
    /// Queue depth past which a backpressure warning is emitted.
    pub queue_high_water: usize,
    /// How long a worker blocks on the queue before re-checking the
    /// running flag.
    pub poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            batch_size: 50,
            queue_high_water: 100,
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Operation counters, shared across workers.
#[derive(Debug, Default)]
pub struct PipelineStats {
    records_built: AtomicU64,
    records_dropped: AtomicU64,
    records_written: AtomicU64,
    batches_written: AtomicU64,
    batches_failed: AtomicU64,
    backpressure_events: AtomicU64,
}

impl PipelineStats {
    /// Messages successfully transformed into records.
    pub fn records_built(&self) -> u64 {
        self.records_built.load(Ordering::Relaxed)
    }

    /// Messages dropped because transformation failed.
    pub fn records_dropped(&self) -> u64 {
        self.records_dropped.load(Ordering::Relaxed)
    }

    /// Records accepted by the storage backend.
    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    pub fn batches_written(&self) -> u64 {
        self.batches_written.load(Ordering::Relaxed)
    }

    /// Batches dropped after exhausting write retries.
    pub fn batches_failed(&self) -> u64 {
        self.batches_failed.load(Ordering::Relaxed)
    }

    /// Times the queue depth exceeded the high-water mark at a flush.
    pub fn backpressure_events(&self) -> u64 {
        self.backpressure_events.load(Ordering::Relaxed)
    }
}

/// Running worker pool plus the shared intake queue.
pub struct Pipeline {
    sender: mpsc::UnboundedSender<Element>,
    depth: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
    stats: Arc<PipelineStats>,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Spawn the worker pool and return the pipeline handle.
    pub fn start(
        config: PipelineConfig,
        writer: Arc<dyn RecordWriter>,
        hooks: Arc<HookRegistry>,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let depth = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(PipelineStats::default());

        let workers = (0..config.workers.max(1))
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    config.clone(),
                    Arc::clone(&receiver),
                    Arc::clone(&depth),
                    Arc::clone(&running),
                    Arc::clone(&stats),
                    Arc::clone(&writer),
                    Arc::clone(&hooks),
                ))
            })
            .collect();

        tracing::info!(
            workers = config.workers.max(1),
            batch_size = config.batch_size,
            "ingestion pipeline started"
        );

        Self {
            sender,
            depth,
            running,
            stats,
            workers,
        }
    }

    /// Handle for the delivery path to enqueue messages.
    pub fn intake(&self) -> Intake {
        Intake::new(self.sender.clone(), Arc::clone(&self.depth))
    }

    /// Current number of queued, not-yet-dequeued messages.
    pub fn queue_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Signal shutdown and wait for every worker to stop.
    ///
    /// Workers finish their current build/accumulate/flush cycle and
    /// force-flush any non-empty batch before exiting. Messages still in
    /// the queue are not drained — at-most-once, by the broker's auto-ack
    /// contract.
    pub async fn shutdown(self) {
        self.running.store(false, Ordering::Relaxed);
        drop(self.sender);
        for worker in self.workers {
            let _ = worker.await;
        }
        tracing::info!("ingestion pipeline stopped");
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_worker(
    id: usize,
    config: PipelineConfig,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<Element>>>,
    depth: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
    stats: Arc<PipelineStats>,
    writer: Arc<dyn RecordWriter>,
    hooks: Arc<HookRegistry>,
) {
    let mut batch: Vec<Record> = Vec::with_capacity(config.batch_size);

    loop {
        if !running.load(Ordering::Relaxed) {
            break;
        }

        // Bounded poll: the lock is released before any building or
        // flushing so a slow write stalls only this worker.
        let polled = {
            let mut queue = queue.lock().await;
            timeout(config.poll_interval, queue.recv()).await
        };

        let message = match polled {
            Ok(Some(message)) => {
                depth.fetch_sub(1, Ordering::Relaxed);
                message
            }
            // Intake gone and queue drained.
            Ok(None) => break,
            // Poll timeout: loop around and re-check the running flag.
            Err(_) => continue,
        };

        match build_record(&message, &hooks) {
            Ok(record) => {
                stats.records_built.fetch_add(1, Ordering::Relaxed);
                batch.push(record);
            }
            Err(err) => {
                stats.records_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(worker = id, error = %err, "dropping untransformable message");
                continue;
            }
        }

        if batch.len() >= config.batch_size {
            flush(id, &mut batch, &writer, &stats).await;
            observe_backpressure(&depth, &stats, config.queue_high_water);
        }
    }

    if !batch.is_empty() {
        flush(id, &mut batch, &writer, &stats).await;
        observe_backpressure(&depth, &stats, config.queue_high_water);
    }
    tracing::debug!(worker = id, "worker stopped");
}

/// Write the batch, retrying with doubling delay; drop it after the final
/// failed attempt. The batch is cleared either way.
async fn flush(
    id: usize,
    batch: &mut Vec<Record>,
    writer: &Arc<dyn RecordWriter>,
    stats: &PipelineStats,
) {
    let mut delay = RETRY_INITIAL_DELAY;
    for attempt in 1..=FLUSH_ATTEMPTS {
        match writer.write_batch(batch).await {
            Ok(()) => {
                stats.batches_written.fetch_add(1, Ordering::Relaxed);
                stats
                    .records_written
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                tracing::debug!(worker = id, records = batch.len(), "flushed batch");
                batch.clear();
                return;
            }
            Err(err) if attempt < FLUSH_ATTEMPTS => {
                tracing::warn!(
                    worker = id,
                    attempt,
                    error = %err,
                    "batch write failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) => {
                stats.batches_failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    worker = id,
                    records = batch.len(),
                    attempts = FLUSH_ATTEMPTS,
                    error = %err,
                    "dropping batch after exhausting write attempts"
                );
                batch.clear();
            }
        }
    }
}

fn observe_backpressure(depth: &AtomicUsize, stats: &PipelineStats, high_water: usize) {
    let queued = depth.load(Ordering::Relaxed);
    if queued > high_water {
        stats.backpressure_events.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            queued,
            high_water,
            "intake queue depth exceeds high-water mark"
        );
    }
}
