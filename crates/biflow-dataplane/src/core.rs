//! Core Fast Path Engine
//!
//! Run-to-completion packet processing: one worker thread per receive
//! queue, all sharing a single [`Forwarder`]. There is no ordering between
//! frames on different queues.

use crate::devmap::{DeviceMap, Egress};
use crate::engine::{Forwarder, Verdict};
use crate::stats::{AggregateStats, CoreStats, CoreStatsSnapshot};
use crate::BATCH_SIZE;
use biflow_common::PortId;
use bytes::Bytes;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How long an idle worker waits before re-checking the run flag
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Fast Path Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of receive queues, one worker each
    pub num_workers: usize,
    /// Frames buffered per receive queue
    pub queue_depth: usize,
    /// Frames drained per wakeup
    pub batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_workers: num_cpus(),
            queue_depth: 4096,
            batch_size: BATCH_SIZE,
        }
    }
}

/// Get number of CPUs (simplified)
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Frame received on an attachment point
#[derive(Debug, Clone)]
pub struct Frame {
    /// Attachment point the frame arrived on
    pub ingress: PortId,
    /// Raw frame, starting at the Ethernet header
    pub data: Bytes,
}

impl Frame {
    /// Create frame
    pub fn new(ingress: PortId, data: impl Into<Bytes>) -> Self {
        Self {
            ingress,
            data: data.into(),
        }
    }
}

/// Fast Path Engine
///
/// `attach` installs the forwarder on both attachment points by starting
/// the workers; `detach` removes it again. Frames enter via `inject`.
pub struct FastPathEngine {
    config: EngineConfig,
    forwarder: Arc<Forwarder>,
    devices: Arc<DeviceMap>,
    egress: Arc<dyn Egress>,
    running: Arc<AtomicBool>,
    queues: Vec<Sender<Frame>>,
    workers: Mutex<Vec<WorkerHandle>>,
    next_queue: AtomicUsize,
    stats: Arc<AggregateStats>,
}

/// Per-worker handle
struct WorkerHandle {
    thread: Option<thread::JoinHandle<()>>,
    core_id: usize,
}

impl FastPathEngine {
    /// Create new engine. Workers are not started until `attach`.
    pub fn new(
        config: EngineConfig,
        forwarder: Arc<Forwarder>,
        devices: Arc<DeviceMap>,
        egress: Arc<dyn Egress>,
    ) -> Result<Self, EngineError> {
        if config.num_workers == 0 {
            return Err(EngineError::ConfigError("at least one worker is required".into()));
        }
        if config.queue_depth == 0 || config.batch_size == 0 {
            return Err(EngineError::ConfigError(
                "queue depth and batch size must be positive".into(),
            ));
        }

        Ok(Self {
            stats: Arc::new(AggregateStats::new(config.num_workers)),
            config,
            forwarder,
            devices,
            egress,
            running: Arc::new(AtomicBool::new(false)),
            queues: Vec::new(),
            workers: Mutex::new(Vec::new()),
            next_queue: AtomicUsize::new(0),
        })
    }

    /// Start one worker per receive queue
    pub fn attach(&mut self) -> Result<(), EngineError> {
        if self.running.load(Ordering::Acquire) {
            return Err(EngineError::AlreadyAttached);
        }

        self.running.store(true, Ordering::Release);
        self.queues.clear();
        let mut workers = self.workers.lock();

        for core_id in 0..self.config.num_workers {
            let (tx, rx) = bounded(self.config.queue_depth);
            let worker = Worker {
                core_id,
                batch_size: self.config.batch_size,
                running: self.running.clone(),
                rx,
                forwarder: self.forwarder.clone(),
                devices: self.devices.clone(),
                egress: self.egress.clone(),
                stats: self.stats.clone(),
            };

            let handle = match thread::Builder::new()
                .name(format!("biflow-worker-{}", core_id))
                .spawn(move || worker.run())
            {
                Ok(h) => h,
                Err(e) => {
                    drop(workers);
                    self.detach();
                    return Err(EngineError::SpawnFailed(e.to_string()));
                }
            };

            self.queues.push(tx);
            workers.push(WorkerHandle {
                thread: Some(handle),
                core_id,
            });
        }

        let ports = self.forwarder.ports();
        tracing::info!(
            inside = %ports.inside(),
            outside = %ports.outside(),
            workers = self.config.num_workers,
            "forwarder attached"
        );

        Ok(())
    }

    /// Stop and join all workers. Frames still queued are discarded.
    pub fn detach(&self) {
        let was_running = self.running.swap(false, Ordering::AcqRel);

        let mut workers = self.workers.lock();
        for worker in workers.iter_mut() {
            if let Some(handle) = worker.thread.take() {
                if handle.join().is_err() {
                    tracing::error!(core = worker.core_id, "worker panicked");
                }
            }
        }
        workers.clear();

        if was_running {
            tracing::info!("forwarder detached");
        }
    }

    /// Check if attached
    pub fn is_attached(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Hand a frame to a receive queue, round-robin
    pub fn inject(&self, frame: Frame) -> Result<(), EngineError> {
        if !self.is_attached() || self.queues.is_empty() {
            return Err(EngineError::NotAttached);
        }
        let idx = self.next_queue.fetch_add(1, Ordering::Relaxed) % self.queues.len();
        self.inject_on(idx, frame)
    }

    /// Hand a frame to a specific receive queue
    pub fn inject_on(&self, queue: usize, frame: Frame) -> Result<(), EngineError> {
        let tx = self
            .queues
            .get(queue)
            .ok_or(EngineError::NoSuchQueue(queue))?;
        match tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.stats.core(queue).record_queue_full();
                Err(EngineError::QueueFull(queue))
            }
            Err(TrySendError::Disconnected(_)) => Err(EngineError::NotAttached),
        }
    }

    /// Number of receive queues
    pub fn num_queues(&self) -> usize {
        self.config.num_workers
    }

    /// Frames waiting across all queues
    pub fn pending(&self) -> usize {
        self.queues.iter().map(Sender::len).sum()
    }

    /// The shared decision engine
    pub fn forwarder(&self) -> &Arc<Forwarder> {
        &self.forwarder
    }

    /// Redirect map
    pub fn devices(&self) -> &Arc<DeviceMap> {
        &self.devices
    }

    /// Totals across workers
    pub fn stats(&self) -> CoreStatsSnapshot {
        self.stats.total()
    }

    /// Per-worker stats
    pub fn worker_stats(&self) -> Vec<CoreStatsSnapshot> {
        self.stats.per_core()
    }
}

impl Drop for FastPathEngine {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Per-queue worker
struct Worker {
    core_id: usize,
    batch_size: usize,
    running: Arc<AtomicBool>,
    rx: Receiver<Frame>,
    forwarder: Arc<Forwarder>,
    devices: Arc<DeviceMap>,
    egress: Arc<dyn Egress>,
    stats: Arc<AggregateStats>,
}

impl Worker {
    /// Main worker loop (run-to-completion)
    fn run(self) {
        tracing::debug!("Worker {} starting", self.core_id);
        let stats = self.stats.core(self.core_id);
        let mut batch = Vec::with_capacity(self.batch_size);

        while self.running.load(Ordering::Relaxed) {
            match self.rx.recv_timeout(IDLE_POLL) {
                Ok(frame) => batch.push(frame),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
            while batch.len() < self.batch_size {
                match self.rx.try_recv() {
                    Ok(frame) => batch.push(frame),
                    Err(_) => break,
                }
            }

            stats.record_batch();
            for frame in batch.drain(..) {
                self.process_one(stats, &frame);
            }
        }

        tracing::debug!("Worker {} stopped", self.core_id);
    }

    #[inline]
    fn process_one(&self, stats: &CoreStats, frame: &Frame) {
        let len = frame.data.len() as u64;
        stats.record_rx(len);

        match self.forwarder.process(frame.ingress, &frame.data) {
            Verdict::Drop => stats.record_drop(),
            Verdict::Forward(port) => match self.devices.resolve(port) {
                Some(device) => {
                    self.egress.transmit(&device, &frame.data);
                    stats.record_tx(len);
                }
                None => {
                    tracing::trace!(%port, "no device installed for port");
                    stats.record_redirect_miss();
                }
            },
        }
    }
}

/// Engine errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// `attach` called while workers are running
    #[error("forwarder already attached")]
    AlreadyAttached,

    /// No workers are running
    #[error("forwarder not attached")]
    NotAttached,

    /// Receive queue refused the frame
    #[error("receive queue {0} is full")]
    QueueFull(usize),

    /// Queue index out of range
    #[error("no receive queue {0}")]
    NoSuchQueue(usize),

    /// Worker thread could not be started
    #[error("failed to spawn worker: {0}")]
    SpawnFailed(String),

    /// Invalid engine configuration
    #[error("configuration error: {0}")]
    ConfigError(String),
}
