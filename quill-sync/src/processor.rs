//! Queue processor — the replay orchestration loop.
//!
//! Main event loop that coordinates:
//! - Periodic drains of the durable queue (bounded batches, claim pattern)
//! - Reachability probes and breaker bookkeeping
//! - Expiry and stuck-claim sweeps
//! - Command processing (stop, dual-mode flush)
//!
//! Never a tight spin loop: every wakeup comes from an interval tick or a
//! command. Detected conflicts flow out over a channel to whoever owns the
//! resolution coordinator; the processor never renders UI.

use crate::api_client::{PushOutcome, RemoteApiClient};
use crate::breaker::{BreakerConfig, CircuitBreaker, CircuitState};
use crate::config::SyncConfig;
use crate::conflict::{ConflictDetector, ConflictEnvelope, Detection};
use crate::error::{SyncError, SyncResult};
use crate::monitor::NetworkMonitor;
use crate::telemetry::Telemetry;
use crate::telemetry_meta;
use chrono::Utc;
use quill_storage::{QueueStore, StorageError, VersionStore};
use quill_types::QueueOperation;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Commands accepted by the processor loop.
pub enum ProcessorCommand {
    /// Drain gracefully and stop.
    Stop,
    /// Mode A: process a caller-supplied batch (backward compatible).
    FlushOperations {
        operations: Vec<QueueOperation>,
        reply: oneshot::Sender<FlushReport>,
    },
    /// Mode B: re-drive parked conflicts and drain the durable queue.
    DrainQueue { reply: oneshot::Sender<FlushReport> },
}

/// Counts reported by a flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub expired: usize,
}

/// Handle for sending commands to a running processor.
#[derive(Clone)]
pub struct ProcessorHandle {
    command_tx: mpsc::Sender<ProcessorCommand>,
}

impl ProcessorHandle {
    pub async fn stop(&self) -> SyncResult<()> {
        self.command_tx
            .send(ProcessorCommand::Stop)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }

    /// Flush Mode A: replay an explicit batch, reporting per-batch counts.
    pub async fn flush_operations(&self, operations: Vec<QueueOperation>) -> SyncResult<FlushReport> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(ProcessorCommand::FlushOperations { operations, reply })
            .await
            .map_err(|_| SyncError::ChannelClosed)?;
        rx.await.map_err(|_| SyncError::ChannelClosed)
    }

    /// Flush Mode B: claim and process directly from the durable queue.
    pub async fn drain(&self) -> SyncResult<FlushReport> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(ProcessorCommand::DrainQueue { reply })
            .await
            .map_err(|_| SyncError::ChannelClosed)?;
        rx.await.map_err(|_| SyncError::ChannelClosed)
    }
}

/// Creates a processor, its command handle, and the conflict outlet.
pub fn create_queue_processor(
    queue: QueueStore,
    versions: VersionStore,
    api: Arc<RemoteApiClient>,
    telemetry: Telemetry,
    config: SyncConfig,
) -> (
    ProcessorHandle,
    mpsc::Receiver<ConflictEnvelope>,
    QueueProcessor,
) {
    let (command_tx, command_rx) = mpsc::channel(64);
    let (conflict_tx, conflict_rx) = mpsc::channel(64);

    let breaker = CircuitBreaker::new(BreakerConfig {
        failure_threshold: config.breaker_failure_threshold,
        success_threshold: config.breaker_success_threshold,
        base_cooldown: Duration::from_millis(config.breaker_base_cooldown_ms),
        max_cooldown: Duration::from_millis(config.breaker_max_cooldown_ms),
    });
    let monitor = NetworkMonitor::new(api.clone());
    let detector = ConflictDetector::new(versions.clone());

    let handle = ProcessorHandle { command_tx };

    let processor = QueueProcessor {
        queue,
        versions,
        api,
        monitor,
        breaker,
        detector,
        telemetry,
        command_rx,
        conflict_tx,
        config,
    };

    (handle, conflict_rx, processor)
}

/// Drains the durable queue and replays writes against the remote API.
pub struct QueueProcessor {
    queue: QueueStore,
    versions: VersionStore,
    api: Arc<RemoteApiClient>,
    monitor: NetworkMonitor,
    breaker: CircuitBreaker,
    detector: ConflictDetector,
    telemetry: Telemetry,
    command_rx: mpsc::Receiver<ProcessorCommand>,
    conflict_tx: mpsc::Sender<ConflictEnvelope>,
    config: SyncConfig,
}

impl QueueProcessor {
    /// Runs the processor event loop until stopped.
    pub async fn run(mut self) {
        info!("queue processor started");

        let mut drain_interval =
            tokio::time::interval(Duration::from_secs(self.config.drain_interval_secs));
        let mut probe_interval =
            tokio::time::interval(Duration::from_secs(self.config.probe_interval_secs));
        let mut sweep_interval =
            tokio::time::interval(Duration::from_secs(self.config.sweep_interval_secs));

        // Skip first immediate tick
        drain_interval.tick().await;
        probe_interval.tick().await;
        sweep_interval.tick().await;

        loop {
            tokio::select! {
                _ = drain_interval.tick() => {
                    if let Err(e) = self.drain_cycle().await {
                        error!("drain cycle failed: {e}");
                    }
                }
                _ = probe_interval.tick() => {
                    self.monitor.probe_once().await;
                }
                _ = sweep_interval.tick() => {
                    if let Err(e) = self.sweep() {
                        warn!("sweep failed: {e}");
                    }
                }
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(ProcessorCommand::Stop) => {
                            info!("queue processor stopping");
                            break;
                        }
                        Some(ProcessorCommand::FlushOperations { operations, reply }) => {
                            let report = self.flush_explicit(operations).await;
                            let _ = reply.send(report);
                        }
                        Some(ProcessorCommand::DrainQueue { reply }) => {
                            let report = self.flush_from_queue().await;
                            let _ = reply.send(report);
                        }
                        None => {
                            info!("command channel closed, stopping processor");
                            break;
                        }
                    }
                }
            }
        }

        info!("queue processor stopped");
    }

    /// Expiry sweep then stuck-claim reclaim.
    fn sweep(&self) -> SyncResult<()> {
        let now = Utc::now();
        let expired = self.queue.sweep_expired(now)?;
        if expired > 0 {
            self.telemetry.emit(
                "operations_expired",
                telemetry_meta! { "count" => expired },
            );
        }
        self.queue.reclaim_stuck(
            now,
            chrono::Duration::seconds(self.config.processing_reclaim_secs),
        )?;
        Ok(())
    }

    /// One periodic drain: bounded batch, gated by breaker and monitor.
    async fn drain_cycle(&mut self) -> SyncResult<FlushReport> {
        let mut report = FlushReport::default();

        if self.breaker.state(Instant::now()) == CircuitState::Open {
            debug!("breaker open, skipping drain cycle");
            return Ok(report);
        }
        if !self.monitor.is_reachable() {
            debug!("backend offline, skipping drain cycle");
            return Ok(report);
        }

        report.expired = self.queue.sweep_expired(Utc::now())?;

        let batch = self.queue.dequeue_batch(self.config.batch_size, Utc::now())?;
        if batch.is_empty() {
            return Ok(report);
        }
        debug!(count = batch.len(), "claimed drain batch");

        for op in batch {
            // The breaker admits each call individually; a trip mid-batch
            // releases the remaining claims untouched.
            if !self.breaker.call_permitted(Instant::now()) {
                self.queue.release(op.id)?;
                continue;
            }

            report.processed += 1;
            match self.replay_one(&op).await {
                Ok(true) => report.succeeded += 1,
                Ok(false) => report.failed += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(operation = %op.id, "replay error: {e}");
                }
            }
        }

        Ok(report)
    }

    /// Replays one claimed operation. Returns whether the write landed
    /// (conflicts and transient failures both return false).
    async fn replay_one(&mut self, op: &QueueOperation) -> SyncResult<bool> {
        match self.api.push_write(op).await {
            Ok(PushOutcome::Committed { version }) => {
                self.breaker.record_success(Instant::now());
                match self
                    .versions
                    .record(op.entity_id, &op.resource_table, version, &op.payload)
                {
                    Ok(_) => {}
                    // Already recorded locally (e.g. through a resolution);
                    // the committed write still counts.
                    Err(StorageError::StaleVersion(msg)) => {
                        debug!(operation = %op.id, "skipping version record: {msg}");
                    }
                    Err(e) => return Err(e.into()),
                }
                self.queue.mark_succeeded(op.id)?;
                debug!(operation = %op.id, version, "replay committed");
                Ok(true)
            }
            Ok(PushOutcome::Conflict {
                current_version,
                current_content,
            }) => {
                // The network worked; the write was just stale. Not a
                // breaker failure, and never a retry_count bump.
                self.breaker.record_success(Instant::now());
                match self.detector.detect(op, current_version, &current_content)? {
                    Detection::StaleDuplicate => {
                        self.queue.mark_succeeded(op.id)?;
                        self.telemetry.emit(
                            "conflict_auto_resolved",
                            telemetry_meta! { "entity_id" => op.entity_id.to_string() },
                        );
                        Ok(true)
                    }
                    Detection::Conflict(envelope) => {
                        self.queue.mark_conflicted(op.id)?;
                        self.telemetry.emit(
                            "conflict_detected",
                            telemetry_meta! {
                                "entity_id" => op.entity_id.to_string(),
                                "base_version" => op.base_version,
                                "theirs_version" => current_version,
                            },
                        );
                        if self.conflict_tx.send(*envelope).await.is_err() {
                            warn!("conflict outlet closed, envelope dropped");
                        }
                        Ok(false)
                    }
                }
            }
            Err(SyncError::Validation(msg)) => {
                warn!(operation = %op.id, "validation rejection: {msg}");
                self.queue.dead_letter_invalid(op.id, &msg)?;
                Ok(false)
            }
            Err(e) if e.is_transient() => {
                self.breaker.record_failure(Instant::now());
                let dead = self.queue.mark_failed(
                    op.id,
                    &e.to_string(),
                    self.config.max_retries,
                    Utc::now(),
                )?;
                if let Some(dead) = dead {
                    self.telemetry.emit(
                        "operation_dead_lettered",
                        telemetry_meta! {
                            "entity_id" => dead.operation.entity_id.to_string(),
                            "reason" => dead.reason.as_str(),
                            "retry_count" => dead.operation.retry_count,
                        },
                    );
                }
                Ok(false)
            }
            Err(e) => {
                self.queue.release(op.id)?;
                Err(e)
            }
        }
    }

    /// Flush Mode A: caller-supplied batch, processed as given. Operations
    /// need not exist in the durable queue; bookkeeping that requires a row
    /// is skipped for them.
    async fn flush_explicit(&mut self, operations: Vec<QueueOperation>) -> FlushReport {
        let mut report = FlushReport::default();
        let now = Utc::now();

        for op in operations {
            if op.is_expired(now) {
                report.expired += 1;
                continue;
            }
            report.processed += 1;

            if !self.breaker.call_permitted(Instant::now()) {
                report.failed += 1;
                continue;
            }

            let in_queue = matches!(self.queue.get(op.id), Ok(Some(_)));
            if in_queue {
                match self.replay_one(&op).await {
                    Ok(true) => report.succeeded += 1,
                    _ => report.failed += 1,
                }
            } else {
                // Ephemeral operation: replay without row bookkeeping.
                match self.api.push_write(&op).await {
                    Ok(PushOutcome::Committed { version }) => {
                        self.breaker.record_success(Instant::now());
                        let recorded = self.versions.record(
                            op.entity_id,
                            &op.resource_table,
                            version,
                            &op.payload,
                        );
                        if let Err(e) = recorded {
                            warn!(operation = %op.id, "version record failed: {e}");
                        }
                        report.succeeded += 1;
                    }
                    Ok(PushOutcome::Conflict { .. }) => {
                        self.breaker.record_success(Instant::now());
                        report.failed += 1;
                    }
                    Err(e) => {
                        if e.is_transient() {
                            self.breaker.record_failure(Instant::now());
                        }
                        report.failed += 1;
                    }
                }
            }
        }

        report
    }

    /// Flush Mode B: re-drive parked conflicts, then drain the durable queue
    /// until it is empty or the breaker trips.
    async fn flush_from_queue(&mut self) -> FlushReport {
        let mut report = FlushReport::default();

        match self.queue.requeue_all_conflicted() {
            Ok(n) if n > 0 => debug!(count = n, "re-driving conflicted operations"),
            Ok(_) => {}
            Err(e) => warn!("failed to requeue conflicted operations: {e}"),
        }

        loop {
            match self.drain_cycle().await {
                Ok(cycle) => {
                    report.processed += cycle.processed;
                    report.succeeded += cycle.succeeded;
                    report.failed += cycle.failed;
                    report.expired += cycle.expired;
                    if cycle.processed == 0 {
                        break;
                    }
                }
                Err(e) => {
                    error!("flush drain failed: {e}");
                    break;
                }
            }
            if self.breaker.state(Instant::now()) == CircuitState::Open {
                break;
            }
        }

        report
    }
}
