// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Buffered writer for storage-style sinks.
//!
//! Serialized records accumulate in a single fixed-size memory buffer. The
//! buffer is written out as one object when the next record does not fit,
//! when the flush timer fires, on an explicit [`BufferedRetryingWriter::flush`]
//! and on [`BufferedRetryingWriter::close`].
//!
//! ```text
//!   write_record ──> [ buffer ] ──> compress ──> random target ──> on_written
//!                        ^                            │
//!                        └── kept on exhausted retry ─┘
//! ```
//!
//! Each write picks a random target. A `NotFound` failure creates the
//! container once and retries on the same target; any other failure moves to
//! a different target. After `max_write_attempts` failures the error is
//! returned to the caller and the buffer keeps its contents.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::MemoryAccumulationBuffer;
use crate::config::BufferConfig;
use crate::errors::{BoxError, ConfigError, WriteError};
use crate::naming::{object_name, ContainerNamer};
use crate::target::{BackingTarget, Destination, TargetSet};

/// Longest prefix of an oversize record included in the drop diagnostic.
const MAX_DUMP_SIZE_BYTES: usize = 1000;

/// Notified after every successful object write.
#[async_trait]
pub trait WrittenCallback: Send + Sync {
    async fn on_written(&self, destination: &Destination) -> Result<(), BoxError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallback;

#[async_trait]
impl WrittenCallback for NoopCallback {
    async fn on_written(&self, _destination: &Destination) -> Result<(), BoxError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WriterSettings {
    /// Included in every object name.
    pub data_source: String,
    /// Object extension before compression, e.g. `json`.
    pub file_type: String,
    pub containers: ContainerNamer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Buffered,
    /// The buffer was written out to make room for the record.
    FlushedThenBuffered,
    /// The record is larger than the whole buffer and was discarded.
    DroppedOversize,
}

struct State {
    buffer: MemoryAccumulationBuffer,
    closed: bool,
}

struct Inner {
    state: Mutex<State>,
    targets: TargetSet,
    callback: Arc<dyn WrittenCallback>,
    config: BufferConfig,
    data_source: String,
    file_type: String,
    containers: ContainerNamer,
    records_total: AtomicU64,
    oversize_drops: AtomicU64,
    flush_reset: Notify,
}

pub struct BufferedRetryingWriter {
    inner: Arc<Inner>,
    cancel_token: CancellationToken,
    timer: StdMutex<Option<JoinHandle<()>>>,
}

impl BufferedRetryingWriter {
    /// Creates the writer and spawns its flush timer on the current runtime.
    pub fn start(
        config: BufferConfig,
        targets: TargetSet,
        settings: WriterSettings,
        callback: Arc<dyn WrittenCallback>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let file_type = match config.compression.extension() {
            Some(extension) => format!("{}.{extension}", settings.file_type),
            None => settings.file_type,
        };

        let inner = Arc::new(Inner {
            state: Mutex::new(State {
                buffer: MemoryAccumulationBuffer::new(config.capacity_bytes),
                closed: false,
            }),
            targets,
            callback,
            data_source: settings.data_source,
            file_type,
            containers: settings.containers,
            records_total: AtomicU64::new(0),
            oversize_drops: AtomicU64::new(0),
            flush_reset: Notify::new(),
            config,
        });

        let cancel_token = CancellationToken::new();
        let timer = tokio::spawn(run_flush_timer(Arc::clone(&inner), cancel_token.clone()));

        Ok(Self {
            inner,
            cancel_token,
            timer: StdMutex::new(Some(timer)),
        })
    }

    /// Buffers one serialized record, writing out the current buffer first
    /// when the record does not fit behind it.
    ///
    /// Fails only when that write exhausts its retries; the record is then
    /// not buffered.
    pub async fn write_record(&self, record: &[u8]) -> Result<WriteOutcome, WriteError> {
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(WriteError::Closed);
        }

        let capacity = state.buffer.capacity();
        if record.len() > capacity {
            self.inner.drop_oversize(record, capacity);
            return Ok(WriteOutcome::DroppedOversize);
        }

        if state.buffer.try_append(record) {
            self.inner.records_total.fetch_add(1, Ordering::Relaxed);
            return Ok(WriteOutcome::Buffered);
        }

        self.inner.write_buffer(&mut state).await?;

        let appended = state.buffer.try_append(record);
        debug_assert!(appended, "a record within capacity fits an empty buffer");
        self.inner.records_total.fetch_add(1, Ordering::Relaxed);
        Ok(WriteOutcome::FlushedThenBuffered)
    }

    /// Writes out any buffered records.
    pub async fn flush(&self) -> Result<(), WriteError> {
        let mut state = self.inner.state.lock().await;
        self.inner.flush_pending(&mut state).await
    }

    /// Writes out whatever is still buffered, then stops the flush timer.
    ///
    /// If that final write fails the error is returned and the writer stays
    /// open with its timer running, so `close` can be called again.
    pub async fn close(&self) -> Result<(), WriteError> {
        {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return Ok(());
            }
            self.inner.flush_pending(&mut state).await?;
            state.closed = true;
        }

        self.cancel_token.cancel();
        let timer = self.timer.lock().ok().and_then(|mut timer| timer.take());
        if let Some(timer) = timer {
            if let Err(e) = timer.await {
                error!("Buffer flush timer failed: {e}");
            }
        }
        debug!("Buffered writer for {} closed", self.inner.data_source);
        Ok(())
    }

    /// Records accepted into the buffer over the writer's lifetime.
    #[must_use]
    pub fn records_total(&self) -> u64 {
        self.inner.records_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn oversize_drops(&self) -> u64 {
        self.inner.oversize_drops.load(Ordering::Relaxed)
    }

    /// Bytes currently waiting in the buffer.
    pub async fn buffered_len(&self) -> usize {
        self.inner.state.lock().await.buffer.len()
    }

    /// File type of written objects, compression suffix included.
    #[must_use]
    pub fn file_type(&self) -> &str {
        &self.inner.file_type
    }
}

impl Drop for BufferedRetryingWriter {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        if let Ok(state) = self.inner.state.try_lock() {
            if !state.closed && !state.buffer.is_empty() {
                warn!(
                    "Buffered writer for {} dropped without close, {} bytes were not written",
                    self.inner.data_source,
                    state.buffer.len()
                );
            }
        }
    }
}

impl Inner {
    async fn flush_pending(&self, state: &mut State) -> Result<(), WriteError> {
        if state.buffer.is_empty() {
            return Ok(());
        }
        debug!(
            "Flushing {} bytes containing {} records for {}",
            state.buffer.len(),
            state.buffer.record_count(),
            self.data_source
        );
        self.write_buffer(state).await
    }

    /// Compresses the buffer, writes it to a target and clears it. On error
    /// the buffer is left as it was.
    async fn write_buffer(&self, state: &mut State) -> Result<(), WriteError> {
        if state.buffer.is_empty() {
            return Ok(());
        }

        let records = state.buffer.record_count();
        let now = Utc::now();
        let container = self.containers.name_at(now);
        // One name per flush: retries of the same buffer overwrite rather
        // than duplicate on a target.
        let name = object_name(&self.data_source, &self.file_type, now);

        let (destination, written) = {
            let payload = self.config.compression.compress(state.buffer.as_bytes())?;
            let destination = self.write_with_failover(&container, &name, &payload).await?;
            (destination, payload.len())
        };

        if let Err(e) = self.callback.on_written(&destination).await {
            error!("Written callback failed for {destination}: {e}");
        }
        self.flush_reset.notify_one();

        info!(
            "Wrote {written} bytes ({}) to {destination}, containing {records} records, total {}",
            self.config.compression.label(),
            self.records_total.load(Ordering::Relaxed)
        );
        state.buffer.clear();
        Ok(())
    }

    async fn write_with_failover(
        &self,
        container: &str,
        name: &str,
        payload: &[u8],
    ) -> Result<Destination, WriteError> {
        let mut index = self.targets.pick();
        let mut create_attempted = vec![false; self.targets.len()];
        let mut attempts = 0;

        loop {
            attempts += 1;
            let Some(target) = self.targets.get(index) else {
                return Err(WriteError::NoTargets);
            };
            let destination = Destination::new(target.id(), container, name);

            let err = match target.write_bytes(&destination, payload).await {
                Ok(()) => return Ok(destination),
                Err(err) => err,
            };

            if attempts >= self.config.max_write_attempts {
                error!(
                    "Failed to write {destination} after {attempts} attempts, retries exhausted: {err}"
                );
                return Err(WriteError::RetriesExhausted {
                    attempts,
                    last: err,
                });
            }
            error!("Failed to write {destination} on attempt {attempts}, retrying: {err}");

            let retry_same_target = if err.is_not_found() && !create_attempted[index] {
                create_attempted[index] = true;
                create_container(target.as_ref(), container).await
            } else {
                false
            };
            if !retry_same_target {
                index = self.targets.pick_other(index);
            }
        }
    }

    fn drop_oversize(&self, record: &[u8], capacity: usize) {
        self.oversize_drops.fetch_add(1, Ordering::Relaxed);
        let snippet = String::from_utf8_lossy(&record[..record.len().min(MAX_DUMP_SIZE_BYTES)]);
        error!(
            "Record too large for {}, dropping it. Record={} bytes, buffer={capacity} bytes: \
             {snippet}",
            self.data_source,
            record.len()
        );
    }
}

async fn create_container(target: &dyn BackingTarget, container: &str) -> bool {
    match target.create_container(container).await {
        Ok(created) => {
            info!(
                "Container {container} not found on {}, create attempt resulted {created}",
                target.id()
            );
            true
        }
        Err(e) => {
            error!("Failed to create container {container} on {}: {e}", target.id());
            false
        }
    }
}

async fn run_flush_timer(inner: Arc<Inner>, cancel_token: CancellationToken) {
    debug!("Buffer flush timer for {} started", inner.data_source);
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            // A successful write restarts the interval.
            () = inner.flush_reset.notified() => {}
            () = tokio::time::sleep(inner.config.flush_interval) => {
                let mut state = inner.state.lock().await;
                if let Err(e) = inner.flush_pending(&mut state).await {
                    error!("Timed flush for {} failed: {e}", inner.data_source);
                }
            }
        }
    }
    debug!("Buffer flush timer for {} stopped", inner.data_source);
}
