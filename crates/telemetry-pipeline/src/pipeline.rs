// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded ingest, windowed batching and single-concurrency publishing.
//!
//! A pipeline is three kinds of task connected by bounded channels:
//!
//! ```text
//!   PipelineHandle::post ──try_send──> [ingest: max_backlog]
//!        │                                   │
//!        └──flush──> control ──> WindowedBatcher (count / timer / flush)
//!                                            │
//!                             [pending batches: max_pending_batches]
//!                                            │
//!                          (transform stage, optional, one batch at a time)
//!                                            │
//!                                    publish stage (one batch at a time)
//! ```
//!
//! Records are only ever dropped at the ingest boundary. Past it, a slow
//! publisher fills the pending batch queue and then stalls the batcher, which
//! in turn fills the ingest queue.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::batch::{Batch, CloseReason};
use crate::config::PipelineConfig;
use crate::drop_counter::{DropCounter, DropReport};
use crate::errors::{BoxError, ConfigError, PipelineError};

/// Admission predicate. Returning `true` excludes the record; exclusions are
/// not counted as drops.
pub trait Filter<T>: Send + Sync {
    fn filter(&self, record: &T) -> bool;
}

impl<T, F> Filter<T> for F
where
    F: Fn(&T) -> bool + Send + Sync,
{
    fn filter(&self, record: &T) -> bool {
        self(record)
    }
}

/// Consumes closed batches. Called with at most one batch in flight, in
/// window close order.
#[async_trait]
pub trait Publisher<T>: Send + Sync {
    async fn publish(&self, batch: Batch<T>) -> Result<(), BoxError>;
}

/// Maps a closed batch to the records handed to the publisher. An empty
/// result skips the publish for that batch.
pub trait Transform<TIn, TOut>: Send + Sync {
    fn transform(&self, batch: Batch<TIn>) -> Result<Vec<TOut>, BoxError>;
}

impl<TIn, TOut, F> Transform<TIn, TOut> for F
where
    F: Fn(Batch<TIn>) -> Result<Vec<TOut>, BoxError> + Send + Sync,
{
    fn transform(&self, batch: Batch<TIn>) -> Result<Vec<TOut>, BoxError> {
        self(batch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    Accepted,
    /// Excluded by the filter.
    Filtered,
    /// Ingest queue full; counted as a drop.
    Dropped,
    /// The pipeline no longer admits records.
    Closed,
}

enum Control {
    Flush(oneshot::Sender<()>),
}

/// Producer side of a pipeline. Cheap to clone; never blocks.
pub struct PipelineHandle<T> {
    name: Arc<str>,
    ingest_tx: mpsc::Sender<T>,
    control_tx: mpsc::UnboundedSender<Control>,
    filter: Option<Arc<dyn Filter<T>>>,
    drops: Arc<DropCounter>,
}

impl<T> Clone for PipelineHandle<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            ingest_tx: self.ingest_tx.clone(),
            control_tx: self.control_tx.clone(),
            filter: self.filter.clone(),
            drops: Arc::clone(&self.drops),
        }
    }
}

impl<T> PipelineHandle<T> {
    /// Offers a record to the pipeline. Returns `true` only if it was queued.
    pub fn post(&self, record: T) -> bool {
        self.try_post(record) == PostOutcome::Accepted
    }

    pub fn try_post(&self, record: T) -> PostOutcome {
        if let Some(filter) = &self.filter {
            if filter.filter(&record) {
                return PostOutcome::Filtered;
            }
        }
        match self.ingest_tx.try_send(record) {
            Ok(()) => PostOutcome::Accepted,
            Err(TrySendError::Full(_)) => {
                self.drops.record();
                PostOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => PostOutcome::Closed,
        }
    }

    /// Closes the current window immediately. Resolves once the resulting
    /// batch, if any, has been queued for publishing.
    pub async fn flush(&self) -> Result<(), PipelineError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.control_tx
            .send(Control::Flush(ack_tx))
            .map_err(|_| PipelineError::Closed(self.name.to_string()))?;
        ack_rx
            .await
            .map_err(|_| PipelineError::FlushUnavailable(self.name.to_string()))
    }

    #[must_use]
    pub fn dropped_since_flush(&self) -> u64 {
        self.drops.since_flush()
    }

    #[must_use]
    pub fn dropped_total(&self) -> u64 {
        self.drops.total()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

pub struct PipelineBuilder<T> {
    name: String,
    config: PipelineConfig,
    filter: Option<Arc<dyn Filter<T>>>,
    cancel_token: Option<CancellationToken>,
}

impl<T> PipelineBuilder<T>
where
    T: Send + 'static,
{
    pub fn new(name: impl Into<String>, config: PipelineConfig) -> Self {
        Self {
            name: name.into(),
            config,
            filter: None,
            cancel_token: None,
        }
    }

    #[must_use]
    pub fn filter(mut self, filter: impl Filter<T> + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Ties the pipeline's lifetime to `parent`: cancelling it drains and
    /// stops the pipeline.
    #[must_use]
    pub fn cancellation(mut self, parent: &CancellationToken) -> Self {
        self.cancel_token = Some(parent.child_token());
        self
    }

    pub fn spawn<P>(self, publisher: P) -> Result<BatchingPipeline<T>, ConfigError>
    where
        P: Publisher<T> + 'static,
    {
        let (mut pipeline, batch_rx) = self.spawn_batcher()?;
        let name = Arc::clone(&pipeline.handle.name);
        pipeline.tasks.push(tokio::spawn(run_publish_stage(
            name,
            batch_rx,
            Arc::new(publisher),
        )));
        Ok(pipeline)
    }

    /// Spawns the variant with a transform stage between the batcher and
    /// the publisher.
    pub fn spawn_with_transform<U, X, P>(
        self,
        transform: X,
        publisher: P,
    ) -> Result<BatchingPipeline<T>, ConfigError>
    where
        U: Send + 'static,
        X: Transform<T, U> + 'static,
        P: Publisher<U> + 'static,
    {
        let pending = self.config.max_pending_batches;
        let (mut pipeline, batch_rx) = self.spawn_batcher()?;
        let (transformed_tx, transformed_rx) = mpsc::channel(pending);
        let name = Arc::clone(&pipeline.handle.name);
        pipeline.tasks.push(tokio::spawn(run_transform_stage(
            Arc::clone(&name),
            batch_rx,
            transformed_tx,
            transform,
        )));
        pipeline.tasks.push(tokio::spawn(run_publish_stage(
            name,
            transformed_rx,
            Arc::new(publisher),
        )));
        Ok(pipeline)
    }

    #[allow(clippy::type_complexity)]
    fn spawn_batcher(
        self,
    ) -> Result<(BatchingPipeline<T>, mpsc::Receiver<Batch<T>>), ConfigError> {
        self.config.validate()?;

        let name: Arc<str> = Arc::from(self.name);
        let (ingest_tx, ingest_rx) = mpsc::channel(self.config.max_backlog);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (batch_tx, batch_rx) = mpsc::channel(self.config.max_pending_batches);
        let drops = Arc::new(DropCounter::new());
        let cancel_token = self.cancel_token.unwrap_or_else(CancellationToken::new);

        let batcher = WindowedBatcher {
            name: Arc::clone(&name),
            config: self.config,
            ingest_rx,
            control_rx,
            batch_tx,
            drops: Arc::clone(&drops),
            window: Vec::new(),
            sequence: 0,
            cancel_token: cancel_token.clone(),
        };
        let batcher = tokio::spawn(batcher.run());

        let handle = PipelineHandle {
            name,
            ingest_tx,
            control_tx,
            filter: self.filter,
            drops,
        };
        Ok((
            BatchingPipeline {
                handle,
                cancel_token,
                tasks: vec![batcher],
            },
            batch_rx,
        ))
    }
}

/// A running pipeline. Dropping it cancels the pipeline without waiting for
/// the drain; use [`BatchingPipeline::shutdown`] to wait.
pub struct BatchingPipeline<T> {
    handle: PipelineHandle<T>,
    cancel_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl<T> BatchingPipeline<T> {
    #[must_use]
    pub fn handle(&self) -> PipelineHandle<T> {
        self.handle.clone()
    }

    pub fn post(&self, record: T) -> bool {
        self.handle.post(record)
    }

    pub async fn flush(&self) -> Result<(), PipelineError> {
        self.handle.flush().await
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Stops admission, waits for every queued record to be batched and
    /// every batch to be published, then returns.
    pub async fn shutdown(mut self) {
        self.cancel_token.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                error!("Pipeline {} task failed during shutdown: {e}", self.handle.name);
            }
        }
        debug!("Pipeline {} shut down", self.handle.name);
    }
}

impl<T> Drop for BatchingPipeline<T> {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Logs and resets the drops recorded since the previous flush tick.
pub(crate) fn report_drops(name: &str, drops: &DropCounter) -> DropReport {
    let report = drops.take();
    if report.dropped > 0 {
        warn!(
            "Dropped events {name} count={} total={}",
            report.dropped, report.total
        );
    }
    report
}

struct WindowedBatcher<T> {
    name: Arc<str>,
    config: PipelineConfig,
    ingest_rx: mpsc::Receiver<T>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    batch_tx: mpsc::Sender<Batch<T>>,
    drops: Arc<DropCounter>,
    window: Vec<T>,
    sequence: u64,
    cancel_token: CancellationToken,
}

impl<T> WindowedBatcher<T>
where
    T: Send + 'static,
{
    async fn run(mut self) {
        debug!("Pipeline {} batcher started", self.name);
        let period = self.config.window_size;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => break,
                Some(Control::Flush(ack)) = self.control_rx.recv() => {
                    report_drops(&self.name, &self.drops);
                    if !self.drain_backlog().await || !self.close_window(CloseReason::Flush).await {
                        break;
                    }
                    ticker.reset();
                    // The flusher may have stopped waiting.
                    let _ = ack.send(());
                }
                _ = ticker.tick() => {
                    report_drops(&self.name, &self.drops);
                    if !self.drain_backlog().await || !self.close_window(CloseReason::Timer).await {
                        break;
                    }
                }
                record = self.ingest_rx.recv() => {
                    let Some(record) = record else { break };
                    let windows_before = self.sequence;
                    if !self.push(record).await {
                        break;
                    }
                    if self.sequence != windows_before {
                        ticker.reset();
                    }
                }
            }
        }

        self.drain_on_shutdown().await;
    }

    /// Adds a record to the open window, closing it when it reaches
    /// `max_window_count`. Returns `false` once the downstream stage is gone.
    async fn push(&mut self, record: T) -> bool {
        self.window.push(record);
        if self.window.len() >= self.config.max_window_count {
            return self.close_window(CloseReason::Count).await;
        }
        true
    }

    /// Pulls records already waiting in the ingest queue into the window.
    /// Bounded by `max_backlog` so producers cannot starve a tick.
    async fn drain_backlog(&mut self) -> bool {
        for _ in 0..self.config.max_backlog {
            match self.ingest_rx.try_recv() {
                Ok(record) => {
                    if !self.push(record).await {
                        return false;
                    }
                }
                Err(_) => break,
            }
        }
        true
    }

    async fn close_window(&mut self, reason: CloseReason) -> bool {
        if self.window.is_empty() {
            return true;
        }
        self.sequence += 1;
        let batch = Batch::new(self.sequence, reason, std::mem::take(&mut self.window));
        debug!(
            "Pipeline {} closed batch {} with {} records ({reason})",
            self.name,
            batch.sequence(),
            batch.len()
        );
        if self.batch_tx.send(batch).await.is_err() {
            error!("Pipeline {} has no running publish stage, batcher stopping", self.name);
            return false;
        }
        true
    }

    async fn drain_on_shutdown(mut self) {
        debug!("Pipeline {} batcher draining", self.name);
        self.ingest_rx.close();
        while let Some(record) = self.ingest_rx.recv().await {
            if !self.push(record).await {
                break;
            }
        }
        report_drops(&self.name, &self.drops);
        self.close_window(CloseReason::Shutdown).await;

        self.control_rx.close();
        while let Ok(Control::Flush(ack)) = self.control_rx.try_recv() {
            let _ = ack.send(());
        }
        debug!("Pipeline {} batcher stopped", self.name);
    }
}

async fn run_transform_stage<TIn, TOut, X>(
    name: Arc<str>,
    mut batch_rx: mpsc::Receiver<Batch<TIn>>,
    transformed_tx: mpsc::Sender<Batch<TOut>>,
    transform: X,
) where
    X: Transform<TIn, TOut>,
{
    while let Some(batch) = batch_rx.recv().await {
        let sequence = batch.sequence();
        let reason = batch.close_reason();

        let records = match catch_unwind(AssertUnwindSafe(|| transform.transform(batch))) {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                error!("Pipeline {name} failed to transform batch {sequence}: {e}");
                continue;
            }
            Err(_) => {
                error!("Pipeline {name} transform panicked on batch {sequence}");
                continue;
            }
        };
        if records.is_empty() {
            debug!("Pipeline {name} transform of batch {sequence} produced nothing to publish");
            continue;
        }

        if transformed_tx
            .send(Batch::new(sequence, reason, records))
            .await
            .is_err()
        {
            error!("Pipeline {name} has no running publish stage, transform stopping");
            break;
        }
    }
    debug!("Pipeline {name} transform stage stopped");
}

async fn run_publish_stage<T, P>(
    name: Arc<str>,
    mut batch_rx: mpsc::Receiver<Batch<T>>,
    publisher: Arc<P>,
) where
    T: Send + 'static,
    P: Publisher<T> + 'static,
{
    while let Some(batch) = batch_rx.recv().await {
        let sequence = batch.sequence();
        let len = batch.len();
        let publisher = Arc::clone(&publisher);

        // A panicking publisher only takes down its own task.
        match tokio::spawn(async move { publisher.publish(batch).await }).await {
            Ok(Ok(())) => debug!("Pipeline {name} published batch {sequence} with {len} records"),
            Ok(Err(e)) => {
                error!(
                    "Pipeline {name} failed to publish batch {sequence} with {len} records: {e}"
                );
            }
            Err(e) => error!("Pipeline {name} publish task for batch {sequence} failed: {e}"),
        }
    }
    debug!("Pipeline {name} publish stage stopped");
}
