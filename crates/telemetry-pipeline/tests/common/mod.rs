// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use telemetry_pipeline::{
    BackingTarget, Batch, BoxError, Destination, PipelineConfig, Publisher, TargetError,
};
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;

pub fn pipeline_config(max_window_count: usize, window_size: Duration) -> PipelineConfig {
    PipelineConfig {
        max_backlog: 1000,
        max_window_count,
        window_size,
        max_pending_batches: 3,
    }
}

/// Forwards every published batch, with the time it arrived, to the test.
pub struct CollectingPublisher<T> {
    tx: mpsc::UnboundedSender<(Instant, Batch<T>)>,
}

impl<T> CollectingPublisher<T> {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(Instant, Batch<T>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl<T: Send + 'static> Publisher<T> for CollectingPublisher<T> {
    async fn publish(&self, batch: Batch<T>) -> Result<(), BoxError> {
        self.tx
            .send((Instant::now(), batch))
            .map_err(|_| "test receiver dropped")?;
        Ok(())
    }
}

/// Collects batches, but only once the test hands out permits.
pub struct GatedPublisher<T> {
    pub gate: Arc<Semaphore>,
    pub started: Arc<AtomicUsize>,
    inner: CollectingPublisher<T>,
}

impl<T> GatedPublisher<T> {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(Instant, Batch<T>)>) {
        let (inner, rx) = CollectingPublisher::new();
        (
            Self {
                gate: Arc::new(Semaphore::new(0)),
                started: Arc::new(AtomicUsize::new(0)),
                inner,
            },
            rx,
        )
    }
}

#[async_trait]
impl<T: Send + 'static> Publisher<T> for GatedPublisher<T> {
    async fn publish(&self, batch: Batch<T>) -> Result<(), BoxError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.gate.acquire().await?.forget();
        self.inner.publish(batch).await
    }
}

pub fn drain<T>(rx: &mut mpsc::UnboundedReceiver<(Instant, Batch<T>)>) -> Vec<Batch<T>> {
    let mut batches = Vec::new();
    while let Ok((_, batch)) = rx.try_recv() {
        batches.push(batch);
    }
    batches
}

/// Target whose writes fail with a non-classified error while `failing`
/// is set.
pub struct UnavailableTarget {
    id: String,
    pub failing: AtomicBool,
    pub attempts: AtomicUsize,
    pub delegate: Option<Arc<dyn BackingTarget>>,
}

impl UnavailableTarget {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            failing: AtomicBool::new(true),
            attempts: AtomicUsize::new(0),
            delegate: None,
        })
    }

    /// Fails until `failing` is cleared, then writes through `delegate`.
    pub fn recovering(id: &str, delegate: Arc<dyn BackingTarget>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            failing: AtomicBool::new(true),
            attempts: AtomicUsize::new(0),
            delegate: Some(delegate),
        })
    }
}

#[async_trait]
impl BackingTarget for UnavailableTarget {
    fn id(&self) -> &str {
        &self.id
    }

    async fn create_container(&self, container: &str) -> Result<bool, TargetError> {
        match &self.delegate {
            Some(delegate) => delegate.create_container(container).await,
            None => Err(TargetError::other(&self.id, "service unavailable")),
        }
    }

    async fn write_bytes(
        &self,
        destination: &Destination,
        bytes: &[u8],
    ) -> Result<(), TargetError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(TargetError::other(&self.id, "service unavailable"));
        }
        match &self.delegate {
            Some(delegate) => delegate.write_bytes(destination, bytes).await,
            None => Err(TargetError::other(&self.id, "no delegate")),
        }
    }
}
