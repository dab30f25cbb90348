// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use common::{drain, pipeline_config, CollectingPublisher, GatedPublisher};
use telemetry_pipeline::{
    Batch, BoxError, CloseReason, PipelineBuilder, PipelineConfig, PostOutcome, Publisher,
};
use tokio::time::{sleep, Instant};

#[tokio::test(start_paused = true)]
async fn count_trigger_closes_window_before_timer() {
    let (publisher, mut batches) = CollectingPublisher::new();
    let pipeline = PipelineBuilder::new("events", pipeline_config(3, Duration::from_millis(100)))
        .spawn(publisher)
        .expect("failed to spawn pipeline");
    let start = Instant::now();

    assert!(pipeline.post('A'));
    assert!(pipeline.post('B'));
    sleep(Duration::from_millis(50)).await;
    assert!(pipeline.post('C'));

    let (at, batch) = batches.recv().await.expect("no batch published");
    assert_eq!(batch.records(), &['A', 'B', 'C']);
    assert_eq!(batch.close_reason(), CloseReason::Count);
    assert!(at.duration_since(start) < Duration::from_millis(100));

    pipeline.shutdown().await;
    assert!(drain(&mut batches).is_empty());
}

#[tokio::test(start_paused = true)]
async fn timer_trigger_closes_partial_window() {
    let (publisher, mut batches) = CollectingPublisher::new();
    let pipeline = PipelineBuilder::new("events", pipeline_config(3, Duration::from_millis(100)))
        .spawn(publisher)
        .expect("failed to spawn pipeline");
    let start = Instant::now();

    pipeline.post('A');
    pipeline.post('B');

    let (at, batch) = batches.recv().await.expect("no batch published");
    assert_eq!(batch.records(), &['A', 'B']);
    assert_eq!(batch.close_reason(), CloseReason::Timer);
    let elapsed = at.duration_since(start);
    assert!(elapsed >= Duration::from_millis(100), "closed after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(200), "closed after {elapsed:?}");

    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn idle_ticks_never_publish_empty_batches() {
    let (publisher, mut batches) = CollectingPublisher::<u32>::new();
    let pipeline = PipelineBuilder::new("events", pipeline_config(3, Duration::from_millis(100)))
        .spawn(publisher)
        .expect("failed to spawn pipeline");

    sleep(Duration::from_secs(1)).await;
    pipeline.flush().await.expect("flush failed");
    pipeline.shutdown().await;

    assert!(drain(&mut batches).is_empty());
}

#[tokio::test(start_paused = true)]
async fn batches_are_published_in_close_order() {
    let (publisher, mut batches) = CollectingPublisher::new();
    let pipeline = PipelineBuilder::new("events", pipeline_config(2, Duration::from_secs(10)))
        .spawn(publisher)
        .expect("failed to spawn pipeline");

    for i in 0..9u32 {
        assert!(pipeline.post(i));
    }
    pipeline.flush().await.expect("flush failed");
    pipeline.shutdown().await;

    let batches = drain(&mut batches);
    let sequences: Vec<u64> = batches.iter().map(Batch::sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    assert!(batches.iter().all(|b| b.len() <= 2 && !b.is_empty()));
    assert_eq!(batches[4].close_reason(), CloseReason::Flush);

    let records: Vec<u32> = batches.into_iter().flat_map(Batch::into_records).collect();
    assert_eq!(records, (0..9).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn overload_drops_exactly_the_excess() {
    let (publisher, mut batches) = CollectingPublisher::new();
    let config = PipelineConfig {
        max_backlog: 5,
        ..pipeline_config(100, Duration::from_millis(100))
    };
    let pipeline = PipelineBuilder::new("events", config)
        .spawn(publisher)
        .expect("failed to spawn pipeline");
    let handle = pipeline.handle();

    // nothing is consumed until this task yields
    let outcomes: Vec<PostOutcome> = (0..12u32).map(|i| handle.try_post(i)).collect();
    assert_eq!(
        outcomes.iter().filter(|o| **o == PostOutcome::Accepted).count(),
        5
    );
    assert_eq!(handle.dropped_since_flush(), 7);
    assert_eq!(handle.dropped_total(), 7);

    let (_, batch) = batches.recv().await.expect("no batch published");
    assert_eq!(batch.records(), &[0, 1, 2, 3, 4]);
    // the tick that closed the window also reset the counter
    assert_eq!(handle.dropped_since_flush(), 0);
    assert_eq!(handle.dropped_total(), 7);

    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn slow_publisher_applies_backpressure_without_drops() {
    let (publisher, mut batches) = GatedPublisher::new();
    let gate = publisher.gate.clone();
    let started = publisher.started.clone();
    let config = PipelineConfig {
        max_backlog: 100,
        max_window_count: 1,
        window_size: Duration::from_millis(10),
        max_pending_batches: 1,
    };
    let pipeline = PipelineBuilder::new("events", config)
        .spawn(publisher)
        .expect("failed to spawn pipeline");

    for i in 0..10u32 {
        assert!(pipeline.post(i));
    }
    sleep(Duration::from_secs(1)).await;

    // one batch in publish, one pending, one held by the batcher
    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert!(drain(&mut batches).is_empty());
    for i in 10..15u32 {
        assert!(pipeline.post(i));
    }
    assert_eq!(pipeline.handle().dropped_total(), 0);

    gate.add_permits(100);
    pipeline.shutdown().await;

    let records: Vec<u32> = drain(&mut batches)
        .into_iter()
        .flat_map(Batch::into_records)
        .collect();
    assert_eq!(records, (0..15).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn shutdown_publishes_queued_records() {
    let (publisher, mut batches) = CollectingPublisher::new();
    let pipeline = PipelineBuilder::new("events", pipeline_config(100, Duration::from_secs(10)))
        .spawn(publisher)
        .expect("failed to spawn pipeline");
    let handle = pipeline.handle();

    for i in 0..7u32 {
        handle.post(i);
    }
    pipeline.shutdown().await;

    let batches = drain(&mut batches);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].close_reason(), CloseReason::Shutdown);
    assert_eq!(batches[0].records(), &[0, 1, 2, 3, 4, 5, 6]);
    assert_eq!(handle.try_post(7), PostOutcome::Closed);
}

#[tokio::test(start_paused = true)]
async fn filtered_records_are_not_drops() {
    let (publisher, mut batches) = CollectingPublisher::new();
    let config = PipelineConfig {
        max_backlog: 2,
        ..pipeline_config(100, Duration::from_secs(10))
    };
    let pipeline = PipelineBuilder::<u32>::new("events", config)
        .filter(|record: &u32| record % 2 == 1)
        .spawn(publisher)
        .expect("failed to spawn pipeline");
    let handle = pipeline.handle();

    for i in [1, 2, 3, 4, 5, 7] {
        handle.post(i);
    }
    assert_eq!(handle.dropped_total(), 0);

    pipeline.shutdown().await;
    assert_eq!(drain(&mut batches)[0].records(), &[2, 4]);
}

#[tokio::test(start_paused = true)]
async fn transform_skips_empty_and_failed_batches() {
    let (publisher, mut batches) = CollectingPublisher::<String>::new();
    let config = pipeline_config(100, Duration::from_secs(10));
    let pipeline = PipelineBuilder::<u32>::new("events", config)
        .spawn_with_transform::<String, _, _>(
            |batch: Batch<u32>| -> Result<Vec<String>, BoxError> {
                if batch.iter().any(|r| *r == 13) {
                    return Err("unlucky batch".into());
                }
                if batch.iter().any(|r| *r == 99) {
                    panic!("transform bug");
                }
                Ok(batch
                    .into_iter()
                    .filter(|r| r % 2 == 1)
                    .map(|r| r.to_string())
                    .collect())
            },
            publisher,
        )
        .expect("failed to spawn pipeline");

    for window in [vec![1, 2, 3], vec![2, 4], vec![13], vec![99], vec![5]] {
        for record in window {
            pipeline.post(record);
        }
        pipeline.flush().await.expect("flush failed");
    }
    pipeline.shutdown().await;

    let batches = drain(&mut batches);
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].records(), &["1".to_string(), "3".to_string()]);
    assert_eq!(batches[0].sequence(), 1);
    assert_eq!(batches[1].records(), &["5".to_string()]);
    assert_eq!(batches[1].sequence(), 5);
}

struct FlakyPublisher {
    inner: CollectingPublisher<u32>,
}

#[async_trait]
impl Publisher<u32> for FlakyPublisher {
    async fn publish(&self, batch: Batch<u32>) -> Result<(), BoxError> {
        match batch.sequence() {
            1 => Err("sink rejected batch".into()),
            2 => panic!("sink bug"),
            _ => self.inner.publish(batch).await,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn failing_publish_does_not_stop_pipeline() {
    let (inner, mut batches) = CollectingPublisher::new();
    let pipeline = PipelineBuilder::new("events", pipeline_config(100, Duration::from_secs(10)))
        .spawn(FlakyPublisher { inner })
        .expect("failed to spawn pipeline");

    for i in 0..4u32 {
        pipeline.post(i);
        pipeline.flush().await.expect("flush failed");
    }
    pipeline.shutdown().await;

    let records: Vec<u32> = drain(&mut batches)
        .into_iter()
        .flat_map(Batch::into_records)
        .collect();
    assert_eq!(records, vec![2, 3]);
}
