// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-process telemetry batching.
//!
//! Producers post records into a [`BatchingPipeline`] without blocking. The
//! pipeline groups them into count- or time-closed [`Batch`]es and hands the
//! batches, one at a time and in order, to a [`Publisher`]. The
//! [`BufferedRetryingWriter`] is a publisher backend for storage sinks that
//! packs records into large objects and fails over between targets.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batch;
pub mod buffer;
pub mod compression;
pub mod config;
pub mod drop_counter;
pub mod errors;
pub mod logging;
pub mod naming;
pub mod pipeline;
pub mod registry;
pub mod sink;
pub mod target;
pub mod writer;

pub use batch::{Batch, CloseReason};
pub use compression::Compression;
pub use config::{BufferConfig, PipelineConfig};
pub use errors::{BoxError, ConfigError, PipelineError, RegistryError, TargetError, WriteError};
pub use pipeline::{
    BatchingPipeline, Filter, PipelineBuilder, PipelineHandle, PostOutcome, Publisher, Transform,
};
pub use registry::{Registry, Settings};
pub use sink::{BufferedSink, JsonSerializer, RecordSerializer};
pub use target::{BackingTarget, Destination, FsTarget, TargetSet};
pub use writer::{
    BufferedRetryingWriter, NoopCallback, WriteOutcome, WriterSettings, WrittenCallback,
};
