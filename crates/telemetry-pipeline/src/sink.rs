// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Publisher that feeds batches into a [`BufferedRetryingWriter`].

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error};

use crate::batch::Batch;
use crate::errors::BoxError;
use crate::pipeline::Publisher;
use crate::writer::{BufferedRetryingWriter, WriteOutcome};

/// Turns one record into the bytes stored in the buffer. The output must not
/// contain the buffer delimiter.
pub trait RecordSerializer<T>: Send + Sync {
    fn serialize(&self, record: &T) -> Result<Vec<u8>, BoxError>;
}

/// One compact JSON document per record.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<T: Serialize> RecordSerializer<T> for JsonSerializer {
    fn serialize(&self, record: &T) -> Result<Vec<u8>, BoxError> {
        Ok(serde_json::to_vec(record)?)
    }
}

pub struct BufferedSink<T, S> {
    writer: Arc<BufferedRetryingWriter>,
    serializer: S,
    _record: PhantomData<fn(T)>,
}

impl<T, S> BufferedSink<T, S>
where
    S: RecordSerializer<T>,
{
    pub fn new(writer: Arc<BufferedRetryingWriter>, serializer: S) -> Self {
        Self {
            writer,
            serializer,
            _record: PhantomData,
        }
    }

    #[must_use]
    pub fn writer(&self) -> &Arc<BufferedRetryingWriter> {
        &self.writer
    }
}

#[async_trait]
impl<T, S> Publisher<T> for BufferedSink<T, S>
where
    T: Send + 'static,
    S: RecordSerializer<T>,
{
    async fn publish(&self, batch: Batch<T>) -> Result<(), BoxError> {
        let sequence = batch.sequence();
        let mut skipped = 0;
        let mut oversize = 0;

        for record in batch {
            let bytes = match self.serializer.serialize(&record) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("Failed to serialize record of batch {sequence}: {e}");
                    skipped += 1;
                    continue;
                }
            };
            if self.writer.write_record(&bytes).await? == WriteOutcome::DroppedOversize {
                oversize += 1;
            }
        }

        if skipped > 0 || oversize > 0 {
            debug!(
                "Batch {sequence} buffered with {skipped} unserializable and {oversize} oversize \
                 records"
            );
        }
        Ok(())
    }
}
