// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the batching pipeline and the buffered writer.
//!
//! Overload and oversize drops are not errors: they are counted and logged.
//! The only failure that reaches a caller of the writer is an exhausted
//! write, see [`WriteError::RetriesExhausted`].

use thiserror::Error;

/// Error type returned by caller-supplied strategies (publishers, transforms,
/// serializers, factories).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("unknown compression {0:?}, expected none, gzip or zstd")]
    UnknownCompression(String),
}

/// Classification of a failed backing target operation.
///
/// The writer branches on this tag: a missing container is created and the
/// write retried on the same target, anything else fails over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetErrorKind {
    NotFound,
    Other,
}

#[derive(Debug, Error)]
#[error("target {target} failed ({kind:?}): {message}")]
pub struct TargetError {
    pub kind: TargetErrorKind,
    pub target: String,
    pub message: String,
}

impl TargetError {
    pub fn not_found(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: TargetErrorKind::NotFound,
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn other(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: TargetErrorKind::Other,
            target: target.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind == TargetErrorKind::NotFound
    }
}

#[derive(Debug, Error)]
pub enum WriteError {
    /// Every attempt allowed by `max_write_attempts` failed. The buffer is
    /// left untouched so the data can be written by a later flush.
    #[error("write failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: TargetError,
    },
    #[error("failed to compress buffer: {0}")]
    Compression(#[from] std::io::Error),
    #[error("writer requires at least one backing target")]
    NoTargets,
    #[error("writer is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline {0} is shut down")]
    Closed(String),
    #[error("pipeline {0} dropped the flush request")]
    FlushUnavailable(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no factory registered under {0:?}")]
    UnknownKey(String),
    #[error("a factory is already registered under {0:?}")]
    DuplicateKey(String),
    #[error("factory {key:?} failed: {source}")]
    Factory {
        key: String,
        #[source]
        source: BoxError,
    },
}
