// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Container and object names for written buffers.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Number of hash bytes prepended to hourly container names.
const HASH_PREFIX_BYTES: usize = 5;

/// Chooses the container each flush writes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerNamer {
    Fixed(String),
    /// `{hash}-{base}-{yyyy-mm-dd-hh}`. The hash of the hour leads the name
    /// so consecutive hours land on different storage partitions.
    Hourly { base: String },
}

impl ContainerNamer {
    #[must_use]
    pub fn name_at(&self, now: DateTime<Utc>) -> String {
        match self {
            ContainerNamer::Fixed(name) => name.clone(),
            ContainerNamer::Hourly { base } => {
                let hour = now.format("%Y-%m-%d-%H").to_string();
                format!("{}-{base}-{hour}", hash_prefix(&hour, HASH_PREFIX_BYTES))
            }
        }
    }

    #[must_use]
    pub fn current(&self) -> String {
        self.name_at(Utc::now())
    }
}

/// Hex encoding of the first `bytes` bytes of the SHA-256 of `input`.
#[must_use]
pub fn hash_prefix(input: &str, bytes: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..bytes.min(digest.len())])
}

/// Globally unique object name. The leading UUID spreads objects across
/// partitions.
#[must_use]
pub fn object_name(data_source: &str, file_type: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}_{}_{data_source}.{file_type}",
        Uuid::new_v4(),
        now.format("%Y-%m-%d-%H-%M-%S")
    )
}
