// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Backing targets the buffered writer persists objects to.
//!
//! A target is one interchangeable storage client (for example one storage
//! account). Targets are grouped into a [`TargetSet`] fixed at construction;
//! each write attempt picks its target at random.

mod fs;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;

use crate::errors::{TargetError, WriteError};

pub use fs::FsTarget;

/// Where a single object lives: target, container, object name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub target_id: String,
    pub container: String,
    pub name: String,
}

impl Destination {
    pub fn new(
        target_id: impl Into<String>,
        container: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            container: container.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.target_id, self.container, self.name)
    }
}

#[async_trait]
pub trait BackingTarget: Send + Sync {
    fn id(&self) -> &str;

    /// Creates `container` if it does not exist yet. Returns whether it was
    /// created by this call.
    async fn create_container(&self, container: &str) -> Result<bool, TargetError>;

    /// Writes `bytes` as one object. A missing container must be reported
    /// with [`TargetErrorKind::NotFound`](crate::errors::TargetErrorKind::NotFound).
    async fn write_bytes(&self, destination: &Destination, bytes: &[u8])
        -> Result<(), TargetError>;
}

/// Read-only set of backing targets. Selection needs no locking.
#[derive(Clone)]
pub struct TargetSet {
    targets: Arc<[Arc<dyn BackingTarget>]>,
}

impl TargetSet {
    pub fn new(targets: Vec<Arc<dyn BackingTarget>>) -> Result<Self, WriteError> {
        if targets.is_empty() {
            return Err(WriteError::NoTargets);
        }
        Ok(Self {
            targets: targets.into(),
        })
    }

    #[must_use]
    pub fn list(&self) -> &[Arc<dyn BackingTarget>] {
        &self.targets
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Arc<dyn BackingTarget>> {
        self.targets.get(index)
    }

    /// Uniformly random target index.
    #[must_use]
    pub fn pick(&self) -> usize {
        rand::thread_rng().gen_range(0..self.targets.len())
    }

    /// Random target index other than `current`, when there is one.
    #[must_use]
    pub fn pick_other(&self, current: usize) -> usize {
        let len = self.targets.len();
        if len < 2 {
            return 0;
        }
        let index = rand::thread_rng().gen_range(0..len - 1);
        if index >= current {
            index + 1
        } else {
            index
        }
    }
}

impl fmt::Debug for TargetSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.targets.iter().map(|t| t.id()))
            .finish()
    }
}
