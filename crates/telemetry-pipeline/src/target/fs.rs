// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{BackingTarget, Destination};
use crate::errors::TargetError;

/// Backing target over a local directory. Containers are sub-directories
/// and are never created implicitly by a write.
#[derive(Debug, Clone)]
pub struct FsTarget {
    id: String,
    root: PathBuf,
}

impl FsTarget {
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn error(&self, err: &std::io::Error, what: &str) -> TargetError {
        let message = format!("{what}: {err}");
        if err.kind() == ErrorKind::NotFound {
            TargetError::not_found(&self.id, message)
        } else {
            TargetError::other(&self.id, message)
        }
    }
}

#[async_trait]
impl BackingTarget for FsTarget {
    fn id(&self) -> &str {
        &self.id
    }

    async fn create_container(&self, container: &str) -> Result<bool, TargetError> {
        let path = self.root.join(container);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(false);
        }
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| TargetError::other(&self.id, format!("create {}: {e}", path.display())))?;
        debug!("Created container {}", path.display());
        Ok(true)
    }

    async fn write_bytes(
        &self,
        destination: &Destination,
        bytes: &[u8],
    ) -> Result<(), TargetError> {
        let path = self.root.join(&destination.container).join(&destination.name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| self.error(&e, &format!("write {}", path.display())))
    }
}
