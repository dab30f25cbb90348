// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tracing::Subscriber;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

use crate::errors::BoxError;

/// Builds the fmt subscriber used by processes embedding the pipeline.
///
/// `level` is an `EnvFilter` directive string such as `info` or
/// `telemetry_pipeline=debug,warn`.
pub fn subscriber(level: &str) -> Result<impl Subscriber + Send + Sync + 'static, ParseError> {
    let filter = EnvFilter::try_new(level.to_lowercase())?;
    Ok(tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish())
}

/// Installs [`subscriber`] as the global default. Fails if a global
/// subscriber is already set.
pub fn init(level: &str) -> Result<(), BoxError> {
    tracing::subscriber::set_global_default(subscriber(level)?)?;
    tracing::debug!("Logging subsystem enabled");
    Ok(())
}
