// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Optional compression applied to a buffer right before it is written out.

use std::borrow::Cow;
use std::io::Write;
use std::str::FromStr;

use flate2::write::GzEncoder;
use zstd::stream::write::Encoder;

use crate::errors::ConfigError;

pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    None,
    /// Gzip at the fastest level.
    Gzip,
    Zstd {
        level: i32,
    },
}

impl Compression {
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Compression::None)
    }

    /// Short name used in write summaries.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Zstd { .. } => "zstd",
        }
    }

    /// Suffix appended to the object file type when compression is on.
    #[must_use]
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Gzip => Some("gz"),
            Compression::Zstd { .. } => Some("zst"),
        }
    }

    /// Compresses `data`, borrowing it unchanged when compression is off.
    pub fn compress<'a>(&self, data: &'a [u8]) -> std::io::Result<Cow<'a, [u8]>> {
        match self {
            Compression::None => Ok(Cow::Borrowed(data)),
            Compression::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::fast());
                encoder.write_all(data)?;
                Ok(Cow::Owned(encoder.finish()?))
            }
            Compression::Zstd { level } => {
                let mut encoder = Encoder::new(Vec::new(), *level)?;
                encoder.write_all(data)?;
                Ok(Cow::Owned(encoder.finish()?))
            }
        }
    }
}

impl FromStr for Compression {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" => Ok(Compression::None),
            "gzip" | "gz" => Ok(Compression::Gzip),
            "zstd" => Ok(Compression::Zstd {
                level: DEFAULT_ZSTD_LEVEL,
            }),
            other => Err(ConfigError::UnknownCompression(other.to_string())),
        }
    }
}
