// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Name-keyed factories for pluggable strategies.
//!
//! Processes register every publisher (or transform, or target) they support
//! at startup, then build the one a configuration names:
//!
//! ```rust,ignore
//! let mut publishers: Registry<Arc<dyn Publisher<Event>>> = Registry::new();
//! publishers.register("stdout", |_| Ok(Arc::new(StdoutPublisher) as _))?;
//! let publisher = publishers.build(&config.publisher, &config.settings)?;
//! ```

use std::collections::HashMap;

use crate::errors::{BoxError, RegistryError};

/// Free-form string settings handed to a factory.
pub type Settings = HashMap<String, String>;

type Factory<P> = Box<dyn Fn(&Settings) -> Result<P, BoxError> + Send + Sync>;

pub struct Registry<P> {
    factories: HashMap<String, Factory<P>>,
}

impl<P> Default for Registry<P> {
    fn default() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }
}

impl<P> Registry<P> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, key: impl Into<String>, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&Settings) -> Result<P, BoxError> + Send + Sync + 'static,
    {
        let key = key.into();
        if self.factories.contains_key(&key) {
            return Err(RegistryError::DuplicateKey(key));
        }
        self.factories.insert(key, Box::new(factory));
        Ok(())
    }

    pub fn build(&self, key: &str, settings: &Settings) -> Result<P, RegistryError> {
        let factory = self
            .factories
            .get(key)
            .ok_or_else(|| RegistryError::UnknownKey(key.to_string()))?;
        factory(settings).map_err(|source| RegistryError::Factory {
            key: key.to_string(),
            source,
        })
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    /// Registered keys in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}
