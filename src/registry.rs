//! Registry of named limiters.
//!
//! Each name maps to one independently configured [`RateLimiter`]; every caller asking
//! for the same name shares its bucket, cooldown and queue.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::{Provider, RateLimitConfig};
use crate::limiter::{RateLimiter, Status};
use tracing::{info, warn};

/// Errors from limiter registries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No limiter is registered under this name.
    #[error("rate limiter '{name}' not found")]
    NotFound {
        /// Name that could not be located.
        name: String,
    },
}

/// In-memory registry backed by an RwLock. Clones share the same map.
#[derive(Default, Clone, Debug)]
pub struct LimiterRegistry {
    inner: Arc<RwLock<HashMap<String, RateLimiter>>>,
}

impl LimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing limiter for `name`, or a new one using the provider's preset.
    pub fn get_or_create(&self, name: &str, provider: Provider) -> RateLimiter {
        self.get_or_create_with(name, provider, || RateLimitConfig::preset(provider))
    }

    /// Existing limiter for `name`, or a new one built from `config()`.
    ///
    /// The config is only evaluated when the limiter does not exist yet; an existing
    /// limiter keeps the settings it was created with.
    pub fn get_or_create_with<F>(&self, name: &str, provider: Provider, config: F) -> RateLimiter
    where
        F: FnOnce() -> RateLimitConfig,
    {
        if let Some(existing) = self.get(name) {
            return existing;
        }
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.entry(name.to_string())
            .or_insert_with(|| {
                info!(target: "quotaflow::registry", name, provider = %provider, "registering rate limiter");
                RateLimiter::with_config(name, provider, config())
            })
            .clone()
    }

    /// Register `limiter` under its own name, returning any limiter it replaced.
    ///
    /// Last registration wins; queued callers of the replaced limiter keep being
    /// served by it.
    pub fn insert(&self, limiter: RateLimiter) -> Option<RateLimiter> {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let name = limiter.name().to_string();
        let previous = map.insert(name.clone(), limiter);
        if previous.is_some() {
            warn!(target: "quotaflow::registry", name = %name, "rate limiter replaced; last registration wins");
        }
        previous
    }

    pub fn get(&self, name: &str) -> Option<RateLimiter> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(name).cloned()
    }

    /// Unregister `name`. Outstanding handles stay usable.
    pub fn remove(&self, name: &str) -> Result<RateLimiter, RegistryError> {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.remove(name).ok_or_else(|| RegistryError::NotFound { name: name.to_string() })
    }

    /// Zero the counters of one limiter.
    pub fn reset_stats(&self, name: &str) -> Result<(), RegistryError> {
        match self.get(name) {
            Some(limiter) => {
                limiter.reset_stats();
                Ok(())
            }
            None => Err(RegistryError::NotFound { name: name.to_string() }),
        }
    }

    /// Zero the counters of every registered limiter.
    pub fn reset_all_stats(&self) {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        for limiter in guard.values() {
            limiter.reset_stats();
        }
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = guard.keys().cloned().collect();
        names.sort();
        names
    }

    /// Status of every limiter, sorted by name.
    pub fn snapshot(&self) -> Vec<Status> {
        let limiters: Vec<RateLimiter> = {
            let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            guard.values().cloned().collect()
        };
        let mut statuses: Vec<Status> = limiters.iter().map(RateLimiter::status).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
