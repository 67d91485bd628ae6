//! Named circuit breakers.
//!
//! One breaker per protected resource, created on first use from the
//! default configuration plus any per-resource override.

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::Arc;

use crate::config::ResilienceConfig;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::persistence::{BreakerSnapshot, SnapshotStore};

/// Registry of circuit breakers keyed by resource name.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: ArcSwap<ResilienceConfig>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: ResilienceConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config: ArcSwap::from_pointee(config),
        }
    }

    /// Breaker for `name`, created if needed.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(&existing);
        }
        let entry = self.breakers.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!(breaker = name, "Creating circuit breaker");
            Arc::new(CircuitBreaker::new(name, self.config.load().breaker_for(name)))
        });
        Arc::clone(&entry)
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| Arc::clone(&b))
    }

    /// All breakers, sorted by name.
    pub fn all(&self) -> Vec<Arc<CircuitBreaker>> {
        let mut all: Vec<_> = self.breakers.iter().map(|e| Arc::clone(e.value())).collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// Swap in a new configuration and push it to every existing breaker.
    ///
    /// Breakers whose new settings fail validation keep their old ones.
    pub fn apply_config(&self, config: ResilienceConfig) {
        for breaker in self.all() {
            let next = config.breaker_for(breaker.name());
            if *breaker.config() == next {
                continue;
            }
            if let Err(errors) = breaker.update_config(next) {
                let errors: Vec<String> = errors.iter().map(ToString::to_string).collect();
                tracing::error!(breaker = %breaker.name(), errors = ?errors, "Rejected breaker config update");
            }
        }
        self.config.store(Arc::new(config));
    }

    /// Restore every breaker the store has a snapshot for.
    ///
    /// Missing, corrupt or incompatible snapshots leave the breaker closed.
    /// Returns the number of breakers restored.
    pub async fn rehydrate(&self, store: &dyn SnapshotStore) -> usize {
        let names = match store.list().await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(error = %e, "Could not list breaker snapshots, starting closed");
                return 0;
            }
        };

        let mut restored = 0;
        for name in names {
            let breaker = self.get_or_create(&name);
            match store.load(&name).await {
                Ok(Some(snapshot)) => match breaker.restore(&snapshot) {
                    Ok(()) => restored += 1,
                    Err(e) => tracing::warn!(breaker = %name, error = %e, "Ignoring breaker snapshot"),
                },
                Ok(None) => {}
                Err(e) => tracing::warn!(breaker = %name, error = %e, "Ignoring unreadable breaker snapshot"),
            }
        }
        tracing::info!(restored, "Circuit breakers rehydrated");
        restored
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        self.all().iter().map(|b| b.snapshot()).collect()
    }
}
