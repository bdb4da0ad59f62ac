//! Breakers keyed by resource URI.

use std::sync::Arc;

use dashmap::DashMap;
use governance_policy::CircuitBreakPolicy;
use tracing::debug;

use crate::breaker::{CircuitBreaker, CircuitBreakerStateListener, SlidingWindowBreaker};
use crate::error::{CircuitBreakError, Result};

/// URI of a service level breaker.
pub fn service_uri(service: &str, policy: &str) -> String {
    format!("breaker://{service}/{policy}")
}

/// URI of an instance level breaker.
pub fn instance_uri(service: &str, policy: &str, instance: &str) -> String {
    format!("breaker://{service}/{policy}?instance={instance}")
}

fn validate(policy: &CircuitBreakPolicy) -> Result<()> {
    if policy.name.is_empty() {
        return Err(CircuitBreakError::UnnamedPolicy);
    }
    let in_range = |rate: f32| rate > 0.0 && rate <= 100.0;
    if !in_range(policy.failure_rate_threshold) || !in_range(policy.slow_call_rate_threshold) {
        return Err(CircuitBreakError::InvalidPolicy {
            name: policy.name.clone(),
            reason: "rate thresholds must be within (0, 100]".to_string(),
        });
    }
    Ok(())
}

struct Entry {
    service: String,
    breaker: Arc<dyn CircuitBreaker>,
}

/// Lazily created breakers, replaced when their policy version changes.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Entry>,
    listeners: parking_lot::RwLock<Vec<Arc<dyn CircuitBreakerStateListener>>>,
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("breakers", &self.breakers.len())
            .finish()
    }
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listener attached to every breaker created from now on.
    pub fn add_listener(&self, listener: Arc<dyn CircuitBreakerStateListener>) {
        self.listeners.write().push(listener);
    }

    pub fn get(&self, uri: &str) -> Option<Arc<dyn CircuitBreaker>> {
        self.breakers.get(uri).map(|e| Arc::clone(&e.breaker))
    }

    /// Breaker for `uri`, created on first use or when `policy` carries a
    /// different version than the existing one.
    pub fn get_or_create(
        &self,
        service: &str,
        uri: &str,
        policy: &CircuitBreakPolicy,
    ) -> Result<Arc<dyn CircuitBreaker>> {
        validate(policy)?;
        if let Some(entry) = self.breakers.get(uri) {
            if entry.breaker.policy().version == policy.version {
                return Ok(Arc::clone(&entry.breaker));
            }
        }

        let mut entry = self.breakers.entry(uri.to_string()).or_insert_with(|| Entry {
            service: service.to_string(),
            breaker: self.create(uri, policy),
        });
        if entry.breaker.policy().version != policy.version {
            debug!(uri = %uri, version = policy.version, "Replacing circuit breaker after policy change");
            entry.breaker = self.create(uri, policy);
        }
        Ok(Arc::clone(&entry.breaker))
    }

    fn create(&self, uri: &str, policy: &CircuitBreakPolicy) -> Arc<dyn CircuitBreaker> {
        let breaker = SlidingWindowBreaker::new(uri, policy.clone());
        for listener in self.listeners.read().iter() {
            breaker.add_listener(Arc::clone(listener));
        }
        Arc::new(breaker)
    }

    /// Drop breakers whose service and policy no longer exist.
    pub fn recycle<F>(&self, mut alive: F) -> usize
    where
        F: FnMut(&str, &CircuitBreakPolicy) -> bool,
    {
        let before = self.breakers.len();
        self.breakers
            .retain(|_, entry| alive(&entry.service, entry.breaker.policy()));
        let removed = before.saturating_sub(self.breakers.len());
        if removed > 0 {
            debug!(removed, "Recycled circuit breakers");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(version: u64) -> CircuitBreakPolicy {
        CircuitBreakPolicy {
            name: "cb".into(),
            version,
            ..CircuitBreakPolicy::default()
        }
    }

    #[test]
    fn reuses_breaker_for_same_version() {
        let registry = CircuitBreakerRegistry::new();
        let uri = service_uri("svc", "cb");
        let a = registry.get_or_create("svc", &uri, &policy(1)).unwrap();
        let b = registry.get_or_create("svc", &uri, &policy(1)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let c = registry.get_or_create("svc", &uri, &policy(2)).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.get(&uri).map(|b| b.policy().version), Some(2));
    }

    #[test]
    fn recycle_drops_dead_services() {
        let registry = CircuitBreakerRegistry::new();
        registry
            .get_or_create("a", &service_uri("a", "cb"), &policy(1))
            .unwrap();
        registry
            .get_or_create("b", &instance_uri("b", "cb", "i-1"), &policy(1))
            .unwrap();
        assert_eq!(registry.recycle(|service, _| service == "a"), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&service_uri("a", "cb")).is_some());
    }

    #[test]
    fn unnamed_policy_is_rejected() {
        let registry = CircuitBreakerRegistry::new();
        let result = registry.get_or_create("svc", "breaker://svc/", &CircuitBreakPolicy::default());
        assert!(matches!(result, Err(CircuitBreakError::UnnamedPolicy)));

        let zero = CircuitBreakPolicy {
            failure_rate_threshold: 0.0,
            ..policy(1)
        };
        let result = registry.get_or_create("svc", "breaker://svc/cb", &zero);
        assert!(matches!(result, Err(CircuitBreakError::InvalidPolicy { .. })));
    }
}
