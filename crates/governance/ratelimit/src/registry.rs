use std::sync::Arc;

use dashmap::mapref::entry::Entry as Slot;
use dashmap::DashMap;
use governance_policy::RateLimitPolicy;
use tracing::info;

use crate::error::Result;
use crate::limiter::TokenBucketLimiter;

/// Registry key for a service's limiter.
pub fn limiter_key(service: &str, policy: &RateLimitPolicy) -> String {
    format!("{}/{}", service, policy.name)
}

struct Entry {
    service: String,
    limiter: Arc<TokenBucketLimiter>,
}

/// Shared limiters, one per service and policy name.
///
/// A limiter survives snapshot swaps as long as its policy version is
/// unchanged, so banked credit is not reset by unrelated updates.
#[derive(Default)]
pub struct RateLimiterRegistry {
    limiters: DashMap<String, Entry>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(
        &self,
        service: &str,
        policy: &RateLimitPolicy,
    ) -> Result<Arc<TokenBucketLimiter>> {
        let key = limiter_key(service, policy);
        if let Some(entry) = self.limiters.get(&key) {
            if entry.limiter.policy_version() == policy.version {
                return Ok(Arc::clone(&entry.limiter));
            }
        }

        // The shard stays locked from lookup to insert so racing callers
        // share one bucket.
        match self.limiters.entry(key) {
            Slot::Occupied(mut occupied) => {
                if occupied.get().limiter.policy_version() != policy.version {
                    let limiter = Arc::new(TokenBucketLimiter::from_policy(policy.clone())?);
                    info!(key = %occupied.key(), version = policy.version, "Replaced rate limiter");
                    occupied.get_mut().limiter = limiter;
                }
                Ok(Arc::clone(&occupied.get().limiter))
            }
            Slot::Vacant(vacant) => {
                let limiter = Arc::new(TokenBucketLimiter::from_policy(policy.clone())?);
                info!(key = %vacant.key(), version = policy.version, "Created rate limiter");
                vacant.insert(Entry {
                    service: service.to_string(),
                    limiter: Arc::clone(&limiter),
                });
                Ok(limiter)
            }
        }
    }

    /// Drop limiters whose policy no longer applies. `keep` receives the
    /// owning service and the limiter's policy.
    pub fn recycle<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&str, &RateLimitPolicy) -> bool,
    {
        let before = self.limiters.len();
        self.limiters
            .retain(|_, entry| keep(&entry.service, entry.limiter.limit_policy()));
        let removed = before.saturating_sub(self.limiters.len());
        if removed > 0 {
            info!(removed, "Recycled rate limiters");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}
