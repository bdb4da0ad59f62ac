//! Endpoint selection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use governance_policy::LoadBalanceType;
use rand::Rng;

use crate::error::{InvokeError, Result};
use crate::instance::Endpoint;

pub trait LoadBalancer: Send + Sync {
    /// Index of the chosen endpoint, `None` when `endpoints` is empty.
    fn choose(&self, key: &str, endpoints: &[Arc<dyn Endpoint>]) -> Option<usize>;
}

/// Parse a balancer name such as `round_robin` or `WEIGHTED_RANDOM`.
pub fn parse_load_balance_type(name: &str) -> Result<LoadBalanceType> {
    match name.to_ascii_lowercase().replace('-', "_").as_str() {
        "round_robin" | "roundrobin" => Ok(LoadBalanceType::RoundRobin),
        "random" => Ok(LoadBalanceType::Random),
        "weighted_random" | "weightedrandom" => Ok(LoadBalanceType::WeightedRandom),
        _ => Err(InvokeError::UnknownLoadBalancer(name.to_string())),
    }
}

/// Round robin with one counter per key.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    counters: DashMap<String, AtomicUsize>,
}

impl LoadBalancer for RoundRobinBalancer {
    fn choose(&self, key: &str, endpoints: &[Arc<dyn Endpoint>]) -> Option<usize> {
        if endpoints.is_empty() {
            return None;
        }
        let next = match self.counters.get(key) {
            Some(counter) => counter.fetch_add(1, Ordering::Relaxed),
            None => self
                .counters
                .entry(key.to_string())
                .or_default()
                .fetch_add(1, Ordering::Relaxed),
        };
        Some(next % endpoints.len())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomBalancer;

impl LoadBalancer for RandomBalancer {
    fn choose(&self, _key: &str, endpoints: &[Arc<dyn Endpoint>]) -> Option<usize> {
        if endpoints.is_empty() {
            return None;
        }
        Some(rand::thread_rng().gen_range(0..endpoints.len()))
    }
}

/// Random choice proportional to [`Endpoint::weight`]; uniform when every
/// weight is zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct WeightedRandomBalancer;

impl LoadBalancer for WeightedRandomBalancer {
    fn choose(&self, key: &str, endpoints: &[Arc<dyn Endpoint>]) -> Option<usize> {
        let total: u64 = endpoints.iter().map(|e| u64::from(e.weight())).sum();
        if total == 0 {
            return RandomBalancer.choose(key, endpoints);
        }
        let mut point = rand::thread_rng().gen_range(0..total);
        for (index, endpoint) in endpoints.iter().enumerate() {
            let weight = u64::from(endpoint.weight());
            if point < weight {
                return Some(index);
            }
            point -= weight;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Instance;

    fn endpoints(weights: &[u32]) -> Vec<Arc<dyn Endpoint>> {
        weights
            .iter()
            .enumerate()
            .map(|(i, w)| {
                Arc::new(Instance::new(format!("i-{i}"), "127.0.0.1:80").with_weight(*w))
                    as Arc<dyn Endpoint>
            })
            .collect()
    }

    #[test]
    fn round_robin_cycles_per_key() {
        let balancer = RoundRobinBalancer::default();
        let list = endpoints(&[1, 1, 1]);
        let picks: Vec<_> = (0..4).filter_map(|_| balancer.choose("a", &list)).collect();
        assert_eq!(picks, vec![0, 1, 2, 0]);
        assert_eq!(balancer.choose("b", &list), Some(0));
    }

    #[test]
    fn weighted_random_skips_zero_weight() {
        let list = endpoints(&[0, 5, 0]);
        for _ in 0..50 {
            assert_eq!(WeightedRandomBalancer.choose("a", &list), Some(1));
        }
    }

    #[test]
    fn empty_list_has_no_choice() {
        assert_eq!(RandomBalancer.choose("a", &[]), None);
        assert_eq!(RoundRobinBalancer::default().choose("a", &[]), None);
    }

    #[test]
    fn parses_balancer_names() {
        assert_eq!(
            parse_load_balance_type("WEIGHTED-RANDOM").unwrap(),
            LoadBalanceType::WeightedRandom
        );
        assert!(matches!(
            parse_load_balance_type("least-active"),
            Err(InvokeError::UnknownLoadBalancer(_))
        ));
    }
}
