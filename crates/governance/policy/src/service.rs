//! Per-service policy bundles.
//!
//! A [`Service`] carries a default [`ServicePolicy`] and optional overrides
//! for individual paths and methods. The most specific policy wins.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::rule::TagCondition;

/// Lane fallback behaviour when the target lane has no instances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FallbackType {
    /// Spill over to the space's default lane.
    #[default]
    Default,
    /// Fail closed.
    None,
    /// Spill over to a named lane.
    Custom,
}

/// Lane handling for one lane space.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LanePolicy {
    pub lane_space_id: String,
    /// Lane code to lane code redirects.
    pub redirections: BTreeMap<String, String>,
    pub fallback_type: FallbackType,
    /// Required when `fallback_type` is [`FallbackType::Custom`].
    pub fallback_lane: Option<String>,
}

impl LanePolicy {
    /// Redirect target configured for `lane`, ignoring empty entries.
    pub fn target(&self, lane: Option<&str>) -> Option<&str> {
        lane.and_then(|l| self.redirections.get(l))
            .map(String::as_str)
            .filter(|t| !t.is_empty())
    }
}

/// How a service participates in unit routing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitPolicy {
    /// Not unit routed; any unit may serve.
    None,
    /// Routed to the unit owning the routing variable.
    #[default]
    Unit,
    /// Always served by the center unit.
    Center,
    /// Served locally when possible.
    PreferLocal,
}

/// Live routing behaviour of a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceLivePolicy {
    pub unit_policy: UnitPolicy,
    /// Treat every request as a write.
    pub write_protect: bool,
    /// Preferred unit rule when the request names none.
    pub unit_rule_id: Option<String>,
}

/// Scope a circuit breaker protects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakLevel {
    #[default]
    Service,
    Instance,
}

/// How the breaker window is measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlidingWindowType {
    /// The last `sliding_window_size` calls.
    #[default]
    Count,
    /// Calls of the last `sliding_window_size` seconds.
    Time,
}

/// Response served instead of calling a degraded downstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DegradeConfig {
    pub response_code: u16,
    pub content_type: Option<String>,
    pub response_body: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CircuitBreakPolicy {
    pub name: String,
    pub version: u64,
    pub level: CircuitBreakLevel,
    pub sliding_window_type: SlidingWindowType,
    pub sliding_window_size: u32,
    pub minimum_number_of_calls: u32,
    /// Percentage of failed calls that opens the breaker.
    pub failure_rate_threshold: f32,
    /// Percentage of slow calls that opens the breaker.
    pub slow_call_rate_threshold: f32,
    pub slow_call_duration_threshold_ms: u64,
    pub wait_duration_in_open_state_ms: u64,
    pub permitted_calls_in_half_open_state: u32,
    /// When non-empty, only errors whose message contains one of these count.
    pub record_errors: Vec<String>,
    /// Errors whose message contains one of these are not recorded at all.
    pub ignore_errors: Vec<String>,
    pub degrade_config: Option<DegradeConfig>,
}

impl Default for CircuitBreakPolicy {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: 0,
            level: CircuitBreakLevel::Service,
            sliding_window_type: SlidingWindowType::Count,
            sliding_window_size: 100,
            minimum_number_of_calls: 10,
            failure_rate_threshold: 50.0,
            slow_call_rate_threshold: 100.0,
            slow_call_duration_threshold_ms: 60_000,
            wait_duration_in_open_state_ms: 60_000,
            permitted_calls_in_half_open_state: 10,
            record_errors: Vec::new(),
            ignore_errors: Vec::new(),
            degrade_config: None,
        }
    }
}

/// Admission window: `threshold` permits per `time_window_in_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlidingWindow {
    pub threshold: u32,
    pub time_window_in_ms: u64,
}

impl SlidingWindow {
    /// Steady spacing between two permits, in microseconds.
    pub fn permit_interval_micros(&self) -> f64 {
        if self.threshold == 0 {
            return f64::INFINITY;
        }
        (self.time_window_in_ms as f64 * 1_000.0) / f64::from(self.threshold)
    }
}

/// Rate limit for a service, path or method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitPolicy {
    pub name: String,
    pub version: u64,
    pub sliding_windows: Vec<SlidingWindow>,
    /// Longest a caller may be paced before the request is refused.
    pub max_wait_ms: u64,
    /// Seconds of idle credit the bucket can bank.
    pub max_burst_seconds: f64,
    /// All conditions must match for the limit to apply.
    pub conditions: Vec<TagCondition>,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: 0,
            sliding_windows: Vec::new(),
            max_wait_ms: 0,
            max_burst_seconds: 1.0,
            conditions: Vec::new(),
        }
    }
}

impl RateLimitPolicy {
    /// The tightest configured window, which drives the token bucket.
    pub fn primary_window(&self) -> Option<&SlidingWindow> {
        self.sliding_windows.iter().max_by(|a, b| {
            a.permit_interval_micros()
                .total_cmp(&b.permit_interval_micros())
        })
    }
}

/// Endpoint selection strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadBalanceType {
    #[default]
    RoundRobin,
    Random,
    WeightedRandom,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadBalancePolicy {
    pub policy_type: LoadBalanceType,
}

/// Retry settings consumed by the host's retry layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    pub retry: u32,
    pub retry_interval_ms: u64,
    pub retry_error_codes: Vec<String>,
}

/// Policy bundle applied to a service, path or method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServicePolicy {
    pub id: Option<String>,
    pub live_policy: Option<ServiceLivePolicy>,
    /// Live policy overrides keyed by unit rule id.
    pub unit_rule_policies: BTreeMap<String, ServiceLivePolicy>,
    pub lane_policies: Vec<LanePolicy>,
    pub circuit_break_policies: Vec<CircuitBreakPolicy>,
    pub rate_limit_policies: Vec<RateLimitPolicy>,
    pub load_balance_policy: Option<LoadBalancePolicy>,
    pub retry_policy: Option<RetryPolicy>,
}

impl ServicePolicy {
    pub fn lane_policy(&self, lane_space_id: Option<&str>) -> Option<&LanePolicy> {
        let id = lane_space_id?;
        self.lane_policies.iter().find(|p| p.lane_space_id == id)
    }

    /// Live policy, overridden by the entry for `unit_rule_id` when present.
    pub fn live_policy_for(&self, unit_rule_id: Option<&str>) -> Option<&ServiceLivePolicy> {
        unit_rule_id
            .and_then(|id| self.unit_rule_policies.get(id))
            .or(self.live_policy.as_ref())
    }

    pub fn circuit_break_policies(
        &self,
        level: CircuitBreakLevel,
    ) -> impl Iterator<Item = &CircuitBreakPolicy> {
        self.circuit_break_policies
            .iter()
            .filter(move |p| p.level == level)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMethod {
    pub name: String,
    #[serde(default)]
    pub policy: Option<ServicePolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePath {
    pub path: String,
    #[serde(default)]
    pub policy: Option<ServicePolicy>,
    #[serde(default)]
    pub methods: Vec<ServiceMethod>,
}

/// A governed service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub name: String,
    #[serde(default)]
    pub policy: Option<ServicePolicy>,
    #[serde(default)]
    pub paths: Vec<ServicePath>,
    /// Authorities that contributed to this service, in order of arrival.
    #[serde(default)]
    pub owners: Vec<String>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: None,
            paths: Vec::new(),
            owners: Vec::new(),
        }
    }

    pub fn with_policy(mut self, policy: ServicePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Most specific policy for `path` and `method`.
    pub fn policy_for(&self, path: Option<&str>, method: Option<&str>) -> Option<&ServicePolicy> {
        let service_path = path.and_then(|p| self.paths.iter().find(|sp| sp.path == p));
        let method_policy = service_path.and_then(|sp| {
            method
                .and_then(|m| sp.methods.iter().find(|sm| sm.name == m))
                .and_then(|sm| sm.policy.as_ref())
        });
        method_policy
            .or_else(|| service_path.and_then(|sp| sp.policy.as_ref()))
            .or(self.policy.as_ref())
    }

    /// Every policy bundle declared by the service, outermost first.
    pub fn policies(&self) -> impl Iterator<Item = &ServicePolicy> {
        self.policy.iter().chain(self.paths.iter().flat_map(|sp| {
            sp.policy
                .iter()
                .chain(sp.methods.iter().filter_map(|m| m.policy.as_ref()))
        }))
    }

    pub fn has_owner(&self, owner: &str) -> bool {
        self.owners.iter().any(|o| o == owner)
    }

    pub fn add_owner(&mut self, owner: &str) {
        if !owner.is_empty() && !self.has_owner(owner) {
            self.owners.push(owner.to_string());
        }
    }

    pub fn remove_owner(&mut self, owner: &str) {
        self.owners.retain(|o| o != owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(id: &str) -> ServicePolicy {
        ServicePolicy {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    #[test]
    fn most_specific_policy_wins() {
        let service = Service {
            name: "orders".into(),
            policy: Some(tagged("service")),
            paths: vec![ServicePath {
                path: "/orders".into(),
                policy: Some(tagged("path")),
                methods: vec![ServiceMethod {
                    name: "POST".into(),
                    policy: Some(tagged("method")),
                }],
            }],
            owners: vec![],
        };

        let id = |p: Option<&ServicePolicy>| p.and_then(|p| p.id.clone());
        assert_eq!(id(service.policy_for(Some("/orders"), Some("POST"))), Some("method".into()));
        assert_eq!(id(service.policy_for(Some("/orders"), Some("GET"))), Some("path".into()));
        assert_eq!(id(service.policy_for(Some("/other"), None)), Some("service".into()));
        assert_eq!(service.policies().count(), 3);
    }

    #[test]
    fn live_policy_override_by_unit_rule() {
        let mut policy = ServicePolicy {
            live_policy: Some(ServiceLivePolicy::default()),
            ..Default::default()
        };
        policy.unit_rule_policies.insert(
            "rule-1".into(),
            ServiceLivePolicy {
                unit_policy: UnitPolicy::Center,
                ..Default::default()
            },
        );
        assert_eq!(
            policy.live_policy_for(Some("rule-1")).map(|p| p.unit_policy),
            Some(UnitPolicy::Center)
        );
        assert_eq!(
            policy.live_policy_for(Some("rule-2")).map(|p| p.unit_policy),
            Some(UnitPolicy::Unit)
        );
    }

    #[test]
    fn permit_interval_from_window() {
        let window = SlidingWindow {
            threshold: 10,
            time_window_in_ms: 1_000,
        };
        assert_eq!(window.permit_interval_micros(), 100_000.0);
    }

    #[test]
    fn owners_are_unique_and_ordered() {
        let mut service = Service::new("orders");
        service.add_owner("cp");
        service.add_owner("local");
        service.add_owner("cp");
        assert_eq!(service.owners, vec!["cp".to_string(), "local".to_string()]);
        service.remove_owner("cp");
        assert_eq!(service.owners, vec!["local".to_string()]);
    }

    #[test]
    fn lane_redirect_ignores_empty_target() {
        let mut policy = LanePolicy::default();
        policy.redirections.insert("canary".into(), "beta".into());
        policy.redirections.insert("beta".into(), String::new());
        assert_eq!(policy.target(Some("canary")), Some("beta"));
        assert_eq!(policy.target(Some("beta")), None);
        assert_eq!(policy.target(None), None);
    }
}
