//! The governance facade.
//!
//! [`GovernanceEngine`] owns the policy store, the breaker and limiter
//! registries and the filter pipelines. A host call path drives one
//! invocation through it:
//!
//! 1. [`GovernanceEngine::invocation`] resolves metadata against the current
//!    snapshot.
//! 2. [`GovernanceEngine::route`] (outbound) or [`GovernanceEngine::inbound`]
//!    runs the filter chain.
//! 3. [`GovernanceEngine::admit`] gates the real call on breakers and rate
//!    limiters and hands back an [`Admission`].
//! 4. The admission is completed with the outcome of the call.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use governance_circuitbreak::{
    instance_uri, service_uri, BreakerPermit, CircuitBreaker, CircuitBreakerRegistry,
    CircuitBreakerStateListener,
};
use governance_invoke::{
    parse_load_balance_type, reason, Candidate, CellInboundFilter, CircuitBreakerFilter, Endpoint,
    Fault, FaultType, GovernanceContext, HealthyFilter, InboundFilter, InboundFilterChain,
    InvocationContext, LaneFilter, LoadBalanceFilter, RequestListener, RouteFilter,
    RouteFilterChain, ServiceRequest, UnitFilter, UnitInboundFilter,
};
use governance_policy::{
    CircuitBreakLevel, CircuitBreakPolicy, DatabaseCluster, LaneSpace, LiveSpace, PolicyMerger,
    PolicySnapshot, PolicyStore, Service,
};
use governance_ratelimit::{RateLimiter, RateLimiterRegistry, TokenBucketLimiter};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::GovernanceConfig;
use crate::error::Result;

pub struct GovernanceEngine {
    config: GovernanceConfig,
    context: Arc<GovernanceContext>,
    breakers: Arc<CircuitBreakerRegistry>,
    limiters: RateLimiterRegistry,
    listeners: RwLock<Vec<Arc<dyn RequestListener>>>,
    healthy: HealthyFilter,
    unit: UnitFilter,
    lane: LaneFilter,
    circuit_breaker: CircuitBreakerFilter,
    load_balance: LoadBalanceFilter,
    unit_inbound: UnitInboundFilter,
    cell_inbound: CellInboundFilter,
}

impl std::fmt::Debug for GovernanceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernanceEngine")
            .field("application", &self.context.application().name)
            .field("snapshot", &self.context.store().current().version())
            .field("breakers", &self.breakers.len())
            .field("limiters", &self.limiters.len())
            .finish()
    }
}

impl GovernanceEngine {
    /// Engine over `snapshot` with the default parsers and matchers.
    pub fn new(config: GovernanceConfig, snapshot: PolicySnapshot) -> Result<Self> {
        let store = Arc::new(PolicyStore::new(snapshot));
        let context = GovernanceContext::builder(store)
            .application(config.application.to_application())
            .live_enabled(config.live.enabled)
            .lane_enabled(config.lane.enabled)
            .build();
        Self::with_context(config, context)
    }

    /// Engine over a prepared context, for hosts that plug in their own
    /// parsers or tag matchers.
    pub fn with_context(config: GovernanceConfig, context: GovernanceContext) -> Result<Self> {
        let default_type = parse_load_balance_type(&config.load_balance.default_type)?;
        let breakers = Arc::new(CircuitBreakerRegistry::new());
        info!(
            application = %context.application().name,
            live = context.is_live_enabled(),
            lane = context.is_lane_enabled(),
            "Governance engine started"
        );
        Ok(Self {
            circuit_breaker: CircuitBreakerFilter::new(Arc::clone(&breakers)),
            load_balance: LoadBalanceFilter::new(default_type),
            config,
            context: Arc::new(context),
            breakers,
            limiters: RateLimiterRegistry::new(),
            listeners: RwLock::new(Vec::new()),
            healthy: HealthyFilter,
            unit: UnitFilter,
            lane: LaneFilter,
            unit_inbound: UnitInboundFilter,
            cell_inbound: CellInboundFilter,
        })
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<GovernanceContext> {
        &self.context
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        self.context.store()
    }

    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.store().current()
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn limiters(&self) -> &RateLimiterRegistry {
        &self.limiters
    }

    /// Listener attached to every invocation created from now on.
    pub fn add_listener(&self, listener: Arc<dyn RequestListener>) {
        self.listeners.write().push(listener);
    }

    /// Listener notified of every breaker state change.
    pub fn add_breaker_listener(&self, listener: Arc<dyn CircuitBreakerStateListener>) {
        self.breakers.add_listener(listener);
    }

    /// Resolve an invocation for `request` against the current snapshot.
    pub fn invocation<R: ServiceRequest>(
        &self,
        request: R,
        endpoints: Vec<Arc<dyn Endpoint>>,
    ) -> InvocationContext<R> {
        let mut invocation =
            InvocationContext::new(request, Arc::clone(&self.context)).with_endpoints(endpoints);
        for listener in self.listeners.read().iter() {
            invocation.add_listener(Arc::clone(listener));
        }
        invocation
    }

    /// Run the outbound filter chain and return the chosen endpoint.
    pub fn route<R: ServiceRequest>(
        &self,
        invocation: &mut InvocationContext<R>,
    ) -> std::result::Result<Candidate, Fault> {
        let guarded: [&dyn RouteFilter<R>; 5] = [
            &self.healthy,
            &self.unit,
            &self.lane,
            &self.circuit_breaker,
            &self.load_balance,
        ];
        let unguarded: [&dyn RouteFilter<R>; 4] =
            [&self.healthy, &self.unit, &self.lane, &self.load_balance];
        let filters: &[&dyn RouteFilter<R>] = if self.config.circuit_breaker.enabled {
            &guarded
        } else {
            &unguarded
        };
        RouteFilterChain::new(filters).filter(invocation)?;

        if let Some(candidate) = invocation.route_target().candidate().cloned() {
            return Ok(candidate);
        }
        let message = invocation.error(reason::REJECT_NO_INSTANCE);
        Err(invocation.reject(FaultType::Unready, message))
    }

    /// Run the inbound admission chain for a request served locally.
    pub fn inbound<R: ServiceRequest>(
        &self,
        invocation: &mut InvocationContext<R>,
    ) -> std::result::Result<(), Fault> {
        let filters: [&dyn InboundFilter<R>; 2] = [&self.unit_inbound, &self.cell_inbound];
        InboundFilterChain::new(&filters).filter(invocation)
    }

    /// Gate the call on circuit breakers and rate limiters, waiting on the
    /// calling thread when a limiter paces it.
    pub fn admit<R: ServiceRequest>(
        &self,
        invocation: &mut InvocationContext<R>,
    ) -> std::result::Result<Admission, Fault> {
        let admission = self.acquire_breakers(invocation)?;
        for (limiter, timeout) in self.limiters_for(invocation) {
            if !limiter.acquire(1, timeout) {
                return Err(self.reject_limited(invocation, admission, &limiter));
            }
        }
        Ok(admission)
    }

    /// Like [`GovernanceEngine::admit`], suspending instead of blocking while
    /// a limiter paces the call.
    pub async fn admit_async<R: ServiceRequest>(
        &self,
        invocation: &mut InvocationContext<R>,
    ) -> std::result::Result<Admission, Fault> {
        let admission = self.acquire_breakers(invocation)?;
        for (limiter, timeout) in self.limiters_for(invocation) {
            if !limiter.acquire_async(1, timeout).await {
                return Err(self.reject_limited(invocation, admission, &limiter));
            }
        }
        Ok(admission)
    }

    fn acquire_breakers<R: ServiceRequest>(
        &self,
        invocation: &mut InvocationContext<R>,
    ) -> std::result::Result<Admission, Fault> {
        let mut admission = Admission::default();
        if !self.config.circuit_breaker.enabled {
            return Ok(admission);
        }
        let Some(policy) = invocation.service_metadata().service_policy() else {
            return Ok(admission);
        };

        let service = invocation.service_metadata().service_name.clone();
        let instance = invocation
            .route_target()
            .candidate()
            .map(|c| c.endpoint.id().to_string());
        let mut guarded: Vec<(String, CircuitBreakPolicy)> = policy
            .circuit_break_policies(CircuitBreakLevel::Service)
            .map(|p| (service_uri(&service, &p.name), p.clone()))
            .collect();
        if let Some(instance) = &instance {
            guarded.extend(
                policy
                    .circuit_break_policies(CircuitBreakLevel::Instance)
                    .map(|p| (instance_uri(&service, &p.name, instance), p.clone())),
            );
        }

        for (uri, policy) in guarded {
            let breaker = match self.breakers.get_or_create(&service, &uri, &policy) {
                Ok(breaker) => breaker,
                Err(e) => {
                    warn!(service = %service, uri = %uri, error = %e, "Skipping invalid circuit breaker policy");
                    continue;
                }
            };
            let Some(permit) = breaker.acquire_permit() else {
                admission.release();
                let message = invocation.error(reason::REJECT_CIRCUIT_BREAK);
                return Err(match &policy.degrade_config {
                    Some(config) => invocation.degrade(FaultType::CircuitBreak, message, config),
                    None => invocation.reject(FaultType::CircuitBreak, message),
                });
            };
            admission.breakers.push((breaker, permit));
        }
        Ok(admission)
    }

    /// Limiters whose policy applies to this request, with the wait each
    /// may impose.
    fn limiters_for<R: ServiceRequest>(
        &self,
        invocation: &InvocationContext<R>,
    ) -> Vec<(Arc<TokenBucketLimiter>, Duration)> {
        if !self.config.rate_limit.enabled {
            return Vec::new();
        }
        let Some(policy) = invocation.service_metadata().service_policy() else {
            return Vec::new();
        };
        let service = &invocation.service_metadata().service_name;

        policy
            .rate_limit_policies
            .iter()
            .filter(|p| p.conditions.iter().all(|c| invocation.matches(Some(c))))
            .filter_map(|p| match self.limiters.get_or_create(service, p) {
                Ok(limiter) => {
                    let wait_ms = if p.max_wait_ms > 0 {
                        p.max_wait_ms
                    } else {
                        self.config.rate_limit.default_timeout_ms
                    };
                    Some((limiter, Duration::from_millis(wait_ms)))
                }
                Err(e) => {
                    warn!(service = %service, policy = %p.name, error = %e, "Skipping invalid rate limit policy");
                    None
                }
            })
            .collect()
    }

    fn reject_limited<R: ServiceRequest>(
        &self,
        invocation: &mut InvocationContext<R>,
        mut admission: Admission,
        limiter: &TokenBucketLimiter,
    ) -> Fault {
        admission.release();
        debug!(policy = %limiter.limit_policy().name, "Rate limit exceeded");
        let message = invocation.error(reason::REJECT_LIMIT);
        invocation.reject(FaultType::Limit, message)
    }

    /// Apply service updates from `owner` and drop state of removed policies.
    pub fn update_services(
        &self,
        updates: Vec<Service>,
        deletes: &HashSet<String>,
        merger: &dyn PolicyMerger,
        owner: &str,
    ) -> Arc<PolicySnapshot> {
        let snapshot = self.store().update(updates, deletes, merger, owner);
        self.recycle(&snapshot);
        snapshot
    }

    pub fn update_service(
        &self,
        service: Service,
        merger: &dyn PolicyMerger,
        owner: &str,
    ) -> Arc<PolicySnapshot> {
        let snapshot = self.store().update_service(service, merger, owner);
        self.recycle(&snapshot);
        snapshot
    }

    pub fn delete_service(
        &self,
        name: &str,
        merger: &dyn PolicyMerger,
        owner: &str,
    ) -> Arc<PolicySnapshot> {
        let snapshot = self.store().delete_service(name, merger, owner);
        self.recycle(&snapshot);
        snapshot
    }

    pub fn update_live_spaces(&self, live_spaces: Vec<LiveSpace>) -> Result<Arc<PolicySnapshot>> {
        Ok(self.store().update_live_spaces(live_spaces)?)
    }

    pub fn update_lane_spaces(&self, lane_spaces: Vec<LaneSpace>) -> Result<Arc<PolicySnapshot>> {
        Ok(self.store().update_lane_spaces(lane_spaces)?)
    }

    pub fn update_db_clusters(
        &self,
        db_clusters: Vec<DatabaseCluster>,
    ) -> Result<Arc<PolicySnapshot>> {
        Ok(self.store().update_db_clusters(db_clusters)?)
    }

    /// Replace all policy with `snapshot`.
    pub fn publish(&self, snapshot: PolicySnapshot) -> Arc<PolicySnapshot> {
        let snapshot = self.store().publish(snapshot);
        self.recycle(&snapshot);
        snapshot
    }

    /// Drop breakers and limiters whose policy is gone from `snapshot`.
    pub fn recycle(&self, snapshot: &PolicySnapshot) -> usize {
        let breakers = self.breakers.recycle(|service, policy| {
            snapshot.service(service).is_some_and(|s| {
                s.policies()
                    .any(|p| p.circuit_break_policies.iter().any(|c| c.name == policy.name))
            })
        });
        let limiters = self.limiters.recycle(|service, policy| {
            snapshot.service(service).is_some_and(|s| {
                s.policies()
                    .any(|p| p.rate_limit_policies.iter().any(|r| r.name == policy.name))
            })
        });
        breakers + limiters
    }

    /// Recycle registries whenever the store publishes, including updates
    /// written to the store directly. The task ends with the engine.
    pub fn spawn_recycler(self: &Arc<Self>) -> JoinHandle<()> {
        let engine: Weak<Self> = Arc::downgrade(self);
        let mut versions = self.store().subscribe();
        tokio::spawn(async move {
            while versions.changed().await.is_ok() {
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                let snapshot = engine.snapshot();
                let removed = engine.recycle(&snapshot);
                debug!(version = snapshot.version(), removed, "Recycled governance state");
            }
        })
    }
}

/// Breaker permits held for one admitted call.
///
/// Complete it with the call's outcome. Dropping it uncompleted returns the
/// permits without recording anything. When admission is refused by a rate
/// limiter the returned fault is a `Limit` rejection, which
/// [`Fault::is_transient`] reports as retryable by caller policy.
#[derive(Default)]
pub struct Admission {
    breakers: Vec<(Arc<dyn CircuitBreaker>, BreakerPermit)>,
    released: bool,
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission")
            .field(
                "breakers",
                &self.breakers.iter().map(|(b, _)| b.uri()).collect::<Vec<_>>(),
            )
            .field("released", &self.released)
            .finish()
    }
}

impl Admission {
    /// URIs of the breakers guarding this call.
    pub fn breaker_uris(&self) -> impl Iterator<Item = &str> {
        self.breakers.iter().map(|(b, _)| b.uri())
    }

    pub fn complete_success<R: ServiceRequest>(
        mut self,
        invocation: &mut InvocationContext<R>,
        duration: Duration,
    ) {
        for (breaker, _) in &self.breakers {
            breaker.on_success(duration);
        }
        self.release();
        invocation.on_success(duration);
    }

    pub fn complete_error<R: ServiceRequest>(
        mut self,
        invocation: &mut InvocationContext<R>,
        duration: Duration,
        cause: &str,
    ) {
        for (breaker, _) in &self.breakers {
            breaker.on_error(duration, cause);
        }
        self.release();
        invocation.on_failure(duration, cause);
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        for (breaker, permit) in &self.breakers {
            breaker.release_permit(*permit);
        }
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.release();
    }
}
