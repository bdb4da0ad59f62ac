use std::sync::Arc;

use governance_circuitbreak::{instance_uri, CircuitBreakerRegistry};
use governance_policy::{CircuitBreakLevel, CircuitBreakPolicy};

use crate::chain::{RouteFilter, RouteFilterChain};
use crate::context::InvocationContext;
use crate::error::{reason, Fault, FaultType};
use crate::request::ServiceRequest;

/// Drops instances whose instance level breaker refuses calls.
///
/// When every candidate is broken the request is degraded if a policy
/// configures a degrade response, and rejected otherwise.
#[derive(Debug, Clone)]
pub struct CircuitBreakerFilter {
    registry: Arc<CircuitBreakerRegistry>,
}

impl CircuitBreakerFilter {
    pub fn new(registry: Arc<CircuitBreakerRegistry>) -> Self {
        Self { registry }
    }
}

impl<R: ServiceRequest> RouteFilter<R> for CircuitBreakerFilter {
    fn name(&self) -> &str {
        "circuit-breaker"
    }

    fn filter(
        &self,
        invocation: &mut InvocationContext<R>,
        chain: RouteFilterChain<'_, R>,
    ) -> Result<(), Fault> {
        let policies: Vec<CircuitBreakPolicy> = invocation
            .service_metadata()
            .service_policy()
            .map(|p| p.circuit_break_policies(CircuitBreakLevel::Instance).cloned().collect())
            .unwrap_or_default();
        if policies.is_empty() || invocation.route_target().is_empty() {
            return chain.filter(invocation);
        }

        let service = invocation.service_metadata().service_name.clone();
        let registry = &self.registry;
        let available = invocation.route_target_mut().filter(
            |e| {
                policies.iter().all(|p| {
                    registry
                        .get(&instance_uri(&service, &p.name, e.id()))
                        .map_or(true, |b| b.is_available())
                })
            },
            None,
            true,
        );
        if available > 0 {
            return chain.filter(invocation);
        }

        let message = invocation.error(reason::REJECT_CIRCUIT_BREAK);
        match policies.iter().find_map(|p| p.degrade_config.as_ref()) {
            Some(config) => Err(invocation.degrade(FaultType::CircuitBreak, message, config)),
            None => Err(invocation.reject(FaultType::CircuitBreak, message)),
        }
    }
}
