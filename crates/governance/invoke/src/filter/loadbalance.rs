use std::sync::Arc;

use governance_policy::LoadBalanceType;

use crate::chain::{RouteFilter, RouteFilterChain};
use crate::context::InvocationContext;
use crate::error::{reason, Fault, FaultType};
use crate::loadbalance::{LoadBalancer, RandomBalancer, RoundRobinBalancer, WeightedRandomBalancer};
use crate::request::ServiceRequest;

/// Last filter: rejects when nothing is left, otherwise picks the candidate.
#[derive(Debug, Default)]
pub struct LoadBalanceFilter {
    default_type: LoadBalanceType,
    round_robin: Arc<RoundRobinBalancer>,
}

impl LoadBalanceFilter {
    pub fn new(default_type: LoadBalanceType) -> Self {
        Self {
            default_type,
            round_robin: Arc::default(),
        }
    }

    fn balancer(&self, balance_type: LoadBalanceType) -> &dyn LoadBalancer {
        match balance_type {
            LoadBalanceType::RoundRobin => &*self.round_robin,
            LoadBalanceType::Random => &RandomBalancer,
            LoadBalanceType::WeightedRandom => &WeightedRandomBalancer,
        }
    }
}

impl<R: ServiceRequest> RouteFilter<R> for LoadBalanceFilter {
    fn name(&self) -> &str {
        "load-balance"
    }

    fn filter(
        &self,
        invocation: &mut InvocationContext<R>,
        chain: RouteFilterChain<'_, R>,
    ) -> Result<(), Fault> {
        if invocation.route_target().is_empty() {
            let message = invocation.error(reason::REJECT_NO_INSTANCE);
            return Err(invocation.reject(FaultType::Unready, message));
        }

        let balance_type = invocation
            .service_metadata()
            .service_policy()
            .and_then(|p| p.load_balance_policy.as_ref())
            .map_or(self.default_type, |p| p.policy_type);
        let key = invocation.service_metadata().service_name.clone();
        let index = self
            .balancer(balance_type)
            .choose(&key, invocation.route_target().endpoints());
        if let Some(index) = index {
            invocation.route_target_mut().choose(index);
        }
        chain.filter(invocation)
    }
}
