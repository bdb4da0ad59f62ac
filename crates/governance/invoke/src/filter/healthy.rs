use crate::chain::{RouteFilter, RouteFilterChain};
use crate::context::InvocationContext;
use crate::error::Fault;
use crate::request::ServiceRequest;

/// Prefers healthy instances; keeps everything when none is healthy.
#[derive(Debug, Default, Clone, Copy)]
pub struct HealthyFilter;

impl<R: ServiceRequest> RouteFilter<R> for HealthyFilter {
    fn name(&self) -> &str {
        "healthy"
    }

    fn filter(
        &self,
        invocation: &mut InvocationContext<R>,
        chain: RouteFilterChain<'_, R>,
    ) -> Result<(), Fault> {
        invocation
            .route_target_mut()
            .filter(|e| e.is_healthy(), None, false);
        chain.filter(invocation)
    }
}
