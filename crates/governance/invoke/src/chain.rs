//! Ordered filter pipelines.
//!
//! Every filter receives the invocation and the rest of the chain and must
//! call [`RouteFilterChain::filter`] to continue. Returning without doing so
//! ends the pipeline; returning a [`Fault`] ends it with that decision.

use crate::context::InvocationContext;
use crate::error::Fault;
use crate::request::ServiceRequest;

/// One stage of outbound routing.
pub trait RouteFilter<R: ServiceRequest>: Send + Sync {
    fn name(&self) -> &str;

    fn filter(
        &self,
        invocation: &mut InvocationContext<R>,
        chain: RouteFilterChain<'_, R>,
    ) -> Result<(), Fault>;
}

/// The filters that have not run yet.
pub struct RouteFilterChain<'a, R: ServiceRequest> {
    filters: &'a [&'a dyn RouteFilter<R>],
}

impl<'a, R: ServiceRequest> RouteFilterChain<'a, R> {
    pub fn new(filters: &'a [&'a dyn RouteFilter<R>]) -> Self {
        Self { filters }
    }

    /// Run the next filter, or finish when none is left.
    pub fn filter(self, invocation: &mut InvocationContext<R>) -> Result<(), Fault> {
        match self.filters.split_first() {
            Some((first, rest)) => first.filter(invocation, RouteFilterChain { filters: rest }),
            None => Ok(()),
        }
    }
}

/// One stage of inbound admission.
pub trait InboundFilter<R: ServiceRequest>: Send + Sync {
    fn name(&self) -> &str;

    fn filter(
        &self,
        invocation: &mut InvocationContext<R>,
        chain: InboundFilterChain<'_, R>,
    ) -> Result<(), Fault>;
}

pub struct InboundFilterChain<'a, R: ServiceRequest> {
    filters: &'a [&'a dyn InboundFilter<R>],
}

impl<'a, R: ServiceRequest> InboundFilterChain<'a, R> {
    pub fn new(filters: &'a [&'a dyn InboundFilter<R>]) -> Self {
        Self { filters }
    }

    pub fn filter(self, invocation: &mut InvocationContext<R>) -> Result<(), Fault> {
        match self.filters.split_first() {
            Some((first, rest)) => first.filter(invocation, InboundFilterChain { filters: rest }),
            None => Ok(()),
        }
    }
}
