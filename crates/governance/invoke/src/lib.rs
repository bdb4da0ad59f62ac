//! Per-call governance decisions.
//!
//! An [`InvocationContext`] is built from a host request and the current
//! policy snapshot, then an ordered chain of [`RouteFilter`]s narrows its
//! [`RouteTarget`] until a single [`Candidate`] is chosen or a [`Fault`] is
//! signaled on the request.

pub mod application;
pub mod chain;
pub mod context;
pub mod error;
pub mod filter;
pub mod instance;
pub mod listener;
pub mod loadbalance;
pub mod matcher;
pub mod metadata;
pub mod parser;
pub mod request;
pub mod route;

#[cfg(test)]
pub(crate) mod testing;

pub use application::{Application, Location};
pub use chain::{InboundFilter, InboundFilterChain, RouteFilter, RouteFilterChain};
pub use context::{GovernanceContext, GovernanceContextBuilder, InvocationContext};
pub use error::{reason, Fault, FaultKind, FaultType, InvokeError, Result};
pub use filter::{
    CellInboundFilter, CircuitBreakerFilter, HealthyFilter, LaneFilter, LoadBalanceFilter,
    UnitFilter, UnitInboundFilter,
};
pub use instance::{Endpoint, Instance};
pub use listener::RequestListener;
pub use loadbalance::{
    parse_load_balance_type, LoadBalancer, RandomBalancer, RoundRobinBalancer,
    WeightedRandomBalancer,
};
pub use matcher::{HeaderMatcher, QueryMatcher, TagMatcher};
pub use metadata::{LaneMetadata, LiveMetadata, ServiceMetadata};
pub use parser::{
    DefaultLaneParser, DefaultLiveParser, DefaultServiceParser, LaneParser, LiveParser,
    ServiceParser,
};
pub use request::{keys, Carrier, ServiceRequest, Signal, SimpleRequest};
pub use route::{Candidate, RouteTarget};
