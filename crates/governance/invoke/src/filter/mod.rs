//! Route filters, in pipeline order, and inbound admission filters.

mod circuitbreak;
mod healthy;
mod inbound;
mod lane;
mod loadbalance;
mod unit;

pub use circuitbreak::CircuitBreakerFilter;
pub use healthy::HealthyFilter;
pub use inbound::{CellInboundFilter, UnitInboundFilter};
pub use lane::LaneFilter;
pub use loadbalance::LoadBalanceFilter;
pub use unit::UnitFilter;
