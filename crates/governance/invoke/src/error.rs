use std::fmt;

use thiserror::Error;

/// How the host should treat a request that governance refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Do not send the request now. A [`FaultType::Limit`] rejection is a
    /// transient admission failure the caller may retry after backing off;
    /// see [`Fault::is_transient`].
    Reject,
    /// Retry against another unit or cell.
    Failover,
    /// Answer with the configured fallback response.
    Degrade,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::Reject => write!(f, "reject"),
            FaultKind::Failover => write!(f, "failover"),
            FaultKind::Degrade => write!(f, "degrade"),
        }
    }
}

/// The governance concern that produced a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultType {
    Unit,
    Cell,
    Lane,
    Limit,
    CircuitBreak,
    Unready,
    Permission,
}

impl fmt::Display for FaultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultType::Unit => "unit",
            FaultType::Cell => "cell",
            FaultType::Lane => "lane",
            FaultType::Limit => "limit",
            FaultType::CircuitBreak => "circuit-break",
            FaultType::Unready => "unready",
            FaultType::Permission => "permission",
        };
        f.write_str(name)
    }
}

/// A governance decision that stops the normal call path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} by {fault_type}: {reason}")]
pub struct Fault {
    pub kind: FaultKind,
    pub fault_type: FaultType,
    pub reason: String,
}

impl Fault {
    pub fn new(kind: FaultKind, fault_type: FaultType, reason: impl Into<String>) -> Self {
        Self {
            kind,
            fault_type,
            reason: reason.into(),
        }
    }

    pub fn is_reject(&self) -> bool {
        self.kind == FaultKind::Reject
    }

    pub fn is_failover(&self) -> bool {
        self.kind == FaultKind::Failover
    }

    pub fn is_degrade(&self) -> bool {
        self.kind == FaultKind::Degrade
    }

    /// Whether the refusal only reflects current load, so the same request
    /// may succeed later. Only rate limiter timeouts qualify.
    pub fn is_transient(&self) -> bool {
        self.fault_type == FaultType::Limit
    }
}

/// Fixed reason codes carried at the head of every fault message.
pub mod reason {
    pub const FAILOVER_UNIT_NOT_ACCESSIBLE: &str = "failover when unit is not accessible.";
    pub const REJECT_NO_UNIT: &str = "reject when local unit is not found.";
    pub const REJECT_UNIT_NOT_CENTER: &str = "reject when unit is not center.";
    pub const REJECT_NO_CENTER: &str = "reject when center unit is not found.";
    pub const REJECT_UNIT_NOT_ACCESSIBLE: &str = "reject when unit is not accessible.";
    pub const REJECT_NO_VARIABLE: &str = "reject when unit variable is not found.";
    pub const REJECT_NO_UNIT_ROUTE: &str = "reject when unit route is not found.";
    pub const REJECT_NO_INSTANCE: &str = "reject when instance is not found.";
    pub const FAILOVER_CENTER_NO_VARIABLE: &str =
        "failover center unit when unit variable is not found.";
    pub const FAILOVER_ESCAPE: &str = "failover unit when variable is not belong to this unit.";
    pub const FAILOVER_CELL_NOT_ACCESSIBLE: &str =
        "failover other cell when local cell is not accessible.";
    pub const REJECT_CIRCUIT_BREAK: &str = "reject when circuit breaker is open.";
    pub const REJECT_LIMIT: &str = "reject when rate limit is exceeded.";
}

/// Errors raised while assembling the invocation machinery.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("tag matcher already registered: {0}")]
    DuplicateMatcher(String),

    #[error("unknown load balancer: {0}")]
    UnknownLoadBalancer(String),
}

pub type Result<T> = std::result::Result<T, InvokeError>;
