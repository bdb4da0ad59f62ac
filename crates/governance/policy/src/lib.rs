//! Governance policy model.
//!
//! [`PolicySnapshot`] is an immutable, lazily indexed view of live spaces,
//! lane spaces, services and database clusters. [`PolicyStore`] publishes
//! snapshots atomically and applies incremental service updates through a
//! [`PolicyMerger`].

pub mod db;
pub mod domain;
pub mod error;
pub mod lane;
pub mod live;
pub mod merge;
pub mod rule;
pub mod service;
pub mod snapshot;
pub mod store;

pub use db::DatabaseCluster;
pub use domain::{Domain, DomainPolicy};
pub use error::{PolicyError, Result};
pub use lane::{Lane, LaneDomain, LaneSpace};
pub use live::{
    AccessMode, Cell, LiveDomain, LiveSpace, LiveSpec, Place, Unit, UnitDomain, UnitRange,
    UnitRoute, UnitRule, VariableMissingAction,
};
pub use merge::{merge_services, OwnerMerger, PolicyMerger, ReplaceMerger};
pub use rule::{OpType, TagCondition};
pub use service::{
    CircuitBreakLevel, CircuitBreakPolicy, DegradeConfig, FallbackType, LanePolicy,
    LoadBalancePolicy, LoadBalanceType, RateLimitPolicy, RetryPolicy, Service, ServiceLivePolicy,
    ServiceMethod, ServicePath, ServicePolicy, SlidingWindow, SlidingWindowType, UnitPolicy,
};
pub use snapshot::{PolicyDocument, PolicySnapshot, PolicySnapshotBuilder};
pub use store::PolicyStore;
