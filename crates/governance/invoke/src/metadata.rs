//! Metadata resolved once per invocation.
//!
//! Each struct holds `Arc`s into the snapshot the invocation was built from,
//! so lookups stay valid while a newer snapshot is published.

use std::sync::Arc;

use governance_policy::{
    Cell, Lane, LaneSpace, LiveSpace, Service, ServiceLivePolicy, ServicePolicy, Unit, UnitPolicy,
    UnitRule,
};

#[derive(Debug, Clone, Default)]
pub struct ServiceMetadata {
    pub service_name: String,
    pub service_group: Option<String>,
    pub path: Option<String>,
    pub method: Option<String>,
    pub write: bool,
    pub service: Option<Arc<Service>>,
    /// Unit rule whose live policy override applies.
    pub unit_rule_id: Option<String>,
}

impl ServiceMetadata {
    /// Most specific policy for the request's path and method.
    pub fn service_policy(&self) -> Option<&ServicePolicy> {
        self.service
            .as_ref()
            .and_then(|s| s.policy_for(self.path.as_deref(), self.method.as_deref()))
    }

    pub fn live_policy(&self) -> Option<&ServiceLivePolicy> {
        self.service_policy()
            .and_then(|p| p.live_policy_for(self.unit_rule_id.as_deref()))
    }

    /// Unit policy in effect; services without a live policy are not unit
    /// routed.
    pub fn unit_policy(&self) -> UnitPolicy {
        self.live_policy()
            .map(|p| p.unit_policy)
            .unwrap_or(UnitPolicy::None)
    }

    /// Write intent, forced on by write protection.
    pub fn is_write(&self) -> bool {
        self.write || self.live_policy().is_some_and(|p| p.write_protect)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LiveMetadata {
    pub live_space: Option<Arc<LiveSpace>>,
    pub unit_rule_id: Option<String>,
    pub variable: Option<String>,
    pub current_unit: Option<String>,
    pub current_cell: Option<String>,
    /// Unit owning the routing variable, resolved through the unit rule.
    pub target_unit: Option<String>,
}

impl LiveMetadata {
    pub fn live_space_id(&self) -> Option<&str> {
        self.live_space.as_deref().map(|s| s.id.as_str())
    }

    pub fn unit_rule(&self) -> Option<&UnitRule> {
        let space = self.live_space.as_deref()?;
        space.unit_rule(self.unit_rule_id.as_deref()?)
    }

    pub fn current_unit(&self) -> Option<&Unit> {
        self.unit(self.current_unit.as_deref())
    }

    pub fn current_cell(&self) -> Option<&Cell> {
        self.current_unit()?.cell(self.current_cell.as_deref()?)
    }

    pub fn center_unit(&self) -> Option<&Unit> {
        self.live_space.as_deref()?.center_unit()
    }

    pub fn target_unit(&self) -> Option<&Unit> {
        self.unit(self.target_unit.as_deref())
    }

    pub fn variable(&self) -> Option<&str> {
        self.variable.as_deref().filter(|v| !v.is_empty())
    }

    fn unit(&self, code: Option<&str>) -> Option<&Unit> {
        self.live_space.as_deref()?.unit(code?)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LaneMetadata {
    /// Lane space the request is currently travelling in.
    pub lane_space: Option<Arc<LaneSpace>>,
    pub current_lane_id: Option<String>,
    pub target_space_id: Option<String>,
    pub target_space: Option<Arc<LaneSpace>>,
    pub target_lane_id: Option<String>,
    pub default_space_id: Option<String>,
    pub default_lane_id: Option<String>,
}

impl LaneMetadata {
    pub fn current_lane(&self) -> Option<&Lane> {
        self.lane_space
            .as_deref()?
            .lane_or_default(self.current_lane_id.as_deref())
    }

    /// Lane the request should reach; the target space's default lane when
    /// none was requested.
    pub fn target_lane(&self) -> Option<&Lane> {
        self.target_space
            .as_deref()?
            .lane_or_default(self.target_lane_id.as_deref())
    }
}
