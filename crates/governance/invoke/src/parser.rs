//! Pluggable metadata resolution.
//!
//! The defaults read propagated headers first and fall back to the local
//! application's location.

use governance_policy::{PolicySnapshot, ServicePolicy, UnitRule};

use crate::application::Application;
use crate::metadata::{LaneMetadata, LiveMetadata, ServiceMetadata};
use crate::request::{keys, ServiceRequest};

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

pub trait ServiceParser: Send + Sync {
    fn parse(&self, request: &dyn ServiceRequest, snapshot: &PolicySnapshot) -> ServiceMetadata;

    /// Apply live-aware overrides keyed by the active unit rule.
    fn configure(&self, metadata: ServiceMetadata, unit_rule: Option<&UnitRule>)
        -> ServiceMetadata;
}

pub trait LiveParser: Send + Sync {
    fn parse(
        &self,
        request: &dyn ServiceRequest,
        snapshot: &PolicySnapshot,
        application: &Application,
    ) -> LiveMetadata;

    /// Settle the unit rule and target unit once the service policy is known.
    fn configure(&self, metadata: LiveMetadata, policy: Option<&ServicePolicy>) -> LiveMetadata;
}

pub trait LaneParser: Send + Sync {
    fn parse(
        &self,
        request: &dyn ServiceRequest,
        snapshot: &PolicySnapshot,
        application: &Application,
    ) -> LaneMetadata;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultServiceParser;

impl ServiceParser for DefaultServiceParser {
    fn parse(&self, request: &dyn ServiceRequest, snapshot: &PolicySnapshot) -> ServiceMetadata {
        ServiceMetadata {
            service_name: request.service().to_string(),
            service_group: non_empty(request.group()),
            path: non_empty(request.path()),
            method: non_empty(request.method()),
            write: request.is_write(),
            service: snapshot.service(request.service()).cloned(),
            unit_rule_id: None,
        }
    }

    fn configure(
        &self,
        mut metadata: ServiceMetadata,
        unit_rule: Option<&UnitRule>,
    ) -> ServiceMetadata {
        metadata.unit_rule_id = unit_rule.map(|r| r.id.clone());
        metadata
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultLiveParser;

impl LiveParser for DefaultLiveParser {
    fn parse(
        &self,
        request: &dyn ServiceRequest,
        snapshot: &PolicySnapshot,
        application: &Application,
    ) -> LiveMetadata {
        let location = &application.location;
        let space_id = non_empty(request.header(keys::LIVE_SPACE_ID))
            .or_else(|| location.live_space_id.clone());
        let live_space = space_id.as_deref().and_then(|id| snapshot.live_space(id)).cloned();
        LiveMetadata {
            live_space,
            unit_rule_id: non_empty(request.header(keys::LIVE_RULE_ID)),
            variable: non_empty(request.variable()),
            current_unit: location.unit.clone(),
            current_cell: location.cell.clone(),
            target_unit: None,
        }
    }

    fn configure(&self, mut metadata: LiveMetadata, policy: Option<&ServicePolicy>) -> LiveMetadata {
        if metadata.unit_rule_id.is_none() {
            metadata.unit_rule_id = policy
                .and_then(|p| p.live_policy_for(None))
                .and_then(|p| p.unit_rule_id.clone());
        }
        let target = match (metadata.unit_rule(), metadata.variable()) {
            (Some(rule), Some(variable)) => rule.route(variable).map(|r| r.unit.clone()),
            _ => None,
        };
        metadata.target_unit = target;
        metadata
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultLaneParser;

impl LaneParser for DefaultLaneParser {
    fn parse(
        &self,
        request: &dyn ServiceRequest,
        snapshot: &PolicySnapshot,
        application: &Application,
    ) -> LaneMetadata {
        let location = &application.location;
        let default_space = snapshot.default_lane_space();
        let default_space_id = default_space.map(|s| s.id.clone());
        let default_lane_id = default_space
            .and_then(|s| s.default_lane())
            .map(|l| l.code.clone());

        let current_space_id = non_empty(request.header(keys::LANE_SPACE_ID))
            .or_else(|| location.lane_space_id.clone());
        let current_lane_id =
            non_empty(request.header(keys::LANE_CODE)).or_else(|| location.lane.clone());

        let target_space_id = current_space_id.clone().or_else(|| default_space_id.clone());
        let lane_space = current_space_id
            .as_deref()
            .and_then(|id| snapshot.lane_space(id))
            .cloned();
        let target_space = target_space_id
            .as_deref()
            .and_then(|id| snapshot.lane_space(id))
            .cloned();

        LaneMetadata {
            lane_space,
            current_lane_id: current_lane_id.clone(),
            target_space_id,
            target_space,
            target_lane_id: current_lane_id,
            default_space_id,
            default_lane_id,
        }
    }
}
