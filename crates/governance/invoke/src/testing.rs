//! Fixtures shared by the unit tests.

use std::sync::Arc;

use governance_policy::{
    AccessMode, Cell, Lane, LaneSpace, LiveSpace, LiveSpec, PolicySnapshot, PolicyStore, Service,
    Unit, UnitRange, UnitRoute, UnitRule, VariableMissingAction,
};

use crate::application::{Application, Location};
use crate::context::{GovernanceContext, InvocationContext};
use crate::instance::{Endpoint, Instance};
use crate::request::SimpleRequest;

pub fn unit(code: &str, access_mode: AccessMode, cells: &[(&str, AccessMode)]) -> Unit {
    Unit {
        code: code.into(),
        name: None,
        access_mode,
        cells: cells
            .iter()
            .map(|(c, mode)| Cell {
                code: (*c).into(),
                name: None,
                access_mode: *mode,
            })
            .collect(),
    }
}

/// Live space with units `center` (slots 0..=4) and `east` (slots 5..=9).
pub fn live_space(east_mode: AccessMode) -> LiveSpace {
    LiveSpace {
        id: "live".into(),
        name: None,
        spec: LiveSpec {
            units: vec![
                unit("center", AccessMode::ReadWrite, &[("c1", AccessMode::ReadWrite)]),
                unit(
                    "east",
                    east_mode,
                    &[("e1", AccessMode::ReadWrite), ("e2", AccessMode::None)],
                ),
            ],
            unit_rules: vec![UnitRule {
                id: "rule".into(),
                name: None,
                modulo: 10,
                variable_missing_action: VariableMissingAction::Center,
                routes: vec![
                    UnitRoute {
                        unit: "center".into(),
                        allows: vec![],
                        ranges: vec![UnitRange { from: 0, to: 4 }],
                    },
                    UnitRoute {
                        unit: "east".into(),
                        allows: vec![],
                        ranges: vec![UnitRange { from: 5, to: 9 }],
                    },
                ],
            }],
            domains: vec![],
            center_unit: Some("center".into()),
        },
    }
}

/// Default lane space `lanes` with lanes `base` (default), `beta` and `gamma`.
pub fn lane_space() -> LaneSpace {
    let lane = |code: &str, default_lane: bool| Lane {
        code: code.into(),
        name: None,
        default_lane,
    };
    LaneSpace {
        id: "lanes".into(),
        default_space: true,
        lanes: vec![lane("base", true), lane("beta", false), lane("gamma", false)],
        domains: vec![],
    }
}

pub fn location(unit: &str, cell: &str) -> Location {
    Location {
        unit: Some(unit.into()),
        cell: Some(cell.into()),
        live_space_id: Some("live".into()),
        ..Location::default()
    }
}

pub fn context_with(services: Vec<Service>, east_mode: AccessMode, location: Location) -> Arc<GovernanceContext> {
    let snapshot = PolicySnapshot::builder()
        .live_spaces(vec![live_space(east_mode)])
        .lane_spaces(vec![lane_space()])
        .services(services)
        .build()
        .unwrap();
    let store = Arc::new(PolicyStore::new(snapshot));
    Arc::new(
        GovernanceContext::builder(store)
            .application(Application::new("app").with_location(location))
            .build(),
    )
}

pub fn endpoint(id: &str, unit: &str, cell: &str, lane: Option<&str>) -> Arc<dyn Endpoint> {
    let mut instance = Instance::new(id, format!("{id}:8080")).with_live("live", unit, cell);
    if let Some(lane) = lane {
        instance = instance.with_lane("lanes", lane);
    }
    Arc::new(instance)
}

pub fn invocation(
    context: &Arc<GovernanceContext>,
    request: SimpleRequest,
    endpoints: Vec<Arc<dyn Endpoint>>,
) -> InvocationContext<SimpleRequest> {
    InvocationContext::new(request, Arc::clone(context)).with_endpoints(endpoints)
}

pub fn ids(invocation: &InvocationContext<SimpleRequest>) -> Vec<String> {
    invocation
        .route_target()
        .endpoints()
        .iter()
        .map(|e| e.id().to_string())
        .collect()
}

/// Service routed by the `rule` unit rule.
pub fn unit_service(name: &str) -> Service {
    use governance_policy::{ServiceLivePolicy, ServicePolicy, UnitPolicy};

    Service::new(name).with_policy(ServicePolicy {
        live_policy: Some(ServiceLivePolicy {
            unit_policy: UnitPolicy::Unit,
            write_protect: false,
            unit_rule_id: Some("rule".into()),
        }),
        ..ServicePolicy::default()
    })
}
