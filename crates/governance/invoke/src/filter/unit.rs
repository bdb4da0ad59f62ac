use governance_policy::{Unit, UnitPolicy, VariableMissingAction};

use crate::chain::{RouteFilter, RouteFilterChain};
use crate::context::InvocationContext;
use crate::error::{reason, Fault, FaultType};
use crate::request::ServiceRequest;

/// Live routing: narrows candidates to the unit the request belongs to and
/// prefers the local cell within it.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnitFilter;

enum UnitDecision {
    /// The service is not unit routed.
    Any,
    Route(String),
    Reject(String),
}

fn accessible<R: ServiceRequest>(
    invocation: &InvocationContext<R>,
    unit: &Unit,
) -> UnitDecision {
    if invocation.is_accessible(Some(unit)) {
        UnitDecision::Route(unit.code.clone())
    } else {
        UnitDecision::Reject(
            invocation.error_at_unit(reason::REJECT_UNIT_NOT_ACCESSIBLE, Some(&unit.code)),
        )
    }
}

fn center<R: ServiceRequest>(invocation: &InvocationContext<R>) -> UnitDecision {
    match invocation.live_metadata().center_unit() {
        Some(unit) => accessible(invocation, unit),
        None => UnitDecision::Reject(invocation.error(reason::REJECT_NO_CENTER)),
    }
}

fn prefer_local<R: ServiceRequest>(invocation: &InvocationContext<R>) -> UnitDecision {
    let live = invocation.live_metadata();
    match live.current_unit() {
        Some(unit) if invocation.is_accessible(Some(unit)) => UnitDecision::Route(unit.code.clone()),
        Some(_) => center(invocation),
        None => UnitDecision::Reject(invocation.error(reason::REJECT_NO_UNIT)),
    }
}

fn decide<R: ServiceRequest>(invocation: &InvocationContext<R>) -> UnitDecision {
    let live = invocation.live_metadata();
    match invocation.service_metadata().unit_policy() {
        UnitPolicy::None => UnitDecision::Any,
        UnitPolicy::Center => center(invocation),
        UnitPolicy::PreferLocal => prefer_local(invocation),
        UnitPolicy::Unit => {
            let Some(rule) = live.unit_rule() else {
                return prefer_local(invocation);
            };
            if live.variable().is_none() {
                return match rule.variable_missing_action {
                    VariableMissingAction::Center => center(invocation),
                    VariableMissingAction::Reject => {
                        UnitDecision::Reject(invocation.error(reason::REJECT_NO_VARIABLE))
                    }
                };
            }
            match live.target_unit() {
                Some(unit) => accessible(invocation, unit),
                None => UnitDecision::Reject(invocation.error(reason::REJECT_NO_UNIT_ROUTE)),
            }
        }
    }
}

impl<R: ServiceRequest> RouteFilter<R> for UnitFilter {
    fn name(&self) -> &str {
        "unit"
    }

    fn filter(
        &self,
        invocation: &mut InvocationContext<R>,
        chain: RouteFilterChain<'_, R>,
    ) -> Result<(), Fault> {
        if !invocation.context().is_live_enabled() || invocation.live_metadata().live_space.is_none()
        {
            return chain.filter(invocation);
        }

        let unit = match decide(invocation) {
            UnitDecision::Any => return chain.filter(invocation),
            UnitDecision::Reject(message) => return Err(invocation.reject(FaultType::Unit, message)),
            UnitDecision::Route(unit) => unit,
        };

        let live = invocation.live_metadata();
        let local_cell = live
            .current_unit()
            .filter(|u| u.code == unit)
            .and_then(|_| live.current_cell())
            .filter(|cell| invocation.is_accessible(Some(*cell)))
            .map(|cell| cell.code.clone());

        let target = invocation.route_target_mut();
        target.filter(|e| e.is_unit(&unit), None, true);
        if let Some(cell) = local_cell {
            if target.filter(|e| e.is_cell(&cell), None, false) > 0 {
                target.set_cell(Some(cell));
            }
        }
        target.set_unit(Some(unit));
        chain.filter(invocation)
    }
}
