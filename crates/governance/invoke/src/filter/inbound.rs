use governance_policy::{UnitPolicy, VariableMissingAction};

use crate::chain::{InboundFilter, InboundFilterChain};
use crate::context::InvocationContext;
use crate::error::{reason, Fault, FaultKind, FaultType};
use crate::request::ServiceRequest;

fn live_active<R: ServiceRequest>(invocation: &InvocationContext<R>) -> bool {
    invocation.context().is_live_enabled() && invocation.live_metadata().live_space.is_some()
}

fn signal<R: ServiceRequest>(
    invocation: &mut InvocationContext<R>,
    kind: FaultKind,
    fault_type: FaultType,
    message: String,
) -> Fault {
    match kind {
        FaultKind::Failover => invocation.failover(fault_type, message),
        _ => invocation.reject(fault_type, message),
    }
}

/// Checks that an inbound request belongs to the local unit.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnitInboundFilter;

fn check_unit<R: ServiceRequest>(invocation: &InvocationContext<R>) -> Option<(FaultKind, String)> {
    let live = invocation.live_metadata();
    let Some(local) = live.current_unit() else {
        return Some((FaultKind::Reject, invocation.error(reason::REJECT_NO_UNIT)));
    };
    if !invocation.is_accessible(Some(local)) {
        return Some((
            FaultKind::Failover,
            invocation.error(reason::FAILOVER_UNIT_NOT_ACCESSIBLE),
        ));
    }
    let is_center = live.center_unit().is_some_and(|c| c.code == local.code);

    match invocation.service_metadata().unit_policy() {
        UnitPolicy::Center if !is_center => Some((
            FaultKind::Reject,
            invocation.error(reason::REJECT_UNIT_NOT_CENTER),
        )),
        UnitPolicy::Unit => {
            let rule = live.unit_rule()?;
            if live.variable().is_none() {
                return match rule.variable_missing_action {
                    VariableMissingAction::Center if is_center => None,
                    VariableMissingAction::Center => Some((
                        FaultKind::Failover,
                        invocation.error(reason::FAILOVER_CENTER_NO_VARIABLE),
                    )),
                    VariableMissingAction::Reject => Some((
                        FaultKind::Reject,
                        invocation.error(reason::REJECT_NO_VARIABLE),
                    )),
                };
            }
            match live.target_unit() {
                Some(target) if target.code == local.code => None,
                Some(target) => Some((
                    FaultKind::Failover,
                    invocation.error_at_unit(reason::FAILOVER_ESCAPE, Some(&target.code)),
                )),
                None => Some((
                    FaultKind::Reject,
                    invocation.error(reason::REJECT_NO_UNIT_ROUTE),
                )),
            }
        }
        _ => None,
    }
}

impl<R: ServiceRequest> InboundFilter<R> for UnitInboundFilter {
    fn name(&self) -> &str {
        "unit-inbound"
    }

    fn filter(
        &self,
        invocation: &mut InvocationContext<R>,
        chain: InboundFilterChain<'_, R>,
    ) -> Result<(), Fault> {
        if live_active(invocation) {
            if let Some((kind, message)) = check_unit(invocation) {
                return Err(signal(invocation, kind, FaultType::Unit, message));
            }
        }
        chain.filter(invocation)
    }
}

/// Fails over when the local cell may not serve the request.
#[derive(Debug, Default, Clone, Copy)]
pub struct CellInboundFilter;

impl<R: ServiceRequest> InboundFilter<R> for CellInboundFilter {
    fn name(&self) -> &str {
        "cell-inbound"
    }

    fn filter(
        &self,
        invocation: &mut InvocationContext<R>,
        chain: InboundFilterChain<'_, R>,
    ) -> Result<(), Fault> {
        if live_active(invocation) {
            let cell = invocation.live_metadata().current_cell();
            if cell.is_some() && !invocation.is_accessible(cell) {
                let message = invocation.error(reason::FAILOVER_CELL_NOT_ACCESSIBLE);
                return Err(invocation.failover(FaultType::Cell, message));
            }
        }
        chain.filter(invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{keys, SimpleRequest};
    use crate::testing::*;
    use governance_policy::AccessMode;

    fn admit(cell: &str, variable: Option<&str>) -> (Result<(), Fault>, InvocationContext<SimpleRequest>) {
        let context = context_with(vec![unit_service("svc")], AccessMode::ReadWrite, location("east", cell));
        let mut request = SimpleRequest::new("svc");
        if let Some(variable) = variable {
            request = request.with_header(keys::LIVE_VARIABLE, variable);
        }
        let mut inv = invocation(&context, request, Vec::new());
        let filters: [&dyn InboundFilter<SimpleRequest>; 2] = [&UnitInboundFilter, &CellInboundFilter];
        let result = InboundFilterChain::new(&filters).filter(&mut inv);
        (result, inv)
    }

    #[test]
    fn local_variable_is_admitted() {
        let (result, _) = admit("e1", Some("7"));
        assert!(result.is_ok());
    }

    #[test]
    fn escaped_variable_fails_over() {
        let (result, inv) = admit("e1", Some("2"));
        let fault = result.unwrap_err();
        assert_eq!(fault.kind, FaultKind::Failover);
        assert!(fault.reason.starts_with(reason::FAILOVER_ESCAPE.trim_end_matches('.')));
        assert!(fault.reason.contains("unit=center"));
        assert_eq!(inv.request().fault_kind(), Some(FaultKind::Failover));
    }

    #[test]
    fn missing_variable_outside_center_fails_over() {
        let (result, _) = admit("e1", None);
        assert!(result.unwrap_err().reason.starts_with("failover center unit"));
    }

    #[test]
    fn closed_cell_fails_over() {
        let (result, _) = admit("e2", Some("7"));
        let fault = result.unwrap_err();
        assert_eq!(fault.fault_type, FaultType::Cell);
        assert_eq!(fault.kind, FaultKind::Failover);
    }
}
