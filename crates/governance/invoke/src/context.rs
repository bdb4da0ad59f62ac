//! Process-wide governance context and the per-call invocation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use governance_policy::{
    AccessMode, DegradeConfig, Place, PolicySnapshot, PolicyStore, TagCondition,
};
use tracing::{info, warn};

use crate::application::Application;
use crate::error::{Fault, FaultKind, FaultType, InvokeError, Result};
use crate::instance::Endpoint;
use crate::listener::{fan_out, RequestListener};
use crate::matcher::{HeaderMatcher, QueryMatcher, TagMatcher};
use crate::metadata::{LaneMetadata, LiveMetadata, ServiceMetadata};
use crate::parser::{
    DefaultLaneParser, DefaultLiveParser, DefaultServiceParser, LaneParser, LiveParser,
    ServiceParser,
};
use crate::request::{keys, Carrier, ServiceRequest};
use crate::route::RouteTarget;

/// Shared collaborators every invocation is built from.
pub struct GovernanceContext {
    application: Application,
    live_enabled: bool,
    lane_enabled: bool,
    store: Arc<PolicyStore>,
    matchers: HashMap<String, Arc<dyn TagMatcher>>,
    service_parser: Arc<dyn ServiceParser>,
    live_parser: Arc<dyn LiveParser>,
    lane_parser: Arc<dyn LaneParser>,
}

impl fmt::Debug for GovernanceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GovernanceContext")
            .field("application", &self.application)
            .field("live_enabled", &self.live_enabled)
            .field("lane_enabled", &self.lane_enabled)
            .field("matchers", &self.matchers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl GovernanceContext {
    pub fn builder(store: Arc<PolicyStore>) -> GovernanceContextBuilder {
        GovernanceContextBuilder::new(store)
    }

    pub fn application(&self) -> &Application {
        &self.application
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    pub fn is_live_enabled(&self) -> bool {
        self.live_enabled
    }

    pub fn is_lane_enabled(&self) -> bool {
        self.lane_enabled
    }

    pub fn matcher(&self, condition_type: &str) -> Option<&Arc<dyn TagMatcher>> {
        self.matchers.get(&condition_type.to_lowercase())
    }
}

pub struct GovernanceContextBuilder {
    application: Application,
    live_enabled: bool,
    lane_enabled: bool,
    store: Arc<PolicyStore>,
    matchers: HashMap<String, Arc<dyn TagMatcher>>,
    service_parser: Arc<dyn ServiceParser>,
    live_parser: Arc<dyn LiveParser>,
    lane_parser: Arc<dyn LaneParser>,
}

impl GovernanceContextBuilder {
    fn new(store: Arc<PolicyStore>) -> Self {
        let mut matchers: HashMap<String, Arc<dyn TagMatcher>> = HashMap::new();
        matchers.insert("header".to_string(), Arc::new(HeaderMatcher));
        matchers.insert("query".to_string(), Arc::new(QueryMatcher));
        Self {
            application: Application::default(),
            live_enabled: true,
            lane_enabled: true,
            store,
            matchers,
            service_parser: Arc::new(DefaultServiceParser),
            live_parser: Arc::new(DefaultLiveParser),
            lane_parser: Arc::new(DefaultLaneParser),
        }
    }

    pub fn application(mut self, application: Application) -> Self {
        self.application = application;
        self
    }

    pub fn live_enabled(mut self, enabled: bool) -> Self {
        self.live_enabled = enabled;
        self
    }

    pub fn lane_enabled(mut self, enabled: bool) -> Self {
        self.lane_enabled = enabled;
        self
    }

    /// Register a matcher for conditions of `condition_type`.
    pub fn matcher(mut self, condition_type: &str, matcher: Arc<dyn TagMatcher>) -> Result<Self> {
        let key = condition_type.to_lowercase();
        if self.matchers.contains_key(&key) {
            return Err(InvokeError::DuplicateMatcher(key));
        }
        self.matchers.insert(key, matcher);
        Ok(self)
    }

    pub fn service_parser(mut self, parser: Arc<dyn ServiceParser>) -> Self {
        self.service_parser = parser;
        self
    }

    pub fn live_parser(mut self, parser: Arc<dyn LiveParser>) -> Self {
        self.live_parser = parser;
        self
    }

    pub fn lane_parser(mut self, parser: Arc<dyn LaneParser>) -> Self {
        self.lane_parser = parser;
        self
    }

    pub fn build(self) -> GovernanceContext {
        GovernanceContext {
            application: self.application,
            live_enabled: self.live_enabled,
            lane_enabled: self.lane_enabled,
            store: self.store,
            matchers: self.matchers,
            service_parser: self.service_parser,
            live_parser: self.live_parser,
            lane_parser: self.lane_parser,
        }
    }
}

fn or_null(value: Option<&str>) -> &str {
    value.unwrap_or("null")
}

/// One intercepted call.
///
/// Metadata is resolved once against the snapshot current at construction;
/// the route target is narrowed by the filter chain on the calling thread.
pub struct InvocationContext<R> {
    request: R,
    context: Arc<GovernanceContext>,
    snapshot: Arc<PolicySnapshot>,
    service: ServiceMetadata,
    live: LiveMetadata,
    lane: LaneMetadata,
    target: RouteTarget,
    listeners: Vec<Arc<dyn RequestListener>>,
    fault: Option<Fault>,
    completed: bool,
}

impl<R: ServiceRequest> fmt::Debug for InvocationContext<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("service", &self.service.service_name)
            .field("snapshot", &self.snapshot.version())
            .field("candidates", &self.target.len())
            .field("fault", &self.fault)
            .finish()
    }
}

impl<R: ServiceRequest> InvocationContext<R> {
    pub fn new(request: R, context: Arc<GovernanceContext>) -> Self {
        let snapshot = context.store.current();
        let application = &context.application;

        let service = context.service_parser.parse(&request, &snapshot);
        let live = context.live_parser.parse(&request, &snapshot, application);
        let service = context.service_parser.configure(service, live.unit_rule());
        let live = context
            .live_parser
            .configure(live, service.service_policy());
        let lane = context.lane_parser.parse(&request, &snapshot, application);

        Self {
            request,
            context,
            snapshot,
            service,
            live,
            lane,
            target: RouteTarget::default(),
            listeners: Vec::new(),
            fault: None,
            completed: false,
        }
    }

    pub fn with_endpoints(mut self, endpoints: Vec<Arc<dyn Endpoint>>) -> Self {
        self.target = RouteTarget::new(endpoints);
        self
    }

    pub fn request(&self) -> &R {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut R {
        &mut self.request
    }

    pub fn into_request(self) -> R {
        self.request
    }

    pub fn context(&self) -> &GovernanceContext {
        &self.context
    }

    pub fn snapshot(&self) -> &Arc<PolicySnapshot> {
        &self.snapshot
    }

    pub fn service_metadata(&self) -> &ServiceMetadata {
        &self.service
    }

    pub fn live_metadata(&self) -> &LiveMetadata {
        &self.live
    }

    pub fn lane_metadata(&self) -> &LaneMetadata {
        &self.lane
    }

    pub fn route_target(&self) -> &RouteTarget {
        &self.target
    }

    pub fn route_target_mut(&mut self) -> &mut RouteTarget {
        &mut self.target
    }

    /// The fault signaled on this invocation, if any.
    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    /// Whether `place` may serve this request given its access mode.
    pub fn is_accessible<P: Place + ?Sized>(&self, place: Option<&P>) -> bool {
        match place.map(|p| p.access_mode()) {
            Some(AccessMode::ReadWrite) => true,
            Some(AccessMode::Read) => !self.service.is_write(),
            Some(AccessMode::None) | None => false,
        }
    }

    /// Evaluate a routing predicate; an absent condition always matches.
    pub fn matches(&self, condition: Option<&TagCondition>) -> bool {
        let Some(condition) = condition else {
            return true;
        };
        self.context
            .matcher(&condition.condition_type)
            .is_some_and(|m| m.matches(condition, &self.request))
    }

    /// Diagnostic message at the application's own location.
    pub fn error(&self, message: &str) -> String {
        let location = &self.context.application.location;
        self.error_at(message, location.unit.as_deref(), location.cell.as_deref())
    }

    pub fn error_at_unit(&self, message: &str, unit: Option<&str>) -> String {
        self.error_at(message, unit, None)
    }

    pub fn error_at(&self, message: &str, unit: Option<&str>, cell: Option<&str>) -> String {
        format!(
            "{}. liveSpaceId={}, ruleId={}, unit={}, cell={}, application={}, service={}, group={}, path={}, variable={}",
            message.trim_end_matches('.'),
            or_null(self.live.live_space_id()),
            or_null(self.live.unit_rule_id.as_deref()),
            or_null(unit),
            or_null(cell),
            self.context.application.name,
            self.service.service_name,
            or_null(self.service.service_group.as_deref()),
            or_null(self.service.path.as_deref()),
            or_null(self.live.variable()),
        )
    }

    pub fn reject(&mut self, fault_type: FaultType, reason: impl Into<String>) -> Fault {
        let fault = Fault::new(FaultKind::Reject, fault_type, reason);
        warn!(service = %self.service.service_name, fault_type = %fault_type, reason = %fault.reason, "Request rejected");
        self.request.reject(&fault);
        self.record(fault)
    }

    pub fn failover(&mut self, fault_type: FaultType, reason: impl Into<String>) -> Fault {
        let fault = Fault::new(FaultKind::Failover, fault_type, reason);
        info!(service = %self.service.service_name, fault_type = %fault_type, reason = %fault.reason, "Request failed over");
        self.request.failover(&fault);
        self.record(fault)
    }

    pub fn degrade(
        &mut self,
        fault_type: FaultType,
        reason: impl Into<String>,
        config: &DegradeConfig,
    ) -> Fault {
        let fault = Fault::new(FaultKind::Degrade, fault_type, reason);
        info!(service = %self.service.service_name, fault_type = %fault_type, reason = %fault.reason, "Request degraded");
        self.request.degrade(&fault, config);
        self.record(fault)
    }

    fn record(&mut self, fault: Fault) -> Fault {
        self.fault = Some(fault.clone());
        fault
    }

    pub fn add_listener(&mut self, listener: Arc<dyn RequestListener>) {
        self.listeners.push(listener);
    }

    /// Notify listeners of success. Only the first terminal outcome is
    /// delivered.
    pub fn on_success(&mut self, duration: Duration) {
        if std::mem::replace(&mut self.completed, true) {
            return;
        }
        let request = &self.request;
        fan_out(&self.listeners, &self.service.service_name, |l| {
            l.on_success(request, duration)
        });
    }

    pub fn on_failure(&mut self, duration: Duration, cause: &str) {
        if std::mem::replace(&mut self.completed, true) {
            return;
        }
        let request = &self.request;
        fan_out(&self.listeners, &self.service.service_name, |l| {
            l.on_failure(request, duration, cause)
        });
    }

    /// Write the live and lane metadata onto an outbound carrier.
    pub fn inject(&self, carrier: &mut dyn Carrier) {
        let location = &self.context.application.location;
        let entries = [
            (keys::LIVE_SPACE_ID, self.live.live_space_id()),
            (keys::LIVE_RULE_ID, self.live.unit_rule_id.as_deref()),
            (keys::LIVE_VARIABLE, self.live.variable()),
            (keys::LIVE_UNIT, location.unit.as_deref()),
            (keys::LIVE_CELL, location.cell.as_deref()),
            (keys::LANE_SPACE_ID, self.lane.lane_space.as_deref().map(|s| s.id.as_str())),
            (keys::LANE_CODE, self.lane.current_lane_id.as_deref()),
        ];
        for (key, value) in entries {
            if let Some(value) = value {
                carrier.set(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::SimpleRequest;
    use crate::testing::*;
    use governance_policy::{OpType, Service};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context() -> Arc<GovernanceContext> {
        context_with(vec![Service::new("svc")], AccessMode::ReadWrite, location("east", "e1"))
    }

    #[test]
    fn accessibility_follows_access_mode_and_intent() {
        let context = context();
        let read = invocation(&context, SimpleRequest::new("svc"), Vec::new());
        let write = invocation(&context, SimpleRequest::new("svc").with_write(true), Vec::new());
        let rw = unit("a", AccessMode::ReadWrite, &[]);
        let ro = unit("b", AccessMode::Read, &[]);
        let closed = unit("c", AccessMode::None, &[]);

        assert!(read.is_accessible(Some(&rw)));
        assert!(write.is_accessible(Some(&rw)));
        assert!(read.is_accessible(Some(&ro)));
        assert!(!write.is_accessible(Some(&ro)));
        assert!(!read.is_accessible(Some(&closed)));
        assert!(!read.is_accessible::<governance_policy::Unit>(None));
    }

    #[test]
    fn conditions_dispatch_by_lowercased_type() {
        let context = context();
        let inv = invocation(
            &context,
            SimpleRequest::new("svc").with_header("x-tier", "gold"),
            Vec::new(),
        );
        let header = TagCondition::new("HEADER", "x-tier", OpType::Equal, vec!["gold".into()]);
        let unknown = TagCondition::new("cookie", "x-tier", OpType::Equal, vec!["gold".into()]);

        assert!(inv.matches(None));
        assert!(inv.matches(Some(&header)));
        assert!(!inv.matches(Some(&unknown)));
    }

    #[test]
    fn custom_matcher_registration_rejects_duplicates() {
        let store = Arc::new(PolicyStore::default());
        let result = GovernanceContext::builder(store).matcher("Header", Arc::new(HeaderMatcher));
        assert!(matches!(result, Err(InvokeError::DuplicateMatcher(name)) if name == "header"));
    }

    #[test]
    fn error_message_carries_diagnostics() {
        let context = context();
        let inv = invocation(
            &context,
            SimpleRequest::new("svc").with_path("/orders"),
            Vec::new(),
        );
        assert_eq!(
            inv.error("reject when local unit is not found."),
            "reject when local unit is not found. liveSpaceId=live, ruleId=null, unit=east, \
             cell=e1, application=app, service=svc, group=null, path=/orders, variable=null"
        );
        assert!(inv
            .error_at("x", Some("west"), Some("w1"))
            .contains("unit=west, cell=w1"));
    }

    struct Counting(Arc<AtomicUsize>);

    impl RequestListener for Counting {
        fn on_success(&self, _request: &dyn ServiceRequest, _duration: Duration) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn on_failure(&self, _request: &dyn ServiceRequest, _duration: Duration, _cause: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicking;

    impl RequestListener for Panicking {
        fn on_success(&self, _request: &dyn ServiceRequest, _duration: Duration) {
            panic!("listener failure");
        }
    }

    #[test]
    fn listeners_are_isolated_and_notified_once() {
        let context = context();
        let mut inv = invocation(&context, SimpleRequest::new("svc"), Vec::new());
        let counter = Arc::new(AtomicUsize::new(0));
        inv.add_listener(Arc::new(Panicking));
        inv.add_listener(Arc::new(Counting(Arc::clone(&counter))));

        inv.on_success(Duration::from_millis(3));
        inv.on_failure(Duration::from_millis(3), "late");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn inject_writes_propagation_headers() {
        let context = context();
        let request = SimpleRequest::new("svc")
            .with_header(keys::LIVE_VARIABLE, "42")
            .with_header(keys::LANE_SPACE_ID, "lanes")
            .with_header(keys::LANE_CODE, "beta");
        let inv = invocation(&context, request, Vec::new());

        let mut outbound = SimpleRequest::new("downstream");
        inv.inject(&mut outbound);
        assert_eq!(outbound.get(keys::LIVE_SPACE_ID), Some("live"));
        assert_eq!(outbound.get(keys::LIVE_VARIABLE), Some("42"));
        assert_eq!(outbound.get(keys::LIVE_UNIT), Some("east"));
        assert_eq!(outbound.get(keys::LANE_SPACE_ID), Some("lanes"));
        assert_eq!(outbound.get(keys::LANE_CODE), Some("beta"));
        assert_eq!(outbound.get(keys::LIVE_RULE_ID), None);
    }

    #[test]
    fn metadata_is_resolved_against_construction_snapshot() {
        let context = context();
        let inv = invocation(&context, SimpleRequest::new("svc"), Vec::new());
        context
            .store()
            .delete_service("svc", &governance_policy::ReplaceMerger, "test");

        assert!(inv.service_metadata().service.is_some());
        assert!(context.store().current().service("svc").is_none());
        assert_eq!(inv.lane_metadata().default_lane_id.as_deref(), Some("base"));
    }
}
