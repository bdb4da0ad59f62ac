use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use governance_engine::{EngineError, GovernanceConfig, GovernanceEngine};
use governance_invoke::{
    keys, Endpoint, FaultKind, FaultType, Instance, RequestListener, ServiceRequest, SimpleRequest,
};
use governance_policy::{PolicySnapshot, ReplaceMerger, Service};

const POLICY: &str = r#"{
    "liveSpaces": [{
        "id": "live",
        "spec": {
            "units": [
                {"code": "center", "cells": [{"code": "c1"}]},
                {"code": "east", "cells": [{"code": "e1"}, {"code": "e2"}]}
            ],
            "unitRules": [{
                "id": "rule",
                "modulo": 10,
                "routes": [
                    {"unit": "center", "ranges": [{"from": 0, "to": 4}]},
                    {"unit": "east", "ranges": [{"from": 5, "to": 9}]}
                ]
            }],
            "centerUnit": "center"
        }
    }],
    "laneSpaces": [{
        "id": "lanes",
        "defaultSpace": true,
        "lanes": [{"code": "base", "defaultLane": true}, {"code": "beta"}]
    }],
    "services": [
        {
            "name": "orders",
            "policy": {"livePolicy": {"unitPolicy": "UNIT", "unitRuleId": "rule"}}
        },
        {
            "name": "payments",
            "policy": {
                "circuitBreakPolicies": [{
                    "name": "errors",
                    "slidingWindowSize": 10,
                    "minimumNumberOfCalls": 3,
                    "waitDurationInOpenStateMs": 50,
                    "permittedCallsInHalfOpenState": 1
                }]
            }
        },
        {
            "name": "catalog",
            "policy": {
                "rateLimitPolicies": [{
                    "name": "gold",
                    "slidingWindows": [{"threshold": 2, "timeWindowInMs": 1000}],
                    "conditions": [{"type": "header", "key": "x-tier", "values": ["gold"]}]
                }]
            }
        },
        {
            "name": "reports",
            "policy": {
                "rateLimitPolicies": [{
                    "name": "paced",
                    "slidingWindows": [{"threshold": 20, "timeWindowInMs": 1000}],
                    "maxBurstSeconds": 0.0,
                    "maxWaitMs": 200
                }]
            }
        },
        {
            "name": "search",
            "policy": {"lanePolicies": [{"laneSpaceId": "lanes", "fallbackType": "DEFAULT"}]}
        }
    ]
}"#;

fn config() -> GovernanceConfig {
    let mut config = GovernanceConfig::default();
    config.application.name = "shop".into();
    config.application.location.unit = Some("east".into());
    config.application.location.cell = Some("e1".into());
    config.application.location.live_space_id = Some("live".into());
    config
}

fn engine() -> GovernanceEngine {
    GovernanceEngine::new(config(), PolicySnapshot::from_json(POLICY).unwrap()).unwrap()
}

fn endpoint(id: &str, unit: &str, cell: &str, lane: &str) -> Arc<dyn Endpoint> {
    Arc::new(
        Instance::new(id, format!("{id}:8080"))
            .with_live("live", unit, cell)
            .with_lane("lanes", lane),
    )
}

fn fleet() -> Vec<Arc<dyn Endpoint>> {
    vec![
        endpoint("c-1", "center", "c1", "base"),
        endpoint("e-1", "east", "e1", "base"),
        endpoint("e-2", "east", "e2", "base"),
    ]
}

#[test]
fn routes_by_unit_rule_and_prefers_local_cell() {
    let engine = engine();
    let request = SimpleRequest::new("orders").with_header(keys::LIVE_VARIABLE, "7");
    let mut invocation = engine.invocation(request, fleet());

    let candidate = engine.route(&mut invocation).unwrap();
    assert_eq!(candidate.endpoint.id(), "e-1");
    assert_eq!(invocation.route_target().unit(), Some("east"));
    assert!(invocation.fault().is_none());
}

#[test]
fn variable_owned_by_another_unit_routes_there() {
    let engine = engine();
    let request = SimpleRequest::new("orders").with_header(keys::LIVE_VARIABLE, "2");
    let mut invocation = engine.invocation(request, fleet());

    let candidate = engine.route(&mut invocation).unwrap();
    assert_eq!(candidate.endpoint.id(), "c-1");
}

#[test]
fn no_candidate_in_target_unit_rejects() {
    let engine = engine();
    let request = SimpleRequest::new("orders").with_header(keys::LIVE_VARIABLE, "2");
    let mut invocation = engine.invocation(request, vec![endpoint("e-1", "east", "e1", "base")]);

    let fault = engine.route(&mut invocation).unwrap_err();
    assert_eq!(fault.kind, FaultKind::Reject);
    assert_eq!(fault.fault_type, FaultType::Unready);
    assert!(fault
        .reason
        .starts_with("reject when instance is not found. liveSpaceId=live, ruleId=rule"));
    assert!(fault.reason.ends_with("service=orders, group=null, path=null, variable=2"));
    assert_eq!(invocation.request().fault_kind(), Some(FaultKind::Reject));
}

#[test]
fn lane_request_falls_back_to_default_lane() {
    let engine = engine();
    let request = SimpleRequest::new("search").with_header(keys::LANE_CODE, "beta");

    let mut with_beta = engine.invocation(
        request.clone(),
        vec![
            endpoint("base-1", "east", "e1", "base"),
            endpoint("beta-1", "east", "e1", "beta"),
        ],
    );
    assert_eq!(engine.route(&mut with_beta).unwrap().endpoint.id(), "beta-1");

    let mut without_beta =
        engine.invocation(request, vec![endpoint("base-1", "east", "e1", "base")]);
    assert_eq!(engine.route(&mut without_beta).unwrap().endpoint.id(), "base-1");
}

#[test]
fn breaker_opens_after_errors_and_recovers_with_a_trial() {
    let engine = engine();
    let call = || {
        let mut invocation = engine.invocation(SimpleRequest::new("payments"), fleet());
        engine.route(&mut invocation).unwrap();
        let admission = engine.admit(&mut invocation);
        (invocation, admission)
    };

    for _ in 0..3 {
        let (mut invocation, admission) = call();
        let admission = admission.unwrap();
        assert_eq!(
            admission.breaker_uris().collect::<Vec<_>>(),
            vec!["breaker://payments/errors"]
        );
        admission.complete_error(&mut invocation, Duration::from_millis(5), "timeout");
    }

    let (invocation, admission) = call();
    let fault = admission.unwrap_err();
    assert_eq!(fault.kind, FaultKind::Reject);
    assert_eq!(fault.fault_type, FaultType::CircuitBreak);
    assert!(fault.reason.starts_with("reject when circuit breaker is open."));
    assert_eq!(invocation.fault(), Some(&fault));

    std::thread::sleep(Duration::from_millis(80));
    let (mut invocation, admission) = call();
    let trial = admission.unwrap();
    // Only one trial at a time.
    assert!(call().1.is_err());
    trial.complete_success(&mut invocation, Duration::from_millis(5));

    let (_, admission) = call();
    assert!(admission.is_ok());
}

#[test]
fn admission_from_before_the_breaker_opened_does_not_widen_trials() {
    let engine = engine();
    let call = || {
        let mut invocation = engine.invocation(SimpleRequest::new("payments"), fleet());
        engine.route(&mut invocation).unwrap();
        let admission = engine.admit(&mut invocation);
        (invocation, admission)
    };

    let (_held, stale) = call();
    let stale = stale.unwrap();
    for _ in 0..3 {
        let (mut invocation, admission) = call();
        admission
            .unwrap()
            .complete_error(&mut invocation, Duration::from_millis(5), "timeout");
    }

    std::thread::sleep(Duration::from_millis(80));
    let (_trial_invocation, trial) = call();
    let _trial = trial.unwrap();
    drop(stale);
    assert!(call().1.is_err());
}

#[test]
fn rate_limit_applies_to_matching_requests_only() {
    let engine = engine();
    let admit = |tier: Option<&str>| {
        let mut request = SimpleRequest::new("catalog");
        if let Some(tier) = tier {
            request = request.with_header("x-tier", tier);
        }
        let mut invocation = engine.invocation(request, fleet());
        engine.route(&mut invocation).unwrap();
        engine.admit(&mut invocation).map(|_| ())
    };

    assert!(admit(Some("gold")).is_ok());
    assert!(admit(Some("gold")).is_ok());
    let fault = admit(Some("gold")).unwrap_err();
    assert_eq!(fault.fault_type, FaultType::Limit);
    assert!(fault.reason.starts_with("reject when rate limit is exceeded."));
    assert!(fault.is_transient());

    assert!(admit(Some("silver")).is_ok());
    assert!(admit(None).is_ok());
    assert_eq!(engine.limiters().len(), 1);
}

#[test]
fn disabled_features_are_skipped() {
    let mut config = config();
    config.circuit_breaker.enabled = false;
    config.rate_limit.enabled = false;
    let engine =
        GovernanceEngine::new(config, PolicySnapshot::from_json(POLICY).unwrap()).unwrap();

    for _ in 0..5 {
        let mut invocation = engine.invocation(
            SimpleRequest::new("catalog").with_header("x-tier", "gold"),
            fleet(),
        );
        engine.route(&mut invocation).unwrap();
        let admission = engine.admit(&mut invocation).unwrap();
        admission.complete_error(&mut invocation, Duration::ZERO, "boom");
    }
    assert!(engine.breakers().is_empty());
    assert!(engine.limiters().is_empty());
}

#[test]
fn inbound_request_for_another_unit_fails_over() {
    let engine = engine();

    let mut local = engine.invocation(
        SimpleRequest::new("orders").with_header(keys::LIVE_VARIABLE, "8"),
        Vec::new(),
    );
    assert!(engine.inbound(&mut local).is_ok());

    let mut foreign = engine.invocation(
        SimpleRequest::new("orders").with_header(keys::LIVE_VARIABLE, "3"),
        Vec::new(),
    );
    let fault = engine.inbound(&mut foreign).unwrap_err();
    assert_eq!(fault.kind, FaultKind::Failover);
    assert!(fault
        .reason
        .starts_with("failover unit when variable is not belong to this unit. liveSpaceId=live"));
    assert!(fault.reason.contains("unit=center"));
}

#[derive(Default)]
struct Counting {
    successes: AtomicUsize,
    failures: AtomicUsize,
}

impl RequestListener for Counting {
    fn on_success(&self, _request: &dyn ServiceRequest, _duration: Duration) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_failure(&self, _request: &dyn ServiceRequest, _duration: Duration, _cause: &str) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn listeners_see_outcomes_and_metadata_propagates() {
    let engine = engine();
    let listener = Arc::new(Counting::default());
    engine.add_listener(listener.clone());

    let request = SimpleRequest::new("orders").with_header(keys::LIVE_VARIABLE, "7");
    let mut invocation = engine.invocation(request, fleet());
    engine.route(&mut invocation).unwrap();
    let admission = engine.admit(&mut invocation).unwrap();
    admission.complete_success(&mut invocation, Duration::from_millis(3));
    invocation.on_failure(Duration::ZERO, "late");

    assert_eq!(listener.successes.load(Ordering::SeqCst), 1);
    assert_eq!(listener.failures.load(Ordering::SeqCst), 0);

    let mut outbound = SimpleRequest::new("downstream");
    invocation.inject(&mut outbound);
    assert_eq!(outbound.header(keys::LIVE_VARIABLE), Some("7"));
    assert_eq!(outbound.header(keys::LIVE_UNIT), Some("east"));
    assert_eq!(outbound.header(keys::LIVE_SPACE_ID), Some("live"));
}

#[test]
fn deleting_a_service_drops_its_breakers() {
    let engine = engine();
    let mut invocation = engine.invocation(SimpleRequest::new("payments"), fleet());
    engine.route(&mut invocation).unwrap();
    engine
        .admit(&mut invocation)
        .unwrap()
        .complete_success(&mut invocation, Duration::ZERO);
    assert_eq!(engine.breakers().len(), 1);

    let before = engine.snapshot();
    let after = engine.delete_service("payments", &ReplaceMerger, "test");
    assert!(after.version() > before.version());
    assert!(after.service("payments").is_none());
    assert!(before.service("payments").is_some());
    assert!(engine.breakers().is_empty());
}

#[test]
fn update_keeps_order_and_appends_new_services() {
    let engine = engine();
    let updates = vec![Service::new("orders"), Service::new("inventory")];
    let deletes = HashSet::from(["catalog".to_string()]);

    let snapshot = engine.update_services(updates, &deletes, &ReplaceMerger, "control-plane");
    let names: Vec<&str> = snapshot.services().iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["orders", "payments", "reports", "search", "inventory"]);
    assert_eq!(
        snapshot.service("inventory").map(|s| s.owners.clone()),
        Some(vec!["control-plane".to_string()])
    );
}

#[test]
fn unknown_default_load_balancer_is_a_config_error() {
    let mut config = config();
    config.load_balance.default_type = "fastest".into();
    let err = GovernanceEngine::new(config, PolicySnapshot::empty()).unwrap_err();
    assert!(matches!(err, EngineError::Invoke(_)));
}

#[test]
fn duplicate_live_space_update_keeps_current_policy() {
    let engine = engine();
    let before = engine.snapshot();
    let space = (*before.live_spaces()[0]).clone();

    let err = engine
        .update_live_spaces(vec![space.clone(), space])
        .unwrap_err();
    assert!(matches!(err, EngineError::Policy(_)));
    assert_eq!(engine.snapshot().version(), before.version());
    assert!(engine.snapshot().live_space("live").is_some());
}

#[tokio::test]
async fn async_admission_waits_for_pacing() {
    let engine = engine();
    let mut first = engine.invocation(SimpleRequest::new("reports"), fleet());
    engine.route(&mut first).unwrap();
    assert!(engine.admit_async(&mut first).await.is_ok());

    let start = Instant::now();
    let mut second = engine.invocation(SimpleRequest::new("reports"), fleet());
    engine.route(&mut second).unwrap();
    assert!(engine.admit_async(&mut second).await.is_ok());
    assert!(start.elapsed() >= Duration::from_millis(30));
}

#[tokio::test]
async fn recycler_follows_direct_store_updates() {
    let engine = Arc::new(engine());
    let recycler = engine.spawn_recycler();

    let mut invocation = engine.invocation(SimpleRequest::new("payments"), fleet());
    engine.route(&mut invocation).unwrap();
    drop(engine.admit(&mut invocation).unwrap());
    assert_eq!(engine.breakers().len(), 1);

    engine
        .store()
        .delete_service("payments", &ReplaceMerger, "test");

    let deadline = Instant::now() + Duration::from_secs(2);
    while !engine.breakers().is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(engine.breakers().is_empty());
    recycler.abort();
}
