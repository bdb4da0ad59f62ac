use governance_policy::TagCondition;

use crate::request::ServiceRequest;

/// Evaluates a [`TagCondition`] against one kind of request attribute.
pub trait TagMatcher: Send + Sync {
    fn matches(&self, condition: &TagCondition, request: &dyn ServiceRequest) -> bool;
}

fn test(condition: &TagCondition, value: Option<&str>) -> bool {
    match value {
        Some(v) => condition.test(&[v]),
        None => condition.test(&[]),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderMatcher;

impl TagMatcher for HeaderMatcher {
    fn matches(&self, condition: &TagCondition, request: &dyn ServiceRequest) -> bool {
        test(condition, request.header(&condition.key))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct QueryMatcher;

impl TagMatcher for QueryMatcher {
    fn matches(&self, condition: &TagCondition, request: &dyn ServiceRequest) -> bool {
        test(condition, request.query(&condition.key))
    }
}
