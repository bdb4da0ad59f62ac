//! Host-facing request contracts.

use std::collections::HashMap;

use governance_policy::DegradeConfig;

use crate::error::{Fault, FaultKind};

/// Logical header keys used to propagate governance metadata between hops.
pub mod keys {
    pub const LIVE_SPACE_ID: &str = "x-live-space-id";
    pub const LIVE_RULE_ID: &str = "x-live-rule-id";
    pub const LIVE_VARIABLE: &str = "x-live-uid";
    pub const LIVE_UNIT: &str = "x-live-unit";
    pub const LIVE_CELL: &str = "x-live-cell";
    pub const LANE_SPACE_ID: &str = "x-lane-space-id";
    pub const LANE_CODE: &str = "x-lane-code";
}

/// Key/value channel the host protocol adapter encodes on the wire.
pub trait Carrier {
    fn get(&self, key: &str) -> Option<&str>;

    fn set(&mut self, key: &str, value: &str);
}

/// A call intercepted by the host, inbound or outbound.
///
/// The fault operations are the host's short-circuit channel: after
/// `reject` the call must not be sent, after `failover` the retry layer may
/// pick another unit or cell, after `degrade` the configured response is
/// returned instead.
pub trait ServiceRequest: Send {
    /// Destination service name.
    fn service(&self) -> &str;

    fn group(&self) -> Option<&str> {
        None
    }

    fn path(&self) -> Option<&str> {
        None
    }

    fn method(&self) -> Option<&str> {
        None
    }

    fn is_write(&self) -> bool {
        false
    }

    /// Host the request was addressed to, used for domain policies.
    fn host(&self) -> Option<&str> {
        None
    }

    fn header(&self, key: &str) -> Option<&str>;

    fn query(&self, _key: &str) -> Option<&str> {
        None
    }

    /// Value used to resolve the owning unit.
    fn variable(&self) -> Option<&str> {
        self.header(keys::LIVE_VARIABLE)
    }

    fn reject(&mut self, fault: &Fault);

    fn failover(&mut self, fault: &Fault);

    fn degrade(&mut self, fault: &Fault, config: &DegradeConfig);
}

/// Fault signal recorded by [`SimpleRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub fault: Fault,
    pub degrade: Option<DegradeConfig>,
}

/// Plain in-memory request for adapters that already decoded the call.
#[derive(Debug, Clone, Default)]
pub struct SimpleRequest {
    pub service: String,
    pub group: Option<String>,
    pub path: Option<String>,
    pub method: Option<String>,
    pub write: bool,
    pub host: Option<String>,
    pub headers: HashMap<String, String>,
    pub queries: HashMap<String, String>,
    pub signal: Option<Signal>,
}

impl SimpleRequest {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Self::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.queries.insert(key.into(), value.into());
        self
    }

    pub fn fault_kind(&self) -> Option<FaultKind> {
        self.signal.as_ref().map(|s| s.fault.kind)
    }
}

impl Carrier for SimpleRequest {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    fn set(&mut self, key: &str, value: &str) {
        self.headers.insert(key.to_string(), value.to_string());
    }
}

impl ServiceRequest for SimpleRequest {
    fn service(&self) -> &str {
        &self.service
    }

    fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    fn is_write(&self) -> bool {
        self.write
    }

    fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    fn query(&self, key: &str) -> Option<&str> {
        self.queries.get(key).map(String::as_str)
    }

    fn reject(&mut self, fault: &Fault) {
        self.signal = Some(Signal {
            fault: fault.clone(),
            degrade: None,
        });
    }

    fn failover(&mut self, fault: &Fault) {
        self.signal = Some(Signal {
            fault: fault.clone(),
            degrade: None,
        });
    }

    fn degrade(&mut self, fault: &Fault, config: &DegradeConfig) {
        self.signal = Some(Signal {
            fault: fault.clone(),
            degrade: Some(config.clone()),
        });
    }
}
