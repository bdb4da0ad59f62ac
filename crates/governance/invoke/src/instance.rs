//! Downstream instances supplied by the host's service discovery.

use std::fmt;

fn or_default<'a>(value: Option<&'a str>, default: Option<&'a str>) -> Option<&'a str> {
    match value {
        Some(v) if !v.is_empty() => Some(v),
        _ => default,
    }
}

/// A candidate downstream instance.
pub trait Endpoint: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn live_space_id(&self) -> Option<&str> {
        None
    }

    fn unit(&self) -> Option<&str> {
        None
    }

    fn cell(&self) -> Option<&str> {
        None
    }

    fn lane_space_id(&self) -> Option<&str> {
        None
    }

    fn lane(&self) -> Option<&str> {
        None
    }

    fn weight(&self) -> u32 {
        100
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn is_unit(&self, unit: &str) -> bool {
        self.unit() == Some(unit)
    }

    fn is_cell(&self, cell: &str) -> bool {
        self.cell() == Some(cell)
    }

    /// Whether the instance serves `lane` of `space_id`.
    ///
    /// Missing or empty ids on either side stand for the default space and
    /// the default lane.
    fn is_lane(
        &self,
        space_id: Option<&str>,
        lane: Option<&str>,
        default_space_id: Option<&str>,
        default_lane: Option<&str>,
    ) -> bool {
        let target_space = or_default(space_id, default_space_id);
        let target_lane = or_default(lane, default_lane);
        let own_space = or_default(self.lane_space_id(), default_space_id);
        let own_lane = or_default(self.lane(), default_lane);
        target_space == own_space && target_lane == own_lane
    }
}

/// Endpoint built from discovery metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
    pub address: String,
    pub live_space_id: Option<String>,
    pub unit: Option<String>,
    pub cell: Option<String>,
    pub lane_space_id: Option<String>,
    pub lane: Option<String>,
    pub weight: u32,
    pub healthy: bool,
}

impl Instance {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            live_space_id: None,
            unit: None,
            cell: None,
            lane_space_id: None,
            lane: None,
            weight: 100,
            healthy: true,
        }
    }

    pub fn with_live(mut self, space_id: &str, unit: &str, cell: &str) -> Self {
        self.live_space_id = Some(space_id.to_string());
        self.unit = Some(unit.to_string());
        self.cell = Some(cell.to_string());
        self
    }

    pub fn with_lane(mut self, space_id: &str, lane: &str) -> Self {
        self.lane_space_id = Some(space_id.to_string());
        self.lane = Some(lane.to_string());
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_healthy(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }
}

impl Endpoint for Instance {
    fn id(&self) -> &str {
        &self.id
    }

    fn live_space_id(&self) -> Option<&str> {
        self.live_space_id.as_deref()
    }

    fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    fn cell(&self) -> Option<&str> {
        self.cell.as_deref()
    }

    fn lane_space_id(&self) -> Option<&str> {
        self.lane_space_id.as_deref()
    }

    fn lane(&self) -> Option<&str> {
        self.lane.as_deref()
    }

    fn weight(&self) -> u32 {
        self.weight
    }

    fn is_healthy(&self) -> bool {
        self.healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlabelled_instance_belongs_to_default_lane() {
        let instance = Instance::new("i-1", "10.0.0.1:8080");
        assert!(instance.is_lane(None, None, Some("space"), Some("base")));
        assert!(instance.is_lane(Some("space"), Some("base"), Some("space"), Some("base")));
        assert!(!instance.is_lane(Some("space"), Some("beta"), Some("space"), Some("base")));
    }

    #[test]
    fn labelled_instance_matches_its_lane_only() {
        let instance = Instance::new("i-1", "10.0.0.1:8080").with_lane("space", "beta");
        assert!(instance.is_lane(Some("space"), Some("beta"), Some("space"), Some("base")));
        assert!(!instance.is_lane(Some("space"), Some(""), Some("space"), Some("base")));
        assert!(!instance.is_lane(Some("other"), Some("beta"), Some("space"), Some("base")));
    }
}
