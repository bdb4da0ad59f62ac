//! Lane spaces: named traffic isolation channels.

use serde::{Deserialize, Serialize};

/// A lane inside a lane space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lane {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Whether this is the space's default (baseline) lane.
    #[serde(default)]
    pub default_lane: bool,
}

/// Host bound to a lane space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneDomain {
    pub host: String,
}

/// Collection of lanes sharing one isolation scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneSpace {
    pub id: String,
    /// Whether this space applies when a request names no space.
    #[serde(default)]
    pub default_space: bool,
    #[serde(default)]
    pub lanes: Vec<Lane>,
    #[serde(default)]
    pub domains: Vec<LaneDomain>,
}

impl LaneSpace {
    pub fn lane(&self, code: &str) -> Option<&Lane> {
        self.lanes.iter().find(|l| l.code == code)
    }

    pub fn default_lane(&self) -> Option<&Lane> {
        self.lanes.iter().find(|l| l.default_lane)
    }

    /// Lane named `code`, or the default lane when `code` is absent or empty.
    pub fn lane_or_default(&self, code: Option<&str>) -> Option<&Lane> {
        match code {
            Some(code) if !code.is_empty() => self.lane(code),
            _ => self.default_lane(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> LaneSpace {
        LaneSpace {
            id: "space-1".into(),
            default_space: true,
            lanes: vec![
                Lane {
                    code: "base".into(),
                    name: None,
                    default_lane: true,
                },
                Lane {
                    code: "canary".into(),
                    name: None,
                    default_lane: false,
                },
            ],
            domains: vec![],
        }
    }

    #[test]
    fn lane_or_default_falls_back_on_empty_code() {
        let space = space();
        assert_eq!(space.lane_or_default(None).map(|l| l.code.as_str()), Some("base"));
        assert_eq!(space.lane_or_default(Some("")).map(|l| l.code.as_str()), Some("base"));
        assert_eq!(
            space.lane_or_default(Some("canary")).map(|l| l.code.as_str()),
            Some("canary")
        );
        assert!(space.lane_or_default(Some("missing")).is_none());
    }
}
