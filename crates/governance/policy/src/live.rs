//! Multi-region ("live") topology: spaces, units, cells and unit rules.
//!
//! A live space partitions an application into units, each unit into cells.
//! Requests are pinned to a unit by a routing variable evaluated against a
//! [`UnitRule`].

use serde::{Deserialize, Serialize};

/// How a unit or cell may currently be used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessMode {
    /// Reads and writes are both served.
    #[default]
    ReadWrite,
    /// Only non-write requests are served.
    Read,
    /// Nothing is served.
    None,
}

/// Anything that carries an [`AccessMode`] and can host traffic.
pub trait Place {
    /// Code of the place, unique within its parent.
    fn code(&self) -> &str;

    /// Current access mode.
    fn access_mode(&self) -> AccessMode;
}

/// A cell inside a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub access_mode: AccessMode,
}

impl Place for Cell {
    fn code(&self) -> &str {
        &self.code
    }

    fn access_mode(&self) -> AccessMode {
        self.access_mode
    }
}

/// A unit of a live space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub access_mode: AccessMode,
    #[serde(default)]
    pub cells: Vec<Cell>,
}

impl Unit {
    /// Look up a cell of this unit by code.
    pub fn cell(&self, code: &str) -> Option<&Cell> {
        self.cells.iter().find(|c| c.code == code)
    }
}

impl Place for Unit {
    fn code(&self) -> &str {
        &self.code
    }

    fn access_mode(&self) -> AccessMode {
        self.access_mode
    }
}

/// What to do when a request carries no routing variable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariableMissingAction {
    /// Route to the center unit.
    #[default]
    Center,
    /// Refuse the request.
    Reject,
}

/// Inclusive slot range owned by a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRange {
    pub from: u64,
    pub to: u64,
}

impl UnitRange {
    pub fn contains(&self, slot: u64) -> bool {
        slot >= self.from && slot <= self.to
    }
}

/// Routing entry binding a unit to slot ranges and explicit variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitRoute {
    pub unit: String,
    /// Variables pinned to this unit regardless of their slot.
    #[serde(default)]
    pub allows: Vec<String>,
    #[serde(default)]
    pub ranges: Vec<UnitRange>,
}

impl UnitRoute {
    fn contains(&self, slot: u64) -> bool {
        self.ranges.iter().any(|r| r.contains(slot))
    }
}

/// Rule mapping a routing variable onto a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitRule {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Number of slots; zero disables slot routing.
    #[serde(default)]
    pub modulo: u64,
    #[serde(default)]
    pub variable_missing_action: VariableMissingAction,
    #[serde(default)]
    pub routes: Vec<UnitRoute>,
}

impl UnitRule {
    /// Resolve the route owning `variable`.
    ///
    /// Allow lists win over slot ranges. Numeric variables use their value as
    /// the slot seed, anything else is hashed with FNV-1a so every process
    /// agrees on the result.
    pub fn route(&self, variable: &str) -> Option<&UnitRoute> {
        if let Some(route) = self
            .routes
            .iter()
            .find(|r| r.allows.iter().any(|a| a == variable))
        {
            return Some(route);
        }
        if self.modulo == 0 {
            return None;
        }
        let seed = variable
            .parse::<u64>()
            .unwrap_or_else(|_| fnv1a(variable.as_bytes()));
        let slot = seed % self.modulo;
        self.routes.iter().find(|r| r.contains(slot))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}

/// Host bound to a single unit of a live domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitDomain {
    pub host: String,
    pub unit: String,
}

/// Host governed by a live space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveDomain {
    pub host: String,
    #[serde(default)]
    pub unit_domains: Vec<UnitDomain>,
}

/// Topology of a live space.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSpec {
    #[serde(default)]
    pub units: Vec<Unit>,
    #[serde(default)]
    pub unit_rules: Vec<UnitRule>,
    #[serde(default)]
    pub domains: Vec<LiveDomain>,
    #[serde(default)]
    pub center_unit: Option<String>,
}

/// A multi-region topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSpace {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub spec: LiveSpec,
}

impl LiveSpace {
    pub fn unit(&self, code: &str) -> Option<&Unit> {
        self.spec.units.iter().find(|u| u.code == code)
    }

    pub fn unit_rule(&self, id: &str) -> Option<&UnitRule> {
        self.spec.unit_rules.iter().find(|r| r.id == id)
    }

    pub fn center_unit(&self) -> Option<&Unit> {
        self.spec
            .center_unit
            .as_deref()
            .and_then(|code| self.unit(code))
    }

    /// Resolve the unit owning `variable` under the rule `rule_id`.
    pub fn route_unit(&self, rule_id: &str, variable: &str) -> Option<&Unit> {
        self.unit_rule(rule_id)
            .and_then(|rule| rule.route(variable))
            .and_then(|route| self.unit(&route.unit))
    }
}
