//! Engine configuration.
//!
//! Every field has a default, so an empty source yields a working engine.
//! Sources are layered: an optional file, then `GOVERNANCE_` environment
//! variables with `__` between nested keys, e.g.
//! `GOVERNANCE_RATE_LIMIT__DEFAULT_TIMEOUT_MS=50`.

use governance_invoke::{Application, Location};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    pub application: ApplicationConfig,
    pub live: ToggleConfig,
    pub lane: ToggleConfig,
    pub circuit_breaker: ToggleConfig,
    pub rate_limit: RateLimitConfig,
    pub load_balance: LoadBalanceConfig,
    pub logging: LoggingConfig,
}

/// Identity and placement of the local application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub name: String,
    pub location: LocationConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub region: Option<String>,
    pub zone: Option<String>,
    pub unit: Option<String>,
    pub cell: Option<String>,
    pub live_space_id: Option<String>,
    pub lane_space_id: Option<String>,
    pub lane: Option<String>,
}

impl ApplicationConfig {
    pub fn to_application(&self) -> Application {
        let location = &self.location;
        Application::new(self.name.clone()).with_location(Location {
            region: location.region.clone(),
            zone: location.zone.clone(),
            unit: location.unit.clone(),
            cell: location.cell.clone(),
            live_space_id: location.live_space_id.clone(),
            lane_space_id: location.lane_space_id.clone(),
            lane: location.lane.clone(),
        })
    }
}

/// Switch for one governance feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ToggleConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Wait allowed for a permit when the policy sets none.
    #[serde(default)]
    pub default_timeout_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_timeout_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalanceConfig {
    /// Strategy for services without a load balance policy.
    #[serde(default = "default_load_balancer")]
    pub default_type: String,
}

impl Default for LoadBalanceConfig {
    fn default() -> Self {
        Self {
            default_type: default_load_balancer(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_load_balancer() -> String {
    "round_robin".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GovernanceConfig {
    /// Load from an optional file and the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("GOVERNANCE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }
}
