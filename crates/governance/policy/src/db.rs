//! Database clusters addressed by host or `host:port`.

use serde::{Deserialize, Serialize};

use crate::live::AccessMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseCluster {
    pub name: String,
    /// Addresses in `host` or `host:port` form.
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub access_mode: AccessMode,
}

/// Normalised lookup key for a database address.
pub fn address_key(host: &str, port: Option<u16>) -> String {
    match port {
        Some(port) if port > 0 => format!("{}:{}", host.to_ascii_lowercase(), port),
        _ => host.to_ascii_lowercase(),
    }
}

impl DatabaseCluster {
    /// Lookup keys of every address, lower-cased.
    pub fn address_keys(&self) -> impl Iterator<Item = String> + '_ {
        self.addresses.iter().map(|a| a.trim().to_ascii_lowercase())
    }
}
