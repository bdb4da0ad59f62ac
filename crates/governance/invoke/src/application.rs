use serde::{Deserialize, Serialize};

/// Where the local process runs in the live and lane topology.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Location {
    pub region: Option<String>,
    pub zone: Option<String>,
    pub unit: Option<String>,
    pub cell: Option<String>,
    pub live_space_id: Option<String>,
    pub lane_space_id: Option<String>,
    pub lane: Option<String>,
}

/// The local application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Application {
    pub name: String,
    pub location: Location,
}

impl Application {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: Location::default(),
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }
}
