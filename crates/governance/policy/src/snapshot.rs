//! Immutable, indexed view of all governance policy.
//!
//! A snapshot is built once and never mutated after publication. Lookup
//! indices are built lazily on first use and cached for the lifetime of the
//! snapshot; a policy change always produces a new snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::db::{address_key, DatabaseCluster};
use crate::domain::{build_domains, Domain};
use crate::error::{PolicyError, Result};
use crate::lane::LaneSpace;
use crate::live::LiveSpace;
use crate::service::Service;

/// Serialized form of a full policy delivery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyDocument {
    pub live_spaces: Vec<LiveSpace>,
    pub lane_spaces: Vec<LaneSpace>,
    pub services: Vec<Service>,
    pub db_clusters: Vec<DatabaseCluster>,
}

#[derive(Debug, Default)]
struct Indices {
    live_spaces: OnceCell<HashMap<String, Arc<LiveSpace>>>,
    lane_spaces: OnceCell<HashMap<String, Arc<LaneSpace>>>,
    services: OnceCell<HashMap<String, Arc<Service>>>,
    db_names: OnceCell<HashMap<String, Arc<DatabaseCluster>>>,
    db_addresses: OnceCell<HashMap<String, Arc<DatabaseCluster>>>,
    domains: OnceCell<HashMap<String, Arc<Domain>>>,
}

/// Index `items` by key; the first occurrence of a key wins.
fn index_by<T>(items: &[Arc<T>], key: impl Fn(&T) -> &str) -> HashMap<String, Arc<T>> {
    let mut map = HashMap::with_capacity(items.len());
    for item in items {
        map.entry(key(item).to_string())
            .or_insert_with(|| Arc::clone(item));
    }
    map
}

/// Immutable view of live spaces, lane spaces, services and database clusters.
#[derive(Debug, Default)]
pub struct PolicySnapshot {
    version: u64,
    live_spaces: Arc<Vec<Arc<LiveSpace>>>,
    lane_spaces: Arc<Vec<Arc<LaneSpace>>>,
    services: Arc<Vec<Arc<Service>>>,
    db_clusters: Arc<Vec<Arc<DatabaseCluster>>>,
    indices: Indices,
}

impl PolicySnapshot {
    /// Empty snapshot with version zero.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> PolicySnapshotBuilder {
        PolicySnapshotBuilder::default()
    }

    /// Build a validated snapshot from a policy document.
    pub fn from_document(document: PolicyDocument) -> Result<Self> {
        Self::builder()
            .live_spaces(document.live_spaces)
            .lane_spaces(document.lane_spaces)
            .services(document.services)
            .db_clusters(document.db_clusters)
            .build()
    }

    /// Parse and validate a JSON policy document.
    pub fn from_json(json: &str) -> Result<Self> {
        let document: PolicyDocument = serde_json::from_str(json)?;
        Self::from_document(document)
    }

    pub fn to_document(&self) -> PolicyDocument {
        PolicyDocument {
            live_spaces: self.live_spaces.iter().map(|s| (**s).clone()).collect(),
            lane_spaces: self.lane_spaces.iter().map(|s| (**s).clone()).collect(),
            services: self.services.iter().map(|s| (**s).clone()).collect(),
            db_clusters: self.db_clusters.iter().map(|c| (**c).clone()).collect(),
        }
    }

    /// Version assigned by the store at publication; zero when unpublished.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub fn live_spaces(&self) -> &[Arc<LiveSpace>] {
        &self.live_spaces
    }

    pub fn lane_spaces(&self) -> &[Arc<LaneSpace>] {
        &self.lane_spaces
    }

    pub fn services(&self) -> &[Arc<Service>] {
        &self.services
    }

    pub fn db_clusters(&self) -> &[Arc<DatabaseCluster>] {
        &self.db_clusters
    }

    /// Shared handle to the service list, for identity checks across updates.
    pub fn service_list(&self) -> &Arc<Vec<Arc<Service>>> {
        &self.services
    }

    pub fn live_space(&self, id: &str) -> Option<&Arc<LiveSpace>> {
        self.indices
            .live_spaces
            .get_or_init(|| index_by(self.live_spaces.as_slice(), |s| s.id.as_str()))
            .get(id)
    }

    pub fn lane_space(&self, id: &str) -> Option<&Arc<LaneSpace>> {
        self.indices
            .lane_spaces
            .get_or_init(|| index_by(self.lane_spaces.as_slice(), |s| s.id.as_str()))
            .get(id)
    }

    /// The lane space applied when a request names none.
    pub fn default_lane_space(&self) -> Option<&Arc<LaneSpace>> {
        self.lane_spaces.iter().find(|s| s.default_space)
    }

    pub fn service(&self, name: &str) -> Option<&Arc<Service>> {
        self.indices
            .services
            .get_or_init(|| index_by(self.services.as_slice(), |s| s.name.as_str()))
            .get(name)
    }

    pub fn db_cluster(&self, name: &str) -> Option<&Arc<DatabaseCluster>> {
        self.indices
            .db_names
            .get_or_init(|| index_by(self.db_clusters.as_slice(), |c| c.name.as_str()))
            .get(name)
    }

    /// Cluster owning `host:port`, falling back to one registered by bare
    /// `host`.
    pub fn db_cluster_by_address(&self, host: &str, port: Option<u16>) -> Option<&Arc<DatabaseCluster>> {
        let addresses = self.indices.db_addresses.get_or_init(|| {
            let mut map = HashMap::new();
            for cluster in self.db_clusters.iter() {
                for key in cluster.address_keys() {
                    map.entry(key).or_insert_with(|| Arc::clone(cluster));
                }
            }
            map
        });
        addresses
            .get(&address_key(host, port))
            .or_else(|| port.and_then(|_| addresses.get(&address_key(host, None))))
    }

    /// Merged live and lane policy for `host`.
    pub fn domain(&self, host: &str) -> Option<&Arc<Domain>> {
        self.indices
            .domains
            .get_or_init(|| build_domains(&self.live_spaces, &self.lane_spaces))
            .get(host)
    }

    /// Force every lazy index so the first request does not pay for it.
    pub fn warm(&self) {
        self.live_space("");
        self.lane_space("");
        self.service("");
        self.db_cluster("");
        self.db_cluster_by_address("", None);
        self.domain("");
    }

    fn derive(&self) -> Self {
        Self {
            version: 0,
            live_spaces: Arc::clone(&self.live_spaces),
            lane_spaces: Arc::clone(&self.lane_spaces),
            services: Arc::clone(&self.services),
            db_clusters: Arc::clone(&self.db_clusters),
            indices: Indices::default(),
        }
    }

    /// New snapshot with `services` replacing the service list.
    pub fn with_services(&self, services: Vec<Arc<Service>>) -> Self {
        Self {
            services: Arc::new(services),
            ..self.derive()
        }
    }

    pub fn with_live_spaces(&self, live_spaces: Vec<Arc<LiveSpace>>) -> Self {
        Self {
            live_spaces: Arc::new(live_spaces),
            ..self.derive()
        }
    }

    pub fn with_lane_spaces(&self, lane_spaces: Vec<Arc<LaneSpace>>) -> Self {
        Self {
            lane_spaces: Arc::new(lane_spaces),
            ..self.derive()
        }
    }

    pub fn with_db_clusters(&self, db_clusters: Vec<Arc<DatabaseCluster>>) -> Self {
        Self {
            db_clusters: Arc::new(db_clusters),
            ..self.derive()
        }
    }
}

/// Builder validating identifier uniqueness.
#[derive(Debug, Default)]
pub struct PolicySnapshotBuilder {
    live_spaces: Vec<LiveSpace>,
    lane_spaces: Vec<LaneSpace>,
    services: Vec<Service>,
    db_clusters: Vec<DatabaseCluster>,
}

fn ensure_unique<'a>(
    keys: impl Iterator<Item = &'a str>,
    err: impl Fn(String) -> PolicyError,
) -> Result<()> {
    let mut seen = HashSet::new();
    for key in keys {
        if !seen.insert(key) {
            return Err(err(key.to_string()));
        }
    }
    Ok(())
}

pub(crate) fn validate_live_spaces(live_spaces: &[LiveSpace]) -> Result<()> {
    ensure_unique(
        live_spaces.iter().map(|s| s.id.as_str()),
        PolicyError::DuplicateLiveSpace,
    )
}

pub(crate) fn validate_lane_spaces(lane_spaces: &[LaneSpace]) -> Result<()> {
    ensure_unique(
        lane_spaces.iter().map(|s| s.id.as_str()),
        PolicyError::DuplicateLaneSpace,
    )?;
    if let Some(space) = lane_spaces
        .iter()
        .find(|s| s.lanes.iter().filter(|l| l.default_lane).count() > 1)
    {
        return Err(PolicyError::Invalid(format!(
            "lane space {} declares more than one default lane",
            space.id
        )));
    }
    Ok(())
}

pub(crate) fn validate_db_clusters(db_clusters: &[DatabaseCluster]) -> Result<()> {
    ensure_unique(
        db_clusters.iter().map(|c| c.name.as_str()),
        PolicyError::DuplicateDbCluster,
    )
}

impl PolicySnapshotBuilder {
    pub fn live_spaces(mut self, live_spaces: Vec<LiveSpace>) -> Self {
        self.live_spaces = live_spaces;
        self
    }

    pub fn lane_spaces(mut self, lane_spaces: Vec<LaneSpace>) -> Self {
        self.lane_spaces = lane_spaces;
        self
    }

    pub fn services(mut self, services: Vec<Service>) -> Self {
        self.services = services;
        self
    }

    pub fn service(mut self, service: Service) -> Self {
        self.services.push(service);
        self
    }

    pub fn db_clusters(mut self, db_clusters: Vec<DatabaseCluster>) -> Self {
        self.db_clusters = db_clusters;
        self
    }

    pub fn build(self) -> Result<PolicySnapshot> {
        validate_live_spaces(&self.live_spaces)?;
        validate_lane_spaces(&self.lane_spaces)?;
        ensure_unique(
            self.services.iter().map(|s| s.name.as_str()),
            PolicyError::DuplicateService,
        )?;
        validate_db_clusters(&self.db_clusters)?;

        Ok(PolicySnapshot {
            version: 0,
            live_spaces: Arc::new(self.live_spaces.into_iter().map(Arc::new).collect()),
            lane_spaces: Arc::new(self.lane_spaces.into_iter().map(Arc::new).collect()),
            services: Arc::new(self.services.into_iter().map(Arc::new).collect()),
            db_clusters: Arc::new(self.db_clusters.into_iter().map(Arc::new).collect()),
            indices: Indices::default(),
        })
    }
}
