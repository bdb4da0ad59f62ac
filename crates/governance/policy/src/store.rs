//! Process-wide holder of the current policy snapshot.
//!
//! Reads are a single atomic pointer load. Writers are serialized, build the
//! next snapshot off to the side (indices included) and publish it with one
//! pointer swap, so a reader always sees either the old or the new snapshot.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::info;

use crate::db::DatabaseCluster;
use crate::error::Result;
use crate::lane::LaneSpace;
use crate::live::LiveSpace;
use crate::merge::{merge_services, PolicyMerger};
use crate::service::Service;
use crate::snapshot::{
    validate_db_clusters, validate_lane_spaces, validate_live_spaces, PolicySnapshot,
};

pub struct PolicyStore {
    current: ArcSwap<PolicySnapshot>,
    writer: Mutex<()>,
    versions: watch::Sender<u64>,
}

impl std::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyStore")
            .field("version", &self.current.load().version())
            .finish()
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new(PolicySnapshot::empty())
    }
}

impl PolicyStore {
    /// Create a store whose first published snapshot is `initial`.
    pub fn new(mut initial: PolicySnapshot) -> Self {
        initial.set_version(1);
        initial.warm();
        let (versions, _) = watch::channel(1);
        Self {
            current: ArcSwap::from_pointee(initial),
            writer: Mutex::new(()),
            versions,
        }
    }

    /// The currently published snapshot. Never blocks.
    pub fn current(&self) -> Arc<PolicySnapshot> {
        self.current.load_full()
    }

    /// Watch the version of the published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.versions.subscribe()
    }

    /// Apply service updates and deletes from `owner`.
    pub fn update(
        &self,
        updates: Vec<Service>,
        deletes: &HashSet<String>,
        merger: &dyn PolicyMerger,
        owner: &str,
    ) -> Arc<PolicySnapshot> {
        self.publish_with(|previous| {
            let services = merge_services(previous.services(), updates, deletes, merger, owner);
            previous.with_services(services)
        })
    }

    pub fn update_service(
        &self,
        service: Service,
        merger: &dyn PolicyMerger,
        owner: &str,
    ) -> Arc<PolicySnapshot> {
        self.update(vec![service], &HashSet::new(), merger, owner)
    }

    pub fn delete_service(
        &self,
        name: &str,
        merger: &dyn PolicyMerger,
        owner: &str,
    ) -> Arc<PolicySnapshot> {
        let deletes = HashSet::from([name.to_string()]);
        self.update(Vec::new(), &deletes, merger, owner)
    }

    /// Replace the live spaces. Duplicate ids are refused and the current
    /// snapshot stays published.
    pub fn update_live_spaces(&self, live_spaces: Vec<LiveSpace>) -> Result<Arc<PolicySnapshot>> {
        validate_live_spaces(&live_spaces)?;
        Ok(self.publish_with(|previous| {
            previous.with_live_spaces(live_spaces.into_iter().map(Arc::new).collect())
        }))
    }

    pub fn update_lane_spaces(&self, lane_spaces: Vec<LaneSpace>) -> Result<Arc<PolicySnapshot>> {
        validate_lane_spaces(&lane_spaces)?;
        Ok(self.publish_with(|previous| {
            previous.with_lane_spaces(lane_spaces.into_iter().map(Arc::new).collect())
        }))
    }

    pub fn update_db_clusters(
        &self,
        db_clusters: Vec<DatabaseCluster>,
    ) -> Result<Arc<PolicySnapshot>> {
        validate_db_clusters(&db_clusters)?;
        Ok(self.publish_with(|previous| {
            previous.with_db_clusters(db_clusters.into_iter().map(Arc::new).collect())
        }))
    }

    /// Replace everything with `snapshot`.
    pub fn publish(&self, snapshot: PolicySnapshot) -> Arc<PolicySnapshot> {
        self.publish_with(move |_| snapshot)
    }

    fn publish_with(
        &self,
        build: impl FnOnce(&PolicySnapshot) -> PolicySnapshot,
    ) -> Arc<PolicySnapshot> {
        let _writer = self.writer.lock();
        let previous = self.current.load_full();
        let mut next = build(&previous);
        let version = previous.version() + 1;
        next.set_version(version);
        next.warm();

        let next = Arc::new(next);
        self.current.store(Arc::clone(&next));
        self.versions.send_replace(version);

        info!(
            version,
            services = next.services().len(),
            live_spaces = next.live_spaces().len(),
            lane_spaces = next.lane_spaces().len(),
            "Published policy snapshot"
        );
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PolicyError;
    use crate::merge::ReplaceMerger;
    use std::thread;

    fn store_with(names: &[&str]) -> PolicyStore {
        let snapshot = PolicySnapshot::builder()
            .services(names.iter().map(|n| Service::new(*n)).collect())
            .build()
            .unwrap();
        PolicyStore::new(snapshot)
    }

    fn names(snapshot: &PolicySnapshot) -> Vec<String> {
        snapshot.services().iter().map(|s| s.name.clone()).collect()
    }

    #[test]
    fn update_publishes_new_snapshot_and_leaves_old_untouched() {
        let store = store_with(&["A", "B", "C"]);
        let before = store.current();

        let deletes = HashSet::from(["C".to_string()]);
        let after = store.update(
            vec![Service::new("B"), Service::new("D")],
            &deletes,
            &ReplaceMerger,
            "cp",
        );

        assert_eq!(names(&before), vec!["A", "B", "C"]);
        assert_eq!(names(&after), vec!["A", "B", "D"]);
        assert!(!Arc::ptr_eq(before.service_list(), after.service_list()));
        assert!(Arc::ptr_eq(&after, &store.current()));
        assert_eq!(after.version(), before.version() + 1);
        assert!(before.service("C").is_some());
        assert!(after.service("C").is_none());
    }

    #[test]
    fn helpers_route_through_update() {
        let store = store_with(&["A"]);
        store.update_service(Service::new("B"), &ReplaceMerger, "cp");
        store.delete_service("A", &ReplaceMerger, "cp");
        assert_eq!(names(&store.current()), vec!["B"]);
    }

    #[test]
    fn topology_updates_keep_services() {
        let store = store_with(&["A"]);
        let next = store.update_lane_spaces(vec![LaneSpace {
            id: "lane-1".into(),
            default_space: true,
            lanes: vec![],
            domains: vec![],
        }])
        .unwrap();
        assert!(next.lane_space("lane-1").is_some());
        assert_eq!(names(&next), vec!["A"]);
    }

    #[test]
    fn duplicate_live_space_is_refused_and_version_holds() {
        let store = store_with(&["A"]);
        let before = store.current();
        let space = |id: &str| LiveSpace {
            id: id.into(),
            name: None,
            spec: Default::default(),
        };

        let err = store
            .update_live_spaces(vec![space("live-1"), space("live-1")])
            .unwrap_err();
        assert!(matches!(err, PolicyError::DuplicateLiveSpace(id) if id == "live-1"));
        assert!(Arc::ptr_eq(&before, &store.current()));
        assert_eq!(store.current().version(), before.version());
    }

    #[test]
    fn duplicate_db_cluster_is_refused_and_version_holds() {
        let store = store_with(&["A"]);
        let receiver = store.subscribe();
        let cluster = |name: &str| DatabaseCluster {
            name: name.into(),
            addresses: vec![format!("{name}.db:3306")],
            access_mode: Default::default(),
        };

        let err = store
            .update_db_clusters(vec![cluster("orders-db"), cluster("orders-db")])
            .unwrap_err();
        assert!(matches!(err, PolicyError::DuplicateDbCluster(name) if name == "orders-db"));
        assert_eq!(*receiver.borrow(), 1);
        assert!(store.current().db_cluster("orders-db").is_none());

        let next = store
            .update_db_clusters(vec![cluster("orders-db"), cluster("users-db")])
            .unwrap();
        assert_eq!(next.version(), 2);
        assert!(next.db_cluster("users-db").is_some());
    }

    #[test]
    fn subscribers_observe_versions() {
        let store = store_with(&[]);
        let receiver = store.subscribe();
        assert_eq!(*receiver.borrow(), 1);
        store.update_service(Service::new("A"), &ReplaceMerger, "cp");
        assert_eq!(*receiver.borrow(), 2);
    }

    #[test]
    fn readers_never_observe_partial_lists() {
        let store = Arc::new(store_with(&[]));
        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..200 {
                    let batch = (0..5).map(|j| Service::new(format!("svc-{i}-{j}"))).collect();
                    store.update(batch, &HashSet::new(), &ReplaceMerger, "cp");
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let snapshot = store.current();
                        assert_eq!(snapshot.services().len() % 5, 0);
                        assert_eq!(snapshot.services().len() as u64, (snapshot.version() - 1) * 5);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.current().services().len(), 1_000);
    }
}
