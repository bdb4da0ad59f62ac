//! Multi-source merge semantics for service updates.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::service::Service;

/// Decides how a service update or delete coming from `owner` is applied.
///
/// Every mutation records `owner` on the resulting service.
pub trait PolicyMerger: Send + Sync {
    /// Prepare a brand-new service before it is appended.
    fn on_add(&self, service: &mut Service, owner: &str) {
        service.add_owner(owner);
    }

    /// Merge `update` into `old` and return the service to publish.
    fn on_update(&self, old: &Service, update: &Service, owner: &str) -> Service;

    /// Handle a delete of `old`. Returning `Some` vetoes the removal and
    /// publishes the returned service instead.
    fn on_delete(&self, old: &Service, owner: &str) -> Option<Service>;
}

/// Last writer wins: updates replace the policy, deletes always remove.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplaceMerger;

impl PolicyMerger for ReplaceMerger {
    fn on_update(&self, old: &Service, update: &Service, owner: &str) -> Service {
        let mut merged = update.clone();
        merged.owners = old.owners.clone();
        merged.add_owner(owner);
        merged
    }

    fn on_delete(&self, _old: &Service, _owner: &str) -> Option<Service> {
        None
    }
}

/// Owner-aware merge.
///
/// Paths the update does not mention are retained, since another source may
/// have authored them. A delete only withdraws the deleting owner; the service
/// survives while any other owner still holds it.
#[derive(Debug, Default, Clone, Copy)]
pub struct OwnerMerger;

impl PolicyMerger for OwnerMerger {
    fn on_update(&self, old: &Service, update: &Service, owner: &str) -> Service {
        let mut merged = update.clone();
        merged.owners = old.owners.clone();
        merged.add_owner(owner);
        if merged.policy.is_none() {
            merged.policy = old.policy.clone();
        }
        for path in &old.paths {
            if !merged.paths.iter().any(|p| p.path == path.path) {
                merged.paths.push(path.clone());
            }
        }
        merged
    }

    fn on_delete(&self, old: &Service, owner: &str) -> Option<Service> {
        let mut kept = old.clone();
        kept.remove_owner(owner);
        if kept.owners.is_empty() {
            None
        } else {
            Some(kept)
        }
    }
}

/// Compute the next service list.
///
/// Retained services keep their relative order and brand-new services follow
/// in the order they were supplied. When `updates` names a service twice the
/// last entry wins. A service both updated and deleted is updated.
pub fn merge_services(
    old: &[Arc<Service>],
    updates: Vec<Service>,
    deletes: &HashSet<String>,
    merger: &dyn PolicyMerger,
    owner: &str,
) -> Vec<Arc<Service>> {
    let mut order = Vec::with_capacity(updates.len());
    let mut update_map: HashMap<String, Service> = HashMap::with_capacity(updates.len());
    for service in updates {
        if !update_map.contains_key(&service.name) {
            order.push(service.name.clone());
        }
        update_map.insert(service.name.clone(), service);
    }

    let mut result = Vec::with_capacity(old.len() + order.len());
    let mut existing = HashSet::with_capacity(old.len());
    for service in old {
        existing.insert(service.name.as_str());
        match update_map.get(&service.name) {
            Some(update) => result.push(Arc::new(merger.on_update(service, update, owner))),
            None if deletes.contains(&service.name) => match merger.on_delete(service, owner) {
                Some(kept) => {
                    debug!(service = %service.name, owner, "Service delete vetoed by merger");
                    result.push(Arc::new(kept));
                }
                None => {
                    debug!(service = %service.name, owner, "Service removed");
                }
            },
            None => result.push(Arc::clone(service)),
        }
    }

    for name in order {
        if existing.contains(name.as_str()) {
            continue;
        }
        if let Some(mut service) = update_map.remove(&name) {
            merger.on_add(&mut service, owner);
            result.push(Arc::new(service));
        }
    }
    result
}
