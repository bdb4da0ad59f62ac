//! Host-level policy combining live and lane domain bindings.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::lane::{LaneDomain, LaneSpace};
use crate::live::{LiveDomain, LiveSpace, UnitDomain};

/// Everything known about a host.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainPolicy {
    pub live_space_id: Option<String>,
    pub live_domain: Option<LiveDomain>,
    pub unit_domain: Option<UnitDomain>,
    pub lane_space_id: Option<String>,
    pub lane_domain: Option<LaneDomain>,
}

impl DomainPolicy {
    pub fn is_live(&self) -> bool {
        self.live_domain.is_some()
    }

    pub fn is_lane(&self) -> bool {
        self.lane_domain.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Domain {
    pub host: String,
    pub policy: DomainPolicy,
}

/// Build the host index: live bindings win, lane bindings for the same host
/// are merged in, lane-only hosts are kept as they are.
pub(crate) fn build_domains(
    live_spaces: &[Arc<LiveSpace>],
    lane_spaces: &[Arc<LaneSpace>],
) -> HashMap<String, Arc<Domain>> {
    let mut lanes: HashMap<&str, (&LaneSpace, &LaneDomain)> = HashMap::new();
    for space in lane_spaces {
        for domain in &space.domains {
            lanes.insert(domain.host.as_str(), (space.as_ref(), domain));
        }
    }

    let mut result = HashMap::new();
    for space in live_spaces {
        for live_domain in &space.spec.domains {
            let mut hosts = vec![(live_domain.host.as_str(), None)];
            hosts.extend(
                live_domain
                    .unit_domains
                    .iter()
                    .map(|ud| (ud.host.as_str(), Some(ud))),
            );
            for (host, unit_domain) in hosts {
                let lane = lanes.get(host);
                let policy = DomainPolicy {
                    live_space_id: Some(space.id.clone()),
                    live_domain: Some(live_domain.clone()),
                    unit_domain: unit_domain.cloned(),
                    lane_space_id: lane.map(|(s, _)| s.id.clone()),
                    lane_domain: lane.map(|(_, d)| (*d).clone()),
                };
                result.insert(
                    host.to_string(),
                    Arc::new(Domain {
                        host: host.to_string(),
                        policy,
                    }),
                );
            }
        }
    }

    for (host, (space, domain)) in lanes {
        result.entry(host.to_string()).or_insert_with(|| {
            Arc::new(Domain {
                host: host.to_string(),
                policy: DomainPolicy {
                    lane_space_id: Some(space.id.clone()),
                    lane_domain: Some(domain.clone()),
                    ..Default::default()
                },
            })
        });
    }
    result
}
