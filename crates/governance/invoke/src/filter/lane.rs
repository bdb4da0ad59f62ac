use governance_policy::FallbackType;

use crate::chain::{RouteFilter, RouteFilterChain};
use crate::context::InvocationContext;
use crate::error::Fault;
use crate::request::ServiceRequest;

/// Narrows candidates to the target lane.
///
/// Lanes fail closed: when the target lane has no instance the result is
/// empty unless the lane policy allows spilling over to the default lane or
/// to a named fallback lane.
#[derive(Debug, Default, Clone, Copy)]
pub struct LaneFilter;

/// Filtering steps derived from lane metadata and policy.
enum LanePlan {
    /// Filter once on `lane`, committing an empty result.
    Direct { lane: Option<String> },
    /// Filter on `lane`, then spill over to `fallback` when nothing matched.
    Fallback {
        lane: String,
        fallback: Option<String>,
    },
}

struct LaneIds {
    space: Option<String>,
    default_space: Option<String>,
    default_lane: Option<String>,
}

fn plan_for<R: ServiceRequest>(invocation: &InvocationContext<R>) -> LanePlan {
    let metadata = invocation.lane_metadata();
    let Some(space) = metadata.target_space.as_deref() else {
        return LanePlan::Direct {
            lane: metadata.target_lane_id.clone(),
        };
    };

    let lane_policy = invocation
        .service_metadata()
        .service_policy()
        .and_then(|p| p.lane_policy(metadata.target_space_id.as_deref()));
    let redirect = lane_policy.and_then(|p| p.target(metadata.target_lane_id.as_deref()));
    let target_lane = match redirect {
        Some(code) => space.lane(code),
        None => metadata.target_lane(),
    };
    let fallback_type = lane_policy.map_or(FallbackType::Default, |p| p.fallback_type);

    let Some(target_lane) = target_lane else {
        return LanePlan::Direct {
            lane: redirect
                .map(str::to_string)
                .or_else(|| metadata.target_lane_id.clone()),
        };
    };

    let fallback = match fallback_type {
        FallbackType::Default => space
            .default_lane()
            .filter(|d| d.code != target_lane.code)
            .map(|d| Some(d.code.clone())),
        FallbackType::Custom => Some(lane_policy.and_then(|p| p.fallback_lane.clone())),
        FallbackType::None => None,
    };
    match fallback {
        Some(fallback) => LanePlan::Fallback {
            lane: target_lane.code.clone(),
            fallback,
        },
        None => LanePlan::Direct {
            lane: Some(target_lane.code.clone()),
        },
    }
}

impl<R: ServiceRequest> RouteFilter<R> for LaneFilter {
    fn name(&self) -> &str {
        "lane"
    }

    fn filter(
        &self,
        invocation: &mut InvocationContext<R>,
        chain: RouteFilterChain<'_, R>,
    ) -> Result<(), Fault> {
        if !invocation.context().is_lane_enabled() {
            return chain.filter(invocation);
        }

        let plan = plan_for(invocation);
        let metadata = invocation.lane_metadata();
        let ids = LaneIds {
            space: metadata.target_space_id.clone(),
            default_space: metadata.default_space_id.clone(),
            default_lane: metadata.default_lane_id.clone(),
        };
        let target = invocation.route_target_mut();
        let mut on_lane = |lane: Option<&str>, nullable: bool| {
            target.filter(
                |e| {
                    e.is_lane(
                        ids.space.as_deref(),
                        lane,
                        ids.default_space.as_deref(),
                        ids.default_lane.as_deref(),
                    )
                },
                None,
                nullable,
            )
        };

        match plan {
            LanePlan::Direct { lane } => {
                on_lane(lane.as_deref(), true);
            }
            LanePlan::Fallback { lane, fallback } => {
                if on_lane(Some(&lane), false) == 0 {
                    on_lane(fallback.as_deref(), true);
                }
            }
        }
        chain.filter(invocation)
    }
}
