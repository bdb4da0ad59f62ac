//! The mutable candidate set narrowed by route filters.

use std::sync::Arc;

use crate::instance::Endpoint;

/// The endpoint picked by load balancing, with its position in the final
/// candidate list.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub endpoint: Arc<dyn Endpoint>,
    pub index: usize,
}

/// Candidate instances of one invocation.
#[derive(Debug, Default)]
pub struct RouteTarget {
    endpoints: Vec<Arc<dyn Endpoint>>,
    unit: Option<String>,
    cell: Option<String>,
    candidate: Option<Candidate>,
}

impl RouteTarget {
    pub fn new(endpoints: Vec<Arc<dyn Endpoint>>) -> Self {
        Self {
            endpoints,
            ..Self::default()
        }
    }

    pub fn endpoints(&self) -> &[Arc<dyn Endpoint>] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn set_endpoints(&mut self, endpoints: Vec<Arc<dyn Endpoint>>) {
        self.endpoints = endpoints;
        self.candidate = None;
    }

    /// Keep the endpoints matching `predicate`, in their original order.
    ///
    /// At most `max` matches are kept when a limit is given. A result with no
    /// match is only committed when `nullable` is set; otherwise the
    /// candidates are left untouched so a fallback filter can run on them.
    /// Returns the number of matches.
    pub fn filter<P>(&mut self, mut predicate: P, max: Option<usize>, nullable: bool) -> usize
    where
        P: FnMut(&dyn Endpoint) -> bool,
    {
        let limit = max.unwrap_or(usize::MAX);
        let matched: Vec<Arc<dyn Endpoint>> = self
            .endpoints
            .iter()
            .filter(|e| predicate(&***e))
            .take(limit)
            .cloned()
            .collect();
        let count = matched.len();
        if count > 0 || nullable {
            self.endpoints = matched;
        }
        count
    }

    /// Unit the target was narrowed to.
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn cell(&self) -> Option<&str> {
        self.cell.as_deref()
    }

    pub fn set_unit(&mut self, unit: Option<String>) {
        self.unit = unit;
    }

    pub fn set_cell(&mut self, cell: Option<String>) {
        self.cell = cell;
    }

    pub fn candidate(&self) -> Option<&Candidate> {
        self.candidate.as_ref()
    }

    pub fn choose(&mut self, index: usize) -> Option<&Candidate> {
        let endpoint = self.endpoints.get(index)?.clone();
        self.candidate = Some(Candidate { endpoint, index });
        self.candidate.as_ref()
    }
}
