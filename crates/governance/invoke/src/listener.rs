use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::request::ServiceRequest;

/// Observer of an invocation's terminal outcome.
pub trait RequestListener: Send + Sync {
    fn on_success(&self, _request: &dyn ServiceRequest, _duration: Duration) {}

    fn on_failure(&self, _request: &dyn ServiceRequest, _duration: Duration, _cause: &str) {}
}

/// Invoke `notify` for every listener; a panicking listener is logged and
/// skipped.
pub(crate) fn fan_out<F>(listeners: &[Arc<dyn RequestListener>], service: &str, notify: F)
where
    F: Fn(&dyn RequestListener),
{
    for (index, listener) in listeners.iter().enumerate() {
        if catch_unwind(AssertUnwindSafe(|| notify(&**listener))).is_err() {
            warn!(service = %service, listener = index, "Request listener panicked");
        }
    }
}
