//! Dashboard-specific metrics, recorded through the `metrics` facade and
//! exposed alongside the HTTP metrics on `/metrics`.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Count a route guard decision.
pub fn record_guard_outcome(guard: &'static str, outcome: &'static str) {
    counter!(
        "dashboard_guard_decisions_total",
        "guard" => guard,
        "outcome" => outcome
    )
    .increment(1);
}

/// Count a role lookup and record its latency. `outcome` is one of
/// `found`, `missing`, `failed` or `superseded`.
pub fn record_role_lookup(outcome: &'static str, elapsed: Duration) {
    counter!("dashboard_role_lookups_total", "outcome" => outcome).increment(1);
    histogram!("dashboard_role_lookup_duration_seconds").record(elapsed.as_secs_f64());
}

/// Count a role write from the admin endpoints or signup.
pub fn record_role_write(source: &'static str, success: bool) {
    counter!(
        "dashboard_role_writes_total",
        "source" => source,
        "status" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Count an auth provider state change seen by the listener.
pub fn record_auth_event(kind: &'static str) {
    counter!("dashboard_auth_events_total", "kind" => kind).increment(1);
}

/// Number of browser sessions with a live auth listener.
pub fn record_browser_sessions(count: usize) {
    gauge!("dashboard_browser_sessions").set(count as f64);
}
