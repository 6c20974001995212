//! Process-wide counters and duration records.
//!
//! A deliberately small registry: interceptors, the token validator and the
//! tenant context record into it, tests read back from it. Every record also
//! emits a `tracing` event so external collectors can scrape the log stream.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct DurationStats {
    count: u64,
    total_micros: u64,
}

#[derive(Debug, Default)]
struct Registry {
    counters: Mutex<HashMap<(String, String), u64>>,
    durations: Mutex<HashMap<(String, String), DurationStats>>,
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::default)
}

/// Increment a counter by one. `label` distinguishes outcomes or message
/// types under the same metric name (pass `""` when unused).
pub fn incr(name: &str, label: &str) {
    incr_by(name, label, 1);
}

pub fn incr_by(name: &str, label: &str, delta: u64) {
    if let Ok(mut counters) = registry().counters.lock() {
        *counters
            .entry((name.to_string(), label.to_string()))
            .or_insert(0) += delta;
    }
    tracing::trace!(metric = name, label, delta, "counter");
}

/// Record one timed observation under `name`/`label`.
pub fn observe_duration(name: &str, label: &str, elapsed: Duration) {
    if let Ok(mut durations) = registry().durations.lock() {
        let stats = durations
            .entry((name.to_string(), label.to_string()))
            .or_default();
        stats.count += 1;
        stats.total_micros = stats
            .total_micros
            .saturating_add(elapsed.as_micros() as u64);
    }
    tracing::trace!(metric = name, label, micros = elapsed.as_micros() as u64, "duration");
}

/// Current value of a counter (0 when never incremented).
pub fn counter(name: &str, label: &str) -> u64 {
    registry()
        .counters
        .lock()
        .ok()
        .and_then(|c| c.get(&(name.to_string(), label.to_string())).copied())
        .unwrap_or(0)
}

/// Number of duration observations recorded under `name`/`label`.
pub fn duration_count(name: &str, label: &str) -> u64 {
    registry()
        .durations
        .lock()
        .ok()
        .and_then(|d| d.get(&(name.to_string(), label.to_string())).map(|s| s.count))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_label() {
        incr("test.counter", "ok");
        incr("test.counter", "ok");
        incr("test.counter", "failure");
        assert_eq!(counter("test.counter", "ok"), 2);
        assert_eq!(counter("test.counter", "failure"), 1);
        assert_eq!(counter("test.counter", "missing"), 0);
    }

    #[test]
    fn durations_count_observations() {
        observe_duration("test.duration", "q", Duration::from_millis(5));
        observe_duration("test.duration", "q", Duration::from_millis(7));
        assert_eq!(duration_count("test.duration", "q"), 2);
    }
}
