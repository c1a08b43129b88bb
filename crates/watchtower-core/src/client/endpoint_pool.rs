//! Endpoint pool with health tracking and rotation.
//!
//! Tracks success/failure/latency per candidate endpoint (mirror URL or proxy)
//! and picks the best candidate per request. An endpoint is deactivated after
//! 3 consecutive failures; when every endpoint is deactivated the whole pool is
//! reset to active so selection can never starve.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;

use watchtower_types::models::{EndpointStatsSnapshot, SelectionStrategy};

/// Consecutive failures before an endpoint is taken out of rotation.
const DEACTIVATION_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Default)]
struct EndpointStats {
    success_count: u64,
    failure_count: u64,
    consecutive_failures: u32,
    total_response_time: f64,
    avg_response_time: f64,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    is_active: bool,
}

#[derive(Debug)]
struct EndpointEntry {
    url: String,
    stats: EndpointStats,
}

impl EndpointEntry {
    fn new(url: String) -> Self {
        Self { url, stats: EndpointStats { is_active: true, ..EndpointStats::default() } }
    }

    /// Composite health score in [0, 1].
    ///
    /// Untested endpoints score a neutral 0.5. Otherwise: 70% success rate,
    /// minus a latency penalty capped at 0.2, minus 0.1 per consecutive
    /// failure capped at 0.5, floored at zero.
    fn health_score(&self) -> f64 {
        let s = &self.stats;
        let total = s.success_count + s.failure_count;
        if total == 0 {
            return 0.5;
        }
        let success_rate = s.success_count as f64 / total as f64;
        let latency_penalty = (s.avg_response_time / 10.0).min(0.2);
        let failure_penalty = (f64::from(s.consecutive_failures) * 0.1).min(0.5);
        (success_rate * 0.7 - latency_penalty - failure_penalty).max(0.0)
    }
}

struct PoolInner {
    endpoints: Vec<EndpointEntry>,
    rr_cursor: usize,
}

/// A pool of candidate endpoints with per-endpoint health stats.
///
/// Instantiated twice in practice: once for the lookup mirror URLs and once
/// for the outbound proxy rotation. Mutation happens only after a request
/// completes, from the scheduler's single logical thread of control.
pub struct EndpointPool {
    inner: RwLock<PoolInner>,
}

impl EndpointPool {
    pub fn new(urls: impl IntoIterator<Item = String>) -> Self {
        let endpoints = urls.into_iter().map(EndpointEntry::new).collect();
        Self { inner: RwLock::new(PoolInner { endpoints, rr_cursor: 0 }) }
    }

    pub fn len(&self) -> usize {
        self.inner.read().endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().endpoints.is_empty()
    }

    /// Add an endpoint. Returns false if it is already in the pool.
    pub fn add(&self, url: &str) -> bool {
        let mut inner = self.inner.write();
        if inner.endpoints.iter().any(|e| e.url == url) {
            return false;
        }
        inner.endpoints.push(EndpointEntry::new(url.to_string()));
        true
    }

    /// Remove an endpoint. Returns false if it was not in the pool.
    pub fn remove(&self, url: &str) -> bool {
        let mut inner = self.inner.write();
        let before = inner.endpoints.len();
        inner.endpoints.retain(|e| e.url != url);
        inner.endpoints.len() != before
    }

    /// Choose an endpoint for the next request.
    ///
    /// Returns `None` only when the pool is empty. If every endpoint has been
    /// deactivated, the whole pool is reset to active first so a candidate can
    /// always be produced.
    pub fn choose(&self, strategy: SelectionStrategy) -> Option<String> {
        let mut inner = self.inner.write();
        if inner.endpoints.is_empty() {
            return None;
        }

        if inner.endpoints.iter().all(|e| !e.stats.is_active) {
            tracing::warn!("all endpoints deactivated, resetting pool to active");
            for e in &mut inner.endpoints {
                e.stats.is_active = true;
            }
        }

        let active: Vec<usize> = inner
            .endpoints
            .iter()
            .enumerate()
            .filter(|(_, e)| e.stats.is_active)
            .map(|(i, _)| i)
            .collect();

        let idx = match strategy {
            SelectionStrategy::RoundRobin => {
                let pos = inner.rr_cursor % active.len();
                inner.rr_cursor = inner.rr_cursor.wrapping_add(1);
                active[pos]
            }
            SelectionStrategy::Random => active[rand::thread_rng().gen_range(0..active.len())],
            SelectionStrategy::HealthBased => {
                // Max score; ties break toward pool order.
                let mut best = active[0];
                let mut best_score = inner.endpoints[best].health_score();
                for &i in &active[1..] {
                    let score = inner.endpoints[i].health_score();
                    if score > best_score {
                        best = i;
                        best_score = score;
                    }
                }
                best
            }
        };

        Some(inner.endpoints[idx].url.clone())
    }

    /// Record a successful request through `url`.
    pub fn mark_success(&self, url: &str, response_time: f64) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.endpoints.iter_mut().find(|e| e.url == url) {
            let s = &mut entry.stats;
            s.success_count += 1;
            s.consecutive_failures = 0;
            s.is_active = true;
            s.last_success = Some(Utc::now());
            s.total_response_time += response_time;
            s.avg_response_time = s.total_response_time / s.success_count as f64;
        }
    }

    /// Record a failed request through `url`, deactivating it at the threshold.
    pub fn mark_failure(&self, url: &str) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.endpoints.iter_mut().find(|e| e.url == url) {
            let s = &mut entry.stats;
            s.failure_count += 1;
            s.consecutive_failures += 1;
            s.last_failure = Some(Utc::now());
            if s.consecutive_failures >= DEACTIVATION_THRESHOLD {
                s.is_active = false;
                tracing::warn!(
                    endpoint = %entry.url,
                    failures = s.consecutive_failures,
                    "endpoint deactivated after consecutive failures"
                );
            }
        }
    }

    /// Seed stats persisted by a previous run.
    pub fn restore_stats(&self, url: &str, success_count: u64, failure_count: u64, avg_rt: f64) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.endpoints.iter_mut().find(|e| e.url == url) {
            let s = &mut entry.stats;
            s.success_count = success_count;
            s.failure_count = failure_count;
            s.avg_response_time = avg_rt;
            s.total_response_time = avg_rt * success_count as f64;
        }
    }

    /// Statistics for every endpoint, sorted by success rate descending.
    pub fn snapshots(&self) -> Vec<EndpointStatsSnapshot> {
        let inner = self.inner.read();
        let mut out: Vec<EndpointStatsSnapshot> = inner
            .endpoints
            .iter()
            .map(|e| {
                let s = &e.stats;
                let total = s.success_count + s.failure_count;
                let success_rate = if total > 0 {
                    s.success_count as f64 / total as f64 * 100.0
                } else {
                    0.0
                };
                EndpointStatsSnapshot {
                    url: e.url.clone(),
                    success_count: s.success_count,
                    failure_count: s.failure_count,
                    success_rate,
                    avg_response_time: s.avg_response_time,
                    consecutive_failures: s.consecutive_failures,
                    is_active: s.is_active,
                    last_success: s.last_success,
                    last_failure: s.last_failure,
                }
            })
            .collect();
        out.sort_by(|a, b| {
            b.success_rate.partial_cmp(&a.success_rate).unwrap_or(std::cmp::Ordering::Equal)
        });
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn pool(urls: &[&str]) -> EndpointPool {
        EndpointPool::new(urls.iter().map(|s| (*s).to_string()))
    }

    #[test]
    fn test_untested_endpoint_scores_neutral() {
        let entry = EndpointEntry::new("http://a".to_string());
        assert!((entry.health_score() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_score_non_increasing_in_consecutive_failures() {
        let mut entry = EndpointEntry::new("http://a".to_string());
        entry.stats.success_count = 8;
        entry.stats.failure_count = 2;
        entry.stats.avg_response_time = 0.5;

        let mut prev = entry.health_score();
        for n in 1..=8 {
            entry.stats.consecutive_failures = n;
            let score = entry.health_score();
            assert!(score <= prev, "score rose at n={n}");
            prev = score;
        }
    }

    #[test]
    fn test_deactivation_after_three_failures_and_recovery() {
        let p = pool(&["http://a"]);
        for _ in 0..3 {
            p.mark_failure("http://a");
        }
        assert!(!p.snapshots()[0].is_active);

        p.mark_success("http://a", 0.2);
        let snap = &p.snapshots()[0];
        assert!(snap.is_active);
        assert_eq!(snap.consecutive_failures, 0);
    }

    #[test]
    fn test_choose_resets_exhausted_pool() {
        let p = pool(&["http://a", "http://b"]);
        for url in ["http://a", "http://b"] {
            for _ in 0..3 {
                p.mark_failure(url);
            }
        }
        assert!(p.snapshots().iter().all(|s| !s.is_active));

        let chosen = p.choose(SelectionStrategy::HealthBased);
        assert!(chosen.is_some());
        assert!(p.snapshots().iter().all(|s| s.is_active));
    }

    #[test]
    fn test_health_based_avoids_failing_endpoint() {
        let p = pool(&["http://a", "http://b"]);
        p.mark_success("http://b", 0.3);
        for _ in 0..3 {
            p.mark_failure("http://a");
        }
        // A is deactivated; only B remains eligible.
        for _ in 0..5 {
            assert_eq!(p.choose(SelectionStrategy::HealthBased).unwrap(), "http://b");
        }

        // B also fails out; the pool resets and both become eligible again.
        for _ in 0..3 {
            p.mark_failure("http://b");
        }
        let chosen = p.choose(SelectionStrategy::HealthBased).unwrap();
        assert!(chosen == "http://a" || chosen == "http://b");
    }

    #[test]
    fn test_round_robin_cycles_active_subset() {
        let p = pool(&["http://a", "http://b", "http://c"]);
        let first = p.choose(SelectionStrategy::RoundRobin).unwrap();
        let second = p.choose(SelectionStrategy::RoundRobin).unwrap();
        let third = p.choose(SelectionStrategy::RoundRobin).unwrap();
        let again = p.choose(SelectionStrategy::RoundRobin).unwrap();
        assert_ne!(first, second);
        assert_ne!(second, third);
        assert_eq!(first, again);
    }

    #[test]
    fn test_avg_response_time_running_average() {
        let p = pool(&["http://a"]);
        p.mark_success("http://a", 1.0);
        p.mark_success("http://a", 3.0);
        let snap = &p.snapshots()[0];
        assert!((snap.avg_response_time - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_add_rejects_duplicates_and_remove() {
        let p = pool(&[]);
        assert!(p.add("http://a"));
        assert!(!p.add("http://a"));
        assert!(p.remove("http://a"));
        assert!(!p.remove("http://a"));
        assert_eq!(p.choose(SelectionStrategy::HealthBased), None);
    }
}
