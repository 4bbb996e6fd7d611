//! Lock-free request statistics.
//!
//! [`Statistics`] keeps the global total/in-flight pair and one [`RouteStat`] per registered
//! route. Every counter is an atomic updated independently, so a reader may observe a route
//! whose fields come from slightly different moments. That is acceptable for diagnostics.
//!
//! The average latency is `used_time / count`, recomputed on every update.

use http::StatusCode;
use serde::Serialize;
use std::cmp::Reverse;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters of a single route, shared by every request to it.
#[derive(Debug, Default)]
pub struct RouteStat {
    path: String,
    count: AtomicU64,
    count_ok: AtomicU64,
    count_4xx: AtomicU64,
    count_5xx: AtomicU64,
    /// nanoseconds
    used_time: AtomicU64,
    max_time: AtomicU64,
    average_time: AtomicU64,
}

impl RouteStat {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), ..Self::default() }
    }

    /// Records one completed request.
    pub fn record(&self, status: StatusCode, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);

        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        let outcome = match status.as_u16() {
            0..400 => &self.count_ok,
            400..500 => &self.count_4xx,
            _ => &self.count_5xx,
        };
        outcome.fetch_add(1, Ordering::Relaxed);

        let used = self.used_time.fetch_add(nanos, Ordering::Relaxed).wrapping_add(nanos);
        self.max_time.fetch_max(nanos, Ordering::Relaxed);
        self.average_time.store(used / count, Ordering::Relaxed);
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn count_ok(&self) -> u64 {
        self.count_ok.load(Ordering::Relaxed)
    }

    pub fn count_4xx(&self) -> u64 {
        self.count_4xx.load(Ordering::Relaxed)
    }

    pub fn count_5xx(&self) -> u64 {
        self.count_5xx.load(Ordering::Relaxed)
    }

    pub fn count_errs(&self) -> u64 {
        self.count_4xx() + self.count_5xx()
    }

    pub fn used_time(&self) -> Duration {
        Duration::from_nanos(self.used_time.load(Ordering::Relaxed))
    }

    pub fn max_time(&self) -> Duration {
        Duration::from_nanos(self.max_time.load(Ordering::Relaxed))
    }

    pub fn average_time(&self) -> Duration {
        Duration::from_nanos(self.average_time.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> RouteSnapshot {
        RouteSnapshot {
            path: self.path.clone(),
            count: self.count(),
            count_ok: self.count_ok(),
            count_4xx: self.count_4xx(),
            count_5xx: self.count_5xx(),
            average_time_ns: self.average_time.load(Ordering::Relaxed),
            max_time_ns: self.max_time.load(Ordering::Relaxed),
            used_time_ns: self.used_time.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for RouteStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<40}\t count={},\t countok={},\t count4xx={},\t count5xx={},\t averagetime={:?},\t maxtime={:?},\t usedtime={:?}",
            format!("[{}],", self.path),
            self.count(),
            self.count_ok(),
            self.count_4xx(),
            self.count_5xx(),
            self.average_time(),
            self.max_time(),
            self.used_time(),
        )
    }
}

/// A serializable copy of one route's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteSnapshot {
    pub path: String,
    pub count: u64,
    pub count_ok: u64,
    pub count_4xx: u64,
    pub count_5xx: u64,
    pub average_time_ns: u64,
    pub max_time_ns: u64,
    pub used_time_ns: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatSnapshot {
    pub total: u64,
    pub handling: u64,
    pub routes: Vec<RouteSnapshot>,
}

/// Process wide counters plus the stat of every registered route.
#[derive(Debug, Default)]
pub struct Statistics {
    total: AtomicU64,
    handling: AtomicU64,
    routes: Vec<Arc<RouteStat>>,
}

#[derive(Debug)]
pub struct InFlight<'a> {
    stats: &'a Statistics,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.stats.handling.fetch_sub(1, Ordering::Relaxed);
    }
}

impl Statistics {
    pub fn new(routes: Vec<Arc<RouteStat>>) -> Self {
        Self { total: AtomicU64::new(0), handling: AtomicU64::new(0), routes }
    }

    /// Counts a request as started. It stays in flight until the returned guard drops,
    /// including when the request unwinds.
    #[must_use = "the request is counted as done as soon as the guard drops"]
    pub fn on_serve(&self) -> InFlight<'_> {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.handling.fetch_add(1, Ordering::Relaxed);
        InFlight { stats: self }
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Requests currently in flight
    pub fn handling(&self) -> u64 {
        self.handling.load(Ordering::Relaxed)
    }

    /// Route stats in registration order
    pub fn routes(&self) -> &[Arc<RouteStat>] {
        &self.routes
    }

    pub fn snapshot(&self) -> StatSnapshot {
        StatSnapshot { total: self.total(), handling: self.handling(), routes: self.routes.iter().map(|r| r.snapshot()).collect() }
    }

    /// A copy of the routes sorted by `key`, largest first. Each key is read once, so
    /// concurrent updates can never break the ordering.
    fn sorted_by<K: Ord>(&self, key: impl Fn(&RouteStat) -> K) -> Vec<Arc<RouteStat>> {
        let mut routes = self.routes.clone();
        routes.sort_by_cached_key(|route| Reverse(key(route.as_ref())));
        routes
    }

    pub fn top_count(&self) -> Vec<Arc<RouteStat>> {
        self.sorted_by(RouteStat::count)
    }

    pub fn top_count_ok(&self) -> Vec<Arc<RouteStat>> {
        self.sorted_by(RouteStat::count_ok)
    }

    pub fn top_count_errs(&self) -> Vec<Arc<RouteStat>> {
        self.sorted_by(RouteStat::count_errs)
    }

    pub fn top_count_4xx(&self) -> Vec<Arc<RouteStat>> {
        self.sorted_by(RouteStat::count_4xx)
    }

    pub fn top_count_5xx(&self) -> Vec<Arc<RouteStat>> {
        self.sorted_by(RouteStat::count_5xx)
    }

    pub fn top_avg_time(&self) -> Vec<Arc<RouteStat>> {
        self.sorted_by(RouteStat::average_time)
    }

    pub fn top_max_time(&self) -> Vec<Arc<RouteStat>> {
        self.sorted_by(RouteStat::max_time)
    }

    pub fn top_used_time(&self) -> Vec<Arc<RouteStat>> {
        self.sorted_by(RouteStat::used_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn paths(routes: &[Arc<RouteStat>]) -> Vec<&str> {
        routes.iter().map(|r| r.path()).collect()
    }

    #[test]
    fn test_record_classifies_status() {
        let stat = RouteStat::new("GET /a");
        stat.record(StatusCode::OK, ms(10));
        stat.record(StatusCode::FOUND, ms(30));
        stat.record(StatusCode::NOT_FOUND, ms(20));
        stat.record(StatusCode::BAD_GATEWAY, ms(40));

        assert_eq!(stat.count(), 4);
        assert_eq!(stat.count_ok(), 2);
        assert_eq!(stat.count_4xx(), 1);
        assert_eq!(stat.count_5xx(), 1);
        assert_eq!(stat.count_errs(), 2);
        assert_eq!(stat.used_time(), ms(100));
        assert_eq!(stat.max_time(), ms(40));
        assert_eq!(stat.average_time(), ms(25));
    }

    #[test]
    fn test_leaderboards_sort_descending() {
        let a = Arc::new(RouteStat::new("a"));
        let b = Arc::new(RouteStat::new("b"));
        let c = Arc::new(RouteStat::new("c"));

        a.record(StatusCode::OK, ms(1));
        b.record(StatusCode::OK, ms(50));
        b.record(StatusCode::INTERNAL_SERVER_ERROR, ms(2));
        c.record(StatusCode::BAD_REQUEST, ms(5));
        c.record(StatusCode::BAD_REQUEST, ms(5));
        c.record(StatusCode::OK, ms(5));

        let stats = Statistics::new(vec![Arc::clone(&a), Arc::clone(&b), Arc::clone(&c)]);

        assert_eq!(paths(&stats.top_count()), ["c", "b", "a"]);
        assert_eq!(paths(&stats.top_count_ok()), ["a", "b", "c"]);
        assert_eq!(paths(&stats.top_count_errs()), ["c", "b", "a"]);
        assert_eq!(paths(&stats.top_count_4xx()), ["c", "a", "b"]);
        assert_eq!(paths(&stats.top_count_5xx()), ["b", "a", "c"]);
        assert_eq!(paths(&stats.top_avg_time()), ["b", "c", "a"]);
        assert_eq!(paths(&stats.top_max_time()), ["b", "c", "a"]);
        assert_eq!(paths(&stats.top_used_time()), ["b", "c", "a"]);

        // the live list is untouched
        assert_eq!(paths(stats.routes()), ["a", "b", "c"]);
    }

    #[test]
    fn test_concurrent_updates() {
        let stat = Arc::new(RouteStat::new("GET /hot"));
        let stats = Statistics::new(vec![Arc::clone(&stat)]);

        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..1000 {
                        let _in_flight = stats.on_serve();
                        stat.record(StatusCode::OK, Duration::from_nanos(10));
                    }
                });
            }
        });

        assert_eq!(stats.total(), 8000);
        assert_eq!(stats.handling(), 0);
        assert_eq!(stat.count(), 8000);
        assert_eq!(stat.used_time(), Duration::from_nanos(80_000));
    }

    #[test]
    fn test_snapshot_and_display() {
        let stat = Arc::new(RouteStat::new("GET /messages"));
        stat.record(StatusCode::OK, Duration::from_nanos(300));
        let stats = Statistics::new(vec![Arc::clone(&stat)]);
        let in_flight = stats.on_serve();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total, 1);
        assert_eq!(snapshot.handling, 1);
        assert_eq!(snapshot.routes[0].count, 1);
        assert_eq!(snapshot.routes[0].used_time_ns, 300);
        drop(in_flight);
        assert_eq!(stats.handling(), 0);

        let line = stat.to_string();
        assert!(line.starts_with("[GET /messages],"));
        assert!(line.contains("count=1,"));
        assert!(line.contains("count5xx=0,"));
    }
}
