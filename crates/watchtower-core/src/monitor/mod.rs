//! The polling scheduler and per-watch state machine.
//!
//! One background loop sweeps the watch queue: each pass checks every queued
//! identity with randomized pacing, feeds the verdict into that watch's state
//! machine, and fires the configured alert sink exactly once when the watched
//! transition happens. A watch leaves the queue when it alerts, when its
//! error streak hits the ceiling, or when an operator stops it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use tokio::sync::{watch, Notify};

use watchtower_types::error::MonitorError;
use watchtower_types::models::{
    AppConfig, MonitorConfig, MonitorStatsSnapshot, Profile, Verdict, WatchKind, WatchSummary,
};

use crate::client::EndpointPool;
use crate::lookup::{normalize_handle, ProfileLookup};
use crate::notify::{AlertSink, TransitionAlert};
use crate::store::EventStore;

/// Session outcomes persisted when a watch closes.
const OUTCOME_ALERTED: &str = "alerted";
const OUTCOME_ERRORED: &str = "errored";
const OUTCOME_STOPPED: &str = "stopped";

struct WatchState {
    kind: WatchKind,
    session_id: i64,
    started_at: DateTime<Utc>,
    check_count: u64,
    currently_absent: bool,
    consecutive_errors: u32,
    /// Most recent reachable profile, carried into the alert payload.
    last_profile: Option<Profile>,
}

#[derive(Default)]
struct Counters {
    total_checks: AtomicU64,
    successful_checks: AtomicU64,
    failed_checks: AtomicU64,
    disappearances: AtomicU64,
    reappearances: AtomicU64,
    proxy_errors: AtomicU64,
    api_errors: AtomicU64,
}

/// What one check concluded about the watch it belongs to.
enum CheckResolution {
    /// Watch stays queued.
    Keep,
    /// Transition detected, alert fired, watch leaves the queue.
    Alerted,
    /// Error ceiling reached, watch leaves the queue without an alert.
    Errored,
}

pub struct MonitorScheduler {
    lookup: Arc<dyn ProfileLookup>,
    store: Arc<dyn EventStore>,
    sink: Arc<dyn AlertSink>,
    proxies: EndpointPool,
    watches: DashMap<String, WatchState>,
    counters: Counters,
    config: MonitorConfig,
    owner_id: i64,
    wake: Notify,
    loop_running: AtomicBool,
}

impl MonitorScheduler {
    pub fn new(
        lookup: Arc<dyn ProfileLookup>,
        store: Arc<dyn EventStore>,
        sink: Arc<dyn AlertSink>,
        config: &AppConfig,
    ) -> Self {
        Self {
            lookup,
            store,
            sink,
            proxies: EndpointPool::new(config.proxies.iter().cloned()),
            watches: DashMap::new(),
            counters: Counters::default(),
            config: config.monitor,
            owner_id: config.owner_id,
            wake: Notify::new(),
            loop_running: AtomicBool::new(false),
        }
    }

    /// The outbound proxy pool, exposed for the endpoint-management surface.
    pub fn proxies(&self) -> &EndpointPool {
        &self.proxies
    }

    async fn authorize(&self, operator: i64) -> Result<(), MonitorError> {
        if operator == self.owner_id {
            return Ok(());
        }
        let allowed = self
            .store
            .is_authorized(operator)
            .await
            .map_err(|e| MonitorError::Store { message: e.to_string() })?;
        if allowed {
            Ok(())
        } else {
            Err(MonitorError::Unauthorized { owner: operator })
        }
    }

    /// Queue a new watch. At most one watch per handle.
    pub async fn start_watch(
        &self,
        handle: &str,
        kind: WatchKind,
        operator: i64,
    ) -> Result<(), MonitorError> {
        self.authorize(operator).await?;
        let handle = normalize_handle(handle);

        if self.watches.contains_key(&handle) {
            return Err(MonitorError::AlreadyWatching { handle });
        }
        if self.watches.len() >= self.config.max_watches {
            return Err(MonitorError::QueueFull { limit: self.config.max_watches });
        }

        let session_id = self
            .store
            .open_session(&handle, kind, operator)
            .await
            .map_err(|e| MonitorError::Store { message: e.to_string() })?;

        self.watches.insert(
            handle.clone(),
            WatchState {
                kind,
                session_id,
                started_at: Utc::now(),
                check_count: 0,
                currently_absent: kind.initial_absent_flag(),
                consecutive_errors: 0,
                last_profile: None,
            },
        );
        self.wake.notify_one();
        tracing::info!(%handle, kind = %kind, operator, "watch started");
        Ok(())
    }

    /// Remove a watch before it resolves.
    pub async fn stop_watch(&self, handle: &str, operator: i64) -> Result<(), MonitorError> {
        self.authorize(operator).await?;
        let handle = normalize_handle(handle);

        let Some((_, state)) = self.watches.remove(&handle) else {
            return Err(MonitorError::NotWatching { handle });
        };
        if let Err(err) = self.store.close_session(state.session_id, OUTCOME_STOPPED).await {
            tracing::warn!(%handle, error = %err, "failed to close stopped session");
        }
        tracing::info!(%handle, operator, "watch stopped");
        Ok(())
    }

    pub fn list_watches(&self) -> Vec<WatchSummary> {
        let mut out: Vec<WatchSummary> = self
            .watches
            .iter()
            .map(|entry| WatchSummary {
                handle: entry.key().clone(),
                kind: entry.kind,
                started_at: entry.started_at,
                check_count: entry.check_count,
                currently_absent: entry.currently_absent,
                consecutive_errors: entry.consecutive_errors,
            })
            .collect();
        out.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        out
    }

    pub fn stats(&self) -> MonitorStatsSnapshot {
        let c = &self.counters;
        MonitorStatsSnapshot {
            total_checks: c.total_checks.load(Ordering::Relaxed),
            successful_checks: c.successful_checks.load(Ordering::Relaxed),
            failed_checks: c.failed_checks.load(Ordering::Relaxed),
            disappearances_detected: c.disappearances.load(Ordering::Relaxed),
            reappearances_detected: c.reappearances.load(Ordering::Relaxed),
            proxy_errors: c.proxy_errors.load(Ordering::Relaxed),
            api_errors: c.api_errors.load(Ordering::Relaxed),
            active_watches: self.watches.len(),
            proxy_pool_size: self.proxies.len(),
        }
    }

    /// Main loop. Runs until `shutdown` flips to true; the check in flight
    /// when that happens is allowed to finish.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if self.loop_running.swap(true, Ordering::SeqCst) {
            tracing::warn!("monitor loop already running, ignoring duplicate start");
            return;
        }
        tracing::info!(
            max_watches = self.config.max_watches,
            proxies = self.proxies.len(),
            "monitor loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let handles: Vec<String> =
                self.watches.iter().map(|e| e.key().clone()).collect();

            if handles.is_empty() {
                let idle = Duration::from_secs(self.config.idle_wait_secs);
                tokio::select! {
                    _ = tokio::time::sleep(idle) => {}
                    _ = self.wake.notified() => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            for (i, handle) in handles.iter().enumerate() {
                if *shutdown.borrow() {
                    break;
                }
                self.check_watch(handle).await;

                if i + 1 < handles.len() {
                    let delay = rand_range_secs(self.config.item_delay_secs);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }

            if *shutdown.borrow() {
                break;
            }
            let pause = rand_range_secs(self.config.round_interval_secs);
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.changed() => {}
            }
        }

        self.loop_running.store(false, Ordering::SeqCst);
        tracing::info!("monitor loop stopped");
    }

    /// Poll one watch and advance its state machine.
    async fn check_watch(&self, handle: &str) {
        // The watch may have been stopped while this pass was sleeping.
        if !self.watches.contains_key(handle) {
            return;
        }

        let proxy = self.proxies.choose(Default::default());
        let mut report = self.lookup.lookup(handle, proxy.as_deref()).await;

        if let Some(ref proxy_url) = proxy {
            let proxy_failed =
                matches!(&report.verdict, Verdict::Failed(err) if err.is_endpoint_failure());
            if proxy_failed {
                self.proxies.mark_failure(proxy_url);
                self.counters.proxy_errors.fetch_add(1, Ordering::Relaxed);
                // One direct retry so a single bad exit does not burn the
                // whole check.
                tracing::debug!(%handle, proxy = %proxy_url, "retrying without proxy");
                report = self.lookup.lookup(handle, None).await;
            } else if !matches!(report.verdict, Verdict::Failed(_)) {
                self.proxies.mark_success(proxy_url, report.response_time);
            }
        }

        self.counters.total_checks.fetch_add(1, Ordering::Relaxed);

        let Some(session_id) = self.watches.get(handle).map(|s| s.session_id) else {
            return;
        };
        if let Err(err) = self
            .store
            .record_check(
                session_id,
                report.verdict.status_label(),
                report.endpoint.as_deref(),
                report.response_time,
            )
            .await
        {
            tracing::warn!(%handle, error = %err, "failed to record check");
        }

        // No awaits while the map entry is held.
        let resolution = {
            let Some(mut state) = self.watches.get_mut(handle) else {
                return;
            };
            state.check_count += 1;

            match &report.verdict {
                Verdict::Found(profile) => {
                    self.counters.successful_checks.fetch_add(1, Ordering::Relaxed);
                    state.consecutive_errors = 0;
                    state.last_profile = Some(profile.clone());
                    self.advance_state_machine(handle, &mut state, false)
                }
                Verdict::NotFound => {
                    self.counters.successful_checks.fetch_add(1, Ordering::Relaxed);
                    state.consecutive_errors = 0;
                    self.advance_state_machine(handle, &mut state, true)
                }
                Verdict::Failed(err) => {
                    self.counters.failed_checks.fetch_add(1, Ordering::Relaxed);
                    if !err.is_endpoint_failure() || proxy.is_none() {
                        self.counters.api_errors.fetch_add(1, Ordering::Relaxed);
                    }
                    state.consecutive_errors += 1;
                    tracing::warn!(
                        %handle,
                        streak = state.consecutive_errors,
                        error = %err,
                        "check failed"
                    );
                    if state.consecutive_errors >= self.config.max_consecutive_errors {
                        CheckResolution::Errored
                    } else {
                        CheckResolution::Keep
                    }
                }
            }
        };

        match resolution {
            CheckResolution::Keep => {}
            CheckResolution::Alerted => self.close_watch(handle, OUTCOME_ALERTED).await,
            CheckResolution::Errored => {
                tracing::warn!(%handle, "watch dropped after repeated errors");
                self.close_watch(handle, OUTCOME_ERRORED).await;
            }
        }
    }

    /// Flip the absence flag and decide whether the watched transition fired.
    fn advance_state_machine(
        &self,
        handle: &str,
        state: &mut WatchState,
        absent_now: bool,
    ) -> CheckResolution {
        let was_absent = state.currently_absent;
        state.currently_absent = absent_now;

        let fired = match state.kind {
            WatchKind::Disappearance => !was_absent && absent_now,
            WatchKind::Reappearance => was_absent && !absent_now,
        };
        if !fired {
            return CheckResolution::Keep;
        }

        match state.kind {
            WatchKind::Disappearance => {
                self.counters.disappearances.fetch_add(1, Ordering::Relaxed);
            }
            WatchKind::Reappearance => {
                self.counters.reappearances.fetch_add(1, Ordering::Relaxed);
            }
        }

        let alert = TransitionAlert {
            handle: handle.to_string(),
            kind: state.kind,
            detected_at: Utc::now(),
            checks_performed: state.check_count,
            watch_duration_secs: (Utc::now() - state.started_at).num_seconds().max(0) as u64,
            last_profile: state.last_profile.clone(),
        };
        // Fire-and-record happens outside the map lock, via close_watch's
        // caller; the sink itself must not block on the watches map.
        let sink = Arc::clone(&self.sink);
        let store = Arc::clone(&self.store);
        let kind = state.kind;
        let alert_handle = handle.to_string();
        tokio::spawn(async move {
            sink.deliver(&alert).await;
            if let Err(err) = store.record_transition(&alert_handle, kind).await {
                tracing::warn!(handle = %alert_handle, error = %err, "failed to record transition");
            }
        });

        CheckResolution::Alerted
    }

    async fn close_watch(&self, handle: &str, outcome: &str) {
        if let Some((_, state)) = self.watches.remove(handle) {
            if let Err(err) = self.store.close_session(state.session_id, outcome).await {
                tracing::warn!(%handle, error = %err, "failed to close session");
            }
        }
    }
}

fn rand_range_secs((min, max): (u64, u64)) -> Duration {
    if min >= max {
        return Duration::from_secs(min);
    }
    Duration::from_secs(rand::thread_rng().gen_range(min..=max))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    use watchtower_types::error::LookupError;
    use watchtower_types::models::Profile;

    use crate::lookup::LookupReport;
    use crate::store::MemoryStore;

    /// Lookup stub fed by a script of verdicts, recording the proxy used.
    struct ScriptedLookup {
        script: Mutex<VecDeque<Verdict>>,
        proxies_seen: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedLookup {
        fn new(verdicts: Vec<Verdict>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(verdicts.into()),
                proxies_seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ProfileLookup for ScriptedLookup {
        async fn lookup(&self, _handle: &str, proxy: Option<&str>) -> LookupReport {
            self.proxies_seen.lock().push(proxy.map(str::to_string));
            let verdict = self
                .script
                .lock()
                .pop_front()
                .unwrap_or(Verdict::Failed(LookupError::NoEndpoints));
            LookupReport { verdict, endpoint: Some("test".to_string()), response_time: 0.1 }
        }
    }

    #[derive(Default)]
    struct CaptureSink {
        alerts: Mutex<Vec<TransitionAlert>>,
    }

    #[async_trait]
    impl AlertSink for CaptureSink {
        async fn deliver(&self, alert: &TransitionAlert) {
            self.alerts.lock().push(alert.clone());
        }
    }

    fn found() -> Verdict {
        Verdict::Found(Profile::placeholder("alice"))
    }

    fn failed() -> Verdict {
        Verdict::Failed(LookupError::Transport { message: "timeout".to_string() })
    }

    struct Harness {
        scheduler: Arc<MonitorScheduler>,
        lookup: Arc<ScriptedLookup>,
        store: Arc<MemoryStore>,
        sink: Arc<CaptureSink>,
    }

    fn harness(script: Vec<Verdict>, config: AppConfig) -> Harness {
        let lookup = ScriptedLookup::new(script);
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(CaptureSink::default());
        let scheduler = Arc::new(MonitorScheduler::new(
            Arc::clone(&lookup) as Arc<dyn ProfileLookup>,
            Arc::clone(&store) as Arc<dyn EventStore>,
            Arc::clone(&sink) as Arc<dyn AlertSink>,
            &config,
        ));
        Harness { scheduler, lookup, store, sink }
    }

    async fn settle() {
        // Let the spawned alert-delivery task run.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_disappearance_fires_once_and_removes_watch() {
        let h = harness(vec![found(), found(), Verdict::NotFound], AppConfig::default());
        h.scheduler.start_watch("alice", WatchKind::Disappearance, 0).await.unwrap();

        for _ in 0..3 {
            h.scheduler.check_watch("alice").await;
        }
        settle().await;

        let alerts = h.sink.alerts.lock().clone();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].handle, "alice");
        assert_eq!(alerts[0].kind, WatchKind::Disappearance);
        assert_eq!(alerts[0].checks_performed, 3);
        assert_eq!(alerts[0].last_profile.as_ref().map(|p| p.handle.as_str()), Some("alice"));

        assert!(h.scheduler.list_watches().is_empty());
        assert_eq!(h.store.transitions(), vec![("alice".to_string(), WatchKind::Disappearance)]);

        let sessions = h.store.list_sessions(10).await.unwrap();
        assert_eq!(sessions[0].outcome.as_deref(), Some(OUTCOME_ALERTED));

        let stats = h.scheduler.stats();
        assert_eq!(stats.total_checks, 3);
        assert_eq!(stats.successful_checks, 3);
        assert_eq!(stats.disappearances_detected, 1);
    }

    #[tokio::test]
    async fn test_reappearance_waits_out_absence() {
        let h = harness(vec![Verdict::NotFound, Verdict::NotFound, found()], AppConfig::default());
        h.scheduler.start_watch("bob", WatchKind::Reappearance, 0).await.unwrap();

        h.scheduler.check_watch("bob").await;
        h.scheduler.check_watch("bob").await;
        assert!(h.sink.alerts.lock().is_empty());
        assert_eq!(h.scheduler.list_watches()[0].check_count, 2);

        h.scheduler.check_watch("bob").await;
        settle().await;
        assert_eq!(h.sink.alerts.lock().len(), 1);
        assert_eq!(h.scheduler.stats().reappearances_detected, 1);
    }

    #[tokio::test]
    async fn test_error_ceiling_drops_watch_without_alert() {
        let mut config = AppConfig::default();
        config.monitor.max_consecutive_errors = 2;
        let h = harness(vec![failed(), failed()], config);
        h.scheduler.start_watch("carol", WatchKind::Disappearance, 0).await.unwrap();

        h.scheduler.check_watch("carol").await;
        assert_eq!(h.scheduler.list_watches()[0].consecutive_errors, 1);
        h.scheduler.check_watch("carol").await;

        assert!(h.sink.alerts.lock().is_empty());
        assert!(h.scheduler.list_watches().is_empty());
        let sessions = h.store.list_sessions(10).await.unwrap();
        assert_eq!(sessions[0].outcome.as_deref(), Some(OUTCOME_ERRORED));
        assert_eq!(h.scheduler.stats().failed_checks, 2);
    }

    #[tokio::test]
    async fn test_error_streak_resets_on_success() {
        let mut config = AppConfig::default();
        config.monitor.max_consecutive_errors = 2;
        let h = harness(vec![failed(), found(), failed()], config);
        h.scheduler.start_watch("dave", WatchKind::Disappearance, 0).await.unwrap();

        h.scheduler.check_watch("dave").await;
        h.scheduler.check_watch("dave").await;
        h.scheduler.check_watch("dave").await;

        // Streak went 1, 0, 1: never hit the ceiling.
        let watches = h.scheduler.list_watches();
        assert_eq!(watches.len(), 1);
        assert_eq!(watches[0].consecutive_errors, 1);
    }

    #[tokio::test]
    async fn test_proxy_failure_retries_direct() {
        let mut config = AppConfig::default();
        config.proxies = vec!["socks5://127.0.0.1:9000".to_string()];
        let h = harness(
            vec![
                Verdict::Failed(LookupError::Endpoint {
                    endpoint: "socks5://127.0.0.1:9000".to_string(),
                    message: "connect refused".to_string(),
                }),
                found(),
            ],
            config,
        );
        h.scheduler.start_watch("erin", WatchKind::Disappearance, 0).await.unwrap();
        h.scheduler.check_watch("erin").await;

        let seen = h.lookup.proxies_seen.lock().clone();
        assert_eq!(seen, vec![Some("socks5://127.0.0.1:9000".to_string()), None]);
        // The direct retry succeeded, so the check counts as one success.
        let stats = h.scheduler.stats();
        assert_eq!(stats.total_checks, 1);
        assert_eq!(stats.successful_checks, 1);
        assert_eq!(stats.proxy_errors, 1);
        assert_eq!(h.scheduler.proxies().snapshots()[0].failure_count, 1);
    }

    #[tokio::test]
    async fn test_start_watch_guards() {
        let mut config = AppConfig::default();
        config.monitor.max_watches = 1;
        let h = harness(vec![], config);

        h.scheduler.start_watch("alice", WatchKind::Disappearance, 0).await.unwrap();
        let dup = h.scheduler.start_watch("alice", WatchKind::Reappearance, 0).await;
        assert!(matches!(dup, Err(MonitorError::AlreadyWatching { .. })));

        let full = h.scheduler.start_watch("bob", WatchKind::Disappearance, 0).await;
        assert!(matches!(full, Err(MonitorError::QueueFull { limit: 1 })));

        let stop = h.scheduler.stop_watch("ghost", 0).await;
        assert!(matches!(stop, Err(MonitorError::NotWatching { .. })));
    }

    #[tokio::test]
    async fn test_unauthorized_operator_rejected() {
        let mut config = AppConfig::default();
        config.owner_id = 1;
        let h = harness(vec![], config);

        let err = h.scheduler.start_watch("alice", WatchKind::Disappearance, 42).await;
        assert!(matches!(err, Err(MonitorError::Unauthorized { owner: 42 })));

        // Granting access through the store unlocks the operation.
        h.store.add_user(42).await.unwrap();
        h.scheduler.start_watch("alice", WatchKind::Disappearance, 42).await.unwrap();
        h.scheduler.stop_watch("alice", 42).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_runs_checks_and_stops_on_shutdown() {
        let h = harness(vec![found(), Verdict::NotFound], AppConfig::default());
        h.scheduler.start_watch("alice", WatchKind::Disappearance, 0).await.unwrap();

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(Arc::clone(&h.scheduler).run(rx));

        // Two paused-clock rounds are enough to consume the script.
        for _ in 0..400 {
            tokio::task::yield_now().await;
            if h.sink.alerts.lock().len() == 1 {
                break;
            }
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        assert_eq!(h.sink.alerts.lock().len(), 1);

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_loop_start_returns_immediately() {
        let h = harness(vec![], AppConfig::default());
        let (tx, rx) = watch::channel(false);
        let first = tokio::spawn(Arc::clone(&h.scheduler).run(rx.clone()));
        // Let the first loop claim the running flag.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        // A second start must bail out instead of double-polling.
        let second = tokio::time::timeout(
            Duration::from_secs(5),
            Arc::clone(&h.scheduler).run(rx),
        )
        .await;
        assert!(second.is_ok());

        tx.send(true).unwrap();
        first.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_restarts_after_shutdown() {
        let h = harness(vec![found()], AppConfig::default());
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(Arc::clone(&h.scheduler).run(rx));
        tx.send(true).unwrap();
        task.await.unwrap();

        // The running flag cleared on exit, so a fresh loop takes over.
        h.scheduler.start_watch("alice", WatchKind::Disappearance, 0).await.unwrap();
        let (tx2, rx2) = watch::channel(false);
        let task2 = tokio::spawn(Arc::clone(&h.scheduler).run(rx2));
        for _ in 0..400 {
            tokio::task::yield_now().await;
            if h.scheduler.stats().total_checks >= 1 {
                break;
            }
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        assert!(h.scheduler.stats().total_checks >= 1);

        tx2.send(true).unwrap();
        task2.await.unwrap();
    }
}
