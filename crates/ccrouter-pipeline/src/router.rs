//! LoadBalancerRouter: round-robin selection with per-pipeline blacklisting
//!
//! Each virtual model owns an independent pool; picks, outcome accounting,
//! and blacklist checks for one pool never block on another. Emitted events
//! (`destroyPipelineRequired`, `authenticationRequired`, `pipelineReactivated`
//! in the original emit/listen design) are a typed channel instead of callbacks.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use ccrouter_config::BlacklistConfig;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::PipelineError;

/// Events the router emits as a side effect of outcome accounting
#[derive(Debug, Clone)]
pub enum RouterEvent {
    /// Consecutive transient errors hit the threshold; the pipeline should be torn down
    DestroyPipelineRequired {
        /// Pipeline that tripped the threshold
        pipeline_id: String,
    },
    /// The upstream rejected the pipeline's credential; it will never be picked again
    AuthenticationRequired {
        /// Pipeline whose credential failed
        pipeline_id: String,
    },
    /// A previously-blacklisted pipeline succeeded again and had its counters reset
    PipelineReactivated {
        /// Pipeline that came back
        pipeline_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlacklistUntil {
    Timed(Instant),
    Forever,
}

impl BlacklistUntil {
    fn is_active(self, now: Instant) -> bool {
        match self {
            Self::Timed(until) => until > now,
            Self::Forever => true,
        }
    }
}

#[derive(Debug, Default)]
struct PipelineRouteState {
    consecutive_errors: u32,
    blacklist_until: Option<BlacklistUntil>,
    last_auth_failure_time: Option<Instant>,
}

struct PipelinePool {
    /// Registration order; stable so round-robin is deterministic
    members: Vec<String>,
    state: HashMap<String, PipelineRouteState>,
    thresholds: HashMap<String, BlacklistConfig>,
    cursor: usize,
}

impl PipelinePool {
    fn new() -> Self {
        Self {
            members: Vec::new(),
            state: HashMap::new(),
            thresholds: HashMap::new(),
            cursor: 0,
        }
    }

    fn register(&mut self, pipeline_id: String, thresholds: BlacklistConfig) {
        if !self.members.contains(&pipeline_id) {
            self.members.push(pipeline_id.clone());
        }
        self.state.entry(pipeline_id.clone()).or_default();
        self.thresholds.insert(pipeline_id, thresholds);
    }

    /// Drop a pipeline from this pool; `true` if it was a member
    fn unregister(&mut self, pipeline_id: &str) -> bool {
        let was_member = self.members.iter().any(|id| id == pipeline_id);
        self.members.retain(|id| id != pipeline_id);
        self.state.remove(pipeline_id);
        self.thresholds.remove(pipeline_id);
        was_member
    }

    /// Advance the cursor modulo the non-blacklisted set and return its pick; wraps silently
    fn pick(&mut self, now: Instant) -> Option<String> {
        let available: Vec<&String> = self
            .members
            .iter()
            .filter(|id| !self.state.get(*id).is_some_and(|s| s.blacklist_until.is_some_and(|b| b.is_active(now))))
            .collect();

        if available.is_empty() {
            return None;
        }

        let idx = self.cursor % available.len();
        self.cursor = self.cursor.wrapping_add(1);
        Some(available[idx].clone())
    }
}

/// Round-robin router with per-pool blacklisting, one pool per virtual model
pub struct LoadBalancerRouter {
    pools: DashMap<String, std::sync::Mutex<PipelinePool>>,
    events: mpsc::UnboundedSender<RouterEvent>,
}

impl LoadBalancerRouter {
    /// A router with no pools yet, and the receiving end of its event channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RouterEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                pools: DashMap::new(),
                events: tx,
            },
            rx,
        )
    }

    /// Add a pipeline to a virtual model's pool
    pub fn register(&self, virtual_model: &str, pipeline_id: &str, thresholds: BlacklistConfig) {
        self.pools
            .entry(virtual_model.to_owned())
            .or_insert_with(|| std::sync::Mutex::new(PipelinePool::new()))
            .lock()
            .expect("pool mutex poisoned")
            .register(pipeline_id.to_owned(), thresholds);
    }

    /// Remove a pipeline from every pool that references it
    ///
    /// `destroy_pipeline` only knows the pipeline id, not which virtual models
    /// route to it, so every pool is checked; a pipeline shared across virtual
    /// models (via `PipelineManager::build_all`'s dedup) is removed from all of them.
    pub fn unregister(&self, pipeline_id: &str) {
        for entry in self.pools.iter() {
            let mut pool = entry.value().lock().expect("pool mutex poisoned");
            if pool.unregister(pipeline_id) {
                info!(pipeline_id, "pipeline removed from router pool");
            }
        }
    }

    /// Select the next pipeline for a virtual model
    ///
    /// # Errors
    ///
    /// Returns `NoRoute` if the virtual model has no pool, or every member is
    /// currently blacklisted.
    pub fn pick(&self, virtual_model: &str) -> Result<String, PipelineError> {
        let pool = self.pools.get(virtual_model).ok_or(PipelineError::NoRoute)?;
        let mut pool = pool.lock().expect("pool mutex poisoned");
        pool.pick(Instant::now()).ok_or(PipelineError::NoRoute)
    }

    /// Record the outcome of one `execute` call against `pipeline_id` in `virtual_model`'s pool
    pub fn report_outcome(&self, virtual_model: &str, pipeline_id: &str, outcome: &Result<(), PipelineError>) {
        let Some(pool) = self.pools.get(virtual_model) else {
            warn!(virtual_model, pipeline_id, "reported outcome for an unknown virtual model pool");
            return;
        };
        let mut pool = pool.lock().expect("pool mutex poisoned");

        match outcome {
            Ok(()) => self.record_success(&mut pool, pipeline_id),
            Err(e) if e.is_rate_limited() => self.record_rate_limited(&mut pool, pipeline_id, e),
            Err(e) if e.is_auth_failure() => self.record_auth_failure(&mut pool, pipeline_id),
            Err(_) => self.record_transient(&mut pool, pipeline_id),
        }
    }

    fn record_success(&self, pool: &mut PipelinePool, pipeline_id: &str) {
        let was_blacklisted = pool.state.get(pipeline_id).is_some_and(|s| s.blacklist_until.is_some());
        if let Some(state) = pool.state.get_mut(pipeline_id) {
            state.consecutive_errors = 0;
            state.blacklist_until = None;
            state.last_auth_failure_time = None;
        }
        if was_blacklisted {
            info!(pipeline_id, "pipeline reactivated after a successful request");
            let _ = self.events.send(RouterEvent::PipelineReactivated {
                pipeline_id: pipeline_id.to_owned(),
            });
        }
    }

    fn record_transient(&self, pool: &mut PipelinePool, pipeline_id: &str) {
        let threshold = pool.thresholds.get(pipeline_id).map_or(3, |t| t.error_threshold);
        let blacklist_seconds = pool.thresholds.get(pipeline_id).map_or(300, |t| t.error_blacklist_seconds);

        let Some(state) = pool.state.get_mut(pipeline_id) else { return };
        state.consecutive_errors += 1;

        if state.consecutive_errors >= threshold {
            state.blacklist_until = Some(BlacklistUntil::Timed(Instant::now() + Duration::from_secs(blacklist_seconds)));
            state.consecutive_errors = 0;
            warn!(pipeline_id, threshold, "pipeline blacklisted after consecutive transient errors");
            let _ = self.events.send(RouterEvent::DestroyPipelineRequired {
                pipeline_id: pipeline_id.to_owned(),
            });
        }
    }

    fn record_rate_limited(&self, pool: &mut PipelinePool, pipeline_id: &str, error: &PipelineError) {
        let retry_after = if let PipelineError::UpstreamRateLimited { retry_after } = error {
            *retry_after
        } else {
            pool.thresholds.get(pipeline_id).map_or(60, |t| t.rate_limit_blacklist_seconds)
        };
        if let Some(state) = pool.state.get_mut(pipeline_id) {
            state.blacklist_until = Some(BlacklistUntil::Timed(Instant::now() + Duration::from_secs(retry_after)));
        }
        info!(pipeline_id, retry_after, "pipeline rate-limited, blacklisted unconditionally");
    }

    fn record_auth_failure(&self, pool: &mut PipelinePool, pipeline_id: &str) {
        if let Some(state) = pool.state.get_mut(pipeline_id) {
            state.blacklist_until = Some(BlacklistUntil::Forever);
            state.last_auth_failure_time = Some(Instant::now());
        }
        warn!(pipeline_id, "pipeline permanently blacklisted after an authentication failure");
        let _ = self.events.send(RouterEvent::AuthenticationRequired {
            pipeline_id: pipeline_id.to_owned(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> BlacklistConfig {
        BlacklistConfig {
            error_threshold: 3,
            error_blacklist_seconds: 300,
            rate_limit_blacklist_seconds: 60,
        }
    }

    #[test]
    fn pick_on_empty_pool_is_no_route() {
        let (router, _rx) = LoadBalancerRouter::new();
        assert!(matches!(router.pick("v1"), Err(PipelineError::NoRoute)));
    }

    #[test]
    fn round_robin_cycles_fairly_over_n_times_pool_size() {
        let (router, _rx) = LoadBalancerRouter::new();
        router.register("v1", "a", thresholds());
        router.register("v1", "b", thresholds());
        router.register("v1", "c", thresholds());

        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..9 {
            let picked = router.pick("v1").unwrap();
            *counts.entry(picked).or_default() += 1;
        }
        assert_eq!(counts.get("a"), Some(&3));
        assert_eq!(counts.get("b"), Some(&3));
        assert_eq!(counts.get("c"), Some(&3));
    }

    #[test]
    fn three_consecutive_transient_errors_blacklist_exactly_once() {
        let (router, mut rx) = LoadBalancerRouter::new();
        router.register("v1", "a", thresholds());

        for _ in 0..3 {
            router.report_outcome("v1", "a", &Err(PipelineError::UpstreamTimeout));
        }

        assert!(matches!(router.pick("v1"), Err(PipelineError::NoRoute)));
        let event = rx.try_recv().unwrap();
        assert!(matches!(event, RouterEvent::DestroyPipelineRequired { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn auth_failure_blacklists_permanently_without_destroy_event() {
        let (router, mut rx) = LoadBalancerRouter::new();
        router.register("v1", "a", thresholds());

        router.report_outcome("v1", "a", &Err(PipelineError::UpstreamAuth));

        assert!(matches!(router.pick("v1"), Err(PipelineError::NoRoute)));
        let event = rx.try_recv().unwrap();
        assert!(matches!(event, RouterEvent::AuthenticationRequired { .. }));
    }

    #[test]
    fn rate_limit_blacklists_without_destroy_event_and_recovers() {
        let (router, mut rx) = LoadBalancerRouter::new();
        router.register("v1", "a", thresholds());
        router.register("v1", "b", thresholds());

        router.report_outcome("v1", "a", &Err(PipelineError::UpstreamRateLimited { retry_after: 0 }));

        // retry_after of 0 means the blacklist window has already elapsed
        std::thread::sleep(Duration::from_millis(5));
        let picked = router.pick("v1").unwrap();
        assert!(picked == "a" || picked == "b");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn success_after_blacklist_emits_reactivation_and_resets_once() {
        let (router, mut rx) = LoadBalancerRouter::new();
        router.register("v1", "a", thresholds());

        for _ in 0..3 {
            router.report_outcome("v1", "a", &Err(PipelineError::UpstreamTimeout));
        }
        let _ = rx.try_recv();

        // simulate the blacklist window elapsing, then a later success
        router.report_outcome("v1", "a", &Ok(()));
        let event = rx.try_recv().unwrap();
        assert!(matches!(event, RouterEvent::PipelineReactivated { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unregister_removes_pipeline_from_every_pool_it_was_registered_in() {
        let (router, _rx) = LoadBalancerRouter::new();
        router.register("v1", "a", thresholds());
        router.register("v1", "b", thresholds());
        router.register("v2", "a", thresholds());

        router.unregister("a");

        assert_eq!(router.pick("v1").unwrap(), "b");
        assert!(matches!(router.pick("v2"), Err(PipelineError::NoRoute)));
    }

    #[test]
    fn unregister_of_unknown_pipeline_is_a_no_op() {
        let (router, _rx) = LoadBalancerRouter::new();
        router.register("v1", "a", thresholds());
        router.unregister("missing");
        assert_eq!(router.pick("v1").unwrap(), "a");
    }

    #[test]
    fn pool_of_one_wraps_back_to_itself() {
        let (router, _rx) = LoadBalancerRouter::new();
        router.register("v1", "only", thresholds());
        for _ in 0..5 {
            assert_eq!(router.pick("v1").unwrap(), "only");
        }
    }
}
