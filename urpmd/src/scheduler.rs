//! Background task scheduler.
//!
//! One task loop drives two periodic jobs, `metadata_check` and
//! `predownload` (cache cleanup is not scheduled here; it runs at the tail of
//! each successful pre-download). All delays are quantized to the tick
//! interval, so a logged "next run in 30s" means exactly 30s, and jitter
//! spreads a fleet of hosts that booted together.
//!
//! The scheduler owns its own database handle: it opens the store when its
//! task starts and closes it on shutdown.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use urpm_core::freshness::FreshnessProber;
use urpm_core::ports::MediaSync;
use urpm_core::store::PackageStore;

use crate::config::{DaemonConfig, ScheduleParams};
use crate::predownload::PredownloadEngine;

/// Jitter applied to every scheduling decision.
const JITTER_FACTOR: f64 = 0.30;

/// Fixed delay before the first task evaluation, so the rest of the daemon
/// finishes initializing.
const STARTUP_GRACE: Duration = Duration::from_secs(10);

/// The two independently scheduled task identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskId {
    MetadataCheck,
    Predownload,
}

impl TaskId {
    /// Evaluation order within one tick: freshness before speculative
    /// download.
    const ORDERED: [TaskId; 2] = [TaskId::MetadataCheck, TaskId::Predownload];

    fn name(self) -> &'static str {
        match self {
            TaskId::MetadataCheck => "metadata_check",
            TaskId::Predownload => "predownload",
        }
    }
}

/// Per-task schedule state. Ephemeral; rebuilt on every daemon start.
#[derive(Debug)]
struct TaskState {
    base_interval: Duration,
    next_fire: Option<Instant>,
    last_fire: Option<Instant>,
}

impl TaskState {
    fn new(base_interval: Duration) -> Self {
        Self {
            base_interval,
            next_fire: None,
            last_fire: None,
        }
    }
}

/// Apply jitter to a base interval, then quantize to whole ticks.
///
/// `raw = base × (1 + ε)`, ε uniform in ±[`JITTER_FACTOR`]; the result is
/// `max(1, round(raw / tick))` ticks.
fn jittered_delay(base: Duration, tick: Duration, rng: &mut impl Rng) -> Duration {
    let epsilon = rng.random_range(-JITTER_FACTOR..=JITTER_FACTOR);
    let raw = base.as_secs_f64() * (1.0 + epsilon);
    quantize(raw, tick)
}

/// Round a raw delay in seconds to a whole, nonzero number of ticks.
fn quantize(raw_secs: f64, tick: Duration) -> Duration {
    let ticks = ((raw_secs / tick.as_secs_f64()).round() as u32).max(1);
    tick * ticks
}

/// First-fire offset: uniform in `[1, max(1, ⌊0.5 × base / tick⌋)]` ticks.
/// Hosts restarted together must not stampede upstream.
fn initial_delay(base: Duration, tick: Duration, rng: &mut impl Rng) -> Duration {
    let max_ticks = ((base.as_secs_f64() * 0.5 / tick.as_secs_f64()).floor() as u32).max(1);
    let ticks = rng.random_range(1..=max_ticks);
    tick * ticks
}

/// The scheduler task. Constructed by the daemon, consumed by [`Scheduler::run`]
/// inside its own spawned task.
pub struct Scheduler {
    db_path: PathBuf,
    params: ScheduleParams,
    sync: Arc<dyn MediaSync>,
    prober: FreshnessProber,
    engine: PredownloadEngine,
    shutdown: watch::Receiver<bool>,
    tasks: HashMap<TaskId, TaskState>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("db_path", &self.db_path)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(
        config: &DaemonConfig,
        sync: Arc<dyn MediaSync>,
        prober: FreshnessProber,
        engine: PredownloadEngine,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let params = config.schedule;
        let tasks = HashMap::from([
            (
                TaskId::MetadataCheck,
                TaskState::new(params.metadata_interval),
            ),
            (TaskId::Predownload, TaskState::new(params.predownload_interval)),
        ]);
        Self {
            db_path: config.db_path.clone(),
            params,
            sync,
            prober,
            engine,
            shutdown,
            tasks,
        }
    }

    /// Main scheduler loop. Runs until the shutdown flag flips, then closes
    /// its store handle.
    pub async fn run(mut self) {
        info!(
            "scheduler started (tick={}s, metadata={}s, predownload={}s)",
            self.params.tick.as_secs(),
            self.params.metadata_interval.as_secs(),
            self.params.predownload_interval.as_secs()
        );

        self.interruptible_sleep(STARTUP_GRACE).await;
        if *self.shutdown.borrow() {
            return;
        }

        debug!("scheduler opening database: {}", self.db_path.display());
        let store = match PackageStore::open(&self.db_path).await {
            Ok(store) => store,
            Err(e) => {
                error!("scheduler could not open package store: {}", e);
                return;
            }
        };

        while !*self.shutdown.borrow() {
            self.check_tasks(&store).await;
            self.interruptible_sleep(self.params.tick).await;
        }

        store.close().await;
        info!("scheduler stopped");
    }

    /// Run every due task, metadata first, rescheduling each regardless of
    /// task success.
    async fn check_tasks(&mut self, store: &PackageStore) {
        let now = Instant::now();
        for task in TaskId::ORDERED {
            if !self.task_due(task, now) {
                continue;
            }

            self.run_task(task, store).await;

            let state = self.tasks.get_mut(&task).expect("task state exists");
            let since_last = state
                .last_fire
                .map(|t| now.duration_since(t).as_secs())
                .unwrap_or(0);
            state.last_fire = Some(now);
            let delay = jittered_delay(state.base_interval, self.params.tick, &mut rand::rng());
            state.next_fire = Some(now + delay);
            debug!(
                "task {}: next run in {}s ({} ticks, {}s since previous run)",
                task.name(),
                delay.as_secs(),
                delay.as_secs() / self.params.tick.as_secs().max(1),
                since_last
            );
        }
    }

    /// Whether `task` should run now. The first call schedules the initial
    /// offset instead of firing.
    fn task_due(&mut self, task: TaskId, now: Instant) -> bool {
        let tick = self.params.tick;
        let state = self.tasks.get_mut(&task).expect("task state exists");
        match state.next_fire {
            Some(next) => now >= next,
            None => {
                let offset = initial_delay(state.base_interval, tick, &mut rand::rng());
                state.next_fire = Some(now + offset);
                debug!(
                    "task {}: first run in {}s",
                    task.name(),
                    offset.as_secs()
                );
                false
            }
        }
    }

    async fn run_task(&self, task: TaskId, store: &PackageStore) {
        info!("running scheduled task {}", task.name());
        match task {
            TaskId::MetadataCheck => {
                match self.prober.run_check(store, self.sync.as_ref()).await {
                    Ok(summary) => debug!(
                        "metadata check: {} media checked, {} changed",
                        summary.checked, summary.changed
                    ),
                    Err(e) => warn!("metadata check skipped: {}", e),
                }
            }
            TaskId::Predownload => match self.engine.run(store).await {
                Ok(run) => debug!("predownload finished: {:?}", run),
                Err(e) => warn!("predownload skipped: {}", e),
            },
        }
    }

    /// Sleep in 1s slices so shutdown is observed within a second.
    async fn interruptible_sleep(&mut self, total: Duration) {
        let mut remaining = total;
        while !remaining.is_zero() {
            if *self.shutdown.borrow() {
                return;
            }
            let slice = remaining.min(Duration::from_secs(1));
            tokio::time::sleep(slice).await;
            remaining -= slice;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const TICK: Duration = Duration::from_secs(10);

    #[test]
    fn delays_are_always_whole_ticks() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let delay = jittered_delay(Duration::from_secs(60), TICK, &mut rng);
            assert_eq!(delay.as_secs() % TICK.as_secs(), 0);
            assert!(delay >= TICK);
        }
    }

    #[test]
    fn jitter_stays_within_bound_plus_one_slot() {
        let base = Duration::from_secs(3600);
        let tick = Duration::from_secs(60);
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let delay = jittered_delay(base, tick, &mut rng).as_secs_f64();
            let bound = base.as_secs_f64() * JITTER_FACTOR + tick.as_secs_f64();
            assert!((delay - base.as_secs_f64()).abs() <= bound);
        }
    }

    #[test]
    fn quantization_rounds_to_nearest_tick() {
        // base=120s with ε=+0.15: raw=138s, 13.8 ticks rounds to 14 → 140s.
        assert_eq!(quantize(138.0, TICK), Duration::from_secs(140));
        assert_eq!(quantize(134.9, TICK), Duration::from_secs(130));
        // Never below one tick.
        assert_eq!(quantize(0.5, TICK), TICK);
    }

    #[test]
    fn first_fire_offset_spans_one_to_half_interval() {
        // tick=10, base=60: max initial ticks = floor(60 × 0.5 / 10) = 3.
        let base = Duration::from_secs(60);
        let mut rng = StdRng::seed_from_u64(1);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let delay = initial_delay(base, TICK, &mut rng);
            let secs = delay.as_secs();
            assert!([10, 20, 30].contains(&secs), "unexpected offset {secs}");
            seen.insert(secs);
        }
        // All three slots are reachable.
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn tiny_intervals_still_get_one_tick_offset() {
        let mut rng = StdRng::seed_from_u64(3);
        let delay = initial_delay(Duration::from_secs(5), TICK, &mut rng);
        assert_eq!(delay, TICK);
    }
}
