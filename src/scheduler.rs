use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use serde::Serialize;
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::flag;
use tracing::{debug, error, info, warn};

use crate::app::{CycleKind, CycleReport, Pipeline};
use crate::config::ResolvedConfig;
use crate::error::{FailureClass, SyncError};

const STOP_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    CheckBootstrap,
    Bootstrap,
    CheckStale,
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "lowercase")]
pub enum SkipReason {
    /// Both snapshots are younger than the staleness threshold.
    Fresh { age_secs: u64 },
    /// A previous tick is still running.
    Busy,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum TickOutcome {
    Bootstrapped(CycleReport),
    Refreshed(CycleReport),
    Skipped(SkipReason),
    Failed {
        class: FailureClass,
        message: String,
        /// Consecutive failed ticks of this class, this one included.
        consecutive: u32,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerOptions {
    pub tick_interval: Duration,
    pub staleness: Duration,
    pub escalate_after: u32,
}

impl SchedulerOptions {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            tick_interval: config.tick_interval,
            staleness: config.staleness,
            escalate_after: config.retry.escalate_after,
        }
    }
}

struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Decides on every tick whether to bootstrap, refresh or do nothing, and
/// never lets two cycles overlap.
pub struct Scheduler<P: Pipeline> {
    pipeline: P,
    options: SchedulerOptions,
    busy: AtomicBool,
    state: Mutex<SchedulerState>,
    /// Class of the current failure streak and its length.
    streak: Mutex<Option<(FailureClass, u32)>>,
}

impl<P: Pipeline> Scheduler<P> {
    pub fn new(pipeline: P, options: SchedulerOptions) -> Self {
        Self {
            pipeline,
            options,
            busy: AtomicBool::new(false),
            state: Mutex::new(SchedulerState::Idle),
            streak: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *lock(&self.state)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Length of the current failure streak if it is of `class`, else zero.
    pub fn consecutive_failures(&self, class: FailureClass) -> u32 {
        match *lock(&self.streak) {
            Some((current, count)) if current == class => count,
            _ => 0,
        }
    }

    pub fn tick(&self, now: SystemTime) -> TickOutcome {
        self.tick_with(now, false)
    }

    /// Single tick at the current time. `force` refreshes even when fresh.
    pub fn run_once(&self, force: bool) -> TickOutcome {
        self.tick_with(SystemTime::now(), force)
    }

    fn tick_with(&self, now: SystemTime, force: bool) -> TickOutcome {
        let Some(_guard) = BusyGuard::acquire(&self.busy) else {
            debug!("previous tick still running");
            return TickOutcome::Skipped(SkipReason::Busy);
        };

        self.set_state(SchedulerState::CheckBootstrap);
        let outcome = if !self.pipeline.snapshots().all_present() {
            self.set_state(SchedulerState::Bootstrap);
            info!("snapshot missing, bootstrapping");
            self.cycle(CycleKind::Bootstrap)
        } else {
            self.set_state(SchedulerState::CheckStale);
            match self.pipeline.snapshots().oldest_age(now) {
                Ok(age) if force || age > self.options.staleness => {
                    self.set_state(SchedulerState::Refresh);
                    info!(age_secs = age.as_secs(), force, "snapshots stale, refreshing");
                    self.cycle(CycleKind::Refresh)
                }
                Ok(age) => {
                    debug!(age_secs = age.as_secs(), "snapshots fresh");
                    TickOutcome::Skipped(SkipReason::Fresh {
                        age_secs: age.as_secs(),
                    })
                }
                Err(err) => self.failed(err),
            }
        };
        self.set_state(SchedulerState::Idle);
        outcome
    }

    fn cycle(&self, kind: CycleKind) -> TickOutcome {
        match self.pipeline.run_cycle(kind) {
            Ok(report) => {
                *lock(&self.streak) = None;
                info!(
                    ?kind,
                    ebal_rows = report.ebal_rows,
                    unfcc_rows = report.unfcc_rows,
                    "refresh cycle finished"
                );
                match kind {
                    CycleKind::Bootstrap => TickOutcome::Bootstrapped(report),
                    CycleKind::Refresh => TickOutcome::Refreshed(report),
                }
            }
            Err(err) => self.failed(err),
        }
    }

    fn failed(&self, err: SyncError) -> TickOutcome {
        let class = err.class();
        let consecutive = {
            let mut streak = lock(&self.streak);
            let count = match *streak {
                Some((current, count)) if current == class => count + 1,
                _ => 1,
            };
            *streak = Some((class, count));
            count
        };
        if consecutive >= self.options.escalate_after {
            error!(class = class.as_str(), consecutive, error = %err, "tick failed repeatedly");
        } else {
            warn!(class = class.as_str(), consecutive, error = %err, "tick failed");
        }
        TickOutcome::Failed {
            class,
            message: err.to_string(),
            consecutive,
        }
    }

    fn set_state(&self, state: SchedulerState) {
        *lock(&self.state) = state;
    }

    /// Ticks immediately, then every `tick_interval`, until `stop` is set.
    /// A panicking tick is logged and the loop keeps going.
    pub fn run(&self, stop: &AtomicBool) {
        info!(
            interval_secs = self.options.tick_interval.as_secs(),
            staleness_secs = self.options.staleness.as_secs(),
            "scheduler started"
        );
        while !stop.load(Ordering::Acquire) {
            let started = Instant::now();
            if panic::catch_unwind(AssertUnwindSafe(|| self.tick(SystemTime::now()))).is_err() {
                error!("tick panicked");
                self.set_state(SchedulerState::Idle);
            }
            let deadline = started + self.options.tick_interval;
            loop {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                thread::sleep((deadline - now).min(STOP_POLL));
            }
        }
        info!("scheduler stopped");
    }
}

/// Stop flag raised by the termination signals (SIGTERM, SIGINT and SIGQUIT on
/// Unix). The first signal lets the running cycle finish and ends [`Scheduler::run`]
/// at the next tick boundary; a second one terminates the process.
pub fn stop_on_termination() -> Result<Arc<AtomicBool>, SyncError> {
    let stop = Arc::new(AtomicBool::new(false));
    for signal in TERM_SIGNALS {
        flag::register_conditional_shutdown(*signal, 1, Arc::clone(&stop))
            .and_then(|_| flag::register(*signal, Arc::clone(&stop)))
            .map_err(|err| SyncError::Signal(err.to_string()))?;
    }
    Ok(stop)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
