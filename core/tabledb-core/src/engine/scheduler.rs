//! Scheduler Engine
//!
//! 주기 작업 실행 엔진: named jobs run on one background thread.
//! A failing or panicking job is logged and the loop keeps going.

use crate::error::{TdbError, TdbResult};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Upper bound on how long the loop sleeps between checks.
const MAX_IDLE: Duration = Duration::from_millis(500);

/// 스케줄 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// 한 번만 실행 (지연 시간)
    Once(Duration),
    /// 주기적 실행 (간격)
    Interval(Duration),
}

impl Schedule {
    fn delay(&self) -> Duration {
        match self {
            Schedule::Once(d) | Schedule::Interval(d) => *d,
        }
    }
}

pub type JobFn = Arc<dyn Fn() -> TdbResult<()> + Send + Sync>;

/// 스케줄된 작업
pub struct ScheduledJob {
    name: String,
    schedule: Schedule,
    next_run: Instant,
    task: JobFn,
}

impl ScheduledJob {
    pub fn new(
        name: impl Into<String>,
        schedule: Schedule,
        task: impl Fn() -> TdbResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            schedule,
            next_run: Instant::now() + schedule.delay(),
            task: Arc::new(task),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    fn is_ready(&self, now: Instant) -> bool {
        now >= self.next_run
    }
}

#[derive(Default)]
struct LoopState {
    running: bool,
    stop: bool,
}

/// 스케줄러
#[derive(Default)]
pub struct Scheduler {
    jobs: Mutex<HashMap<String, ScheduledJob>>,
    state: Mutex<LoopState>,
    wake: Condvar,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 작업 등록
    pub fn register(&self, job: ScheduledJob) -> TdbResult<()> {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&job.name) {
            return Err(TdbError::already_exists("job", job.name.clone()));
        }
        debug!("Registered job {} ({:?})", job.name, job.schedule);
        jobs.insert(job.name.clone(), job);
        drop(jobs);
        self.wake.notify_all();
        Ok(())
    }

    /// 작업 등록 해제
    pub fn unregister(&self, name: &str) -> TdbResult<()> {
        self.jobs
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| TdbError::not_found("job", name))
    }

    /// 등록된 작업 목록 (sorted)
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Run every due job once. Returns the names of jobs that succeeded.
    ///
    /// Jobs run outside the registry lock, so a job may register or
    /// unregister others.
    pub fn tick(&self) -> Vec<String> {
        let now = Instant::now();
        let due: Vec<(String, JobFn)> = {
            let mut jobs = self.jobs.lock();
            let mut due = Vec::new();
            jobs.retain(|name, job| {
                if !job.is_ready(now) {
                    return true;
                }
                due.push((name.clone(), job.task.clone()));
                match job.schedule {
                    Schedule::Once(_) => false,
                    Schedule::Interval(every) => {
                        job.next_run = now + every;
                        true
                    }
                }
            });
            due
        };

        let mut executed = Vec::new();
        for (name, task) in due {
            match catch_unwind(AssertUnwindSafe(|| task())) {
                Ok(Ok(())) => executed.push(name),
                Ok(Err(e)) => warn!("Scheduled job {} failed: {}", name, e),
                Err(_) => warn!("Scheduled job {} panicked", name),
            }
        }
        executed
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.jobs.lock().values().map(|j| j.next_run).min()
    }

    /// Start the background loop. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) -> TdbResult<()> {
        {
            let mut state = self.state.lock();
            if state.running {
                return Ok(());
            }
            state.running = true;
            state.stop = false;
        }

        let scheduler = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("tabledb-scheduler".to_string())
            .spawn(move || scheduler.run_loop())
            .inspect_err(|_| self.state.lock().running = false)?;
        *self.handle.lock() = Some(handle);
        info!("Scheduler started");
        Ok(())
    }

    fn run_loop(&self) {
        loop {
            {
                let mut state = self.state.lock();
                if state.stop {
                    break;
                }
                let wait = self
                    .next_deadline()
                    .map(|d| d.saturating_duration_since(Instant::now()))
                    .unwrap_or(MAX_IDLE)
                    .min(MAX_IDLE);
                if !wait.is_zero() {
                    self.wake.wait_for(&mut state, wait);
                }
                if state.stop {
                    break;
                }
            }
            self.tick();
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Stop the loop, waking it immediately, and join the thread.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if !state.running {
                return;
            }
            state.stop = true;
        }
        self.wake.notify_all();
        if let Some(handle) = self.handle.lock().take()
            && handle.join().is_err()
        {
            warn!("Scheduler thread panicked");
        }
        self.state.lock().running = false;
        info!("Scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn register_rejects_duplicates() {
        let scheduler = Scheduler::new();
        let job = || ScheduledJob::new("flush", Schedule::Interval(Duration::from_secs(60)), || Ok(()));
        scheduler.register(job()).unwrap();
        assert!(matches!(
            scheduler.register(job()),
            Err(TdbError::AlreadyExists { .. })
        ));
        assert_eq!(scheduler.list(), vec!["flush"]);
        scheduler.unregister("flush").unwrap();
        assert!(matches!(
            scheduler.unregister("flush"),
            Err(TdbError::NotFound { .. })
        ));
    }

    #[test]
    fn tick_runs_due_jobs_and_swallows_failures() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        scheduler
            .register(ScheduledJob::new("once", Schedule::Once(Duration::ZERO), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        scheduler
            .register(ScheduledJob::new("broken", Schedule::Interval(Duration::ZERO), || {
                Err(TdbError::invalid_query("boom"))
            }))
            .unwrap();
        scheduler
            .register(ScheduledJob::new("later", Schedule::Once(Duration::from_secs(3600)), || Ok(())))
            .unwrap();

        assert_eq!(scheduler.tick(), vec!["once"]);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        // Once-jobs are dropped after running; failing interval jobs stay.
        assert_eq!(scheduler.list(), vec!["broken", "later"]);
        assert!(scheduler.tick().is_empty());
    }

    #[test]
    fn background_loop_runs_and_stops() {
        let scheduler = Arc::new(Scheduler::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        scheduler
            .register(ScheduledJob::new(
                "count",
                Schedule::Interval(Duration::from_millis(5)),
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            ))
            .unwrap();
        scheduler.start().unwrap();
        assert!(scheduler.is_running());

        let deadline = Instant::now() + Duration::from_secs(5);
        while runs.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        scheduler.shutdown();
        assert!(!scheduler.is_running());
        assert!(runs.load(Ordering::SeqCst) >= 2);
    }
}
