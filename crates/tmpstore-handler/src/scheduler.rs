//! Periodic tick sources for the handler's maintenance tasks.
//!
//! The handler only registers callbacks and cancels them again; any type
//! implementing [`Scheduler`] can drive it. Three implementations ship here:
//! - [`ThreadScheduler`]: one OS thread per task (default).
//! - [`ManualScheduler`]: ticks happen only when the owner calls `fire`.
//! - `TokioScheduler` (feature `async-scheduler`): tokio intervals.
//!
//! A panicking tick is caught and logged; later ticks still run.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

#[cfg(feature = "async-scheduler")]
pub use async_impl::TokioScheduler;

/// Body of a periodic task.
pub type Task = Arc<dyn Fn() + Send + Sync + 'static>;

/// Handle of a registered task. Cancelling never waits for a running tick.
pub trait ScheduledTask: Send + Sync {
    fn cancel(&self);
    fn is_cancelled(&self) -> bool;
}

pub trait Scheduler: Send + Sync {
    /// Run `task` every `period`, first after one full period.
    fn schedule_at_fixed_rate(
        &self,
        name: &'static str,
        period: Duration,
        task: Task,
    ) -> io::Result<Box<dyn ScheduledTask>>;
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

pub(crate) fn run_tick(name: &str, task: &Task) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task())) {
        warn!(task = name, panic = panic_message(&*payload), "scheduled task panicked");
    }
}

/// Spawns one named thread per task; the thread exits once the task is
/// cancelled or its handle is dropped.
#[derive(Debug, Clone, Default)]
pub struct ThreadScheduler;

impl ThreadScheduler {
    pub fn new() -> Self {
        Self
    }
}

struct ThreadTask {
    stop: Mutex<Option<Sender<()>>>,
    cancelled: AtomicBool,
}

impl ScheduledTask for ThreadTask {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        // Dropping the sender wakes the thread with `Disconnected`.
        self.stop.lock().take();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule_at_fixed_rate(
        &self,
        name: &'static str,
        period: Duration,
        task: Task,
    ) -> io::Result<Box<dyn ScheduledTask>> {
        let (tx, rx) = mpsc::channel::<()>();
        thread::Builder::new()
            .name(format!("tmpstore-{name}"))
            .spawn(move || {
                let mut next = Instant::now() + period;
                loop {
                    let wait = next.saturating_duration_since(Instant::now());
                    match rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {
                            run_tick(name, &task);
                            next = (next + period).max(Instant::now());
                        }
                        _ => break,
                    }
                }
            })?;
        Ok(Box::new(ThreadTask {
            stop: Mutex::new(Some(tx)),
            cancelled: AtomicBool::new(false),
        }))
    }
}

struct ManualEntry {
    name: &'static str,
    period: Duration,
    task: Task,
    cancelled: Arc<AtomicBool>,
}

struct ManualTask {
    cancelled: Arc<AtomicBool>,
}

impl ScheduledTask for ManualTask {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for ManualTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Records tasks and runs them only when told to. Useful for tests and for
/// embedding the handler in an external event loop.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    tasks: Arc<Mutex<Vec<ManualEntry>>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every live task registered as `name`; returns how many ran.
    pub fn fire(&self, name: &str) -> usize {
        let live: Vec<Task> = {
            let mut tasks = self.tasks.lock();
            tasks.retain(|t| !t.cancelled.load(Ordering::Acquire));
            tasks
                .iter()
                .filter(|t| t.name == name)
                .map(|t| Arc::clone(&t.task))
                .collect()
        };
        for task in &live {
            run_tick(name, task);
        }
        live.len()
    }

    /// Number of live tasks registered as `name`.
    pub fn registered(&self, name: &str) -> usize {
        self.tasks
            .lock()
            .iter()
            .filter(|t| t.name == name && !t.cancelled.load(Ordering::Acquire))
            .count()
    }

    pub fn period(&self, name: &str) -> Option<Duration> {
        self.tasks
            .lock()
            .iter()
            .find(|t| t.name == name && !t.cancelled.load(Ordering::Acquire))
            .map(|t| t.period)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_at_fixed_rate(
        &self,
        name: &'static str,
        period: Duration,
        task: Task,
    ) -> io::Result<Box<dyn ScheduledTask>> {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.tasks.lock().push(ManualEntry {
            name,
            period,
            task,
            cancelled: Arc::clone(&cancelled),
        });
        Ok(Box::new(ManualTask { cancelled }))
    }
}

#[cfg(feature = "async-scheduler")]
mod async_impl {
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::runtime::Handle;
    use tokio::task::AbortHandle;

    use super::{run_tick, ScheduledTask, Scheduler, Task};

    /// Runs each task on a tokio interval; tick bodies go to the blocking pool
    /// because they take synchronous locks.
    #[derive(Debug, Clone)]
    pub struct TokioScheduler {
        handle: Handle,
    }

    impl TokioScheduler {
        pub fn new(handle: Handle) -> Self {
            Self { handle }
        }

        /// Use the runtime of the calling context. Panics outside a runtime.
        pub fn current() -> Self {
            Self::new(Handle::current())
        }
    }

    struct TokioTask {
        abort: AbortHandle,
        cancelled: AtomicBool,
    }

    impl ScheduledTask for TokioTask {
        fn cancel(&self) {
            self.cancelled.store(true, Ordering::Release);
            self.abort.abort();
        }

        fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::Acquire)
        }
    }

    impl Drop for TokioTask {
        fn drop(&mut self) {
            self.abort.abort();
        }
    }

    impl Scheduler for TokioScheduler {
        fn schedule_at_fixed_rate(
            &self,
            name: &'static str,
            period: Duration,
            task: Task,
        ) -> io::Result<Box<dyn ScheduledTask>> {
            let join = self.handle.spawn(async move {
                let start = tokio::time::Instant::now() + period;
                let mut interval = tokio::time::interval_at(start, period);
                loop {
                    interval.tick().await;
                    let task = Arc::clone(&task);
                    if let Err(e) = tokio::task::spawn_blocking(move || run_tick(name, &task)).await {
                        tracing::warn!(task = name, error = %e, "scheduled task join failed");
                    }
                }
            });
            Ok(Box::new(TokioTask {
                abort: join.abort_handle(),
                cancelled: AtomicBool::new(false),
            }))
        }
    }
}
