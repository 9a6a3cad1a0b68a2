//! Cancellable scheduled tasks.
//!
//! The undo stack only needs "run this after a delay, unless cancelled".
//! `TokioScheduler` does that on a runtime; `ManualScheduler` is a virtual
//! clock that only moves when told to.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Handle to a scheduled task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    pub fn value(self) -> u64 {
        self.0
    }
}

pub type ScheduledTask = Box<dyn FnOnce() + Send + 'static>;

pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> TimerId;

    /// Returns true when the task was still pending.
    fn cancel(&self, timer: TimerId) -> bool;
}

// ---------------------------------------------------------------------------
// Tokio
// ---------------------------------------------------------------------------

pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
    next_id: AtomicU64,
    pending: Arc<DashMap<TimerId, tokio::task::AbortHandle>>,
}

impl TokioScheduler {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self {
            handle,
            next_id: AtomicU64::new(1),
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Scheduler on the runtime the caller is running in, if any.
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let pending = Arc::clone(&self.pending);
        // Hold the map shard while spawning so the task can't remove its own
        // entry before it has been inserted.
        let entry = self.pending.entry(id);
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if pending.remove(&id).is_some() {
                task();
            }
        });
        entry.insert(join.abort_handle());
        id
    }

    fn cancel(&self, timer: TimerId) -> bool {
        match self.pending.remove(&timer) {
            Some((_, abort)) => {
                abort.abort();
                true
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Virtual clock
// ---------------------------------------------------------------------------

struct ManualTask {
    id: TimerId,
    due: Duration,
    task: ScheduledTask,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_id: u64,
    tasks: Vec<ManualTask>,
}

/// Deterministic scheduler driven by `advance`.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time elapsed on the virtual clock.
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    pub fn pending(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Move the clock forward and run every task that became due, in
    /// deadline order. Tasks run without the scheduler lock held, so they
    /// may schedule or cancel other tasks.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.state.lock().now + by;
        let mut fired = 0;
        loop {
            let next = {
                let mut state = self.state.lock();
                let due_index = state
                    .tasks
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due <= target)
                    .min_by_key(|(_, t)| (t.due, t.id))
                    .map(|(i, _)| i);
                match due_index {
                    Some(i) => {
                        let task = state.tasks.swap_remove(i);
                        state.now = state.now.max(task.due);
                        Some(task)
                    }
                    None => {
                        state.now = target;
                        None
                    }
                }
            };
            match next {
                Some(task) => {
                    (task.task)();
                    fired += 1;
                }
                None => return fired,
            }
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> TimerId {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = TimerId(state.next_id);
        let due = state.now + delay;
        state.tasks.push(ManualTask { id, due, task });
        id
    }

    fn cancel(&self, timer: TimerId) -> bool {
        let mut state = self.state.lock();
        let before = state.tasks.len();
        state.tasks.retain(|t| t.id != timer);
        state.tasks.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_task(counter: &Arc<AtomicUsize>) -> ScheduledTask {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn manual_fires_only_when_due() {
        let scheduler = ManualScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        scheduler.schedule(Duration::from_secs(10), counter_task(&hits));

        assert_eq!(scheduler.advance(Duration::from_secs(9)), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.advance(Duration::from_secs(1)), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(scheduler.now(), Duration::from_secs(10));
    }

    #[test]
    fn manual_cancel_prevents_firing() {
        let scheduler = ManualScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = scheduler.schedule(Duration::from_secs(1), counter_task(&hits));
        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));
        scheduler.advance(Duration::from_secs(5));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn manual_fires_in_deadline_order() {
        let scheduler = ManualScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (label, secs) in [("late", 3), ("early", 1), ("mid", 2)] {
            let order = Arc::clone(&order);
            scheduler.schedule(Duration::from_secs(secs), Box::new(move || order.lock().push(label)));
        }
        scheduler.advance(Duration::from_secs(3));
        assert_eq!(*order.lock(), vec!["early", "mid", "late"]);
    }

    #[test]
    fn manual_task_can_schedule_follow_up() {
        let scheduler = Arc::new(ManualScheduler::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let inner_scheduler = Arc::clone(&scheduler);
        let inner_hits = Arc::clone(&hits);
        scheduler.schedule(
            Duration::from_secs(1),
            Box::new(move || {
                inner_scheduler.schedule(Duration::from_secs(1), counter_task(&inner_hits));
            }),
        );
        scheduler.advance(Duration::from_secs(2));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_scheduler_fires_after_delay() {
        let scheduler = TokioScheduler::current().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        scheduler.schedule(Duration::from_millis(500), counter_task(&hits));
        assert_eq!(scheduler.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_scheduler_cancel_aborts() {
        let scheduler = TokioScheduler::current().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = scheduler.schedule(Duration::from_millis(500), counter_task(&hits));
        assert!(scheduler.cancel(id));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
