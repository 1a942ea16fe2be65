//! Cooperative background task scheduling out of the main event loop.
//!
//! Long-running scans are split by their owners into steps of roughly 100 ms.
//! Each step is registered here and runs when the event loop is idle. The
//! scheduler dispatches only a single task per idle cycle, namely the pending
//! one with the highest priority; a task typically re-arms itself from within
//! its own callback until its work is complete. Lower-priority tasks are
//! thereby stalled until higher-priority ones stop rescheduling themselves.
//!
//! Everything runs on the UI thread. Callbacks receive exclusive access to a
//! caller-supplied context (the application state) so they can freely mutate
//! documents, tag maps and lists without locking.

use std::time::{Duration, Instant};

use tracing::trace;

/// Task priorities; numerically smaller values are dispatched first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Populating the filter list from a pattern scan.
    SearchList = 0,
    /// Incremental search driven by typing.
    SearchInc = 1,
    /// Global highlight of the current search pattern.
    HighlightSearch = 2,
    /// Initial highlighting after load or rule-list changes.
    HighlightInit = 3,
}

/// Handle to a registered task. Handles are cheap ids; the scheduler owns all
/// task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskId(usize);

type Callback<C> = Box<dyn FnOnce(&mut C)>;

struct TaskSlot<C> {
    priority: Priority,
    active: bool,
    due: Instant,
    callback: Option<Callback<C>>,
}

/// Priority queue of background tasks, polled from the owner's event loop.
pub struct Scheduler<C> {
    tasks: Vec<TaskSlot<C>>,
    /// Pending task ids in start order; ties in priority dispatch FIFO.
    queue: Vec<TaskId>,
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Scheduler<C> {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            queue: Vec::new(),
        }
    }

    /// Register a task slot with a fixed priority. Slots live for the whole
    /// session; there is one per scan engine.
    pub fn register(&mut self, priority: Priority) -> TaskId {
        self.tasks.push(TaskSlot {
            priority,
            active: false,
            due: Instant::now(),
            callback: None,
        });
        TaskId(self.tasks.len() - 1)
    }

    pub fn is_active(&self, id: TaskId) -> bool {
        self.tasks[id.0].active
    }

    /// Schedule the task to run on the next idle cycle. Starting an already
    /// pending task replaces its callback without duplicating the queue entry.
    pub fn start(&mut self, id: TaskId, callback: impl FnOnce(&mut C) + 'static) {
        self.start_at(id, Instant::now(), callback);
    }

    /// Schedule the task with a delay; used to throttle self-rescheduling
    /// loops and to debounce user input.
    pub fn start_after(&mut self, id: TaskId, delay: Duration, callback: impl FnOnce(&mut C) + 'static) {
        self.start_at(id, Instant::now() + delay, callback);
    }

    fn start_at(&mut self, id: TaskId, due: Instant, callback: impl FnOnce(&mut C) + 'static) {
        let slot = &mut self.tasks[id.0];
        slot.callback = Some(Box::new(callback));
        slot.due = due;
        if !slot.active {
            slot.active = true;
            self.queue.push(id);
        }
        trace!(target: "sched", task = id.0, prio = ?self.tasks[id.0].priority, "task_started");
    }

    /// Remove the task from the pending queue. Does nothing when the task is
    /// not pending.
    pub fn stop(&mut self, id: TaskId) {
        let slot = &mut self.tasks[id.0];
        if slot.active {
            slot.active = false;
            slot.callback = None;
            self.queue.retain(|&q| q != id);
            trace!(target: "sched", task = id.0, "task_stopped");
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Earliest instant at which a pending task becomes due; the event loop
    /// uses this to bound its input-poll timeout. `None` when idle.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.iter().map(|id| self.tasks[id.0].due).min()
    }

    /// Run the single most urgent due task, if any. The task is removed from
    /// the queue and deactivated before its callback runs, so the callback
    /// may start itself or any other task again. Returns whether a task ran.
    pub fn dispatch(&mut self, ctx: &mut C) -> bool {
        let now = Instant::now();
        let best = self
            .queue
            .iter()
            .enumerate()
            .filter(|(_, id)| self.tasks[id.0].due <= now)
            .min_by_key(|(qidx, id)| (self.tasks[id.0].priority, *qidx))
            .map(|(qidx, _)| qidx);

        let Some(qidx) = best else {
            return false;
        };
        let id = self.queue.remove(qidx);
        let slot = &mut self.tasks[id.0];
        slot.active = false;
        let priority = slot.priority;
        let callback = slot.callback.take();
        trace!(target: "sched", task = id.0, prio = ?priority, "task_dispatch");

        if let Some(cb) = callback {
            cb(ctx);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Log {
        ran: Vec<&'static str>,
    }

    #[test]
    fn dispatch_runs_highest_priority_first() {
        let mut s: Scheduler<Log> = Scheduler::new();
        let init = s.register(Priority::HighlightInit);
        let inc = s.register(Priority::SearchInc);
        s.start(init, |l| l.ran.push("init"));
        s.start(inc, |l| l.ran.push("inc"));

        let mut log = Log::default();
        assert!(s.dispatch(&mut log));
        assert_eq!(log.ran, vec!["inc"]);
        assert!(s.dispatch(&mut log));
        assert_eq!(log.ran, vec!["inc", "init"]);
        assert!(!s.dispatch(&mut log));
    }

    #[test]
    fn equal_priority_dispatches_fifo() {
        let mut s: Scheduler<Log> = Scheduler::new();
        let a = s.register(Priority::SearchList);
        let b = s.register(Priority::SearchList);
        s.start(a, |l| l.ran.push("a"));
        s.start(b, |l| l.ran.push("b"));

        let mut log = Log::default();
        s.dispatch(&mut log);
        s.dispatch(&mut log);
        assert_eq!(log.ran, vec!["a", "b"]);
    }

    #[test]
    fn restart_replaces_callback_without_duplicate_entry() {
        let mut s: Scheduler<Log> = Scheduler::new();
        let t = s.register(Priority::SearchInc);
        s.start(t, |l| l.ran.push("old"));
        s.start(t, |l| l.ran.push("new"));

        let mut log = Log::default();
        assert!(s.dispatch(&mut log));
        assert!(!s.dispatch(&mut log));
        assert_eq!(log.ran, vec!["new"]);
    }

    #[test]
    fn stop_is_idempotent() {
        let mut s: Scheduler<Log> = Scheduler::new();
        let t = s.register(Priority::HighlightSearch);
        s.start(t, |_| {});
        s.stop(t);
        s.stop(t);
        assert!(!s.is_active(t));
        let mut log = Log::default();
        assert!(!s.dispatch(&mut log));
    }

    #[test]
    fn callback_may_rearm_itself() {
        let mut s: Scheduler<Log> = Scheduler::new();
        let t = s.register(Priority::SearchList);
        s.start(t, |l| l.ran.push("step1"));

        let mut log = Log::default();
        s.dispatch(&mut log);
        // simulate a task that re-enqueues from within its own step
        s.start(t, |l| l.ran.push("step2"));
        s.dispatch(&mut log);
        assert_eq!(log.ran, vec!["step1", "step2"]);
    }

    #[test]
    fn delayed_task_not_due_immediately() {
        let mut s: Scheduler<Log> = Scheduler::new();
        let t = s.register(Priority::SearchInc);
        s.start_after(t, Duration::from_secs(3600), |l| l.ran.push("late"));

        let mut log = Log::default();
        assert!(!s.dispatch(&mut log));
        assert!(s.has_pending());
        assert!(s.next_deadline().unwrap() > Instant::now());
    }

    #[test]
    fn pending_delayed_task_does_not_block_due_task() {
        let mut s: Scheduler<Log> = Scheduler::new();
        let urgent = s.register(Priority::SearchList);
        let later = s.register(Priority::SearchInc);
        s.start_after(later, Duration::from_secs(3600), |l| l.ran.push("later"));
        s.start(urgent, |l| l.ran.push("urgent"));

        let mut log = Log::default();
        assert!(s.dispatch(&mut log));
        assert_eq!(log.ran, vec!["urgent"]);
    }
}
