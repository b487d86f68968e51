//! Live decode task registry
//!
//! Tracks, per page index, the one decode task that is still wanted. A new
//! submission for a page replaces and cancels whatever was registered before,
//! and the absence of an entry is what tells the worker its task is dead.
//!
//! Every operation is a short critical section over a single map. Nothing in
//! here blocks on decoding or I/O.

use crate::cancel::CancellationToken;
use docview_render::PageIndex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Identifier of one submitted decode task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies a queue slot. A dequeued ticket that no longer matches its
/// page's entry belongs to work that was stopped and is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueTicket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Queued(QueueTicket),
    Running,
}

struct LiveEntry<W> {
    task: TaskId,
    token: CancellationToken,
    slot: Slot,
    work: Option<W>,
}

struct RegistryState<W> {
    entries: HashMap<PageIndex, LiveEntry<W>>,
    next_task: u64,
    next_ticket: u64,
}

/// Result of [`DecodeTaskRegistry::submit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    /// The newly live task
    pub task: TaskId,
    /// Queue slot to enqueue, or `None` when the page was already queued and
    /// the new task took over that slot
    pub ticket: Option<QueueTicket>,
    /// Task that was live for the page before this submission
    pub superseded: Option<TaskId>,
}

/// The worker's view of a task it has started
#[derive(Debug, Clone)]
pub struct TaskHandle {
    page: PageIndex,
    task: TaskId,
    token: CancellationToken,
}

impl TaskHandle {
    pub fn page(&self) -> PageIndex {
        self.page
    }

    pub fn task(&self) -> TaskId {
        self.task
    }
}

/// Per-page registry of live decode tasks.
///
/// `W` is the work payload stored with each task; it is handed to the worker
/// when the task starts.
pub struct DecodeTaskRegistry<W> {
    state: Mutex<RegistryState<W>>,
}

impl<W> DecodeTaskRegistry<W> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                entries: HashMap::new(),
                next_task: 1,
                next_ticket: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState<W>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install `work` as the live task for `page`, cancelling any task that
    /// was registered for it.
    ///
    /// If the previous task was still waiting in the queue the new one takes
    /// over its queue slot, so a page never occupies more than one slot.
    pub fn submit(&self, page: PageIndex, work: W) -> Submission {
        let mut state = self.lock();

        let task = TaskId(state.next_task);
        state.next_task += 1;
        let token = CancellationToken::new();

        let previous = state.entries.remove(&page);
        let superseded = previous.as_ref().map(|entry| {
            entry.token.cancel();
            entry.task
        });

        let (slot, ticket) = match previous.map(|entry| entry.slot) {
            Some(Slot::Queued(ticket)) => (Slot::Queued(ticket), None),
            _ => {
                let ticket = QueueTicket(state.next_ticket);
                state.next_ticket += 1;
                (Slot::Queued(ticket), Some(ticket))
            }
        };

        state.entries.insert(page, LiveEntry { task, token, slot, work: Some(work) });
        Submission { task, ticket, superseded }
    }

    /// Claim the queued task for `page` if `ticket` is still its queue slot.
    ///
    /// Returns `None` when the page was stopped after being queued.
    pub fn begin(&self, page: PageIndex, ticket: QueueTicket) -> Option<(TaskHandle, W)> {
        let mut state = self.lock();
        let entry = state.entries.get_mut(&page)?;

        if entry.slot != Slot::Queued(ticket) {
            return None;
        }
        let work = entry.work.take()?;
        entry.slot = Slot::Running;

        let handle = TaskHandle { page, task: entry.task, token: entry.token.clone() };
        Some((handle, work))
    }

    /// True iff `handle` is still the registered task for its page.
    pub fn is_live(&self, handle: &TaskHandle) -> bool {
        if handle.token.is_cancelled() {
            return false;
        }
        self.lock().entries.get(&handle.page).is_some_and(|entry| entry.task == handle.task)
    }

    /// Final liveness check before delivery.
    ///
    /// If `handle` is still live its entry is removed in the same critical
    /// section and `true` is returned; the caller then owns the one delivery
    /// for this task. A supersede or stop racing with this call either happens
    /// before it, and delivery is refused, or after it, and finds no entry.
    pub fn complete(&self, handle: &TaskHandle) -> bool {
        let mut state = self.lock();
        let live = !handle.token.is_cancelled()
            && state.entries.get(&handle.page).is_some_and(|entry| entry.task == handle.task);
        if live {
            state.entries.remove(&handle.page);
        }
        live
    }

    /// Drop the entry for `handle` if it is still registered.
    ///
    /// Called when a task ends for any reason; a no-op when the entry was
    /// already completed, stopped or superseded.
    pub fn finish(&self, handle: &TaskHandle) -> bool {
        let mut state = self.lock();
        let owned = state.entries.get(&handle.page).is_some_and(|entry| entry.task == handle.task);
        if owned {
            state.entries.remove(&handle.page);
        }
        owned
    }

    /// Remove and cancel whatever task is registered for `page`.
    pub fn remove(&self, page: PageIndex) -> Option<TaskId> {
        let entry = self.lock().entries.remove(&page)?;
        entry.token.cancel();
        Some(entry.task)
    }

    /// Remove and cancel every registered task. Returns how many there were.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<LiveEntry<W>> = self.lock().entries.drain().map(|(_, entry)| entry).collect();
        for entry in &drained {
            entry.token.cancel();
        }
        drained.len()
    }

    pub fn live_task(&self, page: PageIndex) -> Option<TaskId> {
        self.lock().entries.get(&page).map(|entry| entry.task)
    }

    pub fn contains(&self, page: PageIndex) -> bool {
        self.lock().entries.contains_key(&page)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<W> Default for DecodeTaskRegistry<W> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(registry: &DecodeTaskRegistry<&'static str>, page: PageIndex) -> TaskHandle {
        let submission = registry.submit(page, "work");
        let ticket = submission.ticket.expect("fresh page should get a ticket");
        registry.begin(page, ticket).expect("task should start").0
    }

    #[test]
    fn test_submit_registers_live_task() {
        let registry = DecodeTaskRegistry::new();

        let submission = registry.submit(3, "a");

        assert!(submission.ticket.is_some());
        assert_eq!(submission.superseded, None);
        assert_eq!(registry.live_task(3), Some(submission.task));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_queued_task_superseded_in_place() {
        let registry = DecodeTaskRegistry::new();

        let first = registry.submit(3, "first");
        let second = registry.submit(3, "second");

        assert_eq!(second.ticket, None);
        assert_eq!(second.superseded, Some(first.task));
        assert_eq!(registry.len(), 1);

        let (handle, work) = registry.begin(3, first.ticket.unwrap()).unwrap();
        assert_eq!(handle.task(), second.task);
        assert_eq!(work, "second");
    }

    #[test]
    fn test_running_task_superseded_gets_new_slot() {
        let registry = DecodeTaskRegistry::new();
        let running = started(&registry, 1);

        let next = registry.submit(1, "again");

        assert!(next.ticket.is_some());
        assert_eq!(next.superseded, Some(running.task()));
        assert!(!registry.is_live(&running));
        assert!(!registry.complete(&running));
        assert!(!registry.finish(&running));
        assert_eq!(registry.live_task(1), Some(next.task));
    }

    #[test]
    fn test_stopped_ticket_is_skipped() {
        let registry = DecodeTaskRegistry::new();
        let first = registry.submit(2, "a");

        assert_eq!(registry.remove(2), Some(first.task));
        let resubmitted = registry.submit(2, "b");

        assert!(registry.begin(2, first.ticket.unwrap()).is_none());
        let (handle, work) = registry.begin(2, resubmitted.ticket.unwrap()).unwrap();
        assert_eq!(handle.task(), resubmitted.task);
        assert_eq!(work, "b");
    }

    #[test]
    fn test_begin_only_once() {
        let registry = DecodeTaskRegistry::new();
        let submission = registry.submit(0, "a");
        let ticket = submission.ticket.unwrap();

        assert!(registry.begin(0, ticket).is_some());
        assert!(registry.begin(0, ticket).is_none());
    }

    #[test]
    fn test_complete_claims_exactly_once() {
        let registry = DecodeTaskRegistry::new();
        let handle = started(&registry, 4);

        assert!(registry.is_live(&handle));
        assert!(registry.complete(&handle));
        assert!(!registry.complete(&handle));
        assert!(!registry.contains(4));
    }

    #[test]
    fn test_remove_cancels_running_task() {
        let registry = DecodeTaskRegistry::new();
        let handle = started(&registry, 5);

        assert!(registry.remove(5).is_some());

        assert!(!registry.is_live(&handle));
        assert!(!registry.complete(&handle));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry: DecodeTaskRegistry<()> = DecodeTaskRegistry::new();

        assert_eq!(registry.remove(9), None);
        registry.submit(9, ());
        assert!(registry.remove(9).is_some());
        assert_eq!(registry.remove(9), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_finish_leaves_newer_task_alone() {
        let registry = DecodeTaskRegistry::new();
        let old = started(&registry, 6);
        let newer = registry.submit(6, "newer");

        registry.finish(&old);

        assert_eq!(registry.live_task(6), Some(newer.task));
    }

    #[test]
    fn test_cancel_all() {
        let registry = DecodeTaskRegistry::new();
        let a = started(&registry, 0);
        registry.submit(1, "queued");
        registry.submit(2, "queued");

        assert_eq!(registry.cancel_all(), 3);
        assert!(registry.is_empty());
        assert!(!registry.is_live(&a));
    }

    #[test]
    fn test_task_ids_are_unique() {
        let registry = DecodeTaskRegistry::new();
        let a = registry.submit(0, "a").task;
        let b = registry.submit(0, "b").task;
        let c = registry.submit(1, "c").task;

        assert!(a < b && b < c);
        assert_eq!(b.to_string(), format!("#{}", b.get()));
    }
}
