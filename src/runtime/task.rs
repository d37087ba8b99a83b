//! Suspendable tasks.
//!
//! Coroutines are explicit state objects resumed by the scheduler, not
//! language-level generators: a task's `resume` runs straight-line
//! logic and returns [`Step::Wait`] with the event keys it needs next
//! (the `await_any` point), or [`Step::Done`]. A task has at most one
//! outstanding wait, held in its slot, and is resumed exactly once with
//! the first matching event.

use smallvec::SmallVec;

use crate::runtime::event::{Event, EventKey};
use crate::runtime::Runtime;

/// Identifier for a spawned task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Why a task is being resumed.
#[derive(Debug, Clone)]
pub enum Resume {
    /// First resumption, immediately after spawn.
    Start,
    /// One of the awaited keys was published; carries the full event.
    Event(Event),
}

/// Set of event keys a task waits on; nearly always one or two.
pub type WaitKeys = SmallVec<[EventKey; 2]>;

/// What a task does next.
pub enum Step {
    /// Park until any one of these keys is published.
    Wait(WaitKeys),
    /// The task is finished; its slot is released.
    Done,
}

impl Step {
    /// Wait on a single key.
    pub fn wait(key: EventKey) -> Self {
        Self::Wait(WaitKeys::from_slice(&[key]))
    }

    /// Wait on whichever of the given keys fires first.
    pub fn wait_any(keys: impl IntoIterator<Item = EventKey>) -> Self {
        Self::Wait(keys.into_iter().collect())
    }
}

/// A suspendable unit of sequential logic.
pub trait Coroutine {
    /// Run until the next suspension point or completion.
    fn resume(&mut self, rt: &mut Runtime, input: Resume) -> Step;
}

/// Task bookkeeping inside the runtime.
pub(crate) struct TaskSlot {
    pub(crate) coro: Box<dyn Coroutine>,
    /// The outstanding wait, empty while the task is running.
    pub(crate) waiting: WaitKeys,
}
