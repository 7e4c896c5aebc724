//! Logical threads and cross-thread calls.
//!
//! A logical thread is a cooperative task executor; the well-known
//! `Compiler` thread is queue 0 and is where all name-tree mutation
//! happens. Within one thread, tasks run in enqueue order (FIFO). A
//! cross-thread call is reified as a task: parameters are deep-copied
//! through a fresh [`CloneEnv`] at the send boundary, a future is created,
//! and the caller blocks on (drives) the future. Timeouts are cooperative:
//! they return a distinguished result and never abort in-progress work.

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use crate::{
    diag::{CResult, CompileError, ErrorKind},
    runtime::{CloneEnv, RtValue},
    world::World,
};

/// Identifier of a logical thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(u32);

/// The compiler thread: queue 0, where the name tree is mutated.
pub const COMPILER: ThreadId = ThreadId(0);

impl ThreadId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

type Task = Box<dyn FnOnce(&mut World)>;

/// Per-thread FIFO queues of pending tasks.
///
/// The scheduler itself is detached from the world while tasks run, so
/// tasks may freely enqueue more work.
#[derive(Default)]
pub struct Scheduler {
    queues: Vec<VecDeque<Task>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sizes: Vec<usize> = self.queues.iter().map(VecDeque::len).collect();
        f.debug_struct("Scheduler").field("queues", &sizes).finish()
    }
}

impl Scheduler {
    /// Creates a scheduler with the compiler thread in place.
    pub fn new() -> Self {
        Self {
            queues: vec![VecDeque::new()],
        }
    }

    /// Creates a fresh logical thread.
    pub fn new_thread(&mut self) -> ThreadId {
        let id = ThreadId(u32::try_from(self.queues.len()).expect("thread count overflow"));
        self.queues.push(VecDeque::new());
        id
    }

    /// Number of live threads.
    pub fn thread_count(&self) -> usize {
        self.queues.len()
    }

    fn enqueue(&mut self, target: ThreadId, task: Task) {
        self.queues[target.index()].push_back(task);
    }

    fn pop_any(&mut self) -> Option<Task> {
        self.queues.iter_mut().find_map(VecDeque::pop_front)
    }

    fn is_idle(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }
}

/// A one-shot slot for the result of a cross-thread call.
#[derive(Debug)]
pub struct FutureValue {
    slot: Rc<RefCell<Option<CResult<RtValue>>>>,
}

impl FutureValue {
    fn new() -> (Self, Rc<RefCell<Option<CResult<RtValue>>>>) {
        let slot = Rc::new(RefCell::new(None));
        (Self { slot: Rc::clone(&slot) }, slot)
    }

    /// A future no task will ever complete. Waiting on it reports the
    /// delivery failure once the queues drain.
    pub fn detached() -> Self {
        Self {
            slot: Rc::new(RefCell::new(None)),
        }
    }

    /// True once the producing task has finished.
    pub fn is_done(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Blocks the caller (drives the scheduler) until the result arrives.
    pub fn wait(self, world: &mut World) -> CResult<RtValue> {
        while !self.is_done() {
            if !world.run_one_task() {
                return Err(CompileError::new(
                    ErrorKind::MsgError,
                    "cross-thread call never completed: target thread is idle",
                ));
            }
        }
        self.slot.borrow_mut().take().expect("future checked above")
    }
}

/// Result of waiting on an event or semaphore with a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Signaled,
    TimedOut,
}

/// A cooperative one-shot event.
#[derive(Debug, Clone, Default)]
pub struct Event {
    set: Rc<RefCell<bool>>,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        *self.set.borrow_mut() = true;
    }

    pub fn is_set(&self) -> bool {
        *self.set.borrow()
    }

    /// Waits until the event is set, driving up to `max_steps` queued tasks.
    /// Returns `TimedOut` when the budget runs out or all queues drain
    /// first; in-progress work is never aborted.
    pub fn wait(&self, world: &mut World, max_steps: usize) -> WaitResult {
        for _ in 0..max_steps {
            if self.is_set() {
                return WaitResult::Signaled;
            }
            if !world.run_one_task() {
                break;
            }
        }
        if self.is_set() {
            WaitResult::Signaled
        } else {
            WaitResult::TimedOut
        }
    }
}

/// A cooperative counting semaphore.
#[derive(Debug, Clone)]
pub struct Sema {
    count: Rc<RefCell<u32>>,
}

impl Sema {
    pub fn new(count: u32) -> Self {
        Self {
            count: Rc::new(RefCell::new(count)),
        }
    }

    pub fn up(&self) {
        *self.count.borrow_mut() += 1;
    }

    /// Takes one unit, driving queued tasks while none is available.
    pub fn down(&self, world: &mut World, max_steps: usize) -> WaitResult {
        for _ in 0..=max_steps {
            {
                let mut count = self.count.borrow_mut();
                if *count > 0 {
                    *count -= 1;
                    return WaitResult::Signaled;
                }
            }
            if !world.run_one_task() {
                break;
            }
        }
        WaitResult::TimedOut
    }
}

impl World {
    /// Enqueues `task` on `target`.
    pub fn spawn_on(&mut self, target: ThreadId, task: impl FnOnce(&mut Self) + 'static) {
        self.scheduler_mut().enqueue(target, Box::new(task));
    }

    /// Runs a single queued task from any thread. Returns false when every
    /// queue is idle.
    pub fn run_one_task(&mut self) -> bool {
        let Some(task) = self.scheduler_mut().pop_any() else {
            return false;
        };
        task(self);
        true
    }

    /// Drives all queues until idle.
    pub fn run_until_idle(&mut self) {
        while self.run_one_task() {}
    }

    /// True when no tasks are pending anywhere.
    pub fn threads_idle(&self) -> bool {
        self.scheduler().is_idle()
    }

    /// Reifies a cross-thread call: deep-copies `params` through a fresh
    /// [`CloneEnv`] at the send boundary, enqueues the call on `target`,
    /// and returns the future the caller blocks on.
    ///
    /// The clone guarantees the callee observes a parameter graph disjoint
    /// from the caller's, while identity within the sent graph survives.
    pub fn post_call(
        &mut self,
        target: ThreadId,
        params: Vec<RtValue>,
        body: impl FnOnce(&mut Self, Vec<RtValue>) -> CResult<RtValue> + 'static,
    ) -> FutureValue {
        let mut env = CloneEnv::new();
        let sent: Vec<RtValue> = params.iter().map(|p| p.deep_copy(&mut env)).collect();
        let (future, slot) = FutureValue::new();
        self.spawn_on(target, move |world| {
            let result = body(world, sent);
            *slot.borrow_mut() = Some(result);
        });
        future
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::World;

    #[test]
    fn tasks_run_in_fifo_order_within_a_thread() {
        let mut w = World::bare();
        let t = w.scheduler_mut().new_thread();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..4 {
            let log = Rc::clone(&log);
            w.spawn_on(t, move |_| log.borrow_mut().push(i));
        }
        w.run_until_idle();
        assert_eq!(*log.borrow(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn event_wait_times_out_cooperatively() {
        let mut w = World::bare();
        let event = Event::new();
        assert_eq!(event.wait(&mut w, 10), WaitResult::TimedOut);

        let t = w.scheduler_mut().new_thread();
        let signal = event.clone();
        w.spawn_on(t, move |_| signal.set());
        assert_eq!(event.wait(&mut w, 10), WaitResult::Signaled);
    }

    #[test]
    fn post_call_clones_parameters_at_the_send_boundary() {
        let mut w = World::bare();
        let t = w.scheduler_mut().new_thread();
        let arg = RtValue::array(vec![RtValue::Int(1), RtValue::Int(2), RtValue::Int(3)]);

        let future = w.post_call(t, vec![arg.clone()], |_, params| {
            if let RtValue::Array(a) = &params[0] {
                a.borrow_mut().push(RtValue::Int(99));
            }
            Ok(params.into_iter().next().unwrap())
        });
        let result = future.wait(&mut w).unwrap();

        // The callee saw and mutated its own copy.
        let RtValue::Array(original) = &arg else { panic!() };
        assert_eq!(original.borrow().len(), 3);
        let RtValue::Array(returned) = &result else { panic!() };
        assert_eq!(returned.borrow().len(), 4);
        assert!(!result.shares_with(&arg));
    }
}
