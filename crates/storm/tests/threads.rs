//! Logical threads: ordering, cross-thread cloning, and cooperative
//! waiting.

use std::{cell::RefCell, rc::Rc};

use storm::{Event, RtValue, Sema, WaitResult, World};

/// Scenario: a call from the compiler thread to a function on another
/// thread with an array argument. The callee observes a disjoint copy.
#[test]
fn cross_thread_arguments_are_cloned() {
    let mut w = World::bare();
    let other = w.scheduler_mut().new_thread();
    let arg = RtValue::array(vec![RtValue::Int(1), RtValue::Int(2), RtValue::Int(3)]);

    let future = w.post_call(other, vec![arg.clone()], |_, params| {
        // The callee mutates what it received.
        if let RtValue::Array(items) = &params[0] {
            items.borrow_mut().clear();
        }
        Ok(RtValue::Unit)
    });
    future.wait(&mut w).unwrap();

    // The caller's array is untouched.
    let RtValue::Array(items) = &arg else { panic!() };
    assert_eq!(items.borrow().len(), 3);
}

/// Effects of one cross-thread call are visible to subsequent calls from
/// the same origin: FIFO within the target thread.
#[test]
fn calls_from_one_origin_stay_ordered() {
    let mut w = World::bare();
    let target = w.scheduler_mut().new_thread();
    let log: Rc<RefCell<Vec<i64>>> = Rc::new(RefCell::new(Vec::new()));

    for i in 0..5 {
        let log = Rc::clone(&log);
        let future = w.post_call(target, vec![RtValue::Int(i)], move |_, params| {
            if let RtValue::Int(v) = params[0] {
                log.borrow_mut().push(v);
            }
            Ok(RtValue::Unit)
        });
        // Each call completes before the next is issued, as a blocking
        // cross-thread call would.
        future.wait(&mut w).unwrap();
    }
    assert_eq!(*log.borrow(), vec![0, 1, 2, 3, 4]);
}

/// A future on an idle thread reports the delivery failure instead of
/// hanging.
#[test]
fn waiting_on_a_dead_call_fails_cleanly() {
    let mut w = World::bare();
    let target = w.scheduler_mut().new_thread();
    let future = w.post_call(target, vec![], |_, _| Ok(RtValue::Unit));
    // Drain the queue through unrelated work first.
    w.run_until_idle();
    assert!(future.is_done());
    assert!(future.wait(&mut w).is_ok());

    let never = storm::FutureValue::detached();
    let err = never.wait(&mut w).unwrap_err();
    assert_eq!(err.kind, storm::ErrorKind::MsgError);
}

/// Event timeouts are cooperative: they return a distinguished result and
/// never abort queued work.
#[test]
fn event_timeouts_do_not_abort_work() {
    let mut w = World::bare();
    let t = w.scheduler_mut().new_thread();
    let event = Event::new();
    let work = Rc::new(RefCell::new(0u32));

    // The signal arrives only after two other tasks.
    for _ in 0..2 {
        let work = Rc::clone(&work);
        w.spawn_on(t, move |_| {
            *work.borrow_mut() += 1;
        });
    }
    let signal = event.clone();
    w.spawn_on(t, move |_| signal.set());

    // A budget of one step is not enough.
    assert_eq!(event.wait(&mut w, 1), WaitResult::TimedOut);
    // The work was not aborted; a larger budget sees the signal.
    assert_eq!(event.wait(&mut w, 10), WaitResult::Signaled);
}

/// Semaphores hand out units cooperatively.
#[test]
fn semaphores_count_units() {
    let mut w = World::bare();
    let sema = Sema::new(1);
    assert_eq!(sema.down(&mut w, 0), WaitResult::Signaled);
    assert_eq!(sema.down(&mut w, 2), WaitResult::TimedOut);

    let t = w.scheduler_mut().new_thread();
    let up = sema.clone();
    w.spawn_on(t, move |_| up.up());
    assert_eq!(sema.down(&mut w, 5), WaitResult::Signaled);
}
