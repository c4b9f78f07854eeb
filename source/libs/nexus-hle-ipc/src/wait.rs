// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Generic waitable-object capability shared by sessions, ports and other primitives
//! OWNERS: @hle-ipc
//! PUBLIC API: WaitObject, WaitQueue, WaitOutcome, wait_synchronization()
//! DEPENDS_ON: thread::Thread, error::Fault
//! INVARIANTS: Eligibility check and claim happen under the waiters lock (no lost wakeups);
//!             highest priority wakes first, FIFO among equals
//!
//! Lock order: the waiters lock may be held while an object's state lock is
//! taken (predicate evaluation), never the reverse.

use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::error::Fault;
use crate::object::KernelObject;
use crate::result::{ResultCode, RESULT_SUCCESS};
use crate::thread::Thread;

/// Threads parked on one wait object.
pub struct WaitQueue {
    waiters: Mutex<Vec<Arc<Thread>>>,
}

impl WaitQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self { waiters: Mutex::new(Vec::new()) }
    }

    /// Registers `thread` as a waiter. A thread already present is not added twice.
    pub fn add_waiter(&self, thread: Arc<Thread>) {
        let mut waiters = self.waiters.lock();
        if !waiters.iter().any(|waiter| Arc::ptr_eq(waiter, &thread)) {
            waiters.push(thread);
        }
    }

    /// Removes `thread`; returns `false` if it was not waiting.
    pub fn remove_waiter(&self, thread: &Arc<Thread>) -> bool {
        let mut waiters = self.waiters.lock();
        let before = waiters.len();
        waiters.retain(|waiter| !Arc::ptr_eq(waiter, thread));
        waiters.len() != before
    }

    /// Number of parked threads.
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Returns `true` when nothing is parked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the parked threads in arrival order.
    pub fn waiters(&self) -> Vec<Arc<Thread>> {
        self.waiters.lock().clone()
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// A kernel object threads can block on.
pub trait WaitObject: KernelObject {
    /// Returns `true` if `thread` would have to block to acquire this object.
    fn should_wait(&self, thread: &Thread) -> bool;

    /// Claims the object for `thread`. Only valid while `should_wait` is `false`.
    fn acquire(&self, thread: &Thread) -> Result<(), Fault>;

    /// Threads parked on this object.
    fn wait_queue(&self) -> &WaitQueue;

    /// Wake result for threads released because the object's peer went away.
    fn closed_result(&self) -> Option<ResultCode> {
        None
    }

    /// Claims the object for every eligible waiter, best priority first, and resumes each.
    ///
    /// Returns the number of threads resumed.
    fn wakeup_all_waiting_threads(&self) -> Result<usize, Fault> {
        let mut waiters = self.wait_queue().waiters.lock();
        let mut woken = 0;
        loop {
            let next = waiters
                .iter()
                .enumerate()
                .filter(|(_, thread)| !self.should_wait(thread))
                .min_by_key(|(_, thread)| thread.priority())
                .map(|(index, _)| index);
            let Some(index) = next else {
                break;
            };
            let thread = waiters.remove(index);
            self.acquire(&thread)?;
            let result = self.closed_result().unwrap_or(RESULT_SUCCESS);
            debug!("wait: {} wakes thread {} ({})", self.name(), thread.id(), result);
            thread.resume_from_wait(result);
            woken += 1;
        }
        Ok(woken)
    }
}

/// Outcome of [`wait_synchronization`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The object was available and has been claimed.
    Acquired(ResultCode),
    /// The thread is parked on the object's wait queue.
    Parked,
}

/// Claims `object` for `thread` if available, otherwise parks the thread on it.
pub fn wait_synchronization<O>(object: &O, thread: &Arc<Thread>) -> Result<WaitOutcome, Fault>
where
    O: WaitObject + ?Sized,
{
    let mut waiters = object.wait_queue().waiters.lock();
    if !object.should_wait(thread) {
        object.acquire(thread)?;
        let result = object.closed_result().unwrap_or(RESULT_SUCCESS);
        thread.resume_from_wait(result);
        return Ok(WaitOutcome::Acquired(result));
    }
    thread.begin_wait();
    if !waiters.iter().any(|waiter| Arc::ptr_eq(waiter, thread)) {
        waiters.push(Arc::clone(thread));
    }
    debug!("wait: thread {} parks on {}", thread.id(), object.name());
    Ok(WaitOutcome::Parked)
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use super::*;
    use crate::object::HandleType;
    use crate::thread::ThreadStatus;

    struct Semaphore {
        count: Mutex<u32>,
        queue: WaitQueue,
    }

    impl KernelObject for Semaphore {
        fn name(&self) -> &str {
            "sema"
        }

        fn handle_type(&self) -> HandleType {
            HandleType::Port
        }

        fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    impl WaitObject for Semaphore {
        fn should_wait(&self, _thread: &Thread) -> bool {
            *self.count.lock() == 0
        }

        fn acquire(&self, _thread: &Thread) -> Result<(), Fault> {
            let mut count = self.count.lock();
            if *count == 0 {
                return Err(Fault::ObjectUnavailable { object: "sema".into() });
            }
            *count -= 1;
            Ok(())
        }

        fn wait_queue(&self) -> &WaitQueue {
            &self.queue
        }
    }

    fn semaphore(count: u32) -> Semaphore {
        Semaphore { count: Mutex::new(count), queue: WaitQueue::new() }
    }

    #[test]
    fn available_object_is_acquired_immediately() {
        let sema = semaphore(1);
        let thread = Thread::new(1, "t", 0x30);
        assert_eq!(
            wait_synchronization(&sema, &thread).unwrap(),
            WaitOutcome::Acquired(RESULT_SUCCESS)
        );
        assert!(sema.wait_queue().is_empty());
        assert_eq!(wait_synchronization(&sema, &thread).unwrap(), WaitOutcome::Parked);
        assert_eq!(thread.status(), ThreadStatus::WaitSynch);
        assert_eq!(sema.wait_queue().len(), 1);
    }

    #[test]
    fn wake_prefers_priority_then_arrival() {
        let sema = semaphore(0);
        let low = Thread::new(1, "low", 0x40);
        let first_high = Thread::new(2, "high-a", 0x10);
        let second_high = Thread::new(3, "high-b", 0x10);
        for thread in [&low, &first_high, &second_high] {
            assert_eq!(wait_synchronization(&sema, thread).unwrap(), WaitOutcome::Parked);
        }

        *sema.count.lock() = 1;
        assert_eq!(sema.wakeup_all_waiting_threads().unwrap(), 1);
        assert_eq!(first_high.status(), ThreadStatus::Ready);
        assert_eq!(second_high.status(), ThreadStatus::WaitSynch);

        *sema.count.lock() = 2;
        assert_eq!(sema.wakeup_all_waiting_threads().unwrap(), 2);
        assert_eq!(second_high.status(), ThreadStatus::Ready);
        assert_eq!(low.status(), ThreadStatus::Ready);
        assert!(sema.wait_queue().is_empty());
    }

    #[test]
    fn waiters_are_not_duplicated() {
        let queue = WaitQueue::new();
        let thread = Thread::new(1, "t", 0x30);
        queue.add_waiter(Arc::clone(&thread));
        queue.add_waiter(Arc::clone(&thread));
        assert_eq!(queue.len(), 1);
        assert!(queue.remove_waiter(&thread));
        assert!(!queue.remove_waiter(&thread));
    }
}
