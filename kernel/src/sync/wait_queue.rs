//! The wait queue contract blocking primitives sleep on.
//!
//! The queue itself belongs to the scheduler. This module only states
//! what a sleeping lock needs from it.

use crate::thread::{ThreadId, Timeout};

/// Why a blocked thread came back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// Another thread picked this one with `wake_one` or `wake_all`.
    Woken,
    /// The timeout expired first. The thread is no longer queued.
    TimedOut,
}

/// A FIFO of blocked threads.
pub trait WaitQueue: Send + Sync {
    /// Identity of the calling thread.
    fn current_thread(&self) -> ThreadId;

    /// Queue the caller, run `release`, then suspend until woken or
    /// until `timeout` expires.
    ///
    /// `release` drops whatever lock guards the caller's wait condition.
    /// It runs after the caller is on the queue, so a waker that takes
    /// the same lock afterwards always finds it there.
    fn block<F: FnOnce()>(&self, timeout: Timeout, release: F) -> WaitResult;

    /// Wake the longest waiter. The returned thread is guaranteed to see
    /// [`WaitResult::Woken`], even if its timeout is expiring concurrently.
    fn wake_one(&self) -> Option<ThreadId>;

    /// Wake every waiter; returns how many there were.
    fn wake_all(&self) -> usize;

    /// Number of queued threads.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
