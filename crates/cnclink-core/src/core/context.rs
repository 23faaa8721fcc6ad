//! UI context token
//!
//! Code that must run on the designated UI thread takes a `&UiContext`
//! instead of consulting a global. The token is `!Send`, so it cannot leave
//! the thread that claimed it.

use std::marker::PhantomData;
use std::thread::{self, ThreadId};

/// Proof of running on the UI thread
#[derive(Debug)]
pub struct UiContext {
    thread: ThreadId,
    _not_send: PhantomData<*const ()>,
}

impl UiContext {
    /// Claim the current thread as the UI context
    pub fn claim() -> Self {
        Self {
            thread: thread::current().id(),
            _not_send: PhantomData,
        }
    }

    /// Whether the caller is on the claiming thread
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread
    }

    /// Thread that claimed the context
    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_current() {
        let ctx = UiContext::claim();
        assert!(ctx.is_current());
        let id = ctx.thread_id();
        let other = thread::spawn(move || thread::current().id()).join().unwrap();
        assert_ne!(id, other);
    }
}
