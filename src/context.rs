// SPDX-License-Identifier: Apache-2.0 OR MIT
// Per-producer-thread state: the SPSC queue plus drop accounting

use crate::queue::ByteQueue;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Everything one producer thread owns: its byte queue, its dropped-record
/// counter (bounded queues only), and the liveness flag the backend consults
/// before reclaiming it.
///
/// Only the owning thread writes to the queue; only the backend reads from
/// it. The thread-local registration in `registry.rs` is what enforces the
/// single-writer side of that contract.
pub struct ThreadContext {
    queue: ByteQueue,
    dropped: AtomicUsize,
    invalidated: AtomicBool,
    thread_id: u32,
    /// Registration sequence within the owning registry; stable identity
    /// used for deterministic timestamp tie-breaking.
    seq: u64,
}

impl ThreadContext {
    pub(crate) fn new(queue: ByteQueue, seq: u64) -> Self {
        Self {
            queue,
            dropped: AtomicUsize::new(0),
            invalidated: AtomicBool::new(false),
            thread_id: current_thread_id(),
            seq,
        }
    }

    #[inline]
    pub(crate) fn queue(&self) -> &ByteQueue {
        &self.queue
    }

    #[inline]
    pub fn thread_id(&self) -> u32 {
        self.thread_id
    }

    #[inline]
    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    /// Record one dropped message (bounded queue was full).
    #[inline]
    pub(crate) fn note_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Total dropped since the last call; resets the counter. The backend
    /// reads this when idle and reports through the diagnostic channel.
    pub(crate) fn take_dropped(&self) -> usize {
        self.dropped.swap(0, Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Raised by the owning thread's exit guard. The context stays
    /// registered until the backend has drained its queue.
    pub(crate) fn invalidate(&self) {
        self.invalidated.store(true, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire)
    }

    /// Consumer-side emptiness check used by reaping.
    #[inline]
    pub(crate) fn queue_is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Marks the context invalidated when its owning thread exits; held in the
/// thread-local slot so the mark happens during TLS destruction.
pub(crate) struct ContextGuard(pub(crate) Arc<ThreadContext>);

impl Drop for ContextGuard {
    fn drop(&mut self) {
        self.0.invalidate();
    }
}

/// OS thread id on Linux, a process-unique counter elsewhere.
fn current_thread_id() -> u32 {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: gettid has no preconditions.
        unsafe { libc::gettid() as u32 }
    }
    #[cfg(not(target_os = "linux"))]
    {
        use std::sync::atomic::AtomicU32;
        static NEXT: AtomicU32 = AtomicU32::new(1);
        thread_local! {
            static ID: u32 = NEXT.fetch_add(1, Ordering::Relaxed);
        }
        ID.with(|id| *id)
    }
}
