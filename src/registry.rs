// Thread context registry: how the backend discovers producer queues

use crate::config::QueueKind;
use crate::context::{ContextGuard, ThreadContext};
use crate::queue::{BoundedByteQueue, ByteQueue, UnboundedByteQueue};
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Unbounded queues stop doubling their segments at this size.
const MAX_SEGMENT_SIZE: usize = 8 * 1024 * 1024;

/// The set of known producer thread contexts for one engine.
///
/// Registration takes the lock once per thread lifetime; the backend polls
/// the `generation` counter and re-clones the context list only when it
/// changed, so steady-state snapshots are a single atomic load.
pub struct ThreadContextRegistry {
    /// Distinguishes engines in the per-thread context cache
    id: usize,
    queue_kind: QueueKind,
    contexts: Mutex<Vec<Arc<ThreadContext>>>,
    generation: AtomicU64,
    next_seq: AtomicU64,
}

thread_local! {
    /// One slot per (thread, registry) pair. Dropping the vector at thread
    /// exit runs the guards, which mark each context invalidated.
    static LOCAL_CONTEXTS: RefCell<Vec<(usize, ContextGuard)>> = const { RefCell::new(Vec::new()) };
}

static NEXT_REGISTRY_ID: AtomicUsize = AtomicUsize::new(1);

impl ThreadContextRegistry {
    pub fn new(queue_kind: QueueKind) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            queue_kind,
            contexts: Mutex::new(Vec::new()),
            generation: AtomicU64::new(0),
            next_seq: AtomicU64::new(0),
        })
    }

    fn make_queue(&self) -> ByteQueue {
        match self.queue_kind {
            QueueKind::Bounded { capacity } => ByteQueue::Bounded(BoundedByteQueue::new(capacity)),
            QueueKind::Unbounded { initial_capacity } => ByteQueue::Unbounded(
                UnboundedByteQueue::new(initial_capacity, MAX_SEGMENT_SIZE),
            ),
        }
    }

    /// The calling thread's context, created and registered on first use.
    pub fn local_context(&self) -> Arc<ThreadContext> {
        LOCAL_CONTEXTS.with(|cell| {
            let mut local = cell.borrow_mut();
            if let Some((_, guard)) = local.iter().find(|(id, _)| *id == self.id) {
                return Arc::clone(&guard.0);
            }
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            let ctx = Arc::new(ThreadContext::new(self.make_queue(), seq));
            self.register(Arc::clone(&ctx));
            local.push((self.id, ContextGuard(Arc::clone(&ctx))));
            ctx
        })
    }

    /// Thread-safe insertion; called at most once per context.
    fn register(&self, ctx: Arc<ThreadContext>) {
        let mut contexts = self.contexts.lock().unwrap_or_else(|p| p.into_inner());
        contexts.push(ctx);
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Bumped on every register and reap; lets the backend cache snapshots.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// All currently registered contexts. Includes every context registered
    /// before the call.
    pub fn snapshot(&self) -> Vec<Arc<ThreadContext>> {
        self.contexts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Remove contexts whose thread exited and whose queue is drained.
    /// The backend calls this only while its pending heap is empty, so no
    /// transit event can still reference a removed context; the `Arc` keeps
    /// the memory itself alive until the last reader lets go.
    ///
    /// Returns the removed contexts so the caller can report any final
    /// dropped-message counts.
    pub fn reap(&self) -> Vec<Arc<ThreadContext>> {
        let mut contexts = self.contexts.lock().unwrap_or_else(|p| p.into_inner());
        let mut removed = Vec::new();
        contexts.retain(|ctx| {
            if ctx.is_invalidated() && ctx.queue_is_empty() {
                removed.push(Arc::clone(ctx));
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            self.generation.fetch_add(1, Ordering::Release);
        }
        removed
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.contexts.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}
