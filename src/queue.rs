// Lock-free SPSC byte queues for log records
//
// Unlike a slot ring, records here are variable-length byte runs, so the
// bounded queue is a bipartite ring: reservations are always contiguous and
// the producer wraps to the front when the tail cannot fit a record. The
// publication edge is the same release/acquire pair a slot ring uses.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Cache-aligned wrapper to prevent false sharing
#[repr(align(64))]
struct CacheAligned<T>(T);

/// Queue buffers are allocated at this alignment so byte offset 0 satisfies
/// the record alignment.
const BUFFER_ALIGN: usize = 64;

/// Every reservation starts and ends on this boundary, which keeps record
/// headers and all argument offsets exactly computable.
pub(crate) const RESERVATION_ALIGN: usize = 8;

struct Pending {
    start: usize,
    len: usize,
    wraps: bool,
    write_before: usize,
}

/// Fixed-capacity single-producer single-consumer byte queue.
///
/// `prepare_write` returns a contiguous region or `None` when the record
/// cannot fit; the producer never blocks. The consumer sees committed bytes
/// only: `commit_write` publishes with Release, `prepare_read` observes with
/// Acquire.
pub struct BoundedByteQueue {
    buf: NonNull<u8>,
    capacity: usize,
    /// Producer position, a byte offset in `[0, capacity]`
    write: CacheAligned<AtomicUsize>,
    /// Consumer position, a byte offset in `[0, capacity]`
    read: CacheAligned<AtomicUsize>,
    /// End of valid data before the producer wrapped; consulted by the
    /// consumer only while `write < read`
    last: AtomicUsize,
    /// Producer-local reservation state
    pending: UnsafeCell<Option<Pending>>,
}

// SAFETY: BoundedByteQueue is Sync because:
// - Only the owning thread writes (`write`, `last`, `pending`, reserved bytes)
// - Only the backend thread reads (`read`, committed bytes)
// - Committed bytes are published via Release and observed via Acquire, and
//   reserved regions never overlap readable regions
unsafe impl Send for BoundedByteQueue {}
unsafe impl Sync for BoundedByteQueue {}

impl BoundedByteQueue {
    /// # Panics
    /// Panics if capacity is not a power of two or is below one cache line.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "capacity must be a power of 2");
        assert!(capacity >= BUFFER_ALIGN, "capacity below one cache line");

        let layout = Layout::from_size_align(capacity, BUFFER_ALIGN).expect("queue layout");
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc(layout) };
        let Some(buf) = NonNull::new(raw) else {
            handle_alloc_error(layout);
        };

        Self {
            buf,
            capacity,
            write: CacheAligned(AtomicUsize::new(0)),
            read: CacheAligned(AtomicUsize::new(0)),
            last: AtomicUsize::new(0),
            pending: UnsafeCell::new(None),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reserve `n` contiguous bytes. Returns `None` when the queue is full.
    /// `n` must be a non-zero multiple of [`RESERVATION_ALIGN`]; the
    /// returned region starts on that boundary.
    pub fn prepare_write(&self, n: usize) -> Option<&mut [u8]> {
        debug_assert!(n > 0 && n % RESERVATION_ALIGN == 0);
        if n > self.capacity {
            return None;
        }

        let w = self.write.0.load(Ordering::Relaxed);
        let r = self.read.0.load(Ordering::Acquire);

        let (start, wraps) = if w >= r {
            // Data occupies [r, w); free space is the tail and the front.
            if self.capacity - w >= n {
                (w, false)
            } else if r > n {
                // Strictly greater: keep a gap so a wrapped write position
                // never catches the read position, which would read as empty.
                (0, true)
            } else {
                return None;
            }
        } else {
            // Already wrapped; free space is [w, r).
            if r - w > n {
                (w, false)
            } else {
                return None;
            }
        };

        // SAFETY: only the producer touches `pending`.
        unsafe {
            *self.pending.get() = Some(Pending {
                start,
                len: n,
                wraps,
                write_before: w,
            });
        }

        // SAFETY: [start, start + n) lies inside the buffer, is disjoint
        // from the readable region by the arithmetic above, and start is a
        // multiple of RESERVATION_ALIGN within a BUFFER_ALIGN-ed allocation.
        Some(unsafe { std::slice::from_raw_parts_mut(self.buf.as_ptr().add(start), n) })
    }

    /// Publish `n` bytes of the region returned by the last
    /// `prepare_write`. Must be called at most once per reservation.
    pub fn commit_write(&self, n: usize) {
        // SAFETY: only the producer touches `pending`.
        let pending = unsafe { (*self.pending.get()).take() }
            .expect("commit_write without a matching prepare_write");
        debug_assert!(n > 0 && n <= pending.len && n % RESERVATION_ALIGN == 0);

        if pending.wraps {
            // Mark where valid data ends at the tail, then publish the
            // front write. The consumer acquires `write` and therefore
            // observes `last` as well.
            self.last.store(pending.write_before, Ordering::Release);
            self.write.0.store(n, Ordering::Release);
        } else {
            self.write.0.store(pending.start + n, Ordering::Release);
        }
    }

    /// Longest currently readable contiguous run, or `None` when empty.
    /// The returned slice is invalidated by the next `finish_read`.
    pub fn prepare_read(&self) -> Option<&[u8]> {
        let r = self.read.0.load(Ordering::Relaxed);
        let w = self.write.0.load(Ordering::Acquire);

        if w >= r {
            if w == r {
                return None;
            }
            // SAFETY: [r, w) was published with Release and is not touched
            // by the producer until released via finish_read.
            Some(unsafe { std::slice::from_raw_parts(self.buf.as_ptr().add(r), w - r) })
        } else {
            let l = self.last.load(Ordering::Acquire);
            if r < l {
                // SAFETY: as above for the tail region [r, l).
                Some(unsafe { std::slice::from_raw_parts(self.buf.as_ptr().add(r), l - r) })
            } else {
                // Tail fully consumed; jump to the wrapped front.
                debug_assert_eq!(r, l);
                self.read.0.store(0, Ordering::Release);
                if w == 0 {
                    None
                } else {
                    // SAFETY: as above for the front region [0, w).
                    Some(unsafe { std::slice::from_raw_parts(self.buf.as_ptr(), w) })
                }
            }
        }
    }

    /// Release `n` consumed bytes.
    pub fn finish_read(&self, n: usize) {
        debug_assert!(n > 0 && n % RESERVATION_ALIGN == 0);
        let r = self.read.0.load(Ordering::Relaxed);
        self.read.0.store(r + n, Ordering::Release);
    }

    pub fn is_empty(&self) -> bool {
        let r = self.read.0.load(Ordering::Acquire);
        let w = self.write.0.load(Ordering::Acquire);
        r == w
    }
}

impl Drop for BoundedByteQueue {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.capacity, BUFFER_ALIGN).expect("queue layout");
        // SAFETY: allocated in `new` with the same layout.
        unsafe { dealloc(self.buf.as_ptr(), layout) };
    }
}

struct Segment {
    queue: BoundedByteQueue,
    next: AtomicPtr<Segment>,
}

impl Segment {
    fn new(capacity: usize) -> Self {
        Self {
            queue: BoundedByteQueue::new(capacity),
            next: AtomicPtr::new(std::ptr::null_mut()),
        }
    }
}

/// Unbounded SPSC byte queue: a chain of bounded segments.
///
/// When a segment cannot fit a record the producer allocates a segment of
/// twice the capacity (up to `max_segment`), publishes it through the old
/// segment's `next` pointer, and never writes the old segment again. The
/// consumer drains a segment fully, then follows `next` and frees what it
/// leaves behind. `prepare_write` never returns `None`.
pub struct UnboundedByteQueue {
    /// Producer's current segment; touched only by the owning thread
    producer_seg: UnsafeCell<*mut Segment>,
    /// Consumer's current segment; touched only by the backend thread
    consumer_seg: UnsafeCell<*mut Segment>,
    max_segment: usize,
}

// SAFETY: the two segment cursors are strictly single-threaded (producer and
// consumer respectively); the shared handoff is the `next` AtomicPtr plus the
// inner queues' own synchronization. A segment is freed only by the consumer,
// only after it is drained and the producer has published a successor.
unsafe impl Send for UnboundedByteQueue {}
unsafe impl Sync for UnboundedByteQueue {}

impl UnboundedByteQueue {
    pub fn new(initial_capacity: usize, max_segment: usize) -> Self {
        let seg = Box::into_raw(Box::new(Segment::new(initial_capacity)));
        Self {
            producer_seg: UnsafeCell::new(seg),
            consumer_seg: UnsafeCell::new(seg),
            max_segment,
        }
    }

    pub fn prepare_write(&self, n: usize) -> Option<&mut [u8]> {
        // SAFETY: producer-only cursor.
        let seg = unsafe { *self.producer_seg.get() };
        // SAFETY: the producer's segment is freed only after the producer
        // publishes a successor, which it has not yet done.
        if let Some(buf) = unsafe { (*seg).queue.prepare_write(n) } {
            return Some(buf);
        }

        // Grow: double, but always leave room for the record itself.
        let mut new_cap = (unsafe { (*seg).queue.capacity() } * 2).min(self.max_segment);
        while new_cap < n * 2 {
            new_cap *= 2;
        }
        let new_seg = Box::into_raw(Box::new(Segment::new(new_cap)));

        // SAFETY: fresh empty segment sized to fit `n`.
        let buf = unsafe {
            (*new_seg)
                .queue
                .prepare_write(n)
                .expect("fresh segment rejected a record it was sized for")
        };

        // Publish the successor, then move over. The old segment is never
        // written again.
        unsafe {
            (*seg).next.store(new_seg, Ordering::Release);
            *self.producer_seg.get() = new_seg;
        }
        Some(buf)
    }

    pub fn commit_write(&self, n: usize) {
        // SAFETY: producer-only cursor; segment alive as in prepare_write.
        unsafe { (*(*self.producer_seg.get())).queue.commit_write(n) }
    }

    pub fn prepare_read(&self) -> Option<&[u8]> {
        loop {
            // SAFETY: consumer-only cursor.
            let seg = unsafe { *self.consumer_seg.get() };
            // SAFETY: the consumer frees segments only below, after moving
            // its cursor past them.
            if let Some(bytes) = unsafe { (*seg).queue.prepare_read() } {
                return Some(bytes);
            }
            let next = unsafe { (*seg).next.load(Ordering::Acquire) };
            if next.is_null() {
                return None;
            }
            // The Acquire load of `next` made every commit that preceded
            // the handoff visible; re-poll before abandoning the segment.
            if let Some(bytes) = unsafe { (*seg).queue.prepare_read() } {
                return Some(bytes);
            }
            // Drained for good: advance and free.
            unsafe {
                *self.consumer_seg.get() = next;
                drop(Box::from_raw(seg));
            }
        }
    }

    pub fn finish_read(&self, n: usize) {
        // SAFETY: consumer-only cursor.
        unsafe { (*(*self.consumer_seg.get())).queue.finish_read(n) }
    }

    /// Consumer-side emptiness; conservative (may report non-empty while a
    /// handoff is in flight).
    pub fn is_empty(&self) -> bool {
        // SAFETY: consumer-only cursor.
        let seg = unsafe { *self.consumer_seg.get() };
        unsafe { (*seg).queue.is_empty() && (*seg).next.load(Ordering::Acquire).is_null() }
    }
}

impl Drop for UnboundedByteQueue {
    fn drop(&mut self) {
        // Walk the chain from the consumer end; by the time the queue drops
        // no other thread holds either cursor.
        let mut seg = *self.consumer_seg.get_mut();
        while !seg.is_null() {
            // SAFETY: every segment in the chain was Box::into_raw'd and is
            // reachable exactly once.
            let boxed = unsafe { Box::from_raw(seg) };
            seg = boxed.next.load(Ordering::Relaxed);
        }
    }
}

/// The per-thread transport, selected at engine configuration time.
pub enum ByteQueue {
    Bounded(BoundedByteQueue),
    Unbounded(UnboundedByteQueue),
}

impl ByteQueue {
    pub fn prepare_write(&self, n: usize) -> Option<&mut [u8]> {
        match self {
            ByteQueue::Bounded(q) => q.prepare_write(n),
            ByteQueue::Unbounded(q) => q.prepare_write(n),
        }
    }

    pub fn commit_write(&self, n: usize) {
        match self {
            ByteQueue::Bounded(q) => q.commit_write(n),
            ByteQueue::Unbounded(q) => q.commit_write(n),
        }
    }

    pub fn prepare_read(&self) -> Option<&[u8]> {
        match self {
            ByteQueue::Bounded(q) => q.prepare_read(),
            ByteQueue::Unbounded(q) => q.prepare_read(),
        }
    }

    pub fn finish_read(&self, n: usize) {
        match self {
            ByteQueue::Bounded(q) => q.finish_read(n),
            ByteQueue::Unbounded(q) => q.finish_read(n),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ByteQueue::Bounded(q) => q.is_empty(),
            ByteQueue::Unbounded(q) => q.is_empty(),
        }
    }
}
