//! Quiescent-state-based reclamation.
//!
//! A global write sequence starts at `QSBR_INITIAL` and only ever moves in
//! steps of `QSBR_INCR`, so it is always odd and can never collide with
//! `QSBR_OFFLINE`. Each thread publishes the last sequence it observed at a
//! quiescent point. Memory retired at sequence `goal` may be reused once
//! every attached thread has observed a sequence at or past `goal`.
//!
//! Detached threads publish `QSBR_OFFLINE` and never hold back reclamation,
//! so a thread must detach before blocking for an unbounded time.
//!
//! The common path (`quiescent_state`, the cached check in `poll`) is
//! lock-free. Registration and the slow scan take the registry lock. Each
//! thread holds an `Arc` to its own slot rather than a pointer into the
//! registry, so the registry can grow without pausing anyone.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use parking_lot::{Mutex, RwLock};

/// Published by detached threads.
pub const QSBR_OFFLINE: u64 = 0;
/// Starting write sequence.
pub const QSBR_INITIAL: u64 = 1;
/// Step of the write sequence. Keeps it odd and never `QSBR_OFFLINE`.
pub const QSBR_INCR: u64 = 2;

/// Wrap-safe `a < b` on sequence numbers.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub const fn seq_lt(a: u64, b: u64) -> bool {
    (a.wrapping_sub(b) as i64) < 0
}

/// Wrap-safe `a <= b`.
#[inline]
#[must_use]
pub const fn seq_leq(a: u64, b: u64) -> bool {
    !seq_lt(b, a)
}

/// One thread's published sequence.
#[derive(Debug)]
pub struct QsbrThreadState {
    seq: AtomicU64,
    deferrals: AtomicUsize,
}

impl QsbrThreadState {
    const fn new() -> Self {
        Self {
            seq: AtomicU64::new(QSBR_OFFLINE),
            deferrals: AtomicUsize::new(0),
        }
    }

    /// Last published sequence, `QSBR_OFFLINE` when detached.
    pub fn seq(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }
}

/// A registered participant. Owned by exactly one thread.
#[derive(Debug)]
pub struct QsbrHandle {
    state: Arc<CachePadded<QsbrThreadState>>,
}

impl QsbrHandle {
    /// Last sequence this thread published.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.state.seq()
    }

    /// Whether the thread is attached.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.state.seq() != QSBR_OFFLINE
    }
}

/// Shared QSBR state.
#[derive(Debug)]
pub struct Qsbr {
    wr_seq: CachePadded<AtomicU64>,
    rd_seq: CachePadded<AtomicU64>,
    threads: RwLock<Vec<Arc<CachePadded<QsbrThreadState>>>>,
    deferred_limit: usize,
}

impl Default for Qsbr {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_QSBR_DEFERRED_LIMIT)
    }
}

impl Qsbr {
    /// `deferred_limit` frees are batched per sequence advance.
    #[must_use]
    pub fn new(deferred_limit: usize) -> Self {
        Self {
            wr_seq: CachePadded::new(AtomicU64::new(QSBR_INITIAL)),
            rd_seq: CachePadded::new(AtomicU64::new(QSBR_INITIAL)),
            threads: RwLock::new(Vec::new()),
            deferred_limit,
        }
    }

    /// Current write sequence.
    pub fn write_seq(&self) -> u64 {
        self.wr_seq.load(Ordering::Acquire)
    }

    /// Cached minimum of all attached threads' sequences.
    pub fn read_seq(&self) -> u64 {
        self.rd_seq.load(Ordering::Acquire)
    }

    /// Number of registered participants, attached or not.
    pub fn thread_count(&self) -> usize {
        self.threads.read().len()
    }

    /// Register a new participant. It starts detached.
    pub fn register(&self) -> QsbrHandle {
        let state = Arc::new(CachePadded::new(QsbrThreadState::new()));
        self.threads.write().push(Arc::clone(&state));
        QsbrHandle { state }
    }

    /// Remove a participant. Detaches it first.
    pub fn unregister(&self, handle: &QsbrHandle) {
        self.detach(handle);
        self.threads
            .write()
            .retain(|s| !Arc::ptr_eq(s, &handle.state));
    }

    /// Go online, observing the current write sequence.
    pub fn attach(&self, handle: &QsbrHandle) {
        let seq = self.write_seq();
        handle.state.seq.store(seq, Ordering::Release);
    }

    /// Go offline. A detached thread does not hold back reclamation.
    pub fn detach(&self, handle: &QsbrHandle) {
        handle.state.seq.store(QSBR_OFFLINE, Ordering::Release);
    }

    /// Report that the thread holds no stale pointers.
    pub fn quiescent_state(&self, handle: &QsbrHandle) {
        let seq = self.write_seq();
        handle.state.seq.store(seq, Ordering::Release);
    }

    /// Bump the write sequence and return the new value, which is the goal
    /// for anything retired before the call.
    pub fn advance(&self) -> u64 {
        self.wr_seq.fetch_add(QSBR_INCR, Ordering::AcqRel) + QSBR_INCR
    }

    /// Like [`Qsbr::advance`], but only bumps the shared sequence once every
    /// `deferred_limit` calls per thread; the returned goal is always valid.
    pub fn deferred_advance(&self, handle: &QsbrHandle) -> u64 {
        let n = handle.state.deferrals.fetch_add(1, Ordering::Relaxed) + 1;
        if n < self.deferred_limit {
            return self.write_seq() + QSBR_INCR;
        }
        handle.state.deferrals.store(0, Ordering::Relaxed);
        self.advance()
    }

    /// Whether `goal` has been reached by every attached thread.
    pub fn poll(&self, goal: u64) -> bool {
        if seq_leq(goal, self.read_seq()) {
            return true;
        }
        seq_leq(goal, self.poll_scan())
    }

    /// Recompute the minimum observed sequence and cache it.
    fn poll_scan(&self) -> u64 {
        let mut min_seq = self.write_seq();
        for state in self.threads.read().iter() {
            let seq = state.seq();
            if seq != QSBR_OFFLINE && seq_lt(seq, min_seq) {
                min_seq = seq;
            }
        }

        let mut cached = self.read_seq();
        while seq_lt(cached, min_seq) {
            match self.rd_seq.compare_exchange_weak(
                cached,
                min_seq,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => cached = actual,
            }
        }
        min_seq
    }
}

/// Items whose release waits for a QSBR goal.
#[derive(Debug)]
pub struct DeferredFrees<T> {
    items: Mutex<VecDeque<(u64, T)>>,
}

impl<T> Default for DeferredFrees<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DeferredFrees<T> {
    /// An empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// Hold `item` until `goal` is reached.
    pub fn push(&self, goal: u64, item: T) {
        self.items.lock().push_back((goal, item));
    }

    /// Items still waiting.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Release every item whose goal has been reached. Returns how many.
    pub fn process(&self, qsbr: &Qsbr, mut release: impl FnMut(T)) -> usize {
        let ready: Vec<T> = {
            let mut items = self.items.lock();
            let mut ready = Vec::new();
            let mut pending = VecDeque::with_capacity(items.len());
            while let Some((goal, item)) = items.pop_front() {
                if qsbr.poll(goal) {
                    ready.push(item);
                } else {
                    pending.push_back((goal, item));
                }
            }
            *items = pending;
            ready
        };
        let n = ready.len();
        for item in ready {
            release(item);
        }
        n
    }
}
