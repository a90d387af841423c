//! Thread registry and the stop-the-world rendezvous.
//!
//! Every mutator registers a [`ThreadControlBlock`]. A thread requesting a
//! pause sets `stop_requested` and waits on the registry condvar until every
//! other registered thread is either parked at a safepoint or inactive
//! (detached). Inactive threads never touch the heap, so they count as
//! stopped without any handshake.
//!
//! # Lock Ordering
//!
//! The registry lock is only held while changing thread states. The
//! collector takes its own state lock after the world is stopped, and no
//! thread parks while holding the collector state lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};

use crate::object::ObjRef;
use crate::qsbr::QsbrHandle;

pub(crate) const THREAD_STATE_EXECUTING: u8 = 0;
pub(crate) const THREAD_STATE_SAFEPOINT: u8 = 1;
pub(crate) const THREAD_STATE_INACTIVE: u8 = 2;

/// Per-thread data reachable by the collector.
pub(crate) struct ThreadControlBlock {
    pub(crate) tid: u64,
    pub(crate) state: AtomicU8,
    /// Packed `StackRef` words. Roots of this thread.
    pub(crate) stack: Mutex<Vec<u64>>,
    /// Pending count adjustments for deferred-count objects.
    pub(crate) deferred: Mutex<HashMap<ObjRef, i64>>,
    /// Objects whose shared count went negative while this thread owned them.
    pub(crate) merge_queue: SegQueue<ObjRef>,
    pub(crate) qsbr: QsbrHandle,
}

impl ThreadControlBlock {
    pub(crate) fn new(tid: u64, qsbr: QsbrHandle) -> Self {
        Self {
            tid,
            state: AtomicU8::new(THREAD_STATE_INACTIVE),
            stack: Mutex::new(Vec::new()),
            deferred: Mutex::new(HashMap::new()),
            merge_queue: SegQueue::new(),
            qsbr,
        }
    }

    /// Take the deferred-count buffer, leaving it empty.
    pub(crate) fn take_deferred(&self) -> HashMap<ObjRef, i64> {
        std::mem::take(&mut *self.deferred.lock())
    }
}

/// All registered mutator threads of one collector.
pub(crate) struct ThreadRegistry {
    threads: Mutex<Vec<Arc<ThreadControlBlock>>>,
    cond: Condvar,
    stop_requested: AtomicBool,
    next_tid: AtomicU64,
}

impl ThreadRegistry {
    pub(crate) fn new() -> Self {
        Self {
            threads: Mutex::new(Vec::new()),
            cond: Condvar::new(),
            stop_requested: AtomicBool::new(false),
            // 0 is reserved for "no owner"
            next_tid: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_tid(&self) -> u64 {
        self.next_tid.fetch_add(1, Ordering::Relaxed)
    }

    /// Add `tcb` unless `limit` threads are already registered.
    pub(crate) fn register(&self, tcb: Arc<ThreadControlBlock>, limit: Option<usize>) -> bool {
        let mut threads = self.threads.lock();
        if limit.is_some_and(|max| threads.len() >= max) {
            return false;
        }
        threads.push(tcb);
        true
    }

    pub(crate) fn unregister(&self, tid: u64) {
        let mut threads = self.threads.lock();
        threads.retain(|t| t.tid != tid);
        self.cond.notify_all();
    }

    /// Snapshot of every registered thread.
    pub(crate) fn snapshot(&self) -> Vec<Arc<ThreadControlBlock>> {
        self.threads.lock().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.threads.lock().len()
    }

    /// Queue `obj` to its owner for merging. `false` when the owner is gone.
    pub(crate) fn queue_merge(&self, owner: u64, obj: ObjRef) -> bool {
        let threads = self.threads.lock();
        match threads.iter().find(|t| t.tid == owner) {
            Some(tcb) => {
                tcb.merge_queue.push(obj);
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Become active. Blocks while a pause is in progress.
    pub(crate) fn attach(&self, tcb: &ThreadControlBlock) {
        let mut threads = self.threads.lock();
        while self.stop_requested.load(Ordering::Acquire) {
            self.cond.wait(&mut threads);
        }
        tcb.state.store(THREAD_STATE_EXECUTING, Ordering::Release);
    }

    /// Become inactive. Never blocks.
    pub(crate) fn detach(&self, tcb: &ThreadControlBlock) {
        let _threads = self.threads.lock();
        tcb.state.store(THREAD_STATE_INACTIVE, Ordering::Release);
        self.cond.notify_all();
    }

    /// Park at a safepoint if a pause was requested.
    pub(crate) fn park_if_requested(&self, tcb: &ThreadControlBlock) {
        if !self.stop_requested.load(Ordering::Acquire) {
            return;
        }
        let mut threads = self.threads.lock();
        if !self.stop_requested.load(Ordering::Acquire) {
            return;
        }
        tcb.state.store(THREAD_STATE_SAFEPOINT, Ordering::Release);
        self.cond.notify_all();
        while self.stop_requested.load(Ordering::Acquire) {
            self.cond.wait(&mut threads);
        }
        tcb.state.store(THREAD_STATE_EXECUTING, Ordering::Release);
    }

    /// Stop every thread other than `requester`.
    ///
    /// A second requester waits for the first pause to end; it parks itself
    /// while waiting so the first requester can make progress.
    pub(crate) fn stop_the_world(&self, requester: &ThreadControlBlock) {
        let mut threads = self.threads.lock();
        while self.stop_requested.load(Ordering::Acquire) {
            requester
                .state
                .store(THREAD_STATE_SAFEPOINT, Ordering::Release);
            self.cond.notify_all();
            self.cond.wait(&mut threads);
        }
        requester
            .state
            .store(THREAD_STATE_EXECUTING, Ordering::Release);
        self.stop_requested.store(true, Ordering::Release);
        loop {
            let running = threads.iter().any(|t| {
                t.tid != requester.tid && t.state.load(Ordering::Acquire) == THREAD_STATE_EXECUTING
            });
            if !running {
                break;
            }
            self.cond.wait(&mut threads);
        }
    }

    /// Release every parked thread.
    pub(crate) fn start_the_world(&self) {
        let _threads = self.threads.lock();
        self.stop_requested.store(false, Ordering::Release);
        self.cond.notify_all();
    }
}
