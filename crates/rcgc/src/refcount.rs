//! Per-object reference counts.
//!
//! Counts are biased toward the allocating thread: the owner adjusts `local`
//! without contention, every other thread adjusts `shared`. The two halves
//! are merged when the owner's count drops to zero, when the owner drains its
//! merge queue, or by the collector inside a stop-the-world pause.
//!
//! The low two bits of `shared` hold the merge state:
//!
//! | State      | Meaning                                                     |
//! |------------|-------------------------------------------------------------|
//! | `UNMERGED` | owner still holds a local count                             |
//! | `QUEUED`   | shared count went negative; queued to the owner for merging |
//! | `MERGED`   | `local` is retired, `shared` is the authoritative count     |
//!
//! Immortal objects store `IMMORTAL_LOCAL` in `local` and are never counted.
//! Deferred objects carry `DEFERRED_BIAS` in `shared` so they cannot reach
//! zero before the collector reconciles them.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};

use crate::error::fatal_error;

/// Local half of an immortal object.
pub const IMMORTAL_LOCAL: u32 = u32::MAX;
/// Added to the shared half of a deferred object so it never reaches
/// zero through ordinary counting.
pub const DEFERRED_BIAS: i64 = 1 << 40;

const SHARED_SHIFT: u32 = 2;
const SHARED_STATE_MASK: i64 = 0b11;
const SHARED_UNMERGED: i64 = 0;
const SHARED_QUEUED: i64 = 2;
const SHARED_MERGED: i64 = 3;

/// Owner id meaning "no owner" (the count is merged).
pub const NO_OWNER: u64 = 0;

#[inline]
const fn shared_count(shared: i64) -> i64 {
    shared >> SHARED_SHIFT
}

#[inline]
const fn shared_state(shared: i64) -> i64 {
    shared & SHARED_STATE_MASK
}

#[inline]
const fn make_shared(count: i64, state: i64) -> i64 {
    (count << SHARED_SHIFT) | state
}

/// What the caller must do after a decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecRef {
    /// The object is still referenced.
    Alive,
    /// The count reached zero; the caller deallocates.
    Dealloc,
    /// The shared count went negative; queue the object to this owner thread.
    Queue(u64),
}

/// Biased reference count stored in every object header.
#[derive(Debug)]
pub struct RefCount {
    local: AtomicU32,
    shared: AtomicI64,
    owner: AtomicU64,
}

impl RefCount {
    /// A fresh count of one owned by `owner`.
    pub const fn new(owner: u64) -> Self {
        Self {
            local: AtomicU32::new(1),
            shared: AtomicI64::new(make_shared(0, SHARED_UNMERGED)),
            owner: AtomicU64::new(owner),
        }
    }

    /// Reinitialize for a reused slot.
    pub fn reset(&self, owner: u64) {
        self.local.store(1, Ordering::Relaxed);
        self.shared
            .store(make_shared(0, SHARED_UNMERGED), Ordering::Relaxed);
        self.owner.store(owner, Ordering::Release);
    }

    /// Owning thread, or [`NO_OWNER`].
    pub fn owner(&self) -> u64 {
        self.owner.load(Ordering::Relaxed)
    }

    /// Whether the count is pinned.
    pub fn is_immortal(&self) -> bool {
        self.local.load(Ordering::Relaxed) == IMMORTAL_LOCAL
    }

    /// Make the object immortal. Its count never changes again.
    pub fn set_immortal(&self) {
        self.local.store(IMMORTAL_LOCAL, Ordering::Relaxed);
        self.shared
            .store(make_shared(0, SHARED_MERGED), Ordering::Relaxed);
        self.owner.store(NO_OWNER, Ordering::Release);
    }

    /// Whether the local half is still live (owner has not merged).
    pub fn is_merged(&self) -> bool {
        shared_state(self.shared.load(Ordering::Acquire)) == SHARED_MERGED
    }

    /// Whether the object waits in its owner's merge queue.
    pub fn is_queued(&self) -> bool {
        shared_state(self.shared.load(Ordering::Acquire)) == SHARED_QUEUED
    }

    /// The full count, `local + shared`. Only exact while no other thread is
    /// mutating the count (inside a pause, or from the owner of a quiet object).
    pub fn total(&self) -> i64 {
        if self.is_immortal() {
            return i64::MAX;
        }
        let local = i64::from(self.local.load(Ordering::Acquire));
        local + shared_count(self.shared.load(Ordering::Acquire))
    }

    /// Increment on behalf of thread `tid`.
    pub fn inc(&self, tid: u64) {
        if self.is_immortal() {
            return;
        }
        if tid != NO_OWNER && self.owner.load(Ordering::Relaxed) == tid {
            self.local.fetch_add(1, Ordering::Relaxed);
        } else {
            self.shared
                .fetch_add(1 << SHARED_SHIFT, Ordering::Relaxed);
        }
    }

    /// Increment unless the count has already reached zero for good.
    /// Used where a weak reference races with the final release.
    pub fn try_inc(&self, tid: u64) -> bool {
        if self.is_immortal() {
            return true;
        }
        if tid != NO_OWNER
            && self.owner.load(Ordering::Relaxed) == tid
            && self.local.load(Ordering::Acquire) > 0
        {
            self.local.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        let mut shared = self.shared.load(Ordering::Acquire);
        loop {
            let count = shared_count(shared);
            let state = shared_state(shared);
            if state == SHARED_MERGED && count <= 0 {
                return false;
            }
            if state != SHARED_MERGED && count + i64::from(self.local.load(Ordering::Acquire)) <= 0 {
                return false;
            }
            match self.shared.compare_exchange_weak(
                shared,
                make_shared(count + 1, state),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => shared = actual,
            }
        }
    }

    /// Decrement on behalf of thread `tid`. The caller acts on the result.
    pub fn dec(&self, tid: u64) -> DecRef {
        if self.is_immortal() {
            return DecRef::Alive;
        }
        if tid != NO_OWNER && self.owner.load(Ordering::Relaxed) == tid {
            let prev = self.local.fetch_sub(1, Ordering::Release);
            if prev == 0 {
                fatal_error("negative local reference count");
            }
            if prev == 1 {
                return self.merge_zero_local();
            }
            return DecRef::Alive;
        }
        self.dec_shared()
    }

    fn merge_zero_local(&self) -> DecRef {
        self.owner.store(NO_OWNER, Ordering::Relaxed);
        let mut shared = self.shared.load(Ordering::Acquire);
        let merged = loop {
            let new = (shared & !SHARED_STATE_MASK) | SHARED_MERGED;
            match self.shared.compare_exchange_weak(
                shared,
                new,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break new,
                Err(actual) => shared = actual,
            }
        };
        match shared_count(merged) {
            0 => DecRef::Dealloc,
            n if n < 0 => fatal_error("negative reference count after merge"),
            _ => DecRef::Alive,
        }
    }

    fn dec_shared(&self) -> DecRef {
        let mut shared = self.shared.load(Ordering::Acquire);
        loop {
            let count = shared_count(shared);
            let state = shared_state(shared);
            let (new, outcome) = if state == SHARED_MERGED {
                if count <= 0 {
                    fatal_error("decrement of a dead object");
                }
                let outcome = if count == 1 {
                    DecRef::Dealloc
                } else {
                    DecRef::Alive
                };
                (make_shared(count - 1, SHARED_MERGED), outcome)
            } else if state == SHARED_UNMERGED && count == 0 {
                (
                    make_shared(-1, SHARED_QUEUED),
                    DecRef::Queue(self.owner.load(Ordering::Relaxed)),
                )
            } else {
                (make_shared(count - 1, state), DecRef::Alive)
            };
            match self.shared.compare_exchange_weak(
                shared,
                new,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return outcome,
                Err(actual) => shared = actual,
            }
        }
    }

    /// Fold `local` into `shared` and retire the owner, adding `extra` to the
    /// result. Returns the merged count.
    ///
    /// Must be called by the owner thread or inside a stop-the-world pause.
    pub fn explicit_merge(&self, extra: i64) -> i64 {
        if self.is_immortal() {
            return i64::MAX;
        }
        let mut shared = self.shared.load(Ordering::Acquire);
        loop {
            let (total, new) = if shared_state(shared) == SHARED_MERGED {
                let total = shared_count(shared) + extra;
                (total, make_shared(total, SHARED_MERGED))
            } else {
                let local = i64::from(self.local.load(Ordering::Acquire));
                let total = local + shared_count(shared) + extra;
                (total, make_shared(total, SHARED_MERGED))
            };
            match self.shared.compare_exchange_weak(
                shared,
                new,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.local.store(0, Ordering::Release);
                    self.owner.store(NO_OWNER, Ordering::Release);
                    if total < 0 {
                        fatal_error("negative reference count after explicit merge");
                    }
                    return total;
                }
                Err(actual) => shared = actual,
            }
        }
    }

    /// Merge on behalf of an owner that is gone. Only the caller that
    /// performs the transition gets the merged count; everyone else gets
    /// `None`, so at most one of them can deallocate.
    pub fn try_merge(&self) -> Option<i64> {
        if self.is_immortal() {
            return None;
        }
        let mut shared = self.shared.load(Ordering::Acquire);
        loop {
            if shared_state(shared) == SHARED_MERGED {
                return None;
            }
            let local = i64::from(self.local.load(Ordering::Acquire));
            let total = local + shared_count(shared);
            match self.shared.compare_exchange_weak(
                shared,
                make_shared(total, SHARED_MERGED),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.local.store(0, Ordering::Release);
                    self.owner.store(NO_OWNER, Ordering::Release);
                    if total < 0 {
                        fatal_error("negative reference count after merge");
                    }
                    return Some(total);
                }
                Err(actual) => shared = actual,
            }
        }
    }

    /// Add `delta` to the shared half. Used when flushing per-thread buffers.
    pub fn add_shared(&self, delta: i64) {
        if self.is_immortal() || delta == 0 {
            return;
        }
        self.shared
            .fetch_add(delta << SHARED_SHIFT, Ordering::AcqRel);
    }

    /// Switch to deferred counting.
    pub fn add_deferred_bias(&self) {
        self.add_shared(DEFERRED_BIAS);
    }

    /// Switch back to ordinary counting.
    pub fn remove_deferred_bias(&self) {
        self.add_shared(-DEFERRED_BIAS);
    }
}
