//! Mutator threads.
//!
//! A [`Mutator`] is one thread's handle on a [`Collector`]. It owns the
//! thread's value stack, its deferred-count buffer and its merge queue, and
//! it is where every reference-count operation starts. `Mutator` is not
//! `Send`: create one per thread with [`Mutator::new`].

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::config::CollectorMode;
use crate::error::GcError;
use crate::gc::{Collector, Generation};
use crate::heap::{GcBits, ObjectBox};
use crate::object::{GcObject, ObjRef};
use crate::refcount::{DecRef, DEFERRED_BIAS};
use crate::stackref::StackRef;
use crate::stw::ThreadControlBlock;
use crate::weakref::{self, WeakCallback, WeakRef};

/// A thread attached to a collector.
pub struct Mutator {
    collector: Arc<Collector>,
    pub(crate) tcb: Arc<ThreadControlBlock>,
    /// Payload borrows in progress on this thread. No safepoint or
    /// collection may start while one is open.
    borrow_depth: Cell<usize>,
    _not_send: PhantomData<*const ()>,
}

struct BorrowGuard<'a>(&'a Cell<usize>);

impl<'a> BorrowGuard<'a> {
    fn enter(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self(depth)
    }
}

impl Drop for BorrowGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

impl std::fmt::Debug for Mutator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutator")
            .field("tid", &self.tcb.tid)
            .finish_non_exhaustive()
    }
}

impl Mutator {
    /// Register the current thread with `collector` and attach it.
    ///
    /// # Errors
    ///
    /// [`GcError::SerialModeThreadLimit`] when the collector runs in serial
    /// mode and another mutator is already registered.
    pub fn new(collector: &Arc<Collector>) -> Result<Self, GcError> {
        let threads = &collector.threads;
        let tcb = Arc::new(ThreadControlBlock::new(
            threads.next_tid(),
            collector.heap.qsbr.register(),
        ));
        let limit = match collector.config().mode {
            CollectorMode::Serial => Some(1),
            CollectorMode::Concurrent => None,
        };
        if !threads.register(Arc::clone(&tcb), limit) {
            return Err(GcError::SerialModeThreadLimit);
        }
        threads.attach(&tcb);
        collector.heap.qsbr.attach(&tcb.qsbr);
        Ok(Self {
            collector: Arc::clone(collector),
            tcb,
            borrow_depth: Cell::new(0),
            _not_send: PhantomData,
        })
    }

    /// Thread id used as the owner of objects this thread allocates.
    #[must_use]
    pub fn tid(&self) -> u64 {
        self.tcb.tid
    }

    /// The collector this thread is registered with.
    #[must_use]
    pub const fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }

    pub(crate) fn in_borrow(&self) -> bool {
        self.borrow_depth.get() > 0
    }

    fn slot(&self, obj: ObjRef) -> Arc<ObjectBox> {
        self.collector.heap.expect_live(obj)
    }

    fn qsbr_handle(&self) -> Option<&crate::qsbr::QsbrHandle> {
        match self.collector.config().mode {
            CollectorMode::Serial => None,
            CollectorMode::Concurrent => Some(&self.tcb.qsbr),
        }
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Allocate `value` on the heap and return a strong reference to it.
    ///
    /// Containers are tracked in the young generation; crossing the young
    /// threshold may run an automatic collection before this returns.
    pub fn alloc<T: GcObject>(&self, value: T) -> ObjRef {
        if !self.in_borrow() {
            self.collector.threads.park_if_requested(&self.tcb);
        }
        let container = value.is_container();
        let obj = self.collector.heap.alloc(self.tcb.tid, Box::new(value));
        if container {
            let slot = self.slot(obj);
            self.collector.track(obj, &slot);
            self.collector.maybe_collect(self);
        }
        obj
    }

    // ========================================================================
    // Reference counting
    // ========================================================================

    /// Take a new strong reference to `obj`.
    pub fn incref(&self, obj: ObjRef) {
        let slot = self.slot(obj);
        if slot.has(GcBits::DEFERRED) {
            *self.tcb.deferred.lock().entry(obj).or_default() += 1;
            return;
        }
        slot.rc.inc(self.tcb.tid);
    }

    /// Take a strong reference unless `obj` is already dead or dying.
    pub(crate) fn try_incref(&self, obj: ObjRef) -> bool {
        let Some(slot) = self.collector.heap.get(obj) else {
            return false;
        };
        if slot.has(GcBits::DEFERRED) {
            *self.tcb.deferred.lock().entry(obj).or_default() += 1;
            return true;
        }
        slot.rc.try_inc(self.tcb.tid)
    }

    /// Release a strong reference to `obj`, deallocating it (and anything
    /// only it kept alive) when the count reaches zero.
    pub fn decref(&self, obj: ObjRef) {
        let mut pending = vec![obj];
        while let Some(obj) = pending.pop() {
            let slot = self.slot(obj);
            if slot.has(GcBits::DEFERRED) {
                *self.tcb.deferred.lock().entry(obj).or_default() -= 1;
                continue;
            }
            match slot.rc.dec(self.tcb.tid) {
                DecRef::Alive => {}
                DecRef::Dealloc => self.dealloc(obj, &slot, &mut pending),
                DecRef::Queue(owner) => {
                    if !self.collector.threads.queue_merge(owner, obj)
                        && slot.rc.try_merge() == Some(0)
                    {
                        self.dealloc(obj, &slot, &mut pending);
                    }
                }
            }
        }
    }

    /// Run the deallocation path of `obj` exactly once. Outgoing edges are
    /// pushed onto `pending` for the caller to release.
    pub(crate) fn dealloc(&self, obj: ObjRef, slot: &ObjectBox, pending: &mut Vec<ObjRef>) {
        let heap = &self.collector.heap;
        let payload = heap.begin_dealloc(slot);
        let cleared = heap.weakrefs.clear(obj);
        self.collector.untrack(obj, slot);
        payload.traverse(&mut |child: ObjRef| pending.push(child));
        drop(payload);
        heap.finish_dealloc(obj, slot, self.qsbr_handle());
        weakref::run_callbacks(cleared);
    }

    /// Whether `obj` is immortal. Dead references are reported as mortal.
    #[must_use]
    pub fn is_immortal(&self, obj: ObjRef) -> bool {
        self.collector
            .heap
            .get(obj)
            .is_some_and(|slot| slot.rc.is_immortal())
    }

    /// Whether `obj` carries a deferred reference count.
    #[must_use]
    pub fn is_deferred(&self, obj: ObjRef) -> bool {
        self.collector
            .heap
            .get(obj)
            .is_some_and(|slot| slot.has(GcBits::DEFERRED))
    }

    /// Make `obj` immortal: it is never counted or collected again.
    ///
    /// # Errors
    ///
    /// [`GcError::InvalidReference`] if `obj` is dead.
    pub fn mark_immortal(&self, obj: ObjRef) -> Result<(), GcError> {
        let slot = self.collector.heap.get(obj).ok_or(GcError::InvalidReference)?;
        self.tcb.deferred.lock().remove(&obj);
        slot.unset(GcBits::DEFERRED);
        slot.rc.set_immortal();
        Ok(())
    }

    /// Give `obj` a deferred reference count. Only tracked objects qualify,
    /// since only the cycle collector can reclaim them afterwards. Returns
    /// whether the object now has a deferred count.
    ///
    /// # Errors
    ///
    /// [`GcError::InvalidReference`] if `obj` is dead.
    pub fn mark_deferred(&self, obj: ObjRef) -> Result<bool, GcError> {
        let slot = self.collector.heap.get(obj).ok_or(GcError::InvalidReference)?;
        if slot.rc.is_immortal() || !slot.has(GcBits::TRACKED) {
            return Ok(false);
        }
        if !slot.has(GcBits::DEFERRED) {
            slot.rc.add_deferred_bias();
            slot.set(GcBits::DEFERRED);
        }
        Ok(true)
    }

    /// Current reference count of `obj` as seen from this thread: the
    /// deferred bias is excluded and this thread's buffered adjustments are
    /// included. Only exact when no other thread is touching the object.
    #[must_use]
    pub fn refcount(&self, obj: ObjRef) -> Option<i64> {
        let slot = self.collector.heap.get(obj)?;
        if slot.rc.is_immortal() {
            return Some(i64::MAX);
        }
        let mut count = slot.rc.total();
        if slot.has(GcBits::DEFERRED) {
            count -= DEFERRED_BIAS;
            count += self.tcb.deferred.lock().get(&obj).copied().unwrap_or(0);
        }
        Some(count)
    }

    /// Apply this thread's buffered adjustments of deferred counts.
    pub fn flush_deferred(&self) {
        flush_deferred_buffer(&self.collector, &self.tcb);
    }

    /// Merge every object queued to this thread by other threads.
    pub(crate) fn drain_merge_queue(&self) {
        while let Some(obj) = self.tcb.merge_queue.pop() {
            let Some(slot) = self.collector.heap.get(obj) else {
                continue;
            };
            if slot.rc.try_merge() == Some(0) {
                let mut pending = Vec::new();
                self.dealloc(obj, &slot, &mut pending);
                for child in pending {
                    self.decref(child);
                }
            }
        }
    }

    // ========================================================================
    // Value stack
    // ========================================================================

    /// Push a reference onto this thread's value stack. The stack is a root.
    pub fn push(&self, value: StackRef) {
        self.tcb.stack.lock().push(value.into_raw());
    }

    /// Pop the top of the value stack.
    pub fn pop(&self) -> Option<StackRef> {
        self.tcb.stack.lock().pop().map(StackRef::from_raw)
    }

    /// The object `depth` entries below the top, without popping it.
    #[must_use]
    pub fn peek(&self, depth: usize) -> Option<ObjRef> {
        let stack = self.tcb.stack.lock();
        let index = stack.len().checked_sub(depth)?.checked_sub(1)?;
        Some(StackRef::peek_raw(stack[index]).0)
    }

    /// Depth of the value stack.
    #[must_use]
    pub fn stack_len(&self) -> usize {
        self.tcb.stack.lock().len()
    }

    // ========================================================================
    // Payload access
    // ========================================================================

    /// Run `f` with exclusive access to the payload of `obj`.
    ///
    /// The caller must hold a strong reference to `obj`. While `f` runs no
    /// collection starts on this thread: automatic ones are skipped and
    /// explicit ones fail with [`GcError::CollectionInProgress`].
    ///
    /// # Errors
    ///
    /// [`GcError::InvalidReference`] if `obj` is dead, its payload is
    /// currently being finalized, or it is not a `T`.
    pub fn with_payload<T: GcObject, R>(
        &self,
        obj: ObjRef,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, GcError> {
        let slot = self.collector.heap.get(obj).ok_or(GcError::InvalidReference)?;
        let mut payload = slot.lock_payload();
        let value = payload
            .as_mut()
            .and_then(|p| (**p).as_any_mut().downcast_mut::<T>())
            .ok_or(GcError::InvalidReference)?;
        let _guard = BorrowGuard::enter(&self.borrow_depth);
        Ok(f(value))
    }

    // ========================================================================
    // Collector interaction
    // ========================================================================

    /// Run a collection of `generation`. Returns the number of objects freed.
    ///
    /// # Errors
    ///
    /// See [`Collector::collect`].
    pub fn collect(&self, generation: Generation) -> Result<usize, GcError> {
        self.collector.collect(self, generation)
    }

    /// Collect the whole heap.
    ///
    /// # Errors
    ///
    /// See [`Collector::collect`].
    pub fn collect_full(&self) -> Result<usize, GcError> {
        self.collector.collect(self, Generation::Full)
    }

    /// Park if a pause is pending, merge queued objects, report a quiescent
    /// state and reuse memory whose QSBR goal has been reached.
    pub fn safepoint(&self) {
        if self.in_borrow() {
            return;
        }
        self.collector.threads.park_if_requested(&self.tcb);
        self.drain_merge_queue();
        self.collector.heap.qsbr.quiescent_state(&self.tcb.qsbr);
        self.collector.heap.process_deferred_frees();
    }

    /// Run `f` detached: the thread stops holding back pauses and memory
    /// reuse until `f` returns. `f` must not touch the heap.
    pub fn detached<R>(&self, f: impl FnOnce() -> R) -> R {
        self.collector.threads.detach(&self.tcb);
        self.collector.heap.qsbr.detach(&self.tcb.qsbr);
        let result = f();
        self.collector.threads.attach(&self.tcb);
        self.collector.heap.qsbr.attach(&self.tcb.qsbr);
        result
    }

    // ========================================================================
    // Tracking & weak references
    // ========================================================================

    /// Stop tracking `obj`. The cycle collector will never see it again.
    pub fn untrack(&self, obj: ObjRef) {
        if let Some(slot) = self.collector.heap.get(obj) {
            self.collector.untrack(obj, &slot);
        }
    }

    /// Whether the cycle collector tracks `obj`.
    #[must_use]
    pub fn is_tracked(&self, obj: ObjRef) -> bool {
        self.collector
            .heap
            .get(obj)
            .is_some_and(|slot| slot.has(GcBits::TRACKED))
    }

    /// Whether `obj`'s finalizer has already run.
    #[must_use]
    pub fn is_finalized(&self, obj: ObjRef) -> bool {
        self.collector
            .heap
            .get(obj)
            .is_some_and(|slot| slot.has(GcBits::FINALIZED))
    }

    /// Create a weak reference to `obj`. `callback` runs once after the
    /// referent dies, as long as the weak reference is still held.
    ///
    /// # Errors
    ///
    /// [`GcError::InvalidReference`] if `obj` is dead.
    pub fn new_weakref(
        &self,
        obj: ObjRef,
        callback: Option<WeakCallback>,
    ) -> Result<WeakRef, GcError> {
        if self.collector.heap.get(obj).is_none() {
            return Err(GcError::InvalidReference);
        }
        Ok(self.collector.heap.weakrefs.register(obj, callback))
    }
}

/// Apply `tcb`'s buffered deferred-count adjustments to the shared counts.
pub(crate) fn flush_deferred_buffer(collector: &Collector, tcb: &ThreadControlBlock) {
    for (obj, delta) in tcb.take_deferred() {
        if let Some(slot) = collector.heap.get(obj) {
            slot.rc.add_shared(delta);
        }
    }
}

impl Drop for Mutator {
    fn drop(&mut self) {
        while let Some(value) = self.pop() {
            value.close(self);
        }
        self.flush_deferred();
        self.drain_merge_queue();

        // Objects this thread still owns get their counts merged now; any
        // whose count is already zero die here.
        let tid = self.tcb.tid;
        let mut abandoned = Vec::new();
        self.collector.heap.visit_live(|obj, slot| {
            if slot.rc.owner() == tid {
                abandoned.push(obj);
            }
        });
        for obj in abandoned {
            let Some(slot) = self.collector.heap.get(obj) else {
                continue;
            };
            if slot.rc.try_merge() == Some(0) {
                let mut pending = Vec::new();
                self.dealloc(obj, &slot, &mut pending);
                for child in pending {
                    self.decref(child);
                }
            }
        }

        self.collector.heap.qsbr.quiescent_state(&self.tcb.qsbr);
        self.collector.heap.process_deferred_frees();
        self.collector.threads.detach(&self.tcb);
        self.collector.threads.unregister(tid);
        self.collector.heap.qsbr.unregister(&self.tcb.qsbr);
    }
}
