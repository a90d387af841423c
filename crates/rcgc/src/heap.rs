//! Object storage.
//!
//! Objects live in an arena of reusable slots. A slot keeps its header
//! allocation for the lifetime of the heap; freeing an object drops its
//! payload, bumps the slot generation so stale handles stop resolving, and
//! returns the index to the free list. In concurrent mode the index only
//! becomes reusable once QSBR confirms that no thread can still hold a
//! handle read before the free.

use std::sync::atomic::{AtomicU8, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::error::fatal_error;
use crate::object::{GcObject, ObjRef, GENERATION_MASK};
use crate::qsbr::{DeferredFrees, Qsbr, QsbrHandle};
use crate::refcount::RefCount;
use crate::weakref::WeakRegistry;

bitflags::bitflags! {
    /// Collector state bits in each object header.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct GcBits: u8 {
        /// Linked into a generation or worklist.
        const TRACKED     = 1 << 0;
        /// Found unreachable by the current pass.
        const UNREACHABLE = 1 << 1;
        /// Lives in the permanent generation.
        const FROZEN      = 1 << 2;
        /// Finalizer already ran.
        const FINALIZED   = 1 << 3;
        /// Lives in old half-space 1 (otherwise half-space 0 when old).
        const OLD_SPACE_1 = 1 << 4;
        /// Reached by the mark-alive pre-pass.
        const ALIVE       = 1 << 5;
        /// Count carries the deferred bias.
        const DEFERRED    = 1 << 6;
        /// Deallocated; the slot is waiting for reuse.
        const FREED       = 1 << 7;
    }
}

/// Header plus payload for one slot.
pub(crate) struct ObjectBox {
    pub(crate) rc: RefCount,
    bits: AtomicU8,
    generation: AtomicU32,
    type_name: Mutex<&'static str>,
    payload: Mutex<Option<Box<dyn GcObject>>>,
}

impl ObjectBox {
    fn new(owner: u64, payload: Box<dyn GcObject>) -> Self {
        let type_name = payload.type_name();
        Self {
            rc: RefCount::new(owner),
            bits: AtomicU8::new(0),
            generation: AtomicU32::new(0),
            type_name: Mutex::new(type_name),
            payload: Mutex::new(Some(payload)),
        }
    }

    pub(crate) fn bits(&self) -> GcBits {
        GcBits::from_bits_retain(self.bits.load(Ordering::Acquire))
    }

    pub(crate) fn has(&self, flag: GcBits) -> bool {
        self.bits().contains(flag)
    }

    pub(crate) fn set(&self, flag: GcBits) {
        self.bits.fetch_or(flag.bits(), Ordering::AcqRel);
    }

    pub(crate) fn unset(&self, flag: GcBits) {
        self.bits.fetch_and(!flag.bits(), Ordering::AcqRel);
    }

    /// Overwrite the whole bit set. Used when a freed slot is reused.
    pub(crate) fn restore_bits(&self, bits: GcBits) {
        self.bits.store(bits.bits(), Ordering::Release);
    }

    /// Claim the right to deallocate. `false` means someone already did.
    fn try_mark_freed(&self) -> bool {
        let freed = GcBits::FREED.bits();
        self.bits.fetch_or(freed, Ordering::AcqRel) & freed == 0
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn type_name(&self) -> &'static str {
        *self.type_name.lock()
    }

    pub(crate) fn lock_payload(&self) -> MutexGuard<'_, Option<Box<dyn GcObject>>> {
        self.payload.lock()
    }
}

/// The object arena shared by every mutator of one collector.
pub struct Heap {
    slots: RwLock<Vec<Arc<ObjectBox>>>,
    free: Mutex<Vec<u32>>,
    deferred: DeferredFrees<u32>,
    live: AtomicUsize,
    pub(crate) qsbr: Qsbr,
    pub(crate) weakrefs: WeakRegistry,
}

impl Heap {
    pub(crate) fn new(qsbr_deferred_limit: usize) -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            free: Mutex::new(Vec::new()),
            deferred: DeferredFrees::new(),
            live: AtomicUsize::new(0),
            qsbr: Qsbr::new(qsbr_deferred_limit),
            weakrefs: WeakRegistry::default(),
        }
    }

    /// Number of objects currently allocated.
    pub fn live_objects(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Number of slots whose reuse is waiting on QSBR.
    pub fn pending_frees(&self) -> usize {
        self.deferred.len()
    }

    /// Total slots ever created.
    pub fn capacity(&self) -> usize {
        self.slots.read().len()
    }

    /// QSBR state guarding slot reuse.
    pub const fn qsbr(&self) -> &Qsbr {
        &self.qsbr
    }

    /// Allocate a slot for `payload`, owned by thread `owner`, with a count of one.
    pub(crate) fn alloc(&self, owner: u64, payload: Box<dyn GcObject>) -> ObjRef {
        let reused = self.free.lock().pop();
        let obj = if let Some(index) = reused {
            let slot = Arc::clone(&self.slots.read()[index as usize]);
            slot.rc.reset(owner);
            *slot.type_name.lock() = payload.type_name();
            *slot.payload.lock() = Some(payload);
            slot.restore_bits(GcBits::empty());
            ObjRef::new(index, slot.generation())
        } else {
            let mut slots = self.slots.write();
            let index = u32::try_from(slots.len())
                .unwrap_or_else(|_| fatal_error("object arena exhausted"));
            slots.push(Arc::new(ObjectBox::new(owner, payload)));
            ObjRef::new(index, 0)
        };
        self.live.fetch_add(1, Ordering::AcqRel);
        obj
    }

    /// Resolve a handle to its slot if it still names a live object.
    pub(crate) fn get(&self, obj: ObjRef) -> Option<Arc<ObjectBox>> {
        let slots = self.slots.read();
        let slot = slots.get(obj.index() as usize)?;
        if slot.generation() != obj.generation() || slot.has(GcBits::FREED) {
            return None;
        }
        Some(Arc::clone(slot))
    }

    /// Resolve a handle that must be live; anything else is heap corruption.
    #[track_caller]
    pub(crate) fn expect_live(&self, obj: ObjRef) -> Arc<ObjectBox> {
        self.get(obj)
            .unwrap_or_else(|| fatal_error("use of a freed object"))
    }

    /// Visit every currently live block.
    pub(crate) fn visit_live(&self, mut f: impl FnMut(ObjRef, &Arc<ObjectBox>)) {
        let slots: Vec<Arc<ObjectBox>> = self.slots.read().clone();
        for (index, slot) in slots.iter().enumerate() {
            if slot.has(GcBits::FREED) {
                continue;
            }
            let Ok(index) = u32::try_from(index) else {
                break;
            };
            f(ObjRef::new(index, slot.generation()), slot);
        }
    }

    /// Snapshot of the slot handle for an index, regardless of liveness.
    pub(crate) fn slot(&self, index: u32) -> Option<Arc<ObjectBox>> {
        self.slots.read().get(index as usize).cloned()
    }

    /// Start deallocating `obj`: claim it and take its payload.
    ///
    /// A second claim on the same object is a double free.
    pub(crate) fn begin_dealloc(&self, slot: &ObjectBox) -> Box<dyn GcObject> {
        if !slot.try_mark_freed() {
            fatal_error("double free");
        }
        slot.lock_payload()
            .take()
            .unwrap_or_else(|| fatal_error("deallocating an object without a payload"))
    }

    /// Finish deallocating: retire the slot index. With a QSBR handle the
    /// index is only reused once every thread has passed a quiescent point.
    pub(crate) fn finish_dealloc(&self, obj: ObjRef, slot: &ObjectBox, qsbr: Option<&QsbrHandle>) {
        slot.generation.store(
            slot.generation().wrapping_add(1) & GENERATION_MASK,
            Ordering::Release,
        );
        self.live.fetch_sub(1, Ordering::AcqRel);
        match qsbr {
            Some(handle) => {
                let goal = self.qsbr.deferred_advance(handle);
                self.deferred.push(goal, obj.index());
            }
            None => self.free.lock().push(obj.index()),
        }
    }

    /// Move every slot whose QSBR goal has been reached to the free list.
    pub(crate) fn process_deferred_frees(&self) -> usize {
        let mut ready = Vec::new();
        let n = self.deferred.process(&self.qsbr, |index| ready.push(index));
        if n > 0 {
            self.free.lock().extend(ready);
            #[cfg(feature = "tracing")]
            crate::tracing::internal::log_qsbr_reclaimed(n, self.qsbr.read_seq());
        }
        n
    }

    /// Force a sequence advance so that pending frees become reachable goals.
    pub(crate) fn advance_for_pending(&self) {
        if !self.deferred.is_empty() {
            self.qsbr.advance();
        }
    }
}
