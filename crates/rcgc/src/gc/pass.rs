//! Collector state and the phases shared by the serial and concurrent
//! collectors.
//!
//! A pass works on a *region*: a worklist holding the objects under
//! collection. Every reference a region member receives from outside the
//! region keeps it alive. The phases are:
//!
//! 1. `update_refs`: copy each member's reference count into `gc_refs`,
//!    without the deferred bias, plus one per deferred stack reference.
//! 2. `subtract_refs`: subtract every edge between members. What remains is
//!    the number of references from outside the region.
//! 3. `move_unreachable`: members with external references, and everything
//!    they reach, stay; the rest move to the unreachable list.
//!
//! The caller holds the collector state lock throughout, and the world is
//! stopped (or there is only one mutator).

use std::sync::Arc;

use super::list::{Links, NodeId, OLD, YOUNG};
use crate::config::GcConfig;
use crate::error::{fatal_error, GcError};
use crate::heap::{GcBits, Heap, ObjectBox};
use crate::object::ObjRef;
use crate::refcount::DEFERRED_BIAS;
use crate::stackref::StackRef;
use crate::stw::ThreadControlBlock;

/// Everything guarded by the collector state lock.
#[derive(Debug)]
pub(crate) struct GcState {
    pub(crate) links: Links,
    /// Net young allocations since the last collection.
    pub(crate) young_count: usize,
    /// Objects tracked in any list.
    pub(crate) tracked: usize,
    /// Which old half-space holds the objects already scanned this cycle.
    pub(crate) visited_space: usize,
    /// Objects the incremental collector still owes the old generation.
    pub(crate) work_to_do: usize,
    /// Tracked objects that survived the last concurrent pass.
    pub(crate) long_lived: usize,
}

impl GcState {
    pub(crate) fn new() -> Self {
        Self {
            links: Links::new(),
            young_count: 0,
            tracked: 0,
            visited_space: 0,
            work_to_do: 0,
            long_lived: 0,
        }
    }

    pub(crate) const fn visited(&self) -> NodeId {
        OLD[self.visited_space]
    }

    pub(crate) const fn pending(&self) -> NodeId {
        OLD[self.visited_space ^ 1]
    }

    /// Make the pending space the visited one and vice versa.
    pub(crate) fn flip_spaces(&mut self) {
        self.visited_space ^= 1;
    }

    /// Grow the incremental work estimate for the young objects about to
    /// be collected. Returns the total work owed, young objects included.
    ///
    /// The old generation is scanned at a rate proportional to the heap
    /// size, but never more than twice as fast as objects are promoted.
    pub(crate) fn assess_work(&mut self, config: &GcConfig) -> usize {
        let scale = config.old_scale_factor.max(2);
        let divisor = config.scan_rate_divisor.max(1);
        let young = self.young_count;
        let heap_fraction = (self.tracked / divisor / scale).min(young.saturating_mul(2));
        self.work_to_do = self.work_to_do.saturating_add(young + heap_fraction);
        self.work_to_do
    }

    pub(crate) fn track(&mut self, obj: ObjRef, slot: &ObjectBox) {
        if slot.has(GcBits::TRACKED) {
            return;
        }
        self.links.push_back(YOUNG, Links::node(obj.index()));
        slot.set(GcBits::TRACKED);
        self.young_count += 1;
        self.tracked += 1;
    }

    pub(crate) fn untrack(&mut self, obj: ObjRef, slot: &ObjectBox) {
        if !slot.has(GcBits::TRACKED) {
            return;
        }
        let list = self.links.remove(Links::node(obj.index()));
        slot.unset(GcBits::TRACKED | GcBits::UNREACHABLE | GcBits::FROZEN);
        self.tracked = self.tracked.saturating_sub(1);
        if list == Some(YOUNG) {
            self.young_count = self.young_count.saturating_sub(1);
        }
    }

    /// Move `node` to `dest`, keeping the old half-space bit in sync.
    pub(crate) fn place(&mut self, node: NodeId, slot: &ObjectBox, dest: NodeId) {
        self.links.move_to(dest, node);
        if dest == OLD[1] {
            slot.set(GcBits::OLD_SPACE_1);
        } else {
            slot.unset(GcBits::OLD_SPACE_1);
        }
    }

    /// Move every node of `from` to `dest`, updating space bits.
    pub(crate) fn place_all(&mut self, heap: &Heap, from: NodeId, dest: NodeId) {
        while let Some(node) = self.links.first(from) {
            match heap.slot(Links::index(node)) {
                Some(slot) => self.place(node, &slot, dest),
                None => fatal_error("tracked node without a slot"),
            }
        }
    }

    fn on_list(&self, obj: ObjRef, head: NodeId) -> bool {
        self.links.list_of(Links::node(obj.index())) == Some(head)
    }

    // ========================================================================
    // Phases
    // ========================================================================

    /// Initialise `gc_refs` for every member of `region`. Immortal members
    /// are untracked instead. Returns the number of members.
    pub(crate) fn update_refs(
        &mut self,
        heap: &Heap,
        region: NodeId,
        stacks: &[Arc<ThreadControlBlock>],
    ) -> usize {
        for index in self.links.indices(region) {
            let node = Links::node(index);
            let Some(slot) = heap.slot(index) else {
                fatal_error("tracked node without a slot");
            };
            if slot.rc.is_immortal() {
                self.untrack(ObjRef::new(index, slot.generation()), &slot);
                continue;
            }
            let mut refs = slot.rc.total();
            if slot.has(GcBits::DEFERRED) {
                refs -= DEFERRED_BIAS;
            }
            if refs < 0 {
                fatal_error("negative reference count in update_refs");
            }
            self.links.set_gc_refs(node, refs);
        }
        self.add_stack_refs(stacks, region);
        self.links.len(region)
    }

    /// Deferred stack references are not in any count; each one counts as
    /// an external reference.
    fn add_stack_refs(&mut self, stacks: &[Arc<ThreadControlBlock>], region: NodeId) {
        for tcb in stacks {
            let stack = tcb.stack.lock();
            for &word in stack.iter() {
                let (obj, deferred) = StackRef::peek_raw(word);
                if deferred && self.on_list(obj, region) {
                    self.links.add_gc_refs(Links::node(obj.index()), 1);
                }
            }
        }
    }

    /// Subtract edges between members of `region`.
    pub(crate) fn subtract_refs(&mut self, heap: &Heap, region: NodeId) {
        for index in self.links.indices(region) {
            let Some(slot) = heap.slot(index) else {
                continue;
            };
            for child in children_of(&slot) {
                if self.on_list(child, region)
                    && self.links.add_gc_refs(Links::node(child.index()), -1) < 0
                {
                    fatal_error("traverse reported a reference it does not own");
                }
            }
        }
    }

    /// Split `region` into reachable (stays) and unreachable (moved).
    ///
    /// Members with `gc_refs > 0` are reachable. Scanning one may pull a
    /// tentatively unreachable member back to the end of `region`, where
    /// the scan will reach it again.
    pub(crate) fn move_unreachable(&mut self, heap: &Heap, region: NodeId, unreachable: NodeId) {
        let mut cur = self.links.first(region);
        while let Some(node) = cur {
            let index = Links::index(node);
            let Some(slot) = heap.slot(index) else {
                fatal_error("tracked node without a slot");
            };
            if self.links.gc_refs(node) > 0 {
                for child in children_of(&slot) {
                    let child_node = Links::node(child.index());
                    match self.links.list_of(child_node) {
                        Some(list) if list == unreachable => {
                            self.links.move_to(region, child_node);
                            self.links.set_gc_refs(child_node, 1);
                            if let Some(child_slot) = heap.get(child) {
                                child_slot.unset(GcBits::UNREACHABLE);
                            }
                        }
                        Some(list) if list == region => {
                            if self.links.gc_refs(child_node) == 0 {
                                self.links.set_gc_refs(child_node, 1);
                            }
                        }
                        _ => {}
                    }
                }
                cur = self.links.next(node);
            } else {
                cur = self.links.next(node);
                self.links.move_to(unreachable, node);
                slot.set(GcBits::UNREACHABLE);
            }
        }
    }

    /// Untrack surviving immutable containers whose children are all
    /// untracked: they can never be part of a cycle.
    pub(crate) fn untrack_acyclic(&mut self, heap: &Heap, region: NodeId) -> usize {
        let mut untracked = 0;
        for index in self.links.indices(region) {
            let Some(slot) = heap.slot(index) else {
                continue;
            };
            let candidate = slot
                .lock_payload()
                .as_ref()
                .is_some_and(|p| p.is_untrackable_container());
            if !candidate {
                continue;
            }
            let acyclic = children_of(&slot).iter().all(|child| {
                heap.get(*child)
                    .is_none_or(|c| c.rc.is_immortal() || !c.has(GcBits::TRACKED))
            });
            if acyclic {
                self.untrack(ObjRef::new(index, slot.generation()), &slot);
                untracked += 1;
            }
        }
        untracked
    }

    /// Move objects with legacy finalizers, and everything reachable from
    /// them, out of `unreachable` into `finalizers`. With `save_all` every
    /// unreachable object goes.
    pub(crate) fn move_legacy_finalizers(
        &mut self,
        heap: &Heap,
        unreachable: NodeId,
        finalizers: NodeId,
        save_all: bool,
    ) {
        for index in self.links.indices(unreachable) {
            let Some(slot) = heap.slot(index) else {
                continue;
            };
            let legacy = save_all
                || slot
                    .lock_payload()
                    .as_ref()
                    .is_some_and(|p| p.has_legacy_finalizer());
            if legacy {
                self.links.move_to(finalizers, Links::node(index));
                slot.unset(GcBits::UNREACHABLE);
            }
        }

        let mut cur = self.links.first(finalizers);
        while let Some(node) = cur {
            if let Some(slot) = heap.slot(Links::index(node)) {
                for child in children_of(&slot) {
                    if self.on_list(child, unreachable) {
                        self.links.move_to(finalizers, Links::node(child.index()));
                        if let Some(child_slot) = heap.get(child) {
                            child_slot.unset(GcBits::UNREACHABLE);
                        }
                    }
                }
            }
            cur = self.links.next(node);
        }
    }

    /// Recompute external references of the objects still on `unreachable`
    /// after finalizers ran. Anything referenced from outside, and
    /// everything it reaches, moves to `dest`. Returns the resurrected
    /// objects.
    ///
    /// Every member carries one temporary reference held by the pass.
    pub(crate) fn handle_resurrected(
        &mut self,
        heap: &Heap,
        unreachable: NodeId,
        dest: NodeId,
        stacks: &[Arc<ThreadControlBlock>],
    ) -> Vec<ObjRef> {
        let indices = self.links.indices(unreachable);
        for &index in &indices {
            let Some(slot) = heap.slot(index) else {
                continue;
            };
            let mut refs = slot.rc.total() - 1;
            if slot.has(GcBits::DEFERRED) {
                refs -= DEFERRED_BIAS;
            }
            self.links.set_gc_refs(Links::node(index), refs);
        }
        self.add_stack_refs(stacks, unreachable);
        for &index in &indices {
            let Some(slot) = heap.slot(index) else {
                continue;
            };
            for child in children_of(&slot) {
                if self.on_list(child, unreachable)
                    && self.links.add_gc_refs(Links::node(child.index()), -1) < 0
                {
                    fatal_error("negative external count in resurrection check");
                }
            }
        }

        let mut work: Vec<ObjRef> = indices
            .iter()
            .filter(|&&index| self.links.gc_refs(Links::node(index)) > 0)
            .filter_map(|&index| heap.slot(index).map(|s| ObjRef::new(index, s.generation())))
            .collect();
        let mut resurrected = Vec::new();
        while let Some(obj) = work.pop() {
            let node = Links::node(obj.index());
            if !self.on_list(obj, unreachable) {
                continue;
            }
            let Some(slot) = heap.get(obj) else {
                continue;
            };
            self.place(node, &slot, dest);
            slot.unset(GcBits::UNREACHABLE);
            resurrected.push(obj);
            work.extend(
                children_of(&slot)
                    .into_iter()
                    .filter(|child| self.on_list(*child, unreachable)),
            );
        }
        resurrected
    }

    /// Take objects for one incremental slice: up to `budget` objects from
    /// the pending old space, each with everything it reaches inside that
    /// space. Returns how many objects moved.
    pub(crate) fn take_increment(&mut self, heap: &Heap, region: NodeId, budget: usize) -> usize {
        let pending = self.pending();
        let mut moved = 0;
        while moved < budget {
            let Some(first) = self.links.first(pending) else {
                break;
            };
            let mut work = vec![first];
            self.links.move_to(region, first);
            moved += 1;
            while let Some(node) = work.pop() {
                let Some(slot) = heap.slot(Links::index(node)) else {
                    continue;
                };
                for child in children_of(&slot) {
                    if self.on_list(child, pending) {
                        let child_node = Links::node(child.index());
                        self.links.move_to(region, child_node);
                        work.push(child_node);
                        moved += 1;
                    }
                }
            }
        }
        moved
    }
}

/// Scratch list heads of one pass.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Heads {
    pub(crate) region: NodeId,
    pub(crate) unreachable: NodeId,
    pub(crate) finalizers: NodeId,
}

impl Heads {
    /// Take three scratch heads, or none at all.
    pub(crate) fn alloc(links: &mut Links) -> Result<Self, GcError> {
        let region = links.alloc_head()?;
        let unreachable = match links.alloc_head() {
            Ok(head) => head,
            Err(err) => {
                links.free_head(region);
                return Err(err);
            }
        };
        let finalizers = match links.alloc_head() {
            Ok(head) => head,
            Err(err) => {
                links.free_head(unreachable);
                links.free_head(region);
                return Err(err);
            }
        };
        Ok(Self {
            region,
            unreachable,
            finalizers,
        })
    }

    /// Return the region and finalizer heads. The unreachable head lives
    /// on until the pass has deleted its garbage.
    pub(crate) fn release_scan(self, links: &mut Links) {
        links.free_head(self.finalizers);
        links.free_head(self.region);
    }

    /// Return every head of a pass that stopped before scanning.
    pub(crate) fn release_all(self, links: &mut Links) {
        links.free_head(self.unreachable);
        self.release_scan(links);
    }
}

/// Outgoing edges of a slot's payload.
pub(crate) fn children_of(slot: &ObjectBox) -> Vec<ObjRef> {
    let mut out = Vec::new();
    if let Some(payload) = slot.lock_payload().as_ref() {
        payload.traverse(&mut |child: ObjRef| out.push(child));
    }
    out
}

/// Scratch accounting for one pass.
#[derive(Debug)]
pub(crate) struct Scratch {
    used: usize,
    limit: Option<usize>,
}

impl Scratch {
    pub(crate) const fn new(limit: Option<usize>) -> Self {
        Self { used: 0, limit }
    }

    pub(crate) fn reserve(&mut self, entries: usize) -> Result<(), GcError> {
        let used = self.used.saturating_add(entries);
        if self.limit.is_some_and(|limit| used > limit) {
            return Err(GcError::OutOfMemory);
        }
        self.used = used;
        Ok(())
    }
}
