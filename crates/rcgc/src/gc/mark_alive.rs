//! Optimistic mark-alive pre-pass of the concurrent collector.
//!
//! Everything reachable from the roots (globals, thread stacks, frozen
//! objects) is marked `ALIVE` and left out of the reference-count scan. The
//! scan then only has to look at what the marker could not prove reachable,
//! which is usually a small fraction of the heap.
//!
//! The marker is a depth-first walk fed through a fixed-size ring: an object
//! enters the ring once marked, and its slot is resolved at that point, ahead
//! of the traversal that reads its payload. Objects with many outgoing edges
//! push a span instead of every child at once, so the stack stays shallow.

use std::sync::Arc;

use super::list::PERMANENT;
use super::pass::{children_of, GcState, Scratch};
use crate::config::GcConfig;
use crate::error::GcError;
use crate::heap::{GcBits, Heap, ObjectBox};
use crate::object::ObjRef;
use crate::stackref::StackRef;
use crate::stw::ThreadControlBlock;

/// Remaining children of one large container.
struct Span {
    items: Vec<ObjRef>,
    pos: usize,
}

enum Entry {
    Obj(ObjRef),
    Span(Span),
}

/// Ring of marked objects whose children are still to be visited.
struct PrefetchRing {
    buf: Vec<Option<Arc<ObjectBox>>>,
    head: usize,
    tail: usize,
    mask: usize,
}

impl PrefetchRing {
    fn new(len: usize) -> Self {
        let len = len.max(1).next_power_of_two();
        Self {
            buf: vec![None; len],
            head: 0,
            tail: 0,
            mask: len - 1,
        }
    }

    const fn is_full(&self) -> bool {
        self.tail.wrapping_sub(self.head) == self.buf.len()
    }

    fn push(&mut self, slot: Arc<ObjectBox>) {
        debug_assert!(!self.is_full());
        self.buf[self.tail & self.mask] = Some(slot);
        self.tail = self.tail.wrapping_add(1);
    }

    fn pop(&mut self) -> Option<Arc<ObjectBox>> {
        if self.head == self.tail {
            return None;
        }
        let slot = self.buf[self.head & self.mask].take();
        self.head = self.head.wrapping_add(1);
        slot
    }
}

struct Marker<'a> {
    heap: &'a Heap,
    scratch: &'a mut Scratch,
    span_threshold: usize,
    ring: PrefetchRing,
    stack: Vec<Entry>,
    marked: Vec<ObjRef>,
}

impl Marker<'_> {
    /// Mark `obj` if it is a tracked, mortal, unfrozen object not yet seen.
    fn mark(&mut self, obj: ObjRef) -> Result<(), GcError> {
        let Some(slot) = self.heap.get(obj) else {
            return Ok(());
        };
        let bits = slot.bits();
        if !bits.contains(GcBits::TRACKED)
            || bits.intersects(GcBits::ALIVE | GcBits::FROZEN)
            || slot.rc.is_immortal()
        {
            return Ok(());
        }
        self.scratch.reserve(1)?;
        slot.set(GcBits::ALIVE);
        self.marked.push(obj);
        self.stack.push(Entry::Obj(obj));
        Ok(())
    }

    fn visit_children(&mut self, slot: &ObjectBox) -> Result<(), GcError> {
        let children = children_of(slot);
        if children.len() > self.span_threshold {
            self.scratch.reserve(1)?;
            self.stack.push(Entry::Span(Span {
                items: children,
                pos: 0,
            }));
            return Ok(());
        }
        for child in children {
            self.mark(child)?;
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<(), GcError> {
        loop {
            while !self.ring.is_full() {
                match self.stack.pop() {
                    Some(Entry::Obj(obj)) => {
                        if let Some(slot) = self.heap.get(obj) {
                            self.ring.push(slot);
                        }
                    }
                    Some(Entry::Span(mut span)) => {
                        let child = span.items[span.pos];
                        span.pos += 1;
                        if span.pos < span.items.len() {
                            self.stack.push(Entry::Span(span));
                        }
                        self.mark(child)?;
                    }
                    None => break,
                }
            }
            let Some(slot) = self.ring.pop() else {
                return Ok(());
            };
            self.visit_children(&slot)?;
        }
    }
}

/// Mark everything reachable from the roots. Returns the marked objects;
/// the caller clears their `ALIVE` bits when it is done with them.
///
/// On failure every bit set so far is cleared again before returning.
pub(crate) fn mark_alive(
    heap: &Heap,
    state: &GcState,
    globals: &[ObjRef],
    stacks: &[Arc<ThreadControlBlock>],
    config: &GcConfig,
    scratch: &mut Scratch,
) -> Result<Vec<ObjRef>, GcError> {
    let mut marker = Marker {
        heap,
        scratch,
        span_threshold: config.span_threshold.max(1),
        ring: PrefetchRing::new(config.prefetch_buffer_len),
        stack: Vec::new(),
        marked: Vec::new(),
    };
    let result = mark_roots(&mut marker, state, globals, stacks).and_then(|()| marker.drain());
    match result {
        Ok(()) => Ok(marker.marked),
        Err(err) => {
            clear_alive(heap, &marker.marked);
            Err(err)
        }
    }
}

fn mark_roots(
    marker: &mut Marker<'_>,
    state: &GcState,
    globals: &[ObjRef],
    stacks: &[Arc<ThreadControlBlock>],
) -> Result<(), GcError> {
    for &obj in globals {
        marker.mark(obj)?;
    }
    for tcb in stacks {
        let words: Vec<u64> = tcb.stack.lock().clone();
        for word in words {
            marker.mark(StackRef::peek_raw(word).0)?;
        }
    }
    // Frozen objects are never marked themselves; their children are roots.
    for index in state.links.indices(PERMANENT) {
        if let Some(slot) = heap_slot(marker.heap, index) {
            marker.visit_children(&slot)?;
        }
        marker.drain()?;
    }
    Ok(())
}

fn heap_slot(heap: &Heap, index: u32) -> Option<Arc<ObjectBox>> {
    heap.slot(index).filter(|slot| !slot.has(GcBits::FREED))
}

pub(crate) fn clear_alive(heap: &Heap, marked: &[ObjRef]) {
    for &obj in marked {
        if let Some(slot) = heap.get(obj) {
            slot.unset(GcBits::ALIVE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{GcObject, Traverse, Visitor};

    struct Leaf;

    impl Traverse for Leaf {
        fn traverse(&self, _visitor: &mut dyn Visitor) {}
    }

    impl GcObject for Leaf {}

    #[test]
    fn test_ring_wraps() {
        let mut ring = PrefetchRing::new(3);
        assert_eq!(ring.buf.len(), 4);
        let heap = Heap::new(10);
        let slot = heap.expect_live(heap.alloc(1, Box::new(Leaf)));
        for _ in 0..4 {
            ring.push(Arc::clone(&slot));
        }
        assert!(ring.is_full());
        assert!(ring.pop().is_some());
        ring.push(Arc::clone(&slot));
        let mut n = 0;
        while ring.pop().is_some() {
            n += 1;
        }
        assert_eq!(n, 4);
    }
}
