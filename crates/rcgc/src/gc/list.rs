//! Index-linked intrusive lists.
//!
//! Every tracked object owns one link node, addressed by its slot index, so
//! moving an object between generations and worklists never allocates. The
//! first `OBJECT_BASE` nodes are list heads: four fixed generation heads
//! followed by a small pool of scratch heads for per-pass worklists. Each
//! node records which list it is on, so removal is O(1) and an object can
//! never sit on two lists at once.

use crate::error::GcError;

pub(crate) type NodeId = usize;

pub(crate) const YOUNG: NodeId = 0;
pub(crate) const OLD: [NodeId; 2] = [1, 2];
pub(crate) const PERMANENT: NodeId = 3;
const FIRST_SCRATCH: NodeId = 4;
const OBJECT_BASE: NodeId = 16;
const NONE: NodeId = usize::MAX;

#[derive(Debug, Clone, Copy)]
struct Link {
    prev: NodeId,
    next: NodeId,
    /// Head of the list this node is on, `NONE` when unlinked.
    list: NodeId,
    /// Scratch counter used by a collection pass.
    gc_refs: i64,
}

impl Link {
    const fn unlinked() -> Self {
        Self {
            prev: NONE,
            next: NONE,
            list: NONE,
            gc_refs: 0,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Links {
    nodes: Vec<Link>,
    lens: [usize; OBJECT_BASE],
    free_heads: Vec<NodeId>,
}

impl Links {
    pub(crate) fn new() -> Self {
        let nodes = (0..OBJECT_BASE)
            .map(|head| Link {
                prev: head,
                next: head,
                list: head,
                gc_refs: 0,
            })
            .collect();
        Self {
            nodes,
            lens: [0; OBJECT_BASE],
            free_heads: (FIRST_SCRATCH..OBJECT_BASE).rev().collect(),
        }
    }

    #[inline]
    pub(crate) const fn node(index: u32) -> NodeId {
        OBJECT_BASE + index as usize
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) const fn index(node: NodeId) -> u32 {
        (node - OBJECT_BASE) as u32
    }

    fn ensure(&mut self, node: NodeId) {
        if node >= self.nodes.len() {
            self.nodes.resize(node + 1, Link::unlinked());
        }
    }

    /// Take a scratch head for a worklist.
    pub(crate) fn alloc_head(&mut self) -> Result<NodeId, GcError> {
        self.free_heads.pop().ok_or(GcError::OutOfMemory)
    }

    /// Return an empty scratch head to the pool.
    pub(crate) fn free_head(&mut self, head: NodeId) {
        debug_assert!(self.is_empty(head));
        self.free_heads.push(head);
    }

    pub(crate) fn list_of(&self, node: NodeId) -> Option<NodeId> {
        self.nodes
            .get(node)
            .map(|l| l.list)
            .filter(|&list| list != NONE)
    }

    pub(crate) fn len(&self, head: NodeId) -> usize {
        self.lens[head]
    }

    pub(crate) fn is_empty(&self, head: NodeId) -> bool {
        self.nodes[head].next == head
    }

    pub(crate) fn first(&self, head: NodeId) -> Option<NodeId> {
        let next = self.nodes[head].next;
        (next != head).then_some(next)
    }

    /// Successor of `node` on its list, `None` at the end.
    pub(crate) fn next(&self, node: NodeId) -> Option<NodeId> {
        let link = self.nodes[node];
        (link.next != link.list).then_some(link.next)
    }

    pub(crate) fn push_back(&mut self, head: NodeId, node: NodeId) {
        self.ensure(node);
        debug_assert_eq!(self.nodes[node].list, NONE);
        let last = self.nodes[head].prev;
        self.nodes[node].prev = last;
        self.nodes[node].next = head;
        self.nodes[node].list = head;
        self.nodes[last].next = node;
        self.nodes[head].prev = node;
        self.lens[head] += 1;
    }

    /// Unlink `node`. Returns the list it was on.
    pub(crate) fn remove(&mut self, node: NodeId) -> Option<NodeId> {
        let list = self.list_of(node)?;
        let Link { prev, next, .. } = self.nodes[node];
        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
        self.nodes[node] = Link::unlinked();
        self.lens[list] -= 1;
        Some(list)
    }

    pub(crate) fn move_to(&mut self, head: NodeId, node: NodeId) {
        self.remove(node);
        self.push_back(head, node);
    }

    /// Append every node of `from` to `to`, leaving `from` empty.
    pub(crate) fn merge(&mut self, from: NodeId, to: NodeId) {
        while let Some(node) = self.first(from) {
            self.move_to(to, node);
        }
    }

    /// Object indices on `head`, in list order.
    pub(crate) fn indices(&self, head: NodeId) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.len(head));
        let mut cur = self.first(head);
        while let Some(node) = cur {
            out.push(Self::index(node));
            cur = self.next(node);
        }
        out
    }

    pub(crate) fn gc_refs(&self, node: NodeId) -> i64 {
        self.nodes[node].gc_refs
    }

    pub(crate) fn set_gc_refs(&mut self, node: NodeId, refs: i64) {
        self.nodes[node].gc_refs = refs;
    }

    pub(crate) fn add_gc_refs(&mut self, node: NodeId, delta: i64) -> i64 {
        let link = &mut self.nodes[node];
        link.gc_refs += delta;
        link.gc_refs
    }
}
