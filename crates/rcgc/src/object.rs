//! Object handles and the type contract consumed by the collector.
//!
//! The collector never looks at an object's business data. It only needs the
//! three callback slots every collectable type provides: traverse (report
//! every outgoing strong edge), clear (break all outgoing edges without
//! deallocating) and finalize (run at most once before reclamation).

use std::any::Any;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::hash::BuildHasher;

use crate::error::CallbackError;
use crate::thread::Mutator;

// ============================================================================
// ObjRef - arena handle
// ============================================================================

/// Generations are 31 bits wide so a packed handle leaves room for the stack tag.
pub(crate) const GENERATION_MASK: u32 = 0x7FFF_FFFF;

/// A handle naming one object slot in a [`Heap`](crate::heap::Heap).
///
/// `ObjRef` is a plain index plus a slot generation. It carries no ownership
/// by itself: a strong reference is an `ObjRef` whose holder accounts for one
/// unit of the object's reference count.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef {
    index: u32,
    generation: u32,
}

impl ObjRef {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation: generation & GENERATION_MASK,
        }
    }

    /// Slot index in the heap.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Slot generation the handle was issued for.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Pack into 63 bits: generation in the high half, index in the low half.
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Inverse of [`ObjRef::to_bits`].
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_bits(bits: u64) -> Self {
        Self::new(bits as u32, (bits >> 32) as u32)
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef({}v{})", self.index, self.generation)
    }
}

// ============================================================================
// Traverse / Visitor
// ============================================================================

/// Receives every outgoing strong edge of an object.
pub trait Visitor {
    /// Called once per strong reference held by the object being traversed.
    fn visit(&mut self, obj: ObjRef);
}

impl<F: FnMut(ObjRef)> Visitor for F {
    fn visit(&mut self, obj: ObjRef) {
        self(obj);
    }
}

/// A value that can report the strong references it holds.
///
/// Implementations must visit every `ObjRef` the value owns a count for, and
/// nothing else. Visiting a reference the value does not own makes the
/// external reference count of the target go negative, which the collector
/// treats as heap corruption.
///
/// Prefer `#[derive(Traverse)]` over a manual implementation.
pub trait Traverse {
    /// Visit all strong references contained within this value.
    fn traverse(&self, visitor: &mut dyn Visitor);
}

impl Traverse for ObjRef {
    #[inline]
    fn traverse(&self, visitor: &mut dyn Visitor) {
        visitor.visit(*self);
    }
}

macro_rules! impl_traverse_leaf {
    ($($t:ty),* $(,)?) => {
        $(
            impl Traverse for $t {
                #[inline]
                fn traverse(&self, _visitor: &mut dyn Visitor) {}
            }
        )*
    };
}

impl_traverse_leaf!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64,
    String,
    &'static str,
);

impl<T: Traverse> Traverse for Option<T> {
    #[inline]
    fn traverse(&self, visitor: &mut dyn Visitor) {
        if let Some(value) = self {
            value.traverse(visitor);
        }
    }
}

impl<T: Traverse + ?Sized> Traverse for Box<T> {
    #[inline]
    fn traverse(&self, visitor: &mut dyn Visitor) {
        (**self).traverse(visitor);
    }
}

impl<T: Traverse> Traverse for [T] {
    fn traverse(&self, visitor: &mut dyn Visitor) {
        for item in self {
            item.traverse(visitor);
        }
    }
}

impl<T: Traverse, const N: usize> Traverse for [T; N] {
    fn traverse(&self, visitor: &mut dyn Visitor) {
        for item in self {
            item.traverse(visitor);
        }
    }
}

impl<T: Traverse> Traverse for Vec<T> {
    fn traverse(&self, visitor: &mut dyn Visitor) {
        for item in self {
            item.traverse(visitor);
        }
    }
}

impl<T: Traverse> Traverse for VecDeque<T> {
    fn traverse(&self, visitor: &mut dyn Visitor) {
        for item in self {
            item.traverse(visitor);
        }
    }
}

impl<K: Traverse, V: Traverse> Traverse for BTreeMap<K, V> {
    fn traverse(&self, visitor: &mut dyn Visitor) {
        for (k, v) in self {
            k.traverse(visitor);
            v.traverse(visitor);
        }
    }
}

impl<K: Traverse, V: Traverse, S: BuildHasher> Traverse for HashMap<K, V, S> {
    fn traverse(&self, visitor: &mut dyn Visitor) {
        for (k, v) in self {
            k.traverse(visitor);
            v.traverse(visitor);
        }
    }
}

macro_rules! impl_traverse_tuple {
    ($($name:ident),+) => {
        impl<$($name: Traverse),+> Traverse for ($($name,)+) {
            #[allow(non_snake_case)]
            fn traverse(&self, visitor: &mut dyn Visitor) {
                let ($($name,)+) = self;
                $($name.traverse(visitor);)+
            }
        }
    };
}

impl_traverse_tuple!(A);
impl_traverse_tuple!(A, B);
impl_traverse_tuple!(A, B, C);
impl_traverse_tuple!(A, B, C, D);

// ============================================================================
// GcObject - the type contract
// ============================================================================

/// Downcasting support for payloads. Implemented for every `'static` type.
pub trait AsAny {
    /// `self` as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;
    /// `self` as `&mut dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// The callbacks a heap object exposes to the collector.
///
/// Deallocation is not a separate callback: when an object dies its edges
/// are taken with [`GcObject::clear`], each released reference is
/// decremented, and the payload is dropped exactly once.
pub trait GcObject: Traverse + AsAny + Send + 'static {
    /// Short type name used in reports.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Whether the collector tracks this object at all. Objects that can
    /// never hold references (strings, numbers) return `false`.
    fn is_container(&self) -> bool {
        true
    }

    /// Move every strong reference out of the object into `released`.
    ///
    /// The default implementation keeps the references, which means a cycle
    /// through this type can only be broken by another member's `clear`.
    fn clear(&mut self, released: &mut Vec<ObjRef>) {
        let _ = released;
    }

    /// Whether [`GcObject::finalize`] does anything. Only objects answering
    /// `true` get a finalizer call.
    fn has_finalizer(&self) -> bool {
        false
    }

    /// Run the finalizer. Called at most once per object; may resurrect the
    /// object by storing a new strong reference to it through `cx`.
    ///
    /// # Errors
    ///
    /// Errors are reported as unraisable and never abort the collection.
    fn finalize(&mut self, cx: &mut FinalizeCx<'_>) -> Result<(), CallbackError> {
        let _ = cx;
        Ok(())
    }

    /// A legacy finalizer makes the object uncollectable when it is part of a
    /// garbage cycle; such cycles end up in the garbage list.
    fn has_legacy_finalizer(&self) -> bool {
        false
    }

    /// Whether the object may be untracked once all of its children are
    /// untracked (immutable containers such as tuples).
    fn is_untrackable_container(&self) -> bool {
        false
    }
}

/// What a finalizer may do while the collector is between phases.
pub struct FinalizeCx<'a> {
    pub(crate) mutator: &'a Mutator,
    pub(crate) this: ObjRef,
}

impl FinalizeCx<'_> {
    /// The object being finalized.
    #[must_use]
    pub const fn this(&self) -> ObjRef {
        self.this
    }

    /// The mutator running the finalizer.
    #[must_use]
    pub const fn mutator(&self) -> &Mutator {
        self.mutator
    }

    /// Take a new strong reference to `obj`.
    pub fn incref(&self, obj: ObjRef) {
        self.mutator.incref(obj);
    }

    /// Release a strong reference to `obj`.
    pub fn decref(&self, obj: ObjRef) {
        self.mutator.decref(obj);
    }

    /// Store a new strong reference to the finalized object in the global
    /// namespace, resurrecting it.
    pub fn resurrect_into_globals(&self) {
        self.mutator.incref(self.this);
        self.mutator.collector().add_global(self.this);
    }
}
