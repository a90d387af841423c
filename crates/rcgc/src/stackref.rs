//! Tagged references held in a mutator's value stack.
//!
//! A `StackRef` is either an owned reference, accounted for in the target's
//! count, or a deferred one that never touched the count. Deferred stack
//! references are only sound when the target is immortal, has a deferred
//! count, or is kept alive by another owner for the stack slot's lifetime;
//! the collector accounts for them by scanning every thread's stack.
//!
//! `StackRef` is neither `Copy` nor `Clone`: duplicating goes through
//! [`StackRef::dup`] and releasing through [`StackRef::close`], so every
//! creation pairs with exactly one close.

use crate::object::ObjRef;
use crate::thread::Mutator;

const TAG_DEFERRED: u64 = 0b1;

/// A value-stack reference.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a StackRef must be closed or pushed, dropping it leaks a reference"]
pub enum StackRef {
    /// Accounts for one unit of the target's reference count.
    Owned(ObjRef),
    /// Did not change the target's count.
    Deferred(ObjRef),
}

impl StackRef {
    /// Borrow `obj` without changing its count. The caller must keep its own
    /// reference alive while the stack reference is in use.
    pub const fn borrow(obj: ObjRef) -> Self {
        Self::Deferred(obj)
    }

    /// Take over a strong reference the caller already owns.
    pub fn steal(mutator: &Mutator, obj: ObjRef) -> Self {
        if mutator.is_immortal(obj) {
            Self::Deferred(obj)
        } else {
            Self::Owned(obj)
        }
    }

    /// Create a new reference to `obj`. Immortal and deferred-count objects
    /// are tagged instead of counted.
    pub fn new(mutator: &Mutator, obj: ObjRef) -> Self {
        if mutator.is_immortal(obj) || mutator.is_deferred(obj) {
            Self::Deferred(obj)
        } else {
            mutator.incref(obj);
            Self::Owned(obj)
        }
    }

    /// A second reference to the same target.
    pub fn dup(&self, mutator: &Mutator) -> Self {
        match *self {
            Self::Owned(obj) => {
                mutator.incref(obj);
                Self::Owned(obj)
            }
            Self::Deferred(obj) => Self::Deferred(obj),
        }
    }

    /// Release the reference.
    pub fn close(self, mutator: &Mutator) {
        if let Self::Owned(obj) = self {
            mutator.decref(obj);
        }
    }

    /// Convert into a strong reference owned by the caller.
    #[must_use]
    pub fn into_owned(self, mutator: &Mutator) -> ObjRef {
        match self {
            Self::Owned(obj) => obj,
            Self::Deferred(obj) => {
                mutator.incref(obj);
                obj
            }
        }
    }

    /// The referenced object.
    #[must_use]
    pub const fn as_obj(&self) -> ObjRef {
        match *self {
            Self::Owned(obj) | Self::Deferred(obj) => obj,
        }
    }

    /// Whether this entry holds no reference of its own.
    #[must_use]
    pub const fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }

    /// Encode into one machine word. Ownership moves into the word.
    #[must_use]
    pub const fn into_raw(self) -> u64 {
        match self {
            Self::Owned(obj) => obj.to_bits() << 1,
            Self::Deferred(obj) => (obj.to_bits() << 1) | TAG_DEFERRED,
        }
    }

    /// Decode a word produced by [`StackRef::into_raw`]. Ownership moves back
    /// out of the word, so each word must be decoded at most once.
    pub const fn from_raw(word: u64) -> Self {
        let obj = ObjRef::from_bits(word >> 1);
        if word & TAG_DEFERRED == 0 {
            Self::Owned(obj)
        } else {
            Self::Deferred(obj)
        }
    }

    /// Inspect an encoded word without taking ownership.
    pub(crate) const fn peek_raw(word: u64) -> (ObjRef, bool) {
        (ObjRef::from_bits(word >> 1), word & TAG_DEFERRED != 0)
    }
}
