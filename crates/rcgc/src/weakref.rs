//! Weak references.
//!
//! A [`WeakRef`] names an object without keeping it alive. When the target
//! dies, by refcount or by the cycle collector, every weak reference to it
//! is cleared first; callbacks run afterwards, outside any pause, and only
//! for weak references someone still holds.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::CallbackError;
use crate::object::ObjRef;
use crate::thread::Mutator;

/// Callback run once after the referent of a [`WeakRef`] has been cleared.
pub type WeakCallback = Box<dyn FnOnce(&WeakRef) -> Result<(), CallbackError> + Send>;

struct WeakInner {
    target: Mutex<Option<ObjRef>>,
    callback: Mutex<Option<WeakCallback>>,
}

/// A non-owning reference to a heap object.
#[derive(Clone)]
pub struct WeakRef {
    inner: Arc<WeakInner>,
}

impl fmt::Debug for WeakRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRef")
            .field("target", &*self.inner.target.lock())
            .finish_non_exhaustive()
    }
}

impl WeakRef {
    /// The referent, if it has not been cleared. Does not take a reference.
    #[must_use]
    pub fn target(&self) -> Option<ObjRef> {
        *self.inner.target.lock()
    }

    /// Whether the referent has been cleared.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.target().is_none()
    }

    /// Take a strong reference to the referent if it is still alive.
    ///
    /// The returned handle must eventually be released with
    /// [`Mutator::decref`].
    #[must_use]
    pub fn upgrade(&self, mutator: &Mutator) -> Option<ObjRef> {
        let target = self.inner.target.lock();
        let obj = (*target)?;
        mutator.try_incref(obj).then_some(obj)
    }

    #[cfg(test)]
    pub(crate) fn same_ref(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run the callback, if any. Each callback runs at most once.
    pub(crate) fn run_callback(&self) -> Result<(), CallbackError> {
        let callback = self.inner.callback.lock().take();
        match callback {
            Some(cb) => cb(self),
            None => Ok(()),
        }
    }

    fn held_elsewhere(&self) -> bool {
        // called on the registry's copy after it left the registry
        Arc::strong_count(&self.inner) > 1
    }
}

/// Weak references per target slot.
#[derive(Default)]
pub(crate) struct WeakRegistry {
    by_slot: Mutex<HashMap<u32, Vec<WeakRef>>>,
}

impl WeakRegistry {
    pub(crate) fn register(&self, obj: ObjRef, callback: Option<WeakCallback>) -> WeakRef {
        let weak = WeakRef {
            inner: Arc::new(WeakInner {
                target: Mutex::new(Some(obj)),
                callback: Mutex::new(callback),
            }),
        };
        let mut by_slot = self.by_slot.lock();
        let list = by_slot.entry(obj.index()).or_default();
        list.retain(|w| Arc::strong_count(&w.inner) > 1);
        list.push(weak.clone());
        weak
    }

    #[cfg(test)]
    pub(crate) fn has_weakrefs(&self, obj: ObjRef) -> bool {
        self.by_slot
            .lock()
            .get(&obj.index())
            .is_some_and(|list| list.iter().any(|w| w.target() == Some(obj)))
    }

    /// Clear every weak reference to `obj`. Returns the ones whose callback
    /// should still run: those that have a callback and are held by someone
    /// other than the registry.
    pub(crate) fn clear(&self, obj: ObjRef) -> Vec<WeakRef> {
        let matching = {
            let mut by_slot = self.by_slot.lock();
            let Some(list) = by_slot.get_mut(&obj.index()) else {
                return Vec::new();
            };
            let (matching, rest): (Vec<WeakRef>, Vec<WeakRef>) = std::mem::take(list)
                .into_iter()
                .partition(|w| w.target() == Some(obj));
            if rest.is_empty() {
                by_slot.remove(&obj.index());
            } else {
                *list = rest;
            }
            matching
        };
        let mut pending = Vec::new();
        for weak in matching {
            *weak.inner.target.lock() = None;
            if weak.inner.callback.lock().is_some() && weak.held_elsewhere() {
                pending.push(weak);
            }
        }
        pending
    }
}

/// Run the callbacks of cleared weak references, reporting failures as
/// unraisable.
pub(crate) fn run_callbacks(cleared: Vec<WeakRef>) {
    for weak in cleared {
        if let Err(err) = weak.run_callback() {
            crate::tracing::report_unraisable("weakref callback", &err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_clear_drops_target_and_keeps_held_callbacks() {
        let registry = WeakRegistry::default();
        let obj = ObjRef::new(3, 1);
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let held = registry.register(
            obj,
            Some(Box::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
        );
        drop(registry.register(obj, Some(Box::new(|_| Ok(())))));
        assert!(registry.has_weakrefs(obj));

        let pending = registry.clear(obj);
        assert!(held.is_dead());
        assert_eq!(pending.len(), 1);
        assert!(pending[0].same_ref(&held));
        drop(held);
        run_callbacks(pending);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!registry.has_weakrefs(obj));
    }

    #[test]
    fn test_callback_runs_once() {
        let registry = WeakRegistry::default();
        let obj = ObjRef::new(0, 0);
        let weak = registry.register(obj, Some(Box::new(|_| Err(CallbackError::new("boom")))));
        assert!(weak.run_callback().is_err());
        assert!(weak.run_callback().is_ok());
    }

    #[test]
    fn test_stale_generation_is_not_cleared() {
        let registry = WeakRegistry::default();
        let old = ObjRef::new(5, 0);
        let new = ObjRef::new(5, 1);
        let weak = registry.register(new, None);
        assert!(registry.clear(old).is_empty());
        assert!(!weak.is_dead());
    }
}
