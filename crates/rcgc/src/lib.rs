//! Hybrid reference counting with a cycle collector.
//!
//! `rcgc` manages an arena of heap objects addressed by [`ObjRef`] handles.
//! Most objects die by reference counting the moment their last reference
//! is released; the [`Collector`] finds and frees the cycles reference
//! counting cannot.
//!
//! # Features
//!
//! - **Biased reference counts**: the owning thread counts without atomics
//!   read-modify-writes; other threads use a shared half that is merged
//!   when it would go negative.
//! - **Immortal and deferred counts**: immortal objects are never counted
//!   or freed; deferred objects skip per-operation counting and are left to
//!   the cycle collector.
//! - **Tagged stack references** ([`StackRef`]): value-stack entries that
//!   may skip the count entirely.
//! - **Serial collector**: generational, with an incremental old space.
//! - **Concurrent collector**: a mark-alive pre-pass, two short
//!   stop-the-world pauses and QSBR-deferred reuse of freed slots.
//!
//! # Quick Start
//!
//! ```ignore
//! use rcgc::{Collector, GcConfig, GcObject, Mutator, ObjRef, Traverse};
//!
//! #[derive(Traverse)]
//! struct Node {
//!     next: Option<ObjRef>,
//! }
//!
//! impl GcObject for Node {
//!     fn clear(&mut self, released: &mut Vec<ObjRef>) {
//!         released.extend(self.next.take());
//!     }
//! }
//!
//! let collector = Collector::new(GcConfig::serial());
//! let m = Mutator::new(&collector)?;
//!
//! let a = m.alloc(Node { next: None });
//! let b = m.alloc(Node { next: Some(a) });
//! m.incref(b);
//! m.with_payload::<Node, _>(a, |n| n.next = Some(b))?;
//!
//! m.decref(a);
//! m.decref(b);
//! assert_eq!(m.collect_full()?, 2);
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod config;
mod error;
mod gc;
mod heap;
mod metrics;
mod object;
pub mod qsbr;
pub mod refcount;
mod stackref;
mod stw;
mod thread;
mod tracing;
mod weakref;

// Re-export public API
pub use config::{CollectorMode, GcConfig, GcDebugFlags};
pub use error::{CallbackError, GcError};
pub use gc::{
    CallbackPhase, CollectionInfo, Collector, GcCallback, Generation, GenerationStats,
};
pub use heap::Heap;
pub use metrics::{CollectionType, GcHistory, GcMetrics, GlobalMetrics, PhaseTimer};
pub use object::{AsAny, FinalizeCx, GcObject, ObjRef, Traverse, Visitor};
pub use stackref::StackRef;
pub use thread::Mutator;
pub use tracing::GcId;
pub use weakref::{WeakCallback, WeakRef};

// Re-export derive macro when feature is enabled
#[cfg(feature = "derive")]
pub use rcgc_derive::Traverse;
