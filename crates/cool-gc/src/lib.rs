//! # Cool Runtime Garbage Collector
//!
//! Heap management for code emitted by the Cool compiler.
//!
//! ## Design
//!
//! - **Fixed object layout**: header (mark, tag, size) followed by
//!   pointer-sized fields, shared with generated machine code
//! - **Root scopes**: generated frames register live references in a LIFO
//!   stack of scopes owned by the collector
//! - **Marking**: depth-first trace over an explicit work-list
//! - **Mark-sweep**: first-fit allocation from free chunks, collecting when
//!   the arena is exhausted
//! - **Zero GC**: bump allocation without collection

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod collector;
pub mod config;
pub mod error;
pub mod flags;
pub mod heap;
pub mod mark_sweep;
pub mod marker;
pub mod object;
pub mod roots;

pub use collector::{Collector, Gc, GcStats, ZeroGc};
pub use config::{GcAlgorithm, GcConfig, parse_heap_size};
pub use error::{FlagError, GcError, GcResult};
pub use flags::RuntimeFlags;
pub use heap::Heap;
pub use mark_sweep::MarkSweepGc;
pub use marker::Marker;
pub use object::{
    Address, HEADER_SIZE, Klass, LAYOUT_HEADER_SIZE, LayoutRef, ObjectHeader, ObjectLayout,
    ObjectRef, ObjectType, WORD_SIZE,
};
pub use roots::{RootScope, RootStack, StackRecord};
