//! # Persistream
//!
//! A persistence engine for polymorphic, versioned object graphs. Graphs of
//! shared objects are written to a linear, marker-delimited text stream and
//! rebuilt with the same sharing topology, cycles included.
//!
//! ## Overview
//!
//! Persistream treats an object graph as a set of *identities*. Every object
//! reachable from the handles given to an [`OutputStream`] is written exactly
//! once; any later occurrence becomes a back-reference to the index the
//! object was first written under. The [`InputStream`] performs the inverse
//! walk and hands back [`Handle`]s that are pointer-equal exactly where the
//! originals were.
//!
//! ### Key Features
//!
//! *   **Identity preservation:** shared objects stay shared and cycles are
//!     rebuilt in place; an object's slot is reserved before its fields are
//!     read, so references back into it resolve immediately.
//! *   **Parts instead of inheritance:** a class is an ordered chain of
//!     independent *parts*, one per inheritance level, each with its own
//!     read/write hook. Multiple inheritance and diamonds are plain chains.
//! *   **Schema evolution:** every part carries the writer's version; fields
//!     a reader does not know are skipped, fields it expects but the writer
//!     did not have keep their defaults.
//! *   **Tolerant reads:** [`ReadMode::Tolerant`] rebuilds objects of unknown
//!     classes as their nearest known ancestor instead of failing.
//! *   **Bounded sessions:** [`OutputStream::push`], [`OutputStream::flush`]
//!     and [`OutputStream::pop`] bound the identity tables of long-running
//!     writers while keeping protected objects deduplicated.
//! *   **Pluggable class loading:** unknown class names can be resolved by an
//!     injected [`ClassResolver`], for example a lazily loading
//!     [`ModuleResolver`].
//!
//! ## Architecture
//!
//! ### Stream Format
//!
//! ```text
//! PST\n1\n {%geo::Circle\n2\n1\n%geo::Shape\n1\n0\n7\n|1.5\n} @0\n ~
//! ```
//!
//! A header, then top-level entries. An object is `{`, its class (inline on
//! first use, `#index` afterwards), its parts separated by `|`, and `}`.
//! Scalars are escaped text fields terminated by a newline. See [`format`].
//!
//! ### Class Registry
//!
//! The [`Registry`] is built once, at start-up, from [`Persistent`] types and
//! is immutable afterwards. It links every class's bases into its part chain
//! and can be published process-wide with [`Registry::install`].
//!
//! ## Usage
//!
//! ```rust
//! use persistream::{Handle, Persistence, Persistent, Registry};
//!
//! #[derive(Default, Persistent)]
//! #[persist(name = "demo::Node")]
//! struct Node {
//!     id: u32,
//!     next: Option<Handle>,
//! }
//!
//! let registry = Registry::builder().register::<Node>().build()?;
//!
//! let first = Handle::new(Node { id: 1, next: None });
//! let second = Handle::new(Node { id: 2, next: Some(first.clone()) });
//! if let Some(mut node) = first.borrow_mut::<Node>() {
//!     node.next = Some(second.clone());
//! }
//!
//! let persistence = Persistence::new(&registry);
//! let bytes = persistence.to_bytes(Some(&first))?;
//! let root = persistence.from_bytes(&bytes)?.expect("root");
//!
//! let next = root.borrow::<Node>().and_then(|n| n.next.clone()).expect("next");
//! let back = next.borrow::<Node>().and_then(|n| n.next.clone()).expect("back");
//! assert!(back.ptr_eq(&root));
//! # if let Some(mut node) = first.borrow_mut::<Node>() { node.next = None; }
//! # if let Some(mut node) = root.borrow_mut::<Node>() { node.next = None; }
//! # Ok::<(), persistream::PersistError>(())
//! ```
//!
//! ### Safety and Error Handling
//!
//! * **Encapsulated Unsafe:** the only `unsafe` block memory-maps stream
//!   files in [`transport`].
//! * **No Panics:** no `unwrap()` or `panic!()` in the library (enforced by
//!   clippy lints).
//! * **Latching Errors:** every failure is a [`PersistError`]; a stream that
//!   failed once keeps reporting that error.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

// The derive macro refers to `::persistream::...`, which must also resolve
// inside this crate's own tests and doctests.
extern crate self as persistream;

// --- PUBLIC API MODULES ---
pub mod api;
pub mod container;
pub mod error;
pub mod format;
pub mod handle;
pub mod inspector;
pub mod istream;
pub mod ostream;
pub mod persistent;
pub mod primitive;
pub mod registry;
pub mod resolver;
pub mod transport;

// --- INTERNAL IMPLEMENTATION MODULES (Hidden from Docs) ---
#[doc(hidden)]
pub mod io;
#[doc(hidden)]
pub mod table;
#[doc(hidden)]
pub mod token;

// --- RE-EXPORTS ---

pub use api::{Persistence, PersistenceBuilder, StreamOptions};
pub use container::Persist;
pub use error::{PersistError, Result};
pub use handle::Handle;
pub use inspector::{StreamInspector, StreamReport};
pub use istream::{InputStream, ReadMode, StreamClass};
pub use ostream::OutputStream;
pub use persistent::{ClassDeclaration, Persistent};
pub use primitive::{Complex, Primitive};
pub use registry::{ClassDescriptor, Part, Registry, RegistryBuilder};
pub use resolver::{ClassResolver, ModuleResolver};
pub use transport::Compression;

// Re-export the derive macro so it is accessible as `persistream::Persistent`
pub use persistream_derive::Persistent;

/// Constants used throughout the library.
pub mod constants {
    /// The default buffer size for I/O operations.
    pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

    /// Deepest object nesting a stream may contain. Readers fail with
    /// `ReadFailure` and writers with `Internal` beyond it.
    pub const MAX_DEPTH: usize = 10_000;

    /// Remaining stack below which a nested object walk switches to a fresh
    /// stack segment.
    pub const STACK_RED_ZONE: usize = 128 * 1024;

    /// Size of each additional stack segment.
    pub const STACK_SEGMENT: usize = 2 * 1024 * 1024;
}
