//! Centralized error handling for persistream.
//!
//! Every failure in the engine is reported through [`PersistError`]. Stream
//! errors are *latching*: once an [`OutputStream`](crate::OutputStream) or
//! [`InputStream`](crate::InputStream) has produced an error, the stream keeps
//! returning a clone of that error from every later call. Marker framing cannot
//! be trusted after a parse desynchronizes, so there is no local recovery.
//!
//! ## Error Categories
//!
//! - **Missing classes** ([`PersistError::MissingClass`]): a class named in the
//!   stream cannot be resolved, a back-reference points at an object that
//!   was skipped for that reason, or a written object has no registered class.
//! - **Missing objects** ([`PersistError::MissingObject`]): a back-reference
//!   points at an index that has no reserved slot.
//! - **Read failures** ([`PersistError::ReadFailure`]): malformed markers,
//!   primitives that fail to parse, truncated input or a failing byte source.
//! - **Sink failures** ([`PersistError::SinkFailure`]): the byte sink rejected a write.
//! - **Registry errors** ([`PersistError::Registry`]): inconsistent class
//!   declarations found while building a [`Registry`](crate::Registry).
//! - **Internal errors** ([`PersistError::Internal`]): API misuse such as an
//!   unmatched `pop()` or a hook applied to an object of the wrong type.
//!   Writing a graph nested deeper than
//!   [`MAX_DEPTH`](crate::constants::MAX_DEPTH) is reported the same way.
//!
//! ## Usage
//!
//! ```rust
//! use persistream::{PersistError, Registry};
//!
//! let registry = Registry::builder().build()?;
//! let bytes = b"PST\n1\n{#7\n".to_vec();
//! let mut input = persistream::InputStream::new(&registry, bytes.as_slice())?;
//! match input.read_object() {
//!     Err(PersistError::MissingClass(name)) => eprintln!("unknown class {name}"),
//!     Err(e) => eprintln!("read failed: {e}"),
//!     Ok(_) => {}
//! }
//! assert!(!input.good());
//! # Ok::<(), persistream::PersistError>(())
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

/// A specialized `Result` type for persistream operations.
pub type Result<T> = std::result::Result<T, PersistError>;

/// The master error enum covering all failure domains of the engine.
///
/// This type is `Clone` so a latched stream can hand out the same error on
/// every call. I/O errors are wrapped in `Arc` to keep cloning cheap.
#[derive(Debug, Clone)]
pub enum PersistError {
    /// A class could not be resolved to any known descriptor.
    ///
    /// On the read side this happens in pedantic mode for any unknown class,
    /// and in tolerant mode when no stream-declared ancestor is known either.
    /// On the write side it reports an object whose Rust type was never
    /// registered. It is also reported for a back-reference to an object
    /// that was skipped because its class could not be constructed. The
    /// string is the class name (or Rust type name).
    MissingClass(String),

    /// A back-reference index has no corresponding reserved slot.
    ///
    /// Indicates a protocol mismatch or truncated/corrupted input.
    MissingObject(u32),

    /// The input could not be parsed.
    ///
    /// `offset` is the byte position in the source where the problem was
    /// detected.
    ReadFailure {
        /// Byte offset into the source.
        offset: u64,
        /// Human readable description.
        reason: String,
    },

    /// The underlying byte sink rejected a write.
    SinkFailure(Arc<io::Error>),

    /// Class declarations are inconsistent (duplicate names, unknown bases,
    /// inheritance cycles, registry already installed).
    Registry(String),

    /// The engine was used incorrectly.
    Internal(String),
}

impl PersistError {
    /// Shorthand for building a [`PersistError::ReadFailure`].
    pub fn read_failure(offset: u64, reason: impl Into<String>) -> Self {
        Self::ReadFailure {
            offset,
            reason: reason.into(),
        }
    }

    /// Returns true for errors produced while decoding a stream.
    pub fn is_read_side(&self) -> bool {
        matches!(
            self,
            Self::MissingClass(_) | Self::MissingObject(_) | Self::ReadFailure { .. }
        )
    }
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingClass(name) => write!(f, "Missing Class: '{name}'"),
            Self::MissingObject(index) => write!(f, "Missing Object: no slot for index {index}"),
            Self::ReadFailure { offset, reason } => {
                write!(f, "Read Failure at byte {offset}: {reason}")
            }
            Self::SinkFailure(e) => write!(f, "Sink Failure: {e}"),
            Self::Registry(s) => write!(f, "Registry Error: {s}"),
            Self::Internal(s) => write!(f, "Internal Logic Error: {s}"),
        }
    }
}

impl std::error::Error for PersistError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SinkFailure(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for PersistError {
    fn from(err: io::Error) -> Self {
        Self::SinkFailure(Arc::new(err))
    }
}
