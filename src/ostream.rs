//! The writing half of a persistence session.
//!
//! [`OutputStream`] walks an object graph from the handles it is given,
//! writes each distinct object once and emits back-references for every
//! later occurrence. Classes are written inline the first time they are used
//! and referenced by index afterwards.
//!
//! ## Protection marks
//!
//! Long sessions bound their tables with [`push`](OutputStream::push),
//! [`flush`](OutputStream::flush) and [`pop`](OutputStream::pop). `push`
//! records the current table sizes; `flush` forgets every object and class
//! recorded after the most recent open mark (or everything when no mark is
//! open) and writes a flush token so readers forget the same entries. Objects
//! recorded before that mark stay deduplicated; anything else is written in
//! full again the next time it is used.
//!
//! ## Failures
//!
//! The first error latches and every later operation returns it. Whatever
//! the failing top-level write left in the buffer is discarded, so a stream
//! that is dropped or closed after a failure ends at the last complete
//! entry (unless the sink already received part of the failed one).

use std::io::Write;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::constants::{MAX_DEPTH, STACK_RED_ZONE, STACK_SEGMENT};
use crate::container::Persist;
use crate::error::{PersistError, Result};
use crate::format::{self, Header};
use crate::handle::Handle;
use crate::io::TokenSink;
use crate::primitive::Primitive;
use crate::registry::{ClassDescriptor, Registry};
use crate::resolver::ClassResolver;
use crate::table::{ClassTable, Mark, ObjectTable};
use crate::token::Token;

/// Serializes object graphs to a byte sink.
pub struct OutputStream<'a> {
    sink: TokenSink<'a>,
    registry: &'a Registry,
    resolver: Option<&'a dyn ClassResolver>,
    objects: ObjectTable,
    classes: ClassTable,
    marks: Vec<Mark>,
    depth: usize,
    entry_start: u64,
    error: Option<PersistError>,
}

impl<'a> OutputStream<'a> {
    /// Opens a session writing to `writer`. The stream header is written
    /// immediately.
    pub fn new<W: Write + 'a>(registry: &'a Registry, writer: W) -> Self {
        let mut stream = Self {
            sink: TokenSink::new(writer),
            registry,
            resolver: None,
            objects: ObjectTable::default(),
            classes: ClassTable::default(),
            marks: Vec::new(),
            depth: 0,
            entry_start: 0,
            error: None,
        };
        let header = stream.sink.raw(&Header::current().to_bytes());
        let _ = stream.latch(header);
        stream
    }

    /// Consults `resolver` for objects whose type is not in the registry.
    pub fn with_resolver(mut self, resolver: &'a dyn ClassResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    fn check(&self) -> Result<()> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Starts a write operation. Top-level writes record where their entry
    /// begins in the output.
    fn enter(&mut self) -> Result<()> {
        self.check()?;
        if self.depth == 0 {
            self.entry_start = self.sink.bytes_written();
        }
        Ok(())
    }

    fn latch<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result
            && self.error.is_none()
        {
            debug!(error = %e, "output stream latched bad state");
            self.error = Some(e.clone());
            self.sink.discard_since(self.entry_start);
        }
        result
    }

    /// True while no error has occurred.
    pub fn good(&self) -> bool {
        self.error.is_none()
    }

    /// The latched error, if any.
    pub fn error(&self) -> Option<&PersistError> {
        self.error.as_ref()
    }

    /// Number of objects currently in the object table.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Number of classes currently in the class table.
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Bytes produced so far, including the header.
    pub fn bytes_written(&self) -> u64 {
        self.sink.bytes_written()
    }

    /// Writes an object reference: null, a back-reference, or the full object.
    ///
    /// # Errors
    /// [`PersistError::MissingClass`] if the object's type has no class,
    /// [`PersistError::Internal`] if objects nest deeper than
    /// [`MAX_DEPTH`].
    pub fn write_object(&mut self, object: Option<&Handle>) -> Result<()> {
        self.enter()?;
        let result = self.write_object_inner(object);
        self.latch(result)
    }

    fn write_object_inner(&mut self, object: Option<&Handle>) -> Result<()> {
        let Some(handle) = object else {
            return self.sink.marker(format::NULL);
        };
        if let Some(id) = self.objects.get(handle) {
            trace!(%id, "back-reference");
            return self.sink.token(&Token::BackRef(id.as_u32()));
        }

        if self.depth >= MAX_DEPTH {
            return Err(PersistError::Internal(format!(
                "objects nested deeper than {MAX_DEPTH} levels"
            )));
        }
        let descriptor = self.class_of(handle)?;
        let id = self.objects.insert(handle.clone());
        trace!(%id, class = descriptor.name(), "writing object");

        self.sink.marker(format::BEGIN_OBJECT)?;
        self.write_class_inner(&descriptor)?;
        self.depth += 1;
        stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT, || {
            self.write_parts(&descriptor, handle)
        })?;
        self.depth -= 1;
        self.sink.marker(format::END_OBJECT)
    }

    fn write_parts(&mut self, descriptor: &ClassDescriptor, handle: &Handle) -> Result<()> {
        let object = handle.borrow_any()?;
        for (i, part) in descriptor.chain().iter().enumerate() {
            if i > 0 {
                self.sink.marker(format::NEXT_PART)?;
            }
            part.write(&*object, self)?;
        }
        Ok(())
    }

    fn class_of(&self, handle: &Handle) -> Result<Arc<ClassDescriptor>> {
        if let Some(descriptor) = self.registry.get_by_type(handle.type_id()) {
            return Ok(Arc::clone(descriptor));
        }
        self.resolver
            .and_then(|r| r.resolve_type(handle.type_id()))
            .ok_or_else(|| PersistError::MissingClass(handle.type_name().to_owned()))
    }

    /// Writes a class reference or an inline class definition.
    ///
    /// Object writes call this internally; a stand-alone call must be
    /// mirrored by [`InputStream::read_class`](crate::InputStream::read_class).
    pub fn write_class(&mut self, descriptor: &ClassDescriptor) -> Result<()> {
        self.enter()?;
        let result = self.write_class_inner(descriptor);
        self.latch(result)
    }

    fn write_class_inner(&mut self, descriptor: &ClassDescriptor) -> Result<()> {
        if let Some(id) = self.classes.get(descriptor.name()) {
            return self.sink.token(&Token::ClassRef(id.as_u32()));
        }
        let id = self.classes.insert(descriptor.name());
        trace!(%id, class = descriptor.name(), "defining class");
        self.sink.marker(format::NEW_CLASS)?;
        self.sink.field(descriptor.name())?;
        self.sink.field(&descriptor.version().to_string())?;
        self.sink.field(&descriptor.bases().len().to_string())?;
        for base in descriptor.bases() {
            self.write_class_inner(base)?;
        }
        Ok(())
    }

    /// Writes one scalar field.
    pub fn write_primitive<P: Primitive>(&mut self, value: &P) -> Result<()> {
        self.enter()?;
        let result = self.sink.field(&value.encode());
        self.latch(result)
    }

    /// Writes a string field.
    pub fn write_str(&mut self, value: &str) -> Result<()> {
        self.enter()?;
        let result = self.sink.field(value);
        self.latch(result)
    }

    /// Writes a boolean marker.
    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.enter()?;
        let result = self
            .sink
            .marker(if value { format::TRUE } else { format::FALSE });
        self.latch(result)
    }

    /// Writes any [`Persist`] value.
    pub fn put<T: Persist + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.check()?;
        value.put(self)
    }

    /// Writes an element count followed by every element, in iteration order.
    pub fn put_container<'x, T, I>(&mut self, items: I) -> Result<()>
    where
        T: Persist + ?Sized + 'x,
        I: IntoIterator<Item = &'x T>,
        I::IntoIter: ExactSizeIterator,
    {
        let items = items.into_iter();
        self.write_primitive(&(items.len() as u64))?;
        for item in items {
            item.put(self)?;
        }
        Ok(())
    }

    /// Records the current table sizes as a protection mark.
    pub fn push(&mut self) -> Result<()> {
        self.check()?;
        let mark = Mark {
            objects: self.objects.len(),
            classes: self.classes.len(),
        };
        trace!(objects = mark.objects, classes = mark.classes, "push");
        self.marks.push(mark);
        Ok(())
    }

    /// Removes the most recent protection mark.
    ///
    /// # Errors
    /// [`PersistError::Internal`] if no mark is open.
    pub fn pop(&mut self) -> Result<()> {
        self.check()?;
        let result = match self.marks.pop() {
            Some(_) => Ok(()),
            None => Err(PersistError::Internal("pop() without a matching push()".into())),
        };
        self.latch(result)
    }

    /// Forgets unprotected table entries, tells readers to do the same and
    /// flushes the sink.
    ///
    /// # Errors
    /// [`PersistError::Internal`] when called from inside a write hook.
    pub fn flush(&mut self) -> Result<()> {
        self.enter()?;
        let result = self.flush_inner();
        self.latch(result)
    }

    fn flush_inner(&mut self) -> Result<()> {
        if self.depth > 0 {
            return Err(PersistError::Internal(
                "flush() is only valid between top-level writes".into(),
            ));
        }
        let mark = self.marks.last().copied().unwrap_or_default();
        self.objects.truncate(mark.objects);
        self.classes.truncate(mark.classes);
        debug!(
            objects = mark.objects,
            classes = mark.classes,
            "flushed output tables"
        );
        self.sink.marker(format::FLUSH)?;
        self.sink.field(&mark.objects.to_string())?;
        self.sink.field(&mark.classes.to_string())?;
        self.sink.flush()
    }

    /// Flushes the sink and ends the session.
    pub fn close(mut self) -> Result<()> {
        self.check()?;
        let result = self.sink.flush();
        self.latch(result)
    }
}

impl std::fmt::Debug for OutputStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStream")
            .field("objects", &self.objects.len())
            .field("classes", &self.classes.len())
            .field("marks", &self.marks)
            .field("error", &self.error)
            .finish()
    }
}
