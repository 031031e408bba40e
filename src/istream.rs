//! The reading half of a persistence session.
//!
//! [`InputStream`] parses what an [`OutputStream`](crate::OutputStream)
//! produced and rebuilds an object graph with the same sharing topology.
//! An object's slot is reserved with a freshly constructed instance as soon
//! as its class is known, before any part is read, so back-references from
//! inside its own parts (cycles) resolve to the object under construction.
//!
//! ## Class resolution
//!
//! Every class defined in the stream is resolved by name, first against the
//! stream's registry and then through the injected
//! [`ClassResolver`](crate::ClassResolver). In [`ReadMode::Pedantic`] an
//! unresolved class is fatal. In [`ReadMode::Tolerant`] objects of unknown or
//! abstract classes are built as their nearest concrete ancestor declared in
//! the stream; parts without a local counterpart are skipped.
//!
//! ## Versions
//!
//! Read hooks receive the version the writer recorded for their part. Fields
//! a hook leaves unread (written by a newer version) are skipped.

use std::io::BufRead;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::constants::{MAX_DEPTH, STACK_RED_ZONE, STACK_SEGMENT};
use crate::container::Persist;
use crate::error::{PersistError, Result};
use crate::format::{self, Header};
use crate::handle::Handle;
use crate::io::TokenSource;
use crate::primitive::Primitive;
use crate::registry::{ClassDescriptor, Registry};
use crate::resolver::ClassResolver;
use crate::table::{SlotObject, SlotState, SlotTable};
use crate::token::Token;

/// How strictly stream classes must match local classes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    /// Every class in the stream must resolve to a concrete local class.
    #[default]
    Pedantic,
    /// Unknown classes degrade to their nearest known concrete ancestor.
    Tolerant,
}

/// One part of a stream class chain.
#[derive(Debug, Clone)]
pub struct StreamPart {
    class: String,
    version: u32,
    local: Option<Arc<ClassDescriptor>>,
}

impl StreamPart {
    /// Name of the class that introduced the part.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Version recorded by the writer.
    pub fn version(&self) -> u32 {
        self.version
    }
}

/// A class as declared by the stream.
#[derive(Debug)]
pub struct StreamClass {
    name: String,
    version: u32,
    bases: Vec<Arc<StreamClass>>,
    chain: Vec<StreamPart>,
    local: Option<Arc<ClassDescriptor>>,
}

impl StreamClass {
    /// Class name as written.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Class version as written.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Direct bases as written.
    pub fn bases(&self) -> &[Arc<StreamClass>] {
        &self.bases
    }

    /// Part chain derived from the written bases, least derived first.
    pub fn chain(&self) -> &[StreamPart] {
        &self.chain
    }

    /// The local descriptor of this class, if it resolved.
    pub fn local(&self) -> Option<&Arc<ClassDescriptor>> {
        self.local.as_ref()
    }
}

/// Rebuilds object graphs from a byte source.
pub struct InputStream<'a> {
    source: TokenSource<'a>,
    registry: &'a Registry,
    resolver: Option<&'a dyn ClassResolver>,
    mode: ReadMode,
    objects: SlotTable,
    classes: Vec<Option<Arc<StreamClass>>>,
    depth: usize,
    error: Option<PersistError>,
}

impl<'a> InputStream<'a> {
    /// Opens a session reading from `reader` and validates the stream header.
    ///
    /// # Errors
    /// [`PersistError::ReadFailure`] if the header is missing or unsupported.
    pub fn new<R: BufRead + 'a>(registry: &'a Registry, reader: R) -> Result<Self> {
        let mut source = TokenSource::new(reader);
        let magic = source.read_field()?;
        let version = source.read_field()?;
        let header =
            Header::validate(&magic, &version).map_err(|reason| PersistError::read_failure(0, reason))?;
        debug!(format_version = header.version, "opened input stream");
        Ok(Self {
            source,
            registry,
            resolver: None,
            mode: ReadMode::default(),
            objects: SlotTable::default(),
            classes: Vec::new(),
            depth: 0,
            error: None,
        })
    }

    /// Sets the read mode.
    pub fn with_mode(mut self, mode: ReadMode) -> Self {
        self.mode = mode;
        self
    }

    /// Consults `resolver` for classes missing from the registry.
    pub fn with_resolver(mut self, resolver: &'a dyn ClassResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// The active read mode.
    pub fn mode(&self) -> ReadMode {
        self.mode
    }

    fn check(&self) -> Result<()> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn latch<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result
            && self.error.is_none()
        {
            debug!(error = %e, "input stream latched bad state");
            self.error = Some(e.clone());
        }
        result
    }

    /// Runs `op` as a public read operation: latched errors short-circuit,
    /// pending flush tokens are applied at top level, new errors latch.
    fn guarded<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.check()?;
        let result = self.sync().and_then(|()| op(self));
        self.latch(result)
    }

    /// True while no error has occurred.
    pub fn good(&self) -> bool {
        self.error.is_none()
    }

    /// The latched error, if any.
    pub fn error(&self) -> Option<&PersistError> {
        self.error.as_ref()
    }

    /// Number of object slots currently in the table.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Number of classes currently in the table.
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Byte offset of the next unread token.
    pub fn offset(&self) -> u64 {
        self.source.offset()
    }

    /// True if the stream holds no further top-level entries.
    pub fn at_end(&mut self) -> Result<bool> {
        self.guarded(|s| s.source.at_end())
    }

    /// Applies flush tokens that precede the next top-level entry.
    fn sync(&mut self) -> Result<()> {
        if self.depth > 0 {
            return Ok(());
        }
        while self.source.peek_byte()? == Some(format::FLUSH) {
            self.source.next_token()?;
            let offset = self.source.offset();
            let objects = self.read_count()?;
            let classes = self.read_count()?;
            if objects > self.objects.len() || classes > self.classes.len() {
                return Err(PersistError::read_failure(
                    offset,
                    format!(
                        "flush retains {objects} objects and {classes} classes but only {} and {} are known",
                        self.objects.len(),
                        self.classes.len()
                    ),
                ));
            }
            self.objects.truncate(objects);
            self.classes.truncate(classes);
            debug!(objects, classes, "applied flush token");
        }
        Ok(())
    }

    fn read_count(&mut self) -> Result<usize> {
        let offset = self.source.offset();
        let text = self.source.read_field()?;
        text.parse()
            .map_err(|_| PersistError::read_failure(offset, format!("invalid count '{text}'")))
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        let offset = self.source.offset();
        let found = self.source.next_token()?;
        if found == expected {
            Ok(())
        } else {
            Err(PersistError::read_failure(
                offset,
                format!("expected {expected}, found {found}"),
            ))
        }
    }

    /// Reads an object reference.
    ///
    /// Returns `None` for a null reference. Objects nested deeper than
    /// [`MAX_DEPTH`] are a [`PersistError::ReadFailure`].
    pub fn read_object(&mut self) -> Result<Option<Handle>> {
        if self.depth > 0 {
            // Inside a hook: flush tokens cannot occur.
            self.check()?;
            let result = self.read_object_inner(false);
            return self.latch(result);
        }
        self.guarded(|s| s.read_object_inner(false))
    }

    fn read_object_inner(&mut self, skipping: bool) -> Result<Option<Handle>> {
        let offset = self.source.offset();
        match self.source.next_token()? {
            Token::Null => Ok(None),
            Token::BackRef(index) => self.back_reference(index, skipping),
            Token::BeginObject => self.read_body(offset, skipping),
            other => Err(PersistError::read_failure(
                offset,
                format!("expected an object reference, found {other}"),
            )),
        }
    }

    fn back_reference(&self, index: u32, skipping: bool) -> Result<Option<Handle>> {
        match self.objects.get(index) {
            Some((SlotObject::Live(handle), state)) => {
                if state == SlotState::Reserved {
                    trace!(index, "back-reference to an object under construction");
                }
                Ok(Some(handle.clone()))
            }
            // Objects that could not be constructed may only be referenced
            // from data that is itself being skipped.
            Some((SlotObject::Unconstructed(_), _)) if skipping => Ok(None),
            Some((SlotObject::Unconstructed(class), _)) => {
                Err(PersistError::MissingClass(class.clone()))
            }
            None => Err(PersistError::MissingObject(index)),
        }
    }

    fn read_body(&mut self, offset: u64, skipping: bool) -> Result<Option<Handle>> {
        if self.depth >= MAX_DEPTH {
            return Err(PersistError::read_failure(
                offset,
                format!("objects nested deeper than {MAX_DEPTH} levels"),
            ));
        }
        let class = self.read_class_inner(0)?;
        let target = match self.construction_target(&class) {
            Ok(target) => Some(target),
            Err(PersistError::MissingClass(name)) if skipping => {
                debug!(class = %name, "skipping object of unconstructible class");
                None
            }
            Err(e) => return Err(e),
        };

        let handle = match &target {
            Some(target) => Some(
                target
                    .create()
                    .ok_or_else(|| PersistError::MissingClass(target.name().to_owned()))?,
            ),
            None => None,
        };
        let slot = match &handle {
            Some(handle) => SlotObject::Live(handle.clone()),
            None => SlotObject::Unconstructed(class.name.clone()),
        };
        let id = self.objects.reserve(slot);
        trace!(%id, class = class.name(), "reading object");

        self.depth += 1;
        stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT, || {
            self.read_parts(&class, target.as_deref(), handle.as_ref())
        })?;
        self.expect(Token::EndObject)?;
        self.depth -= 1;
        self.objects.finalize(id);
        Ok(handle)
    }

    /// Reads every part of `class` into `handle`, or skips them all when the
    /// object could not be constructed.
    fn read_parts(
        &mut self,
        class: &StreamClass,
        target: Option<&ClassDescriptor>,
        handle: Option<&Handle>,
    ) -> Result<()> {
        let (Some(target), Some(handle)) = (target, handle) else {
            for i in 0..class.chain.len() {
                if i > 0 {
                    self.expect(Token::NextPart)?;
                }
                self.skip_fields()?;
            }
            return Ok(());
        };
        let mut object = handle.borrow_any_mut()?;
        for (i, part) in class.chain.iter().enumerate() {
            if i > 0 {
                self.expect(Token::NextPart)?;
            }
            match target.part(&part.class) {
                Some(local) => local.read(&mut *object, self, part.version)?,
                None => trace!(part = %part.class, "skipping part without local counterpart"),
            }
            self.skip_fields()?;
        }
        Ok(())
    }

    /// Picks the class to instantiate for an object of stream class `class`.
    fn construction_target(&self, class: &StreamClass) -> Result<Arc<ClassDescriptor>> {
        if let Some(local) = &class.local
            && !local.is_abstract()
        {
            return Ok(Arc::clone(local));
        }
        if self.mode == ReadMode::Pedantic {
            return Err(PersistError::MissingClass(class.name.clone()));
        }
        let ancestors = class.chain.iter().rev().skip(1);
        for part in ancestors {
            if let Some(local) = &part.local
                && !local.is_abstract()
            {
                warn!(
                    class = %class.name,
                    fallback = local.name(),
                    "constructing object as its nearest known ancestor"
                );
                return Ok(Arc::clone(local));
            }
        }
        Err(PersistError::MissingClass(class.name.clone()))
    }

    /// Consumes the remaining fields of the current part, up to (not
    /// including) the next part separator or the end of the object.
    fn skip_fields(&mut self) -> Result<()> {
        loop {
            let offset = self.source.offset();
            match self.source.peek_byte()? {
                Some(format::NEXT_PART) | Some(format::END_OBJECT) => return Ok(()),
                Some(format::BEGIN_OBJECT) | Some(format::BACK_REF) | Some(format::NULL) => {
                    self.read_object_inner(true)?;
                }
                Some(format::CLASS_REF) | Some(format::NEW_CLASS) | Some(format::FLUSH) => {
                    let token = self.source.next_token()?;
                    return Err(PersistError::read_failure(
                        offset,
                        format!("unexpected {token} inside an object"),
                    ));
                }
                Some(_) => {
                    let skipped = self.source.next_token()?;
                    trace!(token = %skipped, "skipped leftover field");
                }
                None => return Err(self.source.failure("unexpected end of stream inside an object")),
            }
        }
    }

    /// Reads a class reference or an inline class definition.
    pub fn read_class(&mut self) -> Result<Arc<StreamClass>> {
        self.guarded(|s| s.read_class_inner(0))
    }

    fn read_class_inner(&mut self, nesting: usize) -> Result<Arc<StreamClass>> {
        let offset = self.source.offset();
        if nesting >= MAX_DEPTH {
            return Err(PersistError::read_failure(
                offset,
                format!("class definitions nested deeper than {MAX_DEPTH} levels"),
            ));
        }
        match self.source.next_token()? {
            Token::ClassRef(index) => match self.classes.get(index as usize) {
                Some(Some(class)) => Ok(Arc::clone(class)),
                Some(None) => Err(PersistError::read_failure(
                    offset,
                    format!("class #{index} refers to itself"),
                )),
                None => Err(PersistError::MissingClass(format!("#{index}"))),
            },
            Token::NewClass => self.read_class_definition(nesting),
            other => Err(PersistError::read_failure(
                offset,
                format!("expected a class, found {other}"),
            )),
        }
    }

    fn read_class_definition(&mut self, nesting: usize) -> Result<Arc<StreamClass>> {
        let name = self.source.read_field()?;
        let version_offset = self.source.offset();
        let version = self.source.read_field()?;
        let version: u32 = version.parse().map_err(|_| {
            PersistError::read_failure(version_offset, format!("invalid class version '{version}'"))
        })?;
        let base_count = self.read_count()?;

        // Pre-order: the class takes its index before its bases.
        let index = self.classes.len();
        self.classes.push(None);

        let mut bases = Vec::with_capacity(base_count.min(16));
        for _ in 0..base_count {
            let base = stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT, || {
                self.read_class_inner(nesting + 1)
            })?;
            bases.push(base);
        }

        let local = self.resolve(&name)?;
        let mut chain: Vec<StreamPart> = Vec::new();
        for base in &bases {
            for part in &base.chain {
                if !chain.iter().any(|p| p.class == part.class) {
                    chain.push(part.clone());
                }
            }
        }
        chain.push(StreamPart {
            class: name.clone(),
            version,
            local: local.clone(),
        });

        let class = Arc::new(StreamClass {
            name,
            version,
            bases,
            chain,
            local,
        });
        if let Some(slot) = self.classes.get_mut(index) {
            *slot = Some(Arc::clone(&class));
        }
        Ok(class)
    }

    fn resolve(&self, name: &str) -> Result<Option<Arc<ClassDescriptor>>> {
        if let Some(descriptor) = self.registry.get(name) {
            return Ok(Some(Arc::clone(descriptor)));
        }
        if let Some(descriptor) = self.resolver.and_then(|r| r.resolve(name)) {
            debug!(class = name, "class provided by resolver");
            return Ok(Some(descriptor));
        }
        match self.mode {
            ReadMode::Pedantic => Err(PersistError::MissingClass(name.to_owned())),
            ReadMode::Tolerant => {
                warn!(class = name, "unknown class in stream");
                Ok(None)
            }
        }
    }

    /// Reads one scalar field.
    pub fn read_primitive<P: Primitive>(&mut self) -> Result<P> {
        self.guarded(|s| {
            let offset = s.source.offset();
            match s.source.next_token()? {
                Token::Field(text) => {
                    P::decode(&text).map_err(|reason| PersistError::read_failure(offset, reason))
                }
                other => Err(PersistError::read_failure(
                    offset,
                    format!("expected {}, found {other}", P::KIND),
                )),
            }
        })
    }

    /// Reads a string field.
    pub fn read_string(&mut self) -> Result<String> {
        self.read_primitive()
    }

    /// Reads a boolean marker.
    pub fn read_bool(&mut self) -> Result<bool> {
        self.guarded(|s| {
            let offset = s.source.offset();
            match s.source.next_token()? {
                Token::True => Ok(true),
                Token::False => Ok(false),
                other => Err(PersistError::read_failure(
                    offset,
                    format!("expected a boolean, found {other}"),
                )),
            }
        })
    }

    /// Reads any [`Persist`] value.
    pub fn get<T: Persist>(&mut self) -> Result<T> {
        self.check()?;
        T::get(self)
    }

    /// Reads a container written by
    /// [`OutputStream::put_container`](crate::OutputStream::put_container).
    pub fn get_container<C, T>(&mut self) -> Result<C>
    where
        C: FromIterator<T>,
        T: Persist,
    {
        let count: u64 = self.read_primitive()?;
        (0..count).map(|_| T::get(self)).collect()
    }

    /// Ends the session, reporting the latched error if any.
    pub fn close(self) -> Result<()> {
        self.check()
    }
}

impl std::fmt::Debug for InputStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputStream")
            .field("mode", &self.mode)
            .field("offset", &self.source.offset())
            .field("objects", &self.objects.len())
            .field("classes", &self.classes.len())
            .field("error", &self.error)
            .finish()
    }
}
