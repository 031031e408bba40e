//! The class descriptor registry.
//!
//! Every persistable class is described once, at start-up, by a
//! [`ClassDescriptor`]: canonical name, version, direct bases, an optional
//! factory and the flattened *part chain*. Descriptors are collected by a
//! [`RegistryBuilder`] and frozen into an immutable [`Registry`] by
//! [`RegistryBuilder::build`]; streams only ever read it.
//!
//! ## Part chains
//!
//! A class's chain lists every contributing ancestor once, least derived
//! first, and ends with the class's own part. It is the concatenation of the
//! direct bases' chains in declaration order with repeated class names
//! dropped (first occurrence wins), followed by the class itself. For a
//! diamond `D: B, C` with `B: A` and `C: A` this yields `[A, B, C, D]`, where
//! the `A` part is the one reached through `B`.
//!
//! Readers apply the same rule to the bases declared in the stream, so both
//! sides agree on part order without transmitting it.
//!
//! ```rust
//! use persistream::{Persistent, Registry};
//!
//! #[derive(Default, Persistent)]
//! #[persist(name = "demo::Node")]
//! struct Node {
//!     id: u32,
//! }
//!
//! let registry = Registry::builder().register::<Node>().build()?;
//! assert_eq!(registry.get("demo::Node").map(|d| d.version()), Some(1));
//! # Ok::<(), persistream::PersistError>(())
//! ```

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

use tracing::{debug, info};

use crate::error::{PersistError, Result};
use crate::handle::Handle;
use crate::istream::InputStream;
use crate::ostream::OutputStream;
use crate::persistent::{BaseDecl, Persistent, own_part};

/// Writes the fields of one part.
pub type WriteHook = Arc<dyn Fn(&dyn Any, &mut OutputStream<'_>) -> Result<()> + Send + Sync>;

/// Reads the fields of one part; receives the writer's version of the part.
pub type ReadHook =
    Arc<dyn Fn(&mut dyn Any, &mut InputStream<'_>, u32) -> Result<()> + Send + Sync>;

/// Creates a default-constructed instance.
pub type Factory = Arc<dyn Fn() -> Handle + Send + Sync>;

pub(crate) fn write_hook<F>(hook: F) -> WriteHook
where
    F: Fn(&dyn Any, &mut OutputStream<'_>) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(hook)
}

pub(crate) fn read_hook<F>(hook: F) -> ReadHook
where
    F: Fn(&mut dyn Any, &mut InputStream<'_>, u32) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(hook)
}

/// The state contributed by one inheritance level.
#[derive(Clone)]
pub struct Part {
    class: String,
    version: u32,
    write: WriteHook,
    read: ReadHook,
}

impl Part {
    pub(crate) fn new(class: String, version: u32, write: WriteHook, read: ReadHook) -> Self {
        Self {
            class,
            version,
            write,
            read,
        }
    }

    /// Name of the class that introduces this part.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Version of the part as compiled into this process.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Runs the write hook on `object`.
    pub fn write(&self, object: &dyn Any, out: &mut OutputStream<'_>) -> Result<()> {
        (self.write)(object, out)
    }

    /// Runs the read hook on `object` with the writer's part `version`.
    pub fn read(&self, object: &mut dyn Any, input: &mut InputStream<'_>, version: u32) -> Result<()> {
        (self.read)(object, input, version)
    }

    pub(crate) fn write_fn(&self) -> WriteHook {
        Arc::clone(&self.write)
    }

    pub(crate) fn read_fn(&self) -> ReadHook {
        Arc::clone(&self.read)
    }
}

impl fmt::Debug for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Part({} v{})", self.class, self.version)
    }
}

/// Process-wide metadata of one persistable class.
pub struct ClassDescriptor {
    name: String,
    version: u32,
    type_id: TypeId,
    type_name: &'static str,
    factory: Option<Factory>,
    bases: Vec<Arc<ClassDescriptor>>,
    chain: Vec<Part>,
}

impl ClassDescriptor {
    /// Canonical class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Class version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// `TypeId` of the Rust type backing the class.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Rust type name backing the class.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// True if the class has no factory.
    pub fn is_abstract(&self) -> bool {
        self.factory.is_none()
    }

    /// Direct bases in declaration order.
    pub fn bases(&self) -> &[Arc<ClassDescriptor>] {
        &self.bases
    }

    /// Flattened part chain, least derived first.
    pub fn chain(&self) -> &[Part] {
        &self.chain
    }

    /// The part introduced by `class`, if it is part of this class's chain.
    pub fn part(&self, class: &str) -> Option<&Part> {
        self.chain.iter().find(|p| p.class == class)
    }

    /// True if `class` is this class or one of its ancestors.
    pub fn derives_from(&self, class: &str) -> bool {
        self.part(class).is_some()
    }

    /// Constructs a default instance; `None` for abstract classes.
    pub fn create(&self) -> Option<Handle> {
        self.factory.as_ref().map(|factory| factory())
    }
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("type", &self.type_name)
            .field("abstract", &self.is_abstract())
            .field(
                "bases",
                &self.bases.iter().map(|b| b.name()).collect::<Vec<_>>(),
            )
            .field("chain", &self.chain)
            .finish()
    }
}

struct Declared {
    name: String,
    version: u32,
    type_id: TypeId,
    type_name: &'static str,
    factory: Option<Factory>,
    own: Part,
    bases: Vec<BaseDecl>,
}

/// Collects class declarations and links them into a [`Registry`].
#[derive(Default)]
pub struct RegistryBuilder {
    inherited: Vec<Arc<ClassDescriptor>>,
    declared: Vec<Declared>,
}

impl RegistryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from every class of `parent`; new classes may derive from them.
    pub fn extending(parent: &Registry) -> Self {
        Self {
            inherited: parent.by_name.values().cloned().collect(),
            declared: Vec::new(),
        }
    }

    /// Declares `T`. Bases may be declared before or after their subclasses.
    pub fn register<T: Persistent>(mut self) -> Self {
        let (factory, bases) = T::describe().into_parts();
        self.declared.push(Declared {
            name: T::CLASS_NAME.to_owned(),
            version: T::VERSION,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            factory,
            own: own_part::<T>(),
            bases,
        });
        self
    }

    /// Links bases and freezes the registry.
    ///
    /// # Errors
    /// [`PersistError::Registry`] on duplicate names or types, unknown bases
    /// and inheritance cycles.
    pub fn build(self) -> Result<Registry> {
        let mut linker = Linker::default();
        for descriptor in self.inherited {
            linker.by_type.insert(descriptor.type_id, Arc::clone(&descriptor));
            linker.by_name.insert(descriptor.name.clone(), descriptor);
        }

        let mut order = Vec::with_capacity(self.declared.len());
        let mut names = HashSet::new();
        for decl in self.declared {
            if linker.by_name.contains_key(&decl.name) || !names.insert(decl.name.clone()) {
                return Err(PersistError::Registry(format!(
                    "duplicate class name '{}'",
                    decl.name
                )));
            }
            if linker.by_type.contains_key(&decl.type_id)
                || linker.pending.contains_key(&decl.type_id)
            {
                return Err(PersistError::Registry(format!(
                    "type {} registered twice",
                    decl.type_name
                )));
            }
            order.push(decl.type_id);
            linker.pending.insert(decl.type_id, decl);
        }

        for type_id in order {
            linker.link(type_id)?;
        }

        debug!(classes = linker.by_name.len(), "class registry built");
        Ok(Registry {
            by_name: linker.by_name,
            by_type: linker.by_type,
        })
    }
}

impl fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("inherited", &self.inherited.len())
            .field(
                "declared",
                &self.declared.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[derive(Default)]
struct Linker {
    pending: HashMap<TypeId, Declared>,
    visiting: HashSet<TypeId>,
    by_name: HashMap<String, Arc<ClassDescriptor>>,
    by_type: HashMap<TypeId, Arc<ClassDescriptor>>,
}

impl Linker {
    fn link(&mut self, type_id: TypeId) -> Result<Arc<ClassDescriptor>> {
        if let Some(done) = self.by_type.get(&type_id) {
            return Ok(Arc::clone(done));
        }
        let Some(decl) = self.pending.remove(&type_id) else {
            return Err(PersistError::Internal("linking an undeclared class".into()));
        };
        self.visiting.insert(type_id);

        let mut bases = Vec::with_capacity(decl.bases.len());
        for base in &decl.bases {
            if self.visiting.contains(&base.type_id) {
                return Err(PersistError::Registry(format!(
                    "inheritance cycle: '{}' derives from {} which derives from it",
                    decl.name, base.type_name
                )));
            }
            if !self.by_type.contains_key(&base.type_id) && !self.pending.contains_key(&base.type_id) {
                return Err(PersistError::Registry(format!(
                    "class '{}' derives from unregistered type {}",
                    decl.name, base.type_name
                )));
            }
            bases.push(self.link(base.type_id)?);
        }
        self.visiting.remove(&type_id);

        let mut chain: Vec<Part> = Vec::new();
        for (base, decl_base) in bases.iter().zip(&decl.bases) {
            for part in base.chain() {
                if !chain.iter().any(|p| p.class == part.class) {
                    chain.push((decl_base.lift)(part));
                }
            }
        }
        if chain.iter().any(|p| p.class == decl.name) {
            return Err(PersistError::Registry(format!(
                "class '{}' appears among its own ancestors",
                decl.name
            )));
        }
        chain.push(decl.own);

        debug!(
            class = %decl.name,
            version = decl.version,
            parts = chain.len(),
            "linked class"
        );

        let descriptor = Arc::new(ClassDescriptor {
            name: decl.name,
            version: decl.version,
            type_id: decl.type_id,
            type_name: decl.type_name,
            factory: decl.factory,
            bases,
            chain,
        });
        self.by_type.insert(type_id, Arc::clone(&descriptor));
        self.by_name
            .insert(descriptor.name.clone(), Arc::clone(&descriptor));
        Ok(descriptor)
    }
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// An immutable set of linked class descriptors.
pub struct Registry {
    by_name: HashMap<String, Arc<ClassDescriptor>>,
    by_type: HashMap<TypeId, Arc<ClassDescriptor>>,
}

impl Registry {
    /// Starts a new builder.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Looks up a class by canonical name.
    pub fn get(&self, name: &str) -> Option<&Arc<ClassDescriptor>> {
        self.by_name.get(name)
    }

    /// Looks up a class by the `TypeId` of its Rust type.
    pub fn get_by_type(&self, type_id: TypeId) -> Option<&Arc<ClassDescriptor>> {
        self.by_type.get(&type_id)
    }

    /// Looks up the class of `T`.
    pub fn lookup<T: Any>(&self) -> Option<&Arc<ClassDescriptor>> {
        self.get_by_type(TypeId::of::<T>())
    }

    /// Number of classes.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// True if no class is registered.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Class names in unspecified order.
    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    /// Publishes this registry process-wide.
    ///
    /// # Errors
    /// [`PersistError::Registry`] if a registry was already installed.
    pub fn install(self) -> Result<&'static Registry> {
        let count = self.len();
        GLOBAL
            .set(self)
            .map_err(|_| PersistError::Registry("a global registry is already installed".into()))?;
        info!(classes = count, "global class registry installed");
        GLOBAL
            .get()
            .ok_or_else(|| PersistError::Internal("global registry vanished after install".into()))
    }

    /// The registry published by [`Registry::install`], if any.
    pub fn global() -> Option<&'static Registry> {
        GLOBAL.get()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.class_names().collect();
        names.sort_unstable();
        f.debug_struct("Registry").field("classes", &names).finish()
    }
}
