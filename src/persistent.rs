//! The domain object boundary.
//!
//! A persistable type implements [`Persistent`]: a stable class name, a
//! version, one hook pair that reads and writes exactly the fields the type
//! itself introduces, and a [`ClassDeclaration`] naming its construction
//! factory and its base parts. Base parts are embedded values reached through
//! projection functions, so a class never serializes its bases' fields
//! itself; the registry composes the projected base hooks into the class's
//! part chain.
//!
//! Most types use `#[derive(Persistent)]`; a manual implementation looks like
//! this:
//!
//! ```rust
//! use persistream::{ClassDeclaration, ClassDescriptor, InputStream, OutputStream, Persistent, Result};
//!
//! #[derive(Default)]
//! struct Shape {
//!     color: u32,
//! }
//!
//! impl Persistent for Shape {
//!     const CLASS_NAME: &'static str = "geo::Shape";
//!     const VERSION: u32 = 1;
//!
//!     fn persist_output(&self, out: &mut OutputStream<'_>) -> Result<()> {
//!         out.write_primitive(&self.color)
//!     }
//!
//!     fn persist_input(&mut self, input: &mut InputStream<'_>, _version: u32) -> Result<()> {
//!         self.color = input.read_primitive()?;
//!         Ok(())
//!     }
//!
//!     fn describe() -> ClassDeclaration<Self> {
//!         ClassDescriptor::abstract_of::<Self>()
//!     }
//! }
//!
//! #[derive(Default)]
//! struct Circle {
//!     shape: Shape,
//!     radius: f64,
//! }
//!
//! impl Persistent for Circle {
//!     const CLASS_NAME: &'static str = "geo::Circle";
//!     const VERSION: u32 = 2;
//!
//!     fn persist_output(&self, out: &mut OutputStream<'_>) -> Result<()> {
//!         out.write_primitive(&self.radius)
//!     }
//!
//!     fn persist_input(&mut self, input: &mut InputStream<'_>, _version: u32) -> Result<()> {
//!         self.radius = input.read_primitive()?;
//!         Ok(())
//!     }
//!
//!     fn describe() -> ClassDeclaration<Self> {
//!         ClassDescriptor::of::<Self>().base::<Shape>(|c| &c.shape, |c| &mut c.shape)
//!     }
//! }
//! ```

use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{PersistError, Result};
use crate::handle::Handle;
use crate::istream::InputStream;
use crate::ostream::OutputStream;
use crate::registry::{ClassDescriptor, Factory, Part, read_hook, write_hook};

/// A type that can be written to and read from persistence streams.
pub trait Persistent: Any {
    /// Canonical, globally unique class name written to streams.
    const CLASS_NAME: &'static str;

    /// Current version of the fields this type introduces.
    const VERSION: u32;

    /// Writes the fields introduced by this type (not those of its bases).
    fn persist_output(&self, out: &mut OutputStream<'_>) -> Result<()>;

    /// Reads the fields introduced by this type.
    ///
    /// `version` is the version the writer recorded for this part, which may
    /// be older or newer than [`Persistent::VERSION`].
    fn persist_input(&mut self, input: &mut InputStream<'_>, version: u32) -> Result<()>;

    /// Declares the factory and base parts of this type.
    fn describe() -> ClassDeclaration<Self>
    where
        Self: Sized;
}

pub(crate) type Lift = Arc<dyn Fn(&Part) -> Part + Send + Sync>;

pub(crate) struct BaseDecl {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) lift: Lift,
}

/// Construction and inheritance data of a [`Persistent`] type, before linking.
///
/// Created with [`ClassDescriptor::of`] or [`ClassDescriptor::abstract_of`].
pub struct ClassDeclaration<T> {
    factory: Option<Factory>,
    bases: Vec<BaseDecl>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Persistent> ClassDeclaration<T> {
    pub(crate) fn new(factory: Option<Factory>) -> Self {
        Self {
            factory,
            bases: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Adds a direct base part.
    ///
    /// Bases are serialized in declaration order. `get` and `get_mut` project
    /// the object onto the embedded base value.
    pub fn base<B: Persistent>(mut self, get: fn(&T) -> &B, get_mut: fn(&mut T) -> &mut B) -> Self {
        let lift: Lift = Arc::new(move |part: &Part| lift_part::<T, B>(part, get, get_mut));
        self.bases.push(BaseDecl {
            type_id: TypeId::of::<B>(),
            type_name: std::any::type_name::<B>(),
            lift,
        });
        self
    }

    /// Returns true if instances can be constructed.
    pub fn is_concrete(&self) -> bool {
        self.factory.is_some()
    }

    pub(crate) fn into_parts(self) -> (Option<Factory>, Vec<BaseDecl>) {
        (self.factory, self.bases)
    }
}

impl ClassDescriptor {
    /// Declares a concrete class constructed through `Default`.
    pub fn of<T: Persistent + Default>() -> ClassDeclaration<T> {
        let factory: Factory = Arc::new(|| Handle::new(T::default()));
        ClassDeclaration::new(Some(factory))
    }

    /// Declares an abstract class: it contributes a part but is never instantiated.
    pub fn abstract_of<T: Persistent>() -> ClassDeclaration<T> {
        ClassDeclaration::new(None)
    }
}

fn type_mismatch<T: Any>() -> PersistError {
    PersistError::Internal(format!(
        "hook of {} applied to an object of another type",
        std::any::type_name::<T>()
    ))
}

pub(crate) fn downcast_ref<T: Any>(object: &dyn Any) -> Result<&T> {
    object.downcast_ref::<T>().ok_or_else(type_mismatch::<T>)
}

pub(crate) fn downcast_mut<T: Any>(object: &mut dyn Any) -> Result<&mut T> {
    object.downcast_mut::<T>().ok_or_else(type_mismatch::<T>)
}

/// The part holding the fields `T` introduces.
pub(crate) fn own_part<T: Persistent>() -> Part {
    Part::new(
        T::CLASS_NAME.to_owned(),
        T::VERSION,
        write_hook(|object, out| downcast_ref::<T>(object)?.persist_output(out)),
        read_hook(|object, input, version| {
            downcast_mut::<T>(object)?.persist_input(input, version)
        }),
    )
}

/// Re-targets a part of `B` onto the `B` embedded in a `T`.
fn lift_part<T: Any, B: Any>(part: &Part, get: fn(&T) -> &B, get_mut: fn(&mut T) -> &mut B) -> Part {
    let write = part.write_fn();
    let read = part.read_fn();
    Part::new(
        part.class().to_owned(),
        part.version(),
        write_hook(move |object, out| {
            let base: &dyn Any = get(downcast_ref::<T>(object)?);
            (*write)(base, out)
        }),
        read_hook(move |object, input, version| {
            let base: &mut dyn Any = get_mut(downcast_mut::<T>(object)?);
            (*read)(base, input, version)
        }),
    )
}
