//! Class resolution beyond the stream's registry.
//!
//! An [`InputStream`](crate::InputStream) first looks classes up in its own
//! registry. Names it does not know are handed to an injected
//! [`ClassResolver`], which may load additional code and return its
//! descriptor. [`ModuleResolver`] implements the usual arrangement: named
//! modules, each declaring the classes it provides and a loader that builds
//! the module's registry the first time one of those classes is needed.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use tracing::{info, warn};

use crate::error::Result;
use crate::registry::{ClassDescriptor, Registry};

/// Resolves class names (and optionally Rust types) to descriptors.
pub trait ClassResolver {
    /// Returns the descriptor of `name`, loading it if necessary.
    fn resolve(&self, name: &str) -> Option<Arc<ClassDescriptor>>;

    /// Returns the descriptor of the Rust type `type_id`.
    ///
    /// Used when writing objects whose classes were provided by the resolver.
    fn resolve_type(&self, type_id: TypeId) -> Option<Arc<ClassDescriptor>> {
        let _ = type_id;
        None
    }
}

impl ClassResolver for Registry {
    fn resolve(&self, name: &str) -> Option<Arc<ClassDescriptor>> {
        self.get(name).cloned()
    }

    fn resolve_type(&self, type_id: TypeId) -> Option<Arc<ClassDescriptor>> {
        self.get_by_type(type_id).cloned()
    }
}

type Loader = Box<dyn Fn() -> Result<Registry> + Send + Sync>;

struct Module {
    name: String,
    loader: Loader,
    loaded: OnceLock<Option<Registry>>,
}

impl Module {
    fn registry(&self) -> Option<&Registry> {
        self.loaded
            .get_or_init(|| match (self.loader)() {
                Ok(registry) => {
                    info!(module = %self.name, classes = registry.len(), "loaded class module");
                    Some(registry)
                }
                Err(e) => {
                    warn!(module = %self.name, error = %e, "class module failed to load");
                    None
                }
            })
            .as_ref()
    }
}

/// Lazily loaded class modules.
///
/// ```rust
/// use persistream::{ClassResolver, ModuleResolver, Registry};
///
/// let resolver = ModuleResolver::new().module("empty", ["x::Missing"], || Registry::builder().build());
/// assert!(resolver.resolve("x::Missing").is_none());
/// assert!(resolver.is_loaded("empty"));
/// ```
#[derive(Default)]
pub struct ModuleResolver {
    modules: Vec<Module>,
    providers: HashMap<String, usize>,
}

impl ModuleResolver {
    /// Creates a resolver without modules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a module providing `classes`.
    ///
    /// `loader` runs at most once, on the first lookup of any of `classes`.
    /// A class already claimed by an earlier module keeps its first provider.
    pub fn module<I, S, F>(mut self, name: impl Into<String>, classes: I, loader: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn() -> Result<Registry> + Send + Sync + 'static,
    {
        let index = self.modules.len();
        for class in classes {
            self.providers.entry(class.into()).or_insert(index);
        }
        self.modules.push(Module {
            name: name.into(),
            loader: Box::new(loader),
            loaded: OnceLock::new(),
        });
        self
    }

    /// True once the named module's loader has run.
    pub fn is_loaded(&self, module: &str) -> bool {
        self.modules
            .iter()
            .any(|m| m.name == module && m.loaded.get().is_some())
    }
}

impl ClassResolver for ModuleResolver {
    fn resolve(&self, name: &str) -> Option<Arc<ClassDescriptor>> {
        let module = self.modules.get(*self.providers.get(name)?)?;
        module.registry()?.get(name).cloned()
    }

    fn resolve_type(&self, type_id: TypeId) -> Option<Arc<ClassDescriptor>> {
        self.modules
            .iter()
            .filter_map(|m| m.loaded.get().and_then(Option::as_ref))
            .find_map(|registry| registry.get_by_type(type_id).cloned())
    }
}

impl fmt::Debug for ModuleResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.modules
                    .iter()
                    .map(|m| (m.name.as_str(), m.loaded.get().is_some())),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PersistError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn loaders_run_once_and_only_on_demand() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let resolver = ModuleResolver::new().module("m", ["m::A", "m::B"], || {
            CALLS.fetch_add(1, Ordering::SeqCst);
            Registry::builder().build()
        });
        assert!(!resolver.is_loaded("m"));
        assert!(resolver.resolve("other::X").is_none());
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);
        assert!(resolver.resolve("m::A").is_none());
        assert!(resolver.resolve("m::B").is_none());
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert!(resolver.is_loaded("m"));
    }

    #[test]
    fn failing_loader_resolves_nothing() {
        let resolver = ModuleResolver::new().module("broken", ["b::A"], || {
            Err(PersistError::Registry("boom".into()))
        });
        assert!(resolver.resolve("b::A").is_none());
        assert!(resolver.is_loaded("broken"));
        assert!(resolver.resolve_type(TypeId::of::<u8>()).is_none());
    }
}
