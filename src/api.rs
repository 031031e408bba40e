//! High-level entry points.
//!
//! [`Persistence`] bundles a registry, an optional resolver and
//! [`StreamOptions`] and runs whole sessions against files or byte buffers.
//! Use [`OutputStream`] and [`InputStream`] directly for anything finer
//! grained.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::handle::Handle;
use crate::istream::{InputStream, ReadMode};
use crate::ostream::OutputStream;
use crate::registry::Registry;
use crate::resolver::ClassResolver;
use crate::transport::{self, Compression};

/// Session settings, serializable so they can live in application config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    /// Class matching strictness for reads.
    pub mode: ReadMode,
    /// Compression of files written by [`Persistence::save`].
    pub compression: Compression,
}

/// The main entry point for saving and loading object graphs.
#[derive(Clone, Copy)]
pub struct Persistence<'r> {
    registry: &'r Registry,
    resolver: Option<&'r dyn ClassResolver>,
    options: StreamOptions,
}

impl<'r> Persistence<'r> {
    /// Starts configuring a facade over `registry`.
    pub fn builder(registry: &'r Registry) -> PersistenceBuilder<'r> {
        PersistenceBuilder {
            inner: Persistence {
                registry,
                resolver: None,
                options: StreamOptions::default(),
            },
        }
    }

    /// A facade with default options.
    pub fn new(registry: &'r Registry) -> Self {
        Self::builder(registry).build()
    }

    /// The active options.
    pub fn options(&self) -> StreamOptions {
        self.options
    }

    /// Opens an output session on `writer`.
    pub fn writer<'w, W: std::io::Write + 'w>(&self, writer: W) -> OutputStream<'w>
    where
        'r: 'w,
    {
        let out = OutputStream::new(self.registry, writer);
        match self.resolver {
            Some(resolver) => out.with_resolver(resolver),
            None => out,
        }
    }

    /// Opens an input session on `reader`.
    pub fn reader<'w, R: std::io::BufRead + 'w>(&self, reader: R) -> Result<InputStream<'w>>
    where
        'r: 'w,
    {
        let input = InputStream::new(self.registry, reader)?.with_mode(self.options.mode);
        Ok(match self.resolver {
            Some(resolver) => input.with_resolver(resolver),
            None => input,
        })
    }

    /// Serializes the graph reachable from `root` into a byte vector.
    pub fn to_bytes(&self, root: Option<&Handle>) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        let mut out = self.writer(&mut bytes);
        out.write_object(root)?;
        out.close()?;
        Ok(bytes)
    }

    /// Rebuilds the graph written by [`Persistence::to_bytes`].
    pub fn from_bytes(&self, bytes: &[u8]) -> Result<Option<Handle>> {
        let mut input = self.reader(bytes)?;
        let root = input.read_object()?;
        input.close()?;
        Ok(root)
    }

    /// Writes the graph reachable from `root` to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P, root: Option<&Handle>) -> Result<()> {
        self.save_with(path, |out| out.write_object(root))
    }

    /// Runs `session` against an output stream on a new file.
    pub fn save_with<P, F>(&self, path: P, session: F) -> Result<()>
    where
        P: AsRef<Path>,
        F: FnOnce(&mut OutputStream<'_>) -> Result<()>,
    {
        let path = path.as_ref();
        let mut sink = transport::create(path, self.options.compression)?;
        {
            let mut out = self.writer(&mut sink);
            session(&mut out)?;
            debug!(path = %path.display(), bytes = out.bytes_written(), "saved stream");
            out.close()?;
        }
        sink.finish()
    }

    /// Reads the root object of a file written by [`Persistence::save`].
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<Option<Handle>> {
        self.load_with(path, |input| input.read_object())
    }

    /// Runs `session` against an input stream on `path`.
    pub fn load_with<P, F, T>(&self, path: P, session: F) -> Result<T>
    where
        P: AsRef<Path>,
        F: FnOnce(&mut InputStream<'_>) -> Result<T>,
    {
        let source = transport::open(path)?;
        let mut input = self.reader(source)?;
        let value = session(&mut input)?;
        input.close()?;
        Ok(value)
    }
}

impl std::fmt::Debug for Persistence<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("registry", self.registry)
            .field("resolver", &self.resolver.is_some())
            .field("options", &self.options)
            .finish()
    }
}

/// Configures a [`Persistence`] facade.
#[derive(Debug)]
pub struct PersistenceBuilder<'r> {
    inner: Persistence<'r>,
}

impl<'r> PersistenceBuilder<'r> {
    /// Sets the read mode.
    pub fn mode(mut self, mode: ReadMode) -> Self {
        self.inner.options.mode = mode;
        self
    }

    /// Sets the file compression.
    pub fn compression(mut self, compression: Compression) -> Self {
        self.inner.options.compression = compression;
        self
    }

    /// Replaces all options.
    pub fn options(mut self, options: StreamOptions) -> Self {
        self.inner.options = options;
        self
    }

    /// Injects a class resolver for names missing from the registry.
    pub fn resolver(mut self, resolver: &'r dyn ClassResolver) -> Self {
        self.inner.resolver = Some(resolver);
        self
    }

    /// Finishes configuration.
    pub fn build(self) -> Persistence<'r> {
        self.inner
    }
}
