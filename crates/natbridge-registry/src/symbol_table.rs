//! NativeSymbolTable: memoized symbol resolution with lazy library loading.
//!
//! Every (library, symbol) pair is resolved at most once. The first caller
//! performs the native lookup; concurrent callers for the same pair block on
//! the same cell and observe the published result. Absence is cached as
//! well, so an optional symbol missing from the running platform costs one
//! lookup for the whole process.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use natbridge_core::InProcessRuntime;
//! use natbridge_registry::SymbolTable;
//!
//! let rt = Arc::new(InProcessRuntime::new());
//! rt.define_function(None, "CFRetain", |_| Ok(natbridge_core::NativeValue::Void));
//!
//! let table = SymbolTable::new(rt.clone());
//! assert!(table.resolve("CFRetain").is_ok());
//! assert!(table.resolve("CFNoSuchThing").is_err());
//! assert_eq!(table.resolve_optional("CFNoSuchThing").unwrap(), None);
//! ```

use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, OnceLock, RwLock};

use rustc_hash::FxHashMap;

use natbridge_core::runtime::{SymbolScope, SymbolSource};
use natbridge_core::{BridgeError, BridgeResult, NativeHandle, RuntimeError, SymbolKey};

type Cell<T> = Arc<OnceLock<T>>;

/// Raw outcome of one lookup: the address, absence, or a library that could
/// not be loaded.
pub type Lookup = Result<Option<NativeHandle>, RuntimeError>;

/// Process-wide cache of native symbol addresses.
pub struct SymbolTable {
    source: Arc<dyn SymbolSource>,
    search_all: bool,
    symbols: RwLock<FxHashMap<SymbolKey, Cell<Lookup>>>,
    libraries: RwLock<FxHashMap<String, Cell<Result<(), RuntimeError>>>>,
}

/// Get or create the once-cell for `key`. The read path never takes the
/// write lock.
pub(crate) fn cell_for<K: Eq + Hash, T>(map: &RwLock<FxHashMap<K, Cell<T>>>, key: K) -> Cell<T> {
    if let Some(cell) = map.read().unwrap_or_else(|p| p.into_inner()).get(&key) {
        return Arc::clone(cell);
    }
    let mut map = map.write().unwrap_or_else(|p| p.into_inner());
    Arc::clone(map.entry(key).or_default())
}

impl SymbolTable {
    /// A table over `source`. Symbols declared without a library are
    /// searched in every loaded library.
    pub fn new(source: Arc<dyn SymbolSource>) -> Self {
        SymbolTable {
            source,
            search_all: true,
            symbols: RwLock::new(FxHashMap::default()),
            libraries: RwLock::new(FxHashMap::default()),
        }
    }

    /// When false, symbols declared without a library are only searched in
    /// the process image.
    pub fn with_search_all(mut self, search_all: bool) -> Self {
        self.search_all = search_all;
        self
    }

    pub fn source(&self) -> &Arc<dyn SymbolSource> {
        &self.source
    }

    /// Load `library` if it has not been loaded through this table yet.
    /// A failed load is remembered until [`reset`](Self::reset).
    pub fn ensure_library(&self, library: &str) -> Result<(), RuntimeError> {
        let cell = cell_for(&self.libraries, library.to_string());
        cell.get_or_init(|| {
            let result = self.source.load_library(library);
            match &result {
                Ok(()) => log::debug!("library {} ready", library),
                Err(err) => log::warn!("library {} failed to load: {}", library, err),
            }
            result
        })
        .clone()
    }

    /// Memoized raw lookup of `name`, loading `library` first.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn lookup(&self, library: Option<&str>, name: &str) -> Lookup {
        let cell = cell_for(&self.symbols, SymbolKey::new(library, name));
        cell.get_or_init(|| {
            let scope = match library {
                Some(lib) => {
                    self.ensure_library(lib)?;
                    SymbolScope::Library(lib)
                }
                None if self.search_all => SymbolScope::AllLoaded,
                None => SymbolScope::Process,
            };
            log::trace!("resolving symbol {} in {:?}", name, scope);
            Ok(self.source.find_symbol(scope, name))
        })
        .clone()
    }

    /// Resolve `name`, applying the optional-symbol policy: an absent
    /// optional symbol (or one whose library cannot be loaded) yields
    /// `Ok(None)`; an absent required symbol fails with
    /// [`BridgeError::SymbolNotFound`].
    pub fn resolve_in(
        &self,
        library: Option<&str>,
        name: &str,
        optional: bool,
    ) -> BridgeResult<Option<NativeHandle>> {
        match self.lookup(library, name) {
            Ok(Some(address)) => Ok(Some(address)),
            Ok(None) if optional => {
                log::warn!("optional symbol {} is absent", name);
                Ok(None)
            }
            Ok(None) => Err(BridgeError::symbol_not_found(name, library)),
            Err(err) if optional => {
                log::warn!("optional symbol {} is unavailable: {}", name, err);
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Resolve a required symbol searched in every loaded library.
    pub fn resolve(&self, name: &str) -> BridgeResult<NativeHandle> {
        self.resolve_in(None, name, false)?
            .ok_or_else(|| BridgeError::symbol_not_found(name, None))
    }

    /// Resolve an optional symbol searched in every loaded library.
    pub fn resolve_optional(&self, name: &str) -> BridgeResult<Option<NativeHandle>> {
        self.resolve_in(None, name, true)
    }

    /// Number of cached symbol entries.
    pub fn len(&self) -> usize {
        self.symbols.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every cached symbol and library. Libraries stay loaded in the
    /// source; the next resolution asks it again.
    pub fn reset(&self) {
        self.symbols
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
        self.libraries
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }
}

impl fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolTable")
            .field("search_all", &self.search_all)
            .field("symbols", &self.len())
            .finish()
    }
}
