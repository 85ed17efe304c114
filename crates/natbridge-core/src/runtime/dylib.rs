//! Symbol source over real shared libraries.

use std::ffi::c_void;
use std::fmt;
use std::path::PathBuf;
use std::sync::RwLock;

use libloading::Library;

use crate::error::RuntimeError;
use crate::handle::NativeHandle;
use crate::runtime::{PROCESS_IMAGE, SymbolScope, SymbolSource};

/// Libraries loaded with `libloading`, searched in load order.
///
/// A library is loaded at most once per name. Lookups without a library
/// search the process image first and then every loaded library in the
/// order they were loaded.
pub struct DynamicLibraries {
    search_paths: Vec<PathBuf>,
    process: Option<Library>,
    loaded: RwLock<Vec<(String, Library)>>,
}

impl DynamicLibraries {
    /// Create a source over the running process image.
    pub fn new() -> Self {
        DynamicLibraries {
            search_paths: Vec::new(),
            process: Self::process_image(),
            loaded: RwLock::new(Vec::new()),
        }
    }

    /// Also look for libraries in `path` before the system search paths.
    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    #[cfg(unix)]
    fn process_image() -> Option<Library> {
        Some(libloading::os::unix::Library::this().into())
    }

    #[cfg(windows)]
    fn process_image() -> Option<Library> {
        libloading::os::windows::Library::this()
            .ok()
            .map(Into::into)
    }

    #[cfg(not(any(unix, windows)))]
    fn process_image() -> Option<Library> {
        None
    }

    /// Names to try, most specific first.
    fn candidates(&self, name: &str) -> Vec<PathBuf> {
        let file_name = libloading::library_filename(name);
        let mut out = Vec::new();
        for dir in &self.search_paths {
            out.push(dir.join(&file_name));
            if cfg!(target_os = "macos") {
                out.push(dir.join(format!("{0}.framework/{0}", name)));
            }
        }
        if cfg!(target_os = "macos") {
            out.push(PathBuf::from(format!("/System/Library/Frameworks/{0}.framework/{0}", name)));
        }
        out.push(PathBuf::from(&file_name));
        out.push(PathBuf::from(name));
        out
    }

    /// Names of loaded libraries in load order.
    pub fn loaded(&self) -> Vec<String> {
        match self.loaded.read() {
            Ok(libs) => libs.iter().map(|(n, _)| n.clone()).collect(),
            Err(poisoned) => poisoned
                .into_inner()
                .iter()
                .map(|(n, _)| n.clone())
                .collect(),
        }
    }

    fn lookup(library: &Library, name: &str) -> Option<NativeHandle> {
        // SAFETY: the symbol is only turned into an address; nothing is
        // called or dereferenced here.
        let symbol = unsafe { library.get::<*const c_void>(name.as_bytes()) }.ok()?;
        NativeHandle::from_ptr(*symbol).non_null()
    }
}

impl Default for DynamicLibraries {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DynamicLibraries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicLibraries")
            .field("search_paths", &self.search_paths)
            .field("loaded", &self.loaded())
            .finish()
    }
}

impl SymbolSource for DynamicLibraries {
    fn load_library(&self, name: &str) -> Result<(), RuntimeError> {
        if name == PROCESS_IMAGE {
            return Ok(());
        }
        let mut loaded = self.loaded.write().unwrap_or_else(|p| p.into_inner());
        if loaded.iter().any(|(n, _)| n == name) {
            return Ok(());
        }

        let mut last_error = None;
        for candidate in self.candidates(name) {
            log::trace!("trying {} for library {}", candidate.display(), name);
            // SAFETY: loading runs the library's initializers; bindings only
            // name libraries that are part of the platform they target.
            match unsafe { Library::new(&candidate) } {
                Ok(lib) => {
                    log::debug!("loaded library {} from {}", name, candidate.display());
                    loaded.push((name.to_string(), lib));
                    return Ok(());
                }
                Err(err) => last_error = Some(err),
            }
        }

        Err(RuntimeError::LibraryLoad {
            name: name.to_string(),
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no candidates".to_string()),
        })
    }

    fn find_symbol(&self, scope: SymbolScope<'_>, name: &str) -> Option<NativeHandle> {
        log::trace!("searching {:?} for symbol {}", scope, name);
        let process = || self.process.as_ref().and_then(|p| Self::lookup(p, name));
        let loaded = self.loaded.read().unwrap_or_else(|p| p.into_inner());
        match scope {
            SymbolScope::Process => process(),
            SymbolScope::Library(lib) if lib == PROCESS_IMAGE => process(),
            SymbolScope::Library(lib) => loaded
                .iter()
                .find(|(n, _)| n == lib)
                .and_then(|(_, l)| Self::lookup(l, name)),
            SymbolScope::AllLoaded => {
                process().or_else(|| loaded.iter().find_map(|(_, l)| Self::lookup(l, name)))
            }
        }
    }

    unsafe fn read_word(&self, address: NativeHandle) -> Result<NativeHandle, RuntimeError> {
        if address.is_null() {
            return Err(RuntimeError::NotData(address));
        }
        // SAFETY: guaranteed by the caller per the trait contract.
        let word = unsafe { std::ptr::read_unaligned(address.as_ptr::<usize>()) };
        Ok(NativeHandle(word))
    }
}

/// A C function at a resolved address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CFunction {
    address: NativeHandle,
}

impl CFunction {
    /// Wrap a function address. Returns `None` for the zero handle.
    pub fn new(address: NativeHandle) -> Option<Self> {
        address.non_null().map(|address| CFunction { address })
    }

    pub fn address(&self) -> NativeHandle {
        self.address
    }

    /// Reinterpret the address as a typed function pointer.
    ///
    /// # Safety
    ///
    /// `F` must be an `extern "C"` function pointer type whose signature
    /// matches the native function exactly.
    ///
    /// # Panics
    ///
    /// Panics if `F` is not pointer-sized.
    pub unsafe fn as_fn<F: Copy>(&self) -> F {
        assert_eq!(
            std::mem::size_of::<F>(),
            std::mem::size_of::<usize>(),
            "CFunction::as_fn requires a function pointer type"
        );
        // SAFETY: sizes match; signature correctness is the caller's contract.
        unsafe { std::mem::transmute_copy::<usize, F>(&self.address.0) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_fails() {
        let libs = DynamicLibraries::new();
        let err = libs.load_library("natbridge_no_such_library").unwrap_err();
        assert!(matches!(err, RuntimeError::LibraryLoad { .. }));
        assert!(libs.loaded().is_empty());
    }

    #[test]
    fn null_function_is_rejected() {
        assert!(CFunction::new(NativeHandle::NULL).is_none());
    }

    #[cfg(all(unix, not(target_env = "musl")))]
    #[test]
    fn resolve_and_call_libc_function() {
        use std::ffi::{CString, c_char};

        let libs = DynamicLibraries::new();
        let address = libs
            .find_symbol(SymbolScope::Process, "strlen")
            .expect("strlen is visible in the process image");
        let strlen = CFunction::new(address).unwrap();
        let f: unsafe extern "C" fn(*const c_char) -> usize = unsafe { strlen.as_fn() };
        let text = CString::new("bridge").unwrap();
        assert_eq!(unsafe { f(text.as_ptr()) }, 6);

        assert_eq!(
            libs.find_symbol(SymbolScope::AllLoaded, "strlen"),
            Some(address)
        );
        assert_eq!(
            libs.find_symbol(SymbolScope::Library("libfoo"), "strlen"),
            None
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn read_data_symbol() {
        let libs = DynamicLibraries::new();
        let environ = libs.find_symbol(SymbolScope::AllLoaded, "environ");
        if let Some(address) = environ {
            let word = unsafe { libs.read_word(address) }.unwrap();
            assert!(!word.is_null());
        }
    }
}
