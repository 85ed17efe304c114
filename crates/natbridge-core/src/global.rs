//! Global symbol declarations.

use crate::error::{BridgeError, BridgeResult};
use crate::handle::NativeHandle;

/// Declaration of a native global value: a constant, an enumeration member
/// or a singleton object exported as a data symbol.
///
/// Declarations are `const`-constructible so bindings can keep them in
/// statics:
///
/// ```
/// use natbridge_core::GlobalSymbol;
///
/// static DEFAULT_MODE: GlobalSymbol = GlobalSymbol::new("kCFRunLoopDefaultMode")
///     .in_library("CoreFoundation");
/// static NEW_IN_V2: GlobalSymbol = GlobalSymbol::new("kNewThing").optional();
/// static CONCURRENT: GlobalSymbol = GlobalSymbol::new("_dispatch_queue_attr_concurrent")
///     .address_only();
///
/// assert!(DEFAULT_MODE.dereference);
/// assert!(NEW_IN_V2.optional);
/// assert!(!CONCURRENT.dereference);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalSymbol {
    /// Symbol name.
    pub name: &'static str,
    /// Library the symbol lives in; `None` searches every loaded image.
    pub library: Option<&'static str>,
    /// Absence is tolerated and yields no value instead of an error.
    pub optional: bool,
    /// The value is the word stored at the symbol (the default). When
    /// false, the value is the symbol's address itself.
    pub dereference: bool,
}

impl GlobalSymbol {
    /// A required, dereferenced symbol searched in every loaded image.
    pub const fn new(name: &'static str) -> Self {
        GlobalSymbol {
            name,
            library: None,
            optional: false,
            dereference: true,
        }
    }

    /// Look the symbol up in `library`, loading it on first use.
    pub const fn in_library(mut self, library: &'static str) -> Self {
        self.library = Some(library);
        self
    }

    /// Tolerate absence of the symbol.
    pub const fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Use the symbol's address as the value instead of reading through it.
    pub const fn address_only(mut self) -> Self {
        self.dereference = false;
        self
    }
}

/// Resolves global symbols to their values.
pub trait GlobalResolver: Send + Sync {
    /// Value of a global: `Ok(None)` when an optional symbol is absent.
    ///
    /// Fails with [`BridgeError::SymbolNotFound`] for an absent required
    /// symbol.
    fn resolve_global(&self, symbol: &GlobalSymbol) -> BridgeResult<Option<NativeHandle>>;
}

/// A resolver with no symbols: every required global is missing and every
/// optional one absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGlobals;

impl GlobalResolver for NoGlobals {
    fn resolve_global(&self, symbol: &GlobalSymbol) -> BridgeResult<Option<NativeHandle>> {
        if symbol.optional {
            Ok(None)
        } else {
            Err(BridgeError::symbol_not_found(symbol.name, symbol.library))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_flags() {
        const SYM: GlobalSymbol = GlobalSymbol::new("kFoo")
            .in_library("Foo")
            .optional()
            .address_only();
        assert_eq!(SYM.library, Some("Foo"));
        assert!(SYM.optional);
        assert!(!SYM.dereference);
    }

    #[test]
    fn no_globals() {
        let required = GlobalSymbol::new("kFoo");
        assert!(NoGlobals.resolve_global(&required).unwrap_err().is_fatal());
        assert_eq!(
            NoGlobals.resolve_global(&required.optional()).unwrap(),
            None
        );
    }
}
