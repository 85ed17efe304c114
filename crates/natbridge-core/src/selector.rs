//! Selector and symbol identity.
//!
//! Native methods are looked up by selector string and global values by
//! symbol name. Both are hashed once with XXHash64 so the caches keyed by
//! them do a single integer lookup, with domain-specific mixing constants so
//! a selector and a symbol with the same spelling never share a key.
//!
//! # Examples
//!
//! ```
//! use natbridge_core::Selector;
//!
//! let sel = Selector::new("objectAtIndex:");
//! assert_eq!(sel.arg_count(), 1);
//! assert_eq!(sel, Selector::new("objectAtIndex:"));
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use xxhash_rust::xxh64::xxh64;

/// Domain-specific mixing constants for identity hashes.
pub mod hash_constants {
    /// Separator between a library name and a symbol name.
    pub const SEP: u64 = 0x4bc94d6bd06053ad;

    /// Domain marker for selector hashes.
    pub const SELECTOR: u64 = 0x7d3c8b4a92e15f6d;

    /// Domain marker for symbol hashes.
    pub const SYMBOL: u64 = 0x5ea77ffbcdf5f302;

    /// Domain marker for symbols searched in every loaded image.
    pub const ANY_LIBRARY: u64 = 0x1a095090689d4647;
}

/// A method selector: the name a message send is dispatched by.
///
/// Cloning is cheap; equality compares the precomputed hash first and then
/// the name.
#[derive(Clone)]
pub struct Selector {
    hash: u64,
    name: Arc<str>,
}

impl Selector {
    /// Create a selector from its name, e.g. `"addObject:"`.
    pub fn new(name: &str) -> Self {
        Selector {
            hash: Self::hash_name(name),
            name: Arc::from(name),
        }
    }

    /// The hash a selector with this name has.
    #[inline]
    pub fn hash_name(name: &str) -> u64 {
        hash_constants::SELECTOR ^ xxh64(name.as_bytes(), 0)
    }

    /// Selector name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Precomputed identity hash.
    #[inline]
    pub fn hash_value(&self) -> u64 {
        self.hash
    }

    /// Number of arguments the selector takes (one per colon).
    pub fn arg_count(&self) -> usize {
        self.name.bytes().filter(|&b| b == b':').count()
    }

    /// Ownership family of the selector by Cocoa naming convention.
    pub fn family(&self) -> MethodFamily {
        MethodFamily::of(&self.name)
    }

    /// Whether a send of this selector returns a +1 object.
    ///
    /// True for the `alloc`, `new`, `copy` and `mutableCopy` families. The
    /// `init` family also returns +1, but only because it consumes the +1 of
    /// its receiver; callers handle that case explicitly.
    pub fn returns_retained(&self) -> bool {
        matches!(
            self.family(),
            MethodFamily::Alloc | MethodFamily::New | MethodFamily::Copy | MethodFamily::MutableCopy
        )
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.name == other.name
    }
}

impl Eq for Selector {}

impl Hash for Selector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@selector({})", self.name)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for Selector {
    fn from(name: &str) -> Self {
        Selector::new(name)
    }
}

/// Cocoa method families that determine the ownership of a returned object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodFamily {
    Alloc,
    New,
    Copy,
    MutableCopy,
    Init,
    None,
}

impl MethodFamily {
    /// Classify a selector name.
    ///
    /// A selector belongs to a family when, after leading underscores, it
    /// starts with the family word followed by the end of the name, a colon,
    /// or an uppercase letter (`newObject` is in `new`, `newsletter` is not).
    pub fn of(selector: &str) -> MethodFamily {
        let name = selector.trim_start_matches('_');
        let families = [
            ("mutableCopy", MethodFamily::MutableCopy),
            ("alloc", MethodFamily::Alloc),
            ("copy", MethodFamily::Copy),
            ("init", MethodFamily::Init),
            ("new", MethodFamily::New),
        ];
        for (word, family) in families {
            if let Some(rest) = name.strip_prefix(word) {
                match rest.chars().next() {
                    None | Some(':') => return family,
                    Some(c) if c.is_ascii_uppercase() => return family,
                    _ => {}
                }
            }
        }
        MethodFamily::None
    }
}

/// Cache key for a symbol, optionally scoped to a library.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct SymbolKey(pub u64);

impl SymbolKey {
    /// Key for `name` in `library`, or in any loaded image when `None`.
    pub fn new(library: Option<&str>, name: &str) -> Self {
        let scope = match library {
            Some(lib) => xxh64(lib.as_bytes(), hash_constants::SEP),
            None => hash_constants::ANY_LIBRARY,
        };
        SymbolKey(hash_constants::SYMBOL ^ scope.rotate_left(17) ^ xxh64(name.as_bytes(), 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_identity() {
        let a = Selector::new("count");
        let b = Selector::new("count");
        let c = Selector::new("length");
        assert_eq!(a, b);
        assert_eq!(a.hash_value(), b.hash_value());
        assert_ne!(a, c);
        assert_eq!(a.hash_value(), Selector::hash_name("count"));
    }

    #[test]
    fn selector_arg_count() {
        assert_eq!(Selector::new("count").arg_count(), 0);
        assert_eq!(Selector::new("addObject:").arg_count(), 1);
        assert_eq!(Selector::new("insertObject:atIndex:").arg_count(), 2);
    }

    #[test]
    fn method_families() {
        assert_eq!(MethodFamily::of("alloc"), MethodFamily::Alloc);
        assert_eq!(MethodFamily::of("allocWithZone:"), MethodFamily::Alloc);
        assert_eq!(MethodFamily::of("new"), MethodFamily::New);
        assert_eq!(MethodFamily::of("newObject"), MethodFamily::New);
        assert_eq!(MethodFamily::of("newsletter"), MethodFamily::None);
        assert_eq!(MethodFamily::of("copy"), MethodFamily::Copy);
        assert_eq!(MethodFamily::of("copyWithZone:"), MethodFamily::Copy);
        assert_eq!(MethodFamily::of("copyright"), MethodFamily::None);
        assert_eq!(MethodFamily::of("mutableCopy"), MethodFamily::MutableCopy);
        assert_eq!(MethodFamily::of("initWithString:"), MethodFamily::Init);
        assert_eq!(MethodFamily::of("_newThing"), MethodFamily::New);
        assert_eq!(MethodFamily::of("objectAtIndex:"), MethodFamily::None);
    }

    #[test]
    fn retained_families() {
        assert!(Selector::new("alloc").returns_retained());
        assert!(Selector::new("mutableCopy").returns_retained());
        assert!(!Selector::new("init").returns_retained());
        assert!(!Selector::new("array").returns_retained());
    }

    #[test]
    fn symbol_keys_are_scoped() {
        let any = SymbolKey::new(None, "kCFBooleanTrue");
        let cf = SymbolKey::new(Some("CoreFoundation"), "kCFBooleanTrue");
        let other = SymbolKey::new(Some("Foundation"), "kCFBooleanTrue");
        assert_ne!(any, cf);
        assert_ne!(cf, other);
        assert_eq!(cf, SymbolKey::new(Some("CoreFoundation"), "kCFBooleanTrue"));
    }
}
