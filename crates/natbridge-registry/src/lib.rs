//! natbridge registry
//!
//! Process-wide, resolve-once caches sitting on top of `natbridge-core`:
//!
//! - [`SymbolTable`]: native symbol addresses and lazy library loading
//! - [`GlobalValues`]: values stored at native global symbols, and the
//!   [`GlobalValueEnum`] trait for enumerations backed by them
//! - [`BindingRegistry`]: managed types bound to native classes, protocols
//!   and adapter classes
//!
//! Every cache follows the same rule: the first caller resolves, concurrent
//! callers wait for and observe the same published result, and failures are
//! cached like successes.

pub mod binding;
pub mod global_value;
pub mod symbol_table;

pub use binding::{
    BindingDecl, BindingKind, BindingRegistry, Bound, BoundEntry, ClassBinding, EntryDecl,
    EntryKind, ReturnOwnership, Signature,
};
pub use global_value::{EnumLookup, GlobalValueEnum, GlobalValues};
pub use symbol_table::{Lookup, SymbolTable};

#[doc(hidden)]
pub use natbridge_core as __core;
