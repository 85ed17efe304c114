//! natbridge core
//!
//! Value-level building blocks of the bridge between managed Rust code and
//! a native object runtime with a C ABI.
//!
//! ## Modules
//!
//! - [`abi`]: Target layout rules, native types and type encodings
//! - [`error`]: Error types shared by every natbridge crate
//! - [`flags`]: Marshaling flags (ownership of handles in flight)
//! - [`global`]: Declarations of native global values
//! - [`handle`]: Opaque native addresses
//! - [`layout`]: Struct descriptors and typed struct memory
//! - [`marshal`]: Managed/native value conversion
//! - [`object`]: Reference-counted wrappers for native objects
//! - [`ptr`]: Typed pointer slots for out-parameters
//! - [`runtime`]: The native runtime seam and its implementations
//! - [`selector`]: Selectors, method families and symbol keys
//! - [`value`]: Marshaled call values

pub mod abi;
pub mod error;
pub mod flags;
pub mod global;
pub mod handle;
pub mod layout;
pub mod marshal;
pub mod object;
pub mod ptr;
pub mod runtime;
pub mod selector;
pub mod value;

pub use abi::{NativeType, TargetAbi, TypeEncoding, method_encoding, parse_method_encoding};
pub use error::{
    BridgeError, BridgeResult, LayoutError, MarshalError, NativeCallError, NoSuchConstant,
    RuntimeError,
};
pub use flags::MarshalFlags;
pub use global::{GlobalResolver, GlobalSymbol, NoGlobals};
pub use handle::NativeHandle;
pub use layout::{StructDescriptor, StructField, StructMemory, StructType};
pub use marshal::{
    FromNative, MarshalContext, NativeArg, NativeArgs, NativeTyped, PointerMarshaler, ToNative,
};
pub use object::{NativeObject, ObjectType, Ownership};
pub use ptr::{Ptr, PtrSlot};
pub use runtime::{
    DynamicLibraries, InProcessRuntime, MethodImp, NativeMethod, NativeRuntime, RuntimeRef,
    SymbolScope, SymbolSource,
};
pub use selector::{MethodFamily, Selector, SymbolKey};
pub use value::{MachineFloat, NativeValue};
