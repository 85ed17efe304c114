//! Error types for the bridge.
//!
//! Errors are layered the same way at every seam:
//!
//! - [`MarshalError`]: a value could not be converted in either direction
//! - [`NativeCallError`]: the native side rejected or failed a call
//! - [`RuntimeError`]: the native runtime could not perform a structural
//!   operation (loading a library, defining a class)
//! - [`LayoutError`]: a struct descriptor or struct member access is invalid
//! - [`NoSuchConstant`]: a closed enumeration lookup found no match
//!
//! All of them roll up into [`BridgeError`], which additionally carries the
//! binding-level failures (`SymbolNotFound`, `ClassBindingFailure`,
//! `NotImplemented`). Every error is `Clone` so resolution caches can hand the
//! same failure to every caller.

use thiserror::Error;

use crate::handle::NativeHandle;

/// Result alias used throughout the bridge.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Top-level bridge error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    /// A required global symbol is absent from the loaded native images.
    #[error("symbol not found: {symbol}{}", library_suffix(.library))]
    SymbolNotFound {
        symbol: String,
        library: Option<String>,
    },

    /// The native class or protocol backing a managed type could not be
    /// located when the type was bound.
    #[error("cannot bind `{managed_type}` to native {kind} `{native_name}`: {reason}")]
    ClassBindingFailure {
        managed_type: String,
        kind: &'static str,
        native_name: String,
        reason: String,
    },

    /// A method declared by an adapter type but deliberately left
    /// unimplemented was invoked.
    #[error("`{managed_type}::{entry}` is declared but not implemented")]
    NotImplemented { managed_type: String, entry: String },

    /// A closed enumeration lookup found no match.
    #[error(transparent)]
    NoSuchConstant(#[from] NoSuchConstant),

    /// A value could not be marshaled.
    #[error("marshaling failed: {0}")]
    Marshaling(#[from] MarshalError),

    /// The native call itself failed.
    #[error("native call failed: {0}")]
    NativeCall(#[from] NativeCallError),

    /// The native runtime could not perform a structural operation.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// A struct layout is invalid or a member access does not match it.
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// The managed type declares no entry point with this name.
    #[error("`{managed_type}` declares no entry point `{entry}`")]
    UnknownEntryPoint { managed_type: String, entry: String },

    /// The call does not match the declared signature of the entry point.
    #[error("`{managed_type}::{entry}`: {detail}")]
    SignatureMismatch {
        managed_type: String,
        entry: String,
        detail: String,
    },

    /// The process-wide bridge was used before being installed, or
    /// installed twice.
    #[error("bridge not initialized: {0}")]
    NotInitialized(&'static str),
}

fn library_suffix(library: &Option<String>) -> String {
    match library {
        Some(lib) => format!(" (in library `{}`)", lib),
        None => String::new(),
    }
}

impl BridgeError {
    /// Create a `SymbolNotFound` error.
    pub fn symbol_not_found(symbol: impl Into<String>, library: Option<&str>) -> Self {
        BridgeError::SymbolNotFound {
            symbol: symbol.into(),
            library: library.map(str::to_owned),
        }
    }

    /// Create a `NotImplemented` error.
    pub fn not_implemented(managed_type: impl Into<String>, entry: impl Into<String>) -> Self {
        BridgeError::NotImplemented {
            managed_type: managed_type.into(),
            entry: entry.into(),
        }
    }

    /// Create a `SignatureMismatch` error.
    pub fn signature_mismatch(
        managed_type: impl Into<String>,
        entry: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        BridgeError::SignatureMismatch {
            managed_type: managed_type.into(),
            entry: entry.into(),
            detail: detail.into(),
        }
    }

    /// Whether this error aborts the binding of the affected type.
    ///
    /// Fatal errors indicate a version or ABI mismatch between the managed
    /// declarations and the loaded native images. They are cached and
    /// reported identically to every later user of the type, but they never
    /// take the process down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::SymbolNotFound { .. } | BridgeError::ClassBindingFailure { .. }
        )
    }
}

/// A closed enumeration lookup found no variant with the given backing value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no constant in `{enum_name}` has value {value}")]
pub struct NoSuchConstant {
    pub enum_name: &'static str,
    pub value: NativeHandle,
}

/// Marshaling failure, in either direction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarshalError {
    /// The native value has the wrong shape for the requested type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// Integer value out of range for the target type.
    #[error("integer overflow: {value} does not fit in {target_type}")]
    IntegerOverflow {
        value: i128,
        target_type: &'static str,
    },

    /// A non-optional type received the zero handle.
    #[error("unexpected null handle for non-optional `{type_name}`")]
    UnexpectedNull { type_name: &'static str },

    /// The native object is not an instance of the expected class.
    #[error("expected an instance of `{expected}`, got `{actual}`")]
    WrongClass { expected: String, actual: String },

    /// A list element failed to convert; the whole list is rejected.
    #[error("element {index}: {source}")]
    Element {
        index: usize,
        source: Box<MarshalError>,
    },

    /// An argument failed to convert; the call is not made.
    #[error("argument {index}: {source}")]
    Argument {
        index: usize,
        source: Box<MarshalError>,
    },

    /// A string could not cross the boundary.
    #[error("invalid string: {0}")]
    InvalidString(String),

    /// A global symbol a value depends on could not be resolved.
    #[error("global `{symbol}` is unavailable")]
    Unresolved { symbol: String },

    /// A value was not found in a closed enumeration.
    #[error(transparent)]
    NoSuchConstant(#[from] NoSuchConstant),

    /// A native call made during conversion failed.
    #[error(transparent)]
    Call(#[from] NativeCallError),

    /// A native class the conversion depends on is not available.
    #[error("native class `{0}` is unavailable")]
    MissingClass(&'static str),
}

impl MarshalError {
    /// Wrap an element failure with its position in a list.
    pub fn at_index(self, index: usize) -> Self {
        MarshalError::Element {
            index,
            source: Box::new(self),
        }
    }

    /// Wrap an argument failure with its position in the argument list.
    pub fn at_argument(self, index: usize) -> Self {
        MarshalError::Argument {
            index,
            source: Box::new(self),
        }
    }
}

/// Failure reported by the native side of a call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NativeCallError {
    /// The receiver's class does not respond to the selector.
    #[error("-[{class} {selector}]: unrecognized selector sent to instance {receiver}")]
    UnrecognizedSelector {
        class: String,
        selector: String,
        receiver: NativeHandle,
    },

    /// The receiver is not a live native object or class.
    #[error("invalid receiver {0}")]
    InvalidReceiver(NativeHandle),

    /// The address does not refer to a callable function.
    #[error("{0} is not a callable function")]
    NotCallable(NativeHandle),

    /// Wrong number of arguments.
    #[error("expected {expected} arguments, got {actual}")]
    ArgumentCount { expected: usize, actual: usize },

    /// Argument of the wrong type.
    #[error("argument {index}: expected {expected}, got {actual}")]
    ArgumentType {
        index: usize,
        expected: &'static str,
        actual: &'static str,
    },

    /// An initializer returned nil.
    #[error("-[{class} {selector}] returned nil")]
    InitFailed { class: String, selector: String },

    /// Raised by the native callee.
    #[error("{0}")]
    Raised(String),
}

impl NativeCallError {
    /// Create a `Raised` error.
    pub fn raised(msg: impl Into<String>) -> Self {
        NativeCallError::Raised(msg.into())
    }
}

/// Structural failure of the native runtime.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    /// A native library could not be loaded.
    #[error("cannot load library `{name}`: {reason}")]
    LibraryLoad { name: String, reason: String },

    /// A class with this name already exists.
    #[error("class `{0}` is already defined")]
    ClassExists(String),

    /// No class with this name is registered.
    #[error("no class named `{0}`")]
    UnknownClass(String),

    /// A constant could not be created.
    #[error("invalid constant `{name}`: {reason}")]
    InvalidConstant { name: String, reason: String },

    /// The handle is not a class.
    #[error("{0} is not a class")]
    NotAClass(NativeHandle),

    /// The address is not a readable data symbol.
    #[error("{0} is not a readable data symbol")]
    NotData(NativeHandle),

    /// A method type encoding could not be parsed.
    #[error("invalid type encoding `{encoding}`: {reason}")]
    InvalidEncoding { encoding: String, reason: String },
}

/// Invalid struct descriptor or struct member access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// Declared members overlap or go backwards.
    #[error("`{strukt}`: member `{member}` at offset {offset} overlaps the previous member ending at {previous_end}")]
    Overlap {
        strukt: String,
        member: String,
        offset: usize,
        previous_end: usize,
    },

    /// Declared offset violates the member's alignment.
    #[error("`{strukt}`: member `{member}` at offset {offset} is not aligned to {align}")]
    Misaligned {
        strukt: String,
        member: String,
        offset: usize,
        align: usize,
    },

    /// Two members with the same ordinal have different explicit offsets.
    #[error("`{strukt}`: union members at ordinal {ordinal} disagree on their offset")]
    UnionOffset { strukt: String, ordinal: u32 },

    /// An unbounded trailing array is not the last member.
    #[error("`{strukt}`: unbounded array `{member}` must be the last member")]
    UnboundedNotLast { strukt: String, member: String },

    /// A member has a type that cannot live in a struct.
    #[error("`{strukt}`: member `{member}` has unsupported type {ty}")]
    UnsupportedType {
        strukt: String,
        member: String,
        ty: String,
    },

    /// A nested struct was laid out for a different ABI.
    #[error("`{strukt}`: nested struct `{nested}` was laid out for a different ABI")]
    AbiMismatch { strukt: String, nested: String },

    /// The computed struct size is inconsistent with its alignment.
    #[error("`{strukt}`: size {size} is not a multiple of alignment {align}")]
    BadSize {
        strukt: String,
        size: usize,
        align: usize,
    },

    /// No member with this ordinal.
    #[error("`{strukt}` has no member at ordinal {ordinal}")]
    NoSuchMember { strukt: String, ordinal: u32 },

    /// The member exists but has a different type.
    #[error("`{strukt}`: member {ordinal} is not of type {requested}")]
    MemberType {
        strukt: String,
        ordinal: u32,
        requested: String,
    },

    /// Element index beyond a fixed-size array member, or past the end of
    /// the backing memory.
    #[error("`{strukt}`: index {index} out of bounds for member {ordinal} of length {len}")]
    IndexOutOfBounds {
        strukt: String,
        ordinal: u32,
        index: usize,
        len: usize,
    },

    /// A value does not fit the member's width on the struct's ABI.
    #[error("`{strukt}`: value {value} does not fit member {ordinal} of type {ty}")]
    ValueOutOfRange {
        strukt: String,
        ordinal: u32,
        value: String,
        ty: &'static str,
    },

    /// A nested struct value has the wrong descriptor.
    #[error("`{strukt}`: expected a `{expected}` value, got `{actual}`")]
    StructMismatch {
        strukt: String,
        expected: String,
        actual: String,
    },
}
