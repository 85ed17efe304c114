//! The seam between the bridge and the native runtime.
//!
//! The native object model and C ABI are an external contract. The bridge
//! talks to them only through two traits:
//!
//! - [`SymbolSource`]: loads libraries and finds data/function symbols
//! - [`NativeRuntime`]: the object model (classes, selectors, message sends,
//!   retain counts) plus C function calls
//!
//! Two implementations ship with the crate: [`InProcessRuntime`], a
//! complete reference object model living in the current process, and
//! [`DynamicLibraries`], a symbol source over real shared libraries.

mod dylib;
mod heap;
mod in_process;

use std::fmt;
use std::sync::Arc;

pub use dylib::{CFunction, DynamicLibraries};
pub use heap::{HeapObject, ObjectHeap, Payload};
pub use in_process::{InProcessRuntime, RuntimeStats, StatsSnapshot};

use crate::abi::TargetAbi;
use crate::error::{NativeCallError, RuntimeError};
use crate::handle::NativeHandle;
use crate::selector::Selector;
use crate::value::NativeValue;

/// Name of the always-loaded image of the running process.
pub const PROCESS_IMAGE: &str = "<process>";

/// Where a symbol is searched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope<'a> {
    /// One named library, which must already be loaded.
    Library(&'a str),
    /// Every loaded image, in load order, process image first.
    AllLoaded,
    /// Only the process image.
    Process,
}

/// Finds native symbols.
pub trait SymbolSource: Send + Sync {
    /// Load a library so its symbols become visible. Loading an already
    /// loaded library succeeds without effect.
    fn load_library(&self, name: &str) -> Result<(), RuntimeError>;

    /// Address of the symbol `name`, or `None` when absent.
    fn find_symbol(&self, scope: SymbolScope<'_>, name: &str) -> Option<NativeHandle>;

    /// Read the machine word stored at a data symbol.
    ///
    /// # Safety
    ///
    /// `address` must have been returned by [`find_symbol`](Self::find_symbol)
    /// on this source for a data symbol at least one word long.
    unsafe fn read_word(&self, address: NativeHandle) -> Result<NativeHandle, RuntimeError>;
}

/// A resolved method implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodImp {
    /// Entry point of the implementation.
    pub address: NativeHandle,
    /// Class the implementation was found on while walking the superclass
    /// chain.
    pub owner: NativeHandle,
}

/// A method body supplied from Rust, callable from native code.
pub trait NativeMethod: Send + Sync {
    fn invoke(
        &self,
        receiver: NativeHandle,
        selector: &Selector,
        args: &[NativeValue],
    ) -> Result<NativeValue, NativeCallError>;
}

impl<F> NativeMethod for F
where
    F: Fn(NativeHandle, &Selector, &[NativeValue]) -> Result<NativeValue, NativeCallError>
        + Send
        + Sync,
{
    fn invoke(
        &self,
        receiver: NativeHandle,
        selector: &Selector,
        args: &[NativeValue],
    ) -> Result<NativeValue, NativeCallError> {
        self(receiver, selector, args)
    }
}

/// The native object model and C calling convention.
///
/// All methods are synchronous and may be called from any thread.
pub trait NativeRuntime: SymbolSource {
    /// Layout rules of the native side.
    fn abi(&self) -> TargetAbi;

    /// Class object by name.
    fn lookup_class(&self, name: &str) -> Option<NativeHandle>;

    /// Protocol object by name.
    fn lookup_protocol(&self, name: &str) -> Option<NativeHandle>;

    /// Class of an object; the metaclass of a class object.
    fn class_of(&self, object: NativeHandle) -> Option<NativeHandle>;

    fn superclass_of(&self, class: NativeHandle) -> Option<NativeHandle>;

    fn class_name(&self, class: NativeHandle) -> Option<String>;

    /// Whether `class` adopts `protocol`, directly or through a superclass.
    fn conforms_to(&self, class: NativeHandle, protocol: NativeHandle) -> bool;

    /// Find the implementation `class` uses for `selector`, walking the
    /// superclass chain.
    fn resolve_method(&self, class: NativeHandle, selector: &Selector) -> Option<MethodImp>;

    /// Call a resolved method implementation.
    fn call_method(
        &self,
        imp: MethodImp,
        receiver: NativeHandle,
        selector: &Selector,
        args: &[NativeValue],
    ) -> Result<NativeValue, NativeCallError>;

    /// Call the C function at `address`.
    fn call_function(
        &self,
        address: NativeHandle,
        args: &[NativeValue],
    ) -> Result<NativeValue, NativeCallError>;

    /// Increment an object's retain count. Returns the object.
    fn retain(&self, object: NativeHandle) -> NativeHandle;

    /// Decrement an object's retain count, deallocating it at zero.
    fn release(&self, object: NativeHandle);

    /// Schedule a release for when the current autorelease pool drains.
    fn autorelease(&self, object: NativeHandle) -> NativeHandle;

    /// Create and register a new class.
    fn define_class(
        &self,
        name: &str,
        superclass: NativeHandle,
        protocols: &[NativeHandle],
    ) -> Result<NativeHandle, RuntimeError>;

    /// Add a method to a class. `encoding` is the Objective-C method type
    /// encoding of the implementation.
    fn add_method(
        &self,
        class: NativeHandle,
        selector: &Selector,
        encoding: &str,
        imp: Arc<dyn NativeMethod>,
    ) -> Result<(), RuntimeError>;

    /// Dynamic message send: resolve `selector` on the receiver's runtime
    /// class and call it. Sending to the zero handle returns a zero value.
    fn send(
        &self,
        receiver: NativeHandle,
        selector: &Selector,
        args: &[NativeValue],
    ) -> Result<NativeValue, NativeCallError> {
        if receiver.is_null() {
            return Ok(NativeValue::Pointer(NativeHandle::NULL));
        }
        let class = self
            .class_of(receiver)
            .ok_or(NativeCallError::InvalidReceiver(receiver))?;
        match self.resolve_method(class, selector) {
            Some(imp) => self.call_method(imp, receiver, selector, args),
            None => Err(NativeCallError::UnrecognizedSelector {
                class: self.class_name(class).unwrap_or_else(|| class.to_string()),
                selector: selector.name().to_string(),
                receiver,
            }),
        }
    }
}

/// Shared reference to a native runtime.
pub type RuntimeRef = Arc<dyn NativeRuntime>;

impl fmt::Debug for dyn NativeRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeRuntime")
            .field("abi", &self.abi())
            .finish()
    }
}
