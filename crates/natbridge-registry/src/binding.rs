//! ClassBinding: declarations of managed types bound to native classes.
//!
//! A managed type implements [`Bound`] to describe, once, which native class
//! or protocol it stands for and which native entry points it exposes:
//!
//! ```ignore
//! impl Bound for NSMutableArray {
//!     fn declare() -> BindingDecl {
//!         BindingDecl::class("NSMutableArray")
//!             .in_library("Foundation")
//!             .class_method::<(), NSMutableArray>("array", "array")
//!             .method::<(&NSObject,), ()>("add_object", "addObject:")
//!             .getter::<usize>("count", "count")
//!     }
//! }
//! ```
//!
//! The [`BindingRegistry`] turns a declaration into a resolved
//! [`ClassBinding`] the first time the type is used and hands the same
//! binding (or the same failure) to every later caller.
//!
//! Adapter declarations go one step further: they define a new native class
//! whose methods are Rust closures, so native code can call back into
//! managed code. Methods an adapter declares with
//! [`not_implemented`](BindingDecl::not_implemented) are never registered
//! natively.

use std::any::TypeId;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use rustc_hash::FxHashMap;

use natbridge_core::marshal::{NativeArgs, NativeTyped};
use natbridge_core::runtime::{NativeMethod, NativeRuntime};
use natbridge_core::{
    BridgeError, BridgeResult, GlobalSymbol, NativeCallError, NativeHandle, NativeType, NativeValue,
    RuntimeError, RuntimeRef, Selector, TargetAbi, method_encoding,
};

use crate::symbol_table::{SymbolTable, cell_for};

/// What a binding stands for on the native side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingKind {
    /// An existing native class.
    Class { name: &'static str },
    /// An existing native protocol.
    Protocol { name: &'static str },
    /// A native class defined by the binding, implemented in Rust.
    Adapter {
        name: &'static str,
        superclass: &'static str,
        protocols: Vec<&'static str>,
    },
}

impl BindingKind {
    /// The native class or protocol name.
    pub fn native_name(&self) -> &'static str {
        match self {
            BindingKind::Class { name }
            | BindingKind::Protocol { name }
            | BindingKind::Adapter { name, .. } => name,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            BindingKind::Class { .. } => "class",
            BindingKind::Protocol { .. } => "protocol",
            BindingKind::Adapter { .. } => "adapter class",
        }
    }
}

/// Ownership of a returned object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnOwnership {
    /// Decided by the selector's method family.
    #[default]
    Inferred,
    /// The callee hands back a +1.
    Retained,
    /// The callee hands back a +0.
    Borrowed,
}

/// Argument and return types of an entry point, excluding the receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub args: Vec<NativeType>,
    pub ret: NativeType,
}

impl Signature {
    pub fn new(args: Vec<NativeType>, ret: NativeType) -> Self {
        Signature { args, ret }
    }

    /// Signature of a call taking `A` and returning `R`.
    pub fn of<A: NativeArgs, R: NativeTyped>() -> Self {
        Signature {
            args: A::arg_types(),
            ret: R::native_type(),
        }
    }

    /// Objective-C type encoding for a method with this signature.
    pub fn method_encoding(&self, abi: &TargetAbi) -> String {
        method_encoding(abi, &self.ret, &self.args)
    }

    fn structs(&self) -> impl Iterator<Item = &NativeType> {
        self.args
            .iter()
            .chain(std::iter::once(&self.ret))
            .filter(|t| matches!(t, NativeType::Struct(_)))
    }
}

/// How an entry point is reached.
#[derive(Clone)]
pub enum EntryKind {
    /// Message send to an instance.
    Method { selector: Selector },
    /// Message send to the class object.
    ClassMethod { selector: Selector },
    /// Property read, dispatched like a method.
    Getter { selector: Selector },
    /// Property write, dispatched like a method.
    Setter { selector: Selector },
    /// C function. Instance functions take the receiver as first argument.
    Function {
        symbol: &'static str,
        instance: bool,
        optional: bool,
    },
    /// Native global value.
    Global { symbol: GlobalSymbol },
    /// Adapter method implemented by a Rust closure.
    Implemented {
        selector: Selector,
        method: Arc<dyn NativeMethod>,
    },
    /// Declared but deliberately not implemented.
    NotImplemented { selector: Selector },
}

impl EntryKind {
    /// Selector for message-send entries.
    pub fn selector(&self) -> Option<&Selector> {
        match self {
            EntryKind::Method { selector }
            | EntryKind::ClassMethod { selector }
            | EntryKind::Getter { selector }
            | EntryKind::Setter { selector }
            | EntryKind::Implemented { selector, .. }
            | EntryKind::NotImplemented { selector } => Some(selector),
            EntryKind::Function { .. } | EntryKind::Global { .. } => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            EntryKind::Method { .. } => "method",
            EntryKind::ClassMethod { .. } => "class method",
            EntryKind::Getter { .. } => "getter",
            EntryKind::Setter { .. } => "setter",
            EntryKind::Function { .. } => "function",
            EntryKind::Global { .. } => "global",
            EntryKind::Implemented { .. } => "adapter method",
            EntryKind::NotImplemented { .. } => "unimplemented method",
        }
    }
}

impl fmt::Debug for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Function {
                symbol,
                instance,
                optional,
            } => f
                .debug_struct("Function")
                .field("symbol", symbol)
                .field("instance", instance)
                .field("optional", optional)
                .finish(),
            EntryKind::Global { symbol } => {
                f.debug_struct("Global").field("symbol", symbol).finish()
            }
            other => write!(f, "{} {:?}", other.label(), other.selector()),
        }
    }
}

/// One declared entry point.
#[derive(Debug, Clone)]
pub struct EntryDecl {
    pub name: &'static str,
    pub kind: EntryKind,
    pub signature: Signature,
    pub returns: ReturnOwnership,
}

/// Declaration of a managed type's native binding, built fluently.
#[derive(Debug, Clone)]
pub struct BindingDecl {
    kind: BindingKind,
    library: Option<&'static str>,
    entries: Vec<EntryDecl>,
}

impl BindingDecl {
    /// Bind to an existing native class.
    pub fn class(name: &'static str) -> Self {
        Self::with_kind(BindingKind::Class { name })
    }

    /// Bind to an existing native protocol.
    pub fn protocol(name: &'static str) -> Self {
        Self::with_kind(BindingKind::Protocol { name })
    }

    /// Define a new native class `name` inheriting from `superclass`.
    pub fn adapter(name: &'static str, superclass: &'static str) -> Self {
        Self::with_kind(BindingKind::Adapter {
            name,
            superclass,
            protocols: Vec::new(),
        })
    }

    fn with_kind(kind: BindingKind) -> Self {
        BindingDecl {
            kind,
            library: None,
            entries: Vec::new(),
        }
    }

    /// Native library the class and its functions live in. Loaded when the
    /// type is bound.
    pub fn in_library(mut self, library: &'static str) -> Self {
        self.library = Some(library);
        self
    }

    /// Adopt a protocol. Only meaningful for adapters.
    pub fn conforms_to(mut self, protocol: &'static str) -> Self {
        if let BindingKind::Adapter { protocols, .. } = &mut self.kind {
            protocols.push(protocol);
        }
        self
    }

    /// Add an entry with an explicit signature.
    pub fn entry(mut self, name: &'static str, kind: EntryKind, signature: Signature) -> Self {
        self.entries.push(EntryDecl {
            name,
            kind,
            signature,
            returns: ReturnOwnership::Inferred,
        });
        self
    }

    pub fn method<A: NativeArgs, R: NativeTyped>(self, name: &'static str, selector: &str) -> Self {
        let kind = EntryKind::Method {
            selector: Selector::new(selector),
        };
        self.entry(name, kind, Signature::of::<A, R>())
    }

    pub fn class_method<A: NativeArgs, R: NativeTyped>(
        self,
        name: &'static str,
        selector: &str,
    ) -> Self {
        let kind = EntryKind::ClassMethod {
            selector: Selector::new(selector),
        };
        self.entry(name, kind, Signature::of::<A, R>())
    }

    pub fn getter<T: NativeTyped>(self, name: &'static str, selector: &str) -> Self {
        let kind = EntryKind::Getter {
            selector: Selector::new(selector),
        };
        self.entry(name, kind, Signature::of::<(), T>())
    }

    pub fn setter<T: NativeTyped>(self, name: &'static str, selector: &str) -> Self {
        let selector = Selector::new(selector);
        let signature = Signature::new(vec![T::native_type()], NativeType::Void);
        self.entry(name, EntryKind::Setter { selector }, signature)
    }

    /// A read-write property: a getter entry named after `getter` and a
    /// setter entry named after `setter`.
    pub fn property<T: NativeTyped>(self, getter: &'static str, setter: &'static str) -> Self {
        self.getter::<T>(getter, getter).setter::<T>(setter, setter)
    }

    /// A C function. Required functions are resolved when the type is bound.
    pub fn function<A: NativeArgs, R: NativeTyped>(
        self,
        name: &'static str,
        symbol: &'static str,
    ) -> Self {
        let kind = EntryKind::Function {
            symbol,
            instance: false,
            optional: false,
        };
        self.entry(name, kind, Signature::of::<A, R>())
    }

    /// A C function taking the receiver as its first argument.
    pub fn instance_function<A: NativeArgs, R: NativeTyped>(
        self,
        name: &'static str,
        symbol: &'static str,
    ) -> Self {
        let kind = EntryKind::Function {
            symbol,
            instance: true,
            optional: false,
        };
        self.entry(name, kind, Signature::of::<A, R>())
    }

    /// A native global value. An optional global must be pointer-typed so
    /// that its absence reads as null; binding fails otherwise.
    pub fn global<T: NativeTyped>(self, name: &'static str, symbol: GlobalSymbol) -> Self {
        self.entry(name, EntryKind::Global { symbol }, Signature::of::<(), T>())
    }

    /// An adapter method backed by `method`.
    pub fn implement<A, R, F>(self, name: &'static str, selector: &str, method: F) -> Self
    where
        A: NativeArgs,
        R: NativeTyped,
        F: Fn(NativeHandle, &Selector, &[NativeValue]) -> Result<NativeValue, NativeCallError>
            + Send
            + Sync
            + 'static,
    {
        let kind = EntryKind::Implemented {
            selector: Selector::new(selector),
            method: Arc::new(method),
        };
        self.entry(name, kind, Signature::of::<A, R>())
    }

    /// A method that is declared but deliberately not implemented. Invoking
    /// it fails with [`BridgeError::NotImplemented`] without a native call.
    pub fn not_implemented<A: NativeArgs, R: NativeTyped>(
        self,
        name: &'static str,
        selector: &str,
    ) -> Self {
        let kind = EntryKind::NotImplemented {
            selector: Selector::new(selector),
        };
        self.entry(name, kind, Signature::of::<A, R>())
    }

    /// Make the last function entry optional: it is resolved on first call
    /// instead of at bind time, and its absence only fails that call.
    pub fn optional(mut self) -> Self {
        if let Some(EntryDecl {
            kind: EntryKind::Function { optional, .. },
            ..
        }) = self.entries.last_mut()
        {
            *optional = true;
        }
        self
    }

    /// The last entry returns a +1 regardless of its selector's family.
    pub fn returns_retained(self) -> Self {
        self.with_returns(ReturnOwnership::Retained)
    }

    /// The last entry returns a +0 regardless of its selector's family.
    pub fn returns_borrowed(self) -> Self {
        self.with_returns(ReturnOwnership::Borrowed)
    }

    fn with_returns(mut self, returns: ReturnOwnership) -> Self {
        if let Some(entry) = self.entries.last_mut() {
            entry.returns = returns;
        }
        self
    }

    pub fn kind(&self) -> &BindingKind {
        &self.kind
    }

    pub fn library(&self) -> Option<&'static str> {
        self.library
    }

    pub fn entries(&self) -> &[EntryDecl] {
        &self.entries
    }
}

/// A managed type bound to a native class or protocol.
pub trait Bound: 'static {
    fn declare() -> BindingDecl;
}

/// A resolved entry point.
#[derive(Debug, Clone)]
pub struct BoundEntry {
    decl: EntryDecl,
    address: Option<NativeHandle>,
}

impl BoundEntry {
    pub fn name(&self) -> &'static str {
        self.decl.name
    }

    pub fn kind(&self) -> &EntryKind {
        &self.decl.kind
    }

    pub fn signature(&self) -> &Signature {
        &self.decl.signature
    }

    /// Whether the returned object carries a +1 the caller must balance.
    ///
    /// Selectors in the `alloc`, `new`, `copy` and `mutableCopy` families
    /// return retained objects unless the declaration says otherwise.
    pub fn returns_retained(&self) -> bool {
        match self.decl.returns {
            ReturnOwnership::Retained => true,
            ReturnOwnership::Borrowed => false,
            ReturnOwnership::Inferred => {
                let selector = self.decl.kind.selector();
                selector.is_some_and(Selector::returns_retained)
            }
        }
    }

    /// Function address resolved at bind time. `None` for optional
    /// functions and for entries that are not functions.
    pub fn address(&self) -> Option<NativeHandle> {
        self.address
    }
}

/// The immutable, resolved binding of one managed type.
#[derive(Debug)]
pub struct ClassBinding {
    managed_type: &'static str,
    kind: BindingKind,
    library: Option<&'static str>,
    native: NativeHandle,
    entries: FxHashMap<&'static str, BoundEntry>,
}

impl ClassBinding {
    pub fn managed_type(&self) -> &'static str {
        self.managed_type
    }

    pub fn kind(&self) -> &BindingKind {
        &self.kind
    }

    pub fn library(&self) -> Option<&'static str> {
        self.library
    }

    /// The native class (or protocol) object.
    pub fn native(&self) -> NativeHandle {
        self.native
    }

    pub fn entry(&self, name: &str) -> Option<&BoundEntry> {
        self.entries.get(name)
    }

    /// Look up an entry, failing with [`BridgeError::UnknownEntryPoint`].
    pub fn require(&self, name: &str) -> BridgeResult<&BoundEntry> {
        self.entry(name)
            .ok_or_else(|| BridgeError::UnknownEntryPoint {
                managed_type: self.managed_type.to_string(),
                entry: name.to_string(),
            })
    }

    pub fn entries(&self) -> impl Iterator<Item = &BoundEntry> {
        self.entries.values()
    }
}

type BindingCell = Arc<OnceLock<BridgeResult<Arc<ClassBinding>>>>;

/// Memoized bindings, one per managed type.
pub struct BindingRegistry {
    runtime: RuntimeRef,
    symbols: Arc<SymbolTable>,
    validate_layouts: bool,
    bindings: RwLock<FxHashMap<TypeId, BindingCell>>,
}

impl BindingRegistry {
    pub fn new(runtime: RuntimeRef, symbols: Arc<SymbolTable>) -> Self {
        BindingRegistry {
            runtime,
            symbols,
            validate_layouts: cfg!(debug_assertions),
            bindings: RwLock::new(FxHashMap::default()),
        }
    }

    /// Validate the layout of every struct type in bound signatures.
    pub fn with_layout_validation(mut self, validate: bool) -> Self {
        self.validate_layouts = validate;
        self
    }

    /// The binding of `T`, resolved on first use.
    ///
    /// Concurrent first calls resolve once; every caller observes the same
    /// binding or the same error.
    pub fn bind<T: Bound>(&self) -> BridgeResult<Arc<ClassBinding>> {
        let cell = cell_for(&self.bindings, TypeId::of::<T>());
        cell.get_or_init(|| {
            let managed_type = std::any::type_name::<T>();
            let result = self.resolve(managed_type, T::declare());
            match &result {
                Ok(binding) => {
                    log::debug!("bound {} to {}", managed_type, binding.kind.native_name())
                }
                Err(err) => log::error!("binding {} failed: {}", managed_type, err),
            }
            result.map(Arc::new)
        })
        .clone()
    }

    /// Whether `T` has been bound (successfully or not).
    pub fn is_bound<T: Bound>(&self) -> bool {
        self.bindings
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&TypeId::of::<T>())
            .is_some_and(|cell| cell.get().is_some())
    }

    pub fn len(&self) -> usize {
        self.bindings
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every binding. Adapter classes stay defined natively and are
    /// reused by the next bind.
    pub fn reset(&self) {
        self.bindings
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    fn resolve(&self, managed_type: &'static str, decl: BindingDecl) -> BridgeResult<ClassBinding> {
        let failure = |reason: String| BridgeError::ClassBindingFailure {
            managed_type: managed_type.to_string(),
            kind: decl.kind.label(),
            native_name: decl.kind.native_name().to_string(),
            reason,
        };

        if let Some(library) = decl.library {
            self.symbols
                .ensure_library(library)
                .map_err(|err| failure(err.to_string()))?;
        }

        let native = match &decl.kind {
            BindingKind::Class { name } => self
                .runtime
                .lookup_class(name)
                .ok_or_else(|| failure("class not found".to_string()))?,
            BindingKind::Protocol { name } => self
                .runtime
                .lookup_protocol(name)
                .ok_or_else(|| failure("protocol not found".to_string()))?,
            BindingKind::Adapter {
                name,
                superclass,
                protocols,
            } => self
                .define_adapter(name, superclass, protocols, &decl.entries)
                .map_err(failure)?,
        };

        let mut entries = FxHashMap::default();
        for decl_entry in &decl.entries {
            self.check_entry(managed_type, decl_entry, &failure)?;
            let address = match &decl_entry.kind {
                EntryKind::Function {
                    symbol,
                    optional: false,
                    ..
                } => self.symbols.resolve_in(decl.library, symbol, false)?,
                _ => None,
            };
            let bound = BoundEntry {
                decl: decl_entry.clone(),
                address,
            };
            if entries.insert(decl_entry.name, bound).is_some() {
                return Err(BridgeError::signature_mismatch(
                    managed_type,
                    decl_entry.name,
                    "entry point declared twice",
                ));
            }
        }

        Ok(ClassBinding {
            managed_type,
            kind: decl.kind,
            library: decl.library,
            native,
            entries,
        })
    }

    fn check_entry(
        &self,
        managed_type: &'static str,
        entry: &EntryDecl,
        failure: &dyn Fn(String) -> BridgeError,
    ) -> BridgeResult<()> {
        if let Some(selector) = entry.kind.selector()
            && selector.arg_count() != entry.signature.args.len()
        {
            return Err(BridgeError::signature_mismatch(
                managed_type,
                entry.name,
                format!(
                    "{} `{}` takes {} arguments, declared with {}",
                    entry.kind.label(),
                    selector,
                    selector.arg_count(),
                    entry.signature.args.len()
                ),
            ));
        }
        // An absent optional global reads as null, which only a pointer can
        // tell apart from a real value
        if let EntryKind::Global { symbol } = &entry.kind
            && symbol.optional
            && !entry.signature.ret.is_pointer_like()
        {
            return Err(BridgeError::signature_mismatch(
                managed_type,
                entry.name,
                format!(
                    "optional global `{}` must be read as a pointer, not {}",
                    symbol.name, entry.signature.ret
                ),
            ));
        }
        if self.validate_layouts {
            for ty in entry.signature.structs() {
                if let NativeType::Struct(descriptor) = ty {
                    descriptor
                        .validate()
                        .map_err(|err| failure(err.to_string()))?;
                    if descriptor.abi() != self.runtime.abi() {
                        return Err(failure(format!(
                            "struct `{}` is laid out for a different ABI",
                            descriptor.name()
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn define_adapter(
        &self,
        name: &str,
        superclass: &str,
        protocols: &[&'static str],
        entries: &[EntryDecl],
    ) -> Result<NativeHandle, String> {
        let superclass = self
            .runtime
            .lookup_class(superclass)
            .ok_or_else(|| format!("superclass `{}` not found", superclass))?;
        let protocols = protocols
            .iter()
            .map(|p| {
                self.runtime
                    .lookup_protocol(p)
                    .ok_or_else(|| format!("protocol `{}` not found", p))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let class = match self.runtime.define_class(name, superclass, &protocols) {
            Ok(class) => class,
            Err(RuntimeError::ClassExists(_)) => self
                .runtime
                .lookup_class(name)
                .ok_or_else(|| format!("class `{}` vanished", name))?,
            Err(err) => return Err(err.to_string()),
        };

        let abi = self.runtime.abi();
        for entry in entries {
            if let EntryKind::Implemented { selector, method } = &entry.kind {
                let encoding = entry.signature.method_encoding(&abi);
                self.runtime
                    .add_method(class, selector, &encoding, Arc::clone(method))
                    .map_err(|err| err.to_string())?;
                log::trace!("adapter {} implements {} as {}", name, selector, encoding);
            }
        }
        log::debug!("defined adapter class {}", name);
        Ok(class)
    }
}

impl fmt::Debug for BindingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingRegistry")
            .field("validate_layouts", &self.validate_layouts)
            .field("bindings", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use natbridge_core::layout::StructDescriptor;
    use natbridge_core::{InProcessRuntime, NativeHandle};

    struct Array;
    impl Bound for Array {
        fn declare() -> BindingDecl {
            BindingDecl::class("NSMutableArray")
                .class_method::<(), NativeHandle>("array", "array")
                .getter::<usize>("count", "count")
                .method::<(NativeHandle,), ()>("add", "addObject:")
        }
    }

    struct Missing;
    impl Bound for Missing {
        fn declare() -> BindingDecl {
            BindingDecl::class("UIMissingView")
        }
    }

    struct BadArity;
    impl Bound for BadArity {
        fn declare() -> BindingDecl {
            BindingDecl::class("NSObject").method::<(), bool>("is_equal", "isEqual:")
        }
    }

    struct Source;
    impl Bound for Source {
        fn declare() -> BindingDecl {
            BindingDecl::adapter("TestDataSource", "NSObject")
                .conforms_to("NSObject")
                .implement::<(), isize, _>(
                    "sections",
                    "numberOfSections",
                    |_, _, _| Ok(NativeValue::ISize(2)),
                )
                .not_implemented::<(isize,), NativeHandle>("header", "titleForHeaderInSection:")
        }
    }

    struct NeedsFunction;
    impl Bound for NeedsFunction {
        fn declare() -> BindingDecl {
            BindingDecl::class("NSObject")
                .function::<(), ()>("required", "NBRequired")
                .function::<(), ()>("maybe", "NBMaybe")
                .optional()
        }
    }

    fn registry() -> (Arc<InProcessRuntime>, BindingRegistry) {
        let _ = env_logger::builder().is_test(true).try_init();
        let rt = Arc::new(InProcessRuntime::new());
        let symbols = Arc::new(SymbolTable::new(rt.clone()));
        let registry = BindingRegistry::new(rt.clone(), symbols).with_layout_validation(true);
        (rt, registry)
    }

    #[test]
    fn bind_is_memoized() {
        let (rt, registry) = registry();
        let first = registry.bind::<Array>().unwrap();
        let second = registry.bind::<Array>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.native(), rt.lookup_class("NSMutableArray").unwrap());
        assert!(first.require("count").is_ok());
        assert!(matches!(
            first.require("nope"),
            Err(BridgeError::UnknownEntryPoint { .. })
        ));
        assert!(registry.is_bound::<Array>());
    }

    #[test]
    fn missing_class_is_fatal_and_cached() {
        let (_, registry) = registry();
        let err = registry.bind::<Missing>().unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, BridgeError::ClassBindingFailure { kind: "class", .. }));
        assert_eq!(registry.bind::<Missing>().unwrap_err(), err);
    }

    #[test]
    fn selector_arity_is_checked() {
        let (_, registry) = registry();
        let err = registry.bind::<BadArity>().unwrap_err();
        assert!(matches!(err, BridgeError::SignatureMismatch { .. }));
    }

    #[test]
    fn adapter_defines_only_implemented_methods() {
        let (rt, registry) = registry();
        let binding = registry.bind::<Source>().unwrap();
        let class = binding.native();
        assert_eq!(rt.lookup_class("TestDataSource"), Some(class));
        let sections = rt.method_encoding(class, &Selector::new("numberOfSections"));
        let expected = if cfg!(target_pointer_width = "64") {
            "q@:"
        } else {
            "i@:"
        };
        assert_eq!(sections.as_deref(), Some(expected));
        let header = Selector::new("titleForHeaderInSection:");
        assert!(rt.resolve_method(class, &header).is_none());

        // Rebinding after a reset reuses the defined class
        registry.reset();
        assert_eq!(registry.bind::<Source>().unwrap().native(), class);
    }

    #[test]
    fn required_functions_resolve_at_bind() {
        let (rt, registry) = registry();
        let err = registry.bind::<NeedsFunction>().unwrap_err();
        assert!(matches!(err, BridgeError::SymbolNotFound { .. }));

        // Absence stays cached in the symbol table, so start over
        let f = rt.define_function(None, "NBRequired", |_| Ok(NativeValue::Void));
        let registry = BindingRegistry::new(rt.clone(), Arc::new(SymbolTable::new(rt.clone())));
        let binding = registry.bind::<NeedsFunction>().unwrap();
        assert_eq!(binding.require("required").unwrap().address(), Some(f));
        assert_eq!(binding.require("maybe").unwrap().address(), None);
    }

    #[test]
    fn optional_globals_must_be_pointers() {
        struct OptionalFlag;
        impl Bound for OptionalFlag {
            fn declare() -> BindingDecl {
                BindingDecl::class("NSObject")
                    .global::<bool>("flag", GlobalSymbol::new("kNBFlag").optional())
            }
        }
        struct OptionalObject;
        impl Bound for OptionalObject {
            fn declare() -> BindingDecl {
                BindingDecl::class("NSObject")
                    .global::<NativeHandle>("object", GlobalSymbol::new("kNBObject").optional())
                    .global::<bool>("flag", GlobalSymbol::new("kNBFlag"))
            }
        }

        let (_, registry) = registry();
        let err = registry.bind::<OptionalFlag>().unwrap_err();
        assert!(matches!(err, BridgeError::SignatureMismatch { .. }));
        assert!(!err.is_fatal());
        assert!(registry.bind::<OptionalObject>().is_ok());
    }

    #[test]
    fn returned_ownership_follows_naming() {
        let (_, registry) = registry();
        let binding = registry.bind::<Array>().unwrap();
        assert!(!binding.require("array").unwrap().returns_retained());

        let decl = BindingDecl::class("NSObject")
            .class_method::<(), NativeHandle>("make", "newObject")
            .method::<(), NativeHandle>("copy", "copy")
            .returns_borrowed();
        assert_eq!(decl.entries()[0].returns, ReturnOwnership::Inferred);
        assert_eq!(decl.entries()[1].returns, ReturnOwnership::Borrowed);
    }

    #[test]
    fn invalid_struct_layout_fails_binding() {
        struct UsesForeignStruct;
        impl Bound for UsesForeignStruct {
            fn declare() -> BindingDecl {
                let other_abi = if TargetAbi::host() == TargetAbi::LP64 {
                    TargetAbi::ILP32_ARM
                } else {
                    TargetAbi::LP64
                };
                let descriptor = StructDescriptor::builder("Foreign", other_abi)
                    .member(0, "x", NativeType::I32)
                    .build()
                    .unwrap();
                BindingDecl::class("NSObject").entry(
                    "take",
                    EntryKind::Method {
                        selector: Selector::new("take:"),
                    },
                    Signature::new(vec![NativeType::Struct(descriptor)], NativeType::Void),
                )
            }
        }

        let (_, registry) = registry();
        let err = registry.bind::<UsesForeignStruct>().unwrap_err();
        assert!(err.is_fatal());
    }
}
