//! A complete native object model living in the current process.
//!
//! [`InProcessRuntime`] implements the Objective-C style object model the
//! bridge targets: classes with metaclasses, dynamic dispatch by selector
//! along the superclass chain, retain counts with an autorelease pool,
//! protocols, C functions, global data symbols and libraries that must be
//! loaded before their symbols are visible.
//!
//! Built-in classes:
//!
//! | Class | Class methods | Instance methods |
//! |-------|---------------|------------------|
//! | `NSObject` | `alloc`, `new` | `init`, `class`, `respondsToSelector:`, `conformsToProtocol:`, `isEqual:`, `retainCount` |
//! | `NSString` | `stringWithUTF8String:` | `UTF8String`, `length` |
//! | `NSMutableArray` | `array` | `addObject:`, `count`, `objectAtIndex:` |
//!
//! Every operation is counted in [`RuntimeStats`] so tests can assert on
//! lookups, sends and the retain/release balance.

use std::ffi::{CStr, CString, c_char};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rustc_hash::FxHashMap;

use crate::abi::{TargetAbi, parse_method_encoding};
use crate::error::{NativeCallError, RuntimeError};
use crate::handle::NativeHandle;
use crate::runtime::heap::{ObjectHeap, Payload};
use crate::runtime::{
    MethodImp, NativeMethod, NativeRuntime, PROCESS_IMAGE, SymbolScope, SymbolSource,
};
use crate::selector::Selector;
use crate::value::NativeValue;

const STATIC_BASE: usize = 0x1000;
const STATIC_STRIDE: usize = 16;
const HEAP_BASE: usize = 0x1000_0000;

/// Body of a C function defined on the in-process runtime.
pub type FunctionBody =
    Arc<dyn Fn(&[NativeValue]) -> Result<NativeValue, NativeCallError> + Send + Sync>;

/// Operation counters.
#[derive(Debug, Default)]
pub struct RuntimeStats {
    symbol_lookups: AtomicUsize,
    library_loads: AtomicUsize,
    method_resolutions: AtomicUsize,
    message_sends: AtomicUsize,
    function_calls: AtomicUsize,
    retains: AtomicUsize,
    releases: AtomicUsize,
    deallocations: AtomicUsize,
    invalid_releases: AtomicUsize,
    classes_defined: AtomicUsize,
    methods_added: AtomicUsize,
}

impl RuntimeStats {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            symbol_lookups: self.symbol_lookups.load(Ordering::Relaxed),
            library_loads: self.library_loads.load(Ordering::Relaxed),
            method_resolutions: self.method_resolutions.load(Ordering::Relaxed),
            message_sends: self.message_sends.load(Ordering::Relaxed),
            function_calls: self.function_calls.load(Ordering::Relaxed),
            retains: self.retains.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            deallocations: self.deallocations.load(Ordering::Relaxed),
            invalid_releases: self.invalid_releases.load(Ordering::Relaxed),
            classes_defined: self.classes_defined.load(Ordering::Relaxed),
            methods_added: self.methods_added.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.symbol_lookups,
            &self.library_loads,
            &self.method_resolutions,
            &self.message_sends,
            &self.function_calls,
            &self.retains,
            &self.releases,
            &self.deallocations,
            &self.invalid_releases,
            &self.classes_defined,
            &self.methods_added,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of [`RuntimeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub symbol_lookups: usize,
    pub library_loads: usize,
    pub method_resolutions: usize,
    pub message_sends: usize,
    pub function_calls: usize,
    pub retains: usize,
    pub releases: usize,
    pub deallocations: usize,
    /// Releases of handles that were not live objects. Always a bug.
    pub invalid_releases: usize,
    /// Classes created with `define_class`.
    pub classes_defined: usize,
    /// Methods added with `add_method`.
    pub methods_added: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstanceKind {
    Plain,
    String,
    Array,
}

impl InstanceKind {
    fn payload(self) -> Payload {
        match self {
            InstanceKind::Plain => Payload::Empty,
            InstanceKind::String => Payload::String(CString::default()),
            InstanceKind::Array => Payload::Array(Vec::new()),
        }
    }
}

struct ClassInfo {
    name: String,
    superclass: Option<NativeHandle>,
    metaclass: NativeHandle,
    is_meta: bool,
    kind: InstanceKind,
    methods: FxHashMap<Selector, (NativeHandle, String)>,
    protocols: Vec<NativeHandle>,
}

#[derive(Debug, Clone, Copy)]
enum Builtin {
    Alloc,
    New,
    Init,
    Class,
    RespondsToSelector,
    ConformsToProtocol,
    IsEqual,
    RetainCount,
    StringWithUtf8,
    Utf8String,
    Length,
    ArrayFactory,
    AddObject,
    Count,
    ObjectAtIndex,
}

#[derive(Clone)]
enum MethodBody {
    Builtin(Builtin),
    External {
        method: Arc<dyn NativeMethod>,
        arity: usize,
    },
}

struct Library {
    loaded: bool,
    symbols: FxHashMap<String, NativeHandle>,
}

struct State {
    heap: ObjectHeap,
    classes: FxHashMap<NativeHandle, ClassInfo>,
    class_names: FxHashMap<String, NativeHandle>,
    protocols: FxHashMap<String, NativeHandle>,
    imps: FxHashMap<NativeHandle, MethodBody>,
    libraries: FxHashMap<String, Library>,
    load_order: Vec<String>,
    data: FxHashMap<NativeHandle, NativeHandle>,
    functions: FxHashMap<NativeHandle, FunctionBody>,
    pool: Vec<NativeHandle>,
    next_static: usize,
}

impl State {
    fn next_address(&mut self) -> NativeHandle {
        let h = NativeHandle(self.next_static);
        self.next_static += STATIC_STRIDE;
        h
    }

    fn add_class(
        &mut self,
        name: &str,
        superclass: Option<NativeHandle>,
        kind: InstanceKind,
        protocols: Vec<NativeHandle>,
    ) -> NativeHandle {
        let class = self.next_address();
        let meta = self.next_address();

        // The root metaclass inherits from the root class and is its own
        // metaclass, so class objects answer root instance methods.
        let (meta_super, meta_meta) = match superclass {
            Some(sup) => {
                let sup_meta = self.classes[&sup].metaclass;
                let root_meta = self.classes[&sup_meta].metaclass;
                (Some(sup_meta), root_meta)
            }
            None => (Some(class), meta),
        };

        self.classes.insert(
            meta,
            ClassInfo {
                name: name.to_string(),
                superclass: meta_super,
                metaclass: meta_meta,
                is_meta: true,
                kind: InstanceKind::Plain,
                methods: FxHashMap::default(),
                protocols: Vec::new(),
            },
        );
        self.classes.insert(
            class,
            ClassInfo {
                name: name.to_string(),
                superclass,
                metaclass: meta,
                is_meta: false,
                kind,
                methods: FxHashMap::default(),
                protocols,
            },
        );
        self.class_names.insert(name.to_string(), class);
        class
    }

    fn add_builtin(
        &mut self,
        class: NativeHandle,
        class_method: bool,
        selector: &str,
        encoding: &str,
        builtin: Builtin,
    ) {
        let target = if class_method {
            self.classes[&class].metaclass
        } else {
            class
        };
        let imp = self.next_address();
        self.imps.insert(imp, MethodBody::Builtin(builtin));
        if let Some(info) = self.classes.get_mut(&target) {
            info.methods
                .insert(Selector::new(selector), (imp, encoding.to_string()));
        }
    }

    fn class_of(&self, object: NativeHandle) -> Option<NativeHandle> {
        if let Some(obj) = self.heap.get(object) {
            return Some(obj.class);
        }
        self.classes.get(&object).map(|c| c.metaclass)
    }

    fn resolve(&self, class: NativeHandle, selector: &Selector) -> Option<MethodImp> {
        let mut current = Some(class);
        while let Some(c) = current {
            let info = self.classes.get(&c)?;
            if let Some((imp, _)) = info.methods.get(selector) {
                return Some(MethodImp {
                    address: *imp,
                    owner: c,
                });
            }
            current = info.superclass;
        }
        None
    }

    fn conforms(&self, class: NativeHandle, protocol: NativeHandle) -> bool {
        let mut current = Some(class);
        while let Some(c) = current {
            match self.classes.get(&c) {
                Some(info) if info.protocols.contains(&protocol) => return true,
                Some(info) => current = info.superclass,
                None => return false,
            }
        }
        false
    }

    fn library_mut(&mut self, name: &str) -> &mut Library {
        self.libraries
            .entry(name.to_string())
            .or_insert_with(|| Library {
                loaded: false,
                symbols: FxHashMap::default(),
            })
    }
}

/// Reference implementation of [`NativeRuntime`].
pub struct InProcessRuntime {
    abi: TargetAbi,
    state: Mutex<State>,
    stats: RuntimeStats,
}

impl InProcessRuntime {
    /// Create a runtime with the built-in classes, using the host ABI.
    pub fn new() -> Self {
        Self::with_abi(TargetAbi::host())
    }

    /// Create a runtime reporting `abi` as its layout rules.
    pub fn with_abi(abi: TargetAbi) -> Self {
        let mut state = State {
            heap: ObjectHeap::new(HEAP_BASE),
            classes: FxHashMap::default(),
            class_names: FxHashMap::default(),
            protocols: FxHashMap::default(),
            imps: FxHashMap::default(),
            libraries: FxHashMap::default(),
            load_order: vec![PROCESS_IMAGE.to_string()],
            data: FxHashMap::default(),
            functions: FxHashMap::default(),
            pool: Vec::new(),
            next_static: STATIC_BASE,
        };
        state.libraries.insert(
            PROCESS_IMAGE.to_string(),
            Library {
                loaded: true,
                symbols: FxHashMap::default(),
            },
        );

        let ns_object_protocol = state.next_address();
        state
            .protocols
            .insert("NSObject".to_string(), ns_object_protocol);
        let ns_copying = state.next_address();
        state.protocols.insert("NSCopying".to_string(), ns_copying);

        let object = state.add_class(
            "NSObject",
            None,
            InstanceKind::Plain,
            vec![ns_object_protocol],
        );
        state.add_builtin(object, true, "alloc", "@@:", Builtin::Alloc);
        state.add_builtin(object, true, "new", "@@:", Builtin::New);
        state.add_builtin(object, false, "init", "@@:", Builtin::Init);
        state.add_builtin(object, false, "class", "#@:", Builtin::Class);
        state.add_builtin(
            object,
            false,
            "respondsToSelector:",
            "B@::",
            Builtin::RespondsToSelector,
        );
        state.add_builtin(
            object,
            false,
            "conformsToProtocol:",
            "B@:@",
            Builtin::ConformsToProtocol,
        );
        state.add_builtin(object, false, "isEqual:", "B@:@", Builtin::IsEqual);
        state.add_builtin(object, false, "retainCount", "Q@:", Builtin::RetainCount);

        let string = state.add_class(
            "NSString",
            Some(object),
            InstanceKind::String,
            vec![ns_copying],
        );
        state.add_builtin(
            string,
            true,
            "stringWithUTF8String:",
            "@@:*",
            Builtin::StringWithUtf8,
        );
        state.add_builtin(string, false, "UTF8String", "*@:", Builtin::Utf8String);
        state.add_builtin(string, false, "length", "Q@:", Builtin::Length);

        let array = state.add_class(
            "NSMutableArray",
            Some(object),
            InstanceKind::Array,
            Vec::new(),
        );
        state.add_builtin(array, true, "array", "@@:", Builtin::ArrayFactory);
        state.add_builtin(array, false, "addObject:", "v@:@", Builtin::AddObject);
        state.add_builtin(array, false, "count", "Q@:", Builtin::Count);
        state.add_builtin(
            array,
            false,
            "objectAtIndex:",
            "@@:Q",
            Builtin::ObjectAtIndex,
        );

        InProcessRuntime {
            abi,
            state: Mutex::new(state),
            stats: RuntimeStats::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panic inside a callback must not wedge the runtime for other
        // threads; the state itself is always left consistent.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ========================================================================
    // Images and symbols
    // ========================================================================

    /// Register a library image. Its symbols stay invisible until loaded.
    pub fn add_library(&self, name: &str) {
        self.state().library_mut(name);
    }

    /// Whether the library has been loaded.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.state().libraries.get(name).is_some_and(|l| l.loaded)
    }

    /// Define a C function. `library` of `None` puts it in the process image.
    pub fn define_function<F>(&self, library: Option<&str>, name: &str, body: F) -> NativeHandle
    where
        F: Fn(&[NativeValue]) -> Result<NativeValue, NativeCallError> + Send + Sync + 'static,
    {
        let mut state = self.state();
        let address = state.next_address();
        state.functions.insert(address, Arc::new(body));
        state
            .library_mut(library.unwrap_or(PROCESS_IMAGE))
            .symbols
            .insert(name.to_string(), address);
        address
    }

    /// Define a global data symbol holding `value`. Returns the symbol's
    /// address.
    pub fn define_global(
        &self,
        library: Option<&str>,
        name: &str,
        value: NativeHandle,
    ) -> NativeHandle {
        let mut state = self.state();
        let address = state.next_address();
        state.data.insert(address, value);
        state
            .library_mut(library.unwrap_or(PROCESS_IMAGE))
            .symbols
            .insert(name.to_string(), address);
        address
    }

    /// Define a global holding a new instance of `class_name`, kept alive by
    /// the image. Returns `(symbol address, object)`.
    pub fn define_object_global(
        &self,
        library: Option<&str>,
        name: &str,
        class_name: &str,
    ) -> Result<(NativeHandle, NativeHandle), RuntimeError> {
        let object = {
            let mut state = self.state();
            let class = *state
                .class_names
                .get(class_name)
                .ok_or_else(|| RuntimeError::UnknownClass(class_name.to_string()))?;
            let kind = state.classes[&class].kind;
            state.heap.allocate(class, kind.payload())
        };
        Ok((self.define_global(library, name, object), object))
    }

    /// Define a global holding an `NSString` constant kept alive by the
    /// image. Returns `(symbol address, string object)`.
    pub fn define_string_global(
        &self,
        library: Option<&str>,
        name: &str,
        value: &str,
    ) -> Result<(NativeHandle, NativeHandle), RuntimeError> {
        let contents = CString::new(value).map_err(|err| RuntimeError::InvalidConstant {
            name: name.to_string(),
            reason: err.to_string(),
        })?;
        let object = {
            let mut state = self.state();
            let class = state.class_names["NSString"];
            state.heap.allocate(class, Payload::String(contents))
        };
        Ok((self.define_global(library, name, object), object))
    }

    /// Define a protocol.
    pub fn define_protocol(&self, name: &str) -> NativeHandle {
        let mut state = self.state();
        if let Some(p) = state.protocols.get(name) {
            return *p;
        }
        let p = state.next_address();
        state.protocols.insert(name.to_string(), p);
        p
    }

    // ========================================================================
    // Introspection for tests
    // ========================================================================

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Retain count of a live object.
    pub fn retain_count(&self, object: NativeHandle) -> Option<usize> {
        self.state().heap.retain_count(object)
    }

    pub fn is_alive(&self, object: NativeHandle) -> bool {
        self.state().heap.contains(object)
    }

    /// Number of live objects, including image-owned globals.
    pub fn live_objects(&self) -> usize {
        self.state().heap.live_count()
    }

    /// Contents of a string object.
    pub fn string_value(&self, object: NativeHandle) -> Option<String> {
        match &self.state().heap.get(object)?.payload {
            Payload::String(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        }
    }

    /// Elements of an array object.
    pub fn array_elements(&self, object: NativeHandle) -> Option<Vec<NativeHandle>> {
        match &self.state().heap.get(object)?.payload {
            Payload::Array(items) => Some(items.clone()),
            _ => None,
        }
    }

    /// Type encoding a class registered for a selector.
    pub fn method_encoding(&self, class: NativeHandle, selector: &Selector) -> Option<String> {
        let state = self.state();
        let imp = state.resolve(class, selector)?;
        state.classes[&imp.owner]
            .methods
            .get(selector)
            .map(|(_, enc)| enc.clone())
    }

    /// Number of objects waiting in the autorelease pool.
    pub fn pending_autoreleases(&self) -> usize {
        self.state().pool.len()
    }

    /// Release every object in the autorelease pool.
    pub fn drain_autorelease_pool(&self) {
        let pending = std::mem::take(&mut self.state().pool);
        log::trace!("draining {} autoreleased objects", pending.len());
        for object in pending {
            self.release(object);
        }
    }

    // ========================================================================
    // Built-in method bodies
    // ========================================================================

    fn alloc_instance(&self, class: NativeHandle) -> Result<NativeHandle, NativeCallError> {
        let mut state = self.state();
        let kind = match state.classes.get(&class) {
            Some(info) if !info.is_meta => info.kind,
            _ => return Err(NativeCallError::InvalidReceiver(class)),
        };
        Ok(state.heap.allocate(class, kind.payload()))
    }

    fn run_builtin(
        &self,
        builtin: Builtin,
        receiver: NativeHandle,
        selector: &Selector,
        args: &[NativeValue],
    ) -> Result<NativeValue, NativeCallError> {
        match builtin {
            Builtin::Alloc => Ok(NativeValue::Pointer(self.alloc_instance(receiver)?)),
            Builtin::New => {
                let object = self.alloc_instance(receiver)?;
                let init = Selector::new("init");
                self.send(object, &init, &[])
            }
            Builtin::Init => {
                self.require_object(receiver)?;
                Ok(NativeValue::Pointer(receiver))
            }
            Builtin::Class => {
                let state = self.state();
                if state.classes.contains_key(&receiver) {
                    return Ok(NativeValue::Pointer(receiver));
                }
                let obj = state
                    .heap
                    .get(receiver)
                    .ok_or(NativeCallError::InvalidReceiver(receiver))?;
                Ok(NativeValue::Pointer(obj.class))
            }
            Builtin::RespondsToSelector => {
                let query = match args.first() {
                    Some(NativeValue::Selector(sel)) => sel,
                    other => return Err(arg_type(0, "SEL", other)),
                };
                let state = self.state();
                let class = state
                    .class_of(receiver)
                    .ok_or(NativeCallError::InvalidReceiver(receiver))?;
                Ok(NativeValue::Bool(state.resolve(class, query).is_some()))
            }
            Builtin::ConformsToProtocol => {
                let protocol = pointer_arg(args, 0)?;
                let state = self.state();
                let class = if state.classes.contains_key(&receiver) {
                    receiver
                } else {
                    state
                        .class_of(receiver)
                        .ok_or(NativeCallError::InvalidReceiver(receiver))?
                };
                Ok(NativeValue::Bool(state.conforms(class, protocol)))
            }
            Builtin::IsEqual => {
                let other = pointer_arg(args, 0)?;
                let state = self.state();
                let equal = match (state.heap.get(receiver), state.heap.get(other)) {
                    _ if receiver == other => true,
                    (Some(a), Some(b)) => match (&a.payload, &b.payload) {
                        (Payload::String(x), Payload::String(y)) => x == y,
                        _ => false,
                    },
                    _ => false,
                };
                Ok(NativeValue::Bool(equal))
            }
            Builtin::RetainCount => {
                let count = self
                    .state()
                    .heap
                    .retain_count(receiver)
                    .unwrap_or(usize::MAX);
                Ok(NativeValue::USize(count))
            }
            Builtin::StringWithUtf8 => {
                let ptr = pointer_arg(args, 0)?;
                if ptr.is_null() {
                    return Err(NativeCallError::raised(
                        "*** +[NSString stringWithUTF8String:]: NULL cString",
                    ));
                }
                // SAFETY: callers pass a NUL-terminated string that outlives
                // the call, as the native contract for `char *` requires.
                let contents = unsafe { CStr::from_ptr(ptr.as_ptr::<c_char>()) }.to_owned();
                let object = {
                    let mut state = self.state();
                    match state.classes.get(&receiver) {
                        Some(info) if info.kind == InstanceKind::String => {}
                        _ => return Err(NativeCallError::InvalidReceiver(receiver)),
                    }
                    let object = state.heap.allocate(receiver, Payload::String(contents));
                    state.pool.push(object);
                    object
                };
                Ok(NativeValue::Pointer(object))
            }
            Builtin::Utf8String => {
                let state = self.state();
                match state.heap.get(receiver).map(|o| &o.payload) {
                    Some(Payload::String(s)) => {
                        Ok(NativeValue::Pointer(NativeHandle::from_ptr(s.as_ptr())))
                    }
                    _ => Err(NativeCallError::InvalidReceiver(receiver)),
                }
            }
            Builtin::Length => {
                let state = self.state();
                match state.heap.get(receiver).map(|o| &o.payload) {
                    Some(Payload::String(s)) => {
                        let units = s.to_string_lossy().encode_utf16().count();
                        Ok(NativeValue::USize(units))
                    }
                    _ => Err(NativeCallError::InvalidReceiver(receiver)),
                }
            }
            Builtin::ArrayFactory => {
                let object = self.alloc_instance(receiver)?;
                self.state().pool.push(object);
                Ok(NativeValue::Pointer(object))
            }
            Builtin::AddObject => {
                let element = pointer_arg(args, 0)?;
                let mut state = self.state();
                if element.is_null() || state.class_of(element).is_none() {
                    return Err(NativeCallError::raised(format!(
                        "*** -[NSMutableArray {}]: object cannot be nil",
                        selector
                    )));
                }
                match state.heap.get(receiver).map(|o| &o.payload) {
                    Some(Payload::Array(_)) => {}
                    _ => return Err(NativeCallError::InvalidReceiver(receiver)),
                }
                state.heap.retain(element);
                RuntimeStats::bump(&self.stats.retains);
                if let Some(obj) = state.heap.get_mut(receiver)
                    && let Payload::Array(items) = &mut obj.payload
                {
                    items.push(element);
                }
                Ok(NativeValue::Void)
            }
            Builtin::Count => {
                let state = self.state();
                match state.heap.get(receiver).map(|o| &o.payload) {
                    Some(Payload::Array(items)) => Ok(NativeValue::USize(items.len())),
                    _ => Err(NativeCallError::InvalidReceiver(receiver)),
                }
            }
            Builtin::ObjectAtIndex => {
                let index = match args.first() {
                    Some(NativeValue::USize(i)) => *i,
                    Some(NativeValue::ISize(i)) if *i >= 0 => *i as usize,
                    other => return Err(arg_type(0, "NSUInteger", other)),
                };
                let state = self.state();
                match state.heap.get(receiver).map(|o| &o.payload) {
                    Some(Payload::Array(items)) => items
                        .get(index)
                        .map(|h| NativeValue::Pointer(*h))
                        .ok_or_else(|| {
                            NativeCallError::raised(format!(
                                "*** -[NSMutableArray objectAtIndex:]: index {} beyond bounds [0 .. {}]",
                                index,
                                items.len().saturating_sub(1)
                            ))
                        }),
                    _ => Err(NativeCallError::InvalidReceiver(receiver)),
                }
            }
        }
    }

    fn require_object(&self, receiver: NativeHandle) -> Result<(), NativeCallError> {
        if self.state().heap.contains(receiver) {
            Ok(())
        } else {
            Err(NativeCallError::InvalidReceiver(receiver))
        }
    }
}

fn arg_type(index: usize, expected: &'static str, actual: Option<&NativeValue>) -> NativeCallError {
    match actual {
        Some(v) => NativeCallError::ArgumentType {
            index,
            expected,
            actual: v.type_name(),
        },
        None => NativeCallError::ArgumentCount {
            expected: index + 1,
            actual: index,
        },
    }
}

fn pointer_arg(args: &[NativeValue], index: usize) -> Result<NativeHandle, NativeCallError> {
    match args.get(index) {
        Some(NativeValue::Pointer(h)) => Ok(*h),
        other => Err(arg_type(index, "pointer", other)),
    }
}

impl Default for InProcessRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InProcessRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("InProcessRuntime")
            .field("abi", &self.abi)
            .field("classes", &state.class_names.len())
            .field("heap", &state.heap)
            .finish()
    }
}

impl SymbolSource for InProcessRuntime {
    fn load_library(&self, name: &str) -> Result<(), RuntimeError> {
        RuntimeStats::bump(&self.stats.library_loads);
        let mut state = self.state();
        let newly_loaded = match state.libraries.get_mut(name) {
            Some(lib) => !std::mem::replace(&mut lib.loaded, true),
            None => {
                return Err(RuntimeError::LibraryLoad {
                    name: name.to_string(),
                    reason: "image not found".to_string(),
                });
            }
        };
        if newly_loaded {
            state.load_order.push(name.to_string());
            log::debug!("loaded library {}", name);
        }
        Ok(())
    }

    fn find_symbol(&self, scope: SymbolScope<'_>, name: &str) -> Option<NativeHandle> {
        RuntimeStats::bump(&self.stats.symbol_lookups);
        let state = self.state();
        let search = |lib: &str| {
            state
                .libraries
                .get(lib)
                .filter(|l| l.loaded)
                .and_then(|l| l.symbols.get(name).copied())
        };
        match scope {
            SymbolScope::Library(lib) => search(lib),
            SymbolScope::Process => search(PROCESS_IMAGE),
            SymbolScope::AllLoaded => state.load_order.iter().find_map(|lib| search(lib)),
        }
    }

    unsafe fn read_word(&self, address: NativeHandle) -> Result<NativeHandle, RuntimeError> {
        self.state()
            .data
            .get(&address)
            .copied()
            .ok_or(RuntimeError::NotData(address))
    }
}

impl NativeRuntime for InProcessRuntime {
    fn abi(&self) -> TargetAbi {
        self.abi
    }

    fn lookup_class(&self, name: &str) -> Option<NativeHandle> {
        self.state().class_names.get(name).copied()
    }

    fn lookup_protocol(&self, name: &str) -> Option<NativeHandle> {
        self.state().protocols.get(name).copied()
    }

    fn class_of(&self, object: NativeHandle) -> Option<NativeHandle> {
        self.state().class_of(object)
    }

    fn superclass_of(&self, class: NativeHandle) -> Option<NativeHandle> {
        self.state().classes.get(&class)?.superclass
    }

    fn class_name(&self, class: NativeHandle) -> Option<String> {
        self.state().classes.get(&class).map(|c| c.name.clone())
    }

    fn conforms_to(&self, class: NativeHandle, protocol: NativeHandle) -> bool {
        self.state().conforms(class, protocol)
    }

    fn resolve_method(&self, class: NativeHandle, selector: &Selector) -> Option<MethodImp> {
        RuntimeStats::bump(&self.stats.method_resolutions);
        log::trace!("resolving {} on class {}", selector, class);
        self.state().resolve(class, selector)
    }

    fn call_method(
        &self,
        imp: MethodImp,
        receiver: NativeHandle,
        selector: &Selector,
        args: &[NativeValue],
    ) -> Result<NativeValue, NativeCallError> {
        RuntimeStats::bump(&self.stats.message_sends);
        let body = self
            .state()
            .imps
            .get(&imp.address)
            .cloned()
            .ok_or(NativeCallError::NotCallable(imp.address))?;

        match body {
            MethodBody::Builtin(builtin) => self.run_builtin(builtin, receiver, selector, args),
            MethodBody::External { method, arity } => {
                if args.len() != arity {
                    return Err(NativeCallError::ArgumentCount {
                        expected: arity,
                        actual: args.len(),
                    });
                }
                if self.state().class_of(receiver).is_none() {
                    return Err(NativeCallError::InvalidReceiver(receiver));
                }
                // Called without the state lock: the body may call back in
                method.invoke(receiver, selector, args)
            }
        }
    }

    fn call_function(
        &self,
        address: NativeHandle,
        args: &[NativeValue],
    ) -> Result<NativeValue, NativeCallError> {
        RuntimeStats::bump(&self.stats.function_calls);
        let body = self
            .state()
            .functions
            .get(&address)
            .cloned()
            .ok_or(NativeCallError::NotCallable(address))?;
        body(args)
    }

    fn retain(&self, object: NativeHandle) -> NativeHandle {
        RuntimeStats::bump(&self.stats.retains);
        let mut state = self.state();
        if !state.heap.retain(object) && !state.classes.contains_key(&object) && !object.is_null() {
            log::error!("retain of dead object {}", object);
        }
        object
    }

    fn release(&self, object: NativeHandle) {
        RuntimeStats::bump(&self.stats.releases);
        let mut state = self.state();
        if state.classes.contains_key(&object) || object.is_null() {
            return;
        }
        let mut pending = vec![object];
        while let Some(h) = pending.pop() {
            if !state.heap.contains(h) {
                RuntimeStats::bump(&self.stats.invalid_releases);
                log::error!("release of dead object {}", h);
                continue;
            }
            if let Some(freed) = state.heap.release(h) {
                RuntimeStats::bump(&self.stats.deallocations);
                if let Payload::Array(items) = freed.payload {
                    // Each element gives up the retain the array held
                    for _ in &items {
                        RuntimeStats::bump(&self.stats.releases);
                    }
                    pending.extend(items);
                }
            }
        }
    }

    fn autorelease(&self, object: NativeHandle) -> NativeHandle {
        if !object.is_null() {
            self.state().pool.push(object);
        }
        object
    }

    fn define_class(
        &self,
        name: &str,
        superclass: NativeHandle,
        protocols: &[NativeHandle],
    ) -> Result<NativeHandle, RuntimeError> {
        let mut state = self.state();
        if state.class_names.contains_key(name) {
            return Err(RuntimeError::ClassExists(name.to_string()));
        }
        let kind = match state.classes.get(&superclass) {
            Some(info) if !info.is_meta => info.kind,
            _ => return Err(RuntimeError::NotAClass(superclass)),
        };
        let class = state.add_class(name, Some(superclass), kind, protocols.to_vec());
        RuntimeStats::bump(&self.stats.classes_defined);
        log::debug!("defined class {} ({})", name, class);
        Ok(class)
    }

    fn add_method(
        &self,
        class: NativeHandle,
        selector: &Selector,
        encoding: &str,
        imp: Arc<dyn NativeMethod>,
    ) -> Result<(), RuntimeError> {
        let (_, args) = parse_method_encoding(encoding)?;
        if args.len() != selector.arg_count() {
            return Err(RuntimeError::InvalidEncoding {
                encoding: encoding.to_string(),
                reason: format!("`{}` takes {} arguments", selector, selector.arg_count()),
            });
        }
        let mut state = self.state();
        if !state.classes.contains_key(&class) {
            return Err(RuntimeError::NotAClass(class));
        }
        let address = state.next_address();
        state.imps.insert(
            address,
            MethodBody::External {
                method: imp,
                arity: args.len(),
            },
        );
        if let Some(info) = state.classes.get_mut(&class) {
            info.methods
                .insert(selector.clone(), (address, encoding.to_string()));
        }
        RuntimeStats::bump(&self.stats.methods_added);
        Ok(())
    }
}
