//! The bridge context.
//!
//! A [`Bridge`] owns every process-wide cache of the bridge: the symbol
//! table, the global value cache, the class binding registry and the method
//! implementation cache. Bindings normally go through the installed
//! process-wide bridge ([`Bridge::global`]); tests create their own
//! instances over an [`InProcessRuntime`](natbridge_core::InProcessRuntime).

use std::fmt;
use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap;

use natbridge_core::{
    BridgeError, BridgeResult, MarshalContext, MethodImp, NativeHandle, NativeRuntime, RuntimeRef,
    SymbolSource,
};
use natbridge_registry::{BindingRegistry, Bound, ClassBinding, GlobalValues, SymbolTable};

use crate::config::BridgeConfig;

static GLOBAL: RwLock<Option<Arc<Bridge>>> = RwLock::new(None);

/// Entry point to a native runtime.
pub struct Bridge {
    config: BridgeConfig,
    runtime: RuntimeRef,
    symbols: Arc<SymbolTable>,
    globals: GlobalValues,
    bindings: BindingRegistry,
    pub(crate) imps: RwLock<FxHashMap<(NativeHandle, u64), MethodImp>>,
}

impl Bridge {
    /// A bridge over `runtime`, which also serves as the symbol source.
    ///
    /// Libraries named in [`BridgeConfig::preload_library`] are loaded
    /// before this returns.
    pub fn new<R: NativeRuntime + 'static>(
        runtime: Arc<R>,
        config: BridgeConfig,
    ) -> BridgeResult<Self> {
        let source: Arc<dyn SymbolSource> = runtime.clone();
        Self::with_symbol_source(runtime, source, config)
    }

    /// A bridge whose symbols come from a different source than the object
    /// runtime, such as [`DynamicLibraries`](natbridge_core::DynamicLibraries).
    pub fn with_symbol_source(
        runtime: RuntimeRef,
        source: Arc<dyn SymbolSource>,
        config: BridgeConfig,
    ) -> BridgeResult<Self> {
        let symbols = SymbolTable::new(source).with_search_all(config.search_all_libraries());
        let symbols = Arc::new(symbols);
        for library in config.preload_libraries() {
            symbols.ensure_library(library)?;
        }
        let globals = GlobalValues::new(Arc::clone(&symbols));
        let bindings = BindingRegistry::new(Arc::clone(&runtime), Arc::clone(&symbols))
            .with_layout_validation(config.validate_layouts());
        log::debug!("bridge created over {:?}", runtime.abi());
        Ok(Bridge {
            config,
            runtime,
            symbols,
            globals,
            bindings,
            imps: RwLock::new(FxHashMap::default()),
        })
    }

    /// Make `bridge` the process-wide bridge.
    ///
    /// Fails if one is already installed.
    pub fn install(bridge: Bridge) -> BridgeResult<Arc<Bridge>> {
        let mut global = GLOBAL.write().unwrap_or_else(|p| p.into_inner());
        if global.is_some() {
            return Err(BridgeError::NotInitialized("a bridge is already installed"));
        }
        let bridge = Arc::new(bridge);
        *global = Some(Arc::clone(&bridge));
        Ok(bridge)
    }

    /// Remove the process-wide bridge, returning it.
    pub fn uninstall() -> Option<Arc<Bridge>> {
        GLOBAL.write().unwrap_or_else(|p| p.into_inner()).take()
    }

    /// The process-wide bridge.
    pub fn global() -> BridgeResult<Arc<Bridge>> {
        GLOBAL
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or(BridgeError::NotInitialized("no bridge installed"))
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn runtime(&self) -> &RuntimeRef {
        &self.runtime
    }

    pub fn symbols(&self) -> &Arc<SymbolTable> {
        &self.symbols
    }

    pub fn globals(&self) -> &GlobalValues {
        &self.globals
    }

    pub fn bindings(&self) -> &BindingRegistry {
        &self.bindings
    }

    /// Context for marshaling values through this bridge.
    pub fn context(&self) -> MarshalContext<'_> {
        MarshalContext::new(&self.runtime, &self.globals)
    }

    /// The binding of `T`, resolved on first use.
    pub fn bind<T: Bound>(&self) -> BridgeResult<Arc<ClassBinding>> {
        self.bindings.bind::<T>()
    }

    /// Forget every cached symbol, global value, binding and method
    /// implementation. Resolution starts over on next use.
    pub fn reset_caches(&self) {
        self.imps.write().unwrap_or_else(|p| p.into_inner()).clear();
        self.bindings.reset();
        self.globals.reset();
        self.symbols.reset();
        log::debug!("bridge caches reset");
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("config", &self.config)
            .field("symbols", &self.symbols)
            .field("globals", &self.globals)
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}
