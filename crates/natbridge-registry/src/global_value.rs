//! Global values and symbol-backed enumerations.
//!
//! [`GlobalValues`] is the process-wide cache of global symbol values. A
//! value is resolved the first time anything asks for it and cached for the
//! lifetime of the cache; every declaration naming the same symbol shares
//! the cached value.
//!
//! A [`GlobalValueEnum`] is a closed enumeration whose variants are named
//! native globals rather than literals. Identity is the resolved value:
//! [`value_of_with`](GlobalValueEnum::value_of_with) scans the variants in
//! declaration order and returns the first whose value matches.

use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use rustc_hash::FxHashMap;

use natbridge_core::marshal::{MarshalContext, consume_retain};
use natbridge_core::{
    BridgeError, BridgeResult, GlobalResolver, GlobalSymbol, MarshalError, MarshalFlags,
    NativeHandle, NoSuchConstant, RuntimeError, SymbolKey,
};

use crate::symbol_table::{SymbolTable, cell_for};

type ValueCell = Arc<OnceLock<Result<Option<NativeHandle>, RuntimeError>>>;

/// Process-wide cache of global symbol values.
pub struct GlobalValues {
    symbols: Arc<SymbolTable>,
    values: RwLock<FxHashMap<(SymbolKey, bool), ValueCell>>,
}

impl GlobalValues {
    pub fn new(symbols: Arc<SymbolTable>) -> Self {
        GlobalValues {
            symbols,
            values: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn symbols(&self) -> &Arc<SymbolTable> {
        &self.symbols
    }

    /// Value of `symbol`, resolved once.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn value(&self, symbol: &GlobalSymbol) -> BridgeResult<Option<NativeHandle>> {
        let key = (SymbolKey::new(symbol.library, symbol.name), symbol.dereference);
        let cell = cell_for(&self.values, key);
        let resolved = cell.get_or_init(|| {
            let Some(address) = self.symbols.lookup(symbol.library, symbol.name)? else {
                return Ok(None);
            };
            if !symbol.dereference {
                return Ok(Some(address));
            }
            // SAFETY: the address was returned by this source for a symbol
            // declared as a global data value, which holds at least one word.
            let value = unsafe { self.symbols.source().read_word(address) }?;
            log::debug!("global {} = {}", symbol.name, value);
            Ok(Some(value))
        });

        match resolved {
            Ok(Some(value)) => Ok(Some(*value)),
            Ok(None) if symbol.optional => Ok(None),
            Ok(None) => Err(BridgeError::symbol_not_found(symbol.name, symbol.library)),
            Err(_) if symbol.optional => Ok(None),
            Err(err) => Err(err.clone().into()),
        }
    }

    /// Number of cached values.
    pub fn len(&self) -> usize {
        self.values.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every cached value. The symbol table is not reset.
    pub fn reset(&self) {
        self.values
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }
}

impl GlobalResolver for GlobalValues {
    fn resolve_global(&self, symbol: &GlobalSymbol) -> BridgeResult<Option<NativeHandle>> {
        self.value(symbol)
    }
}

impl fmt::Debug for GlobalValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalValues")
            .field("values", &self.len())
            .finish()
    }
}

/// Result of a forward-compatible enumeration lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumLookup<E> {
    /// The value belongs to a declared variant.
    Known(E),
    /// No declared variant has this value, typically one introduced by a
    /// newer native platform.
    Unknown(NativeHandle),
}

impl<E> EnumLookup<E> {
    pub fn known(self) -> Option<E> {
        match self {
            EnumLookup::Known(e) => Some(e),
            EnumLookup::Unknown(_) => None,
        }
    }
}

/// A closed enumeration over native global values.
///
/// Usually declared with [`global_value_enum!`](crate::global_value_enum).
pub trait GlobalValueEnum: Copy + Eq + fmt::Debug + 'static {
    /// Name of the enumeration, for errors.
    const NAME: &'static str;

    /// Every variant in declaration order.
    const VARIANTS: &'static [Self];

    /// Declaration of the variant's backing global.
    fn symbol(self) -> GlobalSymbol;

    fn display_name(self) -> &'static str;

    /// Resolved backing value. `None` only for an optional variant whose
    /// symbol is absent.
    fn value_with(self, globals: &dyn GlobalResolver) -> BridgeResult<Option<NativeHandle>> {
        globals.resolve_global(&self.symbol())
    }

    /// The first variant, in declaration order, whose backing value is
    /// `value`.
    ///
    /// Variants whose optional symbol is absent never match. Fails with
    /// [`BridgeError::NoSuchConstant`] when nothing matches.
    fn value_of_with(globals: &dyn GlobalResolver, value: NativeHandle) -> BridgeResult<Self> {
        match Self::lookup_with(globals, value)? {
            EnumLookup::Known(variant) => Ok(variant),
            EnumLookup::Unknown(value) => Err(NoSuchConstant {
                enum_name: Self::NAME,
                value,
            }
            .into()),
        }
    }

    /// Like [`value_of_with`](Self::value_of_with) but reports an unmatched
    /// value instead of failing.
    fn lookup_with(
        globals: &dyn GlobalResolver,
        value: NativeHandle,
    ) -> BridgeResult<EnumLookup<Self>> {
        for &variant in Self::VARIANTS {
            if variant.value_with(globals)? == Some(value) {
                return Ok(EnumLookup::Known(variant));
            }
        }
        Ok(EnumLookup::Unknown(value))
    }
}

/// Native to managed conversion for global-value enumerations.
///
/// Global values are owned by their image; a retained handle is balanced
/// immediately.
pub fn enum_from_handle<E: GlobalValueEnum>(
    cx: &MarshalContext<'_>,
    handle: NativeHandle,
    flags: MarshalFlags,
) -> Result<E, MarshalError> {
    let result = E::value_of_with(cx.globals(), handle).map_err(|err| match err {
        BridgeError::NoSuchConstant(missing) => MarshalError::NoSuchConstant(missing),
        BridgeError::SymbolNotFound { symbol, .. } => MarshalError::Unresolved { symbol },
        other => MarshalError::Unresolved {
            symbol: other.to_string(),
        },
    });
    consume_retain(cx, handle, flags);
    result
}

/// Managed to native conversion for global-value enumerations.
pub fn enum_to_handle<E: GlobalValueEnum>(
    value: E,
    cx: &MarshalContext<'_>,
    flags: MarshalFlags,
) -> Result<NativeHandle, MarshalError> {
    let unresolved = || MarshalError::Unresolved {
        symbol: value.symbol().name.to_string(),
    };
    let handle = value
        .value_with(cx.globals())
        .map_err(|_| unresolved())?
        .ok_or_else(unresolved)?;
    if flags.contains(MarshalFlags::TRANSFER_OWNERSHIP) {
        cx.runtime().retain(handle);
    }
    Ok(handle)
}

/// Declare a [`GlobalValueEnum`].
///
/// Each variant is `Name => "symbol"`, optionally followed by modifiers in
/// parentheses: `optional` tolerates absence, `address_only` uses the
/// symbol's address instead of the word stored there. `in "Library"` after
/// the enum name loads that library on first use.
///
/// The enumeration marshals as a pointer, so it can appear in signatures
/// and in `Vec`s.
///
/// ```
/// use natbridge_registry::{GlobalValueEnum, global_value_enum};
///
/// global_value_enum! {
///     /// Run loop modes.
///     pub enum RunLoopMode in "CoreFoundation" {
///         Default => "kCFRunLoopDefaultMode",
///         Common => "kCFRunLoopCommonModes",
///         Tracking => "UITrackingRunLoopMode" (optional),
///     }
/// }
///
/// assert_eq!(RunLoopMode::VARIANTS.len(), 3);
/// assert!(RunLoopMode::Tracking.symbol().optional);
/// assert_eq!(RunLoopMode::Common.symbol().library, Some("CoreFoundation"));
/// ```
#[macro_export]
macro_rules! global_value_enum {
    (@library) => { None };
    (@library $lib:literal) => { Some($lib) };

    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident $(in $lib:literal)? {
            $(
                $(#[$vmeta:meta])*
                $variant:ident => $symbol:literal $(( $($modifier:ident),+ ))?
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            const LIBRARY: Option<&'static str> = $crate::global_value_enum!(@library $($lib)?);
        }

        impl $crate::GlobalValueEnum for $name {
            const NAME: &'static str = stringify!($name);
            const VARIANTS: &'static [Self] = &[$( $name::$variant ),+];

            fn symbol(self) -> $crate::__core::GlobalSymbol {
                match self {
                    $(
                        $name::$variant => {
                            let symbol = $crate::__core::GlobalSymbol::new($symbol);
                            let symbol = match Self::LIBRARY {
                                Some(library) => symbol.in_library(library),
                                None => symbol,
                            };
                            symbol $($( .$modifier() )+)?
                        }
                    )+
                }
            }

            fn display_name(self) -> &'static str {
                match self {
                    $( $name::$variant => stringify!($variant), )+
                }
            }
        }

        impl $crate::__core::PointerMarshaler for $name {
            fn type_name() -> &'static str {
                stringify!($name)
            }

            fn from_handle(
                cx: &$crate::__core::MarshalContext<'_>,
                handle: $crate::__core::NativeHandle,
                flags: $crate::__core::MarshalFlags,
            ) -> ::std::result::Result<Self, $crate::__core::MarshalError> {
                $crate::global_value::enum_from_handle::<$name>(cx, handle, flags)
            }

            fn to_handle(
                &self,
                cx: &$crate::__core::MarshalContext<'_>,
                flags: $crate::__core::MarshalFlags,
            ) -> ::std::result::Result<$crate::__core::NativeHandle, $crate::__core::MarshalError> {
                $crate::global_value::enum_to_handle(*self, cx, flags)
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str($crate::GlobalValueEnum::display_name(*self))
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use natbridge_core::marshal::PointerMarshaler;
    use natbridge_core::{InProcessRuntime, NativeValue, RuntimeRef};

    crate::global_value_enum! {
        enum Mode {
            A => "kModeA",
            B => "kModeB",
            Future => "kModeFuture" (optional),
        }
    }

    crate::global_value_enum! {
        enum Attr {
            Concurrent => "_queue_attr_concurrent" (address_only),
        }
    }

    struct Fixture {
        rt: Arc<InProcessRuntime>,
        dyn_rt: RuntimeRef,
        globals: GlobalValues,
        a: NativeHandle,
        b: NativeHandle,
    }

    fn fixture() -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();
        let rt = Arc::new(InProcessRuntime::new());
        let (_, a) = rt.define_string_global(None, "kModeA", "A").unwrap();
        let (_, b) = rt.define_string_global(None, "kModeB", "B").unwrap();
        let globals = GlobalValues::new(Arc::new(SymbolTable::new(rt.clone())));
        let dyn_rt: RuntimeRef = rt.clone();
        Fixture {
            rt,
            dyn_rt,
            globals,
            a,
            b,
        }
    }

    #[test]
    fn value_of_matches_resolved_values() {
        let f = fixture();
        assert_eq!(Mode::value_of_with(&f.globals, f.a).unwrap(), Mode::A);
        assert_eq!(Mode::value_of_with(&f.globals, f.b).unwrap(), Mode::B);
        let err = Mode::value_of_with(&f.globals, NativeHandle(0x40)).unwrap_err();
        assert_eq!(
            err,
            BridgeError::NoSuchConstant(NoSuchConstant {
                enum_name: "Mode",
                value: NativeHandle(0x40)
            })
        );
    }

    #[test]
    fn absent_optional_variant_never_matches() {
        let f = fixture();
        assert_eq!(Mode::Future.value_with(&f.globals).unwrap(), None);
        assert!(Mode::value_of_with(&f.globals, NativeHandle::NULL).is_err());
        assert_eq!(
            Mode::lookup_with(&f.globals, NativeHandle(0x40)).unwrap(),
            EnumLookup::Unknown(NativeHandle(0x40))
        );
    }

    #[test]
    fn values_are_cached() {
        let f = fixture();
        f.rt.reset_stats();
        for _ in 0..5 {
            Mode::A.value_with(&f.globals).unwrap();
        }
        assert_eq!(f.rt.stats().symbol_lookups, 1);
        assert_eq!(f.globals.len(), 1);
    }

    #[test]
    fn address_only_symbol() {
        let f = fixture();
        let name = "_queue_attr_concurrent";
        let address = f.rt.define_global(None, name, NativeHandle(0x99));
        let value = Attr::Concurrent.value_with(&f.globals).unwrap();
        assert_eq!(value, Some(address));
    }

    #[test]
    fn enum_marshals_as_pointer() {
        let f = fixture();
        let cx = MarshalContext::new(&f.dyn_rt, &f.globals);
        let flags = MarshalFlags::empty();
        assert_eq!(Mode::B.to_handle(&cx, flags).unwrap(), f.b);
        assert_eq!(Mode::to_managed(&cx, f.a, flags).unwrap(), Some(Mode::A));
        let null = Mode::to_managed(&cx, NativeHandle::NULL, flags).unwrap();
        assert_eq!(null, None);
        let err = Mode::Future.to_handle(&cx, flags).unwrap_err();
        assert!(matches!(err, MarshalError::Unresolved { .. }));

        let list = vec![Mode::B, Mode::A, Mode::B];
        let array = list.to_handle(&cx, flags).unwrap();
        assert_eq!(Vec::<Mode>::from_handle(&cx, array, flags).unwrap(), list);
    }

    #[test]
    fn retained_handle_is_balanced_either_way() {
        let f = fixture();
        let cx = MarshalContext::new(&f.dyn_rt, &f.globals);
        let count = f.rt.retain_count(f.a);
        let retained = MarshalFlags::RETAINED;

        f.dyn_rt.retain(f.a);
        assert_eq!(Mode::to_managed(&cx, f.a, retained).unwrap(), Some(Mode::A));
        assert_eq!(f.rt.retain_count(f.a), count);

        let foreign = "C".to_string();
        let foreign = foreign.to_handle(&cx, MarshalFlags::empty()).unwrap();
        f.dyn_rt.retain(foreign);
        let before = f.rt.retain_count(foreign).unwrap();
        assert!(Mode::to_managed(&cx, foreign, retained).is_err());
        assert_eq!(f.rt.retain_count(foreign), Some(before - 1));

        f.dyn_rt.retain(f.b);
        Mode::to_managed(&cx, f.b, retained | MarshalFlags::OBSERVED).unwrap();
        assert!(f.rt.retain_count(f.b) > count);
        assert_eq!(f.rt.stats().invalid_releases, 0);
    }

    #[test]
    fn unknown_element_fails_the_list() {
        let f = fixture();
        let cx = MarshalContext::new(&f.dyn_rt, &f.globals);
        let foreign = "C".to_string();
        let foreign = foreign.to_handle(&cx, MarshalFlags::empty()).unwrap();
        let class = cx.class("NSMutableArray").unwrap();
        let array = cx.send(class, "array", &[]).unwrap().as_handle().unwrap();
        for element in [f.a, foreign] {
            cx.send(array, "addObject:", &[NativeValue::Pointer(element)])
                .unwrap();
        }
        let err = Vec::<Mode>::from_handle(&cx, array, MarshalFlags::empty()).unwrap_err();
        assert!(matches!(err, MarshalError::Element { index: 1, .. }));
    }
}
