//! Global-value enumerations resolved through the process-wide bridge.

use natbridge_core::{BridgeResult, NativeHandle};
use natbridge_registry::{EnumLookup, GlobalValueEnum};

use crate::bridge::Bridge;

/// [`GlobalValueEnum`] operations against [`Bridge::global`].
///
/// Every method fails with
/// [`BridgeError::NotInitialized`](natbridge_core::BridgeError::NotInitialized)
/// when no bridge is installed.
pub trait GlobalValueEnumExt: GlobalValueEnum {
    /// The variant's backing value, resolved on first access and cached.
    fn value(self) -> BridgeResult<Option<NativeHandle>> {
        let bridge = Bridge::global()?;
        self.value_with(bridge.globals())
    }

    /// The first declared variant whose backing value is `value`.
    fn value_of(value: NativeHandle) -> BridgeResult<Self> {
        let bridge = Bridge::global()?;
        Self::value_of_with(bridge.globals(), value)
    }

    /// Like [`value_of`](Self::value_of) but reports unknown values instead
    /// of failing.
    fn lookup(value: NativeHandle) -> BridgeResult<EnumLookup<Self>> {
        let bridge = Bridge::global()?;
        Self::lookup_with(bridge.globals(), value)
    }
}

impl<E: GlobalValueEnum> GlobalValueEnumExt for E {}

impl Bridge {
    /// The backing value of `variant` in this bridge.
    pub fn enum_value<E: GlobalValueEnum>(&self, variant: E) -> BridgeResult<Option<NativeHandle>> {
        variant.value_with(self.globals())
    }

    /// The variant of `E` whose backing value in this bridge is `value`.
    pub fn enum_value_of<E: GlobalValueEnum>(&self, value: NativeHandle) -> BridgeResult<E> {
        E::value_of_with(self.globals(), value)
    }

    pub fn enum_lookup<E: GlobalValueEnum>(
        &self,
        value: NativeHandle,
    ) -> BridgeResult<EnumLookup<E>> {
        E::lookup_with(self.globals(), value)
    }
}
