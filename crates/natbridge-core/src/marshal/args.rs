//! Argument lists for native calls.

use crate::abi::NativeType;
use crate::error::MarshalError;
use crate::flags::MarshalFlags;
use crate::handle::NativeHandle;
use crate::marshal::{MarshalContext, ToNative};
use crate::value::{MachineFloat, NativeValue};

/// One argument of a native call.
///
/// Implemented for references to every [`ToNative`] type and for scalars
/// by value, so calls read `(&name, 3u32, &list)`.
pub trait NativeArg {
    fn arg_type() -> NativeType;

    fn to_arg(&self, cx: &MarshalContext<'_>) -> Result<NativeValue, MarshalError>;
}

impl<T: ToNative + ?Sized> NativeArg for &T {
    fn arg_type() -> NativeType {
        T::native_type()
    }

    fn to_arg(&self, cx: &MarshalContext<'_>) -> Result<NativeValue, MarshalError> {
        (**self).to_native(cx, MarshalFlags::empty())
    }
}

macro_rules! impl_by_value {
    ($($ty:ty),*) => {$(
        impl NativeArg for $ty {
            fn arg_type() -> NativeType {
                <$ty as crate::marshal::NativeTyped>::native_type()
            }

            fn to_arg(&self, cx: &MarshalContext<'_>) -> Result<NativeValue, MarshalError> {
                ToNative::to_native(self, cx, MarshalFlags::empty())
            }
        }
    )*};
}

impl_by_value!(bool, i8, u8, i16, u16, i32, u32, i64, u64);
impl_by_value!(isize, usize, f32, f64, MachineFloat, NativeHandle);

/// A complete argument list: a tuple of [`NativeArg`]s.
pub trait NativeArgs {
    /// Declared native types, in order.
    fn arg_types() -> Vec<NativeType>;

    /// Convert every argument. Fails on the first argument that does not
    /// convert, naming its position.
    ///
    /// Arguments are borrowed: none carries a +1, so a failure leaves
    /// nothing to release.
    fn to_values(&self, cx: &MarshalContext<'_>) -> Result<Vec<NativeValue>, MarshalError>;
}

impl NativeArgs for () {
    fn arg_types() -> Vec<NativeType> {
        Vec::new()
    }

    fn to_values(&self, _cx: &MarshalContext<'_>) -> Result<Vec<NativeValue>, MarshalError> {
        Ok(Vec::new())
    }
}

macro_rules! impl_args_tuple {
    ($($name:ident $idx:tt),+) => {
        impl<$($name: NativeArg),+> NativeArgs for ($($name,)+) {
            fn arg_types() -> Vec<NativeType> {
                vec![$($name::arg_type()),+]
            }

            fn to_values(&self, cx: &MarshalContext<'_>) -> Result<Vec<NativeValue>, MarshalError> {
                Ok(vec![$(self.$idx.to_arg(cx).map_err(|err| err.at_argument($idx))?),+])
            }
        }
    };
}

impl_args_tuple!(A 0);
impl_args_tuple!(A 0, B 1);
impl_args_tuple!(A 0, B 1, C 2);
impl_args_tuple!(A 0, B 1, C 2, D 3);
impl_args_tuple!(A 0, B 1, C 2, D 3, E 4);
impl_args_tuple!(A 0, B 1, C 2, D 3, E 4, F 5);
impl_args_tuple!(A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_args_tuple!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::test_support::{NO_GLOBALS, runtime};

    #[test]
    fn tuple_types_and_values() {
        let (inner, rt) = runtime();
        let cx = MarshalContext::new(&rt, &NO_GLOBALS);
        assert_eq!(
            <(&str, u32, bool)>::arg_types(),
            vec![NativeType::Object, NativeType::U32, NativeType::Bool]
        );
        let values = ("name", 3u32, true).to_values(&cx).unwrap();
        assert_eq!(values.len(), 3);
        let name = values[0].as_handle().unwrap();
        assert_eq!(inner.string_value(name).as_deref(), Some("name"));
        assert_eq!(values[1], NativeValue::U32(3));
        assert_eq!(values[2], NativeValue::Bool(true));
    }

    #[test]
    fn failing_argument_is_named() {
        let (_, rt) = runtime();
        let cx = MarshalContext::new(&rt, &NO_GLOBALS);
        let bad = "nul\0inside".to_string();
        let err = (1i32, &bad).to_values(&cx).unwrap_err();
        assert!(matches!(err, MarshalError::Argument { index: 1, .. }));
        assert!(().to_values(&cx).unwrap().is_empty());
    }
}
