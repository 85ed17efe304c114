//! Scalar marshaling.
//!
//! Integers accept any native integer shape and fail with
//! [`MarshalError::IntegerOverflow`] when the value does not fit.

use crate::abi::NativeType;
use crate::error::MarshalError;
use crate::flags::MarshalFlags;
use crate::handle::NativeHandle;
use crate::marshal::{
    FromNative, MarshalContext, NativeTyped, ToNative, consume_retain, expect_pointer,
};
use crate::selector::Selector;
use crate::value::{MachineFloat, NativeValue};

fn integer(value: &NativeValue, target_type: &'static str) -> Result<i128, MarshalError> {
    match value {
        NativeValue::Bool(b) => Ok(*b as i128),
        other => other.as_integer().ok_or(MarshalError::TypeMismatch {
            expected: target_type,
            actual: other.type_name(),
        }),
    }
}

macro_rules! impl_integer {
    ($($ty:ty => $native:ident, $variant:ident, $name:literal;)*) => {$(
        impl NativeTyped for $ty {
            fn native_type() -> NativeType {
                NativeType::$native
            }
        }

        impl ToNative for $ty {
            fn to_native(
                &self,
                _cx: &MarshalContext<'_>,
                _flags: MarshalFlags,
            ) -> Result<NativeValue, MarshalError> {
                Ok(NativeValue::$variant(*self))
            }
        }

        impl FromNative for $ty {
            fn from_native(
                _cx: &MarshalContext<'_>,
                value: NativeValue,
                _flags: MarshalFlags,
            ) -> Result<Self, MarshalError> {
                let wide = integer(&value, $name)?;
                <$ty>::try_from(wide).map_err(|_| MarshalError::IntegerOverflow {
                    value: wide,
                    target_type: $name,
                })
            }
        }
    )*};
}

impl_integer! {
    i8 => I8, I8, "int8";
    u8 => U8, U8, "uint8";
    i16 => I16, I16, "int16";
    u16 => U16, U16, "uint16";
    i32 => I32, I32, "int32";
    u32 => U32, U32, "uint32";
    i64 => I64, I64, "int64";
    u64 => U64, U64, "uint64";
}

// Machine-sized integers are as wide as a pointer on the runtime's ABI,
// which may be narrower than the host's.
macro_rules! impl_machine_integer {
    ($($ty:ty => $native:ident, $variant:ident, $fits:ident, $name:literal;)*) => {$(
        impl NativeTyped for $ty {
            fn native_type() -> NativeType {
                NativeType::$native
            }
        }

        impl ToNative for $ty {
            fn to_native(
                &self,
                cx: &MarshalContext<'_>,
                _flags: MarshalFlags,
            ) -> Result<NativeValue, MarshalError> {
                let wide = *self as i128;
                if cx.abi().$fits(wide) {
                    Ok(NativeValue::$variant(*self))
                } else {
                    Err(MarshalError::IntegerOverflow {
                        value: wide,
                        target_type: $name,
                    })
                }
            }
        }

        impl FromNative for $ty {
            fn from_native(
                cx: &MarshalContext<'_>,
                value: NativeValue,
                _flags: MarshalFlags,
            ) -> Result<Self, MarshalError> {
                let wide = integer(&value, $name)?;
                let overflow = MarshalError::IntegerOverflow {
                    value: wide,
                    target_type: $name,
                };
                if !cx.abi().$fits(wide) {
                    return Err(overflow);
                }
                <$ty>::try_from(wide).map_err(|_| overflow)
            }
        }
    )*};
}

impl_machine_integer! {
    isize => MachineSInt, ISize, fits_machine_sint, "NSInteger";
    usize => MachineUInt, USize, fits_machine_uint, "NSUInteger";
}

impl NativeTyped for bool {
    fn native_type() -> NativeType {
        NativeType::Bool
    }
}

impl ToNative for bool {
    fn to_native(
        &self,
        _cx: &MarshalContext<'_>,
        _flags: MarshalFlags,
    ) -> Result<NativeValue, MarshalError> {
        Ok(NativeValue::Bool(*self))
    }
}

/// `BOOL` may come back as a `signed char`: any non-zero integer is true.
impl FromNative for bool {
    fn from_native(
        _cx: &MarshalContext<'_>,
        value: NativeValue,
        _flags: MarshalFlags,
    ) -> Result<Self, MarshalError> {
        match value {
            NativeValue::Bool(b) => Ok(b),
            other => other.as_integer().map(|v| v != 0).ok_or(MarshalError::TypeMismatch {
                expected: "bool",
                actual: other.type_name(),
            }),
        }
    }
}

impl NativeTyped for f32 {
    fn native_type() -> NativeType {
        NativeType::F32
    }
}

impl ToNative for f32 {
    fn to_native(
        &self,
        _cx: &MarshalContext<'_>,
        _flags: MarshalFlags,
    ) -> Result<NativeValue, MarshalError> {
        Ok(NativeValue::F32(*self))
    }
}

impl FromNative for f32 {
    fn from_native(
        _cx: &MarshalContext<'_>,
        value: NativeValue,
        _flags: MarshalFlags,
    ) -> Result<Self, MarshalError> {
        match value {
            NativeValue::F32(v) => Ok(v),
            NativeValue::F64(v) => Ok(v as f32),
            other => Err(MarshalError::TypeMismatch {
                expected: "float",
                actual: other.type_name(),
            }),
        }
    }
}

impl NativeTyped for f64 {
    fn native_type() -> NativeType {
        NativeType::F64
    }
}

impl ToNative for f64 {
    fn to_native(
        &self,
        _cx: &MarshalContext<'_>,
        _flags: MarshalFlags,
    ) -> Result<NativeValue, MarshalError> {
        Ok(NativeValue::F64(*self))
    }
}

impl FromNative for f64 {
    fn from_native(
        _cx: &MarshalContext<'_>,
        value: NativeValue,
        _flags: MarshalFlags,
    ) -> Result<Self, MarshalError> {
        match value {
            NativeValue::F64(v) => Ok(v),
            NativeValue::F32(v) => Ok(v as f64),
            other => Err(MarshalError::TypeMismatch {
                expected: "double",
                actual: other.type_name(),
            }),
        }
    }
}

impl NativeTyped for MachineFloat {
    fn native_type() -> NativeType {
        NativeType::MachineFloat
    }
}

/// Narrowed to `float` on 32-bit targets.
impl ToNative for MachineFloat {
    fn to_native(
        &self,
        cx: &MarshalContext<'_>,
        _flags: MarshalFlags,
    ) -> Result<NativeValue, MarshalError> {
        Ok(self.for_abi(&cx.abi()))
    }
}

impl FromNative for MachineFloat {
    fn from_native(
        cx: &MarshalContext<'_>,
        value: NativeValue,
        flags: MarshalFlags,
    ) -> Result<Self, MarshalError> {
        f64::from_native(cx, value, flags)
            .map(MachineFloat)
            .map_err(|_| MarshalError::TypeMismatch {
                expected: "CGFloat",
                actual: "non-float",
            })
    }
}

impl NativeTyped for NativeHandle {
    fn native_type() -> NativeType {
        NativeType::Pointer
    }
}

impl ToNative for NativeHandle {
    fn to_native(
        &self,
        _cx: &MarshalContext<'_>,
        _flags: MarshalFlags,
    ) -> Result<NativeValue, MarshalError> {
        Ok(NativeValue::Pointer(*self))
    }
}

/// Raw handles pass through untouched; ownership stays with the caller.
impl FromNative for NativeHandle {
    fn from_native(
        _cx: &MarshalContext<'_>,
        value: NativeValue,
        _flags: MarshalFlags,
    ) -> Result<Self, MarshalError> {
        expect_pointer(value)
    }
}

impl NativeTyped for Selector {
    fn native_type() -> NativeType {
        NativeType::Selector
    }
}

impl ToNative for Selector {
    fn to_native(
        &self,
        _cx: &MarshalContext<'_>,
        _flags: MarshalFlags,
    ) -> Result<NativeValue, MarshalError> {
        Ok(NativeValue::Selector(self.clone()))
    }
}

impl FromNative for Selector {
    fn from_native(
        _cx: &MarshalContext<'_>,
        value: NativeValue,
        _flags: MarshalFlags,
    ) -> Result<Self, MarshalError> {
        match value {
            NativeValue::Selector(sel) => Ok(sel),
            other => Err(MarshalError::TypeMismatch {
                expected: "SEL",
                actual: other.type_name(),
            }),
        }
    }
}

impl NativeTyped for () {
    fn native_type() -> NativeType {
        NativeType::Void
    }
}

impl ToNative for () {
    fn to_native(
        &self,
        _cx: &MarshalContext<'_>,
        _flags: MarshalFlags,
    ) -> Result<NativeValue, MarshalError> {
        Ok(NativeValue::Void)
    }
}

/// Any return value may be discarded. A discarded +1 object is released.
impl FromNative for () {
    fn from_native(
        cx: &MarshalContext<'_>,
        value: NativeValue,
        flags: MarshalFlags,
    ) -> Result<Self, MarshalError> {
        if let NativeValue::Pointer(handle) = value
            && !handle.is_null()
        {
            consume_retain(cx, handle, flags);
        }
        Ok(())
    }
}
