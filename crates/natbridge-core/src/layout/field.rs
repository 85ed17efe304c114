//! Scalar types that can be stored in struct members.

use std::fmt;

use crate::abi::{NativeType, TargetAbi};
use crate::handle::NativeHandle;
use crate::value::MachineFloat;

/// A scalar that can be read from and written to struct memory.
///
/// `read` and `write` receive exactly the member's element bytes, whose
/// length is the element width on the descriptor's ABI. Values use the host
/// byte order.
pub trait StructField: Copy + fmt::Debug {
    /// Name used in error messages.
    const TYPE_NAME: &'static str;

    /// The canonical member type for this Rust type.
    fn native_type() -> NativeType;

    /// Whether a member declared as `ty` holds this Rust type.
    fn matches(ty: &NativeType) -> bool;

    fn read(bytes: &[u8], abi: &TargetAbi) -> Self;

    /// Whether the value is representable at the member's width on `abi`.
    /// `write` is only called with values that fit.
    fn fits(self, _abi: &TargetAbi) -> bool {
        true
    }

    fn write(self, bytes: &mut [u8], abi: &TargetAbi);
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

macro_rules! impl_struct_field {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl StructField for $ty {
                const TYPE_NAME: &'static str = stringify!($ty);

                fn native_type() -> NativeType {
                    NativeType::$variant
                }

                fn matches(ty: &NativeType) -> bool {
                    matches!(ty, NativeType::$variant)
                }

                fn read(bytes: &[u8], _abi: &TargetAbi) -> Self {
                    <$ty>::from_ne_bytes(array(bytes))
                }

                fn write(self, bytes: &mut [u8], _abi: &TargetAbi) {
                    bytes[..std::mem::size_of::<$ty>()].copy_from_slice(&self.to_ne_bytes());
                }
            }
        )*
    };
}

impl_struct_field!(
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
);

impl StructField for bool {
    const TYPE_NAME: &'static str = "bool";

    fn native_type() -> NativeType {
        NativeType::Bool
    }

    fn matches(ty: &NativeType) -> bool {
        matches!(ty, NativeType::Bool)
    }

    fn read(bytes: &[u8], _abi: &TargetAbi) -> Self {
        bytes[0] != 0
    }

    fn write(self, bytes: &mut [u8], _abi: &TargetAbi) {
        bytes[0] = self as u8;
    }
}

// Machine-sized members are as wide as a pointer on the descriptor's ABI,
// which may be narrower than the host's.

impl StructField for isize {
    const TYPE_NAME: &'static str = "NSInteger";

    fn native_type() -> NativeType {
        NativeType::MachineSInt
    }

    fn matches(ty: &NativeType) -> bool {
        matches!(ty, NativeType::MachineSInt)
    }

    fn fits(self, abi: &TargetAbi) -> bool {
        abi.fits_machine_sint(self as i128)
    }

    fn read(bytes: &[u8], abi: &TargetAbi) -> Self {
        if abi.pointer_width == 4 {
            i32::from_ne_bytes(array(bytes)) as isize
        } else {
            i64::from_ne_bytes(array(bytes)) as isize
        }
    }

    fn write(self, bytes: &mut [u8], abi: &TargetAbi) {
        if abi.pointer_width == 4 {
            bytes[..4].copy_from_slice(&(self as i32).to_ne_bytes());
        } else {
            bytes[..8].copy_from_slice(&(self as i64).to_ne_bytes());
        }
    }
}

impl StructField for usize {
    const TYPE_NAME: &'static str = "NSUInteger";

    fn native_type() -> NativeType {
        NativeType::MachineUInt
    }

    fn matches(ty: &NativeType) -> bool {
        matches!(ty, NativeType::MachineUInt)
    }

    fn fits(self, abi: &TargetAbi) -> bool {
        abi.fits_machine_uint(self as i128)
    }

    fn read(bytes: &[u8], abi: &TargetAbi) -> Self {
        if abi.pointer_width == 4 {
            u32::from_ne_bytes(array(bytes)) as usize
        } else {
            u64::from_ne_bytes(array(bytes)) as usize
        }
    }

    fn write(self, bytes: &mut [u8], abi: &TargetAbi) {
        if abi.pointer_width == 4 {
            bytes[..4].copy_from_slice(&(self as u32).to_ne_bytes());
        } else {
            bytes[..8].copy_from_slice(&(self as u64).to_ne_bytes());
        }
    }
}

impl StructField for NativeHandle {
    const TYPE_NAME: &'static str = "pointer";

    fn native_type() -> NativeType {
        NativeType::Pointer
    }

    fn matches(ty: &NativeType) -> bool {
        ty.is_pointer_like() && *ty != NativeType::Selector
    }

    fn fits(self, abi: &TargetAbi) -> bool {
        self.0.fits(abi)
    }

    fn read(bytes: &[u8], abi: &TargetAbi) -> Self {
        NativeHandle(usize::read(bytes, abi))
    }

    fn write(self, bytes: &mut [u8], abi: &TargetAbi) {
        self.0.write(bytes, abi)
    }
}

impl StructField for MachineFloat {
    const TYPE_NAME: &'static str = "CGFloat";

    fn native_type() -> NativeType {
        NativeType::MachineFloat
    }

    fn matches(ty: &NativeType) -> bool {
        matches!(ty, NativeType::MachineFloat)
    }

    fn read(bytes: &[u8], abi: &TargetAbi) -> Self {
        if abi.machine_float_is_double() {
            MachineFloat(f64::from_ne_bytes(array(bytes)))
        } else {
            MachineFloat(f32::from_ne_bytes(array(bytes)) as f64)
        }
    }

    fn write(self, bytes: &mut [u8], abi: &TargetAbi) {
        if abi.machine_float_is_double() {
            bytes[..8].copy_from_slice(&self.0.to_ne_bytes());
        } else {
            bytes[..4].copy_from_slice(&(self.0 as f32).to_ne_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_int_narrows_on_32_bit() {
        let mut bytes = [0u8; 4];
        (-5isize).write(&mut bytes, &TargetAbi::ILP32_ARM);
        assert_eq!(bytes, (-5i32).to_ne_bytes());
        assert_eq!(isize::read(&bytes, &TargetAbi::ILP32_ARM), -5);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn machine_int_range_follows_the_abi() {
        assert!((-5isize).fits(&TargetAbi::ILP32_ARM));
        assert!(!(1isize << 40).fits(&TargetAbi::ILP32_ARM));
        assert!((1isize << 40).fits(&TargetAbi::LP64));
        assert!(!(usize::MAX).fits(&TargetAbi::ILP32_X86));
        assert!(!NativeHandle(1 << 33).fits(&TargetAbi::ILP32_ARM));
    }

    #[test]
    fn machine_float_narrows_on_32_bit() {
        let mut bytes = [0u8; 4];
        MachineFloat(0.5).write(&mut bytes, &TargetAbi::ILP32_X86);
        assert_eq!(
            MachineFloat::read(&bytes, &TargetAbi::ILP32_X86),
            MachineFloat(0.5)
        );

        let mut wide = [0u8; 8];
        MachineFloat(0.1).write(&mut wide, &TargetAbi::LP64);
        assert_eq!(
            MachineFloat::read(&wide, &TargetAbi::LP64),
            MachineFloat(0.1)
        );
    }

    #[test]
    fn handles_match_pointer_like_members() {
        assert!(NativeHandle::matches(&NativeType::Object));
        assert!(NativeHandle::matches(&NativeType::Pointer));
        assert!(!NativeHandle::matches(&NativeType::MachineUInt));
        assert!(!usize::matches(&NativeType::Pointer));
    }
}
