//! Values exchanged with the native runtime.

use std::fmt;

use crate::abi::{NativeType, TargetAbi};
use crate::handle::NativeHandle;
use crate::layout::StructMemory;
use crate::selector::Selector;

/// One argument or return value of a native call, already marshaled.
///
/// Object, class and C-string values are all carried as
/// [`NativeValue::Pointer`]; the declared [`NativeType`] of the entry point
/// says how to interpret the address.
#[derive(Clone, PartialEq)]
pub enum NativeValue {
    Void,
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    ISize(isize),
    USize(usize),
    F32(f32),
    F64(f64),
    Pointer(NativeHandle),
    Selector(Selector),
    Struct(StructMemory),
}

impl NativeValue {
    /// Name of the value's shape, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            NativeValue::Void => "void",
            NativeValue::Bool(_) => "bool",
            NativeValue::I8(_) => "int8",
            NativeValue::U8(_) => "uint8",
            NativeValue::I16(_) => "int16",
            NativeValue::U16(_) => "uint16",
            NativeValue::I32(_) => "int32",
            NativeValue::U32(_) => "uint32",
            NativeValue::I64(_) => "int64",
            NativeValue::U64(_) => "uint64",
            NativeValue::ISize(_) => "NSInteger",
            NativeValue::USize(_) => "NSUInteger",
            NativeValue::F32(_) => "float",
            NativeValue::F64(_) => "double",
            NativeValue::Pointer(_) => "pointer",
            NativeValue::Selector(_) => "SEL",
            NativeValue::Struct(_) => "struct",
        }
    }

    /// Whether this value can be passed where `ty` is declared.
    pub fn conforms_to(&self, ty: &NativeType, abi: &TargetAbi) -> bool {
        match (self, ty) {
            (NativeValue::Void, NativeType::Void) => true,
            (NativeValue::Bool(_), NativeType::Bool) => true,
            (NativeValue::I8(_), NativeType::I8) => true,
            (NativeValue::U8(_), NativeType::U8) => true,
            (NativeValue::I16(_), NativeType::I16) => true,
            (NativeValue::U16(_), NativeType::U16) => true,
            (NativeValue::I32(_), NativeType::I32) => true,
            (NativeValue::U32(_), NativeType::U32) => true,
            (NativeValue::I64(_), NativeType::I64) => true,
            (NativeValue::U64(_), NativeType::U64) => true,
            (NativeValue::ISize(_), NativeType::MachineSInt) => true,
            (NativeValue::USize(_), NativeType::MachineUInt) => true,
            (NativeValue::F32(_), NativeType::F32) => true,
            (NativeValue::F64(_), NativeType::F64) => true,
            (NativeValue::F32(_), NativeType::MachineFloat) => !abi.machine_float_is_double(),
            (NativeValue::F64(_), NativeType::MachineFloat) => abi.machine_float_is_double(),
            (NativeValue::Pointer(_), t) => t.is_pointer_like() && *t != NativeType::Selector,
            (NativeValue::Selector(_), NativeType::Selector) => true,
            (NativeValue::Struct(mem), NativeType::Struct(desc)) => {
                mem.descriptor().as_ref() == desc.as_ref()
            }
            _ => false,
        }
    }

    /// The handle carried by a pointer value.
    pub fn as_handle(&self) -> Option<NativeHandle> {
        match self {
            NativeValue::Pointer(h) => Some(*h),
            _ => None,
        }
    }

    /// Integer payload widened to `i128`, for any integer shape.
    pub fn as_integer(&self) -> Option<i128> {
        match *self {
            NativeValue::I8(v) => Some(v as i128),
            NativeValue::U8(v) => Some(v as i128),
            NativeValue::I16(v) => Some(v as i128),
            NativeValue::U16(v) => Some(v as i128),
            NativeValue::I32(v) => Some(v as i128),
            NativeValue::U32(v) => Some(v as i128),
            NativeValue::I64(v) => Some(v as i128),
            NativeValue::U64(v) => Some(v as i128),
            NativeValue::ISize(v) => Some(v as i128),
            NativeValue::USize(v) => Some(v as i128),
            _ => None,
        }
    }
}

impl fmt::Debug for NativeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeValue::Void => write!(f, "Void"),
            NativeValue::Bool(v) => write!(f, "Bool({})", v),
            NativeValue::I8(v) => write!(f, "I8({})", v),
            NativeValue::U8(v) => write!(f, "U8({})", v),
            NativeValue::I16(v) => write!(f, "I16({})", v),
            NativeValue::U16(v) => write!(f, "U16({})", v),
            NativeValue::I32(v) => write!(f, "I32({})", v),
            NativeValue::U32(v) => write!(f, "U32({})", v),
            NativeValue::I64(v) => write!(f, "I64({})", v),
            NativeValue::U64(v) => write!(f, "U64({})", v),
            NativeValue::ISize(v) => write!(f, "ISize({})", v),
            NativeValue::USize(v) => write!(f, "USize({})", v),
            NativeValue::F32(v) => write!(f, "F32({})", v),
            NativeValue::F64(v) => write!(f, "F64({})", v),
            NativeValue::Pointer(h) => write!(f, "Pointer({})", h),
            NativeValue::Selector(s) => write!(f, "{:?}", s),
            NativeValue::Struct(m) => write!(f, "Struct({})", m.descriptor().name()),
        }
    }
}

/// `CGFloat`: a float whose width follows the target's pointer width.
///
/// Managed code always sees an `f64`; the value is narrowed to `float` when
/// written for a 32-bit target.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
#[repr(transparent)]
pub struct MachineFloat(pub f64);

impl MachineFloat {
    /// Wrap a value.
    pub const fn new(value: f64) -> Self {
        MachineFloat(value)
    }

    /// The value.
    pub const fn get(self) -> f64 {
        self.0
    }

    /// The value as passed to a native call on `abi`.
    pub fn for_abi(self, abi: &TargetAbi) -> NativeValue {
        if abi.machine_float_is_double() {
            NativeValue::F64(self.0)
        } else {
            NativeValue::F32(self.0 as f32)
        }
    }
}

impl From<f64> for MachineFloat {
    fn from(value: f64) -> Self {
        MachineFloat(value)
    }
}

impl From<MachineFloat> for f64 {
    fn from(value: MachineFloat) -> Self {
        value.0
    }
}
