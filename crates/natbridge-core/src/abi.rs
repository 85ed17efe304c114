//! Target ABI description and native type model.
//!
//! A [`TargetAbi`] captures the platform facts struct layout and marshaling
//! depend on: pointer width and the alignment of 8-byte scalars (which is 4
//! on 32-bit x86). [`NativeType`] describes one native value type, and
//! [`TypeEncoding`] is its Objective-C type encoding character.

use std::fmt;
use std::sync::Arc;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::RuntimeError;
use crate::layout::StructDescriptor;

/// Platform layout rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetAbi {
    /// Size of a pointer and of machine-sized integers, in bytes.
    pub pointer_width: usize,
    /// Alignment of `int64_t` / `uint64_t`.
    pub int64_align: usize,
    /// Alignment of `double`.
    pub double_align: usize,
}

impl TargetAbi {
    /// 64-bit platforms (arm64, x86_64).
    pub const LP64: TargetAbi = TargetAbi {
        pointer_width: 8,
        int64_align: 8,
        double_align: 8,
    };

    /// 32-bit ARM: 8-byte scalars are 8-byte aligned.
    pub const ILP32_ARM: TargetAbi = TargetAbi {
        pointer_width: 4,
        int64_align: 8,
        double_align: 8,
    };

    /// 32-bit x86: 8-byte scalars are only 4-byte aligned inside structs.
    pub const ILP32_X86: TargetAbi = TargetAbi {
        pointer_width: 4,
        int64_align: 4,
        double_align: 4,
    };

    /// The ABI of the running process.
    pub const fn host() -> TargetAbi {
        if cfg!(target_pointer_width = "64") {
            TargetAbi::LP64
        } else if cfg!(target_arch = "x86") {
            TargetAbi::ILP32_X86
        } else {
            TargetAbi::ILP32_ARM
        }
    }

    /// Whether this ABI's layout matches the running process, so memory laid
    /// out for it can be handed to native code directly.
    pub fn is_host(&self) -> bool {
        *self == TargetAbi::host()
    }

    /// Whether `MachineFloat` is a `double` on this ABI.
    pub fn machine_float_is_double(&self) -> bool {
        self.pointer_width == 8
    }

    /// Whether `value` fits a signed machine-sized integer on this ABI.
    pub fn fits_machine_sint(&self, value: i128) -> bool {
        let bits = self.pointer_width as u32 * 8;
        let max = (1i128 << (bits - 1)) - 1;
        (-max - 1..=max).contains(&value)
    }

    /// Whether `value` fits an unsigned machine-sized integer (or a pointer)
    /// on this ABI.
    pub fn fits_machine_uint(&self, value: i128) -> bool {
        let bits = self.pointer_width as u32 * 8;
        (0..1i128 << bits).contains(&value)
    }

    /// Size of a value of `ty`, in bytes.
    pub fn size_of(&self, ty: &NativeType) -> usize {
        match ty {
            NativeType::Void => 0,
            NativeType::Bool | NativeType::I8 | NativeType::U8 => 1,
            NativeType::I16 | NativeType::U16 => 2,
            NativeType::I32 | NativeType::U32 | NativeType::F32 => 4,
            NativeType::I64 | NativeType::U64 | NativeType::F64 => 8,
            NativeType::MachineSInt
            | NativeType::MachineUInt
            | NativeType::Pointer
            | NativeType::Object
            | NativeType::Class
            | NativeType::Selector
            | NativeType::CString => self.pointer_width,
            NativeType::MachineFloat => {
                if self.machine_float_is_double() {
                    8
                } else {
                    4
                }
            }
            NativeType::Struct(desc) => desc.size(),
        }
    }

    /// Alignment of a value of `ty` inside a struct, in bytes.
    pub fn align_of(&self, ty: &NativeType) -> usize {
        match ty {
            NativeType::Void => 1,
            NativeType::I64 | NativeType::U64 => self.int64_align,
            NativeType::F64 => self.double_align,
            NativeType::MachineFloat if self.machine_float_is_double() => self.double_align,
            NativeType::Struct(desc) => desc.align(),
            other => self.size_of(other),
        }
    }
}

impl Default for TargetAbi {
    fn default() -> Self {
        TargetAbi::host()
    }
}

/// A native value type as it appears in method signatures and struct members.
#[derive(Clone, PartialEq)]
pub enum NativeType {
    Void,
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    /// Pointer-width signed integer (`NSInteger`).
    MachineSInt,
    /// Pointer-width unsigned integer (`NSUInteger`).
    MachineUInt,
    /// `CGFloat`: `double` on 64-bit targets, `float` on 32-bit ones.
    MachineFloat,
    /// Untyped pointer (`void *`).
    Pointer,
    /// Object reference (`id`).
    Object,
    /// Class reference (`Class`).
    Class,
    /// Selector (`SEL`).
    Selector,
    /// NUL-terminated C string (`char *`).
    CString,
    /// Struct passed or stored by value.
    Struct(Arc<StructDescriptor>),
}

impl NativeType {
    /// Short human-readable name.
    pub fn name(&self) -> &str {
        match self {
            NativeType::Void => "void",
            NativeType::Bool => "bool",
            NativeType::I8 => "int8",
            NativeType::U8 => "uint8",
            NativeType::I16 => "int16",
            NativeType::U16 => "uint16",
            NativeType::I32 => "int32",
            NativeType::U32 => "uint32",
            NativeType::I64 => "int64",
            NativeType::U64 => "uint64",
            NativeType::F32 => "float",
            NativeType::F64 => "double",
            NativeType::MachineSInt => "NSInteger",
            NativeType::MachineUInt => "NSUInteger",
            NativeType::MachineFloat => "CGFloat",
            NativeType::Pointer => "pointer",
            NativeType::Object => "id",
            NativeType::Class => "Class",
            NativeType::Selector => "SEL",
            NativeType::CString => "char*",
            NativeType::Struct(desc) => desc.name(),
        }
    }

    /// Whether values of this type are passed as a single machine word
    /// holding an address.
    pub fn is_pointer_like(&self) -> bool {
        matches!(
            self,
            NativeType::Pointer
                | NativeType::Object
                | NativeType::Class
                | NativeType::Selector
                | NativeType::CString
        )
    }

    /// Objective-C type encoding for this type on `abi`.
    pub fn encoding(&self, abi: &TargetAbi) -> TypeEncoding {
        match self {
            NativeType::Void => TypeEncoding::Void,
            NativeType::Bool => TypeEncoding::Bool,
            NativeType::I8 => TypeEncoding::Char,
            NativeType::U8 => TypeEncoding::UChar,
            NativeType::I16 => TypeEncoding::Short,
            NativeType::U16 => TypeEncoding::UShort,
            NativeType::I32 => TypeEncoding::Int,
            NativeType::U32 => TypeEncoding::UInt,
            NativeType::I64 => TypeEncoding::LongLong,
            NativeType::U64 => TypeEncoding::ULongLong,
            NativeType::F32 => TypeEncoding::Float,
            NativeType::F64 => TypeEncoding::Double,
            NativeType::MachineSInt if abi.pointer_width == 8 => TypeEncoding::LongLong,
            NativeType::MachineSInt => TypeEncoding::Int,
            NativeType::MachineUInt if abi.pointer_width == 8 => TypeEncoding::ULongLong,
            NativeType::MachineUInt => TypeEncoding::UInt,
            NativeType::MachineFloat if abi.machine_float_is_double() => TypeEncoding::Double,
            NativeType::MachineFloat => TypeEncoding::Float,
            NativeType::Pointer => TypeEncoding::Pointer,
            NativeType::Object => TypeEncoding::Object,
            NativeType::Class => TypeEncoding::Class,
            NativeType::Selector => TypeEncoding::Selector,
            NativeType::CString => TypeEncoding::CString,
            NativeType::Struct(_) => TypeEncoding::StructBegin,
        }
    }
}

impl fmt::Debug for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Objective-C type encoding characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum TypeEncoding {
    Void = b'v',
    Bool = b'B',
    Char = b'c',
    UChar = b'C',
    Short = b's',
    UShort = b'S',
    Int = b'i',
    UInt = b'I',
    Long = b'l',
    ULong = b'L',
    LongLong = b'q',
    ULongLong = b'Q',
    Float = b'f',
    Double = b'd',
    Object = b'@',
    Class = b'#',
    Selector = b':',
    CString = b'*',
    Pointer = b'^',
    StructBegin = b'{',
    Unknown = b'?',
}

impl TypeEncoding {
    /// The encoding character.
    pub fn as_char(self) -> char {
        u8::from(self) as char
    }
}

/// Build the method type encoding for a method returning `ret` and taking
/// `args` after the implicit `self` and `_cmd`, e.g. `"q@:@q"`.
pub fn method_encoding(abi: &TargetAbi, ret: &NativeType, args: &[NativeType]) -> String {
    let mut out = String::with_capacity(args.len() + 3);
    out.push(ret.encoding(abi).as_char());
    out.push(TypeEncoding::Object.as_char());
    out.push(TypeEncoding::Selector.as_char());
    for arg in args {
        out.push(arg.encoding(abi).as_char());
    }
    out
}

/// Parse a method type encoding into its return and argument encodings,
/// dropping the implicit `self` and `_cmd`.
///
/// Only flat encodings are accepted: pointer targets and struct bodies are
/// not descended into.
pub fn parse_method_encoding(
    encoding: &str,
) -> Result<(TypeEncoding, Vec<TypeEncoding>), RuntimeError> {
    let invalid = |reason: &str| RuntimeError::InvalidEncoding {
        encoding: encoding.to_string(),
        reason: reason.to_string(),
    };

    let mut parts = Vec::with_capacity(encoding.len());
    for b in encoding.bytes() {
        // Frame offsets emitted by the compiler are skipped
        if b.is_ascii_digit() {
            continue;
        }
        let enc = TypeEncoding::try_from(b)
            .map_err(|_| invalid(&format!("unknown type code `{}`", b as char)))?;
        parts.push(enc);
    }

    if parts.len() < 3 {
        return Err(invalid("missing return type, self or _cmd"));
    }
    if parts[1] != TypeEncoding::Object || parts[2] != TypeEncoding::Selector {
        return Err(invalid("second and third entries must be `@:`"));
    }
    let ret = parts[0];
    let args = parts.split_off(3);
    Ok((ret, args))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_sized_follow_pointer_width() {
        assert_eq!(TargetAbi::LP64.size_of(&NativeType::MachineSInt), 8);
        assert_eq!(TargetAbi::ILP32_ARM.size_of(&NativeType::MachineSInt), 4);
        assert_eq!(TargetAbi::LP64.size_of(&NativeType::MachineFloat), 8);
        assert_eq!(TargetAbi::ILP32_ARM.size_of(&NativeType::MachineFloat), 4);
        assert_eq!(TargetAbi::ILP32_X86.size_of(&NativeType::Object), 4);
    }

    #[test]
    fn machine_int_ranges() {
        let abi = TargetAbi::ILP32_ARM;
        assert!(abi.fits_machine_sint(i32::MIN as i128));
        assert!(!abi.fits_machine_sint(1 << 40));
        assert!(abi.fits_machine_uint(u32::MAX as i128));
        assert!(!abi.fits_machine_uint(-1));
        assert!(TargetAbi::LP64.fits_machine_sint(i64::MIN as i128));
        assert!(TargetAbi::LP64.fits_machine_uint(u64::MAX as i128));
    }

    #[test]
    fn x86_aligns_doubles_to_four() {
        assert_eq!(TargetAbi::ILP32_X86.align_of(&NativeType::F64), 4);
        assert_eq!(TargetAbi::ILP32_X86.align_of(&NativeType::I64), 4);
        assert_eq!(TargetAbi::ILP32_ARM.align_of(&NativeType::F64), 8);
        assert_eq!(TargetAbi::LP64.align_of(&NativeType::U16), 2);
    }

    #[test]
    fn host_abi_matches_process() {
        let host = TargetAbi::host();
        assert_eq!(host.pointer_width, std::mem::size_of::<usize>());
        assert!(host.is_host());
    }

    #[test]
    fn encoding_for_machine_types() {
        assert_eq!(
            NativeType::MachineSInt.encoding(&TargetAbi::LP64),
            TypeEncoding::LongLong
        );
        assert_eq!(
            NativeType::MachineSInt.encoding(&TargetAbi::ILP32_ARM),
            TypeEncoding::Int
        );
        assert_eq!(
            NativeType::MachineFloat.encoding(&TargetAbi::ILP32_ARM),
            TypeEncoding::Float
        );
    }

    #[test]
    fn build_method_encoding() {
        let enc = method_encoding(
            &TargetAbi::LP64,
            &NativeType::MachineSInt,
            &[NativeType::Object, NativeType::MachineSInt],
        );
        assert_eq!(enc, "q@:@q");
    }

    #[test]
    fn parse_encoding_round_trip() {
        let (ret, args) = parse_method_encoding("v@:@q").unwrap();
        assert_eq!(ret, TypeEncoding::Void);
        assert_eq!(args, vec![TypeEncoding::Object, TypeEncoding::LongLong]);
    }

    #[test]
    fn parse_encoding_skips_offsets() {
        let (ret, args) = parse_method_encoding("B24@0:8:16").unwrap();
        assert_eq!(ret, TypeEncoding::Bool);
        assert_eq!(args, vec![TypeEncoding::Selector]);
    }

    #[test]
    fn parse_encoding_rejects_garbage() {
        let err = parse_method_encoding("v@:x").unwrap_err();
        assert!(err.to_string().contains("unknown type code"));
        assert!(parse_method_encoding("v@").is_err());
        assert!(parse_method_encoding("vq:").is_err());
    }
}
