//! Struct descriptors: the (offset, type, arity) table of a native struct.

use std::fmt;
use std::sync::Arc;

use crate::abi::{NativeType, TargetAbi};
use crate::error::LayoutError;

/// Number of elements a member occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arity {
    /// A single value.
    Scalar,
    /// A fixed-size inline array of `n` elements.
    Array(usize),
    /// A trailing array whose length is carried elsewhere (usually a count
    /// member). Occupies no space in the struct's size.
    Unbounded,
}

impl Arity {
    /// Arity for a declared array length, where 0 means unbounded.
    pub fn from_count(count: usize) -> Arity {
        if count == 0 {
            Arity::Unbounded
        } else {
            Arity::Array(count)
        }
    }

    /// Element count, `None` when unbounded.
    pub fn len(&self) -> Option<usize> {
        match self {
            Arity::Scalar => Some(1),
            Arity::Array(n) => Some(*n),
            Arity::Unbounded => None,
        }
    }
}

/// One laid-out member.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberLayout {
    ordinal: u32,
    name: String,
    ty: NativeType,
    arity: Arity,
    offset: usize,
    element_size: usize,
    element_align: usize,
}

impl MemberLayout {
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &NativeType {
        &self.ty
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    /// Byte offset of element 0.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    pub fn element_align(&self) -> usize {
        self.element_align
    }

    /// Bytes the member occupies inside the struct (0 when unbounded).
    pub fn byte_len(&self) -> usize {
        self.element_size * self.arity.len().unwrap_or(0)
    }

    /// Byte offset of element `index`, or `None` if it overflows `usize`.
    pub fn element_offset(&self, index: usize) -> Option<usize> {
        index
            .checked_mul(self.element_size)
            .and_then(|delta| self.offset.checked_add(delta))
    }
}

/// Layout of one native struct type for one ABI.
///
/// Members sharing an ordinal form a union: they all start at the same
/// offset and the group occupies the size of its largest member.
#[derive(Clone, PartialEq)]
pub struct StructDescriptor {
    name: String,
    abi: TargetAbi,
    members: Vec<MemberLayout>,
    size: usize,
    align: usize,
}

impl StructDescriptor {
    /// Start describing a struct.
    pub fn builder(name: impl Into<String>, abi: TargetAbi) -> StructDescriptorBuilder {
        StructDescriptorBuilder {
            name: name.into(),
            abi,
            pack: None,
            decls: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn abi(&self) -> TargetAbi {
        self.abi
    }

    /// Total size including tail padding.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn align(&self) -> usize {
        self.align
    }

    /// Members in ordinal order.
    pub fn members(&self) -> &[MemberLayout] {
        &self.members
    }

    /// Members declared at `ordinal` (more than one for a union).
    pub fn members_at(&self, ordinal: u32) -> impl Iterator<Item = &MemberLayout> {
        self.members.iter().filter(move |m| m.ordinal == ordinal)
    }

    /// First member declared at `ordinal`.
    pub fn member(&self, ordinal: u32) -> Option<&MemberLayout> {
        self.members_at(ordinal).next()
    }

    /// Member by name.
    pub fn member_named(&self, name: &str) -> Option<&MemberLayout> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Check the table against the platform's layout rules.
    ///
    /// Verifies every member is aligned for its type, members of different
    /// ordinals do not overlap and only move forward, union members share
    /// one offset, an unbounded array comes last, and the total size is a
    /// padded multiple of the alignment. Nested struct descriptors are
    /// checked recursively.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn validate(&self) -> Result<(), LayoutError> {
        let mut previous_end = 0usize;
        let mut group_end = 0usize;
        let mut current: Option<(u32, usize)> = None;

        for (i, m) in self.members.iter().enumerate() {
            if let NativeType::Struct(nested) = &m.ty {
                if nested.abi != self.abi {
                    return Err(LayoutError::AbiMismatch {
                        strukt: self.name.clone(),
                        nested: nested.name.clone(),
                    });
                }
                nested.validate()?;
            }

            if m.offset % m.element_align != 0 {
                return Err(LayoutError::Misaligned {
                    strukt: self.name.clone(),
                    member: m.name.clone(),
                    offset: m.offset,
                    align: m.element_align,
                });
            }

            match current {
                Some((ordinal, offset)) if ordinal == m.ordinal => {
                    if offset != m.offset {
                        return Err(LayoutError::UnionOffset {
                            strukt: self.name.clone(),
                            ordinal,
                        });
                    }
                }
                _ => {
                    previous_end = group_end;
                    if m.offset < previous_end {
                        return Err(LayoutError::Overlap {
                            strukt: self.name.clone(),
                            member: m.name.clone(),
                            offset: m.offset,
                            previous_end,
                        });
                    }
                    current = Some((m.ordinal, m.offset));
                }
            }
            group_end = group_end.max(m.offset + m.byte_len());

            if m.arity == Arity::Unbounded
                && self.members[i + 1..].iter().any(|o| o.ordinal != m.ordinal)
            {
                return Err(LayoutError::UnboundedNotLast {
                    strukt: self.name.clone(),
                    member: m.name.clone(),
                });
            }
        }

        if self.size % self.align != 0 || self.size < group_end {
            return Err(LayoutError::BadSize {
                strukt: self.name.clone(),
                size: self.size,
                align: self.align,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for StructDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructDescriptor")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("align", &self.align)
            .field("members", &self.members.len())
            .finish()
    }
}

struct MemberDecl {
    ordinal: u32,
    name: String,
    ty: NativeType,
    arity: Arity,
    offset: Option<usize>,
}

/// Builder for [`StructDescriptor`].
///
/// # Example
///
/// ```ignore
/// let point = StructDescriptor::builder("CGPoint", abi)
///     .member(0, "x", NativeType::MachineFloat)
///     .member(1, "y", NativeType::MachineFloat)
///     .build()?;
///
/// let region = StructDescriptor::builder("AudioFileRegion", abi)
///     .member(0, "regionID", NativeType::U32)
///     .member(1, "name", NativeType::Object)
///     .member(2, "flags", NativeType::U32)
///     .member(3, "numberMarkers", NativeType::U32)
///     .array(4, "markers", NativeType::Struct(marker), 1)
///     .build()?;
/// ```
pub struct StructDescriptorBuilder {
    name: String,
    abi: TargetAbi,
    pack: Option<usize>,
    decls: Vec<MemberDecl>,
}

impl StructDescriptorBuilder {
    /// Declare a scalar member.
    pub fn member(self, ordinal: u32, name: impl Into<String>, ty: NativeType) -> Self {
        self.push(ordinal, name.into(), ty, Arity::Scalar, None)
    }

    /// Declare an inline array member of `count` elements; 0 declares an
    /// unbounded trailing array.
    pub fn array(
        self,
        ordinal: u32,
        name: impl Into<String>,
        ty: NativeType,
        count: usize,
    ) -> Self {
        self.push(ordinal, name.into(), ty, Arity::from_count(count), None)
    }

    /// Declare a member at an explicit byte offset instead of the computed
    /// one. The declaration is checked by [`StructDescriptor::validate`].
    pub fn member_at(
        self,
        ordinal: u32,
        name: impl Into<String>,
        ty: NativeType,
        arity: Arity,
        offset: usize,
    ) -> Self {
        self.push(ordinal, name.into(), ty, arity, Some(offset))
    }

    /// Cap member alignment at `pack` bytes, like `#pragma pack(n)`.
    pub fn packed(mut self, pack: usize) -> Self {
        self.pack = Some(pack.max(1));
        self
    }

    fn push(
        mut self,
        ordinal: u32,
        name: String,
        ty: NativeType,
        arity: Arity,
        offset: Option<usize>,
    ) -> Self {
        self.decls.push(MemberDecl {
            ordinal,
            name,
            ty,
            arity,
            offset,
        });
        self
    }

    /// Lay out the members.
    ///
    /// Fails when a member type cannot be stored in a struct, a nested
    /// struct was laid out for another ABI, union members disagree on an
    /// explicit offset, or an unbounded array is not last. Alignment and
    /// overlap of explicit offsets are left to [`StructDescriptor::validate`].
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn build(mut self) -> Result<Arc<StructDescriptor>, LayoutError> {
        // Stable, so union members keep their declaration order
        self.decls.sort_by_key(|d| d.ordinal);

        let last_ordinal = self.decls.last().map(|d| d.ordinal);
        let mut members = Vec::with_capacity(self.decls.len());
        let mut cursor = 0usize;
        let mut struct_align = 1usize;

        let mut i = 0;
        while i < self.decls.len() {
            let ordinal = self.decls[i].ordinal;
            let group_len = self.decls[i..]
                .iter()
                .take_while(|d| d.ordinal == ordinal)
                .count();
            let group = &self.decls[i..i + group_len];

            let mut group_align = 1usize;
            let mut explicit: Option<usize> = None;
            for d in group {
                self.check_member_type(d)?;
                group_align = group_align.max(self.member_align(&d.ty));
                if let Some(off) = d.offset {
                    match explicit {
                        Some(prev) if prev != off => {
                            return Err(LayoutError::UnionOffset {
                                strukt: self.name.clone(),
                                ordinal,
                            });
                        }
                        _ => explicit = Some(off),
                    }
                }
                if d.arity == Arity::Unbounded && Some(ordinal) != last_ordinal {
                    return Err(LayoutError::UnboundedNotLast {
                        strukt: self.name.clone(),
                        member: d.name.clone(),
                    });
                }
            }

            let offset = explicit.unwrap_or_else(|| align_up(cursor, group_align));
            let mut end = offset;
            for d in group {
                let layout = MemberLayout {
                    ordinal,
                    name: d.name.clone(),
                    ty: d.ty.clone(),
                    arity: d.arity,
                    offset,
                    element_size: self.abi.size_of(&d.ty),
                    element_align: self.member_align(&d.ty),
                };
                end = end.max(offset + layout.byte_len());
                members.push(layout);
            }

            cursor = cursor.max(end);
            struct_align = struct_align.max(group_align);
            i += group_len;
        }

        let size = align_up(cursor, struct_align);
        log::trace!(
            "laid out struct {} ({} members, size {}, align {})",
            self.name,
            members.len(),
            size,
            struct_align
        );

        Ok(Arc::new(StructDescriptor {
            name: self.name,
            abi: self.abi,
            members,
            size,
            align: struct_align,
        }))
    }

    fn member_align(&self, ty: &NativeType) -> usize {
        let natural = self.abi.align_of(ty);
        match self.pack {
            Some(pack) => natural.min(pack),
            None => natural,
        }
    }

    fn check_member_type(&self, decl: &MemberDecl) -> Result<(), LayoutError> {
        match &decl.ty {
            NativeType::Void => Err(LayoutError::UnsupportedType {
                strukt: self.name.clone(),
                member: decl.name.clone(),
                ty: decl.ty.to_string(),
            }),
            NativeType::Struct(nested) if nested.abi != self.abi => Err(LayoutError::AbiMismatch {
                strukt: self.name.clone(),
                nested: nested.name.clone(),
            }),
            _ => Ok(()),
        }
    }
}

/// Round `offset` up to a multiple of `align`.
pub(crate) fn align_up(offset: usize, align: usize) -> usize {
    let align = align.max(1);
    offset.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offsets(desc: &StructDescriptor) -> Vec<usize> {
        desc.members().iter().map(|m| m.offset()).collect()
    }

    #[test]
    fn c_alignment_rules() {
        // struct { char c; int32_t i; int16_t s; double d; }
        let desc = StructDescriptor::builder("Mixed", TargetAbi::LP64)
            .member(0, "c", NativeType::I8)
            .member(1, "i", NativeType::I32)
            .member(2, "s", NativeType::I16)
            .member(3, "d", NativeType::F64)
            .build()
            .unwrap();
        assert_eq!(offsets(&desc), vec![0, 4, 8, 16]);
        assert_eq!(desc.size(), 24);
        assert_eq!(desc.align(), 8);
        desc.validate().unwrap();
    }

    #[test]
    fn x86_packs_doubles_tighter() {
        let desc = StructDescriptor::builder("Mixed", TargetAbi::ILP32_X86)
            .member(0, "i", NativeType::I32)
            .member(1, "d", NativeType::F64)
            .build()
            .unwrap();
        assert_eq!(offsets(&desc), vec![0, 4]);
        assert_eq!(desc.size(), 12);

        let arm = StructDescriptor::builder("Mixed", TargetAbi::ILP32_ARM)
            .member(0, "i", NativeType::I32)
            .member(1, "d", NativeType::F64)
            .build()
            .unwrap();
        assert_eq!(offsets(&arm), vec![0, 8]);
        assert_eq!(arm.size(), 16);
    }

    #[test]
    fn declaration_order_does_not_matter() {
        let desc = StructDescriptor::builder("Pair", TargetAbi::LP64)
            .member(1, "b", NativeType::I64)
            .member(0, "a", NativeType::U8)
            .build()
            .unwrap();
        assert_eq!(desc.members()[0].name(), "a");
        assert_eq!(offsets(&desc), vec![0, 8]);
    }

    #[test]
    fn machine_sized_members() {
        let lp64 = StructDescriptor::builder("NSRange", TargetAbi::LP64)
            .member(0, "location", NativeType::MachineUInt)
            .member(1, "length", NativeType::MachineUInt)
            .build()
            .unwrap();
        assert_eq!(lp64.size(), 16);

        let ilp32 = StructDescriptor::builder("NSRange", TargetAbi::ILP32_ARM)
            .member(0, "location", NativeType::MachineUInt)
            .member(1, "length", NativeType::MachineUInt)
            .build()
            .unwrap();
        assert_eq!(ilp32.size(), 8);
        assert_eq!(offsets(&ilp32), vec![0, 4]);
    }

    #[test]
    fn arrays_occupy_contiguous_elements() {
        let desc = StructDescriptor::builder("Matrix", TargetAbi::LP64)
            .member(0, "tag", NativeType::U8)
            .array(1, "m", NativeType::F32, 4)
            .member(2, "after", NativeType::U16)
            .build()
            .unwrap();
        let m = desc.member(1).unwrap();
        assert_eq!(m.offset(), 4);
        assert_eq!(m.byte_len(), 16);
        assert_eq!(m.element_offset(3), Some(16));
        assert_eq!(m.element_offset(usize::MAX), None);
        assert_eq!(desc.member(2).unwrap().offset(), 20);
        assert_eq!(desc.size(), 24);
    }

    #[test]
    fn unbounded_trailing_array() {
        let desc = StructDescriptor::builder("AudioBufferList", TargetAbi::LP64)
            .member(0, "count", NativeType::U32)
            .array(1, "buffers", NativeType::Pointer, 0)
            .build()
            .unwrap();
        let tail = desc.member(1).unwrap();
        assert_eq!(tail.arity(), Arity::Unbounded);
        assert_eq!(tail.offset(), 8);
        assert_eq!(tail.byte_len(), 0);
        assert_eq!(desc.size(), 8);
        desc.validate().unwrap();
    }

    #[test]
    fn unbounded_must_be_last() {
        let err = StructDescriptor::builder("Bad", TargetAbi::LP64)
            .array(0, "items", NativeType::U32, 0)
            .member(1, "count", NativeType::U32)
            .build()
            .unwrap_err();
        assert!(matches!(err, LayoutError::UnboundedNotLast { .. }));
    }

    #[test]
    fn unions_share_an_offset() {
        let desc = StructDescriptor::builder("Value", TargetAbi::LP64)
            .member(0, "kind", NativeType::U8)
            .member(1, "asInt", NativeType::I32)
            .member(1, "asDouble", NativeType::F64)
            .member(2, "flags", NativeType::U8)
            .build()
            .unwrap();
        assert_eq!(offsets(&desc), vec![0, 8, 8, 16]);
        assert_eq!(desc.size(), 24);
        assert_eq!(desc.members_at(1).count(), 2);
        desc.validate().unwrap();
    }

    #[test]
    fn nested_structs() {
        let point = StructDescriptor::builder("CGPoint", TargetAbi::LP64)
            .member(0, "x", NativeType::MachineFloat)
            .member(1, "y", NativeType::MachineFloat)
            .build()
            .unwrap();
        let size = StructDescriptor::builder("CGSize", TargetAbi::LP64)
            .member(0, "width", NativeType::MachineFloat)
            .member(1, "height", NativeType::MachineFloat)
            .build()
            .unwrap();
        let rect = StructDescriptor::builder("CGRect", TargetAbi::LP64)
            .member(0, "origin", NativeType::Struct(point))
            .member(1, "size", NativeType::Struct(size))
            .build()
            .unwrap();
        assert_eq!(offsets(&rect), vec![0, 16]);
        assert_eq!(rect.size(), 32);
        rect.validate().unwrap();
    }

    #[test]
    fn nested_struct_from_other_abi_is_rejected() {
        let point = StructDescriptor::builder("CGPoint", TargetAbi::ILP32_ARM)
            .member(0, "x", NativeType::MachineFloat)
            .build()
            .unwrap();
        let err = StructDescriptor::builder("Holder", TargetAbi::LP64)
            .member(0, "p", NativeType::Struct(point))
            .build()
            .unwrap_err();
        assert!(matches!(err, LayoutError::AbiMismatch { .. }));
    }

    #[test]
    fn packed_structs() {
        let desc = StructDescriptor::builder("Packed", TargetAbi::LP64)
            .member(0, "c", NativeType::U8)
            .member(1, "n", NativeType::U32)
            .packed(1)
            .build()
            .unwrap();
        assert_eq!(offsets(&desc), vec![0, 1]);
        assert_eq!(desc.size(), 5);
        desc.validate().unwrap();
    }

    #[test]
    fn void_members_are_rejected() {
        let err = StructDescriptor::builder("Bad", TargetAbi::LP64)
            .member(0, "nothing", NativeType::Void)
            .build()
            .unwrap_err();
        assert!(matches!(err, LayoutError::UnsupportedType { .. }));
    }

    #[test]
    fn validate_catches_misaligned_explicit_offset() {
        let desc = StructDescriptor::builder("Bad", TargetAbi::LP64)
            .member(0, "c", NativeType::U8)
            .member_at(1, "i", NativeType::I32, Arity::Scalar, 2)
            .build()
            .unwrap();
        let err = desc.validate().unwrap_err();
        assert!(matches!(
            err,
            LayoutError::Misaligned {
                offset: 2,
                align: 4,
                ..
            }
        ));
    }

    #[test]
    fn validate_catches_overlap() {
        let desc = StructDescriptor::builder("Bad", TargetAbi::LP64)
            .member(0, "a", NativeType::I64)
            .member_at(1, "b", NativeType::I32, Arity::Scalar, 4)
            .build()
            .unwrap();
        let err = desc.validate().unwrap_err();
        assert!(matches!(
            err,
            LayoutError::Overlap {
                previous_end: 8,
                ..
            }
        ));
    }

    #[test]
    fn union_offsets_must_agree() {
        let err = StructDescriptor::builder("Bad", TargetAbi::LP64)
            .member_at(0, "a", NativeType::I32, Arity::Scalar, 0)
            .member_at(0, "b", NativeType::I32, Arity::Scalar, 4)
            .build()
            .unwrap_err();
        assert!(matches!(err, LayoutError::UnionOffset { ordinal: 0, .. }));
    }
}
