//! Raw struct memory with typed member access.

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::abi::NativeType;
use crate::error::LayoutError;
use crate::handle::NativeHandle;
use crate::layout::descriptor::{Arity, MemberLayout, StructDescriptor};
use crate::layout::field::StructField;

/// A native struct instance: a raw memory region plus the descriptor that
/// gives its members meaning.
///
/// Owned instances are zero-initialized allocations freed on drop; views
/// created with [`StructMemory::from_raw`] borrow memory owned by native
/// code. A struct has no identity beyond its address, and cloning always
/// produces an owned bytewise copy.
///
/// Member access performs no locking. The memory must not be mutated from
/// several threads at once without outside synchronization.
pub struct StructMemory {
    ptr: NonNull<u8>,
    len: usize,
    owned: bool,
    descriptor: Arc<StructDescriptor>,
}

// SAFETY: StructMemory is plain bytes; the type is as thread-safe as a
// `Vec<u8>`. Views are created through an unsafe constructor whose contract
// covers the lifetime of the borrowed region.
unsafe impl Send for StructMemory {}
unsafe impl Sync for StructMemory {}

impl StructMemory {
    /// Allocate a zeroed instance.
    pub fn new(descriptor: Arc<StructDescriptor>) -> Self {
        let len = descriptor.size();
        Self::allocate(descriptor, len)
    }

    /// Allocate a zeroed instance with room for `count` elements of its
    /// unbounded trailing array.
    pub fn with_trailing(descriptor: Arc<StructDescriptor>, count: usize) -> Self {
        let extra = descriptor
            .members()
            .iter()
            .find(|m| m.arity() == Arity::Unbounded)
            .map(|m| (m.offset() + m.element_size() * count).saturating_sub(descriptor.size()))
            .unwrap_or(0);
        let len = descriptor.size() + extra;
        Self::allocate(descriptor, len)
    }

    /// Copy an instance out of `bytes`.
    pub fn from_bytes(
        descriptor: Arc<StructDescriptor>,
        bytes: &[u8],
    ) -> Result<Self, LayoutError> {
        if bytes.len() < descriptor.size() {
            return Err(LayoutError::IndexOutOfBounds {
                strukt: descriptor.name().to_string(),
                ordinal: 0,
                index: descriptor.size(),
                len: bytes.len(),
            });
        }
        let mut mem = Self::allocate(descriptor, bytes.len());
        mem.as_bytes_mut().copy_from_slice(bytes);
        Ok(mem)
    }

    /// View `len` bytes of native memory at `ptr` as a struct.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for as long
    /// as the view and anything borrowed from it are alive, and nothing else
    /// may access the region concurrently while the view mutates it.
    pub unsafe fn from_raw(
        descriptor: Arc<StructDescriptor>,
        ptr: NonNull<u8>,
        len: usize,
    ) -> Self {
        StructMemory {
            ptr,
            len,
            owned: false,
            descriptor,
        }
    }

    fn allocate(descriptor: Arc<StructDescriptor>, len: usize) -> Self {
        let ptr = if len == 0 {
            NonNull::<u64>::dangling().cast::<u8>()
        } else {
            let layout = Self::alloc_layout(&descriptor, len);
            // SAFETY: layout has a non-zero size.
            let raw = unsafe { alloc::alloc_zeroed(layout) };
            match NonNull::new(raw) {
                Some(p) => p,
                None => alloc::handle_alloc_error(layout),
            }
        };
        StructMemory {
            ptr,
            len,
            owned: true,
            descriptor,
        }
    }

    fn alloc_layout(descriptor: &StructDescriptor, len: usize) -> Layout {
        // Always at least pointer-aligned so host-ABI structs can be handed
        // to native code directly.
        let align = descriptor.align().max(std::mem::align_of::<usize>());
        match Layout::from_size_align(len, align) {
            Ok(layout) => layout,
            Err(_) => panic!("struct `{}` is too large to allocate", descriptor.name()),
        }
    }

    pub fn descriptor(&self) -> &Arc<StructDescriptor> {
        &self.descriptor
    }

    /// Length of the memory region in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether this instance owns its memory.
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Address of the first byte.
    pub fn address(&self) -> NativeHandle {
        NativeHandle::from_ptr(self.ptr.as_ptr())
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: ptr is valid for len bytes (allocation or view contract).
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    // ========================================================================
    // Member lookup
    // ========================================================================

    fn member_matching(
        &self,
        ordinal: u32,
        requested: &str,
        matches: impl Fn(&NativeType) -> bool,
    ) -> Result<&MemberLayout, LayoutError> {
        let mut found = false;
        for m in self.descriptor.members_at(ordinal) {
            found = true;
            if matches(m.ty()) {
                return Ok(m);
            }
        }
        if found {
            Err(LayoutError::MemberType {
                strukt: self.descriptor.name().to_string(),
                ordinal,
                requested: requested.to_string(),
            })
        } else {
            Err(LayoutError::NoSuchMember {
                strukt: self.descriptor.name().to_string(),
                ordinal,
            })
        }
    }

    fn element_range(&self, m: &MemberLayout, index: usize) -> Result<(usize, usize), LayoutError> {
        let out_of_bounds = |len: usize| LayoutError::IndexOutOfBounds {
            strukt: self.descriptor.name().to_string(),
            ordinal: m.ordinal(),
            index,
            len,
        };
        if let Some(n) = m.arity().len()
            && index >= n
        {
            return Err(out_of_bounds(n));
        }
        // Trailing arrays are bounded only by the memory region
        let available = || self.len.saturating_sub(m.offset()) / m.element_size().max(1);
        let (start, end) = m
            .element_offset(index)
            .and_then(|start| start.checked_add(m.element_size()).map(|end| (start, end)))
            .ok_or_else(|| out_of_bounds(available()))?;
        if end > self.len {
            return Err(out_of_bounds(available()));
        }
        Ok((start, end))
    }

    fn check_fits<T: StructField>(&self, ordinal: u32, value: T) -> Result<(), LayoutError> {
        if value.fits(&self.descriptor.abi()) {
            Ok(())
        } else {
            Err(LayoutError::ValueOutOfRange {
                strukt: self.descriptor.name().to_string(),
                ordinal,
                value: format!("{:?}", value),
                ty: T::TYPE_NAME,
            })
        }
    }

    // ========================================================================
    // Scalar and array members
    // ========================================================================

    /// Read element 0 of the member at `ordinal`.
    pub fn try_get<T: StructField>(&self, ordinal: u32) -> Result<T, LayoutError> {
        self.try_get_element(ordinal, 0)
    }

    /// Read element 0 of the member at `ordinal`.
    ///
    /// # Panics
    ///
    /// Panics if there is no member of type `T` at `ordinal`. Use
    /// [`try_get`](Self::try_get) to handle that case.
    pub fn get<T: StructField>(&self, ordinal: u32) -> T {
        match self.try_get(ordinal) {
            Ok(v) => v,
            Err(err) => panic!("{}", err),
        }
    }

    /// Write element 0 of the member at `ordinal`. Returns `self` for
    /// chaining; nothing is copied.
    pub fn try_set<T: StructField>(
        &mut self,
        ordinal: u32,
        value: T,
    ) -> Result<&mut Self, LayoutError> {
        self.try_set_element(ordinal, 0, value)
    }

    /// Write element 0 of the member at `ordinal`.
    ///
    /// # Panics
    ///
    /// Panics if there is no member of type `T` at `ordinal`.
    pub fn set<T: StructField>(&mut self, ordinal: u32, value: T) -> &mut Self {
        if let Err(err) = self.try_set(ordinal, value) {
            panic!("{}", err);
        }
        self
    }

    /// Read element `index` of an array member.
    pub fn try_get_element<T: StructField>(
        &self,
        ordinal: u32,
        index: usize,
    ) -> Result<T, LayoutError> {
        let m = self.member_matching(ordinal, T::TYPE_NAME, T::matches)?;
        let (start, end) = self.element_range(m, index)?;
        Ok(T::read(&self.as_bytes()[start..end], &self.descriptor.abi()))
    }

    /// Read element `index` of an array member.
    ///
    /// # Panics
    ///
    /// Panics on a type mismatch or an out-of-bounds index.
    pub fn get_element<T: StructField>(&self, ordinal: u32, index: usize) -> T {
        match self.try_get_element(ordinal, index) {
            Ok(v) => v,
            Err(err) => panic!("{}", err),
        }
    }

    /// Write element `index` of an array member. No other element changes.
    pub fn try_set_element<T: StructField>(
        &mut self,
        ordinal: u32,
        index: usize,
        value: T,
    ) -> Result<&mut Self, LayoutError> {
        let (start, end) = {
            let m = self.member_matching(ordinal, T::TYPE_NAME, T::matches)?;
            self.element_range(m, index)?
        };
        let abi = self.descriptor.abi();
        self.check_fits(ordinal, value)?;
        value.write(&mut self.as_bytes_mut()[start..end], &abi);
        Ok(self)
    }

    /// Write element `index` of an array member.
    ///
    /// # Panics
    ///
    /// Panics on a type mismatch or an out-of-bounds index.
    pub fn set_element<T: StructField>(
        &mut self,
        ordinal: u32,
        index: usize,
        value: T,
    ) -> &mut Self {
        if let Err(err) = self.try_set_element(ordinal, index, value) {
            panic!("{}", err);
        }
        self
    }

    /// Read all elements of a fixed-size member, index 0 first.
    ///
    /// For an unbounded trailing array use [`try_get_slice`](Self::try_get_slice)
    /// with the length carried by its count member.
    pub fn try_get_array<T: StructField>(&self, ordinal: u32) -> Result<Vec<T>, LayoutError> {
        let m = self.member_matching(ordinal, T::TYPE_NAME, T::matches)?;
        let count = m.arity().len().ok_or_else(|| LayoutError::IndexOutOfBounds {
            strukt: self.descriptor.name().to_string(),
            ordinal,
            index: 0,
            len: 0,
        })?;
        self.try_get_slice(ordinal, 0, count)
    }

    /// Read `count` elements of an array member starting at `start`.
    pub fn try_get_slice<T: StructField>(
        &self,
        ordinal: u32,
        start: usize,
        count: usize,
    ) -> Result<Vec<T>, LayoutError> {
        let end = start
            .checked_add(count)
            .ok_or_else(|| LayoutError::IndexOutOfBounds {
                strukt: self.descriptor.name().to_string(),
                ordinal,
                index: start,
                len: count,
            })?;
        (start..end)
            .map(|i| self.try_get_element(ordinal, i))
            .collect()
    }

    /// Write every element of an array member, index 0 first.
    ///
    /// A fixed-size member must receive exactly its arity; an unbounded one
    /// takes as many elements as the memory region holds.
    pub fn try_set_array<T: StructField>(
        &mut self,
        ordinal: u32,
        values: &[T],
    ) -> Result<&mut Self, LayoutError> {
        let arity = self
            .member_matching(ordinal, T::TYPE_NAME, T::matches)?
            .arity();
        if let Some(n) = arity.len()
            && n != values.len()
        {
            return Err(LayoutError::IndexOutOfBounds {
                strukt: self.descriptor.name().to_string(),
                ordinal,
                index: values.len(),
                len: n,
            });
        }
        // Check the last element and every value first so a failure writes nothing
        if let Some(last) = values.len().checked_sub(1) {
            let m = self.member_matching(ordinal, T::TYPE_NAME, T::matches)?;
            self.element_range(m, last)?;
        }
        for v in values {
            self.check_fits(ordinal, *v)?;
        }
        for (i, v) in values.iter().enumerate() {
            self.try_set_element(ordinal, i, *v)?;
        }
        Ok(self)
    }

    // ========================================================================
    // Nested struct members
    // ========================================================================

    fn struct_member(&self, ordinal: u32) -> Result<&MemberLayout, LayoutError> {
        self.member_matching(ordinal, "struct", |t| matches!(t, NativeType::Struct(_)))
    }

    fn nested_descriptor(m: &MemberLayout) -> Option<&Arc<StructDescriptor>> {
        match m.ty() {
            NativeType::Struct(desc) => Some(desc),
            _ => None,
        }
    }

    /// Copy out a nested struct member.
    pub fn try_get_struct(&self, ordinal: u32) -> Result<StructMemory, LayoutError> {
        self.try_get_struct_element(ordinal, 0)
    }

    /// Copy out element `index` of an array-of-structs member.
    pub fn try_get_struct_element(
        &self,
        ordinal: u32,
        index: usize,
    ) -> Result<StructMemory, LayoutError> {
        let m = self.struct_member(ordinal)?;
        let (start, end) = self.element_range(m, index)?;
        let nested = Self::nested_descriptor(m)
            .cloned()
            .ok_or_else(|| LayoutError::NoSuchMember {
                strukt: self.descriptor.name().to_string(),
                ordinal,
            })?;
        StructMemory::from_bytes(nested, &self.as_bytes()[start..end])
    }

    /// Copy `value` into a nested struct member.
    pub fn try_set_struct(
        &mut self,
        ordinal: u32,
        value: &StructMemory,
    ) -> Result<&mut Self, LayoutError> {
        self.try_set_struct_element(ordinal, 0, value)
    }

    /// Copy `value` into element `index` of an array-of-structs member.
    pub fn try_set_struct_element(
        &mut self,
        ordinal: u32,
        index: usize,
        value: &StructMemory,
    ) -> Result<&mut Self, LayoutError> {
        let (start, end) = {
            let m = self.struct_member(ordinal)?;
            if let Some(expected) = Self::nested_descriptor(m)
                && expected.as_ref() != value.descriptor().as_ref()
            {
                return Err(LayoutError::StructMismatch {
                    strukt: self.descriptor.name().to_string(),
                    expected: expected.name().to_string(),
                    actual: value.descriptor().name().to_string(),
                });
            }
            self.element_range(m, index)?
        };
        let size = end - start;
        self.as_bytes_mut()[start..end].copy_from_slice(&value.as_bytes()[..size]);
        Ok(self)
    }
}

impl Clone for StructMemory {
    fn clone(&self) -> Self {
        let mut copy = Self::allocate(Arc::clone(&self.descriptor), self.len);
        copy.as_bytes_mut().copy_from_slice(self.as_bytes());
        copy
    }
}

impl PartialEq for StructMemory {
    /// Bytewise equality of the struct's declared size. Padding bytes take
    /// part in the comparison; instances created by this crate zero them.
    fn eq(&self, other: &Self) -> bool {
        let size = self.descriptor.size();
        self.descriptor.as_ref() == other.descriptor.as_ref()
            && self.len >= size
            && other.len >= size
            && self.as_bytes()[..size] == other.as_bytes()[..size]
    }
}

impl Drop for StructMemory {
    fn drop(&mut self) {
        if self.owned && self.len != 0 {
            let layout = Self::alloc_layout(&self.descriptor, self.len);
            // SAFETY: allocated in `allocate` with this exact layout.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
        }
    }
}

impl fmt::Debug for StructMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructMemory")
            .field("struct", &self.descriptor.name())
            .field("address", &self.address())
            .field("len", &self.len)
            .field("owned", &self.owned)
            .finish()
    }
}
