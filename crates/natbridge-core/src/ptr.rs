//! Typed views over native pointer slots.
//!
//! A [`Ptr`] is a view over one machine word that holds a native handle,
//! used for out-parameters such as `NSError **`. It never owns the memory it
//! points at and never frees it. Reading converts the stored handle with the
//! element type's [`PointerMarshaler`]; writing stores the handle the
//! element marshals to.
//!
//! Reading a slot native code never wrote to is a caller error. A
//! [`PtrSlot`] starts zeroed, so such a read yields `None` rather than
//! undefined behavior.

use std::fmt;
use std::marker::PhantomData;

use crate::error::MarshalError;
use crate::flags::MarshalFlags;
use crate::handle::NativeHandle;
use crate::marshal::{MarshalContext, PointerMarshaler};

/// Managed storage for one pointer-sized slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PtrSlot(NativeHandle);

impl PtrSlot {
    pub const fn new() -> Self {
        PtrSlot(NativeHandle::NULL)
    }

    /// The raw handle currently stored.
    pub fn get(&self) -> NativeHandle {
        self.0
    }

    /// Address native code writes through.
    pub fn address(&mut self) -> NativeHandle {
        NativeHandle::from_ptr(self as *mut PtrSlot)
    }
}

/// A non-owning typed view over a pointer slot.
pub struct Ptr<'a, T> {
    slot: *mut NativeHandle,
    _marker: PhantomData<(&'a mut NativeHandle, fn() -> T)>,
}

impl<'a, T: PointerMarshaler> Ptr<'a, T> {
    /// View over managed slot storage.
    pub fn new(slot: &'a mut PtrSlot) -> Self {
        Ptr {
            slot: &mut slot.0,
            _marker: PhantomData,
        }
    }

    /// View over a native slot.
    ///
    /// # Safety
    ///
    /// `address` must point to a writable, aligned, pointer-sized slot that
    /// stays valid for `'a` and is not accessed through any other path
    /// meanwhile.
    pub unsafe fn from_address(address: NativeHandle) -> Option<Self> {
        address.non_null().map(|a| Ptr {
            slot: a.as_ptr::<NativeHandle>(),
            _marker: PhantomData,
        })
    }

    /// Address of the slot, for passing to native code.
    pub fn address(&self) -> NativeHandle {
        NativeHandle::from_ptr(self.slot)
    }

    /// The raw handle in the slot.
    pub fn get(&self) -> NativeHandle {
        // SAFETY: the slot is valid for 'a by construction.
        unsafe { self.slot.read() }
    }

    /// Store a raw handle. Ownership of whatever the slot held before is
    /// not touched.
    pub fn set(&mut self, handle: NativeHandle) {
        // SAFETY: the slot is valid and exclusively borrowed for 'a.
        unsafe { self.slot.write(handle) }
    }

    /// Read the slot as a managed value. Out-parameters are handed back +0,
    /// so the value takes its own retain.
    pub fn dereference(&self, cx: &MarshalContext<'_>) -> Result<Option<T>, MarshalError> {
        T::to_managed(cx, self.get(), MarshalFlags::empty())
    }

    /// Write a managed value into the slot; `None` stores the zero handle.
    pub fn store(
        &mut self,
        cx: &MarshalContext<'_>,
        value: Option<&T>,
    ) -> Result<(), MarshalError> {
        let handle = T::to_native_handle(value, cx, MarshalFlags::empty())?;
        self.set(handle);
        Ok(())
    }
}

impl<T> fmt::Debug for Ptr<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Ptr")
            .field(&NativeHandle::from_ptr(self.slot))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::test_support::{NO_GLOBALS, runtime};

    #[test]
    fn fresh_slot_reads_none() {
        let (_, rt) = runtime();
        let cx = MarshalContext::new(&rt, &NO_GLOBALS);
        let mut slot = PtrSlot::new();
        let ptr = Ptr::<String>::new(&mut slot);
        assert_eq!(ptr.dereference(&cx).unwrap(), None);
    }

    #[test]
    fn store_then_dereference() {
        let (inner, rt) = runtime();
        let cx = MarshalContext::new(&rt, &NO_GLOBALS);
        let mut slot = PtrSlot::new();
        {
            let mut ptr = Ptr::<String>::new(&mut slot);
            ptr.store(&cx, Some(&"out".to_string())).unwrap();
            assert_eq!(ptr.dereference(&cx).unwrap().as_deref(), Some("out"));
        }
        assert_eq!(inner.string_value(slot.get()).as_deref(), Some("out"));

        let mut ptr = Ptr::<String>::new(&mut slot);
        ptr.store(&cx, None).unwrap();
        assert!(ptr.get().is_null());
    }

    #[test]
    fn native_writes_through_the_address() {
        let (_, rt) = runtime();
        let cx = MarshalContext::new(&rt, &NO_GLOBALS);
        let mut slot = PtrSlot::new();
        let address = slot.address();
        let written = "from native"
            .to_string()
            .to_handle(&cx, MarshalFlags::empty())
            .unwrap();
        // SAFETY: `address` is the slot above, still alive and unaliased.
        let mut view = unsafe { Ptr::<String>::from_address(address) }.unwrap();
        view.set(written);
        assert_eq!(
            view.dereference(&cx).unwrap().as_deref(),
            Some("from native")
        );
        assert_eq!(slot.get(), written);
        assert!(unsafe { Ptr::<String>::from_address(NativeHandle::NULL) }.is_none());
    }
}
