//! Opaque native addresses.

use std::fmt;

/// An opaque machine-word address identifying a native object, struct
/// instance, class, or function/data symbol.
///
/// The bridge never interprets a handle beyond comparing it for identity and
/// passing it back to the native runtime. The zero handle is the native
/// "no value" and marshals to `None` on the managed side.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct NativeHandle(pub usize);

impl NativeHandle {
    /// The zero handle (`nil` / `NULL`).
    pub const NULL: NativeHandle = NativeHandle(0);

    /// Create a handle from a raw address.
    #[inline]
    pub const fn new(address: usize) -> Self {
        NativeHandle(address)
    }

    /// Create a handle from a raw pointer.
    #[inline]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        NativeHandle(ptr as usize)
    }

    /// Whether this is the zero handle.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The raw address.
    #[inline]
    pub const fn address(self) -> usize {
        self.0
    }

    /// The address as a raw pointer.
    #[inline]
    pub fn as_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// `None` for the zero handle, `Some(self)` otherwise.
    #[inline]
    pub fn non_null(self) -> Option<NativeHandle> {
        if self.is_null() { None } else { Some(self) }
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "NativeHandle(NULL)")
        } else {
            write!(f, "NativeHandle({:#x})", self.0)
        }
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<usize> for NativeHandle {
    fn from(address: usize) -> Self {
        NativeHandle(address)
    }
}
