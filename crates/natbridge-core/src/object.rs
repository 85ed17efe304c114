//! Managed wrappers around native objects.
//!
//! A [`NativeObject`] holds exactly one native handle for its whole
//! lifetime. It either owns one retain on the object, released exactly once
//! when the wrapper drops, or merely observes the handle and never touches
//! its retain count. Which one is decided by the [`MarshalFlags`] the handle
//! arrived with:
//!
//! | Flags | On wrap | On drop |
//! |-------|---------|---------|
//! | none (borrowed, +0) | retain | release |
//! | `RETAINED` (+1) | adopt | release |
//! | `OBSERVED` | nothing | nothing |
//!
//! Cloning an owning wrapper retains, so every clone carries its own
//! ownership increment.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::flags::MarshalFlags;
use crate::handle::NativeHandle;
use crate::runtime::RuntimeRef;

/// Whether a wrapper owns a retain on its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Owned,
    Observed,
}

/// A managed reference to a live native object.
pub struct NativeObject {
    handle: NativeHandle,
    ownership: Ownership,
    runtime: RuntimeRef,
}

impl NativeObject {
    /// Wrap a non-null handle according to `flags`.
    ///
    /// This is the skip-init construction path: the handle already refers to
    /// a fully initialized native object and no initializer runs. Returns
    /// `None` for the zero handle.
    pub fn wrap(runtime: &RuntimeRef, handle: NativeHandle, flags: MarshalFlags) -> Option<Self> {
        if handle.is_null() {
            return None;
        }
        let ownership = if flags.contains(MarshalFlags::OBSERVED) {
            Ownership::Observed
        } else {
            if !flags.contains(MarshalFlags::RETAINED) {
                runtime.retain(handle);
            }
            Ownership::Owned
        };
        Some(NativeObject {
            handle,
            ownership,
            runtime: Arc::clone(runtime),
        })
    }

    /// Take over a +1 handle.
    pub fn from_retained(runtime: &RuntimeRef, handle: NativeHandle) -> Option<Self> {
        Self::wrap(runtime, handle, MarshalFlags::RETAINED)
    }

    /// Retain and wrap a +0 handle.
    pub fn from_borrowed(runtime: &RuntimeRef, handle: NativeHandle) -> Option<Self> {
        Self::wrap(runtime, handle, MarshalFlags::empty())
    }

    pub fn handle(&self) -> NativeHandle {
        self.handle
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn runtime(&self) -> &RuntimeRef {
        &self.runtime
    }

    /// Native class of the object.
    pub fn class(&self) -> Option<NativeHandle> {
        self.runtime.class_of(self.handle)
    }

    /// Native class name of the object.
    pub fn class_name(&self) -> Option<String> {
        self.class().and_then(|c| self.runtime.class_name(c))
    }

    /// Give up the wrapper without releasing. An owned handle is returned
    /// with its +1, which the caller now owns.
    pub fn into_raw(self) -> NativeHandle {
        let handle = self.handle;
        std::mem::forget(self);
        handle
    }

    /// The handle with a fresh +1 for a native callee that consumes it.
    pub fn retained_handle(&self) -> NativeHandle {
        self.runtime.retain(self.handle)
    }
}

impl Clone for NativeObject {
    fn clone(&self) -> Self {
        if self.ownership == Ownership::Owned {
            self.runtime.retain(self.handle);
        }
        NativeObject {
            handle: self.handle,
            ownership: self.ownership,
            runtime: Arc::clone(&self.runtime),
        }
    }
}

impl Drop for NativeObject {
    fn drop(&mut self) {
        if self.ownership == Ownership::Owned {
            self.runtime.release(self.handle);
        }
    }
}

/// Identity: two wrappers are equal when they hold the same handle.
impl PartialEq for NativeObject {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for NativeObject {}

impl Hash for NativeObject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.handle.hash(state);
    }
}

impl fmt::Debug for NativeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeObject")
            .field("handle", &self.handle)
            .field("ownership", &self.ownership)
            .finish()
    }
}

/// A managed type standing for one native class.
///
/// Implementations are thin newtypes over [`NativeObject`], normally
/// generated with [`object_type!`](crate::object_type). Every `ObjectType`
/// marshals as a pointer through the blanket
/// [`PointerMarshaler`](crate::marshal::PointerMarshaler) impl.
pub trait ObjectType: Sized {
    /// Name of the native class.
    const CLASS_NAME: &'static str;

    fn from_object(object: NativeObject) -> Self;

    fn as_object(&self) -> &NativeObject;

    fn handle(&self) -> NativeHandle {
        self.as_object().handle()
    }
}

/// Declare an [`ObjectType`] newtype over [`NativeObject`].
///
/// ```ignore
/// object_type!(pub struct NSMutableArray: "NSMutableArray");
/// ```
#[macro_export]
macro_rules! object_type {
    ($(#[$meta:meta])* $vis:vis struct $name:ident : $class:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash)]
        $vis struct $name($crate::object::NativeObject);

        impl $crate::object::ObjectType for $name {
            const CLASS_NAME: &'static str = $class;

            fn from_object(object: $crate::object::NativeObject) -> Self {
                $name(object)
            }

            fn as_object(&self) -> &$crate::object::NativeObject {
                &self.0
            }
        }
    };
}
