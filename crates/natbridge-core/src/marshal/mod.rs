//! Conversion between managed values and native values.
//!
//! Every value crossing the boundary goes through one of three traits:
//!
//! - [`PointerMarshaler`]: types carried as a single native pointer
//!   (objects, strings, lists, global-value enums)
//! - [`ToNative`]: managed value to [`NativeValue`], for arguments
//! - [`FromNative`]: [`NativeValue`] to managed value, for return values
//!
//! Conversions are driven by [`MarshalFlags`]: `RETAINED` says the incoming
//! handle carries a +1 the receiver must balance, `OBSERVED` says it must
//! never be retained or released, and `TRANSFER_OWNERSHIP` asks an outgoing
//! handle to carry a fresh +1 for a consuming callee.
//!
//! Conversions are total or fail with [`MarshalError`]: a null maps to
//! `None` for optional targets and to [`MarshalError::UnexpectedNull`] for
//! required ones, and a collection never converts partially.

mod args;
mod list;
mod primitive;
mod string;

pub use args::{NativeArg, NativeArgs};

use crate::abi::{NativeType, TargetAbi};
use crate::error::{MarshalError, NativeCallError};
use crate::flags::MarshalFlags;
use crate::global::GlobalResolver;
use crate::handle::NativeHandle;
use crate::object::{NativeObject, ObjectType};
use crate::runtime::RuntimeRef;
use crate::selector::Selector;
use crate::value::NativeValue;

/// Everything a conversion may need: the runtime for message sends and
/// retain counts, and the global-value cache for enum constants.
#[derive(Clone, Copy)]
pub struct MarshalContext<'a> {
    runtime: &'a RuntimeRef,
    globals: &'a dyn GlobalResolver,
}

impl<'a> MarshalContext<'a> {
    pub fn new(runtime: &'a RuntimeRef, globals: &'a dyn GlobalResolver) -> Self {
        MarshalContext { runtime, globals }
    }

    pub fn runtime(&self) -> &'a RuntimeRef {
        self.runtime
    }

    pub fn globals(&self) -> &'a dyn GlobalResolver {
        self.globals
    }

    pub fn abi(&self) -> TargetAbi {
        self.runtime.abi()
    }

    /// Class object for `name`.
    pub fn class(&self, name: &'static str) -> Result<NativeHandle, MarshalError> {
        self.runtime
            .lookup_class(name)
            .ok_or(MarshalError::MissingClass(name))
    }

    /// Message send by selector name.
    pub fn send(
        &self,
        receiver: NativeHandle,
        selector: &str,
        args: &[NativeValue],
    ) -> Result<NativeValue, NativeCallError> {
        self.runtime.send(receiver, &Selector::new(selector), args)
    }

    /// Whether `object` is an instance of `class` or one of its subclasses.
    pub fn is_kind_of(&self, object: NativeHandle, class: NativeHandle) -> bool {
        let mut current = self.runtime.class_of(object);
        while let Some(c) = current {
            if c == class {
                return true;
            }
            current = self.runtime.superclass_of(c);
        }
        false
    }
}

impl std::fmt::Debug for MarshalContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarshalContext")
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}

/// A managed type with a fixed native representation.
pub trait NativeTyped {
    fn native_type() -> NativeType;
}

/// Managed to native conversion.
pub trait ToNative: NativeTyped {
    fn to_native(
        &self,
        cx: &MarshalContext<'_>,
        flags: MarshalFlags,
    ) -> Result<NativeValue, MarshalError>;
}

/// Native to managed conversion.
pub trait FromNative: NativeTyped + Sized {
    fn from_native(
        cx: &MarshalContext<'_>,
        value: NativeValue,
        flags: MarshalFlags,
    ) -> Result<Self, MarshalError>;
}

/// A managed type carried across the boundary as one native pointer.
///
/// Implementors provide the two non-null directions; the null handling of
/// [`to_managed`](Self::to_managed) and [`to_native_handle`](Self::to_native_handle) is
/// shared.
pub trait PointerMarshaler: Sized {
    /// Name used in error messages.
    fn type_name() -> &'static str;

    /// Declared native type of the pointer.
    fn pointer_type() -> NativeType {
        NativeType::Object
    }

    /// Convert a non-null handle.
    ///
    /// With `RETAINED` in `flags`, the +1 carried by `handle` is consumed
    /// whether or not the conversion succeeds.
    fn from_handle(
        cx: &MarshalContext<'_>,
        handle: NativeHandle,
        flags: MarshalFlags,
    ) -> Result<Self, MarshalError>;

    /// Produce a non-null handle for this value.
    fn to_handle(
        &self,
        cx: &MarshalContext<'_>,
        flags: MarshalFlags,
    ) -> Result<NativeHandle, MarshalError>;

    /// Native to managed: the zero handle becomes `None`.
    fn to_managed(
        cx: &MarshalContext<'_>,
        handle: NativeHandle,
        flags: MarshalFlags,
    ) -> Result<Option<Self>, MarshalError> {
        if handle.is_null() {
            Ok(None)
        } else {
            Self::from_handle(cx, handle, flags).map(Some)
        }
    }

    /// Managed to native: `None` becomes the zero handle.
    fn to_native_handle(
        value: Option<&Self>,
        cx: &MarshalContext<'_>,
        flags: MarshalFlags,
    ) -> Result<NativeHandle, MarshalError> {
        match value {
            None => Ok(NativeHandle::NULL),
            Some(v) => v.to_handle(cx, flags),
        }
    }
}

/// Release the +1 an incoming handle carried, if it carried one.
///
/// Marshalers that do not adopt an incoming handle call this to balance it.
pub fn consume_retain(cx: &MarshalContext<'_>, handle: NativeHandle, flags: MarshalFlags) {
    if flags.contains(MarshalFlags::RETAINED) && !flags.contains(MarshalFlags::OBSERVED) {
        cx.runtime().release(handle);
    }
}

/// Incoming flags for the elements of a container: elements handed out by
/// a container are never +1.
pub(crate) fn element_flags(flags: MarshalFlags) -> MarshalFlags {
    flags & MarshalFlags::OBSERVED
}

impl<T: ObjectType> PointerMarshaler for T {
    fn type_name() -> &'static str {
        T::CLASS_NAME
    }

    fn from_handle(
        cx: &MarshalContext<'_>,
        handle: NativeHandle,
        flags: MarshalFlags,
    ) -> Result<Self, MarshalError> {
        // Class names that are protocols have no class object to check against
        if let Some(class) = cx.runtime().lookup_class(T::CLASS_NAME)
            && !cx.is_kind_of(handle, class)
        {
            let actual = cx
                .runtime()
                .class_of(handle)
                .and_then(|c| cx.runtime().class_name(c))
                .unwrap_or_else(|| handle.to_string());
            consume_retain(cx, handle, flags);
            return Err(MarshalError::WrongClass {
                expected: T::CLASS_NAME.to_string(),
                actual,
            });
        }
        NativeObject::wrap(cx.runtime(), handle, flags)
            .map(T::from_object)
            .ok_or(MarshalError::UnexpectedNull {
                type_name: T::CLASS_NAME,
            })
    }

    fn to_handle(
        &self,
        _cx: &MarshalContext<'_>,
        flags: MarshalFlags,
    ) -> Result<NativeHandle, MarshalError> {
        let object = self.as_object();
        if flags.contains(MarshalFlags::TRANSFER_OWNERSHIP) {
            Ok(object.retained_handle())
        } else {
            Ok(object.handle())
        }
    }
}

impl<T: PointerMarshaler> NativeTyped for T {
    fn native_type() -> NativeType {
        T::pointer_type()
    }
}

impl<T: PointerMarshaler> ToNative for T {
    fn to_native(
        &self,
        cx: &MarshalContext<'_>,
        flags: MarshalFlags,
    ) -> Result<NativeValue, MarshalError> {
        self.to_handle(cx, flags).map(NativeValue::Pointer)
    }
}

impl<T: PointerMarshaler> FromNative for T {
    fn from_native(
        cx: &MarshalContext<'_>,
        value: NativeValue,
        flags: MarshalFlags,
    ) -> Result<Self, MarshalError> {
        match T::to_managed(cx, expect_pointer(value)?, flags)? {
            Some(v) => Ok(v),
            None => Err(MarshalError::UnexpectedNull {
                type_name: T::type_name(),
            }),
        }
    }
}

impl<T: PointerMarshaler> NativeTyped for Option<T> {
    fn native_type() -> NativeType {
        T::pointer_type()
    }
}

impl<T: PointerMarshaler> ToNative for Option<T> {
    fn to_native(
        &self,
        cx: &MarshalContext<'_>,
        flags: MarshalFlags,
    ) -> Result<NativeValue, MarshalError> {
        T::to_native_handle(self.as_ref(), cx, flags).map(NativeValue::Pointer)
    }
}

impl<T: PointerMarshaler> FromNative for Option<T> {
    fn from_native(
        cx: &MarshalContext<'_>,
        value: NativeValue,
        flags: MarshalFlags,
    ) -> Result<Self, MarshalError> {
        T::to_managed(cx, expect_pointer(value)?, flags)
    }
}

pub(crate) fn expect_pointer(value: NativeValue) -> Result<NativeHandle, MarshalError> {
    match value {
        NativeValue::Pointer(h) => Ok(h),
        other => Err(MarshalError::TypeMismatch {
            expected: "pointer",
            actual: other.type_name(),
        }),
    }
}

/// Implement by-value marshaling for a [`StructType`](crate::layout::StructType).
///
/// Invoked by [`native_struct!`](crate::native_struct); call it directly for
/// hand-written struct wrappers.
#[macro_export]
macro_rules! struct_marshal {
    ($name:ty) => {
        impl $crate::marshal::NativeTyped for $name {
            fn native_type() -> $crate::NativeType {
                $crate::NativeType::Struct(<$name as $crate::layout::StructType>::descriptor())
            }
        }

        impl $crate::marshal::ToNative for $name {
            fn to_native(
                &self,
                _cx: &$crate::marshal::MarshalContext<'_>,
                _flags: $crate::MarshalFlags,
            ) -> ::std::result::Result<$crate::NativeValue, $crate::MarshalError> {
                Ok($crate::NativeValue::Struct(
                    <$name as $crate::layout::StructType>::memory(self).clone(),
                ))
            }
        }

        impl $crate::marshal::FromNative for $name {
            fn from_native(
                _cx: &$crate::marshal::MarshalContext<'_>,
                value: $crate::NativeValue,
                _flags: $crate::MarshalFlags,
            ) -> ::std::result::Result<Self, $crate::MarshalError> {
                match value {
                    $crate::NativeValue::Struct(memory) => {
                        <$name as $crate::layout::StructType>::try_from_memory(memory).map_err(|_| {
                            $crate::MarshalError::TypeMismatch {
                                expected: stringify!($name),
                                actual: "struct",
                            }
                        })
                    }
                    other => Err($crate::MarshalError::TypeMismatch {
                        expected: stringify!($name),
                        actual: other.type_name(),
                    }),
                }
            }
        }
    };
}


#[cfg(test)]
mod tests {
    use super::test_support::{NO_GLOBALS, runtime};
    use super::*;
    use crate::runtime::NativeRuntime;

    crate::object_type!(struct TestObject: "NSObject");
    crate::object_type!(struct TestString: "NSString");

    fn new_object(cx: &MarshalContext<'_>) -> NativeHandle {
        let class = cx.class("NSObject").unwrap();
        cx.send(class, "new", &[]).unwrap().as_handle().unwrap()
    }

    #[test]
    fn null_handles_map_to_none() {
        let (_, rt) = runtime();
        let cx = MarshalContext::new(&rt, &NO_GLOBALS);
        let flags = MarshalFlags::empty();
        let value = TestObject::to_managed(&cx, NativeHandle::NULL, flags).unwrap();
        assert!(value.is_none());
        let handle = TestObject::to_native_handle(None, &cx, flags).unwrap();
        assert_eq!(handle, NativeHandle::NULL);
    }

    #[test]
    fn required_object_rejects_null() {
        let (_, rt) = runtime();
        let cx = MarshalContext::new(&rt, &NO_GLOBALS);
        let null = NativeValue::Pointer(NativeHandle::NULL);
        let err = TestObject::from_native(&cx, null, MarshalFlags::empty()).unwrap_err();
        assert_eq!(
            err,
            MarshalError::UnexpectedNull {
                type_name: "NSObject",
            }
        );
    }

    #[test]
    fn retained_return_is_balanced() {
        let (inner, rt) = runtime();
        let cx = MarshalContext::new(&rt, &NO_GLOBALS);
        let h = new_object(&cx);
        let value = NativeValue::Pointer(h);
        let obj = TestObject::from_native(&cx, value, MarshalFlags::RETAINED).unwrap();
        assert_eq!(inner.retain_count(h), Some(1));
        drop(obj);
        assert!(!inner.is_alive(h));
    }

    #[test]
    fn wrong_class_consumes_retain() {
        let (inner, rt) = runtime();
        let cx = MarshalContext::new(&rt, &NO_GLOBALS);
        let h = new_object(&cx);
        inner.retain(h);
        let err = TestString::from_handle(&cx, h, MarshalFlags::RETAINED).unwrap_err();
        assert!(matches!(
            &err,
            MarshalError::WrongClass { expected, .. } if expected == "NSString"
        ));
        assert_eq!(inner.retain_count(h), Some(1));
        rt.release(h);
    }

    #[test]
    fn transfer_adds_a_retain() {
        let (inner, rt) = runtime();
        let cx = MarshalContext::new(&rt, &NO_GLOBALS);
        let h = new_object(&cx);
        let obj = TestObject::from_handle(&cx, h, MarshalFlags::RETAINED).unwrap();
        let transfer = MarshalFlags::TRANSFER_OWNERSHIP;
        let out = obj.to_handle(&cx, transfer).unwrap();
        assert_eq!(out, h);
        assert_eq!(inner.retain_count(h), Some(2));
        drop(obj);
        rt.release(out);
        assert!(!inner.is_alive(h));
    }

    #[test]
    fn optional_object_round_trip() {
        let (_, rt) = runtime();
        let cx = MarshalContext::new(&rt, &NO_GLOBALS);
        let h = new_object(&cx);
        let value = NativeValue::Pointer(h);
        let some = Option::<TestObject>::from_native(&cx, value, MarshalFlags::RETAINED).unwrap();
        assert_eq!(
            some.to_native(&cx, MarshalFlags::empty()).unwrap(),
            NativeValue::Pointer(h)
        );
        let none: Option<TestObject> = None;
        assert_eq!(
            none.to_native(&cx, MarshalFlags::empty()).unwrap(),
            NativeValue::Pointer(NativeHandle::NULL)
        );
    }

    #[test]
    fn non_pointer_is_a_type_mismatch() {
        let (_, rt) = runtime();
        let cx = MarshalContext::new(&rt, &NO_GLOBALS);
        let value = NativeValue::I32(3);
        let err = TestObject::from_native(&cx, value, MarshalFlags::empty()).unwrap_err();
        assert_eq!(
            err,
            MarshalError::TypeMismatch {
                expected: "pointer",
                actual: "int32",
            }
        );
    }
}
