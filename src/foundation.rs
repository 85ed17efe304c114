//! Bindings for the handful of Foundation and CoreFoundation types the
//! bridge itself relies on.
//!
//! Each type is an [`ObjectType`] newtype plus a [`Bound`] declaration,
//! the same shape any other binding takes. The typed methods are thin
//! wrappers over [`Bridge::invoke`] and friends.

use natbridge_core::{BridgeResult, GlobalSymbol, ObjectType, Selector, object_type};
use natbridge_registry::{BindingDecl, Bound};

use crate::bridge::Bridge;

object_type!(
    /// The root class.
    pub struct NSObject: "NSObject"
);

object_type!(
    /// An immutable string object.
    pub struct NSString: "NSString"
);

object_type!(
    /// A growable array of objects.
    pub struct NSMutableArray: "NSMutableArray"
);

object_type!(
    /// One of the two boolean singletons of CoreFoundation.
    pub struct CFBoolean: "__NSCFBoolean"
);

impl Bound for NSObject {
    fn declare() -> BindingDecl {
        BindingDecl::class("NSObject")
            .class_method::<(), NSObject>("new", "new")
            .method::<(), NSObject>("init", "init")
            .method::<(&NSObject,), bool>("is_equal", "isEqual:")
            .method::<(&Selector,), bool>("responds_to", "respondsToSelector:")
            .getter::<usize>("retain_count", "retainCount")
    }
}

impl NSObject {
    /// `+[NSObject new]`, which returns an owned object.
    pub fn new(bridge: &Bridge) -> BridgeResult<Self> {
        bridge.invoke_class::<Self, _, _>("new", ())
    }

    pub fn is_equal<O: ObjectType>(&self, bridge: &Bridge, other: &O) -> BridgeResult<bool> {
        bridge.invoke::<Self, _, _>(self, "is_equal", (other,))
    }

    pub fn responds_to(&self, bridge: &Bridge, selector: &str) -> BridgeResult<bool> {
        bridge.invoke::<Self, _, _>(self, "responds_to", (&Selector::new(selector),))
    }
}

impl Bound for NSString {
    fn declare() -> BindingDecl {
        BindingDecl::class("NSString").getter::<usize>("length", "length")
    }
}

impl NSString {
    /// Number of UTF-16 code units.
    pub fn len(&self, bridge: &Bridge) -> BridgeResult<usize> {
        bridge.get_property::<Self, _>(self, "length")
    }

    pub fn is_empty(&self, bridge: &Bridge) -> BridgeResult<bool> {
        Ok(self.len(bridge)? == 0)
    }
}

impl Bound for NSMutableArray {
    fn declare() -> BindingDecl {
        BindingDecl::class("NSMutableArray")
            .class_method::<(), NSMutableArray>("array", "array")
            .method::<(&NSObject,), ()>("add_object", "addObject:")
            .method::<(usize,), Option<NSObject>>("object_at", "objectAtIndex:")
            .getter::<usize>("count", "count")
    }
}

impl NSMutableArray {
    /// `+[NSMutableArray array]`.
    pub fn new(bridge: &Bridge) -> BridgeResult<Self> {
        bridge.invoke_class::<Self, _, _>("array", ())
    }

    /// Any object type may be added; the array retains it.
    pub fn add_object<O: ObjectType>(&self, bridge: &Bridge, object: &O) -> BridgeResult<()> {
        bridge.invoke::<Self, _, _>(self, "add_object", (object,))
    }

    pub fn object_at(&self, bridge: &Bridge, index: usize) -> BridgeResult<Option<NSObject>> {
        bridge.invoke::<Self, _, _>(self, "object_at", (index,))
    }

    pub fn count(&self, bridge: &Bridge) -> BridgeResult<usize> {
        bridge.get_property::<Self, _>(self, "count")
    }
}

impl Bound for CFBoolean {
    fn declare() -> BindingDecl {
        BindingDecl::class("__NSCFBoolean")
            .in_library("CoreFoundation")
            .global::<CFBoolean>(
                "true",
                GlobalSymbol::new("kCFBooleanTrue").in_library("CoreFoundation"),
            )
            .global::<CFBoolean>(
                "false",
                GlobalSymbol::new("kCFBooleanFalse").in_library("CoreFoundation"),
            )
            .instance_function::<(), bool>("value", "CFBooleanGetValue")
    }
}

impl CFBoolean {
    /// The singleton for `value`.
    pub fn value_of(bridge: &Bridge, value: bool) -> BridgeResult<Self> {
        bridge.binding_global::<Self, _>(if value { "true" } else { "false" })
    }

    pub fn value(&self, bridge: &Bridge) -> BridgeResult<bool> {
        bridge.invoke::<Self, _, _>(self, "value", ())
    }
}
