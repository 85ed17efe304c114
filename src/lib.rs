//! natbridge
//!
//! A bridge between managed Rust code and a native object runtime:
//! reference-counted objects dispatched by selector, C structs, C functions
//! and global data symbols.
//!
//! - [`Bridge`]: owns the resolve-once caches and performs calls
//! - [`BridgeConfig`]: options fixed at bridge creation
//! - [`foundation`]: bindings for the few native types the bridge uses
//!
//! The value layer lives in [`natbridge_core`], the symbol, global value and
//! binding caches in [`natbridge_registry`]. Both are re-exported.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use natbridge::prelude::*;
//! use natbridge::foundation::{NSMutableArray, NSObject};
//!
//! let runtime = Arc::new(InProcessRuntime::new());
//! let bridge = Bridge::new(runtime, BridgeConfig::default())?;
//!
//! let array = NSMutableArray::new(&bridge)?;
//! let object = NSObject::new(&bridge)?;
//! array.add_object(&bridge, &object)?;
//! assert_eq!(array.count(&bridge)?, 1);
//! # Ok::<(), BridgeError>(())
//! ```

mod bridge;
mod config;
mod dispatch;
mod enums;
pub mod foundation;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use enums::GlobalValueEnumExt;

pub use natbridge_core;
pub use natbridge_registry;

pub use natbridge_core::{native_struct, object_type, struct_marshal};
pub use natbridge_registry::global_value_enum;

pub mod prelude {
    pub use crate::bridge::Bridge;
    pub use crate::config::BridgeConfig;
    pub use crate::enums::GlobalValueEnumExt;

    pub use natbridge_core::{
        BridgeError, BridgeResult, FromNative, GlobalSymbol, InProcessRuntime, MachineFloat,
        MarshalContext, MarshalError, MarshalFlags, NativeHandle, NativeObject, NativeRuntime,
        NativeTyped, NativeValue, ObjectType, PointerMarshaler, Ptr, PtrSlot, Selector,
        StructDescriptor, StructMemory, TargetAbi, ToNative,
    };
    pub use natbridge_registry::{BindingDecl, Bound, EnumLookup, GlobalValueEnum};
}
