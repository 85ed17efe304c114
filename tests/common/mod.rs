//! Shared fixtures for the integration tests.
//!
//! Every test runs against its own `InProcessRuntime` populated with a small
//! CoreFoundation image: the boolean singletons, `CFBooleanGetValue` and a
//! few run loop mode strings.

#![allow(dead_code)]

use std::sync::Arc;

use natbridge::natbridge_core::NativeCallError;
use natbridge::prelude::*;

pub const CORE_FOUNDATION: &str = "CoreFoundation";

pub struct Fixture {
    pub runtime: Arc<InProcessRuntime>,
    pub bridge: Bridge,
    pub cf_true: NativeHandle,
    pub cf_false: NativeHandle,
    pub default_mode: NativeHandle,
    pub common_modes: NativeHandle,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::new().with_layout_validation(true))
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        let runtime = runtime();
        let (cf_true, cf_false) = define_booleans(&runtime);
        let default_mode = string_global(&runtime, "kCFRunLoopDefaultMode");
        let common_modes = string_global(&runtime, "kCFRunLoopCommonModes");
        let bridge = Bridge::new(runtime.clone(), config).unwrap();
        Fixture {
            runtime,
            bridge,
            cf_true,
            cf_false,
            default_mode,
            common_modes,
        }
    }

    pub fn stats(&self) -> natbridge::natbridge_core::runtime::StatsSnapshot {
        self.runtime.stats()
    }
}

pub fn runtime() -> Arc<InProcessRuntime> {
    let _ = env_logger::builder().is_test(true).try_init();
    let runtime = Arc::new(InProcessRuntime::new());
    runtime.add_library(CORE_FOUNDATION);
    runtime
}

fn define_booleans(runtime: &Arc<InProcessRuntime>) -> (NativeHandle, NativeHandle) {
    let object = runtime.lookup_class("NSObject").unwrap();
    runtime.define_class("__NSCFBoolean", object, &[]).unwrap();
    let (_, cf_true) = runtime
        .define_object_global(Some(CORE_FOUNDATION), "kCFBooleanTrue", "__NSCFBoolean")
        .unwrap();
    let (_, cf_false) = runtime
        .define_object_global(Some(CORE_FOUNDATION), "kCFBooleanFalse", "__NSCFBoolean")
        .unwrap();
    runtime.define_function(
        Some(CORE_FOUNDATION),
        "CFBooleanGetValue",
        move |args| match args {
            [NativeValue::Pointer(b)] => Ok(NativeValue::Bool(*b == cf_true)),
            _ => Err(NativeCallError::raised("CFBooleanGetValue: bad arguments")),
        },
    );
    (cf_true, cf_false)
}

/// A string global whose contents equal its symbol name.
fn string_global(runtime: &InProcessRuntime, name: &str) -> NativeHandle {
    let (_, value) = runtime
        .define_string_global(Some(CORE_FOUNDATION), name, name)
        .unwrap();
    value
}

natbridge::global_value_enum! {
    /// Run loop modes, with one mode that no loaded image defines.
    pub enum RunLoopMode in "CoreFoundation" {
        Default => "kCFRunLoopDefaultMode",
        Common => "kCFRunLoopCommonModes",
        Tracking => "UITrackingRunLoopMode" (optional),
    }
}
