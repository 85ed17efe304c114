//! The process-wide bridge. Kept in its own test binary, and in a single
//! test, because installation is global state.

mod common;

use common::{Fixture, RunLoopMode};
use natbridge::prelude::*;

#[test]
fn test_install_use_and_uninstall() {
    assert!(matches!(Bridge::global(), Err(BridgeError::NotInitialized(_))));
    assert!(matches!(
        RunLoopMode::Default.value(),
        Err(BridgeError::NotInitialized(_))
    ));

    let fixture = Fixture::new();
    let other = Fixture::new();
    let installed = Bridge::install(fixture.bridge).unwrap();

    // Only one bridge per process
    let err = Bridge::install(other.bridge).unwrap_err();
    assert!(matches!(err, BridgeError::NotInitialized(_)));

    let global = Bridge::global().unwrap();
    assert!(std::sync::Arc::ptr_eq(&installed, &global));

    assert_eq!(
        RunLoopMode::Common.value().unwrap(),
        Some(fixture.common_modes)
    );
    assert_eq!(RunLoopMode::Tracking.value().unwrap(), None);
    assert_eq!(
        RunLoopMode::value_of(fixture.default_mode).unwrap(),
        RunLoopMode::Default
    );
    assert_eq!(
        RunLoopMode::lookup(fixture.cf_true).unwrap(),
        EnumLookup::Unknown(fixture.cf_true)
    );
    assert!(matches!(
        RunLoopMode::value_of(fixture.cf_true),
        Err(BridgeError::NoSuchConstant(_))
    ));

    let removed = Bridge::uninstall().unwrap();
    assert!(std::sync::Arc::ptr_eq(&removed, &installed));
    assert!(Bridge::uninstall().is_none());
    assert!(matches!(Bridge::global(), Err(BridgeError::NotInitialized(_))));
}
