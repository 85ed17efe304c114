//! Ownership flags carried by every marshaling operation.

use bitflags::bitflags;

bitflags! {
    /// Ownership intent of a handle crossing the boundary.
    ///
    /// With no flags set a handle is borrowed: a managed object that keeps it
    /// retains it, and a handle passed to native code is not consumed.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct MarshalFlags: u32 {
        /// The handle already carries a +1 owned by the receiver of the
        /// value. Managed wrappers adopt it instead of retaining again.
        const RETAINED = 1 << 0;
        /// The managed side only observes the handle: never retain it and
        /// never release it.
        const OBSERVED = 1 << 1;
        /// Native code consumes a +1 on the handle passed to it; the bridge
        /// retains on the way out so the managed reference stays valid.
        const TRANSFER_OWNERSHIP = 1 << 2;
        /// The value is an argument of a callback from native code.
        const CALLBACK = 1 << 3;
    }
}

impl MarshalFlags {
    /// Flags for a returned handle, given whether it is +1.
    pub fn for_return(retained: bool) -> Self {
        if retained {
            MarshalFlags::RETAINED
        } else {
            MarshalFlags::empty()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_borrowed() {
        let flags = MarshalFlags::default();
        assert!(!flags.contains(MarshalFlags::RETAINED));
        assert!(!flags.contains(MarshalFlags::OBSERVED));
    }

    #[test]
    fn for_return() {
        assert_eq!(MarshalFlags::for_return(true), MarshalFlags::RETAINED);
        assert!(MarshalFlags::for_return(false).is_empty());
    }
}
