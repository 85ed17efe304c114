//! Native struct layout.
//!
//! A struct is modeled as raw memory plus an explicit descriptor table of
//! (ordinal, offset, type, arity) entries computed once per struct type
//! from the platform's C layout rules:
//!
//! - [`StructDescriptor`]: the table, built with [`StructDescriptor::builder`]
//!   and checked with [`StructDescriptor::validate`]
//! - [`StructMemory`]: an owned allocation or a view of native memory, with
//!   typed member access by ordinal
//! - [`StructField`]: scalar types members can hold
//! - [`StructType`]: a managed struct wrapper with a memoized descriptor,
//!   usually generated by [`native_struct!`](crate::native_struct)
//!
//! # Example
//!
//! ```ignore
//! native_struct! {
//!     pub struct NSRange {
//!         0 => location / set_location: usize,
//!         1 => length / set_length: usize,
//!     }
//! }
//!
//! let mut range = NSRange::default();
//! range.set_location(3).set_length(4);
//! assert_eq!(range.length(), 4);
//! ```

mod descriptor;
mod field;
mod memory;

use std::sync::Arc;

pub use descriptor::{Arity, MemberLayout, StructDescriptor, StructDescriptorBuilder};
pub use field::StructField;
pub use memory::StructMemory;

use crate::error::LayoutError;

/// A managed wrapper over one native struct type.
pub trait StructType: Sized {
    /// The struct's layout for the host ABI. Computed once.
    fn descriptor() -> Arc<StructDescriptor>;

    /// Wrap memory already known to hold this struct.
    fn from_memory(memory: StructMemory) -> Self;

    fn memory(&self) -> &StructMemory;

    fn memory_mut(&mut self) -> &mut StructMemory;

    /// A zero-initialized instance.
    fn zeroed() -> Self {
        Self::from_memory(StructMemory::new(Self::descriptor()))
    }

    /// Wrap memory, checking it was laid out with this type's descriptor.
    fn try_from_memory(memory: StructMemory) -> Result<Self, LayoutError> {
        let expected = Self::descriptor();
        if memory.descriptor().as_ref() != expected.as_ref() {
            return Err(LayoutError::StructMismatch {
                strukt: expected.name().to_string(),
                expected: expected.name().to_string(),
                actual: memory.descriptor().name().to_string(),
            });
        }
        Ok(Self::from_memory(memory))
    }
}

/// Declare a struct type with scalar members, its host-ABI descriptor,
/// accessors and by-value marshaling.
///
/// Each member is `ordinal => getter / setter: Type`. Setters return
/// `&mut Self` for chaining.
///
/// # Panics
///
/// The generated descriptor function panics if the members cannot be laid
/// out, which only happens for a member type that cannot live in a struct.
#[macro_export]
macro_rules! native_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $ord:literal => $getter:ident / $setter:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq)]
        $vis struct $name($crate::layout::StructMemory);

        impl $crate::layout::StructType for $name {
            fn descriptor() -> ::std::sync::Arc<$crate::layout::StructDescriptor> {
                use ::std::sync::{Arc, OnceLock};
                use $crate::layout::{StructDescriptor, StructField};

                static DESCRIPTOR: OnceLock<Arc<StructDescriptor>> = OnceLock::new();
                Arc::clone(DESCRIPTOR.get_or_init(|| {
                    StructDescriptor::builder(stringify!($name), $crate::TargetAbi::host())
                        $(
                            .member($ord, stringify!($getter), <$ty as StructField>::native_type())
                        )*
                        .build()
                        .unwrap_or_else(|err| {
                            panic!("invalid layout for {}: {}", stringify!($name), err)
                        })
                }))
            }

            fn from_memory(memory: $crate::layout::StructMemory) -> Self {
                $name(memory)
            }

            fn memory(&self) -> &$crate::layout::StructMemory {
                &self.0
            }

            fn memory_mut(&mut self) -> &mut $crate::layout::StructMemory {
                &mut self.0
            }
        }

        impl $name {
            $(
                pub fn $getter(&self) -> $ty {
                    self.0.get::<$ty>($ord)
                }

                pub fn $setter(&mut self, value: $ty) -> &mut Self {
                    self.0.set::<$ty>($ord, value);
                    self
                }
            )*
        }

        impl ::std::default::Default for $name {
            fn default() -> Self {
                <Self as $crate::layout::StructType>::zeroed()
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.debug_struct(stringify!($name))
                    $( .field(stringify!($getter), &self.$getter()) )*
                    .finish()
            }
        }

        $crate::struct_marshal!($name);
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::NativeType;
    use crate::value::MachineFloat;

    crate::native_struct! {
        /// `NSRange`.
        pub struct Range {
            0 => location / set_location: usize,
            1 => length / set_length: usize,
        }
    }

    crate::native_struct! {
        pub struct Point {
            0 => x / set_x: MachineFloat,
            1 => y / set_y: MachineFloat,
        }
    }

    #[test]
    fn generated_accessors() {
        let mut range = Range::default();
        range.set_location(3).set_length(4);
        assert_eq!(range.location(), 3);
        assert_eq!(range.length(), 4);
        assert_eq!(format!("{:?}", range), "Range { location: 3, length: 4 }");
    }

    #[test]
    fn descriptor_is_memoized() {
        let a = Range::descriptor();
        let b = Range::descriptor();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.size(), 2 * std::mem::size_of::<usize>());
        assert_eq!(a.member(1).unwrap().ty(), &NativeType::MachineUInt);
    }

    #[test]
    fn copies_are_independent() {
        let mut p = Point::default();
        p.set_x(MachineFloat(1.0));
        let mut q = p.clone();
        q.set_x(MachineFloat(2.0));
        assert_eq!(p.x(), MachineFloat(1.0));
        assert_eq!(q.x(), MachineFloat(2.0));
    }

    #[test]
    fn from_memory_checks_descriptor() {
        let mem = StructMemory::new(Point::descriptor());
        assert!(Point::try_from_memory(mem.clone()).is_ok());
        let err = Range::try_from_memory(mem).unwrap_err();
        assert!(matches!(err, LayoutError::StructMismatch { .. }));
    }
}
