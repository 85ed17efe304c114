//! Struct member access and by-value struct marshaling.

mod common;

use std::sync::Arc;

use common::Fixture;
use natbridge::native_struct;
use natbridge::natbridge_core::{NativeCallError, NativeType, StructField, StructType};
use natbridge::prelude::*;

native_struct! {
    /// `NSRange`.
    pub struct NSRange {
        0 => location / set_location: usize,
        1 => length / set_length: usize,
    }
}

native_struct! {
    /// Mixed widths, so members land on padded offsets.
    pub struct Sample {
        0 => flag / set_flag: bool,
        1 => small / set_small: i16,
        2 => wide / set_wide: i64,
        3 => ratio / set_ratio: f32,
        4 => scale / set_scale: MachineFloat,
        5 => count / set_count: isize,
    }
}

// =============================================================================
// Member independence
// =============================================================================

fn snapshot(memory: &StructMemory, skip: u32) -> Vec<(u32, Vec<u8>)> {
    let descriptor = memory.descriptor();
    descriptor
        .members()
        .iter()
        .filter(|m| m.ordinal() != skip)
        .map(|m| {
            let start = m.offset();
            (m.ordinal(), memory.as_bytes()[start..start + m.byte_len()].to_vec())
        })
        .collect()
}

fn fill(sample: &mut Sample) {
    sample
        .set_flag(true)
        .set_small(-7)
        .set_wide(i64::MIN + 3)
        .set_ratio(0.25)
        .set_scale(MachineFloat::new(2.5))
        .set_count(-42);
}

#[test]
fn test_members_round_trip() {
    let mut sample = Sample::default();
    fill(&mut sample);
    assert!(sample.flag());
    assert_eq!(sample.small(), -7);
    assert_eq!(sample.wide(), i64::MIN + 3);
    assert_eq!(sample.ratio(), 0.25);
    assert_eq!(sample.scale(), MachineFloat::new(2.5));
    assert_eq!(sample.count(), -42);
}

#[test]
fn test_writing_a_member_leaves_the_others_alone() {
    let mut sample = Sample::default();
    fill(&mut sample);

    for ordinal in 0..6u32 {
        let before = snapshot(sample.memory(), ordinal);
        match ordinal {
            0 => sample.set_flag(false),
            1 => sample.set_small(i16::MAX),
            2 => sample.set_wide(7),
            3 => sample.set_ratio(-1.0),
            4 => sample.set_scale(MachineFloat::new(-0.5)),
            _ => sample.set_count(isize::MAX),
        };
        assert_eq!(
            snapshot(sample.memory(), ordinal),
            before,
            "writing member {ordinal}"
        );
    }
}

#[test]
fn test_machine_sized_members_follow_pointer_width() {
    let descriptor = Sample::descriptor();
    let count = descriptor.member(5).unwrap();
    assert_eq!(count.element_size(), std::mem::size_of::<usize>());
    assert_eq!(count.offset() % std::mem::align_of::<isize>(), 0);
    assert_eq!(descriptor.size() % descriptor.align(), 0);
}

// =============================================================================
// Arrays
// =============================================================================

fn array_struct() -> Arc<StructDescriptor> {
    StructDescriptor::builder("Samples", TargetAbi::host())
        .member(0, "count", NativeType::U32)
        .array(1, "values", NativeType::I16, 5)
        .member(2, "tail", NativeType::U8)
        .build()
        .unwrap()
}

fn other_elements(memory: &StructMemory, k: usize) -> Vec<i16> {
    (0..5)
        .filter(|&j| j != k)
        .map(|j| memory.get_element(1, j))
        .collect()
}

#[test]
fn test_array_elements_are_independent() {
    let mut memory = StructMemory::new(array_struct());
    memory.set(0, 5u32).set(2, 0xAAu8);

    for k in 0..5 {
        memory.set_element(1, k, (k as i16 + 1) * 100);
    }
    for k in 0..5 {
        let others = other_elements(&memory, k);
        memory.set_element(1, k, -1i16);
        assert_eq!(memory.get_element::<i16>(1, k), -1);
        assert_eq!(other_elements(&memory, k), others);
    }
    assert_eq!(memory.get::<u32>(0), 5);
    assert_eq!(memory.get::<u8>(2), 0xAA);
}

#[test]
fn test_array_access_past_arity_fails() {
    let memory = StructMemory::new(array_struct());
    assert!(memory.try_get_element::<i16>(1, 5).is_err());
    assert_eq!(memory.try_get_array::<i16>(1).unwrap().len(), 5);
}

#[test]
fn test_array_of_structs() {
    let range = NSRange::descriptor();
    let regions = StructDescriptor::builder("Regions", TargetAbi::host())
        .member(0, "count", NativeType::U32)
        .array(1, "regions", NativeType::Struct(range.clone()), 2)
        .build()
        .unwrap();
    regions.validate().unwrap();

    let mut memory = StructMemory::new(regions);
    let mut first = NSRange::default();
    first.set_location(1).set_length(2);
    let mut second = NSRange::default();
    second.set_location(10).set_length(20);
    memory
        .try_set_struct_element(1, 0, first.memory())
        .unwrap()
        .try_set_struct_element(1, 1, second.memory())
        .unwrap();

    let read = NSRange::try_from_memory(memory.try_get_struct_element(1, 1).unwrap()).unwrap();
    assert_eq!(read.location(), 10);
    assert_eq!(read.length(), 20);
    // Copies out, never aliases
    second.set_length(99);
    assert_eq!(read.length(), 20);
}

// =============================================================================
// By-value marshaling
// =============================================================================

struct RangeFunctions;

impl Bound for RangeFunctions {
    fn declare() -> BindingDecl {
        BindingDecl::class("NSObject")
            .function::<(&NSRange,), usize>("max_range", "NSMaxRange")
            .function::<(usize, usize), NSRange>("make_range", "NSMakeRange")
    }
}

fn define_range_functions(fixture: &Fixture) {
    let runtime = &fixture.runtime;
    runtime.define_function(None, "NSMaxRange", |args| match args {
        [NativeValue::Struct(range)] => {
            Ok(NativeValue::USize(range.get::<usize>(0) + range.get::<usize>(1)))
        }
        _ => Err(NativeCallError::raised("NSMaxRange")),
    });
    runtime.define_function(None, "NSMakeRange", |args| match args {
        [NativeValue::USize(location), NativeValue::USize(length)] => {
            let mut range = NSRange::default();
            range.set_location(*location).set_length(*length);
            Ok(NativeValue::Struct(range.memory().clone()))
        }
        _ => Err(NativeCallError::raised("NSMakeRange")),
    });
}

#[test]
fn test_struct_passes_by_value() {
    let fixture = Fixture::new();
    define_range_functions(&fixture);

    let mut range = NSRange::default();
    range.set_location(3).set_length(4);
    let max: usize = fixture
        .bridge
        .invoke_class::<RangeFunctions, _, _>("max_range", (&range,))
        .unwrap();
    assert_eq!(max, 7);

    let made: NSRange = fixture
        .bridge
        .invoke_class::<RangeFunctions, _, _>("make_range", (5usize, 6usize))
        .unwrap();
    assert_eq!((made.location(), made.length()), (5, 6));
}

#[test]
fn test_struct_marshals_as_a_copy() {
    let fixture = Fixture::new();
    let cx = fixture.bridge.context();

    let mut range = NSRange::default();
    range.set_location(8).set_length(9);
    let value = range.to_native(&cx, MarshalFlags::empty()).unwrap();
    range.set_length(0);

    let back = NSRange::from_native(&cx, value, MarshalFlags::empty()).unwrap();
    assert_eq!(back.length(), 9);
    assert!(NSRange::from_native(&cx, NativeValue::U32(1), MarshalFlags::empty()).is_err());
}

#[test]
fn test_struct_field_types_report_native_types() {
    assert_eq!(
        <usize as StructField>::native_type(),
        NativeType::MachineUInt
    );
    assert_eq!(
        <MachineFloat as StructField>::native_type(),
        NativeType::MachineFloat
    );
}
