mod common;

use common::{define, fresh_heap, int};
use corvid_core::builtins::*;
use corvid_core::{CoreError, IndexKind, ParamVec, TypeDef, TypeParam};

#[test]
fn int8_array_scenario() {
    let mut heap = fresh_heap();
    let a = heap.new_array(INT8, &[5]).unwrap();
    for i in 0..5 {
        assert_eq!(heap.array_get_bits::<i8>(a, i).unwrap(), 0);
    }
    heap.array_set_bits(a, 0, 7i8).unwrap();
    heap.array_set_bits(a, 4, 9i8).unwrap();
    assert_eq!(heap.array_get_bits::<i8>(a, 0).unwrap(), 7);
    assert_eq!(heap.array_get_bits::<i8>(a, 4).unwrap(), 9);
    assert_eq!(heap.array_get_bits::<i8>(a, 2).unwrap(), 0);
    assert!(matches!(
        heap.array_get(a, 5),
        Err(CoreError::IndexOutOfRange {
            kind: IndexKind::Element,
            index: 5,
            len: 5
        })
    ));
}

#[test]
fn parameter_vector_scenario() {
    let heap = fresh_heap();
    let reg = heap.registry();
    reg.declare(
        TypeDef::structure("Triple")
            .param("A")
            .param("B")
            .param("C")
            .param_field("a", 0)
            .param_field("b", 1)
            .param_field("c", 2),
    )
    .unwrap();
    let t = reg
        .apply(
            corvid_core::intern("Triple"),
            ParamVec::of_types(&[INT64, STRING, BOOL]),
        )
        .unwrap();
    assert_eq!(reg.parameter(t, 1).unwrap(), TypeParam::Type(STRING));
    assert!(matches!(
        reg.parameter(t, 3),
        Err(CoreError::IndexOutOfRange {
            kind: IndexKind::Parameter,
            index: 3,
            len: 3
        })
    ));
    assert_eq!(reg.field_type(t, 1).unwrap(), STRING);
}

#[test]
fn box_negative_one() {
    let mut heap = fresh_heap();
    let v = heap.box_value(-1i64).unwrap();
    assert_eq!(heap.unbox::<i64>(v).unwrap(), -1);
    assert!(matches!(
        heap.unbox::<u64>(v),
        Err(CoreError::TypeMismatch { .. })
    ));
}

#[test]
fn parameter_identity() {
    let heap = fresh_heap();
    let reg = heap.registry();
    let a = reg.tuple_type(&[INT64, FLOAT64]).unwrap();
    let b = reg.tuple_type(&[INT64, FLOAT64]).unwrap();
    let c = reg.tuple_type(&[FLOAT64, INT64]).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);

    let mut heap = heap;
    let x = int(&mut heap, 1);
    let y = heap.box_value(2.0f64).unwrap();
    let v = heap.new_struct(a, &[x, y]).unwrap();
    assert!(heap.is_of_type(v, b).unwrap());
    assert!(!heap.is_of_type(v, c).unwrap());
}

#[test]
fn type_of_matches_constructor() {
    let mut heap = fresh_heap();
    let point = define(
        &heap,
        TypeDef::structure("Point").field("x", FLOAT64).field("y", FLOAT64),
    );
    let s = heap.new_string("hi").unwrap();
    let sv = heap.new_svec(&[s]).unwrap();
    let arr = heap.new_array(ANY, &[2, 2]).unwrap();
    let p = heap.new_struct_uninit(point).unwrap();
    let m = heap.new_module(corvid_core::intern("Main"), None).unwrap();

    assert_eq!(heap.type_of(s).unwrap(), STRING);
    assert_eq!(heap.type_of(sv).unwrap(), SIMPLE_VECTOR);
    assert_eq!(
        heap.type_of(arr).unwrap(),
        heap.registry().array_type(ANY, 2).unwrap()
    );
    assert_eq!(heap.type_of(p).unwrap(), point);
    assert_eq!(heap.type_of(m).unwrap(), MODULE);
}

#[test]
fn nested_struct_fields_read_in_place() {
    let mut heap = fresh_heap();
    let point = define(
        &heap,
        TypeDef::structure("P2").field("x", INT32).field("y", INT32),
    );
    let rect = define(
        &heap,
        TypeDef::mutable_structure("Rect")
            .field("min", point)
            .field("max", point)
            .field("name", STRING),
    );
    let layout = heap.registry().layout(rect).unwrap();
    assert!(layout.fields[0].inline);
    assert_eq!(layout.fields[1].offset, 8);
    assert_eq!(layout.pointer_offsets, vec![16]);

    let one = heap.box_value(1i32).unwrap();
    let two = heap.box_value(2i32).unwrap();
    let p = heap.new_struct(point, &[one, two]).unwrap();
    let r = heap.new_struct_uninit(rect).unwrap();
    heap.set_field(r, 1, p).unwrap();

    let max = heap.get_field_value(r, 1).unwrap();
    assert_eq!(heap.type_of(max).unwrap(), point);
    assert_eq!(heap.get_field_bits::<i32>(max, 1).unwrap(), 2);
    assert!(!heap.is_field_defined(r, 2).unwrap());
}

#[test]
fn out_of_memory_propagates() {
    use corvid_core::{Heap, HeapConfig, TypeRegistry};
    use std::sync::Arc;

    let cfg = HeapConfig::default().with_max_bytes(256);
    let mut heap = Heap::with_config(Arc::new(TypeRegistry::new()), cfg);
    let err = heap.new_array(INT64, &[64]).unwrap_err();
    assert!(matches!(err, CoreError::OutOfMemory { limit: 256, .. }));
}
