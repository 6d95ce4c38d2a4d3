#![allow(dead_code)]

use std::sync::Arc;

use corvid_core::{Heap, HeapConfig, TypeDef, TypeRef, TypeRegistry, Value};

/// A heap over its own registry, so tests never share declarations.
pub fn fresh_heap() -> Heap {
    Heap::with_config(Arc::new(TypeRegistry::new()), HeapConfig::default())
}

/// Declare a non-parametric type, panicking with context on failure.
pub fn define(heap: &Heap, def: TypeDef) -> TypeRef {
    let name = def.name();
    heap.registry()
        .define(def)
        .unwrap_or_else(|e| panic!("defining {name} failed: {e}"))
}

/// Box an i64, panicking with context on failure.
pub fn int(heap: &mut Heap, n: i64) -> Value {
    heap.box_value(n)
        .unwrap_or_else(|e| panic!("boxing {n} failed: {e}"))
}
