//! Simple vectors: fixed-length sequences of references, `[len][refs...]`.
//!
//! A vector's length is fixed once it is published. Until then it lives as an
//! [`UnpublishedSvec`], the only handle that can fill or truncate it.

use crate::barrier::WriteBarrier;
use crate::builtins::SIMPLE_VECTOR;
use crate::datatype::{ParamVec, TypeParam};
use crate::error::{CoreError, IndexKind};
use crate::heap::{Allocator, Heap, Value};
use crate::layout::REF_SIZE;

fn slot(v: Value, i: usize) -> usize {
    v.offset() + REF_SIZE * (i + 1)
}

/// A simple vector that has not been handed out yet.
#[derive(Debug)]
pub struct UnpublishedSvec {
    v: Value,
    len: usize,
}

impl UnpublishedSvec {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set<B: WriteBarrier>(&mut self, heap: &mut Heap<B>, i: usize, x: Value) -> Result<(), CoreError> {
        if i >= self.len {
            return Err(CoreError::out_of_range(IndexKind::Element, i, self.len));
        }
        heap.write_ref(slot(self.v, i), Some(x))?;
        heap.write_barrier(self.v, x)
    }

    /// Shrinks the vector. Only possible before publication.
    pub fn truncate<B: WriteBarrier>(&mut self, heap: &mut Heap<B>, len: usize) -> Result<(), CoreError> {
        if len > self.len {
            return Err(CoreError::out_of_range(IndexKind::Element, len, self.len));
        }
        for i in len..self.len {
            heap.write_ref(slot(self.v, i), None)?;
        }
        heap.write_usize(self.v.offset(), len)?;
        self.len = len;
        Ok(())
    }

    pub fn publish(self) -> Value {
        self.v
    }
}

impl<B: WriteBarrier> Heap<B> {
    pub fn svec_builder(&mut self, len: usize) -> Result<UnpublishedSvec, CoreError> {
        let v = self.allocate(SIMPLE_VECTOR, len)?;
        Ok(UnpublishedSvec { v, len })
    }

    pub fn new_svec(&mut self, items: &[Value]) -> Result<Value, CoreError> {
        let mut b = self.svec_builder(items.len())?;
        for (i, &x) in items.iter().enumerate() {
            b.set(self, i, x)?;
        }
        Ok(b.publish())
    }

    pub fn svec_len(&self, v: Value) -> Result<usize, CoreError> {
        self.expect_type(v, SIMPLE_VECTOR)?;
        self.read_usize(v.offset())
    }

    pub fn svec_get(&self, v: Value, i: usize) -> Result<Value, CoreError> {
        let len = self.svec_len(v)?;
        if i >= len {
            return Err(CoreError::out_of_range(IndexKind::Element, i, len));
        }
        self.read_ref(slot(v, i))?
            .ok_or_else(|| CoreError::undef(format!("simple vector element {i}")))
    }

    /// Boxes a descriptor's parameters into a simple vector.
    pub fn svec_from_params(&mut self, params: &ParamVec) -> Result<Value, CoreError> {
        let items = params
            .iter()
            .map(|p| match *p {
                TypeParam::Type(t) => self.box_type(t),
                TypeParam::Int(n) => self.box_value(n),
                TypeParam::Symbol(s) => self.box_value(s),
                TypeParam::Bool(b) => self.box_value(b),
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.new_svec(&items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::*;
    use crate::config::HeapConfig;
    use crate::registry::TypeRegistry;
    use std::sync::Arc;

    fn heap() -> Heap {
        Heap::with_config(Arc::new(TypeRegistry::new()), HeapConfig::default())
    }

    #[test]
    fn get_is_bounds_checked() {
        let mut heap = heap();
        let a = heap.box_value(1i64).unwrap();
        let b = heap.box_value(2i64).unwrap();
        let v = heap.new_svec(&[a, b]).unwrap();
        assert_eq!(heap.svec_len(v).unwrap(), 2);
        assert_eq!(heap.svec_get(v, 1).unwrap(), b);
        assert!(matches!(
            heap.svec_get(v, 2),
            Err(CoreError::IndexOutOfRange { index: 2, len: 2, .. })
        ));
    }

    #[test]
    fn unset_slots_are_undef() {
        let mut heap = heap();
        let v = heap.svec_builder(3).unwrap().publish();
        assert!(matches!(heap.svec_get(v, 0), Err(CoreError::UndefRef(_))));
    }

    #[test]
    fn truncate_only_shrinks() {
        let mut heap = heap();
        let x = heap.box_value(9u8).unwrap();
        let mut b = heap.svec_builder(4).unwrap();
        b.set(&mut heap, 0, x).unwrap();
        b.set(&mut heap, 3, x).unwrap();
        assert!(b.truncate(&mut heap, 5).is_err());
        b.truncate(&mut heap, 2).unwrap();
        assert!(b.set(&mut heap, 3, x).is_err());
        let v = b.publish();
        assert_eq!(heap.svec_len(v).unwrap(), 2);
        assert_eq!(heap.svec_get(v, 0).unwrap(), x);
    }

    #[test]
    fn params_become_boxed_values() {
        let mut heap = heap();
        let params = ParamVec::builder()
            .push(STRING)
            .push(TypeParam::Int(2))
            .push(TypeParam::Bool(false))
            .finish();
        let v = heap.svec_from_params(&params).unwrap();
        assert_eq!(heap.svec_len(v).unwrap(), 3);
        let t = heap.svec_get(v, 0).unwrap();
        assert_eq!(heap.unbox_type(t).unwrap(), STRING);
        assert_eq!(heap.unbox::<i64>(heap.svec_get(v, 1).unwrap()).unwrap(), 2);
        assert!(!heap.unbox::<bool>(heap.svec_get(v, 2).unwrap()).unwrap());
    }
}
