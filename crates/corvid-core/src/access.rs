//! Generic field access, resolved through the value's [`Layout`](crate::layout::Layout).
//!
//! One path serves every struct-like type: look up the field's offset and
//! declared type, then either view the bytes in place (inline fields) or
//! follow the stored reference.

use crate::barrier::WriteBarrier;
use crate::boxing::Primitive;
use crate::builtins::MODULE;
use crate::datatype::TypeKind;
use crate::error::CoreError;
use crate::header::TypeRef;
use crate::heap::{Allocator, Heap, Value};
use crate::layout::FieldLayout;

/// A field or element read: either a reference or inline bits borrowed from
/// the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datum<'h> {
    Ref(Value),
    Bits { ty: TypeRef, bytes: &'h [u8] },
}

impl<'h> Datum<'h> {
    pub fn as_value(&self) -> Option<Value> {
        match self {
            Datum::Ref(v) => Some(*v),
            Datum::Bits { .. } => None,
        }
    }

    pub fn bits(&self) -> Option<(TypeRef, &'h [u8])> {
        match self {
            Datum::Ref(_) => None,
            Datum::Bits { ty, bytes } => Some((*ty, *bytes)),
        }
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, Datum::Ref(_))
    }
}

impl<B: WriteBarrier> Heap<B> {
    /// Reads a scalar out of a datum, unboxing references.
    pub fn read_datum<T: Primitive>(&self, d: Datum<'_>) -> Result<T, CoreError> {
        match d {
            Datum::Ref(v) => self.unbox(v),
            Datum::Bits { ty, bytes } if ty == T::TYPE => T::read_bytes(bytes),
            Datum::Bits { ty, .. } => Err(self.mismatch(T::TYPE, ty)),
        }
    }

    fn field_layout(&self, v: Value, i: usize) -> Result<FieldLayout, CoreError> {
        let layout = self.registry().layout(self.type_of(v)?)?;
        Ok(layout.field(i)?.clone())
    }

    fn undef_field(&self, v: Value, fl: &FieldLayout) -> CoreError {
        let owner = self
            .type_of(v)
            .and_then(|t| self.registry().type_string(t))
            .unwrap_or_else(|_| v.to_string());
        CoreError::undef(format!("field {} of {owner}", fl.name))
    }

    pub fn nfields(&self, v: Value) -> Result<usize, CoreError> {
        let t = self.type_of(v)?;
        Ok(self.registry().layout(t)?.nfields())
    }

    pub fn get_field(&self, v: Value, i: usize) -> Result<Datum<'_>, CoreError> {
        let fl = self.field_layout(v, i)?;
        let at = v.offset() + fl.offset;
        if fl.inline {
            return Ok(Datum::Bits {
                ty: fl.ty,
                bytes: self.bytes(at, fl.size)?,
            });
        }
        match self.read_ref(at)? {
            Some(x) => Ok(Datum::Ref(x)),
            None => Err(self.undef_field(v, &fl)),
        }
    }

    pub fn is_field_defined(&self, v: Value, i: usize) -> Result<bool, CoreError> {
        let fl = self.field_layout(v, i)?;
        if fl.inline {
            return Ok(true);
        }
        Ok(self.read_ref(v.offset() + fl.offset)?.is_some())
    }

    /// Field `i` as a first-class value. Inline fields are copied into a
    /// freshly boxed object.
    pub fn get_field_value(&mut self, v: Value, i: usize) -> Result<Value, CoreError> {
        let fl = self.field_layout(v, i)?;
        let at = v.offset() + fl.offset;
        if !fl.inline {
            return self.read_ref(at)?.ok_or_else(|| self.undef_field(v, &fl));
        }
        let boxed = self.allocate(fl.ty, 0)?;
        self.copy_within(at, fl.size, boxed.offset())?;
        Ok(boxed)
    }

    pub fn get_field_by_name(&self, v: Value, name: &str) -> Result<Datum<'_>, CoreError> {
        let i = self.registry().field_index(self.type_of(v)?, name)?;
        self.get_field(v, i)
    }

    pub fn get_field_bits<T: Primitive>(&self, v: Value, i: usize) -> Result<T, CoreError> {
        let d = self.get_field(v, i)?;
        self.read_datum(d)
    }

    /// Stores `x` into field `i` of a mutable object.
    pub fn set_field(&mut self, v: Value, i: usize, x: Value) -> Result<(), CoreError> {
        let t = self.type_of(v)?;
        let fl = self.field_layout(v, i)?;
        if !self.registry().is_mutable(t)? {
            return Err(CoreError::Immutable(format!(
                "field {} of {}",
                fl.name,
                self.registry().type_string(t)?
            )));
        }
        if t == MODULE {
            self.check_module_parent(v, i, x)?;
        }
        self.store_field(v, &fl, x)
    }

    /// Writes a scalar straight into an inline field of a mutable object.
    pub fn set_field_bits<T: Primitive>(&mut self, v: Value, i: usize, x: T) -> Result<(), CoreError> {
        let t = self.type_of(v)?;
        let fl = self.field_layout(v, i)?;
        if !self.registry().is_mutable(t)? {
            return Err(CoreError::Immutable(format!(
                "field {} of {}",
                fl.name,
                self.registry().type_string(t)?
            )));
        }
        if !fl.inline || fl.ty != T::TYPE {
            return Err(self.mismatch(fl.ty, T::TYPE));
        }
        x.write_bytes(self.bytes_mut(v.offset() + fl.offset, T::SIZE)?);
        Ok(())
    }

    fn store_field(&mut self, v: Value, fl: &FieldLayout, x: Value) -> Result<(), CoreError> {
        let xt = self.type_of(x)?;
        if !self.registry().isa(xt, fl.ty)? {
            return Err(self.mismatch(fl.ty, xt));
        }
        let at = v.offset() + fl.offset;
        if fl.inline {
            self.copy_within(x.offset(), fl.size, at)
        } else {
            self.write_ref(at, Some(x))?;
            self.write_barrier(v, x)
        }
    }

    fn expect_struct(&self, t: TypeRef) -> Result<(), CoreError> {
        match self.registry().get(t)?.kind() {
            TypeKind::Struct | TypeKind::Tuple => Ok(()),
            _ => Err(CoreError::invalid_argument(format!(
                "{} is not a struct type",
                self.registry().type_string(t)?
            ))),
        }
    }

    /// An instance of `t` with every inline field zeroed and every reference
    /// field `#undef`.
    pub fn new_struct_uninit(&mut self, t: TypeRef) -> Result<Value, CoreError> {
        self.expect_struct(t)?;
        self.allocate(t, 0)
    }

    /// An instance of `t` initialized from `args`, one per field. Works for
    /// immutable types too.
    pub fn new_struct(&mut self, t: TypeRef, args: &[Value]) -> Result<Value, CoreError> {
        self.expect_struct(t)?;
        let layout = self.registry().layout(t)?;
        if args.len() != layout.nfields() {
            return Err(CoreError::invalid_argument(format!(
                "{} has {} fields, got {} values",
                self.registry().type_string(t)?,
                layout.nfields(),
                args.len()
            )));
        }
        let v = self.allocate(t, 0)?;
        for (fl, &x) in layout.fields.iter().zip(args) {
            self.store_field(v, fl, x)?;
        }
        Ok(v)
    }

    /// Exact type identity.
    pub fn is_of_type(&self, v: Value, t: TypeRef) -> Result<bool, CoreError> {
        Ok(self.type_of(v)? == t)
    }

    pub fn isa(&self, v: Value, t: TypeRef) -> Result<bool, CoreError> {
        self.registry().isa(self.type_of(v)?, t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::*;
    use crate::config::HeapConfig;
    use crate::datatype::TypeDef;
    use crate::header::GcBits;
    use crate::registry::TypeRegistry;
    use std::sync::Arc;

    fn heap() -> Heap {
        Heap::with_config(Arc::new(TypeRegistry::new()), HeapConfig::default())
    }

    #[test]
    fn inline_and_reference_fields() {
        let mut heap = heap();
        let t = heap
            .registry()
            .define(
                TypeDef::structure("Tagged")
                    .field("id", INT32)
                    .field("label", STRING),
            )
            .unwrap();
        let id = heap.box_value(42i32).unwrap();
        let label = heap.new_string("answer").unwrap();
        let v = heap.new_struct(t, &[id, label]).unwrap();

        assert_eq!(heap.nfields(v).unwrap(), 2);
        assert_eq!(heap.get_field_bits::<i32>(v, 0).unwrap(), 42);
        let l = heap.get_field(v, 1).unwrap().as_value().unwrap();
        assert_eq!(heap.string_str(l).unwrap(), "answer");
        let by_name = heap.get_field_by_name(v, "label").unwrap();
        assert_eq!(by_name, Datum::Ref(label));
        assert!(matches!(
            heap.get_field(v, 2),
            Err(CoreError::IndexOutOfRange { index: 2, len: 2, .. })
        ));
        assert!(matches!(
            heap.get_field_by_name(v, "missing"),
            Err(CoreError::UndefRef(_))
        ));
    }

    #[test]
    fn immutable_fields_cannot_be_set() {
        let mut heap = heap();
        let t = heap
            .registry()
            .define(TypeDef::structure("Frozen").field("x", INT64))
            .unwrap();
        let one = heap.box_value(1i64).unwrap();
        let v = heap.new_struct(t, &[one]).unwrap();
        let by_value = heap.set_field(v, 0, one).unwrap_err();
        let by_bits = heap.set_field_bits(v, 0, 2i64).unwrap_err();
        assert_eq!(by_value, CoreError::Immutable("field x of Frozen".into()));
        assert_eq!(by_bits, by_value);
    }

    #[test]
    fn set_field_checks_declared_type() {
        let mut heap = heap();
        let t = heap
            .registry()
            .define(
                TypeDef::mutable_structure("Slot")
                    .field("n", INT64)
                    .field("any", ANY),
            )
            .unwrap();
        let v = heap.new_struct_uninit(t).unwrap();
        assert!(!heap.is_field_defined(v, 1).unwrap());
        assert!(matches!(heap.get_field(v, 1), Err(CoreError::UndefRef(_))));

        let f = heap.box_value(1.5f64).unwrap();
        assert!(matches!(
            heap.set_field(v, 0, f),
            Err(CoreError::TypeMismatch { .. })
        ));
        heap.set_field(v, 1, f).unwrap();
        assert!(heap.is_field_defined(v, 1).unwrap());

        let n = heap.box_value(-3i64).unwrap();
        heap.set_field(v, 0, n).unwrap();
        assert_eq!(heap.get_field_bits::<i64>(v, 0).unwrap(), -3);
        heap.set_field_bits(v, 0, 11i64).unwrap();
        assert_eq!(heap.get_field_bits::<i64>(v, 0).unwrap(), 11);
        assert!(heap.set_field_bits(v, 0, 11i32).is_err());
    }

    #[test]
    fn reference_store_runs_barrier() {
        let mut heap = heap();
        let t = heap
            .registry()
            .define(TypeDef::mutable_structure("Box1").field("x", ANY))
            .unwrap();
        let v = heap.new_struct_uninit(t).unwrap();
        heap.set_gc_bits(v, GcBits::OLD).unwrap();
        let young = heap.box_value(0u8).unwrap();
        heap.set_field(v, 0, young).unwrap();
        assert_eq!(heap.barrier().roots(), &[v]);
    }

    #[test]
    fn new_struct_checks_arity() {
        let mut heap = heap();
        let t = heap.registry().tuple_type(&[INT8, INT8]).unwrap();
        let x = heap.box_value(1i8).unwrap();
        assert!(matches!(
            heap.new_struct(t, &[x]),
            Err(CoreError::InvalidArgument(_))
        ));
        let v = heap.new_struct(t, &[x, x]).unwrap();
        assert!(heap.is_of_type(v, t).unwrap());
        assert!(heap.isa(v, ANY).unwrap());
        assert!(heap.new_struct(STRING, &[]).is_err());
    }

    #[test]
    fn field_value_boxes_inline_bits() {
        let mut heap = heap();
        let t = heap.registry().tuple_type(&[FLOAT64, STRING]).unwrap();
        let x = heap.box_value(2.25f64).unwrap();
        let s = heap.new_string("s").unwrap();
        let v = heap.new_struct(t, &[x, s]).unwrap();
        let boxed = heap.get_field_value(v, 0).unwrap();
        assert_ne!(boxed, x);
        assert_eq!(heap.unbox::<f64>(boxed).unwrap(), 2.25);
        assert_eq!(heap.get_field_value(v, 1).unwrap(), s);
    }
}
