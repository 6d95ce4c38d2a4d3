//! Conversions between native scalars and boxed heap values.

use crate::barrier::WriteBarrier;
use crate::builtins;
use crate::error::CoreError;
use crate::header::TypeRef;
use crate::heap::{Allocator, Heap, Value};
use crate::symbol::Symbol;

/// A native scalar with a fixed-size bits representation on the heap.
pub trait Primitive: Copy + Sized {
    /// The descriptor boxed values of this type carry.
    const TYPE: TypeRef;
    const SIZE: usize;

    /// Writes the little-endian bits into `out[..SIZE]`.
    fn write_bytes(self, out: &mut [u8]);

    fn read_bytes(bytes: &[u8]) -> Result<Self, CoreError>;
}

fn take<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N], CoreError> {
    bytes
        .get(..N)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| CoreError::type_mismatch(what, format!("{} bytes", bytes.len())))
}

macro_rules! impl_number {
    ($($t:ty => $desc:ident, $name:literal;)*) => {
        $(
            impl Primitive for $t {
                const TYPE: TypeRef = builtins::$desc;
                const SIZE: usize = std::mem::size_of::<$t>();

                fn write_bytes(self, out: &mut [u8]) {
                    out[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }

                fn read_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
                    Ok(<$t>::from_le_bytes(take(bytes, $name)?))
                }
            }
        )*
    };
}

impl_number! {
    i8 => INT8, "Int8";
    u8 => UINT8, "UInt8";
    i16 => INT16, "Int16";
    u16 => UINT16, "UInt16";
    i32 => INT32, "Int32";
    u32 => UINT32, "UInt32";
    i64 => INT64, "Int64";
    u64 => UINT64, "UInt64";
    f32 => FLOAT32, "Float32";
    f64 => FLOAT64, "Float64";
}

impl Primitive for bool {
    const TYPE: TypeRef = builtins::BOOL;
    const SIZE: usize = 1;

    fn write_bytes(self, out: &mut [u8]) {
        out[0] = self as u8;
    }

    fn read_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        match take::<1>(bytes, "Bool")? {
            [0] => Ok(false),
            [1] => Ok(true),
            [b] => Err(CoreError::type_mismatch("Bool", format!("byte {b:#04x}"))),
        }
    }
}

impl Primitive for char {
    const TYPE: TypeRef = builtins::CHAR;
    const SIZE: usize = 4;

    fn write_bytes(self, out: &mut [u8]) {
        out[..4].copy_from_slice(&(self as u32).to_le_bytes());
    }

    fn read_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        let scalar = u32::from_le_bytes(take(bytes, "Char")?);
        char::from_u32(scalar)
            .ok_or_else(|| CoreError::type_mismatch("Char", format!("invalid scalar {scalar:#x}")))
    }
}

impl Primitive for Symbol {
    const TYPE: TypeRef = builtins::SYMBOL;
    const SIZE: usize = 4;

    fn write_bytes(self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.to_bits().to_le_bytes());
    }

    fn read_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        let bits = u32::from_le_bytes(take(bytes, "Symbol")?);
        Symbol::from_bits(bits)
            .ok_or_else(|| CoreError::type_mismatch("Symbol", format!("unknown symbol id {bits}")))
    }
}

impl Primitive for TypeRef {
    const TYPE: TypeRef = builtins::DATATYPE;
    const SIZE: usize = 4;

    fn write_bytes(self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.index().to_le_bytes());
    }

    fn read_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        let index = u32::from_le_bytes(take(bytes, "DataType")?);
        TypeRef::try_from_index(index as usize)
            .ok_or_else(|| CoreError::type_mismatch("DataType", "null type reference"))
    }
}

impl<B: WriteBarrier> Heap<B> {
    /// Allocates a boxed `x`.
    pub fn box_value<T: Primitive>(&mut self, x: T) -> Result<Value, CoreError> {
        let v = self.allocate(T::TYPE, 0)?;
        x.write_bytes(self.bytes_mut(v.offset(), T::SIZE)?);
        Ok(v)
    }

    /// Reads back a boxed scalar. Fails with `TypeMismatch` unless `v` was
    /// boxed as exactly `T`.
    pub fn unbox<T: Primitive>(&self, v: Value) -> Result<T, CoreError> {
        let actual = self.type_of(v)?;
        if actual != T::TYPE {
            return Err(self.mismatch(T::TYPE, actual));
        }
        T::read_bytes(self.bytes(v.offset(), T::SIZE)?)
    }

    /// A descriptor as a first-class value of type `DataType`.
    pub fn box_type(&mut self, t: TypeRef) -> Result<Value, CoreError> {
        self.registry().get(t)?;
        self.box_value(t)
    }

    pub fn unbox_type(&self, v: Value) -> Result<TypeRef, CoreError> {
        self.unbox::<TypeRef>(v)
    }
}
