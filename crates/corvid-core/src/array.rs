//! N-dimensional arrays.
//!
//! Payload words, then the owner:
//!
//! ```text
//! 0      data      Buffer holding the elements
//! 8      length    element count (product of dims)
//! 16     flags     ndims | PTRARRAY | BITSUNION | SHARED | elsize << 32
//! 24     capacity  elements the buffer can hold
//! 32     dims[ndims]
//! owner            object keeping the buffer alive
//! ```
//!
//! Element storage follows the element type. Inline-allocatable types are
//! stored flat, `elsize` bytes each. A union of inline-allocatable types is a
//! bits-union: each slot is as wide as the largest member and one selector
//! byte per slot, placed after `capacity * elsize` data bytes, says which
//! member it holds. Everything else is a pointer array of 8-byte references.

use bitflags::bitflags;

use crate::access::Datum;
use crate::barrier::WriteBarrier;
use crate::boxing::Primitive;
use crate::datatype::{TypeKind, TypeParam};
use crate::error::{CoreError, IndexKind};
use crate::header::TypeRef;
use crate::heap::{Allocator, Heap, Value};
use crate::layout::{array_data_owner_offset, REF_SIZE};

const DATA: usize = 0;
const LENGTH: usize = 8;
const FLAGS: usize = 16;
const CAPACITY: usize = 24;
const DIMS: usize = 32;

const NDIMS_MASK: u64 = 0xffff;
const ELSIZE_SHIFT: u32 = 32;
const ELSIZE_MASK: u64 = 0xffff;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ArrayFlags: u64 {
        const PTRARRAY = 1 << 16;
        const BITSUNION = 1 << 17;
        /// The buffer is shared with another array and must not be reallocated.
        const SHARED = 1 << 18;
    }
}

fn pack_flags(ndims: usize, elsize: usize, flags: ArrayFlags) -> u64 {
    (ndims as u64 & NDIMS_MASK) | flags.bits() | ((elsize as u64 & ELSIZE_MASK) << ELSIZE_SHIFT)
}

/// A position inside an array's element storage. It stays meaningful only as
/// long as the array keeps the same buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPtr {
    pub buffer: Value,
    pub offset: usize,
}

#[derive(Debug, Clone)]
enum Storage {
    Flat,
    Ptr,
    /// Member types in selector order.
    BitsUnion(Vec<TypeRef>),
}

/// Decoded fixed part of an array payload.
#[derive(Debug, Clone)]
struct ArrayInfo {
    elem: TypeRef,
    ndims: usize,
    len: usize,
    capacity: usize,
    flags: ArrayFlags,
    elsize: usize,
    data: Value,
}

/// Buffer bytes for `capacity` slots, plus one selector byte per slot for
/// bits-union storage. `None` on overflow.
fn storage_bytes(capacity: usize, elsize: usize, flags: ArrayFlags) -> Option<usize> {
    let data = capacity.checked_mul(elsize)?;
    if flags.contains(ArrayFlags::BITSUNION) {
        data.checked_add(capacity)
    } else {
        Some(data)
    }
}

impl<B: WriteBarrier> Heap<B> {
    /// Picks flat, bits-union or pointer storage for `elem` and the slot size.
    fn element_storage(&self, elem: TypeRef) -> Result<(Storage, usize), CoreError> {
        let reg = self.registry();
        // elements wider than the flags' elsize field are boxed
        if reg.is_inline_allocatable(elem)? && reg.size_of(elem)? as u64 <= ELSIZE_MASK {
            return Ok((Storage::Flat, reg.size_of(elem)?));
        }
        let dt = reg.get(elem)?;
        if dt.kind() == TypeKind::Union {
            let members: Vec<TypeRef> = dt.params().iter().filter_map(TypeParam::as_type).collect();
            let mut elsize = 0;
            let mut all_inline = !members.is_empty() && members.len() <= u8::MAX as usize;
            for &m in &members {
                if !reg.is_inline_allocatable(m)? {
                    all_inline = false;
                    break;
                }
                elsize = elsize.max(reg.size_of(m)?);
            }
            if all_inline && elsize as u64 <= ELSIZE_MASK {
                return Ok((Storage::BitsUnion(members), elsize));
            }
        }
        Ok((Storage::Ptr, REF_SIZE))
    }

    fn storage_of(&self, info: &ArrayInfo) -> Result<Storage, CoreError> {
        if info.flags.contains(ArrayFlags::PTRARRAY) {
            Ok(Storage::Ptr)
        } else if info.flags.contains(ArrayFlags::BITSUNION) {
            let dt = self.registry().get(info.elem)?;
            Ok(Storage::BitsUnion(
                dt.params().iter().filter_map(TypeParam::as_type).collect(),
            ))
        } else {
            Ok(Storage::Flat)
        }
    }

    /// Allocates a zero-initialized array of any rank.
    pub fn new_array(&mut self, elem: TypeRef, dims: &[usize]) -> Result<Value, CoreError> {
        let ndims = dims.len();
        let len = dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| CoreError::invalid_argument(format!("array dims {dims:?} overflow")))?;
        let at = self.registry().array_type(elem, ndims)?;
        let (storage, elsize) = self.element_storage(elem)?;
        let flags = match storage {
            Storage::Flat => ArrayFlags::empty(),
            Storage::Ptr => ArrayFlags::PTRARRAY,
            Storage::BitsUnion(_) => ArrayFlags::BITSUNION,
        };
        let nbytes = storage_bytes(len, elsize, flags)
            .ok_or_else(|| CoreError::invalid_argument(format!("array dims {dims:?} overflow")))?;

        let buffer = self.new_buffer(nbytes)?;
        let a = self.allocate(at, ndims)?;
        let base = a.offset();
        self.write_ref(base + DATA, Some(buffer))?;
        self.write_usize(base + LENGTH, len)?;
        self.write_u64(base + FLAGS, pack_flags(ndims, elsize, flags))?;
        self.write_usize(base + CAPACITY, len)?;
        for (k, &d) in dims.iter().enumerate() {
            self.write_usize(base + DIMS + REF_SIZE * k, d)?;
        }
        self.write_ref(base + array_data_owner_offset(ndims), Some(buffer))?;
        Ok(a)
    }

    /// Rank-1 array of `elem` with `len` elements.
    pub fn new_vector(&mut self, elem: TypeRef, len: usize) -> Result<Value, CoreError> {
        self.new_array(elem, &[len])
    }

    fn array_info(&self, a: Value) -> Result<ArrayInfo, CoreError> {
        let dt = self.datatype(a)?;
        if dt.kind() != TypeKind::Array {
            return Err(CoreError::type_mismatch(
                "Array",
                self.registry().type_string(dt.type_ref())?,
            ));
        }
        let elem = dt.parameter(0)?.as_type().ok_or_else(|| {
            CoreError::invalid_tag(a.to_bits(), "array type without element type")
        })?;
        let base = a.offset();
        let word = self.read_u64(base + FLAGS)?;
        let data = self
            .read_ref(base + DATA)?
            .ok_or_else(|| CoreError::invalid_tag(a.to_bits(), "array without buffer"))?;
        Ok(ArrayInfo {
            elem,
            ndims: (word & NDIMS_MASK) as usize,
            len: self.read_usize(base + LENGTH)?,
            capacity: self.read_usize(base + CAPACITY)?,
            flags: ArrayFlags::from_bits_truncate(word),
            elsize: ((word >> ELSIZE_SHIFT) & ELSIZE_MASK) as usize,
            data,
        })
    }

    pub fn array_len(&self, a: Value) -> Result<usize, CoreError> {
        Ok(self.array_info(a)?.len)
    }

    pub fn array_ndims(&self, a: Value) -> Result<usize, CoreError> {
        Ok(self.array_info(a)?.ndims)
    }

    pub fn array_dim(&self, a: Value, d: usize) -> Result<usize, CoreError> {
        let ndims = self.array_info(a)?.ndims;
        if d >= ndims {
            return Err(CoreError::out_of_range(IndexKind::Dimension, d, ndims));
        }
        self.read_usize(a.offset() + DIMS + REF_SIZE * d)
    }

    pub fn array_dims(&self, a: Value) -> Result<Vec<usize>, CoreError> {
        let ndims = self.array_info(a)?.ndims;
        (0..ndims)
            .map(|d| self.read_usize(a.offset() + DIMS + REF_SIZE * d))
            .collect()
    }

    pub fn array_eltype(&self, a: Value) -> Result<TypeRef, CoreError> {
        Ok(self.array_info(a)?.elem)
    }

    pub fn array_is_ptr(&self, a: Value) -> Result<bool, CoreError> {
        Ok(self.array_info(a)?.flags.contains(ArrayFlags::PTRARRAY))
    }

    pub fn array_is_bitsunion(&self, a: Value) -> Result<bool, CoreError> {
        Ok(self.array_info(a)?.flags.contains(ArrayFlags::BITSUNION))
    }

    pub fn array_is_shared(&self, a: Value) -> Result<bool, CoreError> {
        Ok(self.array_info(a)?.flags.contains(ArrayFlags::SHARED))
    }

    pub fn array_capacity(&self, a: Value) -> Result<usize, CoreError> {
        Ok(self.array_info(a)?.capacity)
    }

    /// Element size in bytes; 8 for pointer arrays.
    pub fn array_elsize(&self, a: Value) -> Result<usize, CoreError> {
        Ok(self.array_info(a)?.elsize)
    }

    pub fn array_owner(&self, a: Value) -> Result<Value, CoreError> {
        let info = self.array_info(a)?;
        self.read_ref(a.offset() + array_data_owner_offset(info.ndims))?
            .ok_or_else(|| CoreError::invalid_tag(a.to_bits(), "array without owner"))
    }

    fn check_index(info: &ArrayInfo, i: usize) -> Result<(), CoreError> {
        if i >= info.len {
            return Err(CoreError::out_of_range(IndexKind::Element, i, info.len));
        }
        Ok(())
    }

    pub fn array_get(&self, a: Value, i: usize) -> Result<Datum<'_>, CoreError> {
        let info = self.array_info(a)?;
        Self::check_index(&info, i)?;
        let base = self.buffer_start(info.data)?;
        let slot = base + i * info.elsize;
        match self.storage_of(&info)? {
            Storage::Ptr => self
                .read_ref(slot)?
                .map(Datum::Ref)
                .ok_or_else(|| CoreError::undef(format!("array element {i}"))),
            Storage::Flat => Ok(Datum::Bits {
                ty: info.elem,
                bytes: self.bytes(slot, info.elsize)?,
            }),
            Storage::BitsUnion(members) => {
                let sel_at = base + info.capacity * info.elsize + i;
                let sel = self.bytes(sel_at, 1)?[0] as usize;
                let ty = *members
                    .get(sel)
                    .ok_or_else(|| CoreError::invalid_tag(sel_at as u64, "bad union selector"))?;
                let size = self.registry().size_of(ty)?;
                Ok(Datum::Bits {
                    ty,
                    bytes: self.bytes(slot, size)?,
                })
            }
        }
    }

    /// Element `i` as a first-class value; inline bits are boxed.
    pub fn array_get_value(&mut self, a: Value, i: usize) -> Result<Value, CoreError> {
        let (ty, src, size) = match self.array_get(a, i)? {
            Datum::Ref(v) => return Ok(v),
            Datum::Bits { ty, bytes } => {
                let info = self.array_info(a)?;
                (ty, self.buffer_start(info.data)? + i * info.elsize, bytes.len())
            }
        };
        let boxed = self.allocate(ty, 0)?;
        self.copy_within(src, size, boxed.offset())?;
        Ok(boxed)
    }

    pub fn array_set(&mut self, a: Value, i: usize, x: Value) -> Result<(), CoreError> {
        let info = self.array_info(a)?;
        Self::check_index(&info, i)?;
        let xt = self.type_of(x)?;
        let base = self.buffer_start(info.data)?;
        let slot = base + i * info.elsize;
        match self.storage_of(&info)? {
            Storage::Ptr => {
                if !self.registry().isa(xt, info.elem)? {
                    return Err(self.mismatch(info.elem, xt));
                }
                self.write_ref(slot, Some(x))?;
                self.write_barrier(info.data, x)
            }
            Storage::Flat => {
                if xt != info.elem {
                    return Err(self.mismatch(info.elem, xt));
                }
                self.copy_within(x.offset(), info.elsize, slot)
            }
            Storage::BitsUnion(members) => {
                let sel = members
                    .iter()
                    .position(|&m| m == xt)
                    .ok_or_else(|| self.mismatch(info.elem, xt))?;
                let size = self.registry().size_of(xt)?;
                self.copy_within(x.offset(), size, slot)?;
                self.bytes_mut(slot + size, info.elsize - size)?.fill(0);
                self.bytes_mut(base + info.capacity * info.elsize + i, 1)?[0] = sel as u8;
                Ok(())
            }
        }
    }

    pub fn array_get_bits<T: Primitive>(&self, a: Value, i: usize) -> Result<T, CoreError> {
        let d = self.array_get(a, i)?;
        self.read_datum(d)
    }

    /// Stores a scalar without boxing it first, except into pointer arrays.
    pub fn array_set_bits<T: Primitive>(&mut self, a: Value, i: usize, x: T) -> Result<(), CoreError> {
        let info = self.array_info(a)?;
        Self::check_index(&info, i)?;
        let base = self.buffer_start(info.data)?;
        let slot = base + i * info.elsize;
        match self.storage_of(&info)? {
            Storage::Ptr => {
                let boxed = self.box_value(x)?;
                self.array_set(a, i, boxed)
            }
            Storage::Flat => {
                if info.elem != T::TYPE {
                    return Err(self.mismatch(info.elem, T::TYPE));
                }
                x.write_bytes(self.bytes_mut(slot, T::SIZE)?);
                Ok(())
            }
            Storage::BitsUnion(members) => {
                let sel = members
                    .iter()
                    .position(|&m| m == T::TYPE)
                    .ok_or_else(|| self.mismatch(info.elem, T::TYPE))?;
                let out = self.bytes_mut(slot, info.elsize)?;
                out.fill(0);
                x.write_bytes(out);
                self.bytes_mut(base + info.capacity * info.elsize + i, 1)?[0] = sel as u8;
                Ok(())
            }
        }
    }

    /// Column-major linear index of a multi-dimensional position.
    pub fn array_linear_index(&self, a: Value, index: &[usize]) -> Result<usize, CoreError> {
        let dims = self.array_dims(a)?;
        if index.len() != dims.len() {
            return Err(CoreError::invalid_argument(format!(
                "{}-dimensional index into a {}-dimensional array",
                index.len(),
                dims.len()
            )));
        }
        let mut linear = 0;
        let mut stride = 1;
        for (&i, &d) in index.iter().zip(&dims) {
            if i >= d {
                return Err(CoreError::out_of_range(IndexKind::Dimension, i, d));
            }
            linear += i * stride;
            stride *= d;
        }
        Ok(linear)
    }

    pub fn array_data(&self, a: Value) -> Result<RawPtr, CoreError> {
        let info = self.array_info(a)?;
        Ok(RawPtr {
            buffer: info.data,
            offset: self.buffer_start(info.data)?,
        })
    }

    /// False once a reallocation has moved the elements out of `p`'s buffer.
    pub fn array_ptr_valid(&self, a: Value, p: RawPtr) -> Result<bool, CoreError> {
        Ok(self.array_info(a)?.data == p.buffer)
    }

    /// Changes the length of a rank-1 array. Growth past the capacity moves
    /// the elements to a new buffer, which becomes the owner.
    pub fn array_resize(&mut self, a: Value, n: usize) -> Result<(), CoreError> {
        let info = self.array_info(a)?;
        if info.ndims != 1 {
            return Err(CoreError::invalid_argument(format!(
                "cannot resize a {}-dimensional array",
                info.ndims
            )));
        }
        if info.flags.contains(ArrayFlags::SHARED) {
            return Err(CoreError::invalid_argument(
                "cannot resize an array whose buffer is shared",
            ));
        }
        let base = a.offset();

        if n <= info.capacity {
            let (lo, hi) = (info.len.min(n), info.len.max(n));
            let start = self.buffer_start(info.data)?;
            self.bytes_mut(start + lo * info.elsize, (hi - lo) * info.elsize)?
                .fill(0);
            if info.flags.contains(ArrayFlags::BITSUNION) {
                let sel = start + info.capacity * info.elsize;
                self.bytes_mut(sel + lo, hi - lo)?.fill(0);
            }
        } else {
            let new_cap = n.max(info.capacity.saturating_mul(2));
            let nbytes = storage_bytes(new_cap, info.elsize, info.flags)
                .ok_or_else(|| CoreError::invalid_argument(format!("cannot grow array to {n}")))?;
            let buffer = self.new_buffer(nbytes)?;
            let old = self.buffer_start(info.data)?;
            let new = self.buffer_start(buffer)?;
            self.copy_within(old, info.len * info.elsize, new)?;
            if info.flags.contains(ArrayFlags::BITSUNION) {
                self.copy_within(
                    old + info.capacity * info.elsize,
                    info.len,
                    new + new_cap * info.elsize,
                )?;
            }
            self.write_ref(base + DATA, Some(buffer))?;
            self.write_ref(base + array_data_owner_offset(1), Some(buffer))?;
            self.write_usize(base + CAPACITY, new_cap)?;
            self.write_barrier(a, buffer)?;
            tracing::debug!(
                "array {a} reallocated: capacity {} -> {new_cap}",
                info.capacity
            );
        }
        self.write_usize(base + LENGTH, n)?;
        self.write_usize(base + DIMS, n)
    }

    /// Appends `x` to a rank-1 array.
    pub fn array_push(&mut self, a: Value, x: Value) -> Result<(), CoreError> {
        let n = self.array_len(a)?;
        let grown = n
            .checked_add(1)
            .ok_or_else(|| CoreError::invalid_argument("array length overflow"))?;
        self.array_resize(a, grown)?;
        if let Err(e) = self.array_set(a, n, x) {
            self.array_resize(a, n)?;
            return Err(e);
        }
        Ok(())
    }

    /// A view of `a` with new dimensions over the same buffer. Both arrays
    /// are marked shared so neither can reallocate it.
    pub fn reshape_array(&mut self, a: Value, dims: &[usize]) -> Result<Value, CoreError> {
        let info = self.array_info(a)?;
        let len = dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d));
        if len != Some(info.len) {
            return Err(CoreError::invalid_argument(format!(
                "cannot reshape {} elements into {dims:?}",
                info.len
            )));
        }
        let owner = self.array_owner(a)?;
        let at = self.registry().array_type(info.elem, dims.len())?;
        let view = self.allocate(at, dims.len())?;
        let flags = info.flags | ArrayFlags::SHARED;
        let base = view.offset();
        self.write_ref(base + DATA, Some(info.data))?;
        self.write_usize(base + LENGTH, info.len)?;
        self.write_u64(base + FLAGS, pack_flags(dims.len(), info.elsize, flags))?;
        self.write_usize(base + CAPACITY, info.capacity)?;
        for (k, &d) in dims.iter().enumerate() {
            self.write_usize(base + DIMS + REF_SIZE * k, d)?;
        }
        self.write_ref(base + array_data_owner_offset(dims.len()), Some(owner))?;
        self.write_u64(a.offset() + FLAGS, pack_flags(info.ndims, info.elsize, flags))?;
        Ok(view)
    }
}
