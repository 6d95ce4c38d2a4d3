//! Bump-allocated object arena.
//!
//! The heap is one growable byte buffer. Every object is a header word followed
//! by its payload; a [`Value`] is the byte offset of the payload. Nothing is
//! ever freed here: reclaiming memory is the collector's job.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use hashbrown::HashMap;

use crate::barrier::{RememberedSet, WriteBarrier};
use crate::config::HeapConfig;
use crate::datatype::{DataType, TypeKind};
use crate::error::{CoreError, IndexKind};
use crate::header::{GcBits, Header, TypeRef, HEADER_SIZE};
use crate::layout::{align_up, REF_SIZE};
use crate::registry::TypeRegistry;

/// Alignment of every payload.
pub const PAYLOAD_ALIGN: usize = 16;

/// A reference to a heap object: the offset of its payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(NonZeroUsize);

impl Value {
    pub fn offset(self) -> usize {
        self.0.get()
    }

    /// The word stored in a reference slot.
    pub fn to_bits(self) -> u64 {
        self.0.get() as u64
    }

    /// Decodes a reference slot; `None` is `#undef`.
    pub fn from_bits(bits: u64) -> Option<Value> {
        usize::try_from(bits).ok().and_then(NonZeroUsize::new).map(Value)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<value @{:#x}>", self.0.get())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<value @{:#x}>", self.0.get())
    }
}

/// The allocation side of the collector: hands out zeroed objects with an
/// initialized header.
pub trait Allocator {
    /// `extra_len` is the byte length for strings and buffers, the element
    /// count for simple vectors and the rank for arrays. Fixed-size kinds take 0.
    fn allocate(&mut self, ty: TypeRef, extra_len: usize) -> Result<Value, CoreError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub objects: usize,
    pub allocated_bytes: usize,
    pub capacity_bytes: usize,
    pub barrier_hits: usize,
}

pub struct Heap<B: WriteBarrier = RememberedSet> {
    registry: Arc<TypeRegistry>,
    config: HeapConfig,
    bytes: Vec<u8>,
    top: usize,
    /// payload offset -> payload size
    objects: HashMap<usize, usize>,
    pub(crate) barrier: B,
    pub(crate) stats: HeapStats,
}

impl Heap<RememberedSet> {
    /// A heap over the global registry, sized from the environment.
    pub fn new() -> Self {
        Heap::with_config(TypeRegistry::global(), HeapConfig::from_env())
    }

    pub fn with_config(registry: Arc<TypeRegistry>, config: HeapConfig) -> Self {
        Heap::with_barrier(registry, config, RememberedSet::default())
    }
}

impl Default for Heap<RememberedSet> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: WriteBarrier> Heap<B> {
    pub fn with_barrier(registry: Arc<TypeRegistry>, config: HeapConfig, barrier: B) -> Self {
        let initial = config.initial_bytes.min(config.max_bytes);
        Heap {
            registry,
            config,
            bytes: vec![0; initial],
            top: 0,
            objects: HashMap::new(),
            barrier,
            stats: HeapStats {
                capacity_bytes: initial,
                ..HeapStats::default()
            },
        }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    pub fn barrier(&self) -> &B {
        &self.barrier
    }

    pub fn barrier_mut(&mut self) -> &mut B {
        &mut self.barrier
    }

    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    /// All allocated objects, in no particular order.
    pub fn objects(&self) -> impl Iterator<Item = Value> + '_ {
        self.objects.keys().filter_map(|&off| NonZeroUsize::new(off).map(Value))
    }

    pub fn object_size(&self, v: Value) -> Result<usize, CoreError> {
        self.objects
            .get(&v.offset())
            .copied()
            .ok_or_else(|| CoreError::invalid_tag(v.offset() as u64, "not the start of a live allocation"))
    }

    fn payload_size(&self, dt: &DataType, extra_len: usize) -> Result<usize, CoreError> {
        let overflow = || CoreError::OutOfMemory {
            requested: usize::MAX,
            limit: self.config.max_bytes,
        };
        match dt.kind() {
            TypeKind::String | TypeKind::Buffer => REF_SIZE.checked_add(extra_len).ok_or_else(overflow),
            TypeKind::SimpleVector => extra_len
                .checked_mul(REF_SIZE)
                .and_then(|n| n.checked_add(REF_SIZE))
                .ok_or_else(overflow),
            TypeKind::Array => {
                let rank = dt.parameter(1)?.as_int().unwrap_or(-1);
                if rank != extra_len as i64 {
                    return Err(CoreError::invalid_argument(format!(
                        "array of rank {rank} allocated with rank {extra_len}"
                    )));
                }
                Ok(self.registry.size_of(dt.type_ref())?)
            }
            TypeKind::Abstract | TypeKind::Union => Err(CoreError::invalid_argument(format!(
                "cannot allocate an instance of abstract type {}",
                self.registry.type_string(dt.type_ref())?
            ))),
            _ => {
                if extra_len != 0 {
                    return Err(CoreError::invalid_argument(format!(
                        "{} is fixed-size; extra length {extra_len} given",
                        dt.name()
                    )));
                }
                Ok(self.registry.size_of(dt.type_ref())?)
            }
        }
    }

    fn ensure_capacity(&mut self, end: usize, requested: usize) -> Result<(), CoreError> {
        if end > self.config.max_bytes {
            return Err(CoreError::OutOfMemory {
                requested,
                limit: self.config.max_bytes,
            });
        }
        if end > self.bytes.len() {
            let new_len = end.max(self.bytes.len() * 2).min(self.config.max_bytes);
            tracing::debug!("growing heap from {} to {new_len} bytes", self.bytes.len());
            self.bytes.resize(new_len, 0);
            self.stats.capacity_bytes = new_len;
        }
        Ok(())
    }

    // --- raw memory ---

    fn check_range(&self, off: usize, len: usize) -> Result<(), CoreError> {
        match off.checked_add(len) {
            Some(end) if end <= self.top => Ok(()),
            _ => Err(CoreError::out_of_range(IndexKind::Heap, off, self.top)),
        }
    }

    pub(crate) fn bytes(&self, off: usize, len: usize) -> Result<&[u8], CoreError> {
        self.check_range(off, len)?;
        Ok(&self.bytes[off..off + len])
    }

    pub(crate) fn bytes_mut(&mut self, off: usize, len: usize) -> Result<&mut [u8], CoreError> {
        self.check_range(off, len)?;
        Ok(&mut self.bytes[off..off + len])
    }

    pub(crate) fn copy_within(&mut self, src: usize, len: usize, dst: usize) -> Result<(), CoreError> {
        self.check_range(src, len)?;
        self.check_range(dst, len)?;
        self.bytes.copy_within(src..src + len, dst);
        Ok(())
    }

    pub(crate) fn read_u64(&self, off: usize) -> Result<u64, CoreError> {
        let mut word = [0u8; 8];
        word.copy_from_slice(self.bytes(off, 8)?);
        Ok(u64::from_le_bytes(word))
    }

    pub(crate) fn write_u64(&mut self, off: usize, x: u64) -> Result<(), CoreError> {
        self.bytes_mut(off, 8)?.copy_from_slice(&x.to_le_bytes());
        Ok(())
    }

    pub(crate) fn read_usize(&self, off: usize) -> Result<usize, CoreError> {
        let x = self.read_u64(off)?;
        usize::try_from(x).map_err(|_| CoreError::out_of_range(IndexKind::Heap, off, self.top))
    }

    pub(crate) fn write_usize(&mut self, off: usize, x: usize) -> Result<(), CoreError> {
        self.write_u64(off, x as u64)
    }

    /// Reads a reference slot; `None` is `#undef`.
    pub(crate) fn read_ref(&self, off: usize) -> Result<Option<Value>, CoreError> {
        Ok(Value::from_bits(self.read_u64(off)?))
    }

    pub(crate) fn write_ref(&mut self, off: usize, v: Option<Value>) -> Result<(), CoreError> {
        self.write_u64(off, v.map_or(0, Value::to_bits))
    }

    /// The whole payload of `v`.
    pub fn payload(&self, v: Value) -> Result<&[u8], CoreError> {
        let size = self.object_size(v)?;
        self.bytes(v.offset(), size)
    }

    // --- headers ---

    pub fn header(&self, v: Value) -> Result<Header, CoreError> {
        self.object_size(v)?;
        Ok(Header::from_word(self.read_u64(v.offset() - HEADER_SIZE)?))
    }

    fn write_header(&mut self, v: Value, h: Header) -> Result<(), CoreError> {
        self.write_u64(v.offset() - HEADER_SIZE, h.word())
    }

    /// Recovers the type of `v` by masking the GC bits off its header.
    pub fn type_of(&self, v: Value) -> Result<TypeRef, CoreError> {
        let header = self.header(v)?;
        let addr = v.offset() as u64;
        let t = header
            .type_ref()
            .ok_or_else(|| CoreError::invalid_tag(addr, "header holds no descriptor address"))?;
        if !self.registry.contains(t) {
            return Err(CoreError::invalid_tag(addr, "header names an unregistered descriptor"));
        }
        Ok(t)
    }

    pub fn datatype(&self, v: Value) -> Result<Arc<DataType>, CoreError> {
        self.registry.get(self.type_of(v)?)
    }

    pub(crate) fn expect_type(&self, v: Value, t: TypeRef) -> Result<(), CoreError> {
        let actual = self.type_of(v)?;
        if actual != t {
            return Err(self.mismatch(t, actual));
        }
        Ok(())
    }

    pub(crate) fn mismatch(&self, expected: TypeRef, got: TypeRef) -> CoreError {
        let show = |t: TypeRef| {
            self.registry
                .type_string(t)
                .unwrap_or_else(|_| format!("{t:?}"))
        };
        CoreError::type_mismatch(show(expected), show(got))
    }

    pub fn gc_bits(&self, v: Value) -> Result<GcBits, CoreError> {
        Ok(self.header(v)?.gc_bits())
    }

    pub fn set_gc_bits(&mut self, v: Value, bits: GcBits) -> Result<(), CoreError> {
        let h = self.header(v)?.with_gc_bits(bits);
        self.write_header(v, h)
    }

    /// Overwrites the type bits of a header. Only for tests that need a
    /// corrupt object.
    #[cfg(test)]
    pub(crate) fn corrupt_header(&mut self, v: Value, word: u64) -> Result<(), CoreError> {
        self.write_header(v, Header::from_word(word))
    }
}

impl<B: WriteBarrier> Allocator for Heap<B> {
    fn allocate(&mut self, ty: TypeRef, extra_len: usize) -> Result<Value, CoreError> {
        let dt = self.registry.get(ty)?;
        let size = self.payload_size(&dt, extra_len)?;
        let requested = size.saturating_add(HEADER_SIZE);
        let start = align_up(self.top + HEADER_SIZE, PAYLOAD_ALIGN);
        let end = start.checked_add(size).ok_or(CoreError::OutOfMemory {
            requested,
            limit: self.config.max_bytes,
        })?;
        self.ensure_capacity(end, requested)?;
        self.top = end;

        let v = Value(NonZeroUsize::new(start).ok_or_else(|| CoreError::invalid_tag(0, "null payload"))?);
        self.objects.insert(start, size);
        self.write_header(v, Header::new(ty, GcBits::empty()))?;
        if matches!(
            dt.kind(),
            TypeKind::String | TypeKind::Buffer | TypeKind::SimpleVector
        ) {
            self.write_usize(start, extra_len)?;
        }

        self.stats.objects += 1;
        self.stats.allocated_bytes += requested;
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::*;

    fn small_heap(max: usize) -> Heap {
        let cfg = HeapConfig {
            initial_bytes: 64,
            max_bytes: max,
        };
        Heap::with_config(Arc::new(TypeRegistry::new()), cfg)
    }

    #[test]
    fn payloads_are_aligned_and_tagged() {
        let mut heap = small_heap(4096);
        let a = heap.allocate(INT8, 0).unwrap();
        let b = heap.allocate(FLOAT64, 0).unwrap();
        let c = heap.allocate(NOTHING, 0).unwrap();
        let d = heap.allocate(NOTHING, 0).unwrap();
        for v in [a, b, c, d] {
            assert_eq!(v.offset() % PAYLOAD_ALIGN, 0);
        }
        assert_ne!(c, d);
        assert_eq!(heap.type_of(a).unwrap(), INT8);
        assert_eq!(heap.type_of(b).unwrap(), FLOAT64);
        assert_eq!(heap.object_size(b).unwrap(), 8);
        assert_eq!(heap.stats().objects, 4);
    }

    #[test]
    fn memory_is_zeroed() {
        let mut heap = small_heap(4096);
        let v = heap.allocate(UINT64, 0).unwrap();
        assert_eq!(heap.payload(v).unwrap(), &[0u8; 8]);
    }

    #[test]
    fn heap_grows_until_limit() {
        let mut heap = small_heap(512);
        heap.allocate(BUFFER, 200).unwrap();
        assert!(heap.stats().capacity_bytes >= 200);
        let err = heap.allocate(BUFFER, 400).unwrap_err();
        assert!(matches!(err, CoreError::OutOfMemory { limit: 512, .. }));
    }

    #[test]
    fn type_of_rejects_interior_offsets() {
        let mut heap = small_heap(4096);
        let v = heap.allocate(INT64, 0).unwrap();
        let inside = Value::from_bits(v.to_bits() + 4).unwrap();
        assert!(matches!(
            heap.type_of(inside),
            Err(CoreError::InvalidTag { .. })
        ));
    }

    #[test]
    fn type_of_rejects_corrupt_headers() {
        let mut heap = small_heap(4096);
        let v = heap.allocate(INT64, 0).unwrap();
        heap.corrupt_header(v, 0x3).unwrap();
        assert!(matches!(heap.type_of(v), Err(CoreError::InvalidTag { .. })));
        heap.corrupt_header(v, TypeRef::from_index(5000).addr()).unwrap();
        assert!(matches!(heap.type_of(v), Err(CoreError::InvalidTag { .. })));
    }

    #[test]
    fn gc_bits_leave_type_intact() {
        let mut heap = small_heap(4096);
        let v = heap.allocate(INT32, 0).unwrap();
        heap.set_gc_bits(v, GcBits::MARKED | GcBits::PINNED).unwrap();
        assert_eq!(heap.type_of(v).unwrap(), INT32);
        assert_eq!(heap.gc_bits(v).unwrap(), GcBits::MARKED | GcBits::PINNED);
    }

    #[test]
    fn fixed_size_kinds_refuse_extra_length() {
        let mut heap = small_heap(4096);
        assert!(heap.allocate(INT64, 3).is_err());
        assert!(heap.allocate(ANY, 0).is_err());
    }

    #[test]
    fn objects_lists_every_allocation() {
        let mut heap = small_heap(4096);
        let a = heap.allocate(INT8, 0).unwrap();
        let b = heap.allocate(STRING, 3).unwrap();
        let mut all: Vec<_> = heap.objects().collect();
        all.sort();
        assert_eq!(all, vec![a, b]);
    }
}
