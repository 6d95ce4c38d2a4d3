//! Tagged object header.
//!
//! Every heap value is preceded by one `u64` header word:
//!
//! ```text
//! 63                                  4 3        0
//! +------------------------------------+----------+
//! |  type reference (descriptor addr)  | GC bits  |
//! +------------------------------------+----------+
//! ```
//!
//! A descriptor address is its registry index shifted left by [`TAG_BITS`], so
//! it is always [`TYPE_ALIGN`]-aligned and the type is recovered by masking
//! the low bits off. The low bits belong to the collector.

use std::fmt;
use std::num::NonZeroU32;

use bitflags::bitflags;

/// Number of low-order header bits reserved for GC state.
pub const TAG_BITS: u32 = 4;
/// Mask selecting the GC state bits of a header word.
pub const TAG_MASK: u64 = (1 << TAG_BITS) - 1;
/// Minimum alignment of every descriptor address.
pub const TYPE_ALIGN: u64 = 1 << TAG_BITS;
/// Size of the header word in bytes.
pub const HEADER_SIZE: usize = 8;

bitflags! {
    /// Collector state kept in the low header bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GcBits: u64 {
        /// Reached during the current mark phase.
        const MARKED = 1 << 0;
        /// Survived into the old generation.
        const OLD = 1 << 1;
        /// Must not be moved.
        const PINNED = 1 << 2;
        /// Already queued by the write barrier since the last collection.
        const REMEMBERED = 1 << 3;
    }
}

/// A reference to a registered type descriptor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeRef(NonZeroU32);

impl TypeRef {
    /// Builds the reference for the `index`-th registered descriptor (1-based).
    pub(crate) const fn from_index(index: u32) -> Self {
        match NonZeroU32::new(index) {
            Some(n) => TypeRef(n),
            None => panic!("type index 0 is reserved"),
        }
    }

    pub(crate) fn try_from_index(index: usize) -> Option<Self> {
        u32::try_from(index).ok().and_then(NonZeroU32::new).map(TypeRef)
    }

    /// 1-based registry index.
    pub const fn index(self) -> u32 {
        self.0.get()
    }

    /// The descriptor address as it appears in a header word.
    pub const fn addr(self) -> u64 {
        (self.0.get() as u64) << TAG_BITS
    }

    /// Recovers a reference from a descriptor address. Fails on zero or on
    /// addresses that are not [`TYPE_ALIGN`]-aligned.
    pub fn from_addr(addr: u64) -> Option<Self> {
        if addr & TAG_MASK != 0 {
            return None;
        }
        u32::try_from(addr >> TAG_BITS)
            .ok()
            .and_then(NonZeroU32::new)
            .map(TypeRef)
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeRef({:#x})", self.addr())
    }
}

/// A decoded header word.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Header(u64);

impl Header {
    pub fn new(ty: TypeRef, gc: GcBits) -> Self {
        Header(ty.addr() | (gc.bits() & TAG_MASK))
    }

    pub fn from_word(word: u64) -> Self {
        Header(word)
    }

    pub fn word(self) -> u64 {
        self.0
    }

    /// The raw type-reference bits, GC state masked off.
    pub fn type_bits(self) -> u64 {
        self.0 & !TAG_MASK
    }

    pub fn type_ref(self) -> Option<TypeRef> {
        TypeRef::from_addr(self.type_bits())
    }

    pub fn gc_bits(self) -> GcBits {
        GcBits::from_bits_truncate(self.0 & TAG_MASK)
    }

    pub fn with_gc_bits(self, gc: GcBits) -> Self {
        Header(self.type_bits() | (gc.bits() & TAG_MASK))
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("type_bits", &format_args!("{:#x}", self.type_bits()))
            .field("gc", &self.gc_bits())
            .finish()
    }
}
