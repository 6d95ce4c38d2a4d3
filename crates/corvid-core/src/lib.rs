pub mod access;
pub mod array;
pub mod barrier;
pub mod boxing;
pub mod builtins;
pub mod config;
pub mod datatype;
pub mod error;
pub mod header;
pub mod heap;
pub mod layout;
pub mod module;
pub mod registry;
pub mod string;
pub mod svec;
pub mod symbol;

pub use access::Datum;
pub use array::{ArrayFlags, RawPtr};
pub use barrier::{NoBarrier, RememberedSet, WriteBarrier};
pub use boxing::Primitive;
pub use config::HeapConfig;
pub use datatype::{
    DataType, FieldSpec, ParamVec, ParamVecBuilder, TypeDef, TypeKind, TypeName, TypeParam,
};
pub use error::{CoreError, IndexKind};
pub use header::{GcBits, Header, TypeRef, HEADER_SIZE, TAG_BITS, TAG_MASK, TYPE_ALIGN};
pub use heap::{Allocator, Heap, HeapStats, Value, PAYLOAD_ALIGN};
pub use layout::{array_data_owner_offset, FieldLayout, Layout};
pub use registry::TypeRegistry;
pub use svec::UnpublishedSvec;
pub use symbol::{intern, resolve, Symbol};
