//! Builtin descriptors. [`TypeRegistry::new`](crate::registry::TypeRegistry::new)
//! registers them in exactly this order, so their references are constants.

use crate::datatype::{TypeDef, TypeKind};
use crate::header::TypeRef;

pub const ANY: TypeRef = TypeRef::from_index(1);
pub const DATATYPE: TypeRef = TypeRef::from_index(2);
pub const NOTHING: TypeRef = TypeRef::from_index(3);
pub const BOOL: TypeRef = TypeRef::from_index(4);
pub const CHAR: TypeRef = TypeRef::from_index(5);
pub const INT8: TypeRef = TypeRef::from_index(6);
pub const UINT8: TypeRef = TypeRef::from_index(7);
pub const INT16: TypeRef = TypeRef::from_index(8);
pub const UINT16: TypeRef = TypeRef::from_index(9);
pub const INT32: TypeRef = TypeRef::from_index(10);
pub const UINT32: TypeRef = TypeRef::from_index(11);
pub const INT64: TypeRef = TypeRef::from_index(12);
pub const UINT64: TypeRef = TypeRef::from_index(13);
pub const FLOAT32: TypeRef = TypeRef::from_index(14);
pub const FLOAT64: TypeRef = TypeRef::from_index(15);
pub const SYMBOL: TypeRef = TypeRef::from_index(16);
pub const STRING: TypeRef = TypeRef::from_index(17);
pub const SIMPLE_VECTOR: TypeRef = TypeRef::from_index(18);
pub const BUFFER: TypeRef = TypeRef::from_index(19);
pub const MODULE: TypeRef = TypeRef::from_index(20);

pub const ARRAY_FAMILY: &str = "Array";
pub const TUPLE_FAMILY: &str = "Tuple";
pub const UNION_FAMILY: &str = "Union";

const CORE: &str = "Core";

fn prim(name: &str, size: usize) -> TypeDef {
    TypeDef::primitive(name, size, size).module(CORE)
}

/// Non-parametric builtins, in registration order.
pub(crate) fn instances() -> Vec<TypeDef> {
    vec![
        TypeDef::abstract_type("Any").module(CORE).no_supertype(),
        prim("DataType", 4),
        TypeDef::structure("Nothing").module(CORE),
        prim("Bool", 1),
        prim("Char", 4),
        prim("Int8", 1),
        prim("UInt8", 1),
        prim("Int16", 2),
        prim("UInt16", 2),
        prim("Int32", 4),
        prim("UInt32", 4),
        prim("Int64", 8),
        prim("UInt64", 8),
        prim("Float32", 4),
        prim("Float64", 8),
        prim("Symbol", 4),
        TypeDef::family("String", TypeKind::String).module(CORE),
        TypeDef::family("SimpleVector", TypeKind::SimpleVector).module(CORE),
        TypeDef::family("Buffer", TypeKind::Buffer).module(CORE),
        TypeDef::mutable_structure("Module")
            .module(CORE)
            .field("name", SYMBOL)
            .field("parent", ANY),
    ]
}

/// Parametric builtin families. They have no instances until applied.
pub(crate) fn families() -> Vec<TypeDef> {
    vec![
        TypeDef::family(ARRAY_FAMILY, TypeKind::Array)
            .module(CORE)
            .param("T")
            .param("N"),
        TypeDef::family(TUPLE_FAMILY, TypeKind::Tuple)
            .module(CORE)
            .variadic(),
        TypeDef::family(UNION_FAMILY, TypeKind::Union)
            .module(CORE)
            .variadic(),
    ]
}

/// Builtins in registration order, for listing.
pub fn all() -> [TypeRef; 20] {
    [
        ANY,
        DATATYPE,
        NOTHING,
        BOOL,
        CHAR,
        INT8,
        UINT8,
        INT16,
        UINT16,
        INT32,
        UINT32,
        INT64,
        UINT64,
        FLOAT32,
        FLOAT64,
        SYMBOL,
        STRING,
        SIMPLE_VECTOR,
        BUFFER,
        MODULE,
    ]
}
