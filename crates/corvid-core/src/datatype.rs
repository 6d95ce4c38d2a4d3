use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::builtins;
use crate::error::{CoreError, IndexKind};
use crate::header::TypeRef;
use crate::layout::Layout;
use crate::symbol::{intern, Symbol};

/// One generic parameter of an instantiated type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeParam {
    Type(TypeRef),
    Int(i64),
    Symbol(Symbol),
    Bool(bool),
}

impl TypeParam {
    pub fn as_type(&self) -> Option<TypeRef> {
        match self {
            TypeParam::Type(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            TypeParam::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<TypeRef> for TypeParam {
    fn from(t: TypeRef) -> Self {
        TypeParam::Type(t)
    }
}

/// A published parameter vector: fixed length, immutable, cheap to clone.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ParamVec(Arc<[TypeParam]>);

impl ParamVec {
    pub fn empty() -> Self {
        ParamVec(Arc::from(Vec::new()))
    }

    pub fn of_types(types: &[TypeRef]) -> Self {
        types.iter().map(|t| TypeParam::Type(*t)).collect()
    }

    pub fn builder() -> ParamVecBuilder {
        ParamVecBuilder { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, i: usize) -> Result<&TypeParam, CoreError> {
        self.0
            .get(i)
            .ok_or_else(|| CoreError::out_of_range(IndexKind::Parameter, i, self.0.len()))
    }

    pub fn as_slice(&self) -> &[TypeParam] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TypeParam> {
        self.0.iter()
    }
}

impl fmt::Debug for ParamVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl FromIterator<TypeParam> for ParamVec {
    fn from_iter<I: IntoIterator<Item = TypeParam>>(iter: I) -> Self {
        ParamVec(iter.into_iter().collect::<Vec<_>>().into())
    }
}

impl From<Vec<TypeParam>> for ParamVec {
    fn from(v: Vec<TypeParam>) -> Self {
        ParamVec(v.into())
    }
}

/// Construction-time form of a [`ParamVec`]. Truncation is only possible here;
/// once [`finish`](ParamVecBuilder::finish) publishes the vector its length is fixed.
#[derive(Debug, Default)]
pub struct ParamVecBuilder {
    items: Vec<TypeParam>,
}

impl ParamVecBuilder {
    pub fn push(mut self, p: impl Into<TypeParam>) -> Self {
        self.items.push(p.into());
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Shrinks the vector under construction. Growing is not allowed.
    pub fn truncate(mut self, len: usize) -> Result<Self, CoreError> {
        if len > self.items.len() {
            return Err(CoreError::out_of_range(
                IndexKind::Parameter,
                len,
                self.items.len(),
            ));
        }
        self.items.truncate(len);
        Ok(self)
    }

    pub fn finish(self) -> ParamVec {
        ParamVec(self.items.into())
    }
}

/// Declared type of a field: either fixed, or the `n`-th type parameter of the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldSpec {
    Type(TypeRef),
    Param(usize),
}

/// Structural category of a type family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Fixed-size bits with no fields (integers, floats, symbols...).
    Primitive { size: usize, align: usize },
    /// Named fields declared on the family.
    Struct,
    /// Immutable anonymous product; the field types are the parameters.
    Tuple,
    /// No instances; usable as a declared field type or supertype.
    Abstract,
    /// No instances; the parameters are the member types.
    Union,
    String,
    SimpleVector,
    Array,
    Buffer,
}

impl TypeKind {
    /// Kinds whose payload size depends on a per-instance length.
    pub fn is_variable_size(self) -> bool {
        matches!(
            self,
            TypeKind::String | TypeKind::SimpleVector | TypeKind::Array | TypeKind::Buffer
        )
    }

    pub fn is_instantiable(self) -> bool {
        !matches!(self, TypeKind::Abstract | TypeKind::Union)
    }
}

/// Declaration of a type family, handed to
/// [`TypeRegistry::declare`](crate::registry::TypeRegistry::declare).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    pub(crate) name: Symbol,
    pub(crate) module: Symbol,
    pub(crate) params: Vec<Symbol>,
    pub(crate) fields: Vec<(Symbol, FieldSpec)>,
    pub(crate) kind: TypeKind,
    pub(crate) mutable: bool,
    pub(crate) supertype: Option<TypeRef>,
    pub(crate) variadic: bool,
}

impl TypeDef {
    fn new(name: &str, kind: TypeKind) -> Self {
        TypeDef {
            name: intern(name),
            module: intern("Main"),
            params: Vec::new(),
            fields: Vec::new(),
            kind,
            mutable: false,
            supertype: Some(builtins::ANY),
            variadic: false,
        }
    }

    /// An immutable struct.
    pub fn structure(name: &str) -> Self {
        Self::new(name, TypeKind::Struct)
    }

    pub fn mutable_structure(name: &str) -> Self {
        Self::new(name, TypeKind::Struct).mutable(true)
    }

    pub fn abstract_type(name: &str) -> Self {
        Self::new(name, TypeKind::Abstract)
    }

    pub fn primitive(name: &str, size: usize, align: usize) -> Self {
        Self::new(name, TypeKind::Primitive { size, align })
    }

    pub(crate) fn family(name: &str, kind: TypeKind) -> Self {
        Self::new(name, kind)
    }

    pub(crate) fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    pub(crate) fn no_supertype(mut self) -> Self {
        self.supertype = None;
        self
    }

    pub fn module(mut self, module: &str) -> Self {
        self.module = intern(module);
        self
    }

    pub fn mutable(mut self, mutable: bool) -> Self {
        self.mutable = mutable;
        self
    }

    pub fn supertype(mut self, t: TypeRef) -> Self {
        self.supertype = Some(t);
        self
    }

    /// Adds a named type parameter.
    pub fn param(mut self, name: &str) -> Self {
        self.params.push(intern(name));
        self
    }

    pub fn field(mut self, name: &str, ty: TypeRef) -> Self {
        self.fields.push((intern(name), FieldSpec::Type(ty)));
        self
    }

    /// Adds a field whose type is the instance's `index`-th parameter.
    pub fn param_field(mut self, name: &str, index: usize) -> Self {
        self.fields.push((intern(name), FieldSpec::Param(index)));
        self
    }

    pub fn name(&self) -> Symbol {
        self.name
    }
}

/// A type family: everything the instantiations of one name share.
#[derive(Debug)]
pub struct TypeName {
    pub name: Symbol,
    pub module: Symbol,
    pub param_names: Box<[Symbol]>,
    pub field_names: Box<[Symbol]>,
    pub field_specs: Box<[FieldSpec]>,
    pub kind: TypeKind,
    pub mutable: bool,
    pub supertype: Option<TypeRef>,
    pub variadic: bool,
    /// FNV-1a of `module.name`. Unlike symbol keys it is the same in every
    /// process and on every toolchain.
    pub hash: u64,
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn stable_name_hash(module: Symbol, name: Symbol) -> u64 {
    let qualified = [module.as_str().as_bytes(), b".", name.as_str().as_bytes()];
    qualified
        .iter()
        .flat_map(|part| part.iter())
        .fold(FNV_OFFSET, |h, &b| (h ^ b as u64).wrapping_mul(FNV_PRIME))
}

impl TypeName {
    pub(crate) fn from_def(def: &TypeDef) -> Self {
        TypeName {
            name: def.name,
            module: def.module,
            param_names: def.params.clone().into(),
            field_names: def.fields.iter().map(|(n, _)| *n).collect(),
            field_specs: def.fields.iter().map(|(_, s)| *s).collect(),
            kind: def.kind,
            mutable: def.mutable,
            supertype: def.supertype,
            variadic: def.variadic,
            hash: stable_name_hash(def.module, def.name),
        }
    }

    /// True if `def` declares exactly this family: same fields in the same
    /// order, same parameters, kind and mutability.
    pub fn matches(&self, def: &TypeDef) -> bool {
        self.name == def.name
            && self.module == def.module
            && self.kind == def.kind
            && self.mutable == def.mutable
            && self.variadic == def.variadic
            && self.supertype == def.supertype
            && *self.param_names == *def.params
            && self.field_names.len() == def.fields.len()
            && self
                .field_names
                .iter()
                .zip(self.field_specs.iter())
                .zip(def.fields.iter())
                .all(|((n, s), (dn, ds))| n == dn && s == ds)
    }

    pub fn is_abstract(&self) -> bool {
        self.kind == TypeKind::Abstract
    }
}

/// A concrete registered type: a family plus the parameters it was applied to.
///
/// Descriptors are owned by the registry and never removed, so they outlive
/// every value tagged with them. The layout is filled in on first use.
pub struct DataType {
    pub(crate) tref: TypeRef,
    pub(crate) name: Arc<TypeName>,
    pub(crate) params: ParamVec,
    pub(crate) layout: OnceLock<Arc<Layout>>,
}

impl DataType {
    pub(crate) fn new(tref: TypeRef, name: Arc<TypeName>, params: ParamVec) -> Self {
        DataType {
            tref,
            name,
            params,
            layout: OnceLock::new(),
        }
    }

    pub fn type_ref(&self) -> TypeRef {
        self.tref
    }

    pub fn type_name(&self) -> &Arc<TypeName> {
        &self.name
    }

    pub fn name(&self) -> Symbol {
        self.name.name
    }

    pub fn kind(&self) -> TypeKind {
        self.name.kind
    }

    pub fn params(&self) -> &ParamVec {
        &self.params
    }

    pub fn parameter(&self, i: usize) -> Result<&TypeParam, CoreError> {
        self.params.get(i)
    }

    pub fn is_mutable(&self) -> bool {
        self.name.mutable
    }

    pub fn is_abstract(&self) -> bool {
        self.name.is_abstract()
    }

    pub fn is_concrete(&self) -> bool {
        self.name.kind.is_instantiable()
    }

    pub fn supertype(&self) -> Option<TypeRef> {
        self.name.supertype
    }

    /// The layout, if some caller already forced it.
    pub fn cached_layout(&self) -> Option<&Arc<Layout>> {
        self.layout.get()
    }
}

impl fmt::Debug for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataType")
            .field("name", &self.name.name)
            .field("ref", &self.tref)
            .field("params", &self.params)
            .finish()
    }
}
