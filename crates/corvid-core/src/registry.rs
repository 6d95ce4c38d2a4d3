//! Process-wide type registry.
//!
//! Descriptors are append-only: once a [`DataType`] is registered its entry is
//! never replaced or removed, so an `Arc<DataType>` handed out by [`TypeRegistry::get`]
//! stays valid for as long as any value is tagged with it. Instantiations of a
//! parametric family are hash-consed on `(name, params)`.

use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};

use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;

use crate::builtins::{self, ANY, ARRAY_FAMILY, TUPLE_FAMILY, UNION_FAMILY};
use crate::datatype::{DataType, FieldSpec, ParamVec, TypeDef, TypeKind, TypeName, TypeParam};
use crate::error::CoreError;
use crate::header::TypeRef;
use crate::symbol::{intern, Symbol};

static GLOBAL: OnceLock<Arc<TypeRegistry>> = OnceLock::new();

/// Largest rank an `Array{T,N}` may be applied with.
pub const MAX_ARRAY_RANK: i64 = u16::MAX as i64;

#[derive(Default)]
struct Inner {
    types: Vec<Arc<DataType>>,
    families: HashMap<Symbol, Arc<TypeName>>,
    instances: HashMap<(Symbol, ParamVec), TypeRef>,
}

impl Inner {
    fn next_ref(&self) -> Result<TypeRef, CoreError> {
        TypeRef::try_from_index(self.types.len() + 1)
            .ok_or_else(|| CoreError::invalid_argument("type registry is full"))
    }

    fn insert(&mut self, tref: TypeRef, name: Arc<TypeName>, params: ParamVec) {
        self.instances.insert((name.name, params.clone()), tref);
        self.types.push(Arc::new(DataType::new(tref, name, params)));
    }
}

pub struct TypeRegistry {
    inner: RwLock<Inner>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// A fresh registry holding only the builtins.
    pub fn new() -> Self {
        let mut inner = Inner::default();
        for (i, def) in builtins::instances().iter().enumerate() {
            let name = Arc::new(TypeName::from_def(def));
            inner.families.insert(def.name, name.clone());
            inner.insert(TypeRef::from_index(i as u32 + 1), name, ParamVec::empty());
        }
        for def in builtins::families() {
            inner
                .families
                .insert(def.name, Arc::new(TypeName::from_def(&def)));
        }
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// The process-wide registry, created on first use.
    pub fn global() -> Arc<TypeRegistry> {
        GLOBAL
            .get_or_init(|| Arc::new(TypeRegistry::new()))
            .clone()
    }

    pub fn get(&self, t: TypeRef) -> Result<Arc<DataType>, CoreError> {
        self.inner
            .read()
            .types
            .get(t.index() as usize - 1)
            .cloned()
            .ok_or_else(|| CoreError::invalid_tag(t.addr(), "unregistered descriptor"))
    }

    pub fn contains(&self, t: TypeRef) -> bool {
        (t.index() as usize) <= self.inner.read().types.len()
    }

    pub fn len(&self) -> usize {
        self.inner.read().types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every registered concrete or abstract instance, in registration order.
    pub fn types(&self) -> Vec<TypeRef> {
        self.inner.read().types.iter().map(|d| d.tref).collect()
    }

    pub fn family(&self, name: Symbol) -> Option<Arc<TypeName>> {
        self.inner.read().families.get(&name).cloned()
    }

    /// The instance of a non-parametric family, if it exists.
    pub fn lookup(&self, name: &str) -> Option<TypeRef> {
        self.inner
            .read()
            .instances
            .get(&(intern(name), ParamVec::empty()))
            .copied()
    }

    /// Registers a new family. A family without parameters is instantiated
    /// right away.
    pub fn declare(&self, def: TypeDef) -> Result<Arc<TypeName>, CoreError> {
        self.validate(&def)?;
        let name = Arc::new(TypeName::from_def(&def));
        let instance = {
            let mut inner = self.inner.write();
            if inner.families.contains_key(&def.name) {
                return Err(CoreError::invalid_definition(format!(
                    "type {} is already declared",
                    def.name
                )));
            }
            inner.families.insert(def.name, name.clone());
            if def.params.is_empty() && !def.variadic {
                let tref = inner.next_ref()?;
                inner.insert(tref, name.clone(), ParamVec::empty());
                Some(tref)
            } else {
                None
            }
        };
        tracing::debug!(
            "declared type {}.{} ({} fields, instance {instance:?})",
            def.module,
            def.name,
            def.fields.len()
        );
        Ok(name)
    }

    /// Like [`declare`](Self::declare), but returns the existing family when an
    /// identical definition was already registered. Field order and count are
    /// part of a family's identity, so any difference is an error.
    pub fn declare_or_get(&self, def: TypeDef) -> Result<Arc<TypeName>, CoreError> {
        if let Some(existing) = self.family(def.name) {
            return if existing.matches(&def) {
                Ok(existing)
            } else {
                Err(CoreError::invalid_definition(format!(
                    "type {} is already declared with a different shape",
                    def.name
                )))
            };
        }
        let name = def.name;
        match self.declare(def.clone()) {
            Ok(family) => Ok(family),
            // lost a race against an identical declaration
            Err(e) => match self.family(name) {
                Some(existing) if existing.matches(&def) => Ok(existing),
                _ => Err(e),
            },
        }
    }

    /// Declares (or finds) a non-parametric family and returns its only instance.
    pub fn define(&self, def: TypeDef) -> Result<TypeRef, CoreError> {
        if !def.params.is_empty() || def.variadic {
            return Err(CoreError::invalid_argument(format!(
                "{} has type parameters; declare it and apply it instead",
                def.name
            )));
        }
        let name = def.name;
        self.declare_or_get(def)?;
        self.apply(name, ParamVec::empty())
    }

    fn validate(&self, def: &TypeDef) -> Result<(), CoreError> {
        let bad = |msg: String| Err(CoreError::invalid_definition(format!("{}: {msg}", def.name)));

        let mut seen = HashSet::new();
        for p in &def.params {
            if !seen.insert(*p) {
                return bad(format!("duplicate type parameter {p}"));
            }
        }

        match def.kind {
            TypeKind::Struct => {}
            TypeKind::Primitive { size, align } => {
                if size == 0 || !align.is_power_of_two() || align > 16 {
                    return bad(format!("bad primitive size {size} / alignment {align}"));
                }
            }
            _ if !def.fields.is_empty() => {
                return bad("only structs declare fields".to_string());
            }
            _ => {}
        }
        if def.mutable && def.kind != TypeKind::Struct {
            return bad("only structs can be mutable".to_string());
        }

        let mut seen = HashSet::new();
        for (fname, spec) in &def.fields {
            if !seen.insert(*fname) {
                return bad(format!("duplicate field {fname}"));
            }
            match spec {
                FieldSpec::Type(t) => {
                    self.get(*t)?;
                }
                FieldSpec::Param(i) if *i >= def.params.len() => {
                    return bad(format!(
                        "field {fname} refers to parameter {i}, only {} declared",
                        def.params.len()
                    ));
                }
                FieldSpec::Param(_) => {}
            }
        }

        if let Some(sup) = def.supertype {
            if !self.get(sup)?.is_abstract() {
                return bad(format!("supertype {} is not abstract", self.type_string(sup)?));
            }
        }
        Ok(())
    }

    /// Instantiates family `name` with `params`. Content-equal parameter
    /// vectors always yield the same reference.
    pub fn apply(&self, name: Symbol, params: ParamVec) -> Result<TypeRef, CoreError> {
        if let Some(t) = self.inner.read().instances.get(&(name, params.clone())) {
            return Ok(*t);
        }
        let family = self
            .family(name)
            .ok_or_else(|| CoreError::undef(format!("type {name}")))?;
        if family.kind == TypeKind::Union {
            let members = params
                .iter()
                .map(|p| {
                    p.as_type()
                        .ok_or_else(|| CoreError::invalid_argument("Union members must be types"))
                })
                .collect::<Result<Vec<_>, _>>()?;
            return self.union(&members);
        }
        self.check_params(&family, &params)?;
        self.intern_instance(family, params)
    }

    fn check_params(&self, family: &TypeName, params: &ParamVec) -> Result<(), CoreError> {
        let name = family.name;
        if !family.variadic && params.len() != family.param_names.len() {
            return Err(CoreError::invalid_argument(format!(
                "{name} expects {} parameters, got {}",
                family.param_names.len(),
                params.len()
            )));
        }
        for p in params.iter() {
            if let TypeParam::Type(t) = p {
                self.get(*t)?;
            }
        }
        match family.kind {
            TypeKind::Array => match params.as_slice() {
                [TypeParam::Type(_), TypeParam::Int(n)] if (0..=MAX_ARRAY_RANK).contains(n) => {}
                _ => {
                    return Err(CoreError::invalid_argument(format!(
                        "{name} expects {{Type, rank}}, got {params:?}"
                    )))
                }
            },
            TypeKind::Tuple => {
                if params.iter().any(|p| p.as_type().is_none()) {
                    return Err(CoreError::invalid_argument("Tuple parameters must be types"));
                }
            }
            TypeKind::Struct => {
                for (fname, spec) in family.field_names.iter().zip(family.field_specs.iter()) {
                    if let FieldSpec::Param(i) = spec {
                        if params.get(*i)?.as_type().is_none() {
                            return Err(CoreError::invalid_argument(format!(
                                "{name}.{fname} needs a type for parameter {i}"
                            )));
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn intern_instance(&self, family: Arc<TypeName>, params: ParamVec) -> Result<TypeRef, CoreError> {
        let (tref, created) = {
            let mut inner = self.inner.write();
            match inner.instances.get(&(family.name, params.clone())) {
                Some(t) => (*t, false),
                None => {
                    let tref = inner.next_ref()?;
                    inner.insert(tref, family, params);
                    (tref, true)
                }
            }
        };
        if created {
            tracing::debug!("instantiated {} as {tref:?}", self.type_string(tref)?);
        }
        Ok(tref)
    }

    /// Normalized union: nested unions are flattened, duplicates removed and
    /// members sorted. A single remaining member is returned as itself.
    pub fn union(&self, members: &[TypeRef]) -> Result<TypeRef, CoreError> {
        let mut flat = Vec::with_capacity(members.len());
        for &m in members {
            let dt = self.get(m)?;
            if dt.kind() == TypeKind::Union {
                flat.extend(dt.params().iter().filter_map(TypeParam::as_type));
            } else {
                flat.push(m);
            }
        }
        if flat.contains(&ANY) {
            return Ok(ANY);
        }
        let mut keyed = flat
            .into_iter()
            .map(|t| Ok((self.type_string(t)?, t)))
            .collect::<Result<Vec<_>, CoreError>>()?;
        keyed.sort();
        keyed.dedup_by_key(|(_, t)| *t);
        if let [(_, only)] = keyed.as_slice() {
            return Ok(*only);
        }
        let family = self
            .family(intern(UNION_FAMILY))
            .ok_or_else(|| CoreError::undef("type Union"))?;
        let params = keyed.into_iter().map(|(_, t)| TypeParam::Type(t)).collect();
        self.intern_instance(family, params)
    }

    pub fn tuple_type(&self, fields: &[TypeRef]) -> Result<TypeRef, CoreError> {
        self.apply(intern(TUPLE_FAMILY), ParamVec::of_types(fields))
    }

    pub fn array_type(&self, elem: TypeRef, ndims: usize) -> Result<TypeRef, CoreError> {
        let params = ParamVec::builder()
            .push(elem)
            .push(TypeParam::Int(ndims as i64))
            .finish();
        self.apply(intern(ARRAY_FAMILY), params)
    }

    /// Lightweight subtype test: identity, `Any`, union membership or the
    /// declared supertype chain.
    pub fn isa(&self, t: TypeRef, declared: TypeRef) -> Result<bool, CoreError> {
        if t == declared || declared == ANY {
            return Ok(true);
        }
        let sub = self.get(t)?;
        if sub.kind() == TypeKind::Union {
            for m in sub.params().iter().filter_map(TypeParam::as_type) {
                if !self.isa(m, declared)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
        let sup = self.get(declared)?;
        if sup.kind() == TypeKind::Union {
            for m in sup.params().iter().filter_map(TypeParam::as_type) {
                if self.isa(t, m)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        let mut cur = sub.supertype();
        while let Some(s) = cur {
            if s == declared {
                return Ok(true);
            }
            cur = self.get(s)?.supertype();
        }
        Ok(false)
    }

    /// Renders a type the way error messages show it, e.g. `Array{Int8, 1}`.
    pub fn type_string(&self, t: TypeRef) -> Result<String, CoreError> {
        let mut out = String::new();
        self.write_type(&mut out, t)?;
        Ok(out)
    }

    fn write_type(&self, out: &mut String, t: TypeRef) -> Result<(), CoreError> {
        let dt = self.get(t)?;
        out.push_str(dt.name().as_str());
        if dt.params().is_empty() && dt.kind() != TypeKind::Union {
            return Ok(());
        }
        out.push('{');
        for (i, p) in dt.params().iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            match p {
                TypeParam::Type(pt) => self.write_type(out, *pt)?,
                TypeParam::Int(n) => {
                    let _ = write!(out, "{n}");
                }
                TypeParam::Symbol(s) => {
                    let _ = write!(out, ":{s}");
                }
                TypeParam::Bool(b) => {
                    let _ = write!(out, "{b}");
                }
            }
        }
        out.push('}');
        Ok(())
    }

    // --- descriptor introspection ---

    pub fn parameter(&self, t: TypeRef, i: usize) -> Result<TypeParam, CoreError> {
        Ok(*self.get(t)?.parameter(i)?)
    }

    pub fn field_count(&self, t: TypeRef) -> Result<usize, CoreError> {
        Ok(self.layout(t)?.nfields())
    }

    pub fn field_offset(&self, t: TypeRef, i: usize) -> Result<usize, CoreError> {
        Ok(self.layout(t)?.field(i)?.offset)
    }

    pub fn field_type(&self, t: TypeRef, i: usize) -> Result<TypeRef, CoreError> {
        Ok(self.layout(t)?.field(i)?.ty)
    }

    pub fn field_name(&self, t: TypeRef, i: usize) -> Result<Symbol, CoreError> {
        Ok(self.layout(t)?.field(i)?.name)
    }

    /// Position of the field called `name`.
    pub fn field_index(&self, t: TypeRef, name: &str) -> Result<usize, CoreError> {
        let layout = self.layout(t)?;
        layout.field_index(intern(name)).ok_or_else(|| {
            let ty = self.type_string(t).unwrap_or_else(|_| format!("{t:?}"));
            CoreError::undef(format!("field {name} of {ty}"))
        })
    }

    pub fn size_of(&self, t: TypeRef) -> Result<usize, CoreError> {
        Ok(self.layout(t)?.size)
    }

    pub fn alignment_of(&self, t: TypeRef) -> Result<usize, CoreError> {
        Ok(self.layout(t)?.alignment)
    }

    pub fn is_mutable(&self, t: TypeRef) -> Result<bool, CoreError> {
        Ok(self.get(t)?.is_mutable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::*;

    #[test]
    fn builtins_resolve_to_their_constants() {
        let reg = TypeRegistry::new();
        assert_eq!(reg.lookup("Any"), Some(ANY));
        assert_eq!(reg.lookup("Int64"), Some(INT64));
        assert_eq!(reg.lookup("Module"), Some(MODULE));
        assert_eq!(reg.get(STRING).unwrap().kind(), TypeKind::String);
        assert_eq!(reg.len(), builtins::all().len());
    }

    #[test]
    fn unregistered_reference_is_invalid_tag() {
        let reg = TypeRegistry::new();
        let bogus = TypeRef::from_index(9999);
        assert!(matches!(reg.get(bogus), Err(CoreError::InvalidTag { .. })));
    }

    #[test]
    fn apply_hash_conses() {
        let reg = TypeRegistry::new();
        let a = reg.array_type(INT8, 1).unwrap();
        let b = reg.array_type(INT8, 1).unwrap();
        let c = reg.array_type(INT8, 2).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(reg.type_string(a).unwrap(), "Array{Int8, 1}");
    }

    #[test]
    fn apply_checks_parameters() {
        let reg = TypeRegistry::new();
        let arr = intern("Array");
        assert!(reg.apply(arr, ParamVec::of_types(&[INT8])).is_err());
        assert!(reg
            .apply(arr, ParamVec::of_types(&[INT8, INT8]))
            .is_err());
        let neg = ParamVec::builder().push(INT8).push(TypeParam::Int(-1)).finish();
        assert!(reg.apply(arr, neg).is_err());
        assert!(matches!(
            reg.apply(intern("NoSuchFamily"), ParamVec::empty()),
            Err(CoreError::UndefRef(_))
        ));
    }

    #[test]
    fn declare_rejects_duplicates_and_declare_or_get_accepts_identical() {
        let reg = TypeRegistry::new();
        let def = TypeDef::structure("Pair")
            .field("a", INT64)
            .field("b", FLOAT64);
        reg.declare(def.clone()).unwrap();
        assert!(matches!(
            reg.declare(def.clone()),
            Err(CoreError::InvalidDefinition(_))
        ));
        assert!(reg.declare_or_get(def).is_ok());

        let reordered = TypeDef::structure("Pair")
            .field("b", FLOAT64)
            .field("a", INT64);
        assert!(matches!(
            reg.declare_or_get(reordered),
            Err(CoreError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn declare_validates_fields() {
        let reg = TypeRegistry::new();
        let dup = TypeDef::structure("Dup").field("x", INT8).field("x", INT8);
        assert!(reg.declare(dup).is_err());

        let bad_param = TypeDef::structure("BadParam").param_field("x", 0);
        assert!(reg.declare(bad_param).is_err());

        let concrete_super = TypeDef::structure("Sub").supertype(INT64);
        assert!(reg.declare(concrete_super).is_err());
    }

    #[test]
    fn parametric_struct_instances_are_distinct() {
        let reg = TypeRegistry::new();
        reg.declare(TypeDef::structure("Wrap").param("T").param_field("x", 0))
            .unwrap();
        let w = intern("Wrap");
        let a = reg.apply(w, ParamVec::of_types(&[INT64])).unwrap();
        let b = reg.apply(w, ParamVec::of_types(&[INT64])).unwrap();
        let c = reg.apply(w, ParamVec::of_types(&[FLOAT64])).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(reg.field_type(a, 0).unwrap(), INT64);
        assert_eq!(reg.field_type(c, 0).unwrap(), FLOAT64);

        let non_type = ParamVec::builder().push(TypeParam::Int(3)).finish();
        assert!(reg.apply(w, non_type).is_err());
    }

    #[test]
    fn union_normalizes() {
        let reg = TypeRegistry::new();
        let u1 = reg.union(&[INT64, FLOAT64]).unwrap();
        let u2 = reg.union(&[FLOAT64, INT64, INT64]).unwrap();
        assert_eq!(u1, u2);
        assert_eq!(reg.type_string(u1).unwrap(), "Union{Float64, Int64}");

        let nested = reg.union(&[u1, BOOL]).unwrap();
        assert_eq!(reg.get(nested).unwrap().params().len(), 3);
        assert_eq!(reg.union(&[INT8]).unwrap(), INT8);
        assert_eq!(reg.union(&[INT8, ANY]).unwrap(), ANY);
    }

    #[test]
    fn isa_follows_supertypes_and_unions() {
        let reg = TypeRegistry::new();
        let number = reg.define(TypeDef::abstract_type("Number")).unwrap();
        let real = reg
            .define(TypeDef::abstract_type("Real").supertype(number))
            .unwrap();
        let fixed = reg
            .define(TypeDef::primitive("Fixed16", 2, 2).supertype(real))
            .unwrap();
        assert!(reg.isa(fixed, number).unwrap());
        assert!(reg.isa(fixed, ANY).unwrap());
        assert!(!reg.isa(number, fixed).unwrap());

        let u = reg.union(&[INT8, STRING]).unwrap();
        assert!(reg.isa(INT8, u).unwrap());
        assert!(!reg.isa(INT16, u).unwrap());
        assert!(reg.isa(u, ANY).unwrap());
        assert!(!reg.isa(u, INT8).unwrap());
    }

    #[test]
    fn parameter_is_bounds_checked() {
        let reg = TypeRegistry::new();
        let t = reg.tuple_type(&[INT64, STRING, BOOL]).unwrap();
        assert_eq!(reg.parameter(t, 1).unwrap(), TypeParam::Type(STRING));
        assert!(matches!(
            reg.parameter(t, 3),
            Err(CoreError::IndexOutOfRange { index: 3, len: 3, .. })
        ));
    }

    #[test]
    fn define_refuses_parametric() {
        let reg = TypeRegistry::new();
        assert!(reg.define(TypeDef::structure("Gen").param("T")).is_err());
    }
}
