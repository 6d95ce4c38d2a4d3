//! Field layouts, computed on first use and memoized per descriptor.

use std::sync::Arc;

use crate::datatype::{DataType, FieldSpec, TypeKind, TypeParam};
use crate::error::{CoreError, IndexKind};
use crate::header::TypeRef;
use crate::registry::TypeRegistry;
use crate::symbol::{intern, Symbol};

/// Inline nesting deeper than this is treated as a self-containing type.
const MAX_LAYOUT_DEPTH: usize = 64;

/// Size of a stored reference slot.
pub const REF_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    pub name: Symbol,
    pub ty: TypeRef,
    pub offset: usize,
    pub size: usize,
    /// Stored by value rather than as a reference.
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub size: usize,
    pub alignment: usize,
    pub fields: Vec<FieldLayout>,
    /// Offsets of reference slots, for collector scanning.
    pub pointer_offsets: Vec<usize>,
    /// Immutable plain data with no reference slots. Such types are stored
    /// inline wherever they are used as a field or element type.
    pub is_bits: bool,
    pub has_padding: bool,
}

impl Layout {
    fn opaque(size: usize, alignment: usize, pointer_offsets: Vec<usize>) -> Self {
        Layout {
            size,
            alignment,
            fields: Vec::new(),
            pointer_offsets,
            is_bits: false,
            has_padding: false,
        }
    }

    pub fn nfields(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, i: usize) -> Result<&FieldLayout, CoreError> {
        self.fields
            .get(i)
            .ok_or_else(|| CoreError::out_of_range(IndexKind::Field, i, self.fields.len()))
    }

    pub fn field_index(&self, name: Symbol) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

pub(crate) fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// Byte offset of an array's `owner` word for a given rank.
pub fn array_data_owner_offset(ndims: usize) -> usize {
    REF_SIZE * (4 + ndims)
}

impl TypeRegistry {
    /// The memoized layout of `t`. Racing first callers may each compute one,
    /// but only a single fully built instance is ever published.
    pub fn layout(&self, t: TypeRef) -> Result<Arc<Layout>, CoreError> {
        let dt = self.get(t)?;
        self.layout_of(&dt, 0)
    }

    fn layout_of(&self, dt: &DataType, depth: usize) -> Result<Arc<Layout>, CoreError> {
        if let Some(layout) = dt.layout.get() {
            return Ok(layout.clone());
        }
        if depth > MAX_LAYOUT_DEPTH {
            return Err(CoreError::invalid_argument(format!(
                "{} contains itself inline",
                dt.name()
            )));
        }
        let computed = Arc::new(self.compute_layout(dt, depth)?);
        let mut won = false;
        let published = dt.layout.get_or_init(|| {
            won = true;
            computed
        });
        if won {
            tracing::debug!(
                "published layout for {}: size {}, align {}, {} fields",
                dt.name(),
                published.size,
                published.alignment,
                published.fields.len()
            );
        }
        Ok(published.clone())
    }

    /// Whether instances of `t` are embedded by value in fields and arrays.
    pub fn is_inline_allocatable(&self, t: TypeRef) -> Result<bool, CoreError> {
        let dt = self.get(t)?;
        self.inline_at(&dt, 0)
    }

    fn inline_at(&self, dt: &DataType, depth: usize) -> Result<bool, CoreError> {
        let candidate = !dt.is_mutable()
            && matches!(
                dt.kind(),
                TypeKind::Primitive { .. } | TypeKind::Struct | TypeKind::Tuple
            );
        if !candidate {
            return Ok(false);
        }
        Ok(self.layout_of(dt, depth)?.is_bits)
    }

    fn resolve_field_type(&self, dt: &DataType, spec: FieldSpec) -> Result<TypeRef, CoreError> {
        match spec {
            FieldSpec::Type(t) => Ok(t),
            FieldSpec::Param(i) => dt.parameter(i)?.as_type().ok_or_else(|| {
                CoreError::invalid_argument(format!(
                    "{}: parameter {i} is not a type",
                    dt.name()
                ))
            }),
        }
    }

    fn compute_layout(&self, dt: &DataType, depth: usize) -> Result<Layout, CoreError> {
        let fields: Vec<(Symbol, TypeRef)> = match dt.kind() {
            TypeKind::Primitive { size, align } => {
                return Ok(Layout {
                    size,
                    alignment: align,
                    fields: Vec::new(),
                    pointer_offsets: Vec::new(),
                    is_bits: true,
                    has_padding: false,
                })
            }
            TypeKind::Abstract | TypeKind::Union => {
                return Err(CoreError::invalid_argument(format!(
                    "{} is abstract and has no layout",
                    self.type_string(dt.type_ref())?
                )))
            }
            TypeKind::String | TypeKind::SimpleVector | TypeKind::Buffer => {
                return Ok(Layout::opaque(REF_SIZE, REF_SIZE, Vec::new()))
            }
            TypeKind::Array => {
                let ndims = dt
                    .parameter(1)?
                    .as_int()
                    .ok_or_else(|| CoreError::invalid_argument("array rank must be an integer"))?
                    as usize;
                let owner = array_data_owner_offset(ndims);
                return Ok(Layout::opaque(owner + REF_SIZE, REF_SIZE, vec![0, owner]));
            }
            TypeKind::Struct => dt
                .name
                .field_names
                .iter()
                .zip(dt.name.field_specs.iter())
                .map(|(n, s)| Ok((*n, self.resolve_field_type(dt, *s)?)))
                .collect::<Result<_, CoreError>>()?,
            TypeKind::Tuple => dt
                .params()
                .iter()
                .enumerate()
                .map(|(i, p)| match p {
                    TypeParam::Type(t) => Ok((intern(&(i + 1).to_string()), *t)),
                    _ => Err(CoreError::invalid_argument("Tuple parameters must be types")),
                })
                .collect::<Result<_, CoreError>>()?,
        };

        let mut offset = 0;
        let mut alignment = 1;
        let mut has_padding = false;
        let mut pointer_offsets = Vec::new();
        let mut placed = Vec::with_capacity(fields.len());
        for (name, ty) in fields {
            let fdt = self.get(ty)?;
            let inline = self.inline_at(&fdt, depth + 1)?;
            let (size, align) = if inline {
                let fl = self.layout_of(&fdt, depth + 1)?;
                (fl.size, fl.alignment)
            } else {
                (REF_SIZE, REF_SIZE)
            };
            let at = align_up(offset, align);
            has_padding |= at != offset;
            if !inline {
                pointer_offsets.push(at);
            }
            placed.push(FieldLayout {
                name,
                ty,
                offset: at,
                size,
                inline,
            });
            offset = at + size;
            alignment = alignment.max(align);
        }
        let size = align_up(offset, alignment);
        has_padding |= size != offset;

        Ok(Layout {
            size,
            alignment,
            fields: placed,
            is_bits: !dt.is_mutable() && pointer_offsets.is_empty(),
            pointer_offsets,
            has_padding,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::*;
    use crate::datatype::TypeDef;

    #[test]
    fn primitive_layouts() {
        let reg = TypeRegistry::new();
        assert_eq!(reg.size_of(INT8).unwrap(), 1);
        assert_eq!(reg.size_of(FLOAT64).unwrap(), 8);
        assert_eq!(reg.alignment_of(INT32).unwrap(), 4);
        assert!(reg.is_inline_allocatable(CHAR).unwrap());
        assert_eq!(reg.field_count(INT64).unwrap(), 0);
    }

    #[test]
    fn struct_fields_are_aligned() {
        let reg = TypeRegistry::new();
        let t = reg
            .define(
                TypeDef::structure("Mixed")
                    .field("a", INT8)
                    .field("b", INT64)
                    .field("c", INT16),
            )
            .unwrap();
        let l = reg.layout(t).unwrap();
        let offsets: Vec<_> = l.fields.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 8, 16]);
        assert_eq!(l.size, 24);
        assert_eq!(l.alignment, 8);
        assert!(l.has_padding);
        assert!(l.is_bits);
        assert!(reg.is_inline_allocatable(t).unwrap());
    }

    #[test]
    fn reference_fields_are_pointer_slots() {
        let reg = TypeRegistry::new();
        let t = reg
            .define(
                TypeDef::structure("Named")
                    .field("id", INT32)
                    .field("label", STRING)
                    .field("any", ANY),
            )
            .unwrap();
        let l = reg.layout(t).unwrap();
        assert_eq!(l.pointer_offsets, vec![8, 16]);
        assert!(!l.fields[1].inline);
        assert!(!l.is_bits);
        assert!(!reg.is_inline_allocatable(t).unwrap());
    }

    #[test]
    fn bits_structs_nest_inline() {
        let reg = TypeRegistry::new();
        let point = reg
            .define(
                TypeDef::structure("Pt")
                    .field("x", FLOAT32)
                    .field("y", FLOAT32),
            )
            .unwrap();
        let seg = reg
            .define(TypeDef::structure("Seg").field("a", point).field("b", point))
            .unwrap();
        let l = reg.layout(seg).unwrap();
        assert!(l.fields.iter().all(|f| f.inline));
        assert_eq!(l.fields[1].offset, 8);
        assert_eq!(l.size, 16);
        assert_eq!(l.alignment, 4);
    }

    #[test]
    fn mutable_structs_are_never_inline() {
        let reg = TypeRegistry::new();
        let cell = reg
            .define(TypeDef::mutable_structure("Cell").field("v", INT64))
            .unwrap();
        assert!(!reg.is_inline_allocatable(cell).unwrap());
        let holder = reg
            .define(TypeDef::structure("Holder").field("c", cell))
            .unwrap();
        assert_eq!(reg.layout(holder).unwrap().pointer_offsets, vec![0]);
    }

    #[test]
    fn nothing_is_a_zero_size_singleton() {
        let reg = TypeRegistry::new();
        let l = reg.layout(NOTHING).unwrap();
        assert_eq!(l.size, 0);
        assert!(l.is_bits);
    }

    #[test]
    fn tuple_fields_come_from_params() {
        let reg = TypeRegistry::new();
        let t = reg.tuple_type(&[INT8, FLOAT64]).unwrap();
        let l = reg.layout(t).unwrap();
        assert_eq!(l.fields[0].name.as_str(), "1");
        assert_eq!(l.fields[1].offset, 8);
        assert_eq!(reg.field_index(t, "2").unwrap(), 1);
    }

    #[test]
    fn abstract_types_have_no_layout() {
        let reg = TypeRegistry::new();
        assert!(matches!(reg.layout(ANY), Err(CoreError::InvalidArgument(_))));
        let u = reg.union(&[INT8, INT16]).unwrap();
        assert!(reg.layout(u).is_err());
        assert!(!reg.is_inline_allocatable(ANY).unwrap());
    }

    #[test]
    fn array_prefix_depends_on_rank() {
        let reg = TypeRegistry::new();
        let a1 = reg.array_type(INT8, 1).unwrap();
        let a3 = reg.array_type(INT8, 3).unwrap();
        assert_eq!(reg.size_of(a1).unwrap(), 48);
        assert_eq!(reg.size_of(a3).unwrap(), 64);
        assert_eq!(reg.layout(a3).unwrap().pointer_offsets, vec![0, 56]);
    }

    #[test]
    fn layout_is_memoized() {
        let reg = TypeRegistry::new();
        let a = reg.layout(MODULE).unwrap();
        let b = reg.layout(MODULE).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(reg.get(MODULE).unwrap().cached_layout().is_some());
    }
}
