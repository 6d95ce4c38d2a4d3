use corvid_core::{
    CoreError, Heap, Symbol, TypeRef, TypeRegistry, Value, WriteBarrier,
};

use crate::types::IrTypes;

/// Cheap classification of a value's IR kind, without decoding its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrKind {
    Goto,
    Line,
    Quote,
    Slot,
    TypedSlot,
    Global,
    Phi,
    PhiC,
    Upsilon,
    Pi,
    NewVar,
    Ssa,
    Expr,
}

/// A reference to a local slot, optionally carrying the type inference gave it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRef {
    pub index: i64,
    pub declared: Option<TypeRef>,
}

/// A binding `name` in module `module`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalRef {
    pub module: Value,
    pub name: Symbol,
}

/// A decoded IR node. Anything that is not one of the node kinds decodes as a
/// [`IrNode::Literal`].
#[derive(Debug, Clone, PartialEq)]
pub enum IrNode {
    /// Unconditional jump to a statement label
    Goto { label: i64 },
    /// Source position marker
    Line { line: i64, file: Symbol },
    /// A value used as-is, never evaluated
    Quote(Value),
    Slot(SlotRef),
    Global(GlobalRef),
    /// SSA join: `values[i]` flows in from predecessor `edges[i]`.
    /// `None` marks an edge whose value is undefined.
    Phi {
        edges: Vec<i32>,
        values: Vec<Option<Value>>,
    },
    /// Join for values defined inside a try region, fed by upsilon nodes
    PhiC { values: Vec<Option<Value>> },
    /// Feeds a PhiC node
    Upsilon { value: Option<Value> },
    /// Narrows `value` to `typ`
    Pi { value: Value, typ: TypeRef },
    /// Marks a slot as freshly undefined
    NewVar { slot: Value },
    /// Reference to an SSA statement
    Ssa { id: i64 },
    /// Call-like expression
    Expr { head: Symbol, args: Vec<Value> },
    /// Any other value
    Literal(Value),
}

impl IrNode {
    pub fn kind(&self) -> Option<IrKind> {
        Some(match self {
            IrNode::Goto { .. } => IrKind::Goto,
            IrNode::Line { .. } => IrKind::Line,
            IrNode::Quote(_) => IrKind::Quote,
            IrNode::Slot(SlotRef { declared: None, .. }) => IrKind::Slot,
            IrNode::Slot(SlotRef {
                declared: Some(_), ..
            }) => IrKind::TypedSlot,
            IrNode::Global(_) => IrKind::Global,
            IrNode::Phi { .. } => IrKind::Phi,
            IrNode::PhiC { .. } => IrKind::PhiC,
            IrNode::Upsilon { .. } => IrKind::Upsilon,
            IrNode::Pi { .. } => IrKind::Pi,
            IrNode::NewVar { .. } => IrKind::NewVar,
            IrNode::Ssa { .. } => IrKind::Ssa,
            IrNode::Expr { .. } => IrKind::Expr,
            IrNode::Literal(_) => return None,
        })
    }

    /// Builds the heap object for this node.
    pub fn encode<B: WriteBarrier>(&self, ir: &Ir, heap: &mut Heap<B>) -> Result<Value, CoreError> {
        match self {
            IrNode::Goto { label } => ir.goto(heap, *label),
            IrNode::Line { line, file } => ir.line(heap, *line, *file),
            IrNode::Quote(v) => ir.quote(heap, *v),
            IrNode::Slot(SlotRef {
                index,
                declared: None,
            }) => ir.slot(heap, *index),
            IrNode::Slot(SlotRef {
                index,
                declared: Some(t),
            }) => ir.typed_slot(heap, *index, *t),
            IrNode::Global(g) => ir.global(heap, g.module, g.name),
            IrNode::Phi { edges, values } => ir.phi(heap, edges, values),
            IrNode::PhiC { values } => ir.phic(heap, values),
            IrNode::Upsilon { value } => ir.upsilon(heap, *value),
            IrNode::Pi { value, typ } => ir.pi(heap, *value, *typ),
            IrNode::NewVar { slot } => ir.newvar(heap, *slot),
            IrNode::Ssa { id } => ir.ssa(heap, *id),
            IrNode::Expr { head, args } => ir.expr(heap, *head, args),
            IrNode::Literal(v) => Ok(*v),
        }
    }
}

/// Entry point for building and inspecting IR nodes on a heap.
#[derive(Debug, Clone, Copy)]
pub struct Ir {
    types: IrTypes,
}

impl Ir {
    pub fn new(reg: &TypeRegistry) -> Result<Self, CoreError> {
        Ok(Ir {
            types: IrTypes::register(reg)?,
        })
    }

    pub fn types(&self) -> &IrTypes {
        &self.types
    }

    pub fn kind_of_type(&self, t: TypeRef) -> Option<IrKind> {
        let ty = &self.types;
        let kind = match t {
            t if t == ty.goto_node => IrKind::Goto,
            t if t == ty.line_number_node => IrKind::Line,
            t if t == ty.quote_node => IrKind::Quote,
            t if t == ty.slot_number => IrKind::Slot,
            t if t == ty.typed_slot => IrKind::TypedSlot,
            t if t == ty.global_ref => IrKind::Global,
            t if t == ty.phi_node => IrKind::Phi,
            t if t == ty.phic_node => IrKind::PhiC,
            t if t == ty.upsilon_node => IrKind::Upsilon,
            t if t == ty.pi_node => IrKind::Pi,
            t if t == ty.newvar_node => IrKind::NewVar,
            t if t == ty.ssa_value => IrKind::Ssa,
            t if t == ty.expr => IrKind::Expr,
            _ => return None,
        };
        Some(kind)
    }

    /// `None` for values that are not IR nodes.
    pub fn kind_of<B: WriteBarrier>(&self, heap: &Heap<B>, v: Value) -> Result<Option<IrKind>, CoreError> {
        Ok(self.kind_of_type(heap.type_of(v)?))
    }

    pub fn encode<B: WriteBarrier>(&self, heap: &mut Heap<B>, node: &IrNode) -> Result<Value, CoreError> {
        node.encode(self, heap)
    }

    pub fn decode<B: WriteBarrier>(&self, heap: &Heap<B>, v: Value) -> Result<IrNode, CoreError> {
        let Some(kind) = self.kind_of(heap, v)? else {
            return Ok(IrNode::Literal(v));
        };
        let node = match kind {
            IrKind::Goto => IrNode::Goto {
                label: heap.get_field_bits(v, 0)?,
            },
            IrKind::Line => IrNode::Line {
                line: heap.get_field_bits(v, 0)?,
                file: heap.get_field_bits(v, 1)?,
            },
            IrKind::Quote => IrNode::Quote(ref_field(heap, v, 0)?),
            IrKind::Slot => IrNode::Slot(SlotRef {
                index: heap.get_field_bits(v, 0)?,
                declared: None,
            }),
            IrKind::TypedSlot => IrNode::Slot(SlotRef {
                index: heap.get_field_bits(v, 0)?,
                declared: Some(heap.get_field_bits(v, 1)?),
            }),
            IrKind::Global => IrNode::Global(GlobalRef {
                module: ref_field(heap, v, 0)?,
                name: heap.get_field_bits(v, 1)?,
            }),
            IrKind::Phi => {
                let (edges, values) = self.phi_edges_and_values(heap, v)?;
                IrNode::Phi { edges, values }
            }
            IrKind::PhiC => IrNode::PhiC {
                values: self.phic_values(heap, v)?,
            },
            IrKind::Upsilon => IrNode::Upsilon {
                value: optional_ref_field(heap, v, 0)?,
            },
            IrKind::Pi => IrNode::Pi {
                value: ref_field(heap, v, 0)?,
                typ: heap.get_field_bits(v, 1)?,
            },
            IrKind::NewVar => IrNode::NewVar {
                slot: ref_field(heap, v, 0)?,
            },
            IrKind::Ssa => IrNode::Ssa {
                id: heap.get_field_bits(v, 0)?,
            },
            IrKind::Expr => {
                let nargs = self.expr_nargs(heap, v)?;
                IrNode::Expr {
                    head: self.expr_head(heap, v)?,
                    args: (0..nargs)
                        .map(|i| self.get_argument(heap, v, i))
                        .collect::<Result<_, _>>()?,
                }
            }
        };
        Ok(node)
    }

    pub(crate) fn phi_edges_and_values<B: WriteBarrier>(
        &self,
        heap: &Heap<B>,
        phi: Value,
    ) -> Result<(Vec<i32>, Vec<Option<Value>>), CoreError> {
        let edges_arr = ref_field(heap, phi, 0)?;
        let edges = (0..heap.array_len(edges_arr)?)
            .map(|i| heap.array_get_bits::<i32>(edges_arr, i))
            .collect::<Result<Vec<_>, _>>()?;
        let values = optional_refs(heap, ref_field(heap, phi, 1)?)?;
        Ok((edges, values))
    }

    // --- constructors ---

    pub fn goto<B: WriteBarrier>(&self, heap: &mut Heap<B>, label: i64) -> Result<Value, CoreError> {
        let l = heap.box_value(label)?;
        heap.new_struct(self.types.goto_node, &[l])
    }

    pub fn line<B: WriteBarrier>(&self, heap: &mut Heap<B>, line: i64, file: Symbol) -> Result<Value, CoreError> {
        let l = heap.box_value(line)?;
        let f = heap.box_value(file)?;
        heap.new_struct(self.types.line_number_node, &[l, f])
    }

    pub fn quote<B: WriteBarrier>(&self, heap: &mut Heap<B>, v: Value) -> Result<Value, CoreError> {
        heap.new_struct(self.types.quote_node, &[v])
    }

    pub fn slot<B: WriteBarrier>(&self, heap: &mut Heap<B>, id: i64) -> Result<Value, CoreError> {
        let i = heap.box_value(id)?;
        heap.new_struct(self.types.slot_number, &[i])
    }

    pub fn typed_slot<B: WriteBarrier>(
        &self,
        heap: &mut Heap<B>,
        id: i64,
        typ: TypeRef,
    ) -> Result<Value, CoreError> {
        let i = heap.box_value(id)?;
        let t = heap.box_type(typ)?;
        heap.new_struct(self.types.typed_slot, &[i, t])
    }

    pub fn global<B: WriteBarrier>(&self, heap: &mut Heap<B>, module: Value, name: Symbol) -> Result<Value, CoreError> {
        let n = heap.box_value(name)?;
        heap.new_struct(self.types.global_ref, &[module, n])
    }

    pub fn phi<B: WriteBarrier>(
        &self,
        heap: &mut Heap<B>,
        edges: &[i32],
        values: &[Option<Value>],
    ) -> Result<Value, CoreError> {
        if edges.len() != values.len() {
            return Err(CoreError::invalid_argument(format!(
                "phi node with {} edges and {} values",
                edges.len(),
                values.len()
            )));
        }
        let e = heap.new_vector(corvid_core::builtins::INT32, edges.len())?;
        for (i, &edge) in edges.iter().enumerate() {
            heap.array_set_bits(e, i, edge)?;
        }
        let vals = optional_vector(heap, values)?;
        heap.new_struct(self.types.phi_node, &[e, vals])
    }

    pub fn phic<B: WriteBarrier>(&self, heap: &mut Heap<B>, values: &[Option<Value>]) -> Result<Value, CoreError> {
        let vals = optional_vector(heap, values)?;
        heap.new_struct(self.types.phic_node, &[vals])
    }

    /// `None` builds an upsilon whose value is `#undef`.
    pub fn upsilon<B: WriteBarrier>(&self, heap: &mut Heap<B>, value: Option<Value>) -> Result<Value, CoreError> {
        match value {
            Some(v) => heap.new_struct(self.types.upsilon_node, &[v]),
            None => heap.new_struct_uninit(self.types.upsilon_node),
        }
    }

    pub fn pi<B: WriteBarrier>(&self, heap: &mut Heap<B>, value: Value, typ: TypeRef) -> Result<Value, CoreError> {
        let t = heap.box_type(typ)?;
        heap.new_struct(self.types.pi_node, &[value, t])
    }

    pub fn newvar<B: WriteBarrier>(&self, heap: &mut Heap<B>, slot: Value) -> Result<Value, CoreError> {
        heap.new_struct(self.types.newvar_node, &[slot])
    }

    pub fn ssa<B: WriteBarrier>(&self, heap: &mut Heap<B>, id: i64) -> Result<Value, CoreError> {
        let i = heap.box_value(id)?;
        heap.new_struct(self.types.ssa_value, &[i])
    }

    pub fn expr<B: WriteBarrier>(&self, heap: &mut Heap<B>, head: Symbol, args: &[Value]) -> Result<Value, CoreError> {
        let arr = heap.new_vector(corvid_core::builtins::ANY, args.len())?;
        for (i, &a) in args.iter().enumerate() {
            heap.array_set(arr, i, a)?;
        }
        let h = heap.box_value(head)?;
        heap.new_struct(self.types.expr, &[h, arr])
    }
}

pub(crate) fn ref_field<B: WriteBarrier>(heap: &Heap<B>, v: Value, i: usize) -> Result<Value, CoreError> {
    heap.get_field(v, i)?
        .as_value()
        .ok_or_else(|| CoreError::type_mismatch("reference field", "inline bits"))
}

fn optional_ref_field<B: WriteBarrier>(heap: &Heap<B>, v: Value, i: usize) -> Result<Option<Value>, CoreError> {
    if !heap.is_field_defined(v, i)? {
        return Ok(None);
    }
    ref_field(heap, v, i).map(Some)
}

/// Reads a pointer array, keeping `#undef` slots as `None`.
pub(crate) fn optional_refs<B: WriteBarrier>(heap: &Heap<B>, arr: Value) -> Result<Vec<Option<Value>>, CoreError> {
    (0..heap.array_len(arr)?)
        .map(|i| match heap.array_get(arr, i) {
            Ok(d) => Ok(d.as_value()),
            Err(CoreError::UndefRef(_)) => Ok(None),
            Err(e) => Err(e),
        })
        .collect()
}

fn optional_vector<B: WriteBarrier>(heap: &mut Heap<B>, values: &[Option<Value>]) -> Result<Value, CoreError> {
    let arr = heap.new_vector(corvid_core::builtins::ANY, values.len())?;
    for (i, v) in values.iter().enumerate() {
        if let Some(v) = v {
            heap.array_set(arr, i, *v)?;
        }
    }
    Ok(arr)
}
