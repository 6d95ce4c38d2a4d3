use corvid_core::{CoreError, Heap, IndexKind, Symbol, Value, WriteBarrier};

use crate::node::{optional_refs, ref_field, Ir, IrKind};

const HEAD: usize = 0;
const ARGS: usize = 1;

impl Ir {
    fn expect_kind<B: WriteBarrier>(&self, heap: &Heap<B>, v: Value, kind: IrKind) -> Result<(), CoreError> {
        match self.kind_of(heap, v)? {
            Some(k) if k == kind => Ok(()),
            _ => Err(CoreError::type_mismatch(
                format!("{kind:?} node"),
                heap.registry().type_string(heap.type_of(v)?)?,
            )),
        }
    }

    fn expr_args<B: WriteBarrier>(&self, heap: &Heap<B>, e: Value) -> Result<Value, CoreError> {
        self.expect_kind(heap, e, IrKind::Expr)?;
        heap.get_field(e, ARGS)?
            .as_value()
            .ok_or_else(|| CoreError::undef("expression arguments"))
    }

    pub fn expr_head<B: WriteBarrier>(&self, heap: &Heap<B>, e: Value) -> Result<Symbol, CoreError> {
        self.expect_kind(heap, e, IrKind::Expr)?;
        heap.get_field_bits(e, HEAD)
    }

    pub fn set_expr_head<B: WriteBarrier>(&self, heap: &mut Heap<B>, e: Value, head: Symbol) -> Result<(), CoreError> {
        self.expect_kind(heap, e, IrKind::Expr)?;
        heap.set_field_bits(e, HEAD, head)
    }

    pub fn expr_nargs<B: WriteBarrier>(&self, heap: &Heap<B>, e: Value) -> Result<usize, CoreError> {
        heap.array_len(self.expr_args(heap, e)?)
    }

    pub fn get_argument<B: WriteBarrier>(&self, heap: &Heap<B>, e: Value, i: usize) -> Result<Value, CoreError> {
        let args = self.expr_args(heap, e)?;
        let n = heap.array_len(args)?;
        if i >= n {
            return Err(CoreError::out_of_range(IndexKind::Argument, i, n));
        }
        heap.array_get(args, i)?
            .as_value()
            .ok_or_else(|| CoreError::undef(format!("argument {i}")))
    }

    pub fn set_argument<B: WriteBarrier>(
        &self,
        heap: &mut Heap<B>,
        e: Value,
        i: usize,
        x: Value,
    ) -> Result<(), CoreError> {
        let args = self.expr_args(heap, e)?;
        let n = heap.array_len(args)?;
        if i >= n {
            return Err(CoreError::out_of_range(IndexKind::Argument, i, n));
        }
        heap.array_set(args, i, x)
    }

    pub fn push_argument<B: WriteBarrier>(&self, heap: &mut Heap<B>, e: Value, x: Value) -> Result<(), CoreError> {
        let args = self.expr_args(heap, e)?;
        heap.array_push(args, x)
    }

    /// `(edge, value)` pairs of a Phi node, in edge order. `None` marks an
    /// undefined incoming value.
    pub fn phi_operands<B: WriteBarrier>(
        &self,
        heap: &Heap<B>,
        phi: Value,
    ) -> Result<Vec<(i32, Option<Value>)>, CoreError> {
        self.expect_kind(heap, phi, IrKind::Phi)?;
        let (edges, values) = self.phi_edges_and_values(heap, phi)?;
        Ok(edges.into_iter().zip(values).collect())
    }

    /// Incoming values of a PhiC node.
    pub fn phic_values<B: WriteBarrier>(&self, heap: &Heap<B>, phic: Value) -> Result<Vec<Option<Value>>, CoreError> {
        self.expect_kind(heap, phic, IrKind::PhiC)?;
        optional_refs(heap, ref_field(heap, phic, 0)?)
    }
}
