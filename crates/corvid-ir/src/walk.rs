use corvid_core::{CoreError, Heap, Value, WriteBarrier};
use hashbrown::HashSet;

use crate::node::{Ir, IrKind};

impl Ir {
    /// Visits `root` and then, for Expr nodes, each argument left to right,
    /// depth first. Quoted values are visited as opaque leaves and never
    /// entered. Each value is visited once, so shared subtrees and cycles
    /// through mutable Expr arguments are not repeated. Returns the number of
    /// values visited.
    pub fn walk<B, F>(&self, heap: &Heap<B>, root: Value, mut f: F) -> Result<usize, CoreError>
    where
        B: WriteBarrier,
        F: FnMut(Value),
    {
        let mut stack = vec![root];
        let mut seen = HashSet::new();
        while let Some(v) = stack.pop() {
            if !seen.insert(v) {
                continue;
            }
            f(v);
            if self.kind_of(heap, v)? != Some(IrKind::Expr) {
                continue;
            }
            let n = self.expr_nargs(heap, v)?;
            for i in (0..n).rev() {
                stack.push(self.get_argument(heap, v, i)?);
            }
        }
        Ok(seen.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_core::{intern, HeapConfig, TypeRegistry};
    use std::sync::Arc;

    #[test]
    fn preorder_and_quote_is_opaque() {
        let reg = Arc::new(TypeRegistry::new());
        let ir = Ir::new(&reg).unwrap();
        let mut heap: Heap = Heap::with_config(reg, HeapConfig::default());

        let hidden = ir.ssa(&mut heap, 99).unwrap();
        let inner_quoted = ir.expr(&mut heap, intern("call"), &[hidden]).unwrap();
        let q = ir.quote(&mut heap, inner_quoted).unwrap();
        let a = ir.ssa(&mut heap, 1).unwrap();
        let b = ir.ssa(&mut heap, 2).unwrap();
        let inner = ir.expr(&mut heap, intern("call"), &[b]).unwrap();
        let root = ir.expr(&mut heap, intern("block"), &[a, inner, q]).unwrap();

        let mut seen = Vec::new();
        let n = ir.walk(&heap, root, |v| seen.push(v)).unwrap();
        assert_eq!(n, 5);
        assert_eq!(seen, vec![root, a, inner, b, q]);
    }

    #[test]
    fn self_referential_expr_terminates() {
        let reg = Arc::new(TypeRegistry::new());
        let ir = Ir::new(&reg).unwrap();
        let mut heap: Heap = Heap::with_config(reg, HeapConfig::default());

        let x = ir.ssa(&mut heap, 1).unwrap();
        let e = ir.expr(&mut heap, intern("call"), &[x, x]).unwrap();
        ir.set_argument(&mut heap, e, 0, e).unwrap();

        let mut seen = Vec::new();
        let n = ir.walk(&heap, e, |v| seen.push(v)).unwrap();
        assert_eq!(n, 2);
        assert_eq!(seen, vec![e, x]);
    }
}
