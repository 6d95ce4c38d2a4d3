use crate::barrier::WriteBarrier;
use crate::builtins::MODULE;
use crate::error::CoreError;
use crate::heap::{Heap, Value};
use crate::symbol::Symbol;

const NAME: usize = 0;
const PARENT: usize = 1;

impl<B: WriteBarrier> Heap<B> {
    /// A module object. A root module (no parent) is its own parent.
    pub fn new_module(&mut self, name: Symbol, parent: Option<Value>) -> Result<Value, CoreError> {
        if let Some(p) = parent {
            self.expect_type(p, MODULE)?;
        }
        let m = self.new_struct_uninit(MODULE)?;
        self.set_field_bits(m, NAME, name)?;
        self.set_field(m, PARENT, parent.unwrap_or(m))?;
        Ok(m)
    }

    /// Rejects a parent store that would make `m` its own ancestor. Storing
    /// `m` itself turns it into a root.
    pub(crate) fn check_module_parent(&self, m: Value, field: usize, parent: Value) -> Result<(), CoreError> {
        if field != PARENT || parent == m || self.type_of(parent)? != MODULE {
            return Ok(());
        }
        let mut cur = parent;
        loop {
            if cur == m {
                return Err(CoreError::invalid_argument(format!(
                    "module {} cannot be nested inside its own descendant {}",
                    self.module_name(m)?,
                    self.module_name(parent)?
                )));
            }
            let next = self.module_parent(cur)?;
            if next == cur {
                return Ok(());
            }
            cur = next;
        }
    }

    pub fn module_name(&self, m: Value) -> Result<Symbol, CoreError> {
        self.expect_type(m, MODULE)?;
        self.get_field_bits(m, NAME)
    }

    pub fn module_parent(&self, m: Value) -> Result<Value, CoreError> {
        self.expect_type(m, MODULE)?;
        self.get_field(m, PARENT)?
            .as_value()
            .ok_or_else(|| CoreError::undef("module parent"))
    }

    /// Dotted path from the root, e.g. `Main.Base.Math`.
    pub fn module_path(&self, m: Value) -> Result<String, CoreError> {
        let mut names = vec![self.module_name(m)?];
        let mut cur = m;
        loop {
            let parent = self.module_parent(cur)?;
            if parent == cur {
                break;
            }
            names.push(self.module_name(parent)?);
            cur = parent;
        }
        names.reverse();
        Ok(names
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeapConfig;
    use crate::registry::TypeRegistry;
    use crate::symbol::intern;
    use std::sync::Arc;

    fn heap() -> Heap {
        Heap::with_config(Arc::new(TypeRegistry::new()), HeapConfig::default())
    }

    #[test]
    fn root_is_its_own_parent() {
        let mut heap = heap();
        let main = heap.new_module(intern("Main"), None).unwrap();
        assert_eq!(heap.module_name(main).unwrap(), intern("Main"));
        assert_eq!(heap.module_parent(main).unwrap(), main);
    }

    #[test]
    fn nested_paths() {
        let mut heap = heap();
        let main = heap.new_module(intern("Main"), None).unwrap();
        let base = heap.new_module(intern("Base"), Some(main)).unwrap();
        let math = heap.new_module(intern("Math"), Some(base)).unwrap();
        assert_eq!(heap.module_parent(math).unwrap(), base);
        assert_eq!(heap.module_path(math).unwrap(), "Main.Base.Math");
    }

    #[test]
    fn reparenting_under_a_descendant_is_rejected() {
        let mut heap = heap();
        let a = heap.new_module(intern("A"), None).unwrap();
        let b = heap.new_module(intern("B"), Some(a)).unwrap();
        let c = heap.new_module(intern("C"), Some(b)).unwrap();

        assert!(matches!(
            heap.set_field(a, PARENT, b),
            Err(CoreError::InvalidArgument(_))
        ));
        assert!(heap.set_field(a, PARENT, c).is_err());
        assert_eq!(heap.module_parent(a).unwrap(), a);
        assert_eq!(heap.module_path(c).unwrap(), "A.B.C");

        // moving a subtree elsewhere and making a module a root still work
        let d = heap.new_module(intern("D"), None).unwrap();
        heap.set_field(b, PARENT, d).unwrap();
        assert_eq!(heap.module_path(c).unwrap(), "D.B.C");
        heap.set_field(b, PARENT, b).unwrap();
        assert_eq!(heap.module_path(c).unwrap(), "B.C");
    }

    #[test]
    fn parent_must_be_a_module() {
        let mut heap = heap();
        let s = heap.new_string("Main").unwrap();
        assert!(matches!(
            heap.new_module(intern("X"), Some(s)),
            Err(CoreError::TypeMismatch { .. })
        ));
    }
}
