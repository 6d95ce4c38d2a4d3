//! Generational write barrier.
//!
//! A reference store that makes an old object point at a young one has to be
//! reported to the collector, or the next minor collection would miss the
//! young object. The parent is flagged `REMEMBERED` so each one is queued at
//! most once per cycle; the collector clears the flag when it drains the set.

use crate::error::CoreError;
use crate::header::GcBits;
use crate::heap::{Heap, Value};

/// Collector hook receiving parents that gained a reference to a young object.
pub trait WriteBarrier {
    fn queue_root(&mut self, parent: Value);
}

/// Records queued parents until the collector drains them.
#[derive(Debug, Default, Clone)]
pub struct RememberedSet {
    roots: Vec<Value>,
}

impl RememberedSet {
    pub fn roots(&self) -> &[Value] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn drain(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.roots)
    }
}

impl WriteBarrier for RememberedSet {
    fn queue_root(&mut self, parent: Value) {
        self.roots.push(parent);
    }
}

/// For heaps without a generational collector.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBarrier;

impl WriteBarrier for NoBarrier {
    fn queue_root(&mut self, _parent: Value) {}
}

impl<B: WriteBarrier> Heap<B> {
    /// Run after storing `child` into a reference slot of `parent`.
    pub fn write_barrier(&mut self, parent: Value, child: Value) -> Result<(), CoreError> {
        let pbits = self.gc_bits(parent)?;
        if !pbits.contains(GcBits::OLD) || pbits.contains(GcBits::REMEMBERED) {
            return Ok(());
        }
        if self.gc_bits(child)?.contains(GcBits::OLD) {
            return Ok(());
        }
        self.set_gc_bits(parent, pbits | GcBits::REMEMBERED)?;
        self.barrier.queue_root(parent);
        self.stats.barrier_hits += 1;
        tracing::trace!("write barrier queued {parent} (child {child})");
        Ok(())
    }
}

impl Heap<RememberedSet> {
    /// Clears `REMEMBERED` on every queued parent and hands them over.
    pub fn take_remembered(&mut self) -> Result<Vec<Value>, CoreError> {
        let roots = self.barrier.drain();
        for &v in &roots {
            let bits = self.gc_bits(v)?;
            self.set_gc_bits(v, bits - GcBits::REMEMBERED)?;
        }
        Ok(roots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::*;
    use crate::config::HeapConfig;
    use crate::heap::Allocator;
    use crate::registry::TypeRegistry;
    use std::sync::Arc;

    fn heap() -> Heap {
        Heap::with_config(Arc::new(TypeRegistry::new()), HeapConfig::default())
    }

    #[test]
    fn old_to_young_store_is_queued_once() {
        let mut heap = heap();
        let parent = heap.allocate(SIMPLE_VECTOR, 2).unwrap();
        let child = heap.allocate(INT64, 0).unwrap();
        heap.set_gc_bits(parent, GcBits::OLD).unwrap();

        heap.write_barrier(parent, child).unwrap();
        heap.write_barrier(parent, child).unwrap();
        assert_eq!(heap.barrier().roots(), &[parent]);
        assert!(heap.gc_bits(parent).unwrap().contains(GcBits::REMEMBERED));
        assert_eq!(heap.stats().barrier_hits, 1);
    }

    #[test]
    fn young_parent_or_old_child_is_ignored() {
        let mut heap = heap();
        let parent = heap.allocate(SIMPLE_VECTOR, 1).unwrap();
        let child = heap.allocate(INT64, 0).unwrap();
        heap.write_barrier(parent, child).unwrap();
        assert!(heap.barrier().is_empty());

        heap.set_gc_bits(parent, GcBits::OLD).unwrap();
        heap.set_gc_bits(child, GcBits::OLD).unwrap();
        heap.write_barrier(parent, child).unwrap();
        assert!(heap.barrier().is_empty());
    }

    #[test]
    fn take_remembered_resets_flags() {
        let mut heap = heap();
        let parent = heap.allocate(SIMPLE_VECTOR, 1).unwrap();
        let child = heap.allocate(INT64, 0).unwrap();
        heap.set_gc_bits(parent, GcBits::OLD).unwrap();
        heap.write_barrier(parent, child).unwrap();

        assert_eq!(heap.take_remembered().unwrap(), vec![parent]);
        assert_eq!(heap.gc_bits(parent).unwrap(), GcBits::OLD);
        heap.write_barrier(parent, child).unwrap();
        assert_eq!(heap.barrier().len(), 1);
    }

    #[test]
    fn no_barrier_discards() {
        let mut heap = Heap::with_barrier(
            Arc::new(TypeRegistry::new()),
            HeapConfig::default(),
            NoBarrier,
        );
        let parent = heap.allocate(SIMPLE_VECTOR, 1).unwrap();
        let child = heap.allocate(INT64, 0).unwrap();
        heap.set_gc_bits(parent, GcBits::OLD).unwrap();
        heap.write_barrier(parent, child).unwrap();
        assert_eq!(heap.stats().barrier_hits, 1);
    }
}
