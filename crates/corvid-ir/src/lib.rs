//! Compiler IR nodes stored as ordinary heap objects.
//!
//! Each node kind is a struct type registered in module `Core`. [`Ir`] builds
//! nodes, decodes them into [`IrNode`], and walks expression trees.

pub mod expr;
pub mod node;
pub mod types;
pub mod walk;

pub use node::{GlobalRef, Ir, IrKind, IrNode, SlotRef};
pub use types::IrTypes;
