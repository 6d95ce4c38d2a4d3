use corvid_core::builtins::{ANY, DATATYPE, INT32, INT64, MODULE, SYMBOL};
use corvid_core::{CoreError, TypeDef, TypeRef, TypeRegistry};

const CORE: &str = "Core";

/// Descriptors of every IR node kind, registered once per registry.
///
/// Field order and count are part of each kind's identity: every producer and
/// consumer indexes fields positionally through these layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrTypes {
    pub goto_node: TypeRef,
    pub line_number_node: TypeRef,
    pub quote_node: TypeRef,
    pub slot_number: TypeRef,
    pub typed_slot: TypeRef,
    pub global_ref: TypeRef,
    pub phi_node: TypeRef,
    pub phic_node: TypeRef,
    pub upsilon_node: TypeRef,
    pub pi_node: TypeRef,
    pub newvar_node: TypeRef,
    pub ssa_value: TypeRef,
    pub expr: TypeRef,
    /// `Array{Any, 1}`
    pub any_vector: TypeRef,
    /// `Array{Int32, 1}`
    pub int32_vector: TypeRef,
}

fn node(name: &str) -> TypeDef {
    TypeDef::structure(name).module(CORE)
}

impl IrTypes {
    /// Declares the node kinds. Safe to call repeatedly: identical
    /// declarations resolve to the already registered descriptors.
    pub fn register(reg: &TypeRegistry) -> Result<Self, CoreError> {
        let any_vector = reg.array_type(ANY, 1)?;
        let int32_vector = reg.array_type(INT32, 1)?;

        let types = IrTypes {
            goto_node: reg.define(node("GotoNode").field("label", INT64))?,
            line_number_node: reg.define(
                node("LineNumberNode")
                    .field("line", INT64)
                    .field("file", SYMBOL),
            )?,
            quote_node: reg.define(node("QuoteNode").field("value", ANY))?,
            slot_number: reg.define(node("SlotNumber").field("id", INT64))?,
            typed_slot: reg.define(
                node("TypedSlot")
                    .field("id", INT64)
                    .field("typ", DATATYPE),
            )?,
            global_ref: reg.define(
                node("GlobalRef")
                    .field("mod", MODULE)
                    .field("name", SYMBOL),
            )?,
            phi_node: reg.define(
                node("PhiNode")
                    .field("edges", int32_vector)
                    .field("values", any_vector),
            )?,
            phic_node: reg.define(node("PhiCNode").field("values", any_vector))?,
            upsilon_node: reg.define(node("UpsilonNode").field("val", ANY))?,
            pi_node: reg.define(node("PiNode").field("val", ANY).field("typ", DATATYPE))?,
            newvar_node: reg.define(node("NewvarNode").field("slot", ANY))?,
            ssa_value: reg.define(node("SSAValue").field("id", INT64))?,
            expr: reg.define(
                TypeDef::mutable_structure("Expr")
                    .module(CORE)
                    .field("head", SYMBOL)
                    .field("args", any_vector),
            )?,
            any_vector,
            int32_vector,
        };
        tracing::debug!("registered IR node kinds");
        Ok(types)
    }
}
