//! Text rendering behind the `corvid` inspection commands.

use std::fmt::Write;

use corvid_core::{builtins, CoreError, TypeKind, TypeRef, TypeRegistry};

fn flags(reg: &TypeRegistry, t: TypeRef) -> Result<String, CoreError> {
    let dt = reg.get(t)?;
    let mut out = Vec::new();
    if dt.is_abstract() {
        out.push("abstract");
    }
    if dt.is_mutable() {
        out.push("mutable");
    }
    if dt.kind().is_variable_size() {
        out.push("varsize");
    }
    if dt.kind() != TypeKind::Abstract && reg.is_inline_allocatable(t)? {
        out.push("inline");
    }
    Ok(out.join(","))
}

/// One row per builtin: name, size, alignment and flags. Abstract types have
/// no layout and show `-`.
pub fn describe_types(reg: &TypeRegistry) -> Result<String, CoreError> {
    let mut out = String::new();
    let _ = writeln!(out, "{:<14} {:>5} {:>5}  flags", "type", "size", "align");
    for t in builtins::all() {
        let name = reg.type_string(t)?;
        let (size, align) = match reg.layout(t) {
            Ok(l) => (l.size.to_string(), l.alignment.to_string()),
            Err(CoreError::InvalidArgument(_)) => ("-".into(), "-".into()),
            Err(e) => return Err(e),
        };
        let _ = writeln!(out, "{name:<14} {size:>5} {align:>5}  {}", flags(reg, t)?);
    }
    Ok(out)
}

/// Field table for the non-parametric type called `name`.
pub fn describe_layout(reg: &TypeRegistry, name: &str) -> Result<String, CoreError> {
    let t = reg
        .lookup(name)
        .ok_or_else(|| CoreError::undef(format!("type {name}")))?;
    let layout = reg.layout(t)?;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}: size {}, align {}{}{}",
        reg.type_string(t)?,
        layout.size,
        layout.alignment,
        if layout.is_bits { ", bits" } else { "" },
        if layout.has_padding { ", padded" } else { "" },
    );
    let _ = writeln!(out, "  family hash {:#018x}", reg.get(t)?.type_name().hash);
    for (i, f) in layout.fields.iter().enumerate() {
        let _ = writeln!(
            out,
            "  {i:>2} {:<10} {:<18} @{:<4} {:>3} {}",
            f.name.as_str(),
            reg.type_string(f.ty)?,
            f.offset,
            f.size,
            if f.inline { "inline" } else { "ref" }
        );
    }
    if !layout.pointer_offsets.is_empty() {
        let offsets: Vec<String> = layout.pointer_offsets.iter().map(|o| o.to_string()).collect();
        let _ = writeln!(out, "  pointers at {}", offsets.join(", "));
    }
    Ok(out)
}
