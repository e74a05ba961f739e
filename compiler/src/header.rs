// header.rs — C prototype and human-readable listing of a declaration
//
// `emit_header` writes the header an ahead-of-time build would ship next to
// the compiled entry point: buffers become `struct pbind_buffer_t *`,
// scalars their C type, in signature order. `describe` lists the arguments
// with their ranges and installed bound constraints.
//
// Preconditions: `decl` came from `signature::materialize`.
// Postconditions: output is deterministic for a given declaration.
// Failure modes: none.
// Side effects: none.

use std::fmt::Write;

use crate::argument::ArgumentKind;
use crate::parameter::BoundField;
use crate::signature::{Declared, PipelineDecl};

/// C identifier for an include guard: upper-case, non-alphanumerics to `_`.
fn guard_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

pub fn emit_header(decl: &PipelineDecl) -> String {
    let sig = &decl.signature;
    let guard = format!("PBIND_{}_H", guard_name(&sig.name));
    let mut out = String::new();

    let _ = writeln!(out, "// Generated by pbind. Do not edit.");
    let _ = writeln!(out, "// signature: {sig}");
    let _ = writeln!(out, "// fingerprint: {}", sig.fingerprint_hex());
    let _ = writeln!(out, "#ifndef {guard}");
    let _ = writeln!(out, "#define {guard}");
    out.push('\n');
    out.push_str("#include <stdbool.h>\n#include <stdint.h>\n\n");
    out.push_str("#ifdef __cplusplus\nextern \"C\" {\n#endif\n\n");
    out.push_str("struct pbind_buffer_t;\n\n");

    let params: Vec<String> = sig
        .arguments
        .iter()
        .map(|a| match a.kind {
            ArgumentKind::Buffer => format!("struct pbind_buffer_t *{}", a.name),
            ArgumentKind::Scalar => {
                let ty = a.ty.c_type();
                if ty.ends_with('*') {
                    format!("{}{}", ty, a.name)
                } else {
                    format!("{} {}", ty, a.name)
                }
            }
        })
        .collect();
    if params.is_empty() {
        let _ = writeln!(out, "int {}(void);", sig.name);
    } else {
        let _ = writeln!(out, "int {}({});", sig.name, params.join(", "));
    }

    out.push_str("\n#ifdef __cplusplus\n}  // extern \"C\"\n#endif\n\n");
    let _ = writeln!(out, "#endif  // {guard}");
    out
}

pub fn describe(decl: &PipelineDecl) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "pipeline {}", decl.name);
    for (arg, declared) in decl.signature.arguments.iter().zip(&decl.arguments) {
        let _ = write!(out, "  {:<6} {}", declared.handle.kind(), arg);
        match &declared.handle {
            Declared::Scalar(p) => {
                let bound = |e: Option<crate::expr::Expr>| e.map_or("-".to_string(), |e| e.to_string());
                if p.min_value().is_some() || p.max_value().is_some() {
                    let _ = write!(out, " in [{}, {}]", bound(p.min_value()), bound(p.max_value()));
                }
                out.push('\n');
            }
            Declared::Input(_) | Declared::Output(_) => {
                out.push('\n');
                let Some(param) = declared.handle.image().and_then(|i| i.parameter()) else {
                    continue;
                };
                for (d, c) in param.constraints().iter().enumerate() {
                    for (field, value) in [
                        (BoundField::Min, &c.min),
                        (BoundField::Extent, &c.extent),
                        (BoundField::Stride, &c.stride),
                    ] {
                        if let Some(value) = value {
                            let _ = writeln!(out, "    {}.{}.{} = {}", arg.name, field, d, value);
                        }
                    }
                }
            }
        }
    }
    for w in &decl.warnings {
        let _ = writeln!(out, "{w}");
    }
    let _ = writeln!(out, "fingerprint {}", decl.signature.fingerprint_hex());
    out
}
