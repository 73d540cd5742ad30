// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Emits GLSL interface declarations from the kernel schema.

use std::fmt::Write;

use crate::layout::{Access, KernelLayout, Scalar};

fn scalar(ty: Scalar) -> &'static str {
    match ty {
        Scalar::U32 => "uint",
        Scalar::I32 => "int",
        Scalar::F32 => "float",
    }
}

/// Returns the buffer and push constant declarations of `kernel`.
///
/// Buffer blocks are named `<binding>_block`. Uniform bindings use the
/// std140 layout, storage bindings std430.
pub fn glsl(kernel: &KernelLayout) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "// {}", kernel.name);
    for (set, binding, info) in kernel.bindings() {
        let (layout, qualifier) = match info.access {
            Access::Uniform => ("std140", "uniform"),
            Access::ReadOnly => ("std430", "readonly buffer"),
            Access::ReadWrite => ("std430", "buffer"),
        };
        let _ = writeln!(
            out,
            "layout(set = {set}, binding = {binding}, {layout}) {qualifier} {}_block {{\n  {}\n}};",
            info.name, info.body
        );
    }
    if !kernel.push.is_empty() {
        out.push_str("layout(push_constant) uniform spn_push {\n");
        for field in kernel.push {
            if field.count == 1 {
                let _ = writeln!(out, "  {} {};", scalar(field.ty), field.name);
            } else {
                let _ = writeln!(
                    out,
                    "  {} {}[{}];",
                    scalar(field.ty),
                    field.name,
                    field.count
                );
            }
        }
        out.push_str("};\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::glsl;
    use crate::layout::KernelId;

    #[test]
    fn render_interface() {
        let source = glsl(KernelId::Render.layout());
        assert!(source.starts_with("// render\n"));
        assert!(source.contains(
            "layout(set = 0, binding = 0, std140) uniform bp_config_block {"
        ));
        assert!(source.contains("layout(set = 3, binding = 0, std430) readonly buffer styling_block"));
        assert!(source.contains("layout(set = 4, binding = 0, std430) buffer surface_block"));
        assert!(source.contains("  uint clip[4];\n"));
    }

    #[test]
    fn no_push_block_without_fields() {
        let source = glsl(KernelId::SortKeys.layout());
        assert!(!source.contains("push_constant"));
        assert_eq!(source.matches("layout(").count(), 1);
    }
}
