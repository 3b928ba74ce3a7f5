//! WGSL sources for the elementwise kernels.

use anyhow::{bail, Result};
use graphrt_kernels::{BinaryOp, DataType, KernelKind, UnaryOp};

pub const WORKGROUP_SIZE: u32 = 64;

/// Upper bound on workgroups per dispatch dimension.
pub const MAX_WORKGROUPS_PER_DIM: u32 = 65_535;

fn wgsl_type(dtype: DataType) -> Result<&'static str> {
    Ok(match dtype {
        DataType::F32 => "f32",
        DataType::I32 => "i32",
        DataType::U32 => "u32",
        other => bail!("no WGSL kernels for {other}"),
    })
}

fn binary_expr(op: BinaryOp) -> &'static str {
    // WGSL integer division by zero yields the dividend, like the host kernels.
    match op {
        BinaryOp::Add => "a + b",
        BinaryOp::Sub => "a - b",
        BinaryOp::Mul => "a * b",
        BinaryOp::Div => "a / b",
    }
}

fn unary_expr(op: UnaryOp, dtype: DataType) -> &'static str {
    match (op, dtype) {
        (UnaryOp::Relu, DataType::F32) => "max(a, 0.0)",
        (UnaryOp::Relu, DataType::I32) => "max(a, 0)",
        (UnaryOp::Relu | UnaryOp::Abs, DataType::U32) => "a",
        (UnaryOp::Neg, DataType::U32) => "0u - a",
        (UnaryOp::Neg, _) => "-a",
        (UnaryOp::Abs, _) => "abs(a)",
        (UnaryOp::Relu, _) => "a",
    }
}

/// Generates the compute shader for `kind` over `dtype`.
///
/// Bindings are the tensor inputs in order, then the output, then the
/// uniform parameters.
pub fn elementwise_shader_source(kind: KernelKind, dtype: DataType) -> Result<String> {
    let ty = wgsl_type(dtype)?;
    let (operands, expr) = match kind {
        KernelKind::Binary(op) => ("  let b = rhs[index];\n", binary_expr(op)),
        KernelKind::Scalar(op) => ("  let b = params.scalar;\n", binary_expr(op)),
        KernelKind::Unary(op) => ("", unary_expr(op, dtype)),
    };
    let rhs_binding = if kind.arity() == 2 {
        format!("@group(0) @binding(1)\nvar<storage, read> rhs: array<{ty}>;\n")
    } else {
        String::new()
    };
    let output_binding = kind.arity();
    let params_binding = kind.arity() + 1;

    Ok(format!(
        r#"
struct Params {{
  elements: u32,
  row_stride: u32,
  scalar: {ty},
  _padding: u32,
}}

@group(0) @binding(0)
var<storage, read> lhs: array<{ty}>;
{rhs_binding}
@group(0) @binding({output_binding})
var<storage, read_write> output: array<{ty}>;

@group(0) @binding({params_binding})
var<uniform> params: Params;

@compute @workgroup_size({wg}, 1, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
  let index = gid.y * params.row_stride + gid.x;
  if (index >= params.elements) {{
    return;
  }}
  let a = lhs[index];
{operands}  output[index] = {expr};
}}
"#,
        wg = WORKGROUP_SIZE,
    ))
}

/// Workgroup counts covering `elements` invocations, folded into a second
/// dimension when one would exceed the per-dimension limit.
pub fn dispatch_grid(elements: u32) -> (u32, u32) {
    let groups = elements.div_ceil(WORKGROUP_SIZE).max(1);
    if groups <= MAX_WORKGROUPS_PER_DIM {
        (groups, 1)
    } else {
        (MAX_WORKGROUPS_PER_DIM, groups.div_ceil(MAX_WORKGROUPS_PER_DIM))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_shader_binds_two_inputs() {
        let source =
            elementwise_shader_source(KernelKind::Binary(BinaryOp::Add), DataType::F32).unwrap();
        assert!(source.contains("var<storage, read> rhs: array<f32>"));
        assert!(source.contains("@binding(2)\nvar<storage, read_write> output"));
        assert!(source.contains("@binding(3)\nvar<uniform> params"));
        assert!(source.contains("output[index] = a + b;"));
    }

    #[test]
    fn scalar_and_unary_shaders_bind_one_input() {
        let source =
            elementwise_shader_source(KernelKind::Scalar(BinaryOp::Div), DataType::I32).unwrap();
        assert!(!source.contains("rhs"));
        assert!(source.contains("let b = params.scalar;"));
        assert!(source.contains("scalar: i32"));

        let source =
            elementwise_shader_source(KernelKind::Unary(UnaryOp::Neg), DataType::U32).unwrap();
        assert!(source.contains("output[index] = 0u - a;"));
        assert!(source.contains("@binding(1)\nvar<storage, read_write> output"));
    }

    #[test]
    fn byte_types_have_no_shader() {
        assert!(elementwise_shader_source(KernelKind::Unary(UnaryOp::Abs), DataType::U8).is_err());
    }

    #[test]
    fn grid_folds_into_second_dimension() {
        assert_eq!(dispatch_grid(0), (1, 1));
        assert_eq!(dispatch_grid(64), (1, 1));
        assert_eq!(dispatch_grid(65), (2, 1));
        let elements = MAX_WORKGROUPS_PER_DIM * WORKGROUP_SIZE + 1;
        assert_eq!(dispatch_grid(elements), (MAX_WORKGROUPS_PER_DIM, 2));
    }
}
