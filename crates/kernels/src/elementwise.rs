//! Elementwise kernels and their host reference implementations.
//!
//! Integer arithmetic wraps. Integer division by zero, and `i32::MIN / -1`,
//! yield the dividend so host results agree with the WGSL variants.

use crate::config::{BinaryOp, DataType, Element, KernelKind, ScalarValue, UnaryOp};
use crate::utils::{read_elements, write_elements};
use anyhow::{bail, ensure, Context, Result};
use rayon::prelude::*;
use std::sync::Arc;

/// Per-element arithmetic for the dtypes compute kernels support.
pub trait Lane: Element {
    fn binary(op: BinaryOp, lhs: Self, rhs: Self) -> Self;
    fn unary(op: UnaryOp, value: Self) -> Self;
    fn from_scalar(value: ScalarValue) -> Self;
}

impl Lane for f32 {
    fn binary(op: BinaryOp, lhs: Self, rhs: Self) -> Self {
        match op {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => lhs / rhs,
        }
    }

    fn unary(op: UnaryOp, value: Self) -> Self {
        match op {
            UnaryOp::Relu => value.max(0.0),
            UnaryOp::Neg => -value,
            UnaryOp::Abs => value.abs(),
        }
    }

    fn from_scalar(value: ScalarValue) -> Self {
        value.as_f64() as f32
    }
}

impl Lane for i32 {
    fn binary(op: BinaryOp, lhs: Self, rhs: Self) -> Self {
        match op {
            BinaryOp::Add => lhs.wrapping_add(rhs),
            BinaryOp::Sub => lhs.wrapping_sub(rhs),
            BinaryOp::Mul => lhs.wrapping_mul(rhs),
            BinaryOp::Div => lhs.checked_div(rhs).unwrap_or(lhs),
        }
    }

    fn unary(op: UnaryOp, value: Self) -> Self {
        match op {
            UnaryOp::Relu => value.max(0),
            UnaryOp::Neg => value.wrapping_neg(),
            UnaryOp::Abs => value.wrapping_abs(),
        }
    }

    fn from_scalar(value: ScalarValue) -> Self {
        value.as_i64() as i32
    }
}

impl Lane for u32 {
    fn binary(op: BinaryOp, lhs: Self, rhs: Self) -> Self {
        match op {
            BinaryOp::Add => lhs.wrapping_add(rhs),
            BinaryOp::Sub => lhs.wrapping_sub(rhs),
            BinaryOp::Mul => lhs.wrapping_mul(rhs),
            BinaryOp::Div => lhs.checked_div(rhs).unwrap_or(lhs),
        }
    }

    fn unary(op: UnaryOp, value: Self) -> Self {
        match op {
            UnaryOp::Relu | UnaryOp::Abs => value,
            UnaryOp::Neg => value.wrapping_neg(),
        }
    }

    fn from_scalar(value: ScalarValue) -> Self {
        value.as_i64() as u32
    }
}

/// Raw-byte view of one dispatch, as the host context sees it.
pub struct KernelArgs<'a> {
    pub dtype: DataType,
    pub inputs: &'a [&'a [u8]],
    pub scalar: Option<ScalarValue>,
}

pub trait ElementwiseKernel: Send + Sync {
    fn kind(&self) -> KernelKind;

    fn name(&self) -> String {
        self.kind().name()
    }

    fn supports(&self, dtype: DataType) -> bool {
        dtype.is_compute()
    }

    fn run_host(&self, args: &KernelArgs<'_>, output: &mut [u8]) -> Result<()>;
}

pub type DynKernel = Arc<dyn ElementwiseKernel>;

fn check_arity(kind: KernelKind, args: &KernelArgs<'_>) -> Result<()> {
    ensure!(
        args.inputs.len() == kind.arity(),
        "{kind} expects {} inputs, got {}",
        kind.arity(),
        args.inputs.len()
    );
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub struct BinaryKernel {
    op: BinaryOp,
}

impl BinaryKernel {
    pub fn new(op: BinaryOp) -> Self {
        Self { op }
    }

    fn run_typed<T: Lane>(&self, lhs: &[u8], rhs: &[u8], output: &mut [u8]) -> Result<()> {
        let lhs = read_elements::<T>(lhs)?;
        let rhs = read_elements::<T>(rhs)?;
        ensure!(lhs.len() == rhs.len(), "operand lengths differ");
        let op = self.op;
        let result: Vec<T> = lhs
            .par_iter()
            .zip(rhs.par_iter())
            .map(|(&a, &b)| T::binary(op, a, b))
            .collect();
        write_elements(&result, output)
    }
}

impl ElementwiseKernel for BinaryKernel {
    fn kind(&self) -> KernelKind {
        KernelKind::Binary(self.op)
    }

    fn run_host(&self, args: &KernelArgs<'_>, output: &mut [u8]) -> Result<()> {
        check_arity(self.kind(), args)?;
        let (lhs, rhs) = (args.inputs[0], args.inputs[1]);
        match args.dtype {
            DataType::F32 => self.run_typed::<f32>(lhs, rhs, output),
            DataType::I32 => self.run_typed::<i32>(lhs, rhs, output),
            DataType::U32 => self.run_typed::<u32>(lhs, rhs, output),
            other => bail!("{} does not support {other}", self.name()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScalarKernel {
    op: BinaryOp,
}

impl ScalarKernel {
    pub fn new(op: BinaryOp) -> Self {
        Self { op }
    }

    fn run_typed<T: Lane>(&self, input: &[u8], scalar: ScalarValue, output: &mut [u8]) -> Result<()> {
        let input = read_elements::<T>(input)?;
        let rhs = T::from_scalar(scalar);
        let op = self.op;
        let result: Vec<T> = input.par_iter().map(|&a| T::binary(op, a, rhs)).collect();
        write_elements(&result, output)
    }
}

impl ElementwiseKernel for ScalarKernel {
    fn kind(&self) -> KernelKind {
        KernelKind::Scalar(self.op)
    }

    fn run_host(&self, args: &KernelArgs<'_>, output: &mut [u8]) -> Result<()> {
        check_arity(self.kind(), args)?;
        let scalar = args
            .scalar
            .with_context(|| format!("{} dispatched without a scalar", self.name()))?;
        let input = args.inputs[0];
        match args.dtype {
            DataType::F32 => self.run_typed::<f32>(input, scalar, output),
            DataType::I32 => self.run_typed::<i32>(input, scalar, output),
            DataType::U32 => self.run_typed::<u32>(input, scalar, output),
            other => bail!("{} does not support {other}", self.name()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UnaryKernel {
    op: UnaryOp,
}

impl UnaryKernel {
    pub fn new(op: UnaryOp) -> Self {
        Self { op }
    }

    fn run_typed<T: Lane>(&self, input: &[u8], output: &mut [u8]) -> Result<()> {
        let input = read_elements::<T>(input)?;
        let op = self.op;
        let result: Vec<T> = input.par_iter().map(|&a| T::unary(op, a)).collect();
        write_elements(&result, output)
    }
}

impl ElementwiseKernel for UnaryKernel {
    fn kind(&self) -> KernelKind {
        KernelKind::Unary(self.op)
    }

    fn run_host(&self, args: &KernelArgs<'_>, output: &mut [u8]) -> Result<()> {
        check_arity(self.kind(), args)?;
        let input = args.inputs[0];
        match args.dtype {
            DataType::F32 => self.run_typed::<f32>(input, output),
            DataType::I32 => self.run_typed::<i32>(input, output),
            DataType::U32 => self.run_typed::<u32>(input, output),
            other => bail!("{} does not support {other}", self.name()),
        }
    }
}

/// Builds the kernel that implements `kind`.
pub fn kernel_for(kind: KernelKind) -> DynKernel {
    match kind {
        KernelKind::Binary(op) => Arc::new(BinaryKernel::new(op)),
        KernelKind::Scalar(op) => Arc::new(ScalarKernel::new(op)),
        KernelKind::Unary(op) => Arc::new(UnaryKernel::new(op)),
    }
}
