//! Element types, host scalars and the kernel catalog keys.

use anyhow::{bail, Result};
use bytemuck::Pod;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    F32,
    F16,
    I32,
    U32,
    I8,
    U8,
}

impl DataType {
    pub fn element_size_bytes(&self) -> usize {
        match self {
            DataType::F32 | DataType::I32 | DataType::U32 => 4,
            DataType::F16 => 2,
            DataType::I8 | DataType::U8 => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::F32 => "f32",
            DataType::F16 => "f16",
            DataType::I32 => "i32",
            DataType::U32 => "u32",
            DataType::I8 => "i8",
            DataType::U8 => "u8",
        }
    }

    pub fn from_ident(ident: &str) -> Result<Self> {
        match ident {
            "f32" | "float32" => Ok(DataType::F32),
            "f16" | "float16" | "half" => Ok(DataType::F16),
            "i32" | "int32" => Ok(DataType::I32),
            "u32" | "uint32" => Ok(DataType::U32),
            "i8" | "int8" => Ok(DataType::I8),
            "u8" | "uint8" => Ok(DataType::U8),
            _ => bail!("unsupported dtype: {ident}"),
        }
    }

    /// True for the 32-bit types compute kernels operate on.
    pub fn is_compute(&self) -> bool {
        matches!(self, DataType::F32 | DataType::I32 | DataType::U32)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host-side scalar payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarValue {
    Int(i64),
    Double(f64),
    Bool(bool),
}

impl ScalarValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            ScalarValue::Int(value) => value as f64,
            ScalarValue::Double(value) => value,
            ScalarValue::Bool(value) => f64::from(u8::from(value)),
        }
    }

    pub fn as_i64(&self) -> i64 {
        match *self {
            ScalarValue::Int(value) => value,
            ScalarValue::Double(value) => value as i64,
            ScalarValue::Bool(value) => i64::from(value),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ScalarValue::Int(_) => "int",
            ScalarValue::Double(_) => "double",
            ScalarValue::Bool(_) => "bool",
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Int(value) => write!(f, "{value}"),
            ScalarValue::Double(value) => write!(f, "{value}"),
            ScalarValue::Bool(value) => write!(f, "{value}"),
        }
    }
}

/// Rust element type with a matching [`DataType`].
pub trait Element: Pod + Send + Sync {
    const DTYPE: DataType;
}

impl Element for f32 {
    const DTYPE: DataType = DataType::F32;
}

/// Half floats are storage-only: they stage and copy but have no kernels.
impl Element for half::f16 {
    const DTYPE: DataType = DataType::F16;
}

impl Element for i32 {
    const DTYPE: DataType = DataType::I32;
}

impl Element for u32 {
    const DTYPE: DataType = DataType::U32;
}

impl Element for i8 {
    const DTYPE: DataType = DataType::I8;
}

impl Element for u8 {
    const DTYPE: DataType = DataType::U8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnaryOp {
    Relu,
    Neg,
    Abs,
}

impl UnaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOp::Relu => "relu",
            UnaryOp::Neg => "neg",
            UnaryOp::Abs => "abs",
        }
    }
}

/// Identifies one compute kernel family; the dtype picks the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "op", rename_all = "lowercase")]
pub enum KernelKind {
    /// `out[i] = lhs[i] op rhs[i]`
    Binary(BinaryOp),
    /// `out[i] = input[i] op scalar`
    Scalar(BinaryOp),
    /// `out[i] = op(input[i])`
    Unary(UnaryOp),
}

impl KernelKind {
    pub fn name(&self) -> String {
        match self {
            KernelKind::Binary(op) => op.as_str().to_string(),
            KernelKind::Scalar(op) => format!("{}_scalar", op.as_str()),
            KernelKind::Unary(op) => op.as_str().to_string(),
        }
    }

    /// Number of tensor inputs the kernel binds.
    pub fn arity(&self) -> usize {
        match self {
            KernelKind::Binary(_) => 2,
            KernelKind::Scalar(_) | KernelKind::Unary(_) => 1,
        }
    }

    pub fn takes_scalar(&self) -> bool {
        matches!(self, KernelKind::Scalar(_))
    }
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dtype_sizes_and_idents() {
        assert_eq!(DataType::F32.element_size_bytes(), 4);
        assert_eq!(DataType::U8.element_size_bytes(), 1);
        assert_eq!(DataType::from_ident("float32").unwrap(), DataType::F32);
        assert!(DataType::from_ident("f64").is_err());
        assert!(!DataType::I8.is_compute());
    }

    #[test]
    fn half_is_storage_only() {
        assert_eq!(DataType::from_ident("half").unwrap(), DataType::F16);
        assert_eq!(DataType::F16.element_size_bytes(), 2);
        assert_eq!(<half::f16 as Element>::DTYPE, DataType::F16);
        assert!(!DataType::F16.is_compute());
        assert_eq!(serde_json::to_string(&DataType::F16).unwrap(), r#""f16""#);
    }

    #[test]
    fn kernel_kind_serializes_with_tag() {
        let json = serde_json::to_string(&KernelKind::Scalar(BinaryOp::Mul)).unwrap();
        assert_eq!(json, r#"{"kind":"scalar","op":"mul"}"#);
        assert_eq!(KernelKind::Scalar(BinaryOp::Mul).name(), "mul_scalar");
        assert_eq!(KernelKind::Binary(BinaryOp::Add).arity(), 2);
    }

    #[test]
    fn scalar_conversions() {
        assert_eq!(ScalarValue::Bool(true).as_f64(), 1.0);
        assert_eq!(ScalarValue::Double(2.9).as_i64(), 2);
        assert_eq!(ScalarValue::Int(-3).to_string(), "-3");
    }
}
