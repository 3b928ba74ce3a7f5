//! Kernel registry for lookup and discovery.

use crate::config::{BinaryOp, KernelKind, UnaryOp};
use crate::elementwise::{BinaryKernel, DynKernel, ElementwiseKernel, ScalarKernel, UnaryKernel};
use std::sync::Arc;

#[derive(Default, Clone)]
pub struct KernelRegistry {
    kernels: Vec<DynKernel>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self {
            kernels: Vec::new(),
        }
    }

    pub fn with_default_kernels() -> Self {
        let mut registry = Self::new();
        for op in [BinaryOp::Add, BinaryOp::Sub, BinaryOp::Mul, BinaryOp::Div] {
            registry.register_kernel(BinaryKernel::new(op));
            registry.register_kernel(ScalarKernel::new(op));
        }
        for op in [UnaryOp::Relu, UnaryOp::Neg, UnaryOp::Abs] {
            registry.register_kernel(UnaryKernel::new(op));
        }
        registry
    }

    /// Registers `kernel`, replacing any earlier kernel of the same kind.
    pub fn register_kernel<K>(&mut self, kernel: K)
    where
        K: ElementwiseKernel + 'static,
    {
        let kind = kernel.kind();
        self.kernels.retain(|existing| existing.kind() != kind);
        self.kernels.push(Arc::new(kernel));
    }

    pub fn kernels(&self) -> &[DynKernel] {
        &self.kernels
    }

    pub fn find(&self, kind: KernelKind) -> Option<DynKernel> {
        self.kernels
            .iter()
            .find(|kernel| kernel.kind() == kind)
            .map(Arc::clone)
    }

    pub fn find_by_name(&self, name: &str) -> Option<DynKernel> {
        self.kernels
            .iter()
            .find(|kernel| kernel.name() == name)
            .map(Arc::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_covers_every_kind() {
        let registry = KernelRegistry::with_default_kernels();
        assert_eq!(registry.kernels().len(), 11);
        assert!(registry.find(KernelKind::Scalar(BinaryOp::Div)).is_some());
        assert!(registry.find(KernelKind::Unary(UnaryOp::Abs)).is_some());
        assert_eq!(
            registry.find_by_name("mul_scalar").map(|kernel| kernel.kind()),
            Some(KernelKind::Scalar(BinaryOp::Mul))
        );
    }

    #[test]
    fn registering_same_kind_replaces() {
        let mut registry = KernelRegistry::new();
        registry.register_kernel(UnaryKernel::new(UnaryOp::Relu));
        registry.register_kernel(UnaryKernel::new(UnaryOp::Relu));
        assert_eq!(registry.kernels().len(), 1);
        assert!(registry.find(KernelKind::Unary(UnaryOp::Neg)).is_none());
    }
}
