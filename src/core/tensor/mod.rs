pub mod ops;

pub use ops::TensorOps;

use crate::core::Result;
use crate::rng::LatentRng;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F16,
}

impl DType {
    pub fn bytes_per_element(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Cuda(usize),
    Vulkan,
    Metal,
}

impl Device {
    pub fn parse(s: &str) -> Option<Device> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "cpu" | "cpu-task" => Some(Device::Cpu),
            "vulkan" => Some(Device::Vulkan),
            "metal" => Some(Device::Metal),
            "cuda" => Some(Device::Cuda(0)),
            _ => s
                .strip_prefix("cuda:")
                .and_then(|i| i.parse().ok())
                .map(Device::Cuda),
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(i) => write!(f, "cuda:{}", i),
            Device::Vulkan => write!(f, "vulkan"),
            Device::Metal => write!(f, "metal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    pub fn from_slice(dims: &[usize]) -> Self {
        Self {
            dims: dims.to_vec(),
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn len(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty() || self.dims.iter().all(|&d| d == 0)
    }

    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn dim(&self, idx: usize) -> Option<usize> {
        self.dims.get(idx).copied()
    }
}

/// Dense row-major f32 tensor. Latents, text embeddings and logits all move
/// through this type; `dtype` records the precision the values were produced
/// at, the storage stays f32.
#[derive(Debug, Clone)]
pub struct Tensor {
    pub(crate) data: Vec<f32>,
    pub(crate) shape: Shape,
    pub(crate) dtype: DType,
    pub(crate) device: Device,
}

impl Tensor {
    pub fn new(data: Vec<f32>, shape: Shape) -> Self {
        Self {
            data,
            shape,
            dtype: DType::F32,
            device: Device::Cpu,
        }
    }

    pub fn zeros(shape: Shape) -> Self {
        let numel = shape.numel();
        Self::new(vec![0.0; numel], shape)
    }

    pub fn filled(shape: Shape, value: f32) -> Self {
        let numel = shape.numel();
        Self::new(vec![value; numel], shape)
    }

    /// Standard-normal tensor drawn from a seeded stream. The same rng state
    /// always produces the same tensor.
    pub fn randn(shape: Shape, rng: &mut LatentRng) -> Self {
        let mut data = vec![0.0; shape.numel()];
        rng.fill_normal(&mut data);
        Self::new(data, shape)
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Vec<f32> {
        &mut self.data
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    pub fn reshape(&self, shape: Shape) -> Result<Self> {
        if self.shape.numel() != shape.numel() {
            anyhow::bail!("Cannot reshape: element count mismatch")
        }

        Ok(Self {
            data: self.data.clone(),
            shape,
            dtype: self.dtype,
            device: self.device,
        })
    }

    pub fn to_dtype(&self, dtype: DType) -> Self {
        Self {
            data: self.data.clone(),
            shape: self.shape.clone(),
            dtype,
            device: self.device,
        }
    }

    pub fn to_device(&self, device: Device) -> Self {
        Self {
            data: self.data.clone(),
            shape: self.shape.clone(),
            dtype: self.dtype,
            device,
        }
    }

    pub fn from_candle(t: candle_core::Tensor) -> Result<Self> {
        let shape = Shape::from_slice(t.dims());
        let data = t.flatten_all()?.to_vec1::<f32>()?;
        Ok(Self::new(data, shape))
    }

    pub fn to_candle(&self) -> Result<candle_core::Tensor> {
        let t = candle_core::Tensor::new(self.data.as_slice(), &candle_core::Device::Cpu)?;
        Ok(t.reshape(self.shape.dims())?)
    }
}

impl Add for Tensor {
    type Output = Tensor;

    fn add(self, other: Tensor) -> Self::Output {
        let data: Vec<f32> = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| a + b)
            .collect();

        Tensor {
            data,
            shape: self.shape,
            dtype: self.dtype,
            device: self.device,
        }
    }
}

impl Add<&Tensor> for Tensor {
    type Output = Tensor;

    fn add(self, other: &Tensor) -> Self::Output {
        let data: Vec<f32> = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| a + b)
            .collect();

        Tensor {
            data,
            shape: self.shape,
            dtype: self.dtype,
            device: self.device,
        }
    }
}

impl Sub for Tensor {
    type Output = Tensor;

    fn sub(self, other: Tensor) -> Self::Output {
        let data: Vec<f32> = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| a - b)
            .collect();

        Tensor {
            data,
            shape: self.shape,
            dtype: self.dtype,
            device: self.device,
        }
    }
}

impl Mul<f32> for Tensor {
    type Output = Tensor;

    fn mul(self, scalar: f32) -> Self::Output {
        let data: Vec<f32> = self.data.iter().map(|&a| a * scalar).collect();

        Tensor {
            data,
            shape: self.shape,
            dtype: self.dtype,
            device: self.device,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_creation() {
        let t = Tensor::zeros(Shape::new(vec![1, 4, 8, 8]));
        assert_eq!(t.shape().dims(), &[1, 4, 8, 8]);
        assert_eq!(t.numel(), 256);
    }

    #[test]
    fn test_tensor_add() {
        let a = Tensor::new(vec![1.0, 2.0, 3.0], Shape::new(vec![3]));
        let b = Tensor::new(vec![4.0, 5.0, 6.0], Shape::new(vec![3]));
        let c = a + b;
        assert_eq!(c.data(), &[5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_tensor_scale() {
        let a = Tensor::new(vec![1.0, 2.0, 3.0], Shape::new(vec![3]));
        let b = a * 2.0;
        assert_eq!(b.data(), &[2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_randn_deterministic() {
        let mut r1 = LatentRng::new(99);
        let mut r2 = LatentRng::new(99);
        let a = Tensor::randn(Shape::new(vec![2, 4]), &mut r1);
        let b = Tensor::randn(Shape::new(vec![2, 4]), &mut r2);
        assert_eq!(a.data(), b.data());
    }

    #[test]
    fn test_device_parse() {
        assert_eq!(Device::parse("vulkan"), Some(Device::Vulkan));
        assert_eq!(Device::parse("cuda:1"), Some(Device::Cuda(1)));
        assert_eq!(Device::parse("CPU"), Some(Device::Cpu));
        assert_eq!(Device::parse("tpu"), None);
    }
}
