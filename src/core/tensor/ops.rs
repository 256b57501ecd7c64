use super::Tensor;

/// Element-wise helpers the schedulers and backends lean on. All operate on
/// the flat f32 buffer and keep shape/dtype/device unchanged.
pub trait TensorOps {
    /// self + other * scale
    fn add_scaled(&self, other: &Tensor, scale: f32) -> Tensor;
    fn scaled(&self, scale: f32) -> Tensor;
    fn map(&self, f: impl Fn(f32) -> f32) -> Tensor;
    fn clamp(&self, lo: f32, hi: f32) -> Tensor;
    fn mean(&self) -> f32;
    fn max_abs(&self) -> f32;
    fn argmax(&self) -> usize;
}

impl TensorOps for Tensor {
    fn add_scaled(&self, other: &Tensor, scale: f32) -> Tensor {
        debug_assert_eq!(self.shape, other.shape);
        let data: Vec<f32> = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| a + b * scale)
            .collect();

        Tensor {
            data,
            shape: self.shape.clone(),
            dtype: self.dtype,
            device: self.device,
        }
    }

    fn scaled(&self, scale: f32) -> Tensor {
        self.map(|x| x * scale)
    }

    fn map(&self, f: impl Fn(f32) -> f32) -> Tensor {
        Tensor {
            data: self.data.iter().map(|&x| f(x)).collect(),
            shape: self.shape.clone(),
            dtype: self.dtype,
            device: self.device,
        }
    }

    fn clamp(&self, lo: f32, hi: f32) -> Tensor {
        self.map(|x| x.clamp(lo, hi))
    }

    fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f32>() / self.data.len() as f32
    }

    fn max_abs(&self) -> f32 {
        self.data.iter().fold(0.0f32, |m, &x| m.max(x.abs()))
    }

    fn argmax(&self) -> usize {
        let mut best = 0;
        let mut best_val = f32::NEG_INFINITY;
        for (i, &x) in self.data.iter().enumerate() {
            if x > best_val {
                best_val = x;
                best = i;
            }
        }
        best
    }
}
