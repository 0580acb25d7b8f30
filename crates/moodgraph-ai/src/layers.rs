//! Dense building blocks for the classification heads.
//!
//! Plain row-major `Vec<f32>` math: the heads are small next to the
//! backbone, so there is no need for a tensor library here.
//!
//! Quantization is one-way. [`Linear::quantize`] consumes the full-precision
//! layer and returns a [`QuantizedLinear`]; nothing converts back.

/// Fully connected layer `y = W x + b`, `W` stored as `[out, in]`.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Vec<f32>,
    bias: Vec<f32>,
    in_dim: usize,
    out_dim: usize,
}

impl Linear {
    pub fn new(weight: Vec<f32>, bias: Vec<f32>, in_dim: usize, out_dim: usize) -> Self {
        debug_assert_eq!(weight.len(), in_dim * out_dim);
        debug_assert_eq!(bias.len(), out_dim);
        Self {
            weight,
            bias,
            in_dim,
            out_dim,
        }
    }

    pub fn zeros(in_dim: usize, out_dim: usize) -> Self {
        Self::new(vec![0.0; in_dim * out_dim], vec![0.0; out_dim], in_dim, out_dim)
    }

    pub fn forward(&self, x: &[f32]) -> Vec<f32> {
        debug_assert_eq!(x.len(), self.in_dim);
        self.weight
            .chunks_exact(self.in_dim)
            .zip(&self.bias)
            .map(|(row, b)| dot(row, x) + b)
            .collect()
    }

    /// Dynamic int8 quantization: symmetric per output row.
    pub fn quantize(self) -> QuantizedLinear {
        let mut weight = Vec::with_capacity(self.weight.len());
        let mut scales = Vec::with_capacity(self.out_dim);

        for row in self.weight.chunks_exact(self.in_dim) {
            let (q, scale) = quantize_symmetric(row);
            weight.extend(q);
            scales.push(scale);
        }

        QuantizedLinear {
            weight,
            scales,
            bias: self.bias,
            in_dim: self.in_dim,
        }
    }
}

/// Linear layer with int8 weights. Activations are quantized per call.
#[derive(Debug, Clone)]
pub struct QuantizedLinear {
    weight: Vec<i8>,
    scales: Vec<f32>,
    bias: Vec<f32>,
    in_dim: usize,
}

impl QuantizedLinear {
    pub fn forward(&self, x: &[f32]) -> Vec<f32> {
        debug_assert_eq!(x.len(), self.in_dim);
        let (qx, x_scale) = quantize_symmetric(x);

        self.weight
            .chunks_exact(self.in_dim)
            .zip(self.scales.iter().zip(&self.bias))
            .map(|(row, (&w_scale, b))| {
                let acc: i32 = row
                    .iter()
                    .zip(&qx)
                    .map(|(&w, &v)| i32::from(w) * i32::from(v))
                    .sum();
                acc as f32 * w_scale * x_scale + b
            })
            .collect()
    }
}

/// A linear layer in whichever precision it currently holds.
#[derive(Debug, Clone)]
pub enum LinearLayer {
    Full(Linear),
    Int8(QuantizedLinear),
}

impl LinearLayer {
    pub fn forward(&self, x: &[f32]) -> Vec<f32> {
        match self {
            Self::Full(l) => l.forward(x),
            Self::Int8(q) => q.forward(x),
        }
    }

    pub fn quantize(self) -> Self {
        match self {
            Self::Full(l) => Self::Int8(l.quantize()),
            q @ Self::Int8(_) => q,
        }
    }

    pub fn is_quantized(&self) -> bool {
        matches!(self, Self::Int8(_))
    }
}

/// Layer normalisation over the last dimension.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    gamma: Vec<f32>,
    beta: Vec<f32>,
    eps: f32,
}

impl LayerNorm {
    pub const DEFAULT_EPS: f32 = 1e-5;

    pub fn new(gamma: Vec<f32>, beta: Vec<f32>) -> Self {
        debug_assert_eq!(gamma.len(), beta.len());
        Self {
            gamma,
            beta,
            eps: Self::DEFAULT_EPS,
        }
    }

    /// Unit scale, zero shift.
    pub fn identity(dim: usize) -> Self {
        Self::new(vec![1.0; dim], vec![0.0; dim])
    }

    pub fn forward_in_place(&self, x: &mut [f32]) {
        let n = x.len() as f32;
        let mean = x.iter().sum::<f32>() / n;
        let var = x.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
        let inv_std = 1.0 / (var + self.eps).sqrt();
        for ((v, g), b) in x.iter_mut().zip(&self.gamma).zip(&self.beta) {
            *v = (*v - mean) * inv_std * g + b;
        }
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn relu_in_place(v: &mut [f32]) {
    for x in v.iter_mut() {
        if *x < 0.0 {
            *x = 0.0;
        }
    }
}

/// Symmetric int8 quantization of a slice. Returns values and scale.
fn quantize_symmetric(values: &[f32]) -> (Vec<i8>, f32) {
    let max_abs = values.iter().fold(0.0f32, |m, v| m.max(v.abs()));
    if max_abs == 0.0 {
        return (vec![0; values.len()], 1.0);
    }
    let scale = max_abs / 127.0;
    let q = values
        .iter()
        .map(|v| (v / scale).round().clamp(-127.0, 127.0) as i8)
        .collect();
    (q, scale)
}
