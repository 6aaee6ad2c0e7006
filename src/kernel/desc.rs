//! Kernel descriptor: what to generate, independent of how.

use serde::{Deserialize, Serialize};

use crate::ir::{BinOp, Dim, EltwiseAlg, ScalarType, Tile};

/// Propagation kind of the contraction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prop {
    Fwd,
    BwdData,
    BwdWeights,
}

impl Prop {
    pub fn name(self) -> &'static str {
        match self {
            Prop::Fwd => "fwd",
            Prop::BwdData => "bwd_d",
            Prop::BwdWeights => "bwd_w",
        }
    }
}

/// Element type and dimension order (outermost first) of a memory tensor.
/// Tensors are dense in that order, with extents taken from the problem
/// shape.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorTag {
    pub ty: ScalarType,
    pub dims: Vec<Dim>,
}

impl TensorTag {
    pub fn new(ty: ScalarType, dims: &[&str]) -> Self {
        Self {
            ty,
            dims: dims.iter().map(|d| Dim::new(*d)).collect(),
        }
    }

    pub fn ndims(&self) -> usize {
        self.dims.len()
    }

    pub fn has(&self, dim: &Dim) -> bool {
        self.dims.contains(dim)
    }

    /// Dense strides in elements, keyed by dimension.
    pub fn strides(&self, shape: &Tile) -> Vec<(Dim, i64)> {
        let mut stride = 1;
        let mut ret = Vec::with_capacity(self.dims.len());
        for d in self.dims.iter().rev() {
            ret.push((d.clone(), stride));
            stride *= shape.get_or(d, 1);
        }
        ret.reverse();
        ret
    }
}

/// A quantization scale. `mask` bit `i` set means the scale varies along
/// the `i`-th output dimension (outermost first); zero is one scalar.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScaleDesc {
    pub mask: u32,
    pub dt: ScalarType,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scales {
    pub src: Option<ScaleDesc>,
    pub wei: Option<ScaleDesc>,
    pub dst: Option<ScaleDesc>,
}

impl Scales {
    pub fn is_default(&self) -> bool {
        self.src.is_none() && self.wei.is_none() && self.dst.is_none()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryAlg {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl BinaryAlg {
    pub fn op(self) -> BinOp {
        match self {
            BinaryAlg::Add => BinOp::Add,
            BinaryAlg::Sub => BinOp::Sub,
            BinaryAlg::Mul => BinOp::Mul,
            BinaryAlg::Div => BinOp::Div,
            BinaryAlg::Min => BinOp::Min,
            BinaryAlg::Max => BinOp::Max,
            BinaryAlg::Lt => BinOp::Lt,
            BinaryAlg::Le => BinOp::Le,
            BinaryAlg::Gt => BinOp::Gt,
            BinaryAlg::Ge => BinOp::Ge,
            BinaryAlg::Eq => BinOp::Eq,
            BinaryAlg::Ne => BinOp::Ne,
        }
    }

    /// Scalar reference semantics; comparisons give 0.0 or 1.0.
    pub fn apply(self, x: f32, y: f32) -> f32 {
        let b = |c: bool| if c { 1.0 } else { 0.0 };
        match self {
            BinaryAlg::Add => x + y,
            BinaryAlg::Sub => x - y,
            BinaryAlg::Mul => x * y,
            BinaryAlg::Div => x / y,
            BinaryAlg::Min => x.min(y),
            BinaryAlg::Max => x.max(y),
            BinaryAlg::Lt => b(x < y),
            BinaryAlg::Le => b(x <= y),
            BinaryAlg::Gt => b(x > y),
            BinaryAlg::Ge => b(x >= y),
            BinaryAlg::Eq => b(x == y),
            BinaryAlg::Ne => b(x != y),
        }
    }
}

/// A fused post-op, applied in place to the f32 accumulator.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PostOp {
    Eltwise {
        alg: EltwiseAlg,
        scale: f32,
        alpha: f32,
        beta: f32,
    },
    /// `acc += scale * (dst - zero_point)`, reading the output tensor.
    Sum {
        scale: f32,
        zero_point: i32,
        dt: ScalarType,
    },
    /// `acc = acc <alg> src1`. `broadcast_mask` bit `i` set means `src1`
    /// has extent 1 along the `i`-th output dimension (outermost first).
    Binary {
        alg: BinaryAlg,
        src1_dt: ScalarType,
        broadcast_mask: u32,
    },
}

impl PostOp {
    pub fn relu() -> Self {
        PostOp::Eltwise {
            alg: EltwiseAlg::Relu,
            scale: 1.0,
            alpha: 0.0,
            beta: 0.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PostOp::Eltwise { alg, .. } => alg.name(),
            PostOp::Sum { .. } => "sum",
            PostOp::Binary { .. } => "binary",
        }
    }
}

/// Full description of one kernel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KernelDesc {
    pub prop: Prop,
    pub src: TensorTag,
    pub wei: TensorTag,
    pub dst: TensorTag,
    /// Problem extents for every dimension of the three tensors.
    pub shape: Tile,
    /// Reduction loop dimensions, innermost first.
    pub loop_desc: Vec<Dim>,
    pub thread_group_tile: Tile,
    pub simd: u32,
    pub post_ops: Vec<PostOp>,
    pub scales: Scales,
    /// Bias element type when the kernel has a bias.
    pub bias: Option<ScalarType>,
    pub prefetch_dist: u32,
    pub use_stream_k: bool,
    /// Thread groups per k-batch under Stream-K; 0 picks one per tile.
    pub stream_k_groups: u32,
    /// Reduction batches under Stream-K.
    pub stream_k_batches: u32,
}

impl KernelDesc {
    /// Plain f32 `dst[m, n] = src[m, k] * wei[k, n]`.
    pub fn gemm(m: i64, n: i64, k: i64) -> Self {
        Self {
            prop: Prop::Fwd,
            src: TensorTag::new(ScalarType::F32, &["m", "k"]),
            wei: TensorTag::new(ScalarType::F32, &["k", "n"]),
            dst: TensorTag::new(ScalarType::F32, &["m", "n"]),
            shape: Tile::from_pairs([("m", m), ("n", n), ("k", k)]),
            loop_desc: vec![Dim::new("k")],
            thread_group_tile: Tile::from_pairs([("m", 1), ("n", 1)]),
            simd: 16,
            post_ops: Vec::new(),
            scales: Scales::default(),
            bias: None,
            prefetch_dist: 0,
            use_stream_k: false,
            stream_k_groups: 0,
            stream_k_batches: 1,
        }
    }

    pub fn with_prop(mut self, prop: Prop) -> Self {
        self.prop = prop;
        self
    }

    pub fn with_simd(mut self, simd: u32) -> Self {
        self.simd = simd;
        self
    }

    pub fn with_post_op(mut self, op: PostOp) -> Self {
        self.post_ops.push(op);
        self
    }

    pub fn with_scales(mut self, scales: Scales) -> Self {
        self.scales = scales;
        self
    }

    pub fn with_bias(mut self, ty: ScalarType) -> Self {
        self.bias = Some(ty);
        self
    }

    pub fn with_prefetch(mut self, dist: u32) -> Self {
        self.prefetch_dist = dist;
        self
    }

    pub fn with_stream_k(mut self, groups: u32, batches: u32) -> Self {
        self.use_stream_k = true;
        self.stream_k_groups = groups;
        self.stream_k_batches = batches.max(1);
        self
    }

    pub fn with_bias_fwd(&self) -> bool {
        self.prop == Prop::Fwd && self.bias.is_some()
    }

    pub fn with_bias_bwd_w(&self) -> bool {
        self.prop == Prop::BwdWeights && self.bias.is_some()
    }

    pub fn has_post_ops(&self) -> bool {
        !self.post_ops.is_empty() || !self.scales.is_default() || self.with_bias_fwd()
    }

    /// The output tensor of the contraction.
    pub fn c_tag(&self) -> &TensorTag {
        pick_abc(self.prop, &self.src, &self.wei, &self.dst).2
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        let mut s = format!("{} ", self.prop.name());
        for (i, (d, v)) in self.shape.iter().enumerate() {
            if i > 0 {
                s.push(',');
            }
            s.push_str(&format!("{}{}", d, v));
        }
        s.push_str(&format!(" simd{}", self.simd));
        if !self.post_ops.is_empty() {
            let names: Vec<&str> = self.post_ops.iter().map(PostOp::name).collect();
            s.push_str(&format!(" post_ops={}", names.join("+")));
        }
        if self.bias.is_some() {
            s.push_str(" bias");
        }
        if self.prefetch_dist > 0 {
            s.push_str(&format!(" prefetch{}", self.prefetch_dist));
        }
        if self.use_stream_k {
            s.push_str(" stream_k");
        }
        s
    }
}

/// `(a, b, c)`: left operand, right operand and output for `prop`.
pub fn pick_abc<T>(prop: Prop, src: T, wei: T, dst: T) -> (T, T, T) {
    match prop {
        Prop::Fwd => (src, wei, dst),
        Prop::BwdData => (dst, wei, src),
        Prop::BwdWeights => (src, dst, wei),
    }
}

/// Reverse the low `ndims` bits of `mask`: bit `i` moves to bit
/// `ndims - 1 - i`.
pub fn reverse_mask(mask: u32, ndims: usize) -> u32 {
    let mut ret = 0;
    for i in 0..ndims {
        let bit = (mask >> (ndims - i - 1)) & 1;
        ret |= bit << i;
    }
    ret
}
