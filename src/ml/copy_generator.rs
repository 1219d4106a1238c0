// ============================================================
// Layer 5 — Copy Generator
// ============================================================
// Output layer that can either generate a word from the fixed
// target vocabulary or copy a word from the source.
//
// The output distribution covers the extended dictionary: |V|
// fixed target words followed by the C words of the per-example
// dynamic dictionary.
//
//   prob    = softmax(linear(hidden))     pad logit forced to -inf
//   p_copy  = sigmoid(linear_copy(hidden))
//
// The switch logit is returned alongside p_copy so the switch
// loss can be taken in log space.
//
// Inference mixes the two with the learned switch:
//
//   out  = [ prob · (1 - p_copy) | (attn · p_copy) ⊗ src_map ]
//
// Training is supervised by the alignment instead: a step whose
// target word is copyable (align != 0) gets all of its mass from
// the copy side, every other step from the generation side. With
// pointer supervision the copy attention is further restricted
// to the source positions the pointer mask allows.
//
//   out  = [ prob · [align == 0] | (attn · [align != 0] · ptrs) ⊗ src_map ]
//
// "⊗ src_map" is a batched matmul that sums attention over all
// source positions holding the same dynamic word.
//
// Shapes (N = tgt_len × batch, time-major):
//   hidden   [N, hidden]
//   attn     [N, src_len]
//   src_map  [src_len, batch, C]
//   align    [N]
//   ptrs     [tgt_len, batch, src_len]
//   output   [N, |V| + C]
//
// Reference: Vinyals et al. (2015) Pointer Networks
//            Gu et al. (2016) Incorporating Copying Mechanism
//            See et al. (2017) Get To The Point

use burn::{
    nn::{Linear, LinearConfig},
    prelude::*,
    tensor::activation::{sigmoid, softmax},
};

use crate::domain::errors::{self, PipelineError};

#[derive(Config, Debug)]
pub struct CopyGeneratorConfig {
    pub input_size: usize,
    /// Size of the fixed target vocabulary.
    pub vocab_size: usize,
    #[config(default = 1)]
    pub pad_index:  usize,
}

impl CopyGeneratorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> CopyGenerator<B> {
        CopyGenerator {
            linear:      LinearConfig::new(self.input_size, self.vocab_size).init(device),
            linear_copy: LinearConfig::new(self.input_size, 1).init(device),
            pad_index:   self.pad_index,
            vocab_size:  self.vocab_size,
        }
    }
}

#[derive(Module, Debug)]
pub struct CopyGenerator<B: Backend> {
    pub linear:      Linear<B>,
    pub linear_copy: Linear<B>,
    pub pad_index:   usize,
    pub vocab_size:  usize,
}

/// Alignment (and optionally pointer) supervision for training-mode mixing.
#[derive(Debug, Clone)]
pub struct CopySupervision<B: Backend> {
    /// Dynamic id of every target step, `[N]`; 0 means not copyable.
    pub align: Tensor<B, 1, Int>,
    /// Pointer mask `[tgt_len, batch, src_len]`.
    pub ptrs:  Option<Tensor<B, 3, Int>>,
}

#[derive(Debug, Clone)]
pub struct CopyGeneratorOutput<B: Backend> {
    /// Scores over the extended dictionary, `[N, |V| + C]`.
    pub prob:   Tensor<B, 2>,
    /// Copy switch probability, `[N, 1]`.
    pub p_copy: Tensor<B, 2>,
    /// Pre-sigmoid switch logit, `[N, 1]`.
    pub copy_logit: Tensor<B, 2>,
}

impl<B: Backend> CopyGenerator<B> {
    /// Size of the fixed target vocabulary this generator predicts over.
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// `supervision` selects the mixing rule: `Some` for training,
    /// `None` for inference.
    pub fn forward(
        &self,
        hidden: Tensor<B, 2>,
        attn: Tensor<B, 2>,
        src_map: Tensor<B, 3>,
        supervision: Option<CopySupervision<B>>,
    ) -> errors::Result<CopyGeneratorOutput<B>> {
        let [n, _]     = hidden.dims();
        let [n_attn, _] = attn.dims();
        if n != n_attn {
            return Err(PipelineError::ShapeMismatch(format!(
                "hidden has {n} rows but attention has {n_attn}"
            )));
        }

        // ── Generation distribution with <pad> excluded ───────────────────────
        let logits   = self.linear.forward(hidden.clone());
        let device   = logits.device();
        let [_, v]   = logits.dims();
        let pad_mask = Tensor::<B, 1, Int>::arange(0..v as i64, &device)
            .equal_elem(self.pad_index as i64)
            .unsqueeze::<2>()
            .expand([n, v]);
        let prob   = softmax(logits.mask_fill(pad_mask, f32::NEG_INFINITY), 1);

        // ── Copy switch ───────────────────────────────────────────────────────
        let copy_logit = self.linear_copy.forward(hidden);
        let p_copy     = sigmoid(copy_logit.clone());

        let prob = mix_copy_distribution(prob, p_copy.clone(), attn, src_map, supervision)?;
        Ok(CopyGeneratorOutput { prob, p_copy, copy_logit })
    }
}

/// Combine generation and copy probabilities into one distribution
/// over the extended dictionary. See the module header for the rules.
pub fn mix_copy_distribution<B: Backend>(
    prob: Tensor<B, 2>,
    p_copy: Tensor<B, 2>,
    attn: Tensor<B, 2>,
    src_map: Tensor<B, 3>,
    supervision: Option<CopySupervision<B>>,
) -> errors::Result<Tensor<B, 2>> {
    let [n, v]                 = prob.dims();
    let [n_attn, slen]         = attn.dims();
    let [slen_map, batch, cvocab] = src_map.dims();

    if n != n_attn {
        return Err(PipelineError::ShapeMismatch(format!(
            "prob has {n} rows but attention has {n_attn}"
        )));
    }
    if slen != slen_map {
        return Err(PipelineError::ShapeMismatch(format!(
            "attention covers {slen} source positions but src_map has {slen_map}"
        )));
    }
    if batch == 0 || n % batch != 0 {
        return Err(PipelineError::ShapeMismatch(format!(
            "{n} target rows do not divide into batch size {batch}"
        )));
    }
    let tlen = n / batch;

    let (out_prob, mul_attn) = match supervision {
        Some(CopySupervision { align, ptrs }) => {
            let [n_align] = align.dims();
            if n_align != n {
                return Err(PipelineError::ShapeMismatch(format!(
                    "alignment has {n_align} entries but there are {n} target rows"
                )));
            }
            let align_unk     = align.clone().equal_elem(0).float().reshape([n, 1]);
            let align_not_unk = align.not_equal_elem(0).float().reshape([n, 1]);

            let out_prob = prob * align_unk.expand([n, v]);
            let mut mul_attn = attn * align_not_unk.expand([n, slen]);
            if let Some(ptrs) = ptrs {
                let dims = ptrs.dims();
                if dims != [tlen, batch, slen] {
                    return Err(PipelineError::ShapeMismatch(format!(
                        "pointer mask is {dims:?}, expected {:?}",
                        [tlen, batch, slen]
                    )));
                }
                mul_attn = mul_attn * ptrs.float().reshape([n, slen]);
            }
            (out_prob, mul_attn)
        }
        None => {
            let keep = p_copy.clone().mul_scalar(-1.0).add_scalar(1.0);
            (prob * keep.expand([n, v]), attn * p_copy.expand([n, slen]))
        }
    };

    // [tlen, batch, slen] → [batch, tlen, slen] × [batch, slen, C]
    let copy_prob = mul_attn
        .reshape([tlen, batch, slen])
        .swap_dims(0, 1)
        .matmul(src_map.swap_dims(0, 1))
        .swap_dims(0, 1)
        .reshape([n, cvocab]);

    Ok(Tensor::cat(vec![out_prob, copy_prob], 1))
}
