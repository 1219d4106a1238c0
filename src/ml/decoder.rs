// ============================================================
// Layer 5 — Decoder Boundary
// ============================================================
// The encoder/decoder networks live outside this crate. All the
// loss needs from a model is, per decoder, the hidden states and
// copy attention for every target step, plus the shared copy
// generator.
//
// A decoder is fed the target column without its last token and
// predicts the column without its first token, so for a target
// column of length T every tensor below has T - 1 steps:
//
//   hidden     [T - 1, batch, hidden]
//   copy_attn  [T - 1, batch, src_len]
//
// Reference: Burn Book §3 (Modules)

use burn::prelude::*;

use crate::data::batcher::CopyBatch;
use crate::domain::errors::Result;
use crate::ml::copy_generator::CopyGenerator;

#[derive(Debug, Clone)]
pub struct DecoderSideOutput<B: Backend> {
    pub hidden:    Tensor<B, 3>,
    pub copy_attn: Tensor<B, 3>,
}

/// Content decoder output, plus the style decoder's when the batch
/// has reference sides.
#[derive(Debug, Clone)]
pub struct DualDecoderOutput<B: Backend> {
    pub content: DecoderSideOutput<B>,
    pub style:   Option<DecoderSideOutput<B>>,
}

/// A model with a content decoder and a style decoder sharing one
/// copy generator.
pub trait DualCopyDecoder<B: Backend> {
    fn decode(&self, batch: &CopyBatch<B>) -> Result<DualDecoderOutput<B>>;

    fn generator(&self) -> &CopyGenerator<B>;
}
