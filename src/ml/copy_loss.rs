// ============================================================
// Layer 5 — Copy Loss
// ============================================================
// Negative log-likelihood over the extended dictionary, plus a
// binary cross-entropy on the copy switch, for both decoders.
//
// Per target step (criterion), with eps = 1e-20:
//
//   copy   = scores[|V| + align] · [align != 0] + eps
//   gen    = scores[target]
//
//   normal      out = copy + gen · [target != unk]
//                          + gen · [align == unk] · [target == unk]
//   force_copy  out = copy + gen · [align == unk]
//
//   loss  = -log(out) · [target != pad]
//
// Per decoder (side_loss):
//
//   nll     = Σ loss                      or, length normalized,
//           = Σ_b (Σ_t loss[t, b]) / non_pad(full target column b)
//   switch  = BCE(p_copy, [align != 0])   summed, logs clamped at -100
//   total   = nll + switch
//
// The switch BCE is taken from the logit z, with log p =
// log_sigmoid(z) and log(1 - p) = log_sigmoid(-z).
//
// Both decoders (compute_loss):
//
//   loss = λ · content + (1 - λ) · style
//
// Statistics are computed from the collapsed scores (copy slots
// of words the fixed vocabulary also knows are folded back into
// that word) against the copy-corrected target:
//
//   target' = align + |V|   where target == unk and align != 0
//
// Reference: See et al. (2017) Get To The Point
//            Gu et al. (2016) Incorporating Copying Mechanism

use burn::prelude::*;
use burn::tensor::activation::log_sigmoid;
use serde::{Deserialize, Serialize};

use crate::data::batcher::{CopyBatch, CopySide};
use crate::data::collate::float_tensor;
use crate::data::dataset::TextDataset;
use crate::data::field::PAD_INDEX;
use crate::domain::errors::{PipelineError, Result};
use crate::domain::vocab::{Vocab, UNK_INDEX};
use crate::infra::metrics::Statistics;
use crate::ml::copy_generator::{CopyGenerator, CopySupervision};
use crate::ml::decoder::{DecoderSideOutput, DualDecoderOutput};

/// Floor written into copy slots after they are folded into the
/// fixed vocabulary.
const COLLAPSED_FLOOR: f32 = 1e-10;

/// Floor for the BCE log terms.
const BCE_LOG_FLOOR: f32 = -100.0;

// ─── Config ───────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyLossConfig {
    /// Never credit generation for a word that could be copied.
    pub force_copy:          bool,
    pub normalize_by_length: bool,
    pub eps:                 f32,
    pub lambda:              LambdaSchedule,
}

impl Default for CopyLossConfig {
    fn default() -> Self {
        Self {
            force_copy:          false,
            normalize_by_length: false,
            eps:                 1e-20,
            lambda:              LambdaSchedule::default(),
        }
    }
}

/// Content weight per epoch: 0 before `start_epoch`, `value` from then on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LambdaSchedule {
    pub start_epoch: usize,
    pub value:       f32,
}

impl Default for LambdaSchedule {
    fn default() -> Self {
        Self {
            start_epoch: 4,
            value:       0.4,
        }
    }
}

impl LambdaSchedule {
    pub fn at(&self, epoch: usize) -> f32 {
        if epoch >= self.start_epoch {
            self.value
        } else {
            0.0
        }
    }
}

// ─── Criterion ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq)]
pub struct CopyCriterion {
    /// Size of the fixed target vocabulary; copy slots start here.
    pub offset:     usize,
    pub force_copy: bool,
    pub pad_index:  usize,
    pub eps:        f32,
}

impl CopyCriterion {
    pub fn new(vocab_size: usize, force_copy: bool, pad_index: usize, eps: f32) -> Self {
        Self {
            offset: vocab_size,
            force_copy,
            pad_index,
            eps,
        }
    }

    /// Per-step loss `[N]` for scores `[N, |V| + C]`.
    pub fn score<B: Backend>(
        &self,
        scores: Tensor<B, 2>,
        align: Tensor<B, 1, Int>,
        target: Tensor<B, 1, Int>,
    ) -> Result<Tensor<B, 1>> {
        let [n, width] = scores.dims();
        let [n_align]  = align.dims();
        let [n_target] = target.dims();
        if n_align != n || n_target != n {
            return Err(PipelineError::ShapeMismatch(format!(
                "scores have {n} rows, alignment {n_align}, target {n_target}"
            )));
        }
        if width <= self.offset {
            return Err(PipelineError::ShapeMismatch(format!(
                "scores are {width} wide but the fixed vocabulary alone has {}",
                self.offset
            )));
        }

        let align_unk      = align.clone().equal_elem(0).float();
        let align_not_unk  = align.clone().not_equal_elem(0).float();
        let target_unk     = target.clone().equal_elem(0).float();
        let target_not_unk = target.clone().not_equal_elem(0).float();
        let not_pad        = target.clone().not_equal_elem(self.pad_index as i64).float();

        let copy_idx = align.add_scalar(self.offset as i64).reshape([n, 1]);
        let out = scores.clone().gather(1, copy_idx).reshape([n]);
        let out = (out * align_not_unk).add_scalar(self.eps);

        let tmp = scores.gather(1, target.reshape([n, 1])).reshape([n]);
        let out = if self.force_copy {
            out + tmp * align_unk
        } else {
            out + tmp.clone() * target_not_unk + tmp * align_unk * target_unk
        };

        Ok(out.log().neg() * not_pad)
    }
}

// ─── Score collapsing ─────────────────────────────────────────────────────────
/// Fold copy probability back into the fixed vocabulary.
///
/// For every example `b` (dynamic vocabulary `src_vocabs[indices[b]]`)
/// and every dynamic word `i >= 1` that the target vocabulary also
/// knows as `ti`, the mass at `|V| + i` is added to `ti` and the
/// copy slot is set to 1e-10. Runs on the host; the result carries
/// no gradient.
pub fn collapse_copy_scores<B: Backend>(
    scores: Tensor<B, 3>,
    indices: &[usize],
    tgt_vocab: &Vocab,
    src_vocabs: &[Vocab],
) -> Result<Tensor<B, 3>> {
    let [tlen, batch, width] = scores.dims();
    if indices.len() != batch {
        return Err(PipelineError::ShapeMismatch(format!(
            "{} example indices for a batch of {batch}",
            indices.len()
        )));
    }

    let device = scores.device();
    let mut data = scores
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| PipelineError::TensorData(format!("{e:?}")))?;
    let offset = tgt_vocab.len();

    for (b, &index) in indices.iter().enumerate() {
        let src_vocab = src_vocabs.get(index).ok_or_else(|| {
            PipelineError::ShapeMismatch(format!(
                "example {index} has no dynamic vocabulary ({} available)",
                src_vocabs.len()
            ))
        })?;

        // (copy slot, fixed-vocabulary id)
        let pairs: Vec<(usize, usize)> = (1..src_vocab.len())
            .filter_map(|i| {
                let ti = tgt_vocab.stoi(src_vocab.itos(i)?);
                (ti != UNK_INDEX).then_some((offset + i, ti))
            })
            .collect();
        if let Some(&(blank, _)) = pairs.iter().find(|(blank, _)| *blank >= width) {
            return Err(PipelineError::ShapeMismatch(format!(
                "copy slot {blank} is outside scores of width {width}"
            )));
        }

        for t in 0..tlen {
            let start = (t * batch + b) * width;
            let row = &mut data[start..start + width];
            for &(blank, fill) in &pairs {
                row[fill] += row[blank];
            }
            for &(blank, _) in &pairs {
                row[blank] = COLLAPSED_FLOOR;
            }
        }
    }

    Ok(float_tensor::<B, 3>(&data, [tlen, batch, width], &device))
}

/// Replace unknown targets by their copy slot where the word was copyable.
pub fn copy_corrected_target<B: Backend>(
    target: Tensor<B, 1, Int>,
    align: Tensor<B, 1, Int>,
    vocab_size: usize,
) -> Tensor<B, 1, Int> {
    let mask = target.clone().equal_elem(0).int() * align.clone().not_equal_elem(0).int();
    target + align.add_scalar(vocab_size as i64) * mask
}

/// Loss, word count and argmax accuracy for one decoder.
fn statistics<B: Backend>(
    loss: f64,
    scores: Tensor<B, 2>,
    target: Tensor<B, 1, Int>,
    pad_index: usize,
) -> Statistics {
    let [n, _]      = scores.dims();
    let pred        = scores.argmax(1).reshape([n]);
    let non_padding = target.clone().not_equal_elem(pad_index as i64).int();
    let n_words     = non_padding.clone().sum().into_scalar().elem::<i64>();
    let n_correct   = (pred.equal(target).int() * non_padding)
        .sum()
        .into_scalar()
        .elem::<i64>();
    Statistics::new(loss, n_words.max(0) as usize, n_correct.max(0) as usize)
}

// ─── Loss computation ─────────────────────────────────────────────────────────
/// Loss tensor and statistics of one decoder.
#[derive(Debug, Clone)]
pub struct SideLoss<B: Backend> {
    /// Shape `[1]`.
    pub loss:  Tensor<B, 1>,
    pub stats: Statistics,
}

/// Combined loss of both decoders.
#[derive(Debug, Clone)]
pub struct LossOutput<B: Backend> {
    /// Shape `[1]`.
    pub loss:    Tensor<B, 1>,
    pub content: Statistics,
    pub style:   Option<Statistics>,
}

#[derive(Debug, Clone)]
pub struct CopyLossCompute {
    criterion:           CopyCriterion,
    normalize_by_length: bool,
    /// Supervised (alignment-driven) generator mixing when true,
    /// switch-driven mixing otherwise.
    training:            bool,
}

impl CopyLossCompute {
    pub fn new(tgt_vocab: &Vocab, config: &CopyLossConfig) -> Self {
        Self {
            criterion: CopyCriterion::new(
                tgt_vocab.len(),
                config.force_copy,
                PAD_INDEX as usize,
                config.eps,
            ),
            normalize_by_length: config.normalize_by_length,
            training:            true,
        }
    }

    /// Same loss, computed with inference-time generator mixing.
    pub fn for_evaluation(mut self) -> Self {
        self.training = false;
        self
    }

    pub fn criterion(&self) -> &CopyCriterion {
        &self.criterion
    }

    /// Loss of one decoder against `side`. The decoder output covers
    /// the target column without its first token.
    pub fn side_loss<B: Backend>(
        &self,
        generator: &CopyGenerator<B>,
        output: &DecoderSideOutput<B>,
        side: &CopySide<B>,
        indices: &[usize],
        tgt_vocab: &Vocab,
        src_vocabs: &[Vocab],
    ) -> Result<SideLoss<B>> {
        let [full_len, batch] = side.target.dims();
        let [tlen, out_batch, hidden] = output.hidden.dims();
        let [attn_len, attn_batch, slen] = output.copy_attn.dims();
        if full_len < 2 || tlen != full_len - 1 || attn_len != tlen {
            return Err(PipelineError::ShapeMismatch(format!(
                "target column has {full_len} steps, decoder produced {tlen} and attention {attn_len}"
            )));
        }
        if out_batch != batch || attn_batch != batch {
            return Err(PipelineError::ShapeMismatch(format!(
                "batch size {batch}, decoder output {out_batch}, attention {attn_batch}"
            )));
        }
        if generator.vocab_size() != self.criterion.offset {
            return Err(PipelineError::ShapeMismatch(format!(
                "generator predicts {} words but the target vocabulary has {}",
                generator.vocab_size(),
                self.criterion.offset
            )));
        }
        let n = tlen * batch;

        let target = side.target.clone().slice([1..full_len, 0..batch]).reshape([n]);
        let align  = side.alignment.clone().slice([1..full_len, 0..batch]).reshape([n]);
        let ptrs   = match &side.ptrs {
            Some(p) => {
                let [p_len, p_batch, p_src] = p.dims();
                if p_len != full_len || p_batch != batch {
                    return Err(PipelineError::ShapeMismatch(format!(
                        "pointer mask is {:?}, target column is [{full_len}, {batch}]",
                        [p_len, p_batch, p_src]
                    )));
                }
                Some(p.clone().slice([1..full_len, 0..batch, 0..p_src]))
            }
            None => None,
        };

        let generated = generator.forward(
            output.hidden.clone().reshape([n, hidden]),
            output.copy_attn.clone().reshape([n, slen]),
            side.src_map.clone(),
            self.training.then(|| CopySupervision {
                align: align.clone(),
                ptrs,
            }),
        )?;
        let [_, width] = generated.prob.dims();

        let loss = self.criterion.score(generated.prob.clone(), align.clone(), target.clone())?;
        let switch = switch_loss(generated.copy_logit, align.clone());

        // ── Statistics on collapsed scores ────────────────────────────────────
        let loss_sum = loss.clone().sum().into_scalar().elem::<f64>();
        let collapsed = collapse_copy_scores(
            generated.prob.reshape([tlen, batch, width]),
            indices,
            tgt_vocab,
            src_vocabs,
        )?;
        let corrected = copy_corrected_target(target, align, self.criterion.offset);
        let stats = statistics(
            loss_sum,
            collapsed.reshape([n, width]),
            corrected,
            self.criterion.pad_index,
        );

        // ── Reduction ─────────────────────────────────────────────────────────
        let nll = if self.normalize_by_length {
            let lengths = side
                .target
                .clone()
                .not_equal_elem(self.criterion.pad_index as i64)
                .float()
                .sum_dim(0)
                .reshape([batch]);
            let per_seq = loss.reshape([tlen, batch]).sum_dim(0).reshape([batch]);
            (per_seq / lengths).sum()
        } else {
            loss.sum()
        };

        Ok(SideLoss {
            loss: nll + switch,
            stats,
        })
    }

    /// `λ · content + (1 - λ) · style`. Without reference sides the
    /// content loss is returned unweighted.
    pub fn compute_loss<B: Backend>(
        &self,
        generator: &CopyGenerator<B>,
        output: &DualDecoderOutput<B>,
        batch: &CopyBatch<B>,
        dataset: &TextDataset,
        tgt_vocab: &Vocab,
        lambda: f32,
    ) -> Result<LossOutput<B>> {
        let content = self.side_loss(
            generator,
            &output.content,
            &batch.content,
            batch.indices(),
            tgt_vocab,
            dataset.src_vocabs(),
        )?;

        match (&output.style, &batch.style) {
            (Some(style_out), Some(style_side)) => {
                let style = self.side_loss(
                    generator,
                    style_out,
                    style_side,
                    batch.indices(),
                    tgt_vocab,
                    dataset.ref_src_vocabs(),
                )?;
                let loss = content.loss.mul_scalar(lambda) + style.loss.mul_scalar(1.0 - lambda);
                Ok(LossOutput {
                    loss,
                    content: content.stats,
                    style:   Some(style.stats),
                })
            }
            (None, None) => Ok(LossOutput {
                loss:    content.loss,
                content: content.stats,
                style:   None,
            }),
            (out, side) => Err(PipelineError::ShapeMismatch(format!(
                "style decoder output present: {}, style targets present: {}",
                out.is_some(),
                side.is_some()
            ))),
        }
    }
}

/// Summed binary cross-entropy between the copy switch, given as its
/// logit `[N, 1]`, and whether each step is copyable.
fn switch_loss<B: Backend>(copy_logit: Tensor<B, 2>, align: Tensor<B, 1, Int>) -> Tensor<B, 1> {
    let [n, _] = copy_logit.dims();
    let y      = align.not_equal_elem(0).float().reshape([n, 1]);
    let one_minus_y = y.clone().mul_scalar(-1.0).add_scalar(1.0);

    let log_p   = log_sigmoid(copy_logit.clone()).clamp_min(BCE_LOG_FLOOR);
    let log_1mp = log_sigmoid(copy_logit.neg()).clamp_min(BCE_LOG_FLOOR);

    (y * log_p + one_minus_y * log_1mp).sum().neg()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::vocab::{BOS_WORD, EOS_WORD, PAD_WORD, UNK_WORD};
    use crate::ml::copy_generator::CopyGeneratorConfig;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    fn floats<const D: usize>(t: Tensor<TestBackend, D>) -> Vec<f32> {
        t.into_data().convert::<f32>().to_vec::<f32>().unwrap()
    }

    fn ints(values: &[i32]) -> Tensor<TestBackend, 1, Int> {
        Tensor::from_ints(values, &Default::default())
    }

    /// |V| = 4, C = 3
    fn scores(rows: &[[f32; 7]]) -> Tensor<TestBackend, 2> {
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Tensor::<TestBackend, 1>::from_floats(flat.as_slice(), &Default::default()).reshape([rows.len(), 7])
    }

    const ROW: [f32; 7] = [0.05, 0.0, 0.2, 0.1, 0.15, 0.3, 0.2];

    #[test]
    fn test_criterion_cases() {
        let criterion = CopyCriterion::new(4, false, 1, 1e-20);
        // known word / copyable unk / pad / unk that cannot be copied
        let loss = criterion
            .score(scores(&[ROW; 4]), ints(&[0, 2, 1, 0]), ints(&[2, 0, 1, 0]))
            .unwrap();
        let loss = floats(loss);
        assert!(approx(loss[0], -(0.2f32).ln()));
        assert!(approx(loss[1], -(0.2f32).ln()));
        assert_eq!(loss[2], 0.0);
        assert!(approx(loss[3], -(0.05f32).ln()));
    }

    #[test]
    fn test_criterion_known_and_copyable_adds_both() {
        let criterion = CopyCriterion::new(4, false, 1, 1e-20);
        let loss = criterion.score(scores(&[ROW]), ints(&[1]), ints(&[3])).unwrap();
        assert!(approx(floats(loss)[0], -(0.3f32 + 0.1).ln()));
    }

    #[test]
    fn test_force_copy_ignores_generation_of_copyable_words() {
        let criterion = CopyCriterion::new(4, true, 1, 1e-20);
        let loss = criterion
            .score(scores(&[ROW; 2]), ints(&[1, 0]), ints(&[3, 3]))
            .unwrap();
        let loss = floats(loss);
        assert!(approx(loss[0], -(0.3f32).ln()));
        assert!(approx(loss[1], -(0.1f32).ln()));
    }

    #[test]
    fn test_criterion_rejects_mismatched_rows() {
        let criterion = CopyCriterion::new(4, false, 1, 1e-20);
        let err = criterion.score(scores(&[ROW]), ints(&[0, 0]), ints(&[2])).unwrap_err();
        assert!(matches!(err, PipelineError::ShapeMismatch(_)));
    }

    fn tgt_vocab() -> Vocab {
        let counter = [("b".to_string(), 3usize), ("z".to_string(), 1)].into_iter().collect();
        Vocab::from_counter(&counter, &[UNK_WORD, PAD_WORD, BOS_WORD, EOS_WORD], None, 1)
    }

    #[test]
    fn test_collapse_folds_known_copies() {
        // tgt: <unk> <pad> <s> </s> b z     src: <unk> <pad> a b
        let tgt = tgt_vocab();
        let src = Vocab::from_tokens(&["a", "b"], &[UNK_WORD, PAD_WORD]);
        let row = [0.1f32, 0.0, 0.0, 0.0, 0.2, 0.1, 0.0, 0.05, 0.15, 0.4];
        let scores = Tensor::<TestBackend, 1>::from_floats(row.as_slice(), &Default::default())
            .reshape([1, 1, 10]);

        let out = floats(collapse_copy_scores(scores, &[0], &tgt, &[src]).unwrap());
        assert!(approx(out[4], 0.6), "b gains its copy mass");
        assert!(approx(out[1], 0.05), "<pad> is known to both vocabularies");
        assert!(approx(out[8], 0.15), "a is not in the target vocabulary");
        assert_eq!(out[9], COLLAPSED_FLOOR);
        assert_eq!(out[7], COLLAPSED_FLOOR);
        assert_eq!(out[6], 0.0, "<unk> slot is never folded");
    }

    #[test]
    fn test_collapse_uses_example_vocab_by_index() {
        let tgt = tgt_vocab();
        let vocabs = vec![
            Vocab::from_tokens(&["a"], &[UNK_WORD, PAD_WORD]),
            Vocab::from_tokens(&["b"], &[UNK_WORD, PAD_WORD]),
        ];
        let mut row = vec![0.0f32; 9];
        row[8] = 0.5;
        let scores = Tensor::<TestBackend, 1>::from_floats(row.as_slice(), &Default::default())
            .reshape([1, 1, 9]);

        let out = floats(collapse_copy_scores(scores.clone(), &[1], &tgt, &vocabs).unwrap());
        assert!(approx(out[4], 0.5));
        let out = floats(collapse_copy_scores(scores.clone(), &[0], &tgt, &vocabs).unwrap());
        assert!(approx(out[8], 0.5));
        assert!(collapse_copy_scores(scores, &[2], &tgt, &vocabs).is_err());
    }

    #[test]
    fn test_copy_corrected_target() {
        let out = copy_corrected_target(ints(&[0, 0, 5, 1]), ints(&[2, 0, 3, 0]), 6);
        let ids: Vec<i64> = out.into_data().convert::<i64>().to_vec().unwrap();
        assert_eq!(ids, vec![8, 0, 5, 1]);
    }

    #[test]
    fn test_switch_loss_is_clamped() {
        let device = Default::default();
        // step 0 is not copyable but the switch is far past saturation
        let logits = Tensor::<TestBackend, 2>::from_floats([[200.0], [0.0]], &device);
        let loss = floats(switch_loss(logits, ints(&[0, 3])))[0];
        assert!((loss - (100.0 + 2.0f32.ln())).abs() < 1e-3);

        let logits = Tensor::<TestBackend, 2>::from_floats([[40.0], [0.0]], &device);
        let loss = floats(switch_loss(logits, ints(&[0, 3])))[0];
        assert!((loss - (40.0 + 2.0f32.ln())).abs() < 1e-3);
    }

    #[test]
    fn test_saturated_switch_has_finite_gradients() {
        type Ad = burn::backend::Autodiff<NdArray>;
        let device = Default::default();
        // sigmoid(40) rounds to exactly 1 in f32
        let logits = Tensor::<Ad, 2>::from_floats([[40.0], [-40.0], [200.0]], &device).require_grad();
        let align = Tensor::<Ad, 1, Int>::from_ints([0, 3, 0], &device);

        let loss = switch_loss(logits.clone(), align);
        let grads = loss.backward();
        let grad: Vec<f32> = logits
            .grad(&grads)
            .unwrap()
            .into_data()
            .convert::<f32>()
            .to_vec()
            .unwrap();

        assert!(grad.iter().all(|g| g.is_finite()), "gradient {grad:?}");
        assert!((grad[0] - 1.0).abs() < 1e-3);
        assert!((grad[1] + 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_lambda_schedule() {
        let schedule = LambdaSchedule::default();
        assert_eq!(schedule.at(1), 0.0);
        assert_eq!(schedule.at(3), 0.0);
        assert_eq!(schedule.at(4), 0.4);
        assert_eq!(schedule.at(12), 0.4);
    }

    /// One example, src "a b" (dynamic ids 2 3), target column
    /// `<s> b zz </s>` with alignment 0 3 0 0.
    fn side(device: &<TestBackend as Backend>::Device) -> CopySide<TestBackend> {
        let mut one_hot = vec![0.0f32; 2 * 4];
        one_hot[2] = 1.0;
        one_hot[4 + 3] = 1.0;
        CopySide {
            target:    Tensor::<TestBackend, 1, Int>::from_ints([2, 4, 0, 3], device).reshape([4, 1]),
            alignment: Tensor::<TestBackend, 1, Int>::from_ints([0, 3, 0, 0], device).reshape([4, 1]),
            src_map:   Tensor::<TestBackend, 1>::from_floats(one_hot.as_slice(), device).reshape([2, 1, 4]),
            ptrs:      None,
        }
    }

    #[test]
    fn test_side_loss_statistics_and_shape() {
        let device = Default::default();
        let tgt = tgt_vocab();
        let generator = CopyGeneratorConfig::new(3, tgt.len()).init::<TestBackend>(&device);
        let output = DecoderSideOutput {
            hidden:    Tensor::<TestBackend, 3>::ones([3, 1, 3], &device),
            copy_attn: Tensor::<TestBackend, 1>::from_floats([0.0, 1.0, 0.5, 0.5, 1.0, 0.0], &device)
                .reshape([3, 1, 2]),
        };
        let src_vocabs = vec![Vocab::from_tokens(&["a", "b"], &[UNK_WORD, PAD_WORD])];
        let compute = CopyLossCompute::new(&tgt, &CopyLossConfig::default());

        let out = compute
            .side_loss(&generator, &output, &side(&device), &[0], &tgt, &src_vocabs)
            .unwrap();
        assert_eq!(out.loss.dims(), [1]);
        assert!(floats(out.loss)[0].is_finite());
        assert_eq!(out.stats.n_words, 3);
        assert!(out.stats.n_correct <= 3);
        assert!(out.stats.loss > 0.0);
    }

    #[test]
    fn test_length_normalization_divides_by_full_column() {
        let device = Default::default();
        let tgt = tgt_vocab();
        let generator = CopyGeneratorConfig::new(3, tgt.len()).init::<TestBackend>(&device);
        let output = DecoderSideOutput {
            hidden:    Tensor::<TestBackend, 3>::ones([3, 1, 3], &device),
            copy_attn: Tensor::<TestBackend, 3>::ones([3, 1, 2], &device).mul_scalar(0.5),
        };
        let src_vocabs = vec![Vocab::from_tokens(&["a", "b"], &[UNK_WORD, PAD_WORD])];

        let summed = CopyLossCompute::new(&tgt, &CopyLossConfig::default())
            .side_loss(&generator, &output, &side(&device), &[0], &tgt, &src_vocabs)
            .unwrap();
        let normalized = CopyLossCompute::new(
            &tgt,
            &CopyLossConfig {
                normalize_by_length: true,
                ..Default::default()
            },
        )
        .side_loss(&generator, &output, &side(&device), &[0], &tgt, &src_vocabs)
        .unwrap();

        // nll / 4 non-pad entries in the full column, same switch term
        let nll = summed.stats.loss as f32;
        let switch = floats(summed.loss)[0] - nll;
        assert!((floats(normalized.loss)[0] - (nll / 4.0 + switch)).abs() < 1e-4);
    }

    #[test]
    fn test_evaluation_uses_switch_mixing() {
        let device = Default::default();
        let tgt = tgt_vocab();
        let generator = CopyGeneratorConfig::new(3, tgt.len()).init::<TestBackend>(&device);
        let output = DecoderSideOutput {
            hidden:    Tensor::<TestBackend, 3>::ones([3, 1, 3], &device),
            copy_attn: Tensor::<TestBackend, 3>::ones([3, 1, 2], &device).mul_scalar(0.5),
        };
        let src_vocabs = vec![Vocab::from_tokens(&["a", "b"], &[UNK_WORD, PAD_WORD])];
        let compute = CopyLossCompute::new(&tgt, &CopyLossConfig::default());

        let train = compute
            .side_loss(&generator, &output, &side(&device), &[0], &tgt, &src_vocabs)
            .unwrap();
        let eval = compute
            .clone()
            .for_evaluation()
            .side_loss(&generator, &output, &side(&device), &[0], &tgt, &src_vocabs)
            .unwrap();
        assert_eq!(eval.stats.n_words, train.stats.n_words);
        assert!(eval.stats.loss.is_finite());
        assert!((eval.stats.loss - train.stats.loss).abs() > 1e-6);
    }

    #[test]
    fn test_side_loss_rejects_wrong_step_count() {
        let device = Default::default();
        let tgt = tgt_vocab();
        let generator = CopyGeneratorConfig::new(3, tgt.len()).init::<TestBackend>(&device);
        let output = DecoderSideOutput {
            hidden:    Tensor::<TestBackend, 3>::ones([4, 1, 3], &device),
            copy_attn: Tensor::<TestBackend, 3>::ones([4, 1, 2], &device),
        };
        let compute = CopyLossCompute::new(&tgt, &CopyLossConfig::default());
        assert!(compute
            .side_loss(&generator, &output, &side(&device), &[0], &tgt, &[])
            .is_err());
    }
}
