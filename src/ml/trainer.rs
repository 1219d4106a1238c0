// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Drives an externally supplied dual-decoder model through the
// copy loss with Adam.
//
// One epoch, for every saved shard in order:
//   1. plan minibatches (pooled shuffle when training)
//   2. for every plan: Dataset::get → ExampleBatcher → decode
//      → CopyLossCompute → backward → optimiser step
//   3. accumulate content and style Statistics across shards
//
// Each shard is scored against its own source vocabularies, so
// the loss context is rebuilt per shard.
//
// The content weight λ follows the LambdaSchedule (0 for the
// first epochs, so only the style decoder is trained at first).
//
// Validation runs on the inner backend via model.valid(), with
// inference-time generator mixing and all-zero pointer masks.
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use anyhow::{Context, Result};
use burn::{
    data::dataset::Dataset,
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};

use crate::data::batcher::{CopyBatch, ExampleBatcher};
use crate::data::dataset::TextDataset;
use crate::data::iterator::{plan_minibatches, IteratorConfig};
use crate::domain::example::Example;
use crate::domain::vocab::Vocab;
use crate::infra::metrics::{EpochMetrics, MetricsLogger, Statistics};
use crate::ml::copy_loss::{CopyLossCompute, CopyLossConfig, LossOutput};
use crate::ml::decoder::DualCopyDecoder;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs:        usize,
    pub learning_rate: f64,
    pub iterator:      IteratorConfig,
    pub loss:          CopyLossConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs:        13,
            learning_rate: 1e-3,
            iterator:      IteratorConfig::default(),
            loss:          CopyLossConfig::default(),
        }
    }
}

/// Content and style totals over a run of batches.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpochStats {
    pub content: Statistics,
    pub style:   Option<Statistics>,
}

impl EpochStats {
    pub fn update<B: Backend>(&mut self, out: &LossOutput<B>) {
        self.content.update(&out.content);
        if let Some(style) = &out.style {
            self.style.get_or_insert_with(Statistics::default).update(style);
        }
    }

    /// Fold another shard's totals into these.
    pub fn merge(&mut self, other: &EpochStats) {
        self.content.update(&other.content);
        if let Some(style) = &other.style {
            self.style.get_or_insert_with(Statistics::default).update(style);
        }
    }
}

/// Everything the loss needs besides the model and the batch.
pub struct LossContext<'a> {
    pub compute:   &'a CopyLossCompute,
    pub dataset:   &'a TextDataset,
    pub tgt_vocab: &'a Vocab,
    pub lambda:    f32,
}

impl LossContext<'_> {
    fn loss<B: Backend, M: DualCopyDecoder<B>>(
        &self,
        model: &M,
        batch: &CopyBatch<B>,
    ) -> crate::domain::errors::Result<LossOutput<B>> {
        let output = model.decode(batch)?;
        self.compute.compute_loss(
            model.generator(),
            &output,
            batch,
            self.dataset,
            self.tgt_vocab,
            self.lambda,
        )
    }
}

/// The shard-independent part of a [`LossContext`].
#[derive(Clone, Copy)]
pub struct EpochLoss<'a> {
    pub compute:   &'a CopyLossCompute,
    pub tgt_vocab: &'a Vocab,
    pub lambda:    f32,
}

impl<'a> EpochLoss<'a> {
    pub fn on<'b>(&self, dataset: &'b TextDataset) -> LossContext<'b>
    where
        'a: 'b,
    {
        LossContext {
            compute:   self.compute,
            dataset,
            tgt_vocab: self.tgt_vocab,
            lambda:    self.lambda,
        }
    }
}

fn examples_for(dataset: &TextDataset, plan: &[usize]) -> Vec<Example> {
    plan.iter().filter_map(|&i| dataset.get(i)).collect()
}

// ─── Training ─────────────────────────────────────────────────────────────────
/// Forward, backward and one optimiser update on a single batch.
pub fn train_step<B, M, O>(
    model: M,
    optim: &mut O,
    batch: &CopyBatch<B>,
    ctx: &LossContext<'_>,
    lr: f64,
) -> Result<(M, LossOutput<B>)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + DualCopyDecoder<B>,
    O: Optimizer<M, B>,
{
    let out = ctx.loss(&model, batch)?;

    let grads = out.loss.backward();
    let grads = GradientsParams::from_grads(grads, &model);
    let model = optim.step(lr, model, grads);
    Ok((model, out))
}

/// One pass over a single shard, `ctx.dataset`.
pub fn train_epoch<B, M, O>(
    mut model: M,
    optim: &mut O,
    batcher: &ExampleBatcher<B>,
    ctx: &LossContext<'_>,
    iterator: &IteratorConfig,
    lr: f64,
) -> Result<(M, EpochStats)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + DualCopyDecoder<B>,
    O: Optimizer<M, B>,
{
    let mut stats = EpochStats::default();
    for plan in plan_minibatches(ctx.dataset.examples(), iterator) {
        let batch = batcher.batch(&examples_for(ctx.dataset, &plan))?;
        let (next, out) = train_step(model, optim, &batch, ctx, lr)?;
        model = next;
        stats.update(&out);
    }
    Ok((model, stats))
}

/// One pass over every shard, in order.
pub fn train_shards<B, M, O>(
    mut model: M,
    optim: &mut O,
    batcher: &ExampleBatcher<B>,
    shards: &[TextDataset],
    loss: &EpochLoss<'_>,
    iterator: &IteratorConfig,
    lr: f64,
) -> Result<(M, EpochStats)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + DualCopyDecoder<B>,
    O: Optimizer<M, B>,
{
    let mut stats = EpochStats::default();
    for (n, shard) in shards.iter().enumerate() {
        let (next, shard_stats) = train_epoch(model, optim, batcher, &loss.on(shard), iterator, lr)
            .with_context(|| format!("shard {}", n + 1))?;
        model = next;
        stats.merge(&shard_stats);
    }
    Ok((model, stats))
}

// ─── Validation ───────────────────────────────────────────────────────────────
/// Loss statistics without gradients. `ctx.compute` should be an
/// evaluation-mode loss.
pub fn evaluate<B, M>(
    model: &M,
    batcher: &ExampleBatcher<B>,
    ctx: &LossContext<'_>,
    iterator: &IteratorConfig,
) -> Result<EpochStats>
where
    B: Backend,
    M: DualCopyDecoder<B>,
{
    let iterator = IteratorConfig {
        train: false,
        ..iterator.clone()
    };
    let mut stats = EpochStats::default();
    for plan in plan_minibatches(ctx.dataset.examples(), &iterator) {
        let batch = batcher.batch(&examples_for(ctx.dataset, &plan))?;
        stats.update(&ctx.loss(model, &batch)?);
    }
    Ok(stats)
}

/// [`evaluate`] over every shard, totals combined.
pub fn evaluate_shards<B, M>(
    model: &M,
    batcher: &ExampleBatcher<B>,
    shards: &[TextDataset],
    loss: &EpochLoss<'_>,
    iterator: &IteratorConfig,
) -> Result<EpochStats>
where
    B: Backend,
    M: DualCopyDecoder<B>,
{
    let mut stats = EpochStats::default();
    for (n, shard) in shards.iter().enumerate() {
        let shard_stats = evaluate(model, batcher, &loss.on(shard), iterator)
            .with_context(|| format!("shard {}", n + 1))?;
        stats.merge(&shard_stats);
    }
    Ok(stats)
}

// ─── Full run ─────────────────────────────────────────────────────────────────
/// Data shared by every epoch of a run.
pub struct TrainingData<'a, B: AutodiffBackend> {
    /// Train shards, visited in order every epoch
    pub train:         &'a [TextDataset],
    pub valid:         &'a [TextDataset],
    pub tgt_vocab:     &'a Vocab,
    pub train_batcher: ExampleBatcher<B>,
    pub valid_batcher: ExampleBatcher<B::InnerBackend>,
}

/// Train for `config.epochs` epochs, validating and logging after each.
pub fn run_training<B, M>(
    mut model: M,
    data: &TrainingData<'_, B>,
    config: &TrainingConfig,
    logger: Option<&MetricsLogger>,
) -> Result<M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + DualCopyDecoder<B>,
    M::InnerModule: DualCopyDecoder<B::InnerBackend>,
{
    let mut optim      = AdamConfig::new().with_epsilon(1e-8).init();
    let train_compute  = CopyLossCompute::new(data.tgt_vocab, &config.loss);
    let valid_compute  = train_compute.clone().for_evaluation();

    for epoch in 1..=config.epochs {
        let lambda = config.loss.lambda.at(epoch);
        tracing::info!("Epoch {epoch} lambda: {lambda:.1}");

        let iterator = IteratorConfig {
            seed: config.iterator.seed.wrapping_add(epoch as u64),
            ..config.iterator.clone()
        };
        let train_loss = EpochLoss {
            compute:   &train_compute,
            tgt_vocab: data.tgt_vocab,
            lambda,
        };
        let (next, train_stats) = train_shards(
            model,
            &mut optim,
            &data.train_batcher,
            data.train,
            &train_loss,
            &iterator,
            config.learning_rate,
        )
        .with_context(|| format!("training epoch {epoch}"))?;
        model = next;

        let valid_loss = EpochLoss {
            compute: &valid_compute,
            ..train_loss
        };
        let valid_stats = evaluate_shards(&model.valid(), &data.valid_batcher, data.valid, &valid_loss, &iterator)
            .with_context(|| format!("validating epoch {epoch}"))?;

        tracing::info!(
            "Epoch {:>3}/{} | train ppl={:.4} acc={:.2} | valid ppl={:.4} acc={:.2}",
            epoch,
            config.epochs,
            train_stats.content.ppl(),
            train_stats.content.accuracy(),
            valid_stats.content.ppl(),
            valid_stats.content.accuracy(),
        );
        if let Some(style) = &valid_stats.style {
            tracing::info!("Epoch {epoch} style valid ppl={:.4} acc={:.2}", style.ppl(), style.accuracy());
        }

        if let Some(logger) = logger {
            logger.log(&EpochMetrics::new(epoch, lambda, valid_stats.content, valid_stats.style))?;
        }
    }

    tracing::info!("Training complete!");
    Ok(model)
}
