// ============================================================
// Layer 4 — Minibatch Planning
// ============================================================
// Decides which examples go into which minibatch. Produces lists
// of example positions; the batcher turns each list into tensors.
//
// Batch size is measured by a BatchSizer:
//
//   Sentences  one unit per example
//   Tokens     count × the longest (src1 + 2) or (tgt1 + 1) seen
//              so far in the batch, whichever is larger, so that
//              padded batches stay roughly the same size
//
// Filling a batch: examples are appended until the size equals
// the limit (emit) or exceeds it (emit everything but the last
// example, which starts the next batch).
//
// Training uses a pool: shuffle, cut into chunks of 100 batches,
// sort each chunk by length, batch it, then shuffle the batches.
// Evaluation batches in corpus order. Either way each batch is
// finally sorted by decreasing length.
//
// Reference: rand crate documentation (SliceRandom, SeedableRng)

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::domain::example::{Example, Side};

/// Batches per sorting pool.
const POOL_FACTOR: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchType {
    Sents,
    Tokens,
}

// ─── BatchSizeAccumulator ─────────────────────────────────────────────────────
/// Running maxima for token-based batch sizing, scoped to one plan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSizeAccumulator {
    max_src_in_batch: usize,
    max_tgt_in_batch: usize,
}

impl BatchSizeAccumulator {
    /// Size of the current batch after adding `example` as its
    /// `count`-th member. `count == 1` starts a new batch.
    pub fn update(&mut self, example: &Example, count: usize) -> usize {
        if count == 1 {
            self.max_src_in_batch = 0;
            self.max_tgt_in_batch = 0;
        }
        self.max_src_in_batch = self.max_src_in_batch.max(example.len_of(Side::Src1) + 2);
        self.max_tgt_in_batch = self.max_tgt_in_batch.max(example.len_of(Side::Tgt1) + 1);
        (count * self.max_src_in_batch).max(count * self.max_tgt_in_batch)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchSizer {
    Sentences,
    Tokens(BatchSizeAccumulator),
}

impl BatchSizer {
    pub fn new(batch_type: BatchType) -> Self {
        match batch_type {
            BatchType::Sents  => Self::Sentences,
            BatchType::Tokens => Self::Tokens(BatchSizeAccumulator::default()),
        }
    }

    fn size(&mut self, example: &Example, count: usize) -> usize {
        match self {
            Self::Sentences => count,
            Self::Tokens(acc) => acc.update(example, count),
        }
    }
}

// ─── Planning ─────────────────────────────────────────────────────────────────
/// Sort key: source length, then target length.
fn sort_key(example: &Example) -> (usize, usize) {
    (example.len_of(Side::Src1), example.len_of(Side::Tgt1))
}

/// Group `order` (positions into `examples`) into minibatches of at
/// most `batch_size` units.
pub fn batch(
    order: &[usize],
    examples: &[Example],
    batch_size: usize,
    sizer: &mut BatchSizer,
) -> Vec<Vec<usize>> {
    let mut batches   = Vec::new();
    let mut minibatch: Vec<usize> = Vec::new();

    for &pos in order {
        minibatch.push(pos);
        let size = sizer.size(&examples[pos], minibatch.len());
        if size == batch_size {
            batches.push(std::mem::take(&mut minibatch));
        } else if size > batch_size {
            // Emit all but the newcomer, which starts the next batch
            // and re-seeds the running size. An oversized newcomer is
            // emitted alone by the next overflow or at the end.
            let last = minibatch.pop().unwrap_or(pos);
            if !minibatch.is_empty() {
                batches.push(std::mem::take(&mut minibatch));
            }
            minibatch.push(last);
            sizer.size(&examples[last], 1);
        }
    }
    if !minibatch.is_empty() {
        batches.push(minibatch);
    }
    batches
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IteratorConfig {
    pub batch_size: usize,
    pub batch_type: BatchType,
    pub train:      bool,
    pub seed:       u64,
}

impl Default for IteratorConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            batch_type: BatchType::Sents,
            train:      true,
            seed:       3435,
        }
    }
}

/// Plan every minibatch of one epoch over `examples`.
pub fn plan_minibatches(examples: &[Example], config: &IteratorConfig) -> Vec<Vec<usize>> {
    let batch_size = config.batch_size.max(1);
    let mut sizer  = BatchSizer::new(config.batch_type);
    let mut order: Vec<usize> = (0..examples.len()).collect();

    let mut batches = if config.train {
        let mut rng = StdRng::seed_from_u64(config.seed);
        order.shuffle(&mut rng);

        let mut planned = Vec::new();
        for mut chunk in batch(&order, examples, batch_size * POOL_FACTOR, &mut sizer) {
            chunk.sort_by_key(|&p| sort_key(&examples[p]));
            let mut pool = batch(&chunk, examples, batch_size, &mut sizer);
            pool.shuffle(&mut rng);
            planned.extend(pool);
        }
        planned
    } else {
        batch(&order, examples, batch_size, &mut sizer)
    };

    for b in &mut batches {
        b.sort_by_key(|&p| std::cmp::Reverse(sort_key(&examples[p])));
    }

    tracing::debug!(
        "Planned {} minibatches over {} examples (train = {})",
        batches.len(),
        examples.len(),
        config.train
    );
    batches
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::example::SideColumns;

    fn ex(src_len: usize, tgt_len: usize) -> Example {
        let mut e = Example::default();
        for (side, n) in [(Side::Src1, src_len), (Side::Tgt1, tgt_len)] {
            e.sides.insert(
                side,
                SideColumns {
                    words: vec!["w".to_string(); n],
                    ..Default::default()
                },
            );
        }
        e
    }

    #[test]
    fn test_accumulator_resets_on_new_batch() {
        let mut acc = BatchSizeAccumulator::default();
        assert_eq!(acc.update(&ex(3, 1), 1), 5);
        assert_eq!(acc.update(&ex(1, 9), 2), 20);
        assert_eq!(acc.update(&ex(1, 1), 1), 3);
    }

    #[test]
    fn test_sentence_batches_in_order() {
        let data: Vec<Example> = (0..5).map(|_| ex(2, 2)).collect();
        let order: Vec<usize> = (0..5).collect();
        let b = batch(&order, &data, 2, &mut BatchSizer::Sentences);
        assert_eq!(b, vec![vec![0, 1], vec![2, 3], vec![4]]);
    }

    #[test]
    fn test_token_overflow_starts_next_batch_with_last_example() {
        // src1 + 2 = 4 tokens each; limit 10 fits two (8), a third overflows (12)
        let data: Vec<Example> = (0..4).map(|_| ex(2, 1)).collect();
        let order: Vec<usize> = (0..4).collect();
        let b = batch(&order, &data, 10, &mut BatchSizer::new(BatchType::Tokens));
        assert_eq!(b, vec![vec![0, 1], vec![2, 3]]);
    }

    #[test]
    fn test_oversized_example_is_carried_then_emitted_alone() {
        // token sizes 4, 11, 4, 4 against a limit of 10
        let data = vec![ex(2, 1), ex(9, 1), ex(2, 1), ex(2, 1)];
        let order: Vec<usize> = (0..4).collect();
        let mut sizer = BatchSizer::new(BatchType::Tokens);
        let b = batch(&order, &data, 10, &mut sizer);
        // the batch after the oversized one is sized from its own maxima
        assert_eq!(b, vec![vec![0], vec![1], vec![2, 3]]);

        let b = batch(&[1], &data, 10, &mut BatchSizer::new(BatchType::Tokens));
        assert_eq!(b, vec![vec![1]]);
    }

    #[test]
    fn test_eval_plan_sorts_within_batch_descending() {
        let data = vec![ex(1, 1), ex(3, 1), ex(2, 5), ex(2, 1)];
        let config = IteratorConfig {
            batch_size: 2,
            train: false,
            ..Default::default()
        };
        let plan = plan_minibatches(&data, &config);
        assert_eq!(plan, vec![vec![1, 0], vec![2, 3]]);
    }

    #[test]
    fn test_train_plan_is_seeded_and_complete() {
        let data: Vec<Example> = (0..50).map(|i| ex(1 + i % 7, 1 + i % 3)).collect();
        let config = IteratorConfig {
            batch_size: 4,
            ..Default::default()
        };
        let a = plan_minibatches(&data, &config);
        let b = plan_minibatches(&data, &config);
        assert_eq!(a, b);

        let mut seen: Vec<usize> = a.into_iter().flatten().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }
}
