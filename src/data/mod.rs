// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// This layer handles everything from raw parallel corpora all
// the way to tensor batches the copy loss can consume.
//
// The pipeline flows in this order:
//
//   corpus files (src1, tgt1, src2, tgt2, ref_src, ref_tgt)
//       │
//       ▼
//   ShardedCorpusReader → tokenizes lines, reads in lockstep,
//       │                 cuts the stream into byte-bounded shards
//       ▼
//   TextDataset         → joins sides into Examples, attaches
//       │                 dynamic dictionaries, filters by length
//       ▼
//   FieldSet            → builds vocabularies, pads, numericalizes
//       │
//       ▼
//   plan_minibatches    → groups examples by (token) batch size
//       │
//       ▼
//   ExampleBatcher      → stacks a minibatch into a CopyBatch
//
// Each module is responsible for exactly one step.
//
// Reference: Burn Book §4 (Datasets and Dataloaders)
//            Rust Book §13 (Iterators and Closures)

/// Line-by-line, sharded corpus reading
pub mod reader;

/// Field definitions: vocabulary, padding, numericalization
pub mod field;

/// Host-side collation of copy data into dense buffers
pub mod collate;

/// Per-example source vocabularies for copying
pub mod dynamic_dict;

/// Joins corpora into Examples; implements Burn's Dataset trait
pub mod dataset;

/// Minibatch planning (sentence or token batch sizes)
pub mod iterator;

/// Turns planned minibatches into tensor batches
pub mod batcher;
