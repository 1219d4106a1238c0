// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Handles all cross-cutting concerns that don't belong in
// any specific business layer:
//
//   checkpoint.rs    Artifact persistence
//                    Writes vocabularies, the preprocessing
//                    config and dataset shards as JSON, and
//                    loads them back in shard order so every
//                    later stage sees the same fields.
//
//   metrics.rs       Training statistics and metrics logging
//                    Accumulates loss / word / accuracy totals
//                    per decoder and writes one CSV row per
//                    epoch for later analysis and plotting.
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)

/// Vocabulary, config and dataset shard persistence
pub mod checkpoint;

/// Per-decoder statistics and the metrics CSV logger
pub mod metrics;
