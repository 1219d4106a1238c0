// ============================================================
// Layer 5 — ML / Loss Layer (Burn)
// ============================================================
// Everything that turns decoder outputs into a training signal.
//
// What's in this layer:
//
//   copy_generator.rs   Output layer over the extended dictionary
//                       (fixed target vocabulary + per-example
//                       dynamic words), mixing generation and
//                       copying with a learned switch
//
//   copy_loss.rs        Copy-aware NLL, switch BCE, score
//                       collapsing, per-decoder statistics and
//                       the content / style λ weighting
//
//   decoder.rs          The boundary to the (external) dual
//                       decoder model
//
//   trainer.rs          Training step, epoch loop and
//                       validation with Adam
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            See et al. (2017) Get To The Point

/// Copy generator module and distribution mixing
pub mod copy_generator;

/// Copy loss, score collapsing and lambda schedule
pub mod copy_loss;

/// Dual-decoder model boundary
pub mod decoder;

/// Training and validation loops
pub mod trainer;
