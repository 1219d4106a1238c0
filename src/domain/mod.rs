// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust types describing what the pipeline works on:
// tokens, examples, vocabularies, pointer tables, errors.
//
// Rules for this layer:
//   - NO burn tensor types
//   - NO file I/O except through the Persistable trait
//   - Only plain structs, enums, and traits
//
// Everything here is unit-testable without a backend.

/// Error taxonomy shared by every library layer
pub mod errors;

/// Per-line word / feature / character extraction
pub mod token;

/// String <-> id vocabularies (fixed and dynamic)
pub mod vocab;

/// Explicit target → source span alignments
pub mod pointer;

/// Sides, records, joined examples and column addressing
pub mod example;

/// Core abstractions other layers implement
pub mod traits;
