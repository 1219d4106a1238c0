// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates all the other layers to accomplish
// a specific goal (preprocessing a corpus or inspecting the
// result).
//
// Rules for this layer:
//   - No tensor math or loss code here
//   - No argument parsing or printing here (that's Layer 1)
//   - File access goes through Layer 4 readers and the
//     Layer 6 artifact store
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// Raw corpus files → dataset shards + vocabularies
pub mod preprocess_use_case;

// Saved artifacts → summary and a trial minibatch
pub mod inspect_use_case;
