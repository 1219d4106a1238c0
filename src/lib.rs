#![recursion_limit = "256"]

// ============================================================
// pointer-nmt library root
// ============================================================
// Layer 1  cli          argument parsing and dispatch
// Layer 2  application  preprocess / inspect workflows
// Layer 3  domain       tokens, vocabularies, examples, errors
// Layer 4  data         reader, fields, datasets, batching
// Layer 5  ml           copy generator, copy loss, training loop
// Layer 6  infra        artifact store, statistics, metrics CSV

pub mod application;
pub mod cli;
pub mod data;
pub mod domain;
pub mod infra;
pub mod ml;
