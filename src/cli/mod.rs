// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `preprocess`   reads the parallel corpus files and saves
//                     dataset shards plus vocabularies
//   2. `inspect`      reloads those artifacts and reports on them
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, InspectArgs, PreprocessArgs};

use crate::application::inspect_use_case::InspectUseCase;
use crate::application::preprocess_use_case::PreprocessUseCase;

/// The main CLI struct, parsed by clap's Parser derive.
#[derive(Parser, Debug)]
#[command(
    name = "pointer-nmt",
    version = "0.1.0",
    about = "Prepare copy/pointer seq2seq corpora: shards, vocabularies and copy annotations."
)]
pub struct Cli {
    /// The subcommand to run (preprocess or inspect)
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Preprocess(args) => run_preprocess(args),
            Commands::Inspect(args)    => run_inspect(args),
        }
    }
}

fn run_preprocess(args: PreprocessArgs) -> Result<()> {
    tracing::info!("Preprocessing corpus rooted at: {}", args.train_src1.display());

    let report = PreprocessUseCase::new(args.into()).execute()?;

    println!(
        "Preprocessing complete: {} train shards ({} examples), {} valid shards ({} examples).",
        report.train_shards, report.train_examples, report.valid_shards, report.valid_examples
    );
    for (name, size) in &report.vocab_sizes {
        println!("  {name:<12} {size}");
    }
    Ok(())
}

fn run_inspect(args: InspectArgs) -> Result<()> {
    let report = InspectUseCase::new(args.into()).execute()?;

    println!("Shards:          {}", report.shards);
    println!("Examples:        {}", report.examples);
    println!("Mean src length: {:.2}", report.mean_src_len);
    println!("Pointers:        {}", report.has_pointers);
    println!("Minibatches:     {} (first shard)", report.minibatches);
    if let (Some(tgt), Some(src_map)) = (report.target_dims, report.src_map_dims) {
        println!("First batch:     target {tgt:?}, src_map {src_map:?}");
    }
    println!("Style decoder:   {}", report.has_style);
    Ok(())
}
