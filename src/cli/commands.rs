// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `preprocess` and `inspect`,
// and all their configurable flags.
//
// clap's derive macros automatically generate:
//   - help text (--help)
//   - error messages for missing args
//   - type conversion (string → usize, PathBuf, enums, etc.)
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::application::inspect_use_case::InspectConfig;
use crate::application::preprocess_use_case::{CorpusPaths, PreprocessConfig};
use crate::data::dataset::AssembleOptions;
use crate::data::iterator::{BatchType, IteratorConfig};

/// The two top-level subcommands available to the user
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read parallel corpus files and save dataset shards and vocabularies
    Preprocess(PreprocessArgs),

    /// Summarise saved shards and collate a trial minibatch
    Inspect(InspectArgs),
}

/// All arguments for the `preprocess` command.
#[derive(Args, Debug)]
pub struct PreprocessArgs {
    /// Training source (record) corpus, the shard-driving side
    #[arg(long)]
    pub train_src1: PathBuf,

    /// Training content plan (integer indices into src1)
    #[arg(long)]
    pub train_tgt1: Option<PathBuf>,

    /// Training copy source for the content decoder
    #[arg(long)]
    pub train_src2: Option<PathBuf>,

    /// Training content decoder target
    #[arg(long)]
    pub train_tgt2: Option<PathBuf>,

    /// Training copy source for the style decoder
    #[arg(long)]
    pub train_ref_src: Option<PathBuf>,

    /// Training style decoder target
    #[arg(long)]
    pub train_ref_tgt: Option<PathBuf>,

    /// Training pointer file for the content decoder
    #[arg(long)]
    pub train_ptr: Option<PathBuf>,

    /// Training pointer file for the style decoder
    #[arg(long)]
    pub train_ref_ptr: Option<PathBuf>,

    /// Validation source corpus; validation is skipped without it
    #[arg(long)]
    pub valid_src1: Option<PathBuf>,

    #[arg(long)]
    pub valid_tgt1: Option<PathBuf>,

    #[arg(long)]
    pub valid_src2: Option<PathBuf>,

    #[arg(long)]
    pub valid_tgt2: Option<PathBuf>,

    #[arg(long)]
    pub valid_ref_src: Option<PathBuf>,

    #[arg(long)]
    pub valid_ref_tgt: Option<PathBuf>,

    #[arg(long)]
    pub valid_ptr: Option<PathBuf>,

    #[arg(long)]
    pub valid_ref_ptr: Option<PathBuf>,

    /// Output directory for shards, vocab.json and the saved config
    #[arg(long, default_value = "data")]
    pub save_data: PathBuf,

    /// File name prefix of every shard
    #[arg(long, default_value = "demo")]
    pub prefix: String,

    /// Approximate bytes per shard (0 = one shard per corpus)
    #[arg(long, default_value_t = 0)]
    pub max_shard_size: u64,

    /// Maximum source length kept by the length filter
    #[arg(long, default_value_t = 50)]
    pub src_seq_length: usize,

    /// Maximum target length kept by the length filter
    #[arg(long, default_value_t = 50)]
    pub tgt_seq_length: usize,

    /// Truncate source lines to this many tokens (0 = no truncation)
    #[arg(long, default_value_t = 0)]
    pub src_seq_length_trunc: usize,

    /// Truncate target lines to this many tokens (0 = no truncation)
    #[arg(long, default_value_t = 0)]
    pub tgt_seq_length_trunc: usize,

    /// Skip building per-example dynamic dictionaries
    #[arg(long)]
    pub no_dynamic_dict: bool,

    /// Keep every example regardless of length and pointers
    #[arg(long)]
    pub no_filter: bool,
}

impl PreprocessArgs {
    fn valid_paths(&self) -> Option<CorpusPaths> {
        let src1 = self.valid_src1.clone()?;
        Some(CorpusPaths {
            src1,
            tgt1:         self.valid_tgt1.clone(),
            src2:         self.valid_src2.clone(),
            tgt2:         self.valid_tgt2.clone(),
            ref_src:      self.valid_ref_src.clone(),
            ref_tgt:      self.valid_ref_tgt.clone(),
            pointers:     self.valid_ptr.clone(),
            ref_pointers: self.valid_ref_ptr.clone(),
        })
    }
}

/// Convert CLI PreprocessArgs into the application-layer config.
/// The application layer never sees clap types.
impl From<PreprocessArgs> for PreprocessConfig {
    fn from(a: PreprocessArgs) -> Self {
        let valid = a.valid_paths();
        PreprocessConfig {
            train: CorpusPaths {
                src1:         a.train_src1,
                tgt1:         a.train_tgt1,
                src2:         a.train_src2,
                tgt2:         a.train_tgt2,
                ref_src:      a.train_ref_src,
                ref_tgt:      a.train_ref_tgt,
                pointers:     a.train_ptr,
                ref_pointers: a.train_ref_ptr,
            },
            valid,
            save_data:            a.save_data,
            prefix:               a.prefix,
            shard_size:           a.max_shard_size,
            src_seq_length_trunc: a.src_seq_length_trunc,
            tgt_seq_length_trunc: a.tgt_seq_length_trunc,
            assemble: AssembleOptions {
                dynamic_dict:    !a.no_dynamic_dict,
                use_filter_pred: !a.no_filter,
                src_seq_length:  a.src_seq_length,
                tgt_seq_length:  a.tgt_seq_length,
            },
        }
    }
}

/// How `--batch-type` counts toward the batch size
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum BatchTypeArg {
    Sents,
    Tokens,
}

impl From<BatchTypeArg> for BatchType {
    fn from(b: BatchTypeArg) -> Self {
        match b {
            BatchTypeArg::Sents  => BatchType::Sents,
            BatchTypeArg::Tokens => BatchType::Tokens,
        }
    }
}

/// All arguments for the `inspect` command
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Directory `preprocess` wrote into
    #[arg(long, default_value = "data")]
    pub save_data: PathBuf,

    #[arg(long, default_value = "demo")]
    pub prefix: String,

    /// Which corpus to inspect: train or valid
    #[arg(long, default_value = "train")]
    pub corpus_type: String,

    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,

    #[arg(long, value_enum, default_value = "sents")]
    pub batch_type: BatchTypeArg,

    /// Seed for the training-order pool shuffle
    #[arg(long, default_value_t = 3435)]
    pub seed: u64,
}

impl From<InspectArgs> for InspectConfig {
    fn from(a: InspectArgs) -> Self {
        let train = a.corpus_type == "train";
        InspectConfig {
            save_data:   a.save_data,
            prefix:      a.prefix,
            corpus_type: a.corpus_type,
            iterator: IteratorConfig {
                batch_size: a.batch_size,
                batch_type: a.batch_type.into(),
                train,
                seed:       a.seed,
            },
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    #[test]
    fn test_preprocess_args_convert() {
        let cli = Cli::try_parse_from([
            "pointer-nmt",
            "preprocess",
            "--train-src1",
            "s1.txt",
            "--train-tgt2",
            "t2.txt",
            "--valid-src1",
            "v1.txt",
            "--no-filter",
        ])
        .unwrap();
        let Commands::Preprocess(args) = cli.command else {
            panic!("expected preprocess");
        };
        let cfg: PreprocessConfig = args.into();
        assert_eq!(cfg.train.src1, PathBuf::from("s1.txt"));
        assert_eq!(cfg.train.tgt2, Some(PathBuf::from("t2.txt")));
        assert_eq!(cfg.valid.map(|v| v.src1), Some(PathBuf::from("v1.txt")));
        assert!(!cfg.assemble.use_filter_pred);
        assert!(cfg.assemble.dynamic_dict);
    }

    #[test]
    fn test_inspect_valid_is_not_shuffled() {
        let cli = Cli::try_parse_from([
            "pointer-nmt",
            "inspect",
            "--corpus-type",
            "valid",
            "--batch-type",
            "tokens",
        ])
        .unwrap();
        let Commands::Inspect(args) = cli.command else {
            panic!("expected inspect");
        };
        let cfg: InspectConfig = args.into();
        assert!(!cfg.iterator.train);
        assert_eq!(cfg.iterator.batch_type, BatchType::Tokens);
    }
}
