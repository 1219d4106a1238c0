// ============================================================
// Layer 2 — InspectUseCase
// ============================================================
// Reloads what `preprocess` saved and reports on it, without
// touching the raw corpus again:
//
//   Step 1: Load vocabularies into a fresh FieldSet     (Layer 6 - infra)
//   Step 2: Stream the shards of the corpus, in order   (Layer 6 - infra)
//   Step 3: Summarise examples and dynamic vocabularies (Layer 4 - data)
//   Step 4: Plan minibatches over the first shard       (Layer 4 - data)
//   Step 5: Collate the first minibatch on the CPU      (Layer 4 - data)
//
// Only the first shard is kept after it has been counted.
//
// Step 5 exercises the same collation path training uses, so a
// vocabulary / shard mismatch shows up here instead of mid-run.
//
// Reference: Burn Book §4 (Datasets and Batchers)

use anyhow::{Context, Result};
use burn::backend::NdArray;
use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::data::batcher::ExampleBatcher;
use crate::data::dataset::TextDataset;
use crate::data::field::FieldSet;
use crate::data::iterator::{plan_minibatches, IteratorConfig};
use crate::domain::example::{Example, Side};
use crate::infra::checkpoint::ArtifactStore;

type InspectBackend = NdArray;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectConfig {
    /// Directory `preprocess` wrote into
    pub save_data:   PathBuf,
    pub prefix:      String,
    /// "train" or "valid"
    pub corpus_type: String,
    pub iterator:    IteratorConfig,
}

impl Default for InspectConfig {
    fn default() -> Self {
        Self {
            save_data:   PathBuf::from("data"),
            prefix:      "demo".to_string(),
            corpus_type: "train".to_string(),
            iterator:    IteratorConfig::default(),
        }
    }
}

/// Summary of one preprocessed corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct InspectReport {
    pub shards:        usize,
    pub examples:      usize,
    pub mean_src_len:  f64,
    pub has_pointers:  bool,
    pub minibatches:   usize,
    /// `[tgt_len, batch]` of the first minibatch's content target
    pub target_dims:   Option<[usize; 2]>,
    /// `[src_len, batch, dynamic_vocab]` of its source map
    pub src_map_dims:  Option<[usize; 3]>,
    pub has_style:     bool,
}

pub struct InspectUseCase {
    config: InspectConfig,
}

impl InspectUseCase {
    pub fn new(config: InspectConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<InspectReport> {
        let cfg   = &self.config;
        let store = ArtifactStore::new(&cfg.save_data, cfg.prefix.clone())?;

        // ── Steps 1-3: reload artifacts and summarise ─────────────────────────
        let vocab = store.load_vocab()?;

        let mut first: Option<TextDataset> = None;
        let mut shards       = 0;
        let mut examples     = 0;
        let mut src_total    = 0.0;
        let mut has_pointers = false;
        for shard in store.shards(&cfg.corpus_type)? {
            let shard = shard?;
            shards       += 1;
            examples     += shard.len();
            src_total    += shard.mean_src_len() * shard.len() as f64;
            has_pointers |= shard.has_pointers();
            if first.is_none() {
                first = Some(shard);
            }
        }
        let mean_src_len = src_total / examples.max(1) as f64;

        let (n_src_feats, n_tgt_feats) = first
            .as_ref()
            .map_or((0, 0), |d| (d.n_src_feats(), d.n_tgt_feats()));
        let mut fields = FieldSet::text_fields(n_src_feats, n_tgt_feats);
        fields.load_vocab_table(vocab);
        for (name, field) in fields.iter() {
            if let Some(v) = field.vocab() {
                tracing::info!("vocab '{}': {} entries", name, v.len());
            }
        }

        tracing::info!(
            "{}: {} shards, {} examples, mean src length {:.2}",
            cfg.corpus_type,
            shards,
            examples,
            mean_src_len
        );

        let mut report = InspectReport {
            shards,
            examples,
            mean_src_len,
            has_pointers,
            minibatches: 0,
            target_dims: None,
            src_map_dims: None,
            has_style: false,
        };

        // ── Steps 4-5: plan and collate over the first shard ──────────────────
        let Some(first) = first else {
            return Ok(report);
        };
        let plans = plan_minibatches(first.examples(), &cfg.iterator);
        report.minibatches = plans.len();
        tracing::info!("First shard plans {} minibatches", plans.len());

        let Some(plan) = plans.first() else {
            return Ok(report);
        };
        let items: Vec<Example> = plan.iter().filter_map(|&i| first.get(i)).collect();
        if items.first().and_then(|e| e.side(Side::Tgt2)).is_none() {
            tracing::info!("No content target in this corpus, skipping collation");
            return Ok(report);
        }
        let batcher = ExampleBatcher::<InspectBackend>::new(
            fields,
            Default::default(),
            cfg.iterator.train,
        );
        let batch = batcher
            .batch(&items)
            .context("Collating the first minibatch")?;

        report.target_dims  = Some(batch.content.target.dims());
        report.src_map_dims = Some(batch.content.src_map.dims());
        report.has_style    = batch.style.is_some();
        tracing::info!(
            "First minibatch: target {:?}, src_map {:?}, style decoder {}",
            report.target_dims,
            report.src_map_dims,
            if report.has_style { "present" } else { "absent" }
        );

        Ok(report)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::preprocess_use_case::{CorpusPaths, PreprocessConfig, PreprocessUseCase};
    use std::fs;
    use std::path::Path;

    fn write(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, lines.join("\n") + "\n").unwrap();
        path
    }

    #[test]
    fn test_inspect_after_preprocess() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        PreprocessUseCase::new(PreprocessConfig {
            train: CorpusPaths {
                src1: write(dir.path(), "src1.txt", &["a b c", "d e"]),
                tgt1: Some(write(dir.path(), "tgt1.txt", &["0 1", "1"])),
                src2: Some(write(dir.path(), "src2.txt", &["a b c", "d e"])),
                tgt2: Some(write(dir.path(), "tgt2.txt", &["b c", "e x d"])),
                ..Default::default()
            },
            save_data: out.clone(),
            ..Default::default()
        })
        .execute()
        .unwrap();

        let report = InspectUseCase::new(InspectConfig {
            save_data: out,
            iterator: IteratorConfig {
                train: false,
                ..Default::default()
            },
            ..Default::default()
        })
        .execute()
        .unwrap();

        assert_eq!(report.shards, 1);
        assert_eq!(report.examples, 2);
        assert!((report.mean_src_len - 2.5).abs() < 1e-9);
        assert_eq!(report.minibatches, 1);
        // <s> e x d </s>
        assert_eq!(report.target_dims, Some([5, 2]));
        // src2 length 3, dynamic vocab <unk> <pad> + 3 words
        assert_eq!(report.src_map_dims, Some([3, 2, 5]));
        assert!(!report.has_style);
    }

    #[test]
    fn test_inspect_sums_over_every_shard() {
        let dir   = tempfile::tempdir().unwrap();
        let out   = dir.path().join("out");
        let lines = vec!["a b"; 100];
        PreprocessUseCase::new(PreprocessConfig {
            train: CorpusPaths {
                src1: write(dir.path(), "src1.txt", &lines),
                tgt1: Some(write(dir.path(), "tgt1.txt", &vec!["0"; 100])),
                src2: Some(write(dir.path(), "src2.txt", &lines)),
                tgt2: Some(write(dir.path(), "tgt2.txt", &vec!["b"; 100])),
                ..Default::default()
            },
            save_data: out.clone(),
            shard_size: 1,
            ..Default::default()
        })
        .execute()
        .unwrap();

        let report = InspectUseCase::new(InspectConfig {
            save_data: out,
            ..Default::default()
        })
        .execute()
        .unwrap();

        assert!(report.shards > 1);
        assert_eq!(report.examples, 100);
        assert!((report.mean_src_len - 2.0).abs() < 1e-9);
        // first shard holds one example under a one-byte limit
        assert_eq!(report.target_dims, Some([3, 1]));
    }

    #[test]
    fn test_inspect_without_preprocess_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = InspectUseCase::new(InspectConfig {
            save_data: dir.path().to_path_buf(),
            ..Default::default()
        })
        .execute()
        .unwrap_err();
        assert!(format!("{err:#}").contains("preprocess"));
    }
}
