// ============================================================
// Layer 2 — PreprocessUseCase
// ============================================================
// Turns raw parallel corpus files into saved artifacts:
//
//   Step 1: Open one sharded reader per configured side  (Layer 4 - data)
//   Step 2: Read shards, src1 driving, others lockstep   (Layer 4 - data)
//   Step 3: Slice pointer lines to the same shard        (Layer 4 - data)
//   Step 4: Assemble a TextDataset per shard             (Layer 4 - data)
//   Step 5: Save the shard, count its tokens, drop it    (Layer 6 - infra)
//   Step 6: Build vocabularies from the train counts     (Layer 4 - data)
//   Step 7: Save vocabularies and this config            (Layer 6 - infra)
//
// The train corpus is processed first, then the valid corpus.
// Only one shard is held in memory at a time; only the train
// shards contribute to the vocabularies.
//
// Reference: Rust Book §13 (Iterators and Closures)
//            Rust Book §9 (Error Handling with anyhow)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

use crate::data::dataset::{AssembleOptions, CorpusStreams, TextDataset};
use crate::data::field::{FieldCounters, FieldSet};
use crate::data::reader::ShardedCorpusReader;
use crate::domain::example::{Side, SideRecord};
use crate::domain::traits::{ExampleSource, Persistable};
use crate::infra::checkpoint::ArtifactStore;

// ─── Corpus Paths ─────────────────────────────────────────────────────────────
/// The files of one corpus (train or valid). `src1` is required,
/// the rest must form one of the supported side layouts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusPaths {
    pub src1:         PathBuf,
    pub tgt1:         Option<PathBuf>,
    pub src2:         Option<PathBuf>,
    pub tgt2:         Option<PathBuf>,
    pub ref_src:      Option<PathBuf>,
    pub ref_tgt:      Option<PathBuf>,
    pub pointers:     Option<PathBuf>,
    pub ref_pointers: Option<PathBuf>,
}

impl CorpusPaths {
    fn optional_sides(&self) -> [(Side, Option<&PathBuf>); 5] {
        [
            (Side::Tgt1, self.tgt1.as_ref()),
            (Side::Src2, self.src2.as_ref()),
            (Side::Tgt2, self.tgt2.as_ref()),
            (Side::RefSrc, self.ref_src.as_ref()),
            (Side::RefTgt, self.ref_tgt.as_ref()),
        ]
    }
}

// ─── Preprocess Configuration ─────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    pub train:     CorpusPaths,
    pub valid:     Option<CorpusPaths>,
    /// Output directory for shards, vocabularies and this config
    pub save_data: PathBuf,
    /// File name prefix of every shard
    pub prefix:    String,
    /// Approximate bytes per shard; 0 keeps each corpus in one shard
    pub shard_size: u64,
    /// Keep at most this many tokens per source line; 0 = unlimited
    pub src_seq_length_trunc: usize,
    /// Keep at most this many tokens per target line; 0 = unlimited
    pub tgt_seq_length_trunc: usize,
    pub assemble:  AssembleOptions,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            train:                CorpusPaths::default(),
            valid:                None,
            save_data:            PathBuf::from("data"),
            prefix:               "demo".to_string(),
            shard_size:           0,
            src_seq_length_trunc: 0,
            tgt_seq_length_trunc: 0,
            assemble:             AssembleOptions::default(),
        }
    }
}

impl Persistable for PreprocessConfig {}

/// What a preprocessing run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessReport {
    pub train_shards:   usize,
    pub valid_shards:   usize,
    pub train_examples: usize,
    pub valid_examples: usize,
    pub vocab_sizes:    Vec<(String, usize)>,
}

/// Shard and example counts of one processed corpus.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct CorpusSummary {
    shards:   usize,
    examples: usize,
}

// ─── PreprocessUseCase ────────────────────────────────────────────────────────
pub struct PreprocessUseCase {
    config: PreprocessConfig,
}

impl PreprocessUseCase {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    /// Execute the full preprocessing pipeline end to end
    pub fn execute(&self) -> Result<PreprocessReport> {
        let cfg   = &self.config;
        let store = ArtifactStore::new(&cfg.save_data, cfg.prefix.clone())?;

        // ── Steps 1-5: train corpus ───────────────────────────────────────────
        tracing::info!("Building training data from '{}'", cfg.train.src1.display());
        // Feature counts are only known once the first shard is read
        let mut counted: Option<FieldSet> = None;
        let mut counters = FieldCounters::new();
        let train = self.build_corpus("train", &cfg.train, &store, &mut |shard: &TextDataset| {
            let fields = counted
                .get_or_insert_with(|| FieldSet::text_fields(shard.n_src_feats(), shard.n_tgt_feats()));
            for example in shard.examples() {
                fields.count_example(example, &mut counters);
            }
        })?;

        // ── Step 6: vocabularies from the train counts ────────────────────────
        let mut fields = counted.unwrap_or_else(|| FieldSet::text_fields(0, 0));
        fields
            .build_vocabs_from_counters(counters)
            .context("Building vocabularies")?;

        // The style target decodes into the content target's vocabulary
        if fields.get("tgt2").and_then(|f| f.vocab()).is_some() {
            fields.share_vocab("tgt2", "ref_tgt")?;
        }

        // ── Steps 1-5: valid corpus ───────────────────────────────────────────
        let valid = match &cfg.valid {
            Some(paths) => {
                tracing::info!("Building validation data from '{}'", paths.src1.display());
                self.build_corpus("valid", paths, &store, &mut |_: &TextDataset| {})?
            }
            None => CorpusSummary::default(),
        };

        // ── Step 7: persist ───────────────────────────────────────────────────
        store.save_vocab(&fields)?;
        store.save_config(cfg)?;

        let vocab_sizes = fields
            .vocab_table()
            .into_iter()
            .map(|(name, v)| (name, v.len()))
            .collect();

        Ok(PreprocessReport {
            train_shards:   train.shards,
            valid_shards:   valid.shards,
            train_examples: train.examples,
            valid_examples: valid.examples,
            vocab_sizes,
        })
    }

    /// Read one corpus shard by shard, saving every non-empty shard
    /// and handing it to `visit` before it is dropped.
    fn build_corpus(
        &self,
        corpus_type: &str,
        paths: &CorpusPaths,
        store: &ArtifactStore,
        visit: &mut dyn FnMut(&TextDataset),
    ) -> Result<CorpusSummary> {
        let cfg = &self.config;

        let mut driver = ShardedCorpusReader::open(
            &paths.src1,
            cfg.src_seq_length_trunc,
            Side::Src1,
            cfg.shard_size,
        )
        .with_context(|| format!("Cannot open corpus '{}'", paths.src1.display()))?;

        let mut followers = Vec::new();
        for (side, path) in paths.optional_sides() {
            if let Some(path) = path {
                let truncate = match side {
                    Side::Src2 | Side::RefSrc => cfg.src_seq_length_trunc,
                    _ => cfg.tgt_seq_length_trunc,
                };
                let reader = ShardedCorpusReader::open(path, truncate, side, 0)
                    .with_context(|| format!("Cannot open corpus '{}'", path.display()))?;
                followers.push(reader);
            }
        }

        let pointers     = read_lines(paths.pointers.as_ref())?;
        let ref_pointers = read_lines(paths.ref_pointers.as_ref())?;

        let mut summary = CorpusSummary::default();
        let mut start   = 0;
        while !driver.hit_end() {
            let mut streams = CorpusStreams {
                src1: driver.read_shard()?,
                ..Default::default()
            };
            // Followers still run on an empty final shard so a longer
            // corpus is caught.
            for follower in &mut followers {
                let records = follower.next_shard(Some(&driver))?;
                attach(&mut streams, follower.side(), records);
            }
            if streams.src1.is_empty() {
                continue;
            }

            let end = start + streams.src1.len();
            streams.pointers     = slice_lines(pointers.as_deref(), start, end);
            streams.ref_pointers = slice_lines(ref_pointers.as_deref(), start, end);
            start = end;

            let index   = summary.shards + 1;
            let dataset = TextDataset::assemble(streams, &cfg.assemble)
                .with_context(|| format!("Assembling {corpus_type} shard {index}"))?;
            store.save_shard(corpus_type, index, &dataset)?;
            tracing::debug!("{corpus_type} shard {index}: {} examples", dataset.examples().len());

            visit(&dataset);
            summary.shards   += 1;
            summary.examples += dataset.examples().len();
        }

        tracing::info!(
            "{}: {} shards, {} examples",
            corpus_type,
            summary.shards,
            summary.examples
        );
        Ok(summary)
    }
}

fn attach(streams: &mut CorpusStreams, side: Side, records: Vec<SideRecord>) {
    let slot = match side {
        Side::Src1   => {
            streams.src1 = records;
            return;
        }
        Side::Tgt1   => &mut streams.tgt1,
        Side::Src2   => &mut streams.src2,
        Side::Tgt2   => &mut streams.tgt2,
        Side::RefSrc => &mut streams.ref_src,
        Side::RefTgt => &mut streams.ref_tgt,
    };
    *slot = Some(records);
}

fn read_lines(path: Option<&PathBuf>) -> Result<Option<Vec<String>>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot read pointer file '{}'", path.display()))?;
    Ok(Some(text.lines().map(str::to_string).collect()))
}

/// Lines `start..end`, clamped so a short file is reported by the
/// dataset assembler instead of panicking here.
fn slice_lines(lines: Option<&[String]>, start: usize, end: usize) -> Option<Vec<String>> {
    lines.map(|l| {
        let end   = end.min(l.len());
        let start = start.min(end);
        l[start..end].to_vec()
    })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, lines.join("\n") + "\n").unwrap();
        path
    }

    fn config(dir: &Path) -> PreprocessConfig {
        let src1 = ["a b c", "b c d", "c d e"];
        let tgt1 = ["0 1", "1 2", "0 2"];
        let src2 = ["x y", "y z", "x z"];
        let tgt2 = ["y x", "z", "x w"];
        PreprocessConfig {
            train: CorpusPaths {
                src1: write(dir, "src1.txt", &src1),
                tgt1: Some(write(dir, "tgt1.txt", &tgt1)),
                src2: Some(write(dir, "src2.txt", &src2)),
                tgt2: Some(write(dir, "tgt2.txt", &tgt2)),
                ..Default::default()
            },
            save_data: dir.join("out"),
            ..Default::default()
        }
    }

    #[test]
    fn test_preprocess_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let report = PreprocessUseCase::new(cfg.clone()).execute().unwrap();

        assert_eq!(report.train_shards, 1);
        assert_eq!(report.train_examples, 3);
        assert_eq!(report.valid_shards, 0);

        let store = ArtifactStore::new(&cfg.save_data, "demo").unwrap();
        let shards = store.load_shards("train").unwrap();
        assert_eq!(shards[0].src_vocabs().len(), 3);
        let vocab = store.load_vocab().unwrap();
        // <unk> <pad> <s> </s> + w x y z
        assert_eq!(vocab["tgt2"].len(), 8);
        assert_eq!(vocab["ref_tgt"], vocab["tgt2"]);

        let saved: PreprocessConfig = store.load_config().unwrap();
        assert_eq!(saved, cfg);
    }

    #[test]
    fn test_unequal_corpora_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.train.tgt2 = Some(write(dir.path(), "short.txt", &["y x"]));
        assert!(PreprocessUseCase::new(cfg).execute().is_err());
    }

    #[test]
    fn test_missing_corpus_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.train.src1 = dir.path().join("nope.txt");
        let err = PreprocessUseCase::new(cfg).execute().unwrap_err();
        assert!(format!("{err:#}").contains("nope.txt"));
    }

    #[test]
    fn test_sharded_pointers_follow_their_own_lines() {
        let dir   = tempfile::tempdir().unwrap();
        let lines = 300;
        let make  = |f: &dyn Fn(usize) -> String| (0..lines).map(f).collect::<Vec<_>>();
        let src1 = make(&|i| format!("r{i} a b"));
        let tgt1 = make(&|_| "0 1".to_string());
        let src2 = make(&|i| format!("w{i} a b"));
        let tgt2 = make(&|i| format!("a w{i}"));
        // target 1 copies source 0; target 0 names the line number
        let ptrs = make(&|i| format!("1,0 0,{i}"));
        fn refs(v: &[String]) -> Vec<&str> { v.iter().map(String::as_str).collect::<Vec<_>>() }

        let cfg = PreprocessConfig {
            train: CorpusPaths {
                src1:     write(dir.path(), "src1.txt", &refs(&src1)),
                tgt1:     Some(write(dir.path(), "tgt1.txt", &refs(&tgt1))),
                src2:     Some(write(dir.path(), "src2.txt", &refs(&src2))),
                tgt2:     Some(write(dir.path(), "tgt2.txt", &refs(&tgt2))),
                pointers: Some(write(dir.path(), "ptr.txt", &refs(&ptrs))),
                ..Default::default()
            },
            save_data: dir.path().join("out"),
            shard_size: 1,
            ..Default::default()
        };
        let report = PreprocessUseCase::new(cfg.clone()).execute().unwrap();
        assert!(report.train_shards > 1);
        assert_eq!(report.train_examples, lines);

        let store  = ArtifactStore::new(&cfg.save_data, "demo").unwrap();
        let shards = store.load_shards("train").unwrap();
        assert_eq!(shards.len(), report.train_shards);

        let mut seen = 0;
        for shard in &shards {
            assert!(shard.has_pointers());
            for example in shard.examples() {
                let line: i64 = example.words(Side::Src2).unwrap()[0][1..].parse().unwrap();
                let table = example.copy.as_ref().unwrap().ptrs.as_ref().unwrap();
                let named: Vec<i64> = table
                    .groups()
                    .filter(|(t, _)| *t == 0)
                    .flat_map(|(_, s)| s.to_vec())
                    .collect();
                assert_eq!(named, vec![line], "shard example {}", example.index);
                seen += 1;
            }
        }
        assert_eq!(seen, lines);

        // vocabularies were counted across every shard
        let vocab = store.load_vocab().unwrap();
        assert!(vocab["src1"].lookup("r0").is_some());
        assert!(vocab["src1"].lookup("r299").is_some());
    }

    #[test]
    fn test_slice_lines_clamps() {
        let lines: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(slice_lines(Some(&lines), 1, 3), Some(lines[1..3].to_vec()));
        assert_eq!(slice_lines(Some(&lines), 2, 5), Some(vec!["c".to_string()]));
        assert_eq!(slice_lines(None, 0, 1), None);
    }
}
