// ============================================================
// Layer 6 — Artifact Store
// ============================================================
// Saves and restores everything preprocessing produces, so that
// later stages (inspection, training) rebuild exactly the same
// fields and datasets.
//
// What gets saved:
//   1. vocab.json                     every built field vocabulary,
//                                     keyed by field name
//   2. preprocess_config.json         the options that produced them
//   3. <prefix>.<corpus>.<n>.json     one TextDataset per shard
//
// File naming convention:
//   data/
//     demo.train.1.json   ← first training shard
//     demo.train.2.json
//     ...
//     demo.valid.1.json
//     vocab.json
//     preprocess_config.json
//
// Shards are loaded back in numeric shard order (2 before 10).
//
// Reference: Rust Book §9 (Error Handling)
//            serde_json documentation

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use crate::data::dataset::TextDataset;
use crate::data::field::FieldSet;
use crate::domain::traits::Persistable;
use crate::domain::vocab::Vocab;

const VOCAB_FILE: &str  = "vocab.json";
const CONFIG_FILE: &str = "preprocess_config.json";

/// Manages the preprocessing artifacts in one directory.
pub struct ArtifactStore {
    dir:    PathBuf,
    prefix: String,
}

impl ArtifactStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl AsRef<Path>, prefix: impl Into<String>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create artifact directory '{}'", dir.display()))?;
        Ok(Self {
            dir,
            prefix: prefix.into(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // ── Vocabularies ──────────────────────────────────────────────────────────

    pub fn save_vocab(&self, fields: &FieldSet) -> Result<PathBuf> {
        let path = self.dir.join(VOCAB_FILE);
        let table = fields.vocab_table();
        write_json(&path, &table)?;
        tracing::info!("Saved {} vocabularies to '{}'", table.len(), path.display());
        Ok(path)
    }

    pub fn load_vocab(&self) -> Result<BTreeMap<String, Vocab>> {
        let path = self.dir.join(VOCAB_FILE);
        read_json(&path).with_context(|| "Have you run 'preprocess' first?")
    }

    // ── Config ────────────────────────────────────────────────────────────────

    pub fn save_config<C: Persistable>(&self, config: &C) -> Result<()> {
        config.save(&self.dir.join(CONFIG_FILE))
    }

    pub fn load_config<C: Persistable>(&self) -> Result<C> {
        C::load(&self.dir.join(CONFIG_FILE))
    }

    // ── Dataset shards ────────────────────────────────────────────────────────

    pub fn shard_path(&self, corpus_type: &str, n: usize) -> PathBuf {
        self.dir.join(format!("{}.{corpus_type}.{n}.json", self.prefix))
    }

    pub fn save_shard(&self, corpus_type: &str, n: usize, dataset: &TextDataset) -> Result<PathBuf> {
        let path = self.shard_path(corpus_type, n);
        dataset.save(&path)?;
        tracing::info!(
            "Saved {} shard {} ({} examples) to '{}'",
            corpus_type,
            n,
            dataset.examples().len(),
            path.display()
        );
        Ok(path)
    }

    /// Every shard of `corpus_type`, in shard order.
    pub fn shard_paths(&self, corpus_type: &str) -> Result<Vec<PathBuf>> {
        let head = format!("{}.{corpus_type}.", self.prefix);
        let mut shards: Vec<(usize, PathBuf)> = fs::read_dir(&self.dir)
            .with_context(|| format!("Cannot list '{}'", self.dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter_map(|path| {
                let name = path.file_name()?.to_str()?;
                let n = name.strip_prefix(&head)?.strip_suffix(".json")?.parse().ok()?;
                Some((n, path))
            })
            .collect();
        shards.sort_by_key(|(n, _)| *n);
        Ok(shards.into_iter().map(|(_, p)| p).collect())
    }

    /// Lazily load every shard of `corpus_type` in order; each shard
    /// is read from disk only when the iterator reaches it.
    pub fn shards(&self, corpus_type: &str) -> Result<impl Iterator<Item = Result<TextDataset>>> {
        let paths = self.shard_paths(corpus_type)?;
        if paths.is_empty() {
            anyhow::bail!(
                "No '{}' shards with prefix '{}' in '{}'",
                corpus_type,
                self.prefix,
                self.dir.display()
            );
        }
        Ok(paths.into_iter().map(|p| TextDataset::load(&p)))
    }

    pub fn load_shards(&self, corpus_type: &str) -> Result<Vec<TextDataset>> {
        self.shards(corpus_type)?.collect()
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Cannot write '{}'", path.display()))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Cannot read '{}'", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Cannot parse '{}'", path.display()))
}
