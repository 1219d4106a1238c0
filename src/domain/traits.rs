// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// Shared behaviour that more than one layer relies on.
//
// ExampleSource is implemented by the sharded corpus reader and
// lets the application layer drive any number of side readers
// through the same loop. Persistable is implemented by the
// artifacts the preprocessing stage writes (vocabularies,
// dataset shards, configs) so the inspect stage can reload them.

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::{fs, path::Path};

use crate::domain::example::{Side, SideRecord};

// ─── ExampleSource ────────────────────────────────────────────────────────────
/// Anything that yields tokenized records for one corpus side,
/// one bounded shard at a time.
pub trait ExampleSource {
    /// The logical column this source feeds.
    fn side(&self) -> Side;

    /// Index of the last line read, or `None` before the first line.
    fn line_index(&self) -> Option<usize>;

    /// True once the underlying corpus is exhausted.
    fn hit_end(&self) -> bool;

    /// Read the next shard. When `peer` is given, advance in lockstep
    /// with it instead of using this source's own shard boundary.
    fn next_shard(
        &mut self,
        peer: Option<&dyn ExampleSource>,
    ) -> crate::domain::errors::Result<Vec<SideRecord>>;
}

// ─── Persistable ──────────────────────────────────────────────────────────────
/// A value that round-trips through a pretty-printed JSON file.
pub trait Persistable: Serialize + DeserializeOwned + Sized {
    fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create directory '{}'", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("Cannot write '{}'", path.display()))?;
        tracing::debug!("Saved '{}'", path.display());
        Ok(())
    }

    fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Cannot parse '{}'", path.display()))
    }
}
