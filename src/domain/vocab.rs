// ============================================================
// Layer 3 — Vocabulary
// ============================================================
// A bidirectional string <-> dense id mapping built from token
// frequency counts.
//
// Id assignment is deterministic:
//   1. reserved (special) tokens first, deduplicated, in the
//      order given by the caller
//   2. every other token by descending frequency
//   3. frequency ties broken by ascending lexicographic order
//
// Lookups of unseen words resolve to id 0, which is always the
// unknown token for every vocabulary this crate builds.
//
// The same type serves both the fixed per-field vocabularies and
// the small per-example dynamic source vocabularies.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const UNK_WORD: &str = "<unk>";
pub const PAD_WORD: &str = "<pad>";
pub const BOS_WORD: &str = "<s>";
pub const EOS_WORD: &str = "</s>";

/// Id every vocabulary assigns to `<unk>`.
pub const UNK_INDEX: usize = 0;

/// Token frequency table fed into vocabulary construction.
pub type Counter = HashMap<String, usize>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocab {
    itos:  Vec<String>,
    stoi:  HashMap<String, usize>,
    freqs: Counter,
}

impl Vocab {
    /// Build from a frequency table.
    ///
    /// `max_size` caps the number of non-special words; words seen
    /// fewer than `min_freq` times are dropped.
    pub fn from_counter(
        counter:  &Counter,
        specials: &[&str],
        max_size: Option<usize>,
        min_freq: usize,
    ) -> Self {
        let mut itos: Vec<String> = Vec::with_capacity(specials.len() + counter.len());
        for special in specials {
            if !itos.iter().any(|s| s == special) {
                itos.push(special.to_string());
            }
        }

        let mut words: Vec<(&String, &usize)> = counter
            .iter()
            .filter(|(w, c)| **c >= min_freq.max(1) && !itos.contains(*w))
            .collect();
        words.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        if let Some(max) = max_size {
            words.truncate(max);
        }
        itos.extend(words.into_iter().map(|(w, _)| w.clone()));

        let stoi = itos
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i))
            .collect();

        Self {
            itos,
            stoi,
            freqs: counter.clone(),
        }
    }

    /// Build a vocabulary over one token sequence.
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S], specials: &[&str]) -> Self {
        let mut counter = Counter::new();
        for t in tokens {
            *counter.entry(t.as_ref().to_string()).or_insert(0) += 1;
        }
        Self::from_counter(&counter, specials, None, 1)
    }

    /// Id of `word`, falling back to the unknown id.
    pub fn stoi(&self, word: &str) -> usize {
        self.stoi.get(word).copied().unwrap_or(UNK_INDEX)
    }

    /// Id of `word` only if it is actually in the vocabulary.
    pub fn lookup(&self, word: &str) -> Option<usize> {
        self.stoi.get(word).copied()
    }

    pub fn itos(&self, id: usize) -> Option<&str> {
        self.itos.get(id).map(String::as_str)
    }

    pub fn words(&self) -> &[String] {
        &self.itos
    }

    pub fn freq(&self, word: &str) -> usize {
        self.freqs.get(word).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.itos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.itos.is_empty()
    }
}
