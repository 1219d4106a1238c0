// ============================================================
// Layer 4 — Text Dataset Assembler
// ============================================================
// Joins per-side record streams (one per corpus file) into full
// Examples, attaches the dynamic-dictionary copy data, and drops
// examples that violate the length filter.
//
// Streams are joined purely by position: record i of every
// stream belongs to example i. Supported layouts:
//
//   src1 ref_src
//   src1 tgt1 src2
//   src1 src2 ref_src
//   src1 tgt1 src2 tgt2
//   src1 tgt1 src2 tgt2 ref_src ref_tgt
//
// The per-example dynamic vocabularies are kept in two ordered
// lists indexed by example ordinal (`indices`). They are filled
// once here and are read-only afterwards; the loss borrows them.
//
// Reference: Burn Book §4 (Datasets)

use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::data::dynamic_dict::DynamicDict;
use crate::domain::errors::{PipelineError, Result};
use crate::domain::example::{Example, Side, SideRecord};
use crate::domain::traits::Persistable;
use crate::domain::vocab::Vocab;

// ─── Inputs ───────────────────────────────────────────────────────────────────
/// Record streams for one shard, one per configured corpus, plus
/// the pointer lines that belong to the same shard.
#[derive(Debug, Clone, Default)]
pub struct CorpusStreams {
    pub src1:         Vec<SideRecord>,
    pub tgt1:         Option<Vec<SideRecord>>,
    pub src2:         Option<Vec<SideRecord>>,
    pub tgt2:         Option<Vec<SideRecord>>,
    pub ref_src:      Option<Vec<SideRecord>>,
    pub ref_tgt:      Option<Vec<SideRecord>>,
    pub pointers:     Option<Vec<String>>,
    pub ref_pointers: Option<Vec<String>>,
}

impl CorpusStreams {
    fn present(&self) -> Vec<(Side, &Vec<SideRecord>)> {
        let optional = [
            (Side::Tgt1, &self.tgt1),
            (Side::Src2, &self.src2),
            (Side::Tgt2, &self.tgt2),
            (Side::RefSrc, &self.ref_src),
            (Side::RefTgt, &self.ref_tgt),
        ];
        std::iter::once((Side::Src1, &self.src1))
            .chain(optional.into_iter().filter_map(|(s, r)| r.as_ref().map(|r| (s, r))))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembleOptions {
    /// Build per-example dynamic dictionaries when `src2` is present.
    pub dynamic_dict:    bool,
    /// Apply the length / pointer filter.
    pub use_filter_pred: bool,
    pub src_seq_length:  usize,
    pub tgt_seq_length:  usize,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            dynamic_dict:    true,
            use_filter_pred: true,
            src_seq_length:  50,
            tgt_seq_length:  50,
        }
    }
}

const LAYOUTS: [&[Side]; 5] = [
    &[Side::Src1, Side::RefSrc],
    &[Side::Src1, Side::Tgt1, Side::Src2],
    &[Side::Src1, Side::Src2, Side::RefSrc],
    &[Side::Src1, Side::Tgt1, Side::Src2, Side::Tgt2],
    &[Side::Src1, Side::Tgt1, Side::Src2, Side::Tgt2, Side::RefSrc, Side::RefTgt],
];

// ─── TextDataset ──────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextDataset {
    examples:       Vec<Example>,
    src_vocabs:     Vec<Vocab>,
    ref_src_vocabs: Vec<Vocab>,
    n_src_feats:    usize,
    n_tgt_feats:    usize,
    has_pointers:   bool,
}

impl TextDataset {
    /// Join `streams` into examples and apply `options`.
    pub fn assemble(streams: CorpusStreams, options: &AssembleOptions) -> Result<Self> {
        let present = streams.present();
        let sides: Vec<Side> = present.iter().map(|(s, _)| *s).collect();
        if !LAYOUTS.iter().any(|layout| *layout == sides.as_slice()) {
            let names: Vec<&str> = sides.iter().map(|s| s.name()).collect();
            return Err(PipelineError::field_config(
                "streams",
                format!("unsupported corpus layout [{}]", names.join(", ")),
            ));
        }

        let n_examples = streams.src1.len();
        for (side, records) in &present {
            if records.len() != n_examples {
                return Err(PipelineError::CorpusLengthMismatch {
                    side:    side.to_string(),
                    lines:   records.len(),
                    context: format!("dataset assembly expected {n_examples} lines"),
                });
            }
        }
        for (name, lines) in [("pointers", &streams.pointers), ("ref_pointers", &streams.ref_pointers)] {
            if let Some(lines) = lines {
                if lines.len() < n_examples {
                    return Err(PipelineError::CorpusLengthMismatch {
                        side:    name.to_string(),
                        lines:   lines.len(),
                        context: format!("dataset assembly expected {n_examples} lines"),
                    });
                }
            }
        }

        let n_src_feats  = streams.src1.first().map_or(0, |r| r.columns.features.len());
        let n_tgt_feats  = streams.tgt1.as_ref().and_then(|t| t.first()).map_or(0, |r| r.columns.features.len());
        let has_pointers = streams.pointers.is_some();
        let use_dict     = options.dynamic_dict && streams.src2.is_some();

        let mut examples = join(streams.src1, streams.tgt1, streams.src2, streams.tgt2, streams.ref_src, streams.ref_tgt);

        let mut src_vocabs     = Vec::new();
        let mut ref_src_vocabs = Vec::new();
        if use_dict {
            for example in &mut examples {
                let i = example.index;

                let src = example.words(Side::Src2).unwrap_or_default();
                let tgt = example.words(Side::Tgt2);
                let line = streams.pointers.as_ref().map(|p| p[i].as_str());
                let content = DynamicDict::build(src, tgt, line, i)?;

                let style = match example.words(Side::RefSrc) {
                    Some(ref_src) => {
                        let ref_tgt = example.words(Side::RefTgt);
                        let line = streams.ref_pointers.as_ref().map(|p| p[i].as_str());
                        Some(DynamicDict::build(ref_src, ref_tgt, line, i)?)
                    }
                    None => None,
                };

                src_vocabs.push(content.vocab);
                example.copy = Some(content.annotations);
                if let Some(style) = style {
                    ref_src_vocabs.push(style.vocab);
                    example.ref_copy = Some(style.annotations);
                }
            }
        }

        let src_total: usize = examples.iter().map(|e| e.len_of(Side::Src1)).sum();
        tracing::info!(
            "Average src size {:.2} over {} examples",
            src_total as f64 / examples.len().max(1) as f64,
            examples.len()
        );

        if options.use_filter_pred {
            let before = examples.len();
            examples.retain(|e| keep(e, options, has_pointers));
            tracing::debug!("Length filter kept {} of {} examples", examples.len(), before);
        }

        Ok(Self {
            examples,
            src_vocabs,
            ref_src_vocabs,
            n_src_feats,
            n_tgt_feats,
            has_pointers,
        })
    }

    pub fn examples(&self) -> &[Example] {
        &self.examples
    }

    /// Content-side dynamic vocabularies, indexed by example ordinal.
    pub fn src_vocabs(&self) -> &[Vocab] {
        &self.src_vocabs
    }

    /// Style-side dynamic vocabularies, indexed by example ordinal.
    pub fn ref_src_vocabs(&self) -> &[Vocab] {
        &self.ref_src_vocabs
    }

    pub fn n_src_feats(&self) -> usize {
        self.n_src_feats
    }

    pub fn n_tgt_feats(&self) -> usize {
        self.n_tgt_feats
    }

    pub fn has_pointers(&self) -> bool {
        self.has_pointers
    }

    pub fn mean_src_len(&self) -> f64 {
        let total: usize = self.examples.iter().map(|e| e.len_of(Side::Src1)).sum();
        total as f64 / self.examples.len().max(1) as f64
    }
}

impl Persistable for TextDataset {}

impl Dataset<Example> for TextDataset {
    fn get(&self, index: usize) -> Option<Example> {
        self.examples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.examples.len()
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────
fn join(
    src1: Vec<SideRecord>,
    tgt1: Option<Vec<SideRecord>>,
    src2: Option<Vec<SideRecord>>,
    tgt2: Option<Vec<SideRecord>>,
    ref_src: Option<Vec<SideRecord>>,
    ref_tgt: Option<Vec<SideRecord>>,
) -> Vec<Example> {
    let mut examples: Vec<Example> = src1
        .into_iter()
        .enumerate()
        .map(|(index, record)| Example {
            index,
            sides: BTreeMap::from([(record.side, record.columns)]),
            ..Default::default()
        })
        .collect();

    for stream in [tgt1, src2, tgt2, ref_src, ref_tgt].into_iter().flatten() {
        for (example, record) in examples.iter_mut().zip(stream) {
            example.sides.insert(record.side, record.columns);
        }
    }
    examples
}

/// `0 < len(src1) <= src_max`, `0 < len(tgt1) <= tgt_max` when a
/// `tgt1` column exists, and a pointer table with more than one row
/// when pointers were supplied.
fn keep(example: &Example, options: &AssembleOptions, has_pointers: bool) -> bool {
    let src_len = example.len_of(Side::Src1);
    let src_ok  = 0 < src_len && src_len <= options.src_seq_length;

    let tgt_ok = match example.words(Side::Tgt1) {
        Some(tgt) => 0 < tgt.len() && tgt.len() <= options.tgt_seq_length,
        None => true,
    };

    let ptrs_ok = !has_pointers
        || example
            .copy
            .as_ref()
            .and_then(|c| c.ptrs.as_ref())
            .is_some_and(|p| p.rows() > 1);

    src_ok && tgt_ok && ptrs_ok
}
