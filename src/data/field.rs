// ============================================================
// Layer 4 — Fields
// ============================================================
// A Field describes how one column of an Example becomes a
// tensor: which tokens to count into a vocabulary, how to pad a
// batch, and how to numericalize the padded batch.
//
// A field is an immutable FieldSpec plus (once built) a shared
// vocabulary. Behaviour is chosen by the FieldKind tag:
//
//   Words    token sequences looked up in a word vocabulary
//   Chars    per-word character units, padded at two levels
//   Numeric  values coerced to int / float, optionally run
//            through a Postprocess collation hook
//
// Processing one batch:
//
//   RawBatch ──pad()──► Padded ──numericalize()──► FieldOutput
//                                                   ├─ Tensor
//                                                   └─ Unvocabularized
//
// Unvocabularized is returned (with a warning) when a
// vocabulary-backed field is used before its vocabulary exists.
// That is a caller ordering bug, so it is surfaced rather than
// hidden.
//
// Layouts are sequence-first unless `batch_first` is set:
//   word field  [len, batch]
//   char field  [chars, batch * words]
//
// Reference: Burn Book §3 (Tensors)
//            Rust Book §6 (Enums and Pattern Matching)

use burn::prelude::*;
use burn::tensor::BasicOps;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::data::collate::{
    float_tensor, int_tensor, make_alignment, make_pointer_mask, make_src_map, rectangular,
};
use crate::domain::errors::{PipelineError, Result};
use crate::domain::example::{Column, ColumnValue, Example, Side};
use crate::domain::pointer::PointerTable;
use crate::domain::vocab::{Counter, Vocab, BOS_WORD, EOS_WORD, PAD_WORD, UNK_WORD};

/// Reserved integer ids used by numeric sequence fields.
pub const PAD_INDEX: i64 = 1;
pub const BOS_INDEX: i64 = 2;
pub const EOS_INDEX: i64 = 3;

// ─── Kinds ────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericType {
    Int,
    Float,
}

impl NumericType {
    /// Resolve a declared dtype name, failing for names with no coercion.
    pub fn parse(field: &str, name: &str) -> Result<Self> {
        name.parse().map_err(|_| {
            PipelineError::field_config(field, format!("no numeric coercion for dtype '{name}'"))
        })
    }
}

impl FromStr for NumericType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s.to_ascii_lowercase().as_str() {
            "int" | "int32" | "int64" | "long" => Ok(Self::Int),
            "float" | "float32" | "float64" | "double" => Ok(Self::Float),
            _ => Err(()),
        }
    }
}

impl fmt::Display for NumericType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int   => f.write_str("int"),
            Self::Float => f.write_str("float"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Words,
    Chars,
    Numeric { dtype: NumericType },
}

/// Batch-time collation applied to a numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Postprocess {
    SourceMap,
    Alignment,
    Pointers,
}

// ─── FieldSpec ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub column:          Column,
    pub kind:            FieldKind,
    pub sequential:      bool,
    pub init_token:      Option<String>,
    pub eos_token:       Option<String>,
    pub pad_token:       String,
    pub unk_token:       String,
    pub fix_length:      Option<usize>,
    pub include_lengths: bool,
    pub batch_first:     bool,
    pub pad_first:       bool,
    pub truncate_first:  bool,
    pub postprocess:     Option<Postprocess>,
    pub vocab_max_size:  Option<usize>,
    pub vocab_min_freq:  usize,
}

impl FieldSpec {
    fn base(column: Column, kind: FieldKind) -> Self {
        Self {
            column,
            kind,
            sequential:      true,
            init_token:      None,
            eos_token:       None,
            pad_token:       PAD_WORD.to_string(),
            unk_token:       UNK_WORD.to_string(),
            fix_length:      None,
            include_lengths: false,
            batch_first:     false,
            pad_first:       false,
            truncate_first:  false,
            postprocess:     None,
            vocab_max_size:  None,
            vocab_min_freq:  1,
        }
    }

    pub fn words(column: Column) -> Self {
        Self::base(column, FieldKind::Words)
    }

    pub fn chars(column: Column) -> Self {
        Self::base(column, FieldKind::Chars)
    }

    pub fn numeric(column: Column, dtype: NumericType) -> Self {
        let mut spec = Self::base(column, FieldKind::Numeric { dtype });
        spec.pad_token = PAD_INDEX.to_string();
        spec
    }

    pub fn with_boundaries(mut self, init: impl Into<String>, eos: impl Into<String>) -> Self {
        self.init_token = Some(init.into());
        self.eos_token  = Some(eos.into());
        self
    }

    pub fn with_lengths(mut self) -> Self {
        self.include_lengths = true;
        self
    }

    pub fn non_sequential(mut self) -> Self {
        self.sequential = false;
        self
    }

    pub fn with_postprocess(mut self, hook: Postprocess) -> Self {
        self.postprocess = Some(hook);
        self
    }

    pub fn name(&self) -> String {
        self.column.name()
    }

    fn uses_vocab(&self) -> bool {
        !matches!(self.kind, FieldKind::Numeric { .. })
    }

    /// Content length every row is padded or truncated to.
    fn target_len(&self, lens: impl Iterator<Item = usize>) -> usize {
        match self.fix_length {
            Some(fixed) => {
                let boundaries = [&self.init_token, &self.eos_token]
                    .iter()
                    .filter(|t| t.is_some())
                    .count();
                fixed.saturating_sub(boundaries)
            }
            None => lens.max().unwrap_or(0),
        }
    }
}

// ─── Batch values ─────────────────────────────────────────────────────────────
/// Raw column values for a batch of examples, before padding.
#[derive(Debug, Clone, PartialEq)]
pub enum RawBatch {
    Tokens(Vec<Vec<String>>),
    Chars(Vec<Vec<Vec<String>>>),
    Ints(Vec<Vec<i64>>),
    Tables(Vec<Option<PointerTable>>),
}

impl RawBatch {
    fn variant(&self) -> &'static str {
        match self {
            RawBatch::Tokens(_) => "tokens",
            RawBatch::Chars(_)  => "chars",
            RawBatch::Ints(_)   => "ints",
            RawBatch::Tables(_) => "pointer tables",
        }
    }
}

/// Per-example lengths reported alongside a padded batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Lengths {
    /// Content plus boundary tokens, per example.
    Words(Vec<usize>),
    /// Character count of every padded word slot, per example.
    Chars(Vec<Vec<usize>>),
}

impl Lengths {
    fn flatten(&self) -> Vec<i64> {
        match self {
            Lengths::Words(l) => l.iter().map(|&v| v as i64).collect(),
            Lengths::Chars(l) => l.iter().flatten().map(|&v| v as i64).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Padded {
    pub rows:    RawBatch,
    pub lengths: Option<Lengths>,
}

#[derive(Debug, Clone)]
pub enum FieldTensor<B: Backend> {
    Int1(Tensor<B, 1, Int>),
    Int2(Tensor<B, 2, Int>),
    Int3(Tensor<B, 3, Int>),
    Float1(Tensor<B, 1>),
    Float2(Tensor<B, 2>),
    Float3(Tensor<B, 3>),
}

impl<B: Backend> FieldTensor<B> {
    fn mismatch(&self, wanted: &str) -> PipelineError {
        let got = match self {
            FieldTensor::Int1(_)   => "int rank 1",
            FieldTensor::Int2(_)   => "int rank 2",
            FieldTensor::Int3(_)   => "int rank 3",
            FieldTensor::Float1(_) => "float rank 1",
            FieldTensor::Float2(_) => "float rank 2",
            FieldTensor::Float3(_) => "float rank 3",
        };
        PipelineError::ShapeMismatch(format!("expected {wanted} tensor, got {got}"))
    }

    pub fn into_int1(self) -> Result<Tensor<B, 1, Int>> {
        match self {
            FieldTensor::Int1(t) => Ok(t),
            other => Err(other.mismatch("int rank 1")),
        }
    }

    pub fn into_int2(self) -> Result<Tensor<B, 2, Int>> {
        match self {
            FieldTensor::Int2(t) => Ok(t),
            other => Err(other.mismatch("int rank 2")),
        }
    }

    pub fn into_int3(self) -> Result<Tensor<B, 3, Int>> {
        match self {
            FieldTensor::Int3(t) => Ok(t),
            other => Err(other.mismatch("int rank 3")),
        }
    }

    pub fn into_float3(self) -> Result<Tensor<B, 3>> {
        match self {
            FieldTensor::Float3(t) => Ok(t),
            other => Err(other.mismatch("float rank 3")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Numericalized<B: Backend> {
    pub tensor:  FieldTensor<B>,
    /// Flattened lengths, present when the field asks for them.
    pub lengths: Option<Tensor<B, 1, Int>>,
}

#[derive(Debug, Clone)]
pub enum FieldOutput<B: Backend> {
    Tensor(Numericalized<B>),
    /// The field needs a vocabulary that has not been built yet.
    Unvocabularized(Padded),
}

impl<B: Backend> FieldOutput<B> {
    pub fn is_unvocabularized(&self) -> bool {
        matches!(self, FieldOutput::Unvocabularized(_))
    }

    pub fn into_tensor(self, field: &str) -> Result<Numericalized<B>> {
        match self {
            FieldOutput::Tensor(n) => Ok(n),
            FieldOutput::Unvocabularized(_) => {
                Err(PipelineError::field_config(field, "vocabulary has not been built"))
            }
        }
    }
}

// ─── Padding ──────────────────────────────────────────────────────────────────
/// Boundary and pad values spliced around one row.
struct Boundaries<T> {
    init: Option<T>,
    eos:  Option<T>,
    pad:  T,
}

impl<T: Clone> Boundaries<T> {
    /// Truncate `row` to `max_len`, wrap it in boundaries, then pad.
    /// Returns the padded row and its unpadded length.
    fn apply(&self, row: &[T], max_len: usize, pad_first: bool, truncate_first: bool) -> (Vec<T>, usize) {
        let kept = if row.len() <= max_len {
            row
        } else if truncate_first {
            &row[row.len() - max_len..]
        } else {
            &row[..max_len]
        };
        let n_pad = max_len.saturating_sub(row.len());

        let mut body = Vec::with_capacity(max_len + 2);
        body.extend(self.init.iter().cloned());
        body.extend_from_slice(kept);
        body.extend(self.eos.iter().cloned());
        let len = body.len();

        let pads = std::iter::repeat(self.pad.clone()).take(n_pad);
        let padded = if pad_first {
            pads.chain(body).collect()
        } else {
            body.into_iter().chain(pads).collect()
        };
        (padded, len)
    }
}

fn pad_chars(word: &[String], width: usize, pad: &str) -> Vec<String> {
    let mut out = word.to_vec();
    out.resize(width.max(word.len()), pad.to_string());
    out
}

// ─── Field ────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct Field {
    spec:  FieldSpec,
    vocab: Option<Arc<Vocab>>,
}

impl Field {
    pub fn new(spec: FieldSpec) -> Self {
        Self { spec, vocab: None }
    }

    pub fn spec(&self) -> &FieldSpec {
        &self.spec
    }

    pub fn name(&self) -> String {
        self.spec.name()
    }

    pub fn vocab(&self) -> Option<&Arc<Vocab>> {
        self.vocab.as_ref()
    }

    pub fn set_vocab(&mut self, vocab: Arc<Vocab>) {
        self.vocab = Some(vocab);
    }

    fn specials(&self) -> Vec<&str> {
        let mut specials = vec![self.spec.unk_token.as_str(), self.spec.pad_token.as_str()];
        specials.extend(self.spec.init_token.as_deref());
        specials.extend(self.spec.eos_token.as_deref());
        specials
    }

    // ── Vocabulary ────────────────────────────────────────────────────────────

    /// Add this field's tokens from one example to `counter`.
    pub fn count_tokens(&self, example: &Example, counter: &mut Counter) {
        let mut add = |tok: &str| *counter.entry(tok.to_string()).or_insert(0) += 1;
        match example.column(&self.spec.column) {
            Some(ColumnValue::Tokens(tokens)) if self.spec.sequential => {
                tokens.iter().for_each(|t| add(t.as_str()));
            }
            Some(ColumnValue::Tokens(tokens)) => add(&tokens.join(" ")),
            Some(ColumnValue::Chars(words)) => {
                words.iter().flatten().for_each(|c| add(c.as_str()));
            }
            _ => {}
        }
    }

    /// Replace the vocabulary with one built from `counter`.
    pub fn build_vocab_from_counter(&mut self, counter: &Counter) -> Result<()> {
        if !self.spec.uses_vocab() {
            return Err(PipelineError::field_config(
                self.name(),
                "numeric fields do not have a vocabulary",
            ));
        }
        let vocab = Vocab::from_counter(
            counter,
            &self.specials(),
            self.spec.vocab_max_size,
            self.spec.vocab_min_freq,
        );
        tracing::debug!("Built vocabulary for '{}': {} entries", self.name(), vocab.len());
        self.vocab = Some(Arc::new(vocab));
        Ok(())
    }

    /// Count tokens over every example of every source, then rebuild.
    pub fn build_vocab(&mut self, sources: &[&[Example]]) -> Result<()> {
        let mut counter = Counter::new();
        for example in sources.iter().flat_map(|s| s.iter()) {
            self.count_tokens(example, &mut counter);
        }
        self.build_vocab_from_counter(&counter)
    }

    // ── Batch extraction ──────────────────────────────────────────────────────

    /// Gather this field's column across a batch of examples.
    pub fn raw_batch(&self, examples: &[Example]) -> Result<RawBatch> {
        let missing = || PipelineError::field_config(self.name(), "column missing from example");
        let column  = &self.spec.column;

        let batch = match column {
            Column::Words(_) | Column::Feature(..) => RawBatch::Tokens(
                examples
                    .iter()
                    .map(|e| match e.column(column) {
                        Some(ColumnValue::Tokens(t)) => Ok(t.to_vec()),
                        _ => Err(missing()),
                    })
                    .collect::<Result<_>>()?,
            ),
            Column::Chars(_) => RawBatch::Chars(
                examples
                    .iter()
                    .map(|e| match e.column(column) {
                        Some(ColumnValue::Chars(c)) => Ok(c.to_vec()),
                        _ => Err(missing()),
                    })
                    .collect::<Result<_>>()?,
            ),
            Column::Planning | Column::SrcMap { .. } | Column::Alignment { .. } => RawBatch::Ints(
                examples
                    .iter()
                    .map(|e| match e.column(column) {
                        Some(ColumnValue::Ints(v)) => Ok(v.to_vec()),
                        _ => Err(missing()),
                    })
                    .collect::<Result<_>>()?,
            ),
            Column::Indices => {
                RawBatch::Ints(examples.iter().map(|e| vec![e.index as i64]).collect())
            }
            Column::Ptrs { .. } => RawBatch::Tables(
                examples
                    .iter()
                    .map(|e| match e.column(column) {
                        Some(ColumnValue::Table(t)) => Ok(t.cloned()),
                        _ => Err(missing()),
                    })
                    .collect::<Result<_>>()?,
            ),
        };
        Ok(batch)
    }

    // ── Padding ───────────────────────────────────────────────────────────────

    /// Pad a batch to a common length. Non-sequential fields pass through.
    pub fn pad(&self, batch: RawBatch) -> Result<Padded> {
        if !self.spec.sequential {
            return Ok(Padded { rows: batch, lengths: None });
        }
        let spec = &self.spec;

        let (rows, lengths) = match (&spec.kind, batch) {
            (FieldKind::Words, RawBatch::Tokens(rows))
            | (FieldKind::Numeric { .. }, RawBatch::Tokens(rows)) => {
                let b = Boundaries {
                    init: spec.init_token.clone(),
                    eos:  spec.eos_token.clone(),
                    pad:  spec.pad_token.clone(),
                };
                let (rows, lengths) = self.pad_rows(&rows, &b);
                (RawBatch::Tokens(rows), Lengths::Words(lengths))
            }
            (FieldKind::Numeric { .. }, RawBatch::Ints(rows)) => {
                let b = Boundaries {
                    init: spec.init_token.as_deref().map(|t| self.coerce_int(t)).transpose()?,
                    eos:  spec.eos_token.as_deref().map(|t| self.coerce_int(t)).transpose()?,
                    pad:  self.coerce_int(&spec.pad_token)?,
                };
                let (rows, lengths) = self.pad_rows(&rows, &b);
                (RawBatch::Ints(rows), Lengths::Words(lengths))
            }
            (FieldKind::Chars, RawBatch::Chars(rows)) => {
                let (rows, lengths) = self.pad_char_rows(&rows);
                (RawBatch::Chars(rows), Lengths::Chars(lengths))
            }
            (kind, other) => {
                return Err(PipelineError::field_config(
                    self.name(),
                    format!("cannot pad {} with a {kind:?} field", other.variant()),
                ))
            }
        };

        Ok(Padded {
            rows,
            lengths: spec.include_lengths.then_some(lengths),
        })
    }

    fn pad_rows<T: Clone>(&self, rows: &[Vec<T>], b: &Boundaries<T>) -> (Vec<Vec<T>>, Vec<usize>) {
        let max_len = self.spec.target_len(rows.iter().map(Vec::len));
        rows.iter()
            .map(|row| b.apply(row, max_len, self.spec.pad_first, self.spec.truncate_first))
            .unzip()
    }

    fn pad_char_rows(&self, rows: &[Vec<Vec<String>>]) -> (Vec<Vec<Vec<String>>>, Vec<Vec<usize>>) {
        let spec      = &self.spec;
        let max_len   = spec.target_len(rows.iter().map(Vec::len));
        let max_chars = rows.iter().flatten().map(Vec::len).max().unwrap_or(0).max(1);
        let pad       = spec.pad_token.as_str();
        let unit      = |tok: &str| pad_chars(&[tok.to_string()], max_chars, pad);

        let words = Boundaries {
            init: spec.init_token.as_deref().map(unit),
            eos:  spec.eos_token.as_deref().map(unit),
            pad:  unit(pad),
        };
        let counts = Boundaries {
            init: spec.init_token.as_ref().map(|_| 1usize),
            eos:  spec.eos_token.as_ref().map(|_| 1usize),
            pad:  0usize,
        };

        rows.iter()
            .map(|row| {
                let padded_words: Vec<Vec<String>> =
                    row.iter().map(|w| pad_chars(w, max_chars, pad)).collect();
                let char_counts: Vec<usize> = row.iter().map(Vec::len).collect();
                let (p, _) = words.apply(&padded_words, max_len, spec.pad_first, spec.truncate_first);
                let (l, _) = counts.apply(&char_counts, max_len, spec.pad_first, spec.truncate_first);
                (p, l)
            })
            .unzip()
    }

    // ── Numericalization ──────────────────────────────────────────────────────

    /// Turn a padded batch into tensors on `device`.
    pub fn numericalize<B: Backend>(
        &self,
        padded: Padded,
        device: &B::Device,
        train: bool,
    ) -> Result<FieldOutput<B>> {
        let spec = &self.spec;
        if spec.include_lengths && padded.lengths.is_none() {
            return Err(PipelineError::field_config(
                self.name(),
                "lengths were requested but the padded batch has none",
            ));
        }
        if spec.postprocess.is_some() && spec.uses_vocab() {
            return Err(PipelineError::field_config(
                self.name(),
                "postprocessing hooks only apply to numeric fields",
            ));
        }

        let tensor = match spec.kind {
            FieldKind::Words | FieldKind::Chars => {
                let Some(vocab) = self.vocab.as_deref() else {
                    tracing::warn!(
                        "Field '{}' has no vocabulary yet; returning the padded batch unchanged",
                        self.name()
                    );
                    return Ok(FieldOutput::Unvocabularized(padded));
                };
                self.lookup_tensor(&padded.rows, vocab, device)?
            }
            FieldKind::Numeric { dtype } => self.numeric_tensor(&padded.rows, dtype, device, train)?,
        };

        let lengths = padded.lengths.as_ref().map(|l| {
            let flat = l.flatten();
            int_tensor::<B, 1>(&flat, [flat.len()], device)
        });

        Ok(FieldOutput::Tensor(Numericalized { tensor, lengths }))
    }

    /// Pad, then numericalize.
    pub fn process<B: Backend>(
        &self,
        batch: RawBatch,
        device: &B::Device,
        train: bool,
    ) -> Result<FieldOutput<B>> {
        let padded = self.pad(batch)?;
        self.numericalize(padded, device, train)
    }

    fn lookup_tensor<B: Backend>(
        &self,
        rows: &RawBatch,
        vocab: &Vocab,
        device: &B::Device,
    ) -> Result<FieldTensor<B>> {
        let name = self.name();
        match (rows, self.spec.sequential) {
            (RawBatch::Tokens(rows), true) => {
                let width = rectangular(rows, &name)?;
                let ids: Vec<i64> = rows.iter().flatten().map(|w| vocab.stoi(w) as i64).collect();
                let t = int_tensor::<B, 2>(&ids, [rows.len(), width], device);
                Ok(FieldTensor::Int2(self.orient(t)))
            }
            (RawBatch::Tokens(rows), false) => {
                let ids: Vec<i64> = rows.iter().map(|r| vocab.stoi(&r.join(" ")) as i64).collect();
                Ok(FieldTensor::Int1(int_tensor::<B, 1>(&ids, [ids.len()], device)))
            }
            (RawBatch::Chars(_), false) => Err(PipelineError::field_config(
                name,
                "non-sequential character fields are not supported",
            )),
            (RawBatch::Chars(rows), true) => {
                let words = rectangular(rows, &name)?;
                let flat_words: Vec<Vec<String>> = rows.iter().flatten().cloned().collect();
                let chars = rectangular(&flat_words, &name)?;
                let ids: Vec<i64> = flat_words
                    .iter()
                    .flatten()
                    .map(|c| vocab.stoi(c) as i64)
                    .collect();
                let t = int_tensor::<B, 2>(&ids, [rows.len() * words, chars], device);
                Ok(FieldTensor::Int2(self.orient(t)))
            }
            (other, _) => Err(PipelineError::field_config(
                name,
                format!("cannot look up {} in a vocabulary", other.variant()),
            )),
        }
    }

    fn numeric_tensor<B: Backend>(
        &self,
        rows: &RawBatch,
        dtype: NumericType,
        device: &B::Device,
        train: bool,
    ) -> Result<FieldTensor<B>> {
        let name = self.name();
        match (self.spec.postprocess, rows) {
            (Some(Postprocess::SourceMap), RawBatch::Ints(rows)) => {
                let (data, shape) = make_src_map(rows);
                Ok(FieldTensor::Float3(float_tensor::<B, 3>(&data, shape, device)))
            }
            (Some(Postprocess::Alignment), RawBatch::Ints(rows)) => {
                let (data, shape) = make_alignment(rows);
                Ok(FieldTensor::Int2(int_tensor::<B, 2>(&data, shape, device)))
            }
            (Some(Postprocess::Pointers), RawBatch::Tables(tables)) => {
                let (data, shape) = make_pointer_mask(tables, train)?;
                Ok(FieldTensor::Int3(int_tensor::<B, 3>(&data, shape, device)))
            }
            (Some(hook), other) => Err(PipelineError::field_config(
                name,
                format!("{hook:?} cannot collate {}", other.variant()),
            )),
            (None, RawBatch::Ints(rows)) => {
                let values: Vec<Vec<f64>> = rows
                    .iter()
                    .map(|r| r.iter().map(|&v| v as f64).collect())
                    .collect();
                self.shape_numeric(values, dtype, device)
            }
            (None, RawBatch::Tokens(rows)) => {
                let values = rows
                    .iter()
                    .map(|r| r.iter().map(|v| self.coerce(v, dtype)).collect::<Result<Vec<_>>>())
                    .collect::<Result<Vec<_>>>()?;
                self.shape_numeric(values, dtype, device)
            }
            (None, other) => Err(PipelineError::field_config(
                name,
                format!("cannot coerce {} to {dtype}", other.variant()),
            )),
        }
    }

    /// Scalar rows of a non-sequential field become a rank-1 tensor;
    /// everything else is `[batch, width]`, oriented by `batch_first`.
    fn shape_numeric<B: Backend>(
        &self,
        rows: Vec<Vec<f64>>,
        dtype: NumericType,
        device: &B::Device,
    ) -> Result<FieldTensor<B>> {
        let width  = rectangular(&rows, &self.name())?;
        let batch  = rows.len();
        let scalar = !self.spec.sequential && width == 1;
        let flat: Vec<f64> = rows.into_iter().flatten().collect();

        let tensor = match (dtype, scalar) {
            (NumericType::Int, true) => {
                let v: Vec<i64> = flat.iter().map(|&x| x as i64).collect();
                FieldTensor::Int1(int_tensor::<B, 1>(&v, [batch], device))
            }
            (NumericType::Int, false) => {
                let v: Vec<i64> = flat.iter().map(|&x| x as i64).collect();
                FieldTensor::Int2(self.orient(int_tensor::<B, 2>(&v, [batch, width], device)))
            }
            (NumericType::Float, true) => {
                let v: Vec<f32> = flat.iter().map(|&x| x as f32).collect();
                FieldTensor::Float1(float_tensor::<B, 1>(&v, [batch], device))
            }
            (NumericType::Float, false) => {
                let v: Vec<f32> = flat.iter().map(|&x| x as f32).collect();
                FieldTensor::Float2(self.orient(float_tensor::<B, 2>(&v, [batch, width], device)))
            }
        };
        Ok(tensor)
    }

    fn orient<B: Backend, K: BasicOps<B>>(&self, t: Tensor<B, 2, K>) -> Tensor<B, 2, K> {
        if self.spec.batch_first {
            t
        } else {
            t.swap_dims(0, 1)
        }
    }

    fn coerce(&self, value: &str, dtype: NumericType) -> Result<f64> {
        match dtype {
            NumericType::Int => self.coerce_int(value).map(|v| v as f64),
            NumericType::Float => value.trim().parse::<f64>().map_err(|_| self.coercion_error(value, dtype)),
        }
    }

    fn coerce_int(&self, value: &str) -> Result<i64> {
        value
            .trim()
            .parse::<i64>()
            .map_err(|_| self.coercion_error(value, NumericType::Int))
    }

    fn coercion_error(&self, value: &str, dtype: NumericType) -> PipelineError {
        PipelineError::NumericCoercion {
            field: self.name(),
            value: value.to_string(),
            dtype: dtype.to_string(),
        }
    }
}

// ─── FieldSet ─────────────────────────────────────────────────────────────────
/// Token counts keyed by field name.
pub type FieldCounters = HashMap<String, Counter>;

/// Every field of a dataset, keyed by column name.
#[derive(Debug, Clone, Default)]
pub struct FieldSet {
    fields: BTreeMap<String, Field>,
}

impl FieldSet {
    /// The standard text field table for the given feature counts.
    pub fn text_fields(n_src_feats: usize, n_tgt_feats: usize) -> Self {
        let mut set = Self::default();

        for side in [Side::Src1, Side::RefSrc] {
            set.insert(FieldSpec::words(Column::Words(side)).with_boundaries(BOS_WORD, EOS_WORD));
            set.insert(FieldSpec::chars(Column::Chars(side)).with_lengths());
            for j in 0..n_src_feats {
                set.insert(
                    FieldSpec::words(Column::Feature(side, j)).with_boundaries(BOS_WORD, EOS_WORD),
                );
            }
        }

        set.insert(
            FieldSpec::numeric(Column::Planning, NumericType::Int)
                .with_boundaries(BOS_INDEX.to_string(), EOS_INDEX.to_string()),
        );
        set.insert(FieldSpec::words(Column::Words(Side::Tgt1)).with_boundaries(BOS_WORD, EOS_WORD));
        for j in 0..n_tgt_feats {
            set.insert(
                FieldSpec::words(Column::Feature(Side::Tgt1, j)).with_boundaries(BOS_WORD, EOS_WORD),
            );
        }

        set.insert(FieldSpec::words(Column::Words(Side::Src2)).with_lengths());
        set.insert(FieldSpec::chars(Column::Chars(Side::Src2)).with_lengths());
        for j in 0..n_src_feats {
            set.insert(FieldSpec::words(Column::Feature(Side::Src2, j)));
        }

        for side in [Side::Tgt2, Side::RefTgt] {
            set.insert(FieldSpec::words(Column::Words(side)).with_boundaries(BOS_WORD, EOS_WORD));
        }

        for reference in [false, true] {
            set.insert(
                FieldSpec::numeric(Column::SrcMap { reference }, NumericType::Float)
                    .non_sequential()
                    .with_postprocess(Postprocess::SourceMap),
            );
            set.insert(
                FieldSpec::numeric(Column::Alignment { reference }, NumericType::Int)
                    .non_sequential()
                    .with_postprocess(Postprocess::Alignment),
            );
            set.insert(
                FieldSpec::numeric(Column::Ptrs { reference }, NumericType::Int)
                    .non_sequential()
                    .with_postprocess(Postprocess::Pointers),
            );
        }

        set.insert(FieldSpec::numeric(Column::Indices, NumericType::Int).non_sequential());
        set
    }

    pub fn insert(&mut self, spec: FieldSpec) {
        self.fields.insert(spec.name(), Field::new(spec));
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.get_mut(name)
    }

    /// Like `get`, but a missing field is an error.
    pub fn field(&self, name: &str) -> Result<&Field> {
        self.fields
            .get(name)
            .ok_or_else(|| PipelineError::field_config(name, "no such field"))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Make `to` use the same vocabulary instance as `from`.
    pub fn share_vocab(&mut self, from: &str, to: &str) -> Result<()> {
        let vocab = self
            .field(from)?
            .vocab()
            .cloned()
            .ok_or_else(|| PipelineError::field_config(from, "vocabulary has not been built"))?;
        self.fields
            .get_mut(to)
            .ok_or_else(|| PipelineError::field_config(to, "no such field"))?
            .set_vocab(vocab);
        Ok(())
    }

    /// Add one example's tokens to the counter of every
    /// vocabulary-backed field.
    pub fn count_example(&self, example: &Example, counters: &mut FieldCounters) {
        for (name, field) in self.fields.iter().filter(|(_, f)| f.spec.uses_vocab()) {
            field.count_tokens(example, counters.entry(name.clone()).or_default());
        }
    }

    /// Build every vocabulary-backed field from counts gathered with
    /// [`FieldSet::count_example`]. A field with no counts still gets
    /// its specials.
    pub fn build_vocabs_from_counters(&mut self, mut counters: FieldCounters) -> Result<()> {
        let mut built = 0;
        for (name, field) in self.fields.iter_mut().filter(|(_, f)| f.spec.uses_vocab()) {
            let counter = counters.remove(name).unwrap_or_default();
            field.build_vocab_from_counter(&counter)?;
            built += 1;
        }
        tracing::info!("Built {built} vocabularies");
        Ok(())
    }

    /// Build every vocabulary-backed field from `examples` in one pass.
    pub fn build_vocabs<'a>(&mut self, examples: impl IntoIterator<Item = &'a Example>) -> Result<()> {
        let mut counters = FieldCounters::new();
        for example in examples {
            self.count_example(example, &mut counters);
        }
        self.build_vocabs_from_counters(counters)
    }

    /// Snapshot of every built vocabulary, for persistence.
    pub fn vocab_table(&self) -> BTreeMap<String, Vocab> {
        self.fields
            .iter()
            .filter_map(|(name, f)| f.vocab().map(|v| (name.clone(), Vocab::clone(v))))
            .collect()
    }

    /// Attach previously persisted vocabularies. Unknown names are ignored.
    pub fn load_vocab_table(&mut self, table: BTreeMap<String, Vocab>) {
        for (name, vocab) in table {
            if let Some(field) = self.fields.get_mut(&name) {
                field.set_vocab(Arc::new(vocab));
            } else {
                tracing::debug!("Ignoring vocabulary for unknown field '{name}'");
            }
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::example::SideColumns;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn toks(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn example(side: Side, words: &[&str]) -> Example {
        let mut ex = Example::default();
        ex.sides.insert(
            side,
            SideColumns {
                words: toks(words),
                chars: words.iter().map(|w| crate::domain::token::char_units(w)).collect(),
                ..Default::default()
            },
        );
        ex
    }

    fn strip(row: &[String], spec: &FieldSpec) -> Vec<String> {
        row.iter()
            .filter(|w| {
                **w != spec.pad_token
                    && Some(w.as_str()) != spec.init_token.as_deref()
                    && Some(w.as_str()) != spec.eos_token.as_deref()
            })
            .cloned()
            .collect()
    }

    #[test]
    fn test_word_pad_round_trip() {
        let field = Field::new(
            FieldSpec::words(Column::Words(Side::Tgt1))
                .with_boundaries(BOS_WORD, EOS_WORD)
                .with_lengths(),
        );
        let batch = vec![toks(&["a", "b", "c"]), toks(&["d"])];
        let padded = field.pad(RawBatch::Tokens(batch.clone())).unwrap();

        let RawBatch::Tokens(rows) = &padded.rows else { panic!("expected tokens") };
        assert_eq!(rows[1], toks(&["<s>", "d", "</s>", "<pad>", "<pad>"]));
        assert_eq!(padded.lengths, Some(Lengths::Words(vec![5, 3])));
        for (row, original) in rows.iter().zip(&batch) {
            assert_eq!(&strip(row, field.spec()), original);
        }
    }

    #[test]
    fn test_pad_first_keeps_boundaries_next_to_content() {
        let mut spec = FieldSpec::words(Column::Words(Side::Tgt1)).with_boundaries(BOS_WORD, EOS_WORD);
        spec.pad_first = true;
        let padded = Field::new(spec)
            .pad(RawBatch::Tokens(vec![toks(&["a", "b"]), toks(&["c"])]))
            .unwrap();
        let RawBatch::Tokens(rows) = padded.rows else { panic!("expected tokens") };
        assert_eq!(rows[1], toks(&["<pad>", "<s>", "c", "</s>"]));
    }

    #[test]
    fn test_fix_length_counts_boundaries() {
        let mut spec = FieldSpec::words(Column::Words(Side::Tgt1))
            .with_boundaries(BOS_WORD, EOS_WORD)
            .with_lengths();
        spec.fix_length = Some(4);
        spec.truncate_first = true;
        let padded = Field::new(spec)
            .pad(RawBatch::Tokens(vec![toks(&["a", "b", "c"])]))
            .unwrap();
        let RawBatch::Tokens(rows) = padded.rows else { panic!("expected tokens") };
        assert_eq!(rows[0], toks(&["<s>", "b", "c", "</s>"]));
        assert_eq!(padded.lengths, Some(Lengths::Words(vec![4])));
    }

    #[test]
    fn test_char_pad_round_trip() {
        let field = Field::new(FieldSpec::chars(Column::Chars(Side::Src2)).with_lengths());
        let batch = vec![
            vec![toks(&["a", "b", "c"]), toks(&["d"])],
            vec![toks(&["<unk>"])],
        ];
        let padded = field.pad(RawBatch::Chars(batch.clone())).unwrap();

        let RawBatch::Chars(rows) = &padded.rows else { panic!("expected chars") };
        let Some(Lengths::Chars(lengths)) = &padded.lengths else { panic!("expected lengths") };
        assert_eq!(rows[1][1], toks(&["<pad>", "<pad>", "<pad>"]));
        assert_eq!(lengths, &vec![vec![3, 1], vec![1, 0]]);

        for ((row, lens), original) in rows.iter().zip(lengths).zip(&batch) {
            let restored: Vec<Vec<String>> = row
                .iter()
                .zip(lens)
                .filter(|(_, &n)| n > 0)
                .map(|(w, &n)| w[..n].to_vec())
                .collect();
            assert_eq!(&restored, original);
        }
    }

    #[test]
    fn test_build_vocab_orders_specials() {
        let mut field = Field::new(
            FieldSpec::words(Column::Words(Side::Tgt1)).with_boundaries(BOS_WORD, EOS_WORD),
        );
        let data = vec![example(Side::Tgt1, &["b", "c", "c"]), example(Side::Src1, &["x"])];
        field.build_vocab(&[&data]).unwrap();
        let v = field.vocab().unwrap();
        assert_eq!(v.words(), &toks(&["<unk>", "<pad>", "<s>", "</s>", "c", "b"])[..]);

        // rebuilding starts from scratch
        field.build_vocab(&[&data[..1]]).unwrap();
        assert_eq!(field.vocab().unwrap().len(), 6);
    }

    #[test]
    fn test_char_vocab_counts_units() {
        let mut field = Field::new(FieldSpec::chars(Column::Chars(Side::Src1)));
        field.build_vocab(&[&[example(Side::Src1, &["ab", "<unk>"])]]).unwrap();
        let v = field.vocab().unwrap();
        assert!(v.lookup("a").is_some());
        assert!(v.lookup("<unk>").is_some());
        assert!(v.lookup("ab").is_none());
    }

    #[test]
    fn test_numericalize_is_sequence_first() {
        let mut field = Field::new(
            FieldSpec::words(Column::Words(Side::Tgt1)).with_boundaries(BOS_WORD, EOS_WORD),
        );
        field.build_vocab(&[&[example(Side::Tgt1, &["a", "b"])]]).unwrap();
        let device = Default::default();

        let out = field
            .process::<TestBackend>(RawBatch::Tokens(vec![toks(&["a", "b"]), toks(&["b"])]), &device, true)
            .unwrap();
        let t = out.into_tensor("tgt1").unwrap().tensor.into_int2().unwrap();
        assert_eq!(t.dims(), [4, 2]);
        let ids: Vec<i64> = t.into_data().convert::<i64>().to_vec().unwrap();
        // column 1 is "<s> b </s> <pad>"
        assert_eq!(ids, vec![2, 2, 4, 5, 5, 3, 3, 1]);
    }

    #[test]
    fn test_missing_vocab_is_explicit() {
        let field = Field::new(FieldSpec::words(Column::Words(Side::Tgt2)));
        let out = field
            .process::<TestBackend>(RawBatch::Tokens(vec![toks(&["a"])]), &Default::default(), true)
            .unwrap();
        assert!(out.is_unvocabularized());
        assert!(out.into_tensor("tgt2").is_err());
    }

    #[test]
    fn test_lengths_required_when_requested() {
        let mut field = Field::new(FieldSpec::words(Column::Words(Side::Src2)).with_lengths());
        field.build_vocab(&[&[example(Side::Src2, &["a"])]]).unwrap();
        let padded = Padded {
            rows:    RawBatch::Tokens(vec![toks(&["a"])]),
            lengths: None,
        };
        let err = field
            .numericalize::<TestBackend>(padded, &Default::default(), true)
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidFieldConfiguration { .. }));
    }

    #[test]
    fn test_unknown_dtype_and_bad_value() {
        assert!(matches!(
            NumericType::parse("indices", "complex64"),
            Err(PipelineError::InvalidFieldConfiguration { .. })
        ));

        let field = Field::new(FieldSpec::numeric(Column::Indices, NumericType::Int).non_sequential());
        let err = field
            .process::<TestBackend>(RawBatch::Tokens(vec![toks(&["x"])]), &Default::default(), true)
            .unwrap_err();
        assert!(matches!(err, PipelineError::NumericCoercion { .. }));
    }

    #[test]
    fn test_non_sequential_scalars_pass_through() {
        let field = Field::new(FieldSpec::numeric(Column::Indices, NumericType::Int).non_sequential());
        let padded = field.pad(RawBatch::Ints(vec![vec![4], vec![7]])).unwrap();
        assert_eq!(padded.lengths, None);
        let out = field
            .numericalize::<TestBackend>(padded, &Default::default(), true)
            .unwrap();
        let t = out.into_tensor("indices").unwrap().tensor.into_int1().unwrap();
        assert_eq!(t.into_data().convert::<i64>().to_vec::<i64>().unwrap(), vec![4, 7]);
    }

    #[test]
    fn test_planning_pads_with_reserved_ids() {
        let fields = FieldSet::text_fields(0, 0);
        let field = fields.field("tgt1_planning").unwrap();
        let padded = field.pad(RawBatch::Ints(vec![vec![7, 8], vec![9]])).unwrap();
        assert_eq!(padded.rows, RawBatch::Ints(vec![vec![2, 7, 8, 3], vec![2, 9, 3, 1]]));
    }

    #[test]
    fn test_postprocess_on_word_field_is_rejected() {
        let mut field = Field::new(
            FieldSpec::words(Column::Words(Side::Src2)).with_postprocess(Postprocess::SourceMap),
        );
        field.build_vocab(&[&[example(Side::Src2, &["a"])]]).unwrap();
        assert!(field
            .process::<TestBackend>(RawBatch::Tokens(vec![toks(&["a"])]), &Default::default(), true)
            .is_err());
    }

    #[test]
    fn test_share_vocab_aliases_the_same_instance() {
        let mut fields = FieldSet::text_fields(0, 0);
        let data = vec![example(Side::Src2, &["a", "b"])];
        fields.get_mut("src2").unwrap().build_vocab(&[&data]).unwrap();
        fields.share_vocab("src2", "tgt2").unwrap();
        let a = fields.field("src2").unwrap().vocab().unwrap();
        let b = fields.field("tgt2").unwrap().vocab().unwrap();
        assert!(Arc::ptr_eq(a, b));
        assert!(fields.share_vocab("tgt1", "src2").is_err());
    }

    #[test]
    fn test_text_fields_layout() {
        let fields = FieldSet::text_fields(2, 1);
        for name in [
            "src1", "src1_char", "src1_feat_1", "ref_src_feat_0", "tgt1", "tgt1_feat_0",
            "tgt1_planning", "src2", "src2_char", "src2_feat_1", "tgt2", "ref_tgt",
            "src_map", "ref_src_map", "alignment", "ref_alignment", "ptrs", "ref_ptrs", "indices",
        ] {
            assert!(fields.get(name).is_some(), "missing {name}");
        }
        assert!(fields.get("tgt1_feat_1").is_none());
    }

    #[test]
    fn test_counting_in_chunks_matches_one_pass() {
        let first  = vec![example(Side::Src2, &["a", "b", "a"])];
        let second = vec![example(Side::Src2, &["c", "a"]), example(Side::Tgt2, &["z"])];

        let mut whole = FieldSet::text_fields(0, 0);
        whole.build_vocabs(first.iter().chain(second.iter())).unwrap();

        let mut chunked  = FieldSet::text_fields(0, 0);
        let mut counters = FieldCounters::new();
        for chunk in [&first, &second] {
            for ex in chunk.iter() {
                chunked.count_example(ex, &mut counters);
            }
        }
        chunked.build_vocabs_from_counters(counters).unwrap();

        assert_eq!(whole.vocab_table(), chunked.vocab_table());
        let src2 = chunked.field("src2").unwrap().vocab().unwrap();
        // <unk> <pad> a b c
        assert_eq!(src2.len(), 5);
        assert!(chunked.field("tgt1").unwrap().vocab().is_some());
    }
}
