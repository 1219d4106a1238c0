// ============================================================
// Layer 4 — Example Batcher
// ============================================================
// Turns a planned minibatch (a slice of Examples) into tensors.
//
// Every field whose column the examples carry is run through
// Field::process; the results are kept by field name in a Batch.
// A CopyBatch then picks out the tensors the copy generator and
// copy loss need, for the content decoder and (when the corpus
// has reference sides) for the style decoder.
//
// Shapes (sequence-first):
//
//   tgt2 / ref_tgt        [tgt_len + 2, batch]       Int
//   alignment             [tgt_len + 2, batch]       Int
//   src_map               [src_len, batch, dyn]      Float
//   ptrs                  [tgt_len + 2, batch, src]  Int
//   indices               [batch]                    Int
//
// Reference: Burn Book §4 (Batcher)

use burn::prelude::*;
use std::collections::BTreeMap;

use crate::data::field::{FieldOutput, FieldSet, Numericalized};
use crate::domain::errors::{PipelineError, Result};
use crate::domain::example::{ColumnValue, Example};

// ─── Batch ────────────────────────────────────────────────────────────────────
/// Every numericalized field of one minibatch.
#[derive(Debug, Clone)]
pub struct Batch<B: Backend> {
    pub batch_size: usize,
    /// Example ordinals, kept on the host for dynamic-vocabulary lookups.
    pub indices: Vec<usize>,
    pub tensors: BTreeMap<String, Numericalized<B>>,
    /// Fields that were skipped because their vocabulary is missing.
    pub unvocabularized: Vec<String>,
}

impl<B: Backend> Batch<B> {
    pub fn from_examples(
        examples: &[Example],
        fields: &FieldSet,
        device: &B::Device,
        train: bool,
    ) -> Result<Self> {
        let mut tensors         = BTreeMap::new();
        let mut unvocabularized = Vec::new();

        for (name, field) in fields.iter() {
            let column = &field.spec().column;
            let present = examples
                .first()
                .and_then(|e| e.column(column))
                .is_some_and(|v| !matches!(v, ColumnValue::Table(None)));
            if !present {
                continue;
            }

            match field.process::<B>(field.raw_batch(examples)?, device, train)? {
                FieldOutput::Tensor(t) => {
                    tensors.insert(name.to_string(), t);
                }
                FieldOutput::Unvocabularized(_) => unvocabularized.push(name.to_string()),
            }
        }

        Ok(Self {
            batch_size: examples.len(),
            indices: examples.iter().map(|e| e.index).collect(),
            tensors,
            unvocabularized,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Numericalized<B>> {
        self.tensors.get(name)
    }

    fn require(&self, name: &str) -> Result<&Numericalized<B>> {
        self.tensors.get(name).ok_or_else(|| {
            PipelineError::field_config(name, "field is not part of this batch")
        })
    }

    pub fn int2(&self, name: &str) -> Result<Tensor<B, 2, Int>> {
        self.require(name)?.tensor.clone().into_int2()
    }

    pub fn int3(&self, name: &str) -> Result<Tensor<B, 3, Int>> {
        self.require(name)?.tensor.clone().into_int3()
    }

    pub fn float3(&self, name: &str) -> Result<Tensor<B, 3>> {
        self.require(name)?.tensor.clone().into_float3()
    }

    pub fn lengths(&self, name: &str) -> Option<Tensor<B, 1, Int>> {
        self.tensors.get(name).and_then(|t| t.lengths.clone())
    }
}

// ─── CopyBatch ────────────────────────────────────────────────────────────────
/// Copy supervision for one decoder.
#[derive(Debug, Clone)]
pub struct CopySide<B: Backend> {
    /// Full target column including begin and end tokens.
    pub target:    Tensor<B, 2, Int>,
    pub alignment: Tensor<B, 2, Int>,
    pub src_map:   Tensor<B, 3>,
    /// Present only when the corpus came with a pointer file.
    pub ptrs:      Option<Tensor<B, 3, Int>>,
}

impl<B: Backend> CopySide<B> {
    fn from_batch(batch: &Batch<B>, reference: bool) -> Result<Self> {
        let (target, prefix) = if reference { ("ref_tgt", "ref_") } else { ("tgt2", "") };
        let ptrs_name = format!("{prefix}ptrs");
        Ok(Self {
            target:    batch.int2(target)?,
            alignment: batch.int2(&format!("{prefix}alignment"))?,
            src_map:   batch.float3(&format!("{prefix}src_map"))?,
            ptrs:      match batch.get(&ptrs_name) {
                Some(_) => Some(batch.int3(&ptrs_name)?),
                None => None,
            },
        })
    }
}

/// A minibatch ready for the dual copy decoders and their loss.
#[derive(Debug, Clone)]
pub struct CopyBatch<B: Backend> {
    pub inputs:  Batch<B>,
    pub content: CopySide<B>,
    pub style:   Option<CopySide<B>>,
}

impl<B: Backend> CopyBatch<B> {
    pub fn from_batch(inputs: Batch<B>) -> Result<Self> {
        let content = CopySide::from_batch(&inputs, false)?;
        let style = if inputs.get("ref_tgt").is_some() {
            Some(CopySide::from_batch(&inputs, true)?)
        } else {
            None
        };
        Ok(Self { inputs, content, style })
    }

    pub fn batch_size(&self) -> usize {
        self.inputs.batch_size
    }

    pub fn indices(&self) -> &[usize] {
        &self.inputs.indices
    }
}

// ─── ExampleBatcher ───────────────────────────────────────────────────────────
/// Holds what every minibatch conversion needs: fields and device.
#[derive(Debug, Clone)]
pub struct ExampleBatcher<B: Backend> {
    pub fields: FieldSet,
    pub device: B::Device,
    pub train:  bool,
}

impl<B: Backend> ExampleBatcher<B> {
    pub fn new(fields: FieldSet, device: B::Device, train: bool) -> Self {
        Self { fields, device, train }
    }

    pub fn batch(&self, items: &[Example]) -> Result<CopyBatch<B>> {
        let batch = Batch::from_examples(items, &self.fields, &self.device, self.train)?;
        CopyBatch::from_batch(batch)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::{AssembleOptions, CorpusStreams, TextDataset};
    use crate::domain::example::{Side, SideColumns, SideRecord};
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn stream(side: Side, lines: &[&str]) -> Vec<SideRecord> {
        lines
            .iter()
            .enumerate()
            .map(|(index, l)| SideRecord {
                side,
                index,
                columns: SideColumns {
                    words: l.split_whitespace().map(str::to_string).collect(),
                    chars: l
                        .split_whitespace()
                        .map(crate::domain::token::char_units)
                        .collect(),
                    ..Default::default()
                },
            })
            .collect()
    }

    fn dataset(pointers: Option<Vec<String>>) -> TextDataset {
        let streams = CorpusStreams {
            src1: stream(Side::Src1, &["a b c", "d e"]),
            tgt1: Some(stream(Side::Tgt1, &["b c", "e"])),
            src2: Some(stream(Side::Src2, &["a b c", "d e"])),
            tgt2: Some(stream(Side::Tgt2, &["b c", "e x d"])),
            pointers,
            ..Default::default()
        };
        TextDataset::assemble(streams, &AssembleOptions::default()).unwrap()
    }

    fn fields(ds: &TextDataset) -> FieldSet {
        let mut fields = FieldSet::text_fields(0, 0);
        fields.build_vocabs(ds.examples()).unwrap();
        fields
    }

    #[test]
    fn test_copy_batch_shapes() {
        let ds = dataset(None);
        let batcher = ExampleBatcher::<TestBackend>::new(fields(&ds), Default::default(), true);
        let batch = batcher.batch(ds.examples()).unwrap();

        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.indices(), &[0, 1]);
        assert_eq!(batch.content.target.dims(), [5, 2]);
        assert_eq!(batch.content.alignment.dims(), [5, 2]);
        assert_eq!(batch.content.src_map.dims(), [3, 2, 5]);
        assert!(batch.content.ptrs.is_none());
        assert!(batch.style.is_none());
        assert!(batch.inputs.lengths("src2").is_some());
        assert!(batch.inputs.get("tgt1_planning").is_none());
    }

    #[test]
    fn test_pointer_mask_is_attached() {
        let ds = dataset(Some(vec!["0,1 1,2".into(), "0,1 2,0".into()]));
        let batcher = ExampleBatcher::<TestBackend>::new(fields(&ds), Default::default(), true);
        let batch = batcher.batch(ds.examples()).unwrap();
        assert_eq!(batch.content.ptrs.unwrap().dims(), [5, 2, 3]);
    }

    #[test]
    fn test_missing_vocab_is_reported_not_fatal() {
        let ds = dataset(None);
        let mut fields = FieldSet::text_fields(0, 0);
        fields.get_mut("tgt2").unwrap().build_vocab(&[ds.examples()]).unwrap();
        let batch =
            Batch::<TestBackend>::from_examples(ds.examples(), &fields, &Default::default(), true)
                .unwrap();
        assert!(batch.unvocabularized.contains(&"src1".to_string()));
        assert!(batch.get("tgt2").is_some());
    }
}
