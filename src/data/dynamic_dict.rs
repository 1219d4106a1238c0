// ============================================================
// Layer 4 — Dynamic Dictionary
// ============================================================
// Builds the per-example source vocabulary that lets the copy
// generator point at source words the fixed target vocabulary
// does not know.
//
// For one (source, target) pair:
//
//   vocab      <unk>, <pad>, then the source words by frequency
//   src_map    dynamic id of every source token
//   alignment  0, dynamic id of every target token (0 if the
//              word is not in the source), 0
//
// With a pointer line the alignment becomes stricter: a target
// position keeps its dynamic id only if some pointer group names
// it, and the full PointerTable is attached.
//
//   src  = "a b c"    vocab = {<unk>:0 <pad>:1 a:2 b:3 c:4}
//   tgt  = "b c"      alignment = [0, 3, 4, 0]

use crate::domain::errors::Result;
use crate::domain::example::CopyAnnotations;
use crate::domain::pointer::{parse_groups, target_positions, PointerTable};
use crate::domain::vocab::{Vocab, PAD_WORD, UNK_WORD};

#[derive(Debug, Clone, PartialEq)]
pub struct DynamicDict {
    pub vocab:       Vocab,
    pub annotations: CopyAnnotations,
}

impl DynamicDict {
    /// Build the dictionary for one example.
    ///
    /// `pointer_line` is only consulted when a target is given;
    /// `line_no` is used in parse errors.
    pub fn build(
        src: &[String],
        tgt: Option<&[String]>,
        pointer_line: Option<&str>,
        line_no: usize,
    ) -> Result<Self> {
        let vocab   = Vocab::from_tokens(src, &[UNK_WORD, PAD_WORD]);
        let src_map = src.iter().map(|w| vocab.stoi(w) as i64).collect();

        let mut annotations = CopyAnnotations {
            src_map,
            alignment: None,
            ptrs: None,
        };

        if let Some(tgt) = tgt {
            let alignment = match pointer_line {
                None => wrap(tgt.iter().map(|w| vocab.stoi(w) as i64)),
                Some(line) => {
                    let groups    = parse_groups(line, line_no)?;
                    let annotated = target_positions(&groups);
                    let unk       = vocab.stoi(UNK_WORD) as i64;
                    annotations.ptrs = Some(PointerTable::from_groups(&groups, src.len(), tgt.len()));
                    wrap(tgt.iter().enumerate().map(|(i, w)| {
                        if annotated.contains(&(i as i64)) {
                            vocab.stoi(w) as i64
                        } else {
                            unk
                        }
                    }))
                }
            };
            annotations.alignment = Some(alignment);
        }

        Ok(Self { vocab, annotations })
    }
}

/// Surround target ids with the begin and end markers (both 0).
fn wrap(ids: impl Iterator<Item = i64>) -> Vec<i64> {
    std::iter::once(0).chain(ids).chain(std::iter::once(0)).collect()
}
