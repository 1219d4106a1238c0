// ============================================================
// Layer 3 — Example Domain Types
// ============================================================
// Plain data describing one parallel training example:
//
//   Side          which logical corpus a column came from
//   SideRecord    one line of one corpus, already tokenized
//   Example       the joined record across all configured sides
//   CopyAnnotations
//                 the dynamic-dictionary data attached to an
//                 example: src_map, alignment and pointer table
//   Column        names a single column of an Example, which is
//                 how fields find their input
//
// No tensors live here; the data layer turns these into tensors
// at batch time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::pointer::PointerTable;

// ─── Side ─────────────────────────────────────────────────────────────────────
/// The six logical corpora the pipeline can read in parallel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    Src1,
    Tgt1,
    Src2,
    Tgt2,
    RefSrc,
    RefTgt,
}

impl Side {
    pub const ALL: [Side; 6] = [
        Side::Src1,
        Side::Tgt1,
        Side::Src2,
        Side::Tgt2,
        Side::RefSrc,
        Side::RefTgt,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Side::Src1   => "src1",
            Side::Tgt1   => "tgt1",
            Side::Src2   => "src2",
            Side::Tgt2   => "tgt2",
            Side::RefSrc => "ref_src",
            Side::RefTgt => "ref_tgt",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Side::ALL
            .into_iter()
            .find(|side| side.name() == s)
            .ok_or_else(|| format!("unknown corpus side '{s}'"))
    }
}

// ─── SideRecord ───────────────────────────────────────────────────────────────
/// One tokenized corpus line tagged with its side and read ordinal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideRecord {
    pub side: Side,
    /// Ordinal of the line within its shard.
    pub index: usize,
    pub columns: SideColumns,
}

/// Everything derived from one line of one side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SideColumns {
    pub words: Vec<String>,
    pub chars: Vec<Vec<String>>,
    /// `features[j]` is feature column `j`, one value per word.
    pub features: Vec<Vec<String>>,
    /// Integer reading of the words; only present on `tgt1`.
    pub planning: Option<Vec<i64>>,
}

// ─── CopyAnnotations ──────────────────────────────────────────────────────────
/// Dynamic-dictionary data for one (source, target) pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CopyAnnotations {
    /// Dynamic-vocabulary id of every source token.
    pub src_map: Vec<i64>,
    /// Begin marker, dynamic id per target token, end marker.
    pub alignment: Option<Vec<i64>>,
    /// Present only when pointer supervision was supplied.
    pub ptrs: Option<PointerTable>,
}

// ─── Example ──────────────────────────────────────────────────────────────────
/// A joined example across every configured side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub index: usize,
    pub sides: BTreeMap<Side, SideColumns>,
    /// Content decoder copy data (`src2` → `tgt2`).
    pub copy: Option<CopyAnnotations>,
    /// Style decoder copy data (`ref_src` → `ref_tgt`).
    pub ref_copy: Option<CopyAnnotations>,
}

impl Example {
    pub fn side(&self, side: Side) -> Option<&SideColumns> {
        self.sides.get(&side)
    }

    pub fn words(&self, side: Side) -> Option<&[String]> {
        self.sides.get(&side).map(|c| c.words.as_slice())
    }

    /// Number of words on `side`, zero when the side is absent.
    pub fn len_of(&self, side: Side) -> usize {
        self.words(side).map_or(0, <[String]>::len)
    }

    fn annotations(&self, reference: bool) -> Option<&CopyAnnotations> {
        if reference {
            self.ref_copy.as_ref()
        } else {
            self.copy.as_ref()
        }
    }

    /// Borrow the raw value of one column, if this example has it.
    pub fn column(&self, column: &Column) -> Option<ColumnValue<'_>> {
        match column {
            Column::Words(side) => self.side(*side).map(|c| ColumnValue::Tokens(&c.words)),
            Column::Chars(side) => self.side(*side).map(|c| ColumnValue::Chars(&c.chars)),
            Column::Feature(side, j) => self
                .side(*side)
                .and_then(|c| c.features.get(*j))
                .map(|f| ColumnValue::Tokens(f)),
            Column::Planning => self
                .side(Side::Tgt1)
                .and_then(|c| c.planning.as_deref())
                .map(ColumnValue::Ints),
            Column::SrcMap { reference } => self
                .annotations(*reference)
                .map(|a| ColumnValue::Ints(&a.src_map)),
            Column::Alignment { reference } => self
                .annotations(*reference)
                .and_then(|a| a.alignment.as_deref())
                .map(ColumnValue::Ints),
            Column::Ptrs { reference } => self
                .annotations(*reference)
                .filter(|a| a.alignment.is_some())
                .map(|a| ColumnValue::Table(a.ptrs.as_ref())),
            Column::Indices => Some(ColumnValue::Index(self.index)),
        }
    }
}

// ─── Column ───────────────────────────────────────────────────────────────────
/// Addresses one column of an [`Example`] by what it holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Column {
    Words(Side),
    Chars(Side),
    Feature(Side, usize),
    Planning,
    SrcMap { reference: bool },
    Alignment { reference: bool },
    Ptrs { reference: bool },
    Indices,
}

impl Column {
    /// Canonical field name, e.g. `src2_char` or `ref_alignment`.
    pub fn name(&self) -> String {
        let prefix = |reference: bool| if reference { "ref_" } else { "" };
        match self {
            Column::Words(side)      => side.name().to_string(),
            Column::Chars(side)      => format!("{side}_char"),
            Column::Feature(side, j) => format!("{side}_feat_{j}"),
            Column::Planning         => "tgt1_planning".to_string(),
            Column::SrcMap { reference }    => format!("{}src_map", prefix(*reference)),
            Column::Alignment { reference } => format!("{}alignment", prefix(*reference)),
            Column::Ptrs { reference }      => format!("{}ptrs", prefix(*reference)),
            Column::Indices          => "indices".to_string(),
        }
    }
}

/// A borrowed view of one column of one example.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnValue<'a> {
    Tokens(&'a [String]),
    Chars(&'a [Vec<String>]),
    Ints(&'a [i64]),
    /// `None` when the example was assembled without a pointer file.
    Table(Option<&'a PointerTable>),
    Index(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_names_round_trip() {
        for side in Side::ALL {
            assert_eq!(side.name().parse::<Side>().unwrap(), side);
        }
        assert!("src3".parse::<Side>().is_err());
    }

    #[test]
    fn test_column_names() {
        assert_eq!(Column::Chars(Side::Src2).name(), "src2_char");
        assert_eq!(Column::Feature(Side::RefSrc, 1).name(), "ref_src_feat_1");
        assert_eq!(Column::Alignment { reference: true }.name(), "ref_alignment");
        assert_eq!(Column::Ptrs { reference: false }.name(), "ptrs");
    }

    #[test]
    fn test_missing_side_has_no_column() {
        let mut ex = Example::default();
        ex.sides.insert(
            Side::Src1,
            SideColumns {
                words: vec!["a".into()],
                ..Default::default()
            },
        );
        assert!(ex.column(&Column::Words(Side::Src1)).is_some());
        assert!(ex.column(&Column::Words(Side::Tgt2)).is_none());
        assert!(ex.column(&Column::SrcMap { reference: false }).is_none());
        assert_eq!(ex.column(&Column::Indices), Some(ColumnValue::Index(0)));
        assert_eq!(ex.len_of(Side::Src1), 1);
    }
}
