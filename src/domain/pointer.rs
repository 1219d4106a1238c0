// ============================================================
// Layer 3 — Pointer Table
// ============================================================
// Explicit span alignment between target positions and source
// positions, read from a pointer file.
//
// A pointer line is a space-separated list of groups; each group
// is comma-separated integers. The first integer of a group is a
// target position, the rest are the source positions it copies
// from:
//
//     "0,3 2,5,6"   target 0 ← source 3; target 2 ← sources 5, 6
//
// The table stores one row per group, right-padded with zeros.
// The final column of each group row holds the group size. Two
// trailer rows follow: the source length, then the target length,
// each in column 0.
//
//     groups: [0,3] [2,5,6]   src len 7, tgt len 4
//
//     0 3 0 | 2
//     2 5 6 | 3
//     7 0 0 | 0
//     4 0 0 | 0

use serde::{Deserialize, Serialize};

use crate::domain::errors::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerTable {
    rows:  usize,
    width: usize,
    data:  Vec<i64>,
}

impl PointerTable {
    /// Parse one pointer line for a pair of the given lengths.
    /// `line_no` is only used in error messages.
    pub fn parse(line: &str, src_len: usize, tgt_len: usize, line_no: usize) -> Result<Self> {
        let groups = parse_groups(line, line_no)?;
        Ok(Self::from_groups(&groups, src_len, tgt_len))
    }

    pub fn from_groups(groups: &[Vec<i64>], src_len: usize, tgt_len: usize) -> Self {
        let max_len = groups.iter().map(Vec::len).max().unwrap_or(0);
        let rows    = groups.len() + 2;
        let width   = max_len + 1;
        let mut data = vec![0i64; rows * width];

        for (r, group) in groups.iter().enumerate() {
            data[r * width..r * width + group.len()].copy_from_slice(group);
            data[r * width + max_len] = group.len() as i64;
        }
        data[(rows - 2) * width] = src_len as i64;
        data[(rows - 1) * width] = tgt_len as i64;

        Self { rows, width, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn get(&self, row: usize, col: usize) -> i64 {
        self.data[row * self.width + col]
    }

    pub fn row(&self, row: usize) -> &[i64] {
        &self.data[row * self.width..(row + 1) * self.width]
    }

    pub fn src_len(&self) -> usize {
        self.get(self.rows - 2, 0) as usize
    }

    pub fn tgt_len(&self) -> usize {
        self.get(self.rows - 1, 0) as usize
    }

    /// `(target position, aligned source positions)` for every group row.
    pub fn groups(&self) -> impl Iterator<Item = (i64, &[i64])> + '_ {
        (0..self.rows - 2).map(move |r| {
            let row   = self.row(r);
            let count = row[self.width - 1] as usize;
            (row[0], &row[1..count.max(1)])
        })
    }
}

/// Split a pointer line into integer groups.
pub fn parse_groups(line: &str, line_no: usize) -> Result<Vec<Vec<i64>>> {
    line.split_whitespace()
        .map(|entry| {
            entry
                .split(',')
                .map(|v| v.trim().parse::<i64>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|_| PipelineError::PointerParse {
                    line:  line_no,
                    entry: entry.to_string(),
                })
        })
        .collect()
}

/// Target positions named by a pointer line (first integer of each group).
pub fn target_positions(groups: &[Vec<i64>]) -> Vec<i64> {
    groups.iter().filter_map(|g| g.first().copied()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_matches_documented_example() {
        let t = PointerTable::parse("0,3 2,5,6", 7, 4, 0).unwrap();
        assert_eq!(t.rows(), 4);
        assert_eq!(t.width(), 4);
        assert_eq!(t.row(0), &[0, 3, 0, 2]);
        assert_eq!(t.row(1), &[2, 5, 6, 3]);
        assert_eq!(t.src_len(), 7);
        assert_eq!(t.tgt_len(), 4);
    }

    #[test]
    fn test_groups_iterate_source_positions() {
        let t = PointerTable::parse("1,4,5 3,0", 6, 5, 0).unwrap();
        let groups: Vec<(i64, Vec<i64>)> = t.groups().map(|(g, s)| (g, s.to_vec())).collect();
        assert_eq!(groups, vec![(1, vec![4, 5]), (3, vec![0])]);
    }

    #[test]
    fn test_empty_line_has_only_trailers() {
        let t = PointerTable::parse("", 3, 2, 0).unwrap();
        assert_eq!(t.rows(), 2);
        assert_eq!(t.width(), 1);
        assert_eq!(t.groups().count(), 0);
    }

    #[test]
    fn test_bad_entry_is_reported() {
        let err = PointerTable::parse("0,1 x,2", 3, 3, 9).unwrap_err();
        assert!(matches!(err, PipelineError::PointerParse { line: 9, .. }));
    }
}
