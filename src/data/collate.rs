// ============================================================
// Layer 4 — Batch Collation Helpers
// ============================================================
// Pure host-side functions that turn per-example copy data into
// dense, batch-wide buffers, plus the two helpers that lift flat
// buffers into burn tensors.
//
//   make_src_map       src_map rows   → [src_len, batch, dyn_vocab]  one-hot
//   make_alignment     alignment rows → [tgt_len, batch]             zero padded
//   make_pointer_mask  pointer tables → [tgt_len + 2, batch, src_len]
//
// All buffers are row-major (last dimension contiguous), which is
// the layout Tensor::reshape expects.
//
// Reference: Burn Book §3 (Tensor creation)

use burn::prelude::*;

use crate::domain::errors::{PipelineError, Result};
use crate::domain::pointer::PointerTable;

// ─── Tensor helpers ───────────────────────────────────────────────────────────
/// Build an Int tensor of any rank from a flat row-major buffer.
pub fn int_tensor<B: Backend, const D: usize>(
    values: &[i64],
    shape: [usize; D],
    device: &B::Device,
) -> Tensor<B, D, Int> {
    let flat: Vec<i32> = values.iter().map(|&v| v as i32).collect();
    Tensor::<B, 1, Int>::from_ints(flat.as_slice(), device).reshape(shape)
}

/// Build a Float tensor of any rank from a flat row-major buffer.
pub fn float_tensor<B: Backend, const D: usize>(
    values: &[f32],
    shape: [usize; D],
    device: &B::Device,
) -> Tensor<B, D> {
    Tensor::<B, 1>::from_floats(values, device).reshape(shape)
}

/// Width shared by every row, or an error naming `what` if ragged.
pub fn rectangular<T>(rows: &[Vec<T>], what: &str) -> Result<usize> {
    let width = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|r| r.len() != width) {
        return Err(PipelineError::field_config(what, "rows have different lengths"));
    }
    Ok(width)
}

// ─── Copy data ────────────────────────────────────────────────────────────────
/// One-hot source map: `out[j][i][t] = 1` where example `i` has
/// dynamic id `t` at source position `j`.
pub fn make_src_map(rows: &[Vec<i64>]) -> (Vec<f32>, [usize; 3]) {
    let batch    = rows.len();
    let src_len  = rows.iter().map(Vec::len).max().unwrap_or(0);
    let dyn_size = rows.iter().flatten().copied().max().map_or(1, |m| m.max(0) as usize + 1);

    let mut out = vec![0.0f32; src_len * batch * dyn_size];
    for (i, row) in rows.iter().enumerate() {
        for (j, &t) in row.iter().enumerate() {
            out[(j * batch + i) * dyn_size + t.max(0) as usize] = 1.0;
        }
    }
    (out, [src_len, batch, dyn_size])
}

/// Sequence-first alignment matrix, right-padded with zeros.
pub fn make_alignment(rows: &[Vec<i64>]) -> (Vec<i64>, [usize; 2]) {
    let batch   = rows.len();
    let tgt_len = rows.iter().map(Vec::len).max().unwrap_or(0);

    let mut out = vec![0i64; tgt_len * batch];
    for (i, row) in rows.iter().enumerate() {
        for (j, &a) in row.iter().enumerate() {
            out[j * batch + i] = a;
        }
    }
    (out, [tgt_len, batch])
}

/// Pointer mask: `out[t + 1][i][s] = 1` for every source position `s`
/// that pointer group `t` of example `i` names. The `+ 1` leaves room
/// for the begin-of-sentence step.
///
/// Outside training the mask keeps its shape but stays all zero.
pub fn make_pointer_mask(
    tables: &[Option<PointerTable>],
    train: bool,
) -> Result<(Vec<i64>, [usize; 3])> {
    let tables: Vec<&PointerTable> = tables
        .iter()
        .map(|t| {
            t.as_ref().ok_or_else(|| {
                PipelineError::field_config("ptrs", "example has no pointer table")
            })
        })
        .collect::<Result<_>>()?;

    let batch   = tables.len();
    let src_len = tables.iter().map(|t| t.src_len()).max().unwrap_or(0);
    let tgt_len = tables.iter().map(|t| t.tgt_len()).max().unwrap_or(0) + 2;

    let mut out = vec![0i64; tgt_len * batch * src_len];
    if train {
        for (i, table) in tables.iter().enumerate() {
            for (t, sources) in table.groups() {
                let row = t + 1;
                if row < 0 || row as usize >= tgt_len {
                    return Err(PipelineError::PointerOutOfRange {
                        position: t,
                        src_len,
                    });
                }
                for &s in sources {
                    if s < 0 || s as usize >= src_len {
                        return Err(PipelineError::PointerOutOfRange { position: s, src_len });
                    }
                    out[(row as usize * batch + i) * src_len + s as usize] = 1;
                }
            }
        }
    }
    Ok((out, [tgt_len, batch, src_len]))
}
