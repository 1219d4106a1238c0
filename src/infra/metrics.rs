// ============================================================
// Layer 6 — Statistics and Metrics Logger
// ============================================================
// Statistics accumulates what the copy loss reports for one
// decoder: summed loss, number of non-pad target words, and how
// many of them the collapsed scores predicted correctly.
//
//   xent      = loss / n_words
//   ppl       = exp(min(xent, 100))
//   accuracy  = 100 · n_correct / n_words
//
// The content and style decoders are tracked separately.
//
// MetricsLogger appends one CSV row per epoch:
//   epoch,lambda,content_ppl,content_acc,style_ppl,style_acc
//   1,0.0,412.339100,8.125000,398.120300,9.000000
//   4,0.4,88.014000,31.250000,,
//
// The style columns stay empty when the corpus has no reference
// sides.
//
// Reference: Rust Book §9 (Error Handling)
//            Rust Book §12 (I/O and File Handling)

use anyhow::Result;
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

/// Running loss / word / accuracy totals for one decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub loss:      f64,
    pub n_words:   usize,
    pub n_correct: usize,
}

impl Statistics {
    pub fn new(loss: f64, n_words: usize, n_correct: usize) -> Self {
        Self { loss, n_words, n_correct }
    }

    /// Add another batch's totals into this one.
    pub fn update(&mut self, other: &Statistics) {
        self.loss      += other.loss;
        self.n_words   += other.n_words;
        self.n_correct += other.n_correct;
    }

    /// Mean loss per target word; 0 before any word was seen.
    pub fn xent(&self) -> f64 {
        if self.n_words == 0 {
            return 0.0;
        }
        self.loss / self.n_words as f64
    }

    pub fn ppl(&self) -> f64 {
        self.xent().min(100.0).exp()
    }

    /// Percentage of target words predicted correctly.
    pub fn accuracy(&self) -> f64 {
        if self.n_words == 0 {
            return 0.0;
        }
        100.0 * self.n_correct as f64 / self.n_words as f64
    }
}

/// One row of metrics data for a single epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// The epoch number (starts at 1)
    pub epoch: usize,

    /// Content / style mixing weight used during this epoch
    pub lambda: f32,

    pub content: Statistics,

    /// Absent when the corpus has no reference sides
    pub style: Option<Statistics>,
}

impl EpochMetrics {
    pub fn new(epoch: usize, lambda: f32, content: Statistics, style: Option<Statistics>) -> Self {
        Self { epoch, lambda, content, style }
    }

    /// Returns true if the content perplexity beat the previous best
    pub fn is_improvement(&self, best_ppl: f64) -> bool {
        self.content.ppl() < best_ppl
    }
}

/// Logs epoch metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    /// Full path to the CSV file
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Create a new MetricsLogger.
    /// Writes the CSV header if the file doesn't exist yet.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let csv_path = dir.join("metrics.csv");

        // Appending to an existing log keeps earlier runs
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "epoch,lambda,content_ppl,content_acc,style_ppl,style_acc")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one epoch's metrics as a new row in the CSV.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)?;

        let (style_ppl, style_acc) = match &m.style {
            Some(s) => (format!("{:.6}", s.ppl()), format!("{:.6}", s.accuracy())),
            None => (String::new(), String::new()),
        };
        writeln!(
            f,
            "{},{:.1},{:.6},{:.6},{},{}",
            m.epoch,
            m.lambda,
            m.content.ppl(),
            m.content.accuracy(),
            style_ppl,
            style_acc,
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: content_ppl={:.4}, content_acc={:.2}",
            m.epoch,
            m.content.ppl(),
            m.content.accuracy(),
        );

        Ok(())
    }

    /// Return the path to the metrics CSV file
    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}
