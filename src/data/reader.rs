// ============================================================
// Layer 4 — Sharded Corpus Reader
// ============================================================
// Streams one side of a (possibly huge) parallel corpus in
// memory-bounded shards.
//
// Two ways to drive a reader:
//
//   driving    shard() reads until roughly `shard_size` bytes
//              have been consumed since the last shard ended,
//              then stops. The next call seeks back to the saved
//              byte offset and continues from there.
//
//   lockstep   read_aligned(peer) ignores its own shard size and
//              reads exactly as many lines as the peer has read
//              so far. Running out of lines first is an error.
//
//   src1.txt  ──► driving reader  ──┐
//                                   ├──► zipped by position
//   tgt1.txt  ──► lockstep reader ──┘
//
// The byte size is only checked every 64 lines, so shards are
// approximately, not exactly, `shard_size` bytes.
//
// Reference: Rust Book §12 (I/O), std::io::BufRead / Seek

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::domain::errors::{PipelineError, Result};
use crate::domain::example::{Side, SideColumns, SideRecord};
use crate::domain::token::extract_text_features;
use crate::domain::traits::ExampleSource;

/// Lines between two byte-size checks.
const SIZE_CHECK_INTERVAL: usize = 64;

pub struct ShardedCorpusReader {
    path:          PathBuf,
    corpus:        BufReader<File>,
    side:          Side,
    line_truncate: usize,
    shard_size:    u64,

    /// Byte offset where the next shard starts.
    last_pos:   u64,
    /// Byte offset of the read cursor.
    pos:        u64,
    /// Index of the last line read over the whole file.
    line_index: Option<usize>,
    /// Feature count every line of this file must agree with.
    n_feats:    Option<usize>,
    eof:        bool,
}

impl ShardedCorpusReader {
    /// Open a corpus file.
    ///
    /// `line_truncate` keeps at most that many tokens per line
    /// (0 = unlimited); `shard_size` is the approximate shard size
    /// in bytes (0 = the whole file is one shard).
    pub fn open(
        path: impl AsRef<Path>,
        line_truncate: usize,
        side: Side,
        shard_size: u64,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        tracing::debug!("Opened {} corpus '{}'", side, path.display());

        Ok(Self {
            path,
            corpus: BufReader::new(file),
            side,
            line_truncate,
            shard_size,
            last_pos: 0,
            pos: 0,
            line_index: None,
            n_feats: None,
            eof: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Feature count of the next unread line, without consuming it.
    pub fn num_feats(&mut self) -> Result<Option<usize>> {
        let saved = self.pos;
        let mut line = String::new();
        self.corpus.read_line(&mut line)?;
        self.corpus.seek(SeekFrom::Start(saved))?;

        let tokens = self.truncate(&line);
        let n_feats = extract_text_features(&tokens)?.feature_count;
        if self.n_feats.is_none() {
            self.n_feats = n_feats;
        }
        Ok(n_feats)
    }

    /// Start the next byte-bounded shard.
    pub fn shard(&mut self) -> Result<ShardIter<'_>> {
        self.corpus.seek(SeekFrom::Start(self.last_pos))?;
        self.pos = self.last_pos;
        Ok(ShardIter {
            reader:    self,
            iteration: 0,
            done:      false,
        })
    }

    /// Read the next driving shard fully into memory.
    pub fn read_shard(&mut self) -> Result<Vec<SideRecord>> {
        self.shard()?.collect()
    }

    /// Read in lockstep with `peer` until both have consumed the same
    /// number of lines. Copies the peer's end-of-file flag.
    pub fn read_aligned(&mut self, peer: &dyn ExampleSource) -> Result<Vec<SideRecord>> {
        let mut records = Vec::new();
        let target = peer.line_index();

        while self.line_index < target {
            let Some(line) = self.next_line()? else {
                return Err(PipelineError::CorpusLengthMismatch {
                    side:    self.side.to_string(),
                    lines:   self.lines_read(),
                    context: format!("lockstep with '{}'", peer.side()),
                });
            };
            let record = self.to_record(&line, records.len())?;
            records.push(record);
        }

        if peer.hit_end() {
            // The peer is exhausted; anything left here is a longer corpus.
            let mut rest = String::new();
            if self.corpus.read_line(&mut rest)? > 0 {
                return Err(PipelineError::CorpusLengthMismatch {
                    side:    peer.side().to_string(),
                    lines:   peer.line_index().map_or(0, |i| i + 1),
                    context: format!("lockstep with '{}'", self.side),
                });
            }
            self.eof = true;
        }

        tracing::debug!("{}: {} lockstep records", self.side, records.len());
        Ok(records)
    }

    fn lines_read(&self) -> usize {
        self.line_index.map_or(0, |i| i + 1)
    }

    fn truncate<'l>(&self, line: &'l str) -> Vec<&'l str> {
        let tokens = line.split_whitespace();
        if self.line_truncate > 0 {
            tokens.take(self.line_truncate).collect()
        } else {
            tokens.collect()
        }
    }

    /// Read one raw line, advancing the cursor. `None` at end of file.
    fn next_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let n = self.corpus.read_line(&mut line)?;
        if n == 0 {
            return Ok(None);
        }
        self.pos += n as u64;
        self.line_index = Some(self.line_index.map_or(0, |i| i + 1));
        Ok(Some(line))
    }

    fn to_record(&mut self, line: &str, index: usize) -> Result<SideRecord> {
        let tokens    = self.truncate(line);
        let extracted = extract_text_features(&tokens)?;

        match (self.n_feats, extracted.feature_count) {
            (Some(expected), Some(found)) if expected != found => {
                return Err(PipelineError::InconsistentFeatureCount {
                    expected,
                    found,
                    token: tokens.first().map(|t| t.to_string()).unwrap_or_default(),
                });
            }
            (None, found) => self.n_feats = found,
            _ => {}
        }

        let planning = if self.side == Side::Tgt1 {
            let line_no = self.line_index.unwrap_or(0);
            let ints = extracted
                .words
                .iter()
                .map(|w| {
                    w.parse::<i64>().map_err(|_| PipelineError::InvalidPlanningToken {
                        line:  line_no,
                        token: w.clone(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Some(ints)
        } else {
            None
        };

        Ok(SideRecord {
            side: self.side,
            index,
            columns: SideColumns {
                words:    extracted.words,
                chars:    extracted.chars,
                features: extracted.features,
                planning,
            },
        })
    }

    /// One step of the driving loop: `None` ends the shard.
    fn next_driving(&mut self, iteration: usize) -> Result<Option<SideRecord>> {
        if self.shard_size != 0
            && self.line_index.is_some_and(|i| i % SIZE_CHECK_INTERVAL == 0)
            && self.pos >= self.last_pos + self.shard_size
        {
            self.last_pos = self.pos;
            return Ok(None);
        }

        match self.next_line()? {
            Some(line) => self.to_record(&line, iteration).map(Some),
            None => {
                self.eof = true;
                Ok(None)
            }
        }
    }
}

impl ExampleSource for ShardedCorpusReader {
    fn side(&self) -> Side {
        self.side
    }

    fn line_index(&self) -> Option<usize> {
        self.line_index
    }

    fn hit_end(&self) -> bool {
        self.eof
    }

    fn next_shard(&mut self, peer: Option<&dyn ExampleSource>) -> Result<Vec<SideRecord>> {
        match peer {
            Some(peer) => self.read_aligned(peer),
            None => self.read_shard(),
        }
    }
}

// ─── ShardIter ────────────────────────────────────────────────────────────────
/// Lazily yields the records of one driving shard.
pub struct ShardIter<'a> {
    reader:    &'a mut ShardedCorpusReader,
    iteration: usize,
    done:      bool,
}

impl Iterator for ShardIter<'_> {
    type Item = Result<SideRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_driving(self.iteration) {
            Ok(Some(record)) => {
                self.iteration += 1;
                Some(Ok(record))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
