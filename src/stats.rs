//! Term statistics store (C3): per-lemma aggregate frequency, document
//! frequency, and tag distribution, used as the denominator source for
//! association scores.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use dashmap::DashMap;

use crate::error::{CollocationsError, Result};
use crate::token::Token;

/// Per-lemma aggregate statistics. Invariant:
/// `sum(pos_distribution.values()) == total_frequency`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TermStatistics {
  /// Count of token occurrences across the corpus.
  pub total_frequency: u64,
  /// Count of distinct sentences containing this lemma.
  pub document_frequency: u32,
  /// Mapping tag -> count.
  pub pos_distribution: HashMap<String, u64>,
}

#[derive(Default)]
struct StatsAccumulator {
  total_frequency: AtomicU64,
  document_frequency: AtomicU32,
  tag_counts: DashMap<String, AtomicU64>,
}

/// Concurrent builder for the term statistics store. Call [`record_sentence`]
/// once per sentence so document frequency counts distinct sentences rather
/// than raw occurrences.
///
/// [`record_sentence`]: StatsBuilder::record_sentence
#[derive(Default)]
pub struct StatsBuilder {
  entries: DashMap<String, StatsAccumulator>,
  total_sentences: AtomicU64,
}

impl StatsBuilder {
  /// Create an empty builder.
  pub fn new() -> Self {
    Self::default()
  }

  /// Fold one sentence's tokens into the statistics, skipping the empty
  /// lemma and counting each distinct lemma's document frequency exactly
  /// once for this sentence.
  pub fn record_sentence(&self, tokens: &[Token]) {
    self.total_sentences.fetch_add(1, Ordering::Relaxed);
    let mut seen = std::collections::HashSet::new();
    for token in tokens {
      if token.lemma.is_empty() {
        continue;
      }
      let acc = self.entries.entry(token.lemma.clone()).or_default();
      acc.total_frequency.fetch_add(1, Ordering::Relaxed);
      acc
        .tag_counts
        .entry(token.tag.clone())
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed);
      if seen.insert(token.lemma.clone()) {
        acc.document_frequency.fetch_add(1, Ordering::Relaxed);
      }
    }
  }

  /// Finalize into an immutable snapshot, sorted by descending total
  /// frequency.
  pub fn finish(self) -> TermStatsData {
    let total_sentences = self.total_sentences.load(Ordering::Relaxed);
    let mut entries: Vec<(String, TermStatistics)> = self
      .entries
      .into_iter()
      .map(|(lemma, acc)| {
        let pos_distribution = acc
          .tag_counts
          .into_iter()
          .map(|(tag, count)| (tag, count.load(Ordering::Relaxed)))
          .collect();
        (
          lemma,
          TermStatistics {
            total_frequency: acc.total_frequency.load(Ordering::Relaxed),
            document_frequency: acc.document_frequency.load(Ordering::Relaxed),
            pos_distribution,
          },
        )
      })
      .collect();
    entries.sort_by(|a, b| {
      b.1
        .total_frequency
        .cmp(&a.1.total_frequency)
        .then_with(|| a.0.cmp(&b.0))
    });
    let total_tokens = entries.iter().map(|(_, s)| s.total_frequency).sum();
    TermStatsData {
      entries,
      total_tokens,
      total_sentences,
    }
  }
}

/// An immutable, frequency-sorted term statistics snapshot, ready to persist.
#[derive(Debug, Clone, Default)]
pub struct TermStatsData {
  /// Entries sorted by descending `total_frequency`, ties broken by lemma.
  pub entries: Vec<(String, TermStatistics)>,
  /// Total token occurrences across the corpus.
  pub total_tokens: u64,
  /// Total sentences processed.
  pub total_sentences: u64,
}

impl TermStatsData {
  /// Persist the C3 file format to `path`.
  pub fn write_to(&self, path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|e| CollocationsError::io(path, e))?;
    let mut w = BufWriter::new(file);
    w.write_all(&self.total_tokens.to_le_bytes())
      .map_err(|e| CollocationsError::io(path, e))?;
    w.write_all(&self.total_sentences.to_le_bytes())
      .map_err(|e| CollocationsError::io(path, e))?;
    w.write_all(&(self.entries.len() as u32).to_le_bytes())
      .map_err(|e| CollocationsError::io(path, e))?;
    for (lemma, stats) in &self.entries {
      let lemma_bytes = lemma.as_bytes();
      w.write_all(&(lemma_bytes.len() as u16).to_le_bytes())
        .map_err(|e| CollocationsError::io(path, e))?;
      w.write_all(lemma_bytes)
        .map_err(|e| CollocationsError::io(path, e))?;
      w.write_all(&stats.total_frequency.to_le_bytes())
        .map_err(|e| CollocationsError::io(path, e))?;
      w.write_all(&stats.document_frequency.to_le_bytes())
        .map_err(|e| CollocationsError::io(path, e))?;
      w.write_all(&(stats.pos_distribution.len() as u16).to_le_bytes())
        .map_err(|e| CollocationsError::io(path, e))?;
      let mut tags: Vec<_> = stats.pos_distribution.iter().collect();
      tags.sort_by(|a, b| a.0.cmp(b.0));
      for (tag, count) in tags {
        let tag_bytes = tag.as_bytes();
        w.write_all(&[tag_bytes.len() as u8])
          .map_err(|e| CollocationsError::io(path, e))?;
        w.write_all(tag_bytes)
          .map_err(|e| CollocationsError::io(path, e))?;
        w.write_all(&count.to_le_bytes())
          .map_err(|e| CollocationsError::io(path, e))?;
      }
    }
    w.flush().map_err(|e| CollocationsError::io(path, e))?;
    Ok(())
  }
}

/// Reader over the C3 file format. The full sorted table is parsed into
/// memory once at open time, with an accompanying hash map for O(1) exact
/// lookups; this matches the "in-memory hash on startup" reader contract
/// rather than the zero-copy-mmap contract used for the lexicon and
/// collocations artifact, since term statistics records are variable-width
/// and dominated by the tag-distribution tail.
pub struct StatsReader {
  entries: Vec<(String, TermStatistics)>,
  by_lemma: HashMap<String, usize>,
  total_tokens: u64,
  total_sentences: u64,
}

impl StatsReader {
  /// Parse the full table from `path`.
  pub fn open(path: &Path) -> Result<Self> {
    let file = File::open(path).map_err(|e| CollocationsError::io(path, e))?;
    let mut r = BufReader::new(file);

    let mut header = [0u8; 20];
    r.read_exact(&mut header)
      .map_err(|e| CollocationsError::io(path, e))?;
    let total_tokens = u64::from_le_bytes(header[0..8].try_into().unwrap());
    let total_sentences = u64::from_le_bytes(header[8..16].try_into().unwrap());
    let entry_count = u32::from_le_bytes(header[16..20].try_into().unwrap());

    let mut entries = Vec::with_capacity(entry_count as usize);
    let mut by_lemma = HashMap::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
      let lemma = read_prefixed_string_u16(&mut r, path)?;
      let mut buf8 = [0u8; 8];
      r.read_exact(&mut buf8)
        .map_err(|e| CollocationsError::io(path, e))?;
      let total_frequency = u64::from_le_bytes(buf8);
      let mut buf4 = [0u8; 4];
      r.read_exact(&mut buf4)
        .map_err(|e| CollocationsError::io(path, e))?;
      let document_frequency = u32::from_le_bytes(buf4);
      let mut buf2 = [0u8; 2];
      r.read_exact(&mut buf2)
        .map_err(|e| CollocationsError::io(path, e))?;
      let tag_count = u16::from_le_bytes(buf2);

      let mut pos_distribution = HashMap::with_capacity(tag_count as usize);
      for _ in 0..tag_count {
        let mut len_buf = [0u8; 1];
        r.read_exact(&mut len_buf)
          .map_err(|e| CollocationsError::io(path, e))?;
        let mut tag_bytes = vec![0u8; len_buf[0] as usize];
        r.read_exact(&mut tag_bytes)
          .map_err(|e| CollocationsError::io(path, e))?;
        let tag = String::from_utf8(tag_bytes)
          .map_err(|e| CollocationsError::CorruptArtifact(format!("invalid utf8: {e}")))?;
        let mut count_buf = [0u8; 8];
        r.read_exact(&mut count_buf)
          .map_err(|e| CollocationsError::io(path, e))?;
        pos_distribution.insert(tag, u64::from_le_bytes(count_buf));
      }

      by_lemma.insert(lemma.clone(), entries.len());
      entries.push((
        lemma,
        TermStatistics {
          total_frequency,
          document_frequency,
          pos_distribution,
        },
      ));
    }

    Ok(StatsReader {
      entries,
      by_lemma,
      total_tokens,
      total_sentences,
    })
  }

  /// Full statistics for `lemma`, if present.
  pub fn get_statistics(&self, lemma: &str) -> Option<&TermStatistics> {
    self.by_lemma.get(lemma).map(|&i| &self.entries[i].1)
  }

  /// Corpus-wide total frequency for `lemma`, or 0 if absent.
  pub fn get_frequency(&self, lemma: &str) -> u64 {
    self
      .get_statistics(lemma)
      .map(|s| s.total_frequency)
      .unwrap_or(0)
  }

  /// Lemmas whose frequency is at least `threshold`, in descending-frequency
  /// order. Cheap: the table is pre-sorted, so this is a prefix scan that
  /// stops at the first entry below threshold.
  pub fn get_lemmas_by_min_frequency(&self, threshold: u64) -> Vec<&str> {
    self
      .entries
      .iter()
      .take_while(|(_, s)| s.total_frequency >= threshold)
      .map(|(lemma, _)| lemma.as_str())
      .collect()
  }

  /// Total token occurrences across the corpus.
  pub fn total_tokens(&self) -> u64 {
    self.total_tokens
  }

  /// Total sentences processed during the build.
  pub fn total_sentences(&self) -> u64 {
    self.total_sentences
  }
}

fn read_prefixed_string_u16(r: &mut impl Read, path: &Path) -> Result<String> {
  let mut len_buf = [0u8; 2];
  r.read_exact(&mut len_buf)
    .map_err(|e| CollocationsError::io(path, e))?;
  let len = u16::from_le_bytes(len_buf) as usize;
  let mut bytes = vec![0u8; len];
  r.read_exact(&mut bytes)
    .map_err(|e| CollocationsError::io(path, e))?;
  String::from_utf8(bytes).map_err(|e| CollocationsError::CorruptArtifact(format!("invalid utf8: {e}")))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::token::Token;
  use tempfile::tempdir;

  fn sentence(words: &[(&str, &str)]) -> Vec<Token> {
    words
      .iter()
      .enumerate()
      .map(|(i, (lemma, tag))| Token::new(i as u32, *lemma, *lemma, *tag, 0, 0))
      .collect()
  }

  #[test]
  fn document_frequency_counts_distinct_sentences() {
    let builder = StatsBuilder::new();
    builder.record_sentence(&sentence(&[("cat", "NN"), ("cat", "NN"), ("sit", "VB")]));
    builder.record_sentence(&sentence(&[("cat", "NN")]));
    let data = builder.finish();
    let cat = data
      .entries
      .iter()
      .find(|(l, _)| l == "cat")
      .map(|(_, s)| s)
      .unwrap();
    assert_eq!(cat.total_frequency, 3);
    assert_eq!(cat.document_frequency, 2);
    assert_eq!(cat.pos_distribution.get("NN"), Some(&3));
  }

  #[test]
  fn write_read_round_trip_and_prefix_scan() {
    let builder = StatsBuilder::new();
    builder.record_sentence(&sentence(&[("cat", "NN"), ("dog", "NN"), ("dog", "NN")]));
    let data = builder.finish();

    let dir = tempdir().unwrap();
    let path = dir.path().join("stats.bin");
    data.write_to(&path).unwrap();

    let reader = StatsReader::open(&path).unwrap();
    assert_eq!(reader.get_frequency("dog"), 2);
    assert_eq!(reader.get_frequency("cat"), 1);
    assert_eq!(reader.get_frequency("missing"), 0);
    assert_eq!(reader.get_lemmas_by_min_frequency(2), vec!["dog"]);
    assert_eq!(reader.total_sentences(), 1);
  }
}
