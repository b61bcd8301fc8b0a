//! Lemma lexicon (C2): dense integer ids for lemmas, persisted frequency and
//! dominant tag, O(1) reader lookups by id.
//!
//! `id=0` is reserved for the empty lemma. Ids are allocated by atomic
//! increment and are stable only within a single build run; the lexicon file
//! is the only authoritative mapping.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use memmap2::Mmap;

use crate::error::{CollocationsError, Result};

const LEXICON_MAGIC: u32 = 0x4c45_5849; // "LEXI"
const LEXICON_VERSION: u32 = 1;

/// Dense lemma id. `0` is the reserved empty-lemma id.
pub type LemmaId = u32;

/// Concurrent builder assigning ids to lemmas during a build pass.
///
/// Grounded on the atomic-counter + concurrent-map idiom used for
/// request-scoped caches elsewhere in this corpus family (a `DashMap`
/// keyed by a hashable input, populated under concurrent access from a
/// rayon/tokio worker pool).
pub struct LexiconBuilder {
  ids: DashMap<String, LemmaId>,
  next_id: AtomicU32,
  frequency: DashMap<LemmaId, AtomicU64>,
  tag_counts: DashMap<LemmaId, DashMap<String, u64>>,
}

impl Default for LexiconBuilder {
  fn default() -> Self {
    let builder = LexiconBuilder {
      ids: DashMap::new(),
      next_id: AtomicU32::new(1),
      frequency: DashMap::new(),
      tag_counts: DashMap::new(),
    };
    builder.ids.insert(String::new(), 0);
    builder.frequency.insert(0, AtomicU64::new(0));
    builder
  }
}

impl LexiconBuilder {
  /// Create a new, empty builder with the empty lemma pre-reserved at id 0.
  pub fn new() -> Self {
    Self::default()
  }

  /// Record one occurrence of `lemma` tagged `tag`, returning its id.
  /// Allocates a new id on first sight.
  pub fn record(&self, lemma: &str, tag: &str) -> LemmaId {
    let id = if let Some(existing) = self.ids.get(lemma) {
      *existing
    } else {
      let assigned = self.next_id.fetch_add(1, Ordering::Relaxed);
      *self.ids.entry(lemma.to_string()).or_insert(assigned)
    };
    if !lemma.is_empty() {
      self
        .frequency
        .entry(id)
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed);
      self
        .tag_counts
        .entry(id)
        .or_default()
        .entry(tag.to_string())
        .and_modify(|c| *c += 1)
        .or_insert(1);
    }
    id
  }

  /// Number of distinct lemmas seen so far (including the reserved empty
  /// lemma).
  pub fn len(&self) -> usize {
    self.ids.len()
  }

  /// Whether no lemma (besides the reserved empty one) has been recorded.
  pub fn is_empty(&self) -> bool {
    self.len() <= 1
  }

  /// Finalize into an immutable, id-ordered snapshot ready for writing.
  pub fn finish(self) -> LexiconData {
    let n = self.next_id.load(Ordering::Relaxed);
    let mut lemma_by_id: Vec<String> = vec![String::new(); n as usize];
    for entry in self.ids.iter() {
      lemma_by_id[*entry.value() as usize] = entry.key().clone();
    }
    let mut entries = Vec::with_capacity(n as usize);
    for id in 0..n {
      let frequency = self
        .frequency
        .get(&id)
        .map(|c| c.load(Ordering::Relaxed))
        .unwrap_or(0);
      let dominant_pos = self
        .tag_counts
        .get(&id)
        .map(|tags| {
          tags
            .iter()
            .max_by_key(|entry| *entry.value())
            .map(|entry| entry.key().clone())
            .unwrap_or_default()
        })
        .unwrap_or_default();
      entries.push(LexiconEntry {
        lemma: lemma_by_id[id as usize].clone(),
        frequency,
        dominant_pos,
      });
    }
    LexiconData { entries }
  }
}

/// One finalized lexicon entry, at index `id` in [`LexiconData::entries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexiconEntry {
  /// The lemma string.
  pub lemma: String,
  /// Total corpus occurrences.
  pub frequency: u64,
  /// Most frequent tag observed for this lemma.
  pub dominant_pos: String,
}

/// An id-ordered, in-memory lexicon snapshot, ready to persist.
#[derive(Debug, Clone, Default)]
pub struct LexiconData {
  /// `entries[id]` is the entry for lemma id `id`.
  pub entries: Vec<LexiconEntry>,
}

impl LexiconData {
  /// Total lemma occurrences across the corpus (sum of all non-empty-lemma
  /// frequencies).
  pub fn total_tokens(&self) -> u64 {
    self.entries.iter().skip(1).map(|e| e.frequency).sum()
  }

  /// Write the persisted C2 file format to `path`.
  pub fn write_to(&self, path: &Path, total_sentences: u64) -> Result<()> {
    let file = File::create(path).map_err(|e| CollocationsError::io(path, e))?;
    let mut w = BufWriter::new(file);
    let total_tokens = self.total_tokens();
    w.write_all(&LEXICON_MAGIC.to_le_bytes())
      .map_err(|e| CollocationsError::io(path, e))?;
    w.write_all(&LEXICON_VERSION.to_le_bytes())
      .map_err(|e| CollocationsError::io(path, e))?;
    w.write_all(&total_tokens.to_le_bytes())
      .map_err(|e| CollocationsError::io(path, e))?;
    w.write_all(&total_sentences.to_le_bytes())
      .map_err(|e| CollocationsError::io(path, e))?;
    w.write_all(&(self.entries.len() as u32).to_le_bytes())
      .map_err(|e| CollocationsError::io(path, e))?;
    for entry in &self.entries {
      let lemma_bytes = entry.lemma.as_bytes();
      w.write_all(&(lemma_bytes.len() as u16).to_le_bytes())
        .map_err(|e| CollocationsError::io(path, e))?;
      w.write_all(lemma_bytes)
        .map_err(|e| CollocationsError::io(path, e))?;
      w.write_all(&entry.frequency.to_le_bytes())
        .map_err(|e| CollocationsError::io(path, e))?;
      let pos_bytes = entry.dominant_pos.as_bytes();
      w.write_all(&[pos_bytes.len() as u8])
        .map_err(|e| CollocationsError::io(path, e))?;
      w.write_all(pos_bytes)
        .map_err(|e| CollocationsError::io(path, e))?;
    }
    w.flush().map_err(|e| CollocationsError::io(path, e))?;
    Ok(())
  }
}

/// Memory-mapped, read-only lexicon reader. Lemma/tag bytes are sliced from
/// the mapped region; the reader never materializes the whole table eagerly
/// beyond the fixed-size offset arrays built in one pass at open time.
pub struct LexiconReader {
  mmap: Arc<Mmap>,
  frequency: Vec<u64>,
  lemma_offset: Vec<usize>,
  lemma_len: Vec<u16>,
  pos_offset: Vec<usize>,
  pos_len: Vec<u8>,
  by_lemma: HashMap<String, LemmaId>,
  total_tokens: u64,
  total_sentences: u64,
}

impl LexiconReader {
  /// Open and validate a lexicon file, building the parallel offset arrays
  /// in a single pass over the entries.
  pub fn open(path: &Path) -> Result<Self> {
    let file = File::open(path).map_err(|e| CollocationsError::io(path, e))?;
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| CollocationsError::io(path, e))?;

    let header = mmap.get(0..24).ok_or_else(|| {
      CollocationsError::CorruptArtifact("lexicon header truncated".to_string())
    })?;
    let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
    let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
    if magic != LEXICON_MAGIC {
      return Err(CollocationsError::CorruptArtifact(format!(
        "bad lexicon magic: {magic:#x}"
      )));
    }
    if version != LEXICON_VERSION {
      return Err(CollocationsError::CorruptArtifact(format!(
        "unsupported lexicon version: {version}"
      )));
    }
    let total_tokens = u64::from_le_bytes(header[8..16].try_into().unwrap());
    let total_sentences = u64::from_le_bytes(header[16..24].try_into().unwrap());
    let entry_count = u32::from_le_bytes(
      mmap
        .get(24..28)
        .ok_or_else(|| CollocationsError::CorruptArtifact("lexicon header truncated".to_string()))?
        .try_into()
        .unwrap(),
    );

    let mut cursor = 28usize;
    let mut frequency = Vec::with_capacity(entry_count as usize);
    let mut lemma_offset = Vec::with_capacity(entry_count as usize);
    let mut lemma_len = Vec::with_capacity(entry_count as usize);
    let mut pos_offset = Vec::with_capacity(entry_count as usize);
    let mut pos_len = Vec::with_capacity(entry_count as usize);
    let mut by_lemma = HashMap::with_capacity(entry_count as usize);

    for id in 0..entry_count {
      let len = u16::from_le_bytes(read_exact(&mmap, &mut cursor, 2)?.try_into().unwrap());
      let lemma_start = cursor;
      cursor += len as usize;
      let lemma_bytes = mmap.get(lemma_start..cursor).ok_or_else(|| {
        CollocationsError::CorruptArtifact("lexicon entry truncated".to_string())
      })?;
      let lemma = std::str::from_utf8(lemma_bytes)
        .map_err(|e| CollocationsError::CorruptArtifact(format!("invalid utf8: {e}")))?
        .to_string();
      let freq = u64::from_le_bytes(read_exact(&mmap, &mut cursor, 8)?.try_into().unwrap());
      let pos_l = read_exact(&mmap, &mut cursor, 1)?[0];
      let pos_start = cursor;
      cursor += pos_l as usize;
      if mmap.get(pos_start..cursor).is_none() {
        return Err(CollocationsError::CorruptArtifact(
          "lexicon entry truncated".to_string(),
        ));
      }

      frequency.push(freq);
      lemma_offset.push(lemma_start);
      lemma_len.push(len);
      pos_offset.push(pos_start);
      pos_len.push(pos_l);
      by_lemma.insert(lemma, id);
    }

    Ok(LexiconReader {
      mmap: Arc::new(mmap),
      frequency,
      lemma_offset,
      lemma_len,
      pos_offset,
      pos_len,
      by_lemma,
      total_tokens,
      total_sentences,
    })
  }

  /// Number of distinct lemmas, `N`. Ids are exactly `[0, N)`.
  pub fn entry_count(&self) -> usize {
    self.frequency.len()
  }

  /// Total lemma occurrences across the corpus.
  pub fn total_tokens(&self) -> u64 {
    self.total_tokens
  }

  /// Total sentences seen during the build.
  pub fn total_sentences(&self) -> u64 {
    self.total_sentences
  }

  /// O(1), allocation-free (beyond the returned `&str`) lemma lookup.
  pub fn get_lemma(&self, id: LemmaId) -> Option<&str> {
    let id = id as usize;
    let start = *self.lemma_offset.get(id)?;
    let len = *self.lemma_len.get(id)? as usize;
    std::str::from_utf8(&self.mmap[start..start + len]).ok()
  }

  /// O(1) frequency lookup.
  pub fn get_frequency(&self, id: LemmaId) -> Option<u64> {
    self.frequency.get(id as usize).copied()
  }

  /// O(1) dominant-tag lookup.
  pub fn get_dominant_pos(&self, id: LemmaId) -> Option<&str> {
    let id = id as usize;
    let start = *self.pos_offset.get(id)?;
    let len = *self.pos_len.get(id)? as usize;
    std::str::from_utf8(&self.mmap[start..start + len]).ok()
  }

  /// Reverse lookup: lemma string to id, via an in-memory hash built at open
  /// time.
  pub fn get_id(&self, lemma: &str) -> Option<LemmaId> {
    self.by_lemma.get(lemma).copied()
  }
}

fn read_exact<'a>(mmap: &'a Mmap, cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
  let start = *cursor;
  let end = start + len;
  let slice = mmap
    .get(start..end)
    .ok_or_else(|| CollocationsError::CorruptArtifact("lexicon truncated".to_string()))?;
  *cursor = end;
  Ok(slice)
}
