//! Collocations artifact (C5): the binary file produced by the builder (C4)
//! and read at query time. Layout is §6.1:
//!
//! ```text
//! offset  size   field
//! 0       4      magic = 0x434F4C4C ("COLL")
//! 4       4      version = 1
//! 8       4      entryCount (u32)
//! 12      4      windowSize (u32)
//! 16      4      topK (u32)
//! 20      8      totalTokens (u64)
//! 28      8      offsetTableStart (u64)
//! 36      8      offsetTableSize (u64)
//! 44      20     reserved (zero)
//! 64      ...    entries (concatenated)
//! ...     ...    offsetTable[entryCount]
//! ```
//!
//! Entry: `u16 headwordLen, bytes, u64 headwordFrequency, u16 collocateCount,
//! {u8 lemmaLen, bytes, u8 posLen, bytes, u64 cooccurrence, u64 frequency,
//! f32 logDice}[collocateCount]`. Offset-table record: `u16 headwordLen,
//! bytes, i64 entryFileOffset`.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::{CollocationsError, Result};

pub(crate) const ARTIFACT_MAGIC: u32 = 0x434f_4c4c; // "COLL"
pub(crate) const ARTIFACT_VERSION: u32 = 1;
pub(crate) const HEADER_SIZE: u64 = 64;

/// One scored (headword, collocate) pair (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct Collocation {
  /// The collocate lemma.
  pub lemma: String,
  /// Dominant tag of that lemma.
  pub pos: String,
  /// Count of co-occurrences with the headword within the build window.
  pub cooccurrence: u64,
  /// Total corpus frequency of the collocate lemma.
  pub frequency: u64,
  /// Symmetric association measure in `[0, 14]`.
  pub log_dice: f32,
}

/// All collocates retained for one headword lemma (§3). Sorted by `logDice`
/// descending, ties broken by lemma ascending; no collocate equals the
/// headword; each collocate appears at most once.
#[derive(Debug, Clone, PartialEq)]
pub struct CollocationEntry {
  /// The headword lemma.
  pub headword: String,
  /// Corpus-wide frequency of the headword (copy of `TermStatistics`).
  pub headword_frequency: u64,
  /// Up to `topK` collocates.
  pub collocations: Vec<Collocation>,
}

/// An in-memory, not-yet-persisted artifact, as assembled by the builder.
#[derive(Debug, Clone, Default)]
pub struct ArtifactData {
  /// Window size the build used.
  pub window_size: u32,
  /// Max collocates retained per headword.
  pub top_k: u32,
  /// Total corpus token count.
  pub total_tokens: u64,
  /// One entry per surviving headword, in arbitrary (builder-determined)
  /// order; the offset table makes order unobservable to readers.
  pub entries: Vec<CollocationEntry>,
}

impl ArtifactData {
  /// Write the persisted C5 file format to `path`.
  pub fn write_to(&self, path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|e| CollocationsError::io(path, e))?;
    let mut w = BufWriter::new(file);

    let mut body = Vec::new();
    let mut offsets = Vec::with_capacity(self.entries.len());
    for entry in &self.entries {
      offsets.push((entry.headword.clone(), body.len() as i64));
      encode_entry(&mut body, entry);
    }

    let offset_table_start = HEADER_SIZE + body.len() as u64;
    let mut offset_table = Vec::new();
    for (headword, file_offset) in &offsets {
      let bytes = headword.as_bytes();
      offset_table.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
      offset_table.extend_from_slice(bytes);
      offset_table.extend_from_slice(&file_offset.to_le_bytes());
    }

    w.write_all(&ARTIFACT_MAGIC.to_le_bytes())
      .map_err(|e| CollocationsError::io(path, e))?;
    w.write_all(&ARTIFACT_VERSION.to_le_bytes())
      .map_err(|e| CollocationsError::io(path, e))?;
    w.write_all(&(self.entries.len() as u32).to_le_bytes())
      .map_err(|e| CollocationsError::io(path, e))?;
    w.write_all(&self.window_size.to_le_bytes())
      .map_err(|e| CollocationsError::io(path, e))?;
    w.write_all(&self.top_k.to_le_bytes())
      .map_err(|e| CollocationsError::io(path, e))?;
    w.write_all(&self.total_tokens.to_le_bytes())
      .map_err(|e| CollocationsError::io(path, e))?;
    w.write_all(&offset_table_start.to_le_bytes())
      .map_err(|e| CollocationsError::io(path, e))?;
    w.write_all(&(offset_table.len() as u64).to_le_bytes())
      .map_err(|e| CollocationsError::io(path, e))?;
    w.write_all(&[0u8; 20])
      .map_err(|e| CollocationsError::io(path, e))?;
    w.write_all(&body).map_err(|e| CollocationsError::io(path, e))?;
    w.write_all(&offset_table)
      .map_err(|e| CollocationsError::io(path, e))?;
    w.flush().map_err(|e| CollocationsError::io(path, e))?;
    Ok(())
  }
}

/// Incremental, crash-resumable artifact writer (§4.4.4). The data section is
/// appended entry by entry as the builder's Stage C produces them; the header
/// is written as a placeholder at open time and rewritten once at [`finish`].
///
/// [`finish`]: ArtifactWriter::finish
pub struct ArtifactWriter {
  path: PathBuf,
  file: File,
  cursor: u64,
}

impl ArtifactWriter {
  /// Open `path` for a fresh build: truncates any existing file and writes a
  /// zeroed placeholder header.
  pub fn create(path: &Path) -> Result<Self> {
    let mut file = OpenOptions::new()
      .create(true)
      .write(true)
      .truncate(true)
      .open(path)
      .map_err(|e| CollocationsError::io(path, e))?;
    file
      .write_all(&[0u8; HEADER_SIZE as usize])
      .map_err(|e| CollocationsError::io(path, e))?;
    Ok(ArtifactWriter {
      path: path.to_path_buf(),
      file,
      cursor: HEADER_SIZE,
    })
  }

  /// Resume a partial build: open the existing file and seek to
  /// `HEADER_SIZE + resume_offset` (the last checkpointed data-section
  /// length), truncating anything written past that point.
  pub fn resume(path: &Path, resume_offset: u64) -> Result<Self> {
    let file = OpenOptions::new()
      .write(true)
      .open(path)
      .map_err(|e| CollocationsError::io(path, e))?;
    let cursor = HEADER_SIZE + resume_offset;
    file
      .set_len(cursor)
      .map_err(|e| CollocationsError::io(path, e))?;
    Ok(ArtifactWriter {
      path: path.to_path_buf(),
      file,
      cursor,
    })
  }

  /// Append one entry, returning its offset relative to the start of the
  /// data section (i.e. relative to `HEADER_SIZE`), as recorded in the
  /// offsets temp file and, later, the final offset table.
  pub fn append_entry(&mut self, entry: &CollocationEntry) -> Result<i64> {
    let relative_offset = (self.cursor - HEADER_SIZE) as i64;
    let mut buf = Vec::new();
    encode_entry(&mut buf, entry);
    self
      .file
      .seek(SeekFrom::Start(self.cursor))
      .map_err(|e| CollocationsError::io(&self.path, e))?;
    self
      .file
      .write_all(&buf)
      .map_err(|e| CollocationsError::io(&self.path, e))?;
    self.cursor += buf.len() as u64;
    Ok(relative_offset)
  }

  /// Current length of the data section written so far, relative to
  /// `HEADER_SIZE`. Used to drive offsets-file checkpointing.
  pub fn data_len(&self) -> u64 {
    self.cursor - HEADER_SIZE
  }

  /// Force already-written data to disk. Called at each checkpoint.
  pub fn sync(&self) -> Result<()> {
    self.file.sync_data().map_err(|e| CollocationsError::io(&self.path, e))
  }

  /// Append the offset table and rewrite the header with final metadata.
  /// Consumes the writer.
  pub fn finish(
    mut self,
    offsets: &[(String, i64)],
    window_size: u32,
    top_k: u32,
    total_tokens: u64,
  ) -> Result<()> {
    let offset_table_start = self.cursor;
    let mut offset_table = Vec::new();
    for (headword, file_offset) in offsets {
      let bytes = headword.as_bytes();
      offset_table.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
      offset_table.extend_from_slice(bytes);
      offset_table.extend_from_slice(&file_offset.to_le_bytes());
    }
    self
      .file
      .seek(SeekFrom::Start(offset_table_start))
      .map_err(|e| CollocationsError::io(&self.path, e))?;
    self
      .file
      .write_all(&offset_table)
      .map_err(|e| CollocationsError::io(&self.path, e))?;

    let mut header = [0u8; HEADER_SIZE as usize];
    header[0..4].copy_from_slice(&ARTIFACT_MAGIC.to_le_bytes());
    header[4..8].copy_from_slice(&ARTIFACT_VERSION.to_le_bytes());
    header[8..12].copy_from_slice(&(offsets.len() as u32).to_le_bytes());
    header[12..16].copy_from_slice(&window_size.to_le_bytes());
    header[16..20].copy_from_slice(&top_k.to_le_bytes());
    header[20..28].copy_from_slice(&total_tokens.to_le_bytes());
    header[28..36].copy_from_slice(&offset_table_start.to_le_bytes());
    header[36..44].copy_from_slice(&(offset_table.len() as u64).to_le_bytes());
    self
      .file
      .seek(SeekFrom::Start(0))
      .map_err(|e| CollocationsError::io(&self.path, e))?;
    self
      .file
      .write_all(&header)
      .map_err(|e| CollocationsError::io(&self.path, e))?;
    self.file.sync_all().map_err(|e| CollocationsError::io(&self.path, e))?;
    Ok(())
  }
}

fn encode_entry(out: &mut Vec<u8>, entry: &CollocationEntry) {
  let headword_bytes = entry.headword.as_bytes();
  out.extend_from_slice(&(headword_bytes.len() as u16).to_le_bytes());
  out.extend_from_slice(headword_bytes);
  out.extend_from_slice(&entry.headword_frequency.to_le_bytes());
  out.extend_from_slice(&(entry.collocations.len() as u16).to_le_bytes());
  for c in &entry.collocations {
    let lemma_bytes = c.lemma.as_bytes();
    out.push(lemma_bytes.len() as u8);
    out.extend_from_slice(lemma_bytes);
    let pos_bytes = c.pos.as_bytes();
    out.push(pos_bytes.len() as u8);
    out.extend_from_slice(pos_bytes);
    out.extend_from_slice(&c.cooccurrence.to_le_bytes());
    out.extend_from_slice(&c.frequency.to_le_bytes());
    out.extend_from_slice(&c.log_dice.to_le_bytes());
  }
}

/// Memory-mapped, read-only artifact reader (C5). Reads are thread-safe and
/// lock-free after construction; lookups never allocate beyond the returned
/// `CollocationEntry`.
pub struct ArtifactReader {
  mmap: Arc<Mmap>,
  entry_count: u32,
  window_size: u32,
  top_k: u32,
  total_tokens: u64,
  by_lemma: HashMap<String, i64>,
  entry_order: Vec<String>,
}

impl ArtifactReader {
  /// Open and validate an artifact file, loading the offset table into an
  /// in-memory hash map.
  pub fn open(path: &Path) -> Result<Self> {
    let file = File::open(path).map_err(|e| CollocationsError::io(path, e))?;
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| CollocationsError::io(path, e))?;

    let header = mmap.get(0..64).ok_or_else(|| {
      CollocationsError::CorruptArtifact("artifact header truncated".to_string())
    })?;
    let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
    let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
    if magic != ARTIFACT_MAGIC {
      return Err(CollocationsError::CorruptArtifact(format!(
        "bad artifact magic: {magic:#x}"
      )));
    }
    if version != ARTIFACT_VERSION {
      return Err(CollocationsError::CorruptArtifact(format!(
        "unsupported artifact version: {version}"
      )));
    }
    let entry_count = u32::from_le_bytes(header[8..12].try_into().unwrap());
    let window_size = u32::from_le_bytes(header[12..16].try_into().unwrap());
    let top_k = u32::from_le_bytes(header[16..20].try_into().unwrap());
    let total_tokens = u64::from_le_bytes(header[20..28].try_into().unwrap());
    let offset_table_start = u64::from_le_bytes(header[28..36].try_into().unwrap());
    let offset_table_size = u64::from_le_bytes(header[36..44].try_into().unwrap());

    let start = offset_table_start as usize;
    let end = start + offset_table_size as usize;
    let table = mmap.get(start..end).ok_or_else(|| {
      CollocationsError::CorruptArtifact("offset table truncated".to_string())
    })?;

    let mut by_lemma = HashMap::with_capacity(entry_count as usize);
    let mut entry_order = Vec::with_capacity(entry_count as usize);
    let mut cursor = 0usize;
    for _ in 0..entry_count {
      let len = u16::from_le_bytes(table.get(cursor..cursor + 2).ok_or_else(|| {
        CollocationsError::CorruptArtifact("offset table entry truncated".to_string())
      })?.try_into().unwrap()) as usize;
      cursor += 2;
      let headword_bytes = table.get(cursor..cursor + len).ok_or_else(|| {
        CollocationsError::CorruptArtifact("offset table entry truncated".to_string())
      })?;
      let headword = std::str::from_utf8(headword_bytes)
        .map_err(|e| CollocationsError::CorruptArtifact(format!("invalid utf8: {e}")))?
        .to_string();
      cursor += len;
      let file_offset = i64::from_le_bytes(table.get(cursor..cursor + 8).ok_or_else(|| {
        CollocationsError::CorruptArtifact("offset table entry truncated".to_string())
      })?.try_into().unwrap());
      cursor += 8;
      entry_order.push(headword.clone());
      by_lemma.insert(headword, file_offset);
    }

    Ok(ArtifactReader {
      mmap: Arc::new(mmap),
      entry_count,
      window_size,
      top_k,
      total_tokens,
      by_lemma,
      entry_order,
    })
  }

  /// O(1) hash lookup of the headword's offset, then sequential decode of
  /// the entry. Returns `None` if `lemma` is absent.
  pub fn get_collocations(&self, lemma: &str) -> Result<Option<CollocationEntry>> {
    let Some(&offset) = self.by_lemma.get(lemma) else {
      return Ok(None);
    };
    let start = HEADER_SIZE as i64 + offset;
    decode_entry(&self.mmap, start as usize).map(Some)
  }

  /// Whether `lemma` has a precomputed entry.
  pub fn has_lemma(&self, lemma: &str) -> bool {
    self.by_lemma.contains_key(lemma)
  }

  /// Number of entries in the artifact.
  pub fn entry_count(&self) -> u32 {
    self.entry_count
  }

  /// Window size the build used.
  pub fn window_size(&self) -> u32 {
    self.window_size
  }

  /// Max collocates retained per headword at build time.
  pub fn top_k(&self) -> u32 {
    self.top_k
  }

  /// Total corpus token count recorded at build time.
  pub fn total_tokens(&self) -> u64 {
    self.total_tokens
  }

  /// Ordered iteration over every entry, in file order.
  pub fn iterate_all(&self) -> Result<Vec<CollocationEntry>> {
    self
      .entry_order
      .iter()
      .map(|headword| {
        self
          .get_collocations(headword)
          .transpose()
          .unwrap_or_else(|| {
            Err(CollocationsError::CorruptArtifact(format!(
              "offset table referenced missing entry {headword:?}"
            )))
          })
      })
      .collect()
  }
}

fn decode_entry(mmap: &Mmap, start: usize) -> Result<CollocationEntry> {
  let mut cursor = start;
  let headword_len = read_u16(mmap, &mut cursor)? as usize;
  let headword = read_str(mmap, &mut cursor, headword_len)?;
  let headword_frequency = read_u64(mmap, &mut cursor)?;
  let collocate_count = read_u16(mmap, &mut cursor)?;

  let mut collocations = Vec::with_capacity(collocate_count as usize);
  for _ in 0..collocate_count {
    let lemma_len = read_u8(mmap, &mut cursor)? as usize;
    let lemma = read_str(mmap, &mut cursor, lemma_len)?;
    let pos_len = read_u8(mmap, &mut cursor)? as usize;
    let pos = read_str(mmap, &mut cursor, pos_len)?;
    let cooccurrence = read_u64(mmap, &mut cursor)?;
    let frequency = read_u64(mmap, &mut cursor)?;
    let log_dice = f32::from_le_bytes(
      read_slice(mmap, &mut cursor, 4)?.try_into().unwrap(),
    );
    collocations.push(Collocation {
      lemma,
      pos,
      cooccurrence,
      frequency,
      log_dice,
    });
  }

  Ok(CollocationEntry {
    headword,
    headword_frequency,
    collocations,
  })
}

fn read_slice<'a>(mmap: &'a Mmap, cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
  let start = *cursor;
  let end = start + len;
  let slice = mmap
    .get(start..end)
    .ok_or_else(|| CollocationsError::CorruptArtifact("artifact entry truncated".to_string()))?;
  *cursor = end;
  Ok(slice)
}

fn read_u8(mmap: &Mmap, cursor: &mut usize) -> Result<u8> {
  Ok(read_slice(mmap, cursor, 1)?[0])
}

fn read_u16(mmap: &Mmap, cursor: &mut usize) -> Result<u16> {
  Ok(u16::from_le_bytes(read_slice(mmap, cursor, 2)?.try_into().unwrap()))
}

fn read_u64(mmap: &Mmap, cursor: &mut usize) -> Result<u64> {
  Ok(u64::from_le_bytes(read_slice(mmap, cursor, 8)?.try_into().unwrap()))
}

fn read_str(mmap: &Mmap, cursor: &mut usize, len: usize) -> Result<String> {
  let bytes = read_slice(mmap, cursor, len)?;
  std::str::from_utf8(bytes)
    .map(|s| s.to_string())
    .map_err(|e| CollocationsError::CorruptArtifact(format!("invalid utf8: {e}")))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  fn sample_artifact() -> ArtifactData {
    ArtifactData {
      window_size: 5,
      top_k: 100,
      total_tokens: 1000,
      entries: vec![
        CollocationEntry {
          headword: "cat".to_string(),
          headword_frequency: 40,
          collocations: vec![
            Collocation {
              lemma: "sit".to_string(),
              pos: "VB".to_string(),
              cooccurrence: 10,
              frequency: 30,
              log_dice: 9.5,
            },
            Collocation {
              lemma: "mat".to_string(),
              pos: "NN".to_string(),
              cooccurrence: 5,
              frequency: 8,
              log_dice: 8.1,
            },
          ],
        },
        CollocationEntry {
          headword: "dog".to_string(),
          headword_frequency: 20,
          collocations: vec![],
        },
      ],
    }
  }

  #[test]
  fn write_then_read_round_trips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("artifact.bin");
    sample_artifact().write_to(&path).unwrap();

    let reader = ArtifactReader::open(&path).unwrap();
    assert_eq!(reader.entry_count(), 2);
    assert_eq!(reader.window_size(), 5);
    assert_eq!(reader.top_k(), 100);
    assert_eq!(reader.total_tokens(), 1000);
    assert!(reader.has_lemma("cat"));
    assert!(!reader.has_lemma("bird"));

    let cat = reader.get_collocations("cat").unwrap().unwrap();
    assert_eq!(cat.headword_frequency, 40);
    assert_eq!(cat.collocations.len(), 2);
    assert_eq!(cat.collocations[0].lemma, "sit");
    assert!((cat.collocations[0].log_dice - 9.5).abs() < 1e-6);

    assert_eq!(reader.get_collocations("bird").unwrap(), None);
  }

  #[test]
  fn iterate_all_visits_every_entry() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("artifact.bin");
    sample_artifact().write_to(&path).unwrap();
    let reader = ArtifactReader::open(&path).unwrap();
    let all = reader.iterate_all().unwrap();
    assert_eq!(all.len(), 2);
    let headwords: Vec<&str> = all.iter().map(|e| e.headword.as_str()).collect();
    assert!(headwords.contains(&"cat"));
    assert!(headwords.contains(&"dog"));
  }

  #[test]
  fn bad_magic_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.bin");
    std::fs::write(&path, [0u8; 64]).unwrap();
    assert!(matches!(
      ArtifactReader::open(&path),
      Err(CollocationsError::CorruptArtifact(_))
    ));
  }

  #[test]
  fn empty_artifact_has_zero_entry_count() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.bin");
    ArtifactData::default().write_to(&path).unwrap();
    let reader = ArtifactReader::open(&path).unwrap();
    assert_eq!(reader.entry_count(), 0);
  }

  #[test]
  fn incremental_writer_matches_batch_writer() {
    let artifact = sample_artifact();
    let dir = tempdir().unwrap();

    let batch_path = dir.path().join("batch.bin");
    artifact.write_to(&batch_path).unwrap();

    let incremental_path = dir.path().join("incremental.bin");
    let mut writer = ArtifactWriter::create(&incremental_path).unwrap();
    let mut offsets = Vec::new();
    for entry in &artifact.entries {
      let offset = writer.append_entry(entry).unwrap();
      offsets.push((entry.headword.clone(), offset));
    }
    writer
      .finish(&offsets, artifact.window_size, artifact.top_k, artifact.total_tokens)
      .unwrap();

    let batch_reader = ArtifactReader::open(&batch_path).unwrap();
    let incremental_reader = ArtifactReader::open(&incremental_path).unwrap();
    assert_eq!(
      batch_reader.get_collocations("cat").unwrap(),
      incremental_reader.get_collocations("cat").unwrap()
    );
    assert_eq!(incremental_reader.entry_count(), batch_reader.entry_count());
  }

  #[test]
  fn resume_truncates_past_checkpoint_and_continues() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("resumable.bin");
    let mut writer = ArtifactWriter::create(&path).unwrap();
    let entry = CollocationEntry {
      headword: "cat".to_string(),
      headword_frequency: 40,
      collocations: vec![],
    };
    let offset = writer.append_entry(&entry).unwrap();
    writer.sync().unwrap();
    let checkpoint = writer.data_len();
    // Simulate a crash: writer dropped without finish().
    drop(writer);

    let mut resumed = ArtifactWriter::resume(&path, checkpoint).unwrap();
    let entry2 = CollocationEntry {
      headword: "dog".to_string(),
      headword_frequency: 20,
      collocations: vec![],
    };
    let offset2 = resumed.append_entry(&entry2).unwrap();
    resumed
      .finish(&[("cat".to_string(), offset), ("dog".to_string(), offset2)], 5, 100, 1000)
      .unwrap();

    let reader = ArtifactReader::open(&path).unwrap();
    assert_eq!(reader.entry_count(), 2);
    assert!(reader.has_lemma("cat"));
    assert!(reader.has_lemma("dog"));
  }
}
