//! Spill run files (§6.1.b): `(packedPairKey, count)` records sorted
//! ascending by key, written when an in-memory shard exceeds
//! `spillThreshold` and consumed again by Stage B's k-way merge.
//!
//! `magic = 0x50414952 ("PAIR"), u32 version=1, u32 recordCount, {i64 key,
//! i32 count}[recordCount]`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{CollocationsError, Result};

const RUN_MAGIC: u32 = 0x5041_4952; // "PAIR"
const RUN_VERSION: u32 = 1;

/// Write `entries` (already sorted ascending by key) as a run file at `path`.
pub fn write_run(path: &Path, entries: &[(u64, u32)]) -> Result<()> {
  let file = File::create(path).map_err(|e| CollocationsError::io(path, e))?;
  let mut w = BufWriter::new(file);
  w.write_all(&RUN_MAGIC.to_le_bytes())
    .map_err(|e| CollocationsError::io(path, e))?;
  w.write_all(&RUN_VERSION.to_le_bytes())
    .map_err(|e| CollocationsError::io(path, e))?;
  w.write_all(&(entries.len() as u32).to_le_bytes())
    .map_err(|e| CollocationsError::io(path, e))?;
  for &(key, count) in entries {
    w.write_all(&(key as i64).to_le_bytes())
      .map_err(|e| CollocationsError::io(path, e))?;
    w.write_all(&(count as i32).to_le_bytes())
      .map_err(|e| CollocationsError::io(path, e))?;
  }
  w.flush().map_err(|e| CollocationsError::io(path, e))?;
  Ok(())
}

/// Sequential reader over a run file, yielding `(key, count)` in the
/// ascending order they were written, for the k-way merge in Stage B.
pub struct RunReader {
  path: PathBuf,
  reader: BufReader<File>,
  remaining: u32,
}

impl RunReader {
  /// Open `path`, validating magic and version.
  pub fn open(path: &Path) -> Result<Self> {
    let file = File::open(path).map_err(|e| CollocationsError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut header = [0u8; 12];
    reader
      .read_exact(&mut header)
      .map_err(|e| CollocationsError::io(path, e))?;
    let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
    let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
    if magic != RUN_MAGIC {
      return Err(CollocationsError::CorruptArtifact(format!(
        "bad run file magic: {magic:#x}"
      )));
    }
    if version != RUN_VERSION {
      return Err(CollocationsError::CorruptArtifact(format!(
        "unsupported run file version: {version}"
      )));
    }
    let remaining = u32::from_le_bytes(header[8..12].try_into().unwrap());
    Ok(RunReader {
      path: path.to_path_buf(),
      reader,
      remaining,
    })
  }

  /// Read the next `(key, count)` record, if any remain.
  pub fn next_record(&mut self) -> Result<Option<(u64, u32)>> {
    if self.remaining == 0 {
      return Ok(None);
    }
    let mut buf = [0u8; 12];
    self
      .reader
      .read_exact(&mut buf)
      .map_err(|e| CollocationsError::io(&self.path, e))?;
    let key = i64::from_le_bytes(buf[0..8].try_into().unwrap()) as u64;
    let count = i32::from_le_bytes(buf[8..12].try_into().unwrap()) as u32;
    self.remaining -= 1;
    Ok(Some((key, count)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn write_then_read_round_trips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("run0.bin");
    let entries = vec![(1u64, 3u32), (2, 5), (u64::MAX, 1)];
    write_run(&path, &entries).unwrap();

    let mut reader = RunReader::open(&path).unwrap();
    let mut read_back = Vec::new();
    while let Some(record) = reader.next_record().unwrap() {
      read_back.push(record);
    }
    assert_eq!(read_back, entries);
    assert_eq!(reader.next_record().unwrap(), None);
  }

  #[test]
  fn bad_magic_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.bin");
    std::fs::write(&path, [0u8; 12]).unwrap();
    assert!(matches!(
      RunReader::open(&path),
      Err(CollocationsError::CorruptArtifact(_))
    ));
  }
}
