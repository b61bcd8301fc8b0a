//! Stage B: k-way merge of a shard's spilled runs plus its residual
//! in-memory map (itself sorted and treated as one more run), summing counts
//! on identical keys and filtering by `minCooccurrence`.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::builder::spill::RunReader;
use crate::error::Result;

/// One sorted source of `(key, count)` records feeding the merge: either a
/// spilled run file or the shard's residual in-memory entries.
pub enum MergeSource {
  /// A spilled run file, read sequentially.
  Run(RunReader),
  /// The shard's residual entries, already sorted ascending by key.
  Memory(std::vec::IntoIter<(u64, u32)>),
}

impl MergeSource {
  fn next(&mut self) -> Result<Option<(u64, u32)>> {
    match self {
      MergeSource::Run(reader) => reader.next_record(),
      MergeSource::Memory(iter) => Ok(iter.next()),
    }
  }
}

/// Merge every `sources` into one ascending-by-key stream, summing counts
/// for identical keys across sources, and dropping entries whose summed
/// count falls below `min_cooccurrence`.
pub fn merge_sources(
  mut sources: Vec<MergeSource>,
  min_cooccurrence: u32,
) -> Result<Vec<(u64, u32)>> {
  // `peeked[i]` is the next not-yet-emitted record from `sources[i]`.
  let mut peeked: Vec<Option<(u64, u32)>> = Vec::with_capacity(sources.len());
  let mut heap: BinaryHeap<Reverse<(u64, usize)>> = BinaryHeap::new();
  for (i, source) in sources.iter_mut().enumerate() {
    let record = source.next()?;
    if let Some((key, _)) = record {
      heap.push(Reverse((key, i)));
    }
    peeked.push(record);
  }

  let mut merged = Vec::new();
  while let Some(Reverse((key, _))) = heap.pop() {
    // Collect every source currently peeking at `key`, summing counts, and
    // refill each consumed source's peek slot.
    let mut total: u32 = 0;
    let mut same_key_indices = Vec::new();
    // The popped entry's source index was `_`; re-derive by scanning peeked
    // for any source whose current peek equals `key` (there may be several,
    // since the heap only dedupes by (key, one source) per pop).
    for (i, slot) in peeked.iter().enumerate() {
      if let Some((k, count)) = slot {
        if *k == key {
          total = total.saturating_add(*count);
          same_key_indices.push(i);
        }
      }
    }
    for i in &same_key_indices {
      let record = sources[*i].next()?;
      if let Some((next_key, _)) = record {
        heap.push(Reverse((next_key, *i)));
      }
      peeked[*i] = record;
    }
    // The heap may still hold stale (key, i) tuples for sources whose peek
    // slot we just advanced past `key` from an earlier pop in this same
    // iteration; drain and ignore any further entries equal to `key`.
    while let Some(&Reverse((k, _))) = heap.peek() {
      if k == key {
        heap.pop();
      } else {
        break;
      }
    }
    if total >= min_cooccurrence {
      merged.push((key, total));
    }
  }
  Ok(merged)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::builder::spill::write_run;
  use tempfile::tempdir;

  fn pack(a: u32, b: u32) -> u64 {
    ((a as u64) << 32) | b as u64
  }

  #[test]
  fn merges_and_sums_identical_keys_across_sources() {
    let dir = tempdir().unwrap();
    let run_path = dir.path().join("run.bin");
    write_run(&run_path, &[(pack(1, 2), 3), (pack(1, 5), 1)]).unwrap();

    let residual = vec![(pack(1, 2), 4), (pack(2, 1), 10)];
    let sources = vec![
      MergeSource::Run(RunReader::open(&run_path).unwrap()),
      MergeSource::Memory(residual.into_iter()),
    ];

    let merged = merge_sources(sources, 2).unwrap();
    // (1,5)=1 dropped by min_cooccurrence=2; (1,2)=3+4=7 kept; (2,1)=10 kept.
    assert_eq!(merged, vec![(pack(1, 2), 7), (pack(2, 1), 10)]);
  }

  #[test]
  fn empty_sources_yield_empty_merge() {
    assert_eq!(merge_sources(vec![], 1).unwrap(), Vec::new());
  }
}
