//! Single-pass collocations builder (C4) — the hardest component. A
//! three-stage streaming pipeline with bounded memory: shard-and-count,
//! k-way merge per shard, reduce to top-K per headword (§4.4.2).

pub mod checkpoint;
pub mod merge;
pub mod spill;

use std::collections::HashMap;
use std::collections::BinaryHeap;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::artifact::{Collocation, CollocationEntry};
use crate::error::{CollocationsError, Result};
use crate::indexing::{decode_tokens, CorpusIndex};
use crate::lexicon::LexiconReader;
use crate::scores::log_dice;
use crate::stats::StatsReader;

/// Builder configuration (§4.4.1). Constructed explicitly and passed into
/// [`Builder::new`] — no process-wide global state (spec.md §9).
#[derive(Debug, Clone)]
pub struct BuilderConfig {
  /// Maximum absolute positional distance within a sentence for a
  /// co-occurrence to be counted.
  pub window_size: u32,
  /// Maximum retained collocates per headword. When more than `top_k`
  /// collocates are tied on `logDice` at the cut line, the excess is
  /// silently truncated rather than retained — an observable quirk carried
  /// over deliberately rather than resolved, per spec.
  pub top_k: u32,
  /// Headwords with corpus frequency below this are skipped.
  pub min_frequency: u64,
  /// Per-pair occurrences below this are dropped.
  pub min_cooccurrence: u32,
  /// Number of in-memory partitions for pair counts.
  pub shards: usize,
  /// Max distinct pairs per shard before forcing a spill to disk.
  pub spill_threshold: usize,
  /// Worker thread count for Stage A.
  pub threads: usize,
  /// Periodicity, in written headwords, of offset-table checkpoints.
  pub checkpoint_every: usize,
  /// Reuse existing partial output if present.
  pub resume: bool,
}

impl Default for BuilderConfig {
  fn default() -> Self {
    BuilderConfig {
      window_size: 5,
      top_k: 100,
      min_frequency: 10,
      min_cooccurrence: 2,
      shards: 64,
      spill_threshold: 2_000_000,
      threads: rayon::current_num_threads(),
      checkpoint_every: 5_000,
      resume: false,
    }
  }
}

/// Outcome of a completed (or cancelled) build run.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
  /// Number of `CollocationEntry` records written to the artifact.
  pub entries_written: u64,
  /// Sentences skipped due to `CorruptBlob` or `InconsistentStatistics`.
  pub sentences_skipped: u64,
  /// Number of entries recovered from a prior interrupted run, if resumed.
  pub resumed_entries: u64,
}

struct Shard {
  map: Mutex<HashMap<u64, u32>>,
  runs: Mutex<Vec<PathBuf>>,
  run_seq: AtomicU32,
}

impl Shard {
  fn new() -> Self {
    Shard {
      map: Mutex::new(HashMap::new()),
      runs: Mutex::new(Vec::new()),
      run_seq: AtomicU32::new(0),
    }
  }

  fn add_pairs(
    &self,
    pairs: &[(u32, u32)],
    spill_threshold: usize,
    run_dir: &Path,
    shard_idx: usize,
  ) -> Result<()> {
    let drained = {
      let mut map = self.map.lock().unwrap();
      for &(a, b) in pairs {
        let key = ((a as u64) << 32) | b as u64;
        *map.entry(key).or_insert(0) += 1;
      }
      if map.len() >= spill_threshold {
        Some(std::mem::take(&mut *map))
      } else {
        None
      }
    };
    if let Some(drained) = drained {
      let mut entries: Vec<(u64, u32)> = drained.into_iter().collect();
      entries.sort_unstable_by_key(|&(k, _)| k);
      let seq = self.run_seq.fetch_add(1, Ordering::Relaxed);
      let path = run_dir.join(format!("shard{shard_idx}_run{seq}.pair"));
      debug!(shard = shard_idx, run = seq, entries = entries.len(), "spilling shard");
      spill::write_run(&path, &entries)?;
      self.runs.lock().unwrap().push(path);
    }
    Ok(())
  }

  fn into_residual_sorted(self) -> Vec<(u64, u32)> {
    let mut entries: Vec<(u64, u32)> = self.map.into_inner().unwrap().into_iter().collect();
    entries.sort_unstable_by_key(|&(k, _)| k);
    entries
  }
}

impl Shard {
  fn run_paths(&self) -> Vec<PathBuf> {
    self.runs.lock().unwrap().clone()
  }
}

/// Pops the smallest-priority element first so the heap can be bounded to
/// `top_k` by evicting once it overflows. Priority is `(logDice, reverse
/// lemma)` so that, after collecting, entries sort `logDice` desc / lemma
/// asc as spec requires.
#[derive(Debug, Clone, PartialEq)]
struct RankedCollocation(Collocation);

impl Eq for RankedCollocation {}
impl Ord for RankedCollocation {
  fn cmp(&self, other: &Self) -> std::cmp::Ordering {
    other
      .0
      .log_dice
      .partial_cmp(&self.0.log_dice)
      .unwrap_or(std::cmp::Ordering::Equal)
      .then_with(|| self.0.lemma.cmp(&other.0.lemma))
  }
}
impl PartialOrd for RankedCollocation {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
    Some(self.cmp(other))
  }
}

/// The collocations builder, driven by a lexicon and statistics store
/// produced by the strict prior pass ([`crate::indexing::build_index`]).
pub struct Builder<'a> {
  config: BuilderConfig,
  lexicon: &'a LexiconReader,
  stats: &'a StatsReader,
}

impl<'a> Builder<'a> {
  /// Construct a builder over an already-open lexicon and statistics store.
  pub fn new(config: BuilderConfig, lexicon: &'a LexiconReader, stats: &'a StatsReader) -> Self {
    Builder {
      config,
      lexicon,
      stats,
    }
  }

  /// Run the full three-stage pipeline, writing `output_dir/artifact.bin`.
  /// `cancel` is polled at sentence boundaries (Stage A) and headword
  /// boundaries (Stage C); setting it returns `Cancelled` with the lock
  /// released so a subsequent `resume` build can continue.
  pub fn build(
    &self,
    index: &CorpusIndex,
    output_dir: &Path,
    cancel: &AtomicBool,
  ) -> Result<BuildReport> {
    fs::create_dir_all(output_dir).map_err(|e| CollocationsError::io(output_dir, e))?;
    let lock_path = output_dir.join(".build.lock");
    let artifact_path = output_dir.join("artifact.bin");
    let offsets_path = output_dir.join("artifact.offsets.tmp");
    let run_dir = output_dir.join("spill");
    fs::create_dir_all(&run_dir).map_err(|e| CollocationsError::io(&run_dir, e))?;

    acquire_lock(&lock_path, self.config.resume)?;
    let result = self.build_locked(index, &artifact_path, &offsets_path, &run_dir, cancel);
    let _ = fs::remove_file(&lock_path);
    result
  }

  fn build_locked(
    &self,
    index: &CorpusIndex,
    artifact_path: &Path,
    offsets_path: &Path,
    run_dir: &Path,
    cancel: &AtomicBool,
  ) -> Result<BuildReport> {
    let recovered = if self.config.resume {
      checkpoint::recover(offsets_path)?
    } else {
      checkpoint::RecoveredState {
        offsets: Vec::new(),
        data_len: 0,
      }
    };
    let resumed_entries = recovered.offsets.len() as u64;
    let already_written: std::collections::HashSet<String> =
      recovered.offsets.iter().map(|(h, _)| h.clone()).collect();

    let appender = if self.config.resume && resumed_entries > 0 {
      checkpoint::Appender::resume(artifact_path, offsets_path, recovered)?
    } else {
      checkpoint::Appender::create(artifact_path, offsets_path)?
    };

    info!(sentences = index.len(), "stage A: shard and count");
    let shards: Vec<Shard> = (0..self.config.shards).map(|_| Shard::new()).collect();
    let sentences_skipped = std::sync::atomic::AtomicU64::new(0);

    index
      .sentences()
      .par_iter()
      .try_for_each(|sentence| -> Result<()> {
        if cancel.load(Ordering::Relaxed) {
          return Err(CollocationsError::Cancelled);
        }
        match self.shard_sentence(sentence, &shards, run_dir) {
          Ok(()) => Ok(()),
          Err(CollocationsError::CorruptBlob(msg)) => {
            warn!(error = %msg, "skipping corrupt sentence");
            sentences_skipped.fetch_add(1, Ordering::Relaxed);
            Ok(())
          }
          Err(e) => Err(e),
        }
      })?;

    info!("stage B/C: merge and reduce to top-K per headword");
    let appender = Mutex::new(appender);
    shards
      .into_par_iter()
      .enumerate()
      .try_for_each(|(shard_idx, shard)| -> Result<()> {
        if cancel.load(Ordering::Relaxed) {
          return Err(CollocationsError::Cancelled);
        }
        self.merge_and_reduce_shard(shard_idx, shard, &already_written, &appender, cancel)
      })?;

    let appender = appender.into_inner().unwrap();
    let entries_written = appender.entries_len() as u64;
    appender.finish(self.config.window_size, self.config.top_k, self.lexicon.total_tokens())?;
    let _ = fs::remove_dir_all(run_dir);

    Ok(BuildReport {
      entries_written,
      sentences_skipped: sentences_skipped.load(Ordering::Relaxed),
      resumed_entries,
    })
  }

  /// Stage A for one sentence: decode, compute `(position, lemmaId)` pairs,
  /// route ordered pairs to shards.
  fn shard_sentence(
    &self,
    sentence: &crate::indexing::IndexedSentence,
    shards: &[Shard],
    run_dir: &Path,
  ) -> Result<()> {
    let tokens = decode_tokens(sentence)?;
    let window = self.config.window_size;
    let mut batches: HashMap<usize, Vec<(u32, u32)>> = HashMap::new();

    let ids: Vec<Option<u32>> = tokens
      .iter()
      .map(|t| {
        if t.lemma.is_empty() {
          None
        } else {
          self.lexicon.get_id(&t.lemma)
        }
      })
      .collect();

    for i in 0..tokens.len() {
      let Some(a) = ids[i] else { continue };
      for j in (i + 1)..tokens.len() {
        let gap = tokens[j].position - tokens[i].position;
        if gap > window {
          break;
        }
        let Some(b) = ids[j] else { continue };
        if a == b {
          continue;
        }
        batches.entry((a as usize) % shards.len()).or_default().push((a, b));
        batches.entry((b as usize) % shards.len()).or_default().push((b, a));
      }
    }

    for (shard_idx, pairs) in batches {
      shards[shard_idx].add_pairs(&pairs, self.config.spill_threshold, run_dir, shard_idx)?;
    }
    Ok(())
  }

  /// Stage B + C for one shard: merge its runs, group by headword, emit a
  /// top-K `CollocationEntry` for every surviving headword.
  fn merge_and_reduce_shard(
    &self,
    shard_idx: usize,
    shard: Shard,
    already_written: &std::collections::HashSet<String>,
    appender: &Mutex<checkpoint::Appender>,
    cancel: &AtomicBool,
  ) -> Result<()> {
    let run_paths = shard.run_paths();
    let residual_entries = shard.into_residual_sorted();

    let mut sources = Vec::with_capacity(run_paths.len() + 1);
    for path in &run_paths {
      sources.push(merge::MergeSource::Run(spill::RunReader::open(path)?));
    }
    sources.push(merge::MergeSource::Memory(residual_entries.into_iter()));
    let merged = merge::merge_sources(sources, self.config.min_cooccurrence)?;

    let mut i = 0usize;
    while i < merged.len() {
      if cancel.load(Ordering::Relaxed) {
        return Err(CollocationsError::Cancelled);
      }
      let headword_id = (merged[i].0 >> 32) as u32;
      let mut j = i;
      while j < merged.len() && (merged[j].0 >> 32) as u32 == headword_id {
        j += 1;
      }
      self.emit_headword(headword_id, &merged[i..j], already_written, appender)?;
      i = j;
    }
    debug!(shard = shard_idx, runs = run_paths.len(), "shard reduced");
    Ok(())
  }

  fn emit_headword(
    &self,
    headword_id: u32,
    pairs: &[(u64, u32)],
    already_written: &std::collections::HashSet<String>,
    appender: &Mutex<checkpoint::Appender>,
  ) -> Result<()> {
    let Some(headword) = self.lexicon.get_lemma(headword_id) else {
      return Err(CollocationsError::InconsistentStatistics(format!(
        "lemma id {headword_id} has no lexicon entry"
      )));
    };
    if already_written.contains(headword) {
      return Ok(());
    }
    let headword_frequency = self.stats.get_frequency(headword);
    if headword_frequency < self.config.min_frequency {
      return Ok(());
    }

    let mut heap: BinaryHeap<RankedCollocation> = BinaryHeap::new();
    for &(key, cooccurrence) in pairs {
      let collocate_id = (key & 0xffff_ffff) as u32;
      let Some(collocate) = self.lexicon.get_lemma(collocate_id) else {
        continue;
      };
      if collocate == headword {
        continue;
      }
      let collocate_frequency = self.stats.get_frequency(collocate);
      let pos = self
        .lexicon
        .get_dominant_pos(collocate_id)
        .unwrap_or("")
        .to_string();
      let score = log_dice(cooccurrence as u64, headword_frequency, collocate_frequency);
      heap.push(RankedCollocation(Collocation {
        lemma: collocate.to_string(),
        pos,
        cooccurrence: cooccurrence as u64,
        frequency: collocate_frequency,
        log_dice: score as f32,
      }));
      if heap.len() > self.config.top_k as usize {
        heap.pop();
      }
    }

    let mut collocations: Vec<Collocation> = heap.into_iter().map(|r| r.0).collect();
    collocations.sort_by(|a, b| {
      b.log_dice
        .partial_cmp(&a.log_dice)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.lemma.cmp(&b.lemma))
    });

    let entry = CollocationEntry {
      headword: headword.to_string(),
      headword_frequency,
      collocations,
    };
    appender.lock().unwrap().append(&entry, &self.config)
  }
}

fn acquire_lock(lock_path: &Path, resume: bool) -> Result<()> {
  if resume {
    OpenOptions::new()
      .create(true)
      .write(true)
      .truncate(false)
      .open(lock_path)
      .map_err(|e| CollocationsError::io(lock_path, e))?;
    return Ok(());
  }
  match OpenOptions::new().write(true).create_new(true).open(lock_path) {
    Ok(_) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
      Err(CollocationsError::AlreadyInProgress(lock_path.to_path_buf()))
    }
    Err(e) => Err(CollocationsError::io(lock_path, e)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::artifact::ArtifactReader;
  use crate::indexing::build_index;
  use crate::sentence::{InMemorySentenceSource, Sentence};
  use crate::token::Token;
  use tempfile::tempdir;

  fn sentence(id: u64, lemmas: &[&str]) -> Sentence {
    let tokens = lemmas
      .iter()
      .enumerate()
      .map(|(i, lemma)| Token::new(i as u32, *lemma, *lemma, "NN", 0, 0))
      .collect();
    Sentence::new(id, "text", tokens)
  }

  fn build_corpus() -> Vec<Sentence> {
    // "a" co-occurs with "b" in every sentence (5x), with "c" in 3, with
    // "d" only once (filtered by minCooccurrence=2).
    vec![
      sentence(0, &["a", "b", "c"]),
      sentence(1, &["a", "b", "c"]),
      sentence(2, &["a", "b", "c"]),
      sentence(3, &["a", "b"]),
      sentence(4, &["a", "b", "d"]),
    ]
  }

  #[test]
  fn tiny_corpus_round_trip_yields_expected_collocates() {
    let source = InMemorySentenceSource::new(build_corpus());
    let built = build_index(&source).unwrap();

    let dir = tempdir().unwrap();
    let lexicon_path = dir.path().join("lexicon.bin");
    let stats_path = dir.path().join("stats.bin");
    built.lexicon.write_to(&lexicon_path, built.index.len() as u64).unwrap();
    built.stats.write_to(&stats_path).unwrap();

    let lexicon = LexiconReader::open(&lexicon_path).unwrap();
    let stats = StatsReader::open(&stats_path).unwrap();

    let config = BuilderConfig {
      min_frequency: 1,
      min_cooccurrence: 2,
      shards: 2,
      ..BuilderConfig::default()
    };
    let builder = Builder::new(config, &lexicon, &stats);
    let output_dir = dir.path().join("out");
    let cancel = AtomicBool::new(false);
    let report = builder.build(&built.index, &output_dir, &cancel).unwrap();
    assert_eq!(report.sentences_skipped, 0);

    let reader = ArtifactReader::open(&output_dir.join("artifact.bin")).unwrap();
    let entry = reader.get_collocations("a").unwrap().unwrap();
    let collocates: Vec<&str> = entry.collocations.iter().map(|c| c.lemma.as_str()).collect();
    assert!(collocates.contains(&"b"));
    assert!(collocates.contains(&"c"));
    assert!(!collocates.contains(&"d"), "d has only 1 cooccurrence, below minCooccurrence=2");
    assert!(!collocates.contains(&"a"), "headword must never collocate with itself");
  }

  #[test]
  fn second_concurrent_build_without_resume_is_rejected() {
    let dir = tempdir().unwrap();
    let output_dir = dir.path().join("out");
    fs::create_dir_all(&output_dir).unwrap();
    std::fs::File::create(output_dir.join(".build.lock")).unwrap();

    let source = InMemorySentenceSource::new(build_corpus());
    let built = build_index(&source).unwrap();
    let lexicon_path = dir.path().join("lexicon.bin");
    let stats_path = dir.path().join("stats.bin");
    built.lexicon.write_to(&lexicon_path, 5).unwrap();
    built.stats.write_to(&stats_path).unwrap();
    let lexicon = LexiconReader::open(&lexicon_path).unwrap();
    let stats = StatsReader::open(&stats_path).unwrap();

    let builder = Builder::new(BuilderConfig::default(), &lexicon, &stats);
    let cancel = AtomicBool::new(false);
    assert!(matches!(
      builder.build(&built.index, &output_dir, &cancel),
      Err(CollocationsError::AlreadyInProgress(_))
    ));
  }

  #[test]
  fn window_size_zero_emits_no_entries() {
    let source = InMemorySentenceSource::new(build_corpus());
    let built = build_index(&source).unwrap();
    let dir = tempdir().unwrap();
    let lexicon_path = dir.path().join("lexicon.bin");
    let stats_path = dir.path().join("stats.bin");
    built.lexicon.write_to(&lexicon_path, 5).unwrap();
    built.stats.write_to(&stats_path).unwrap();
    let lexicon = LexiconReader::open(&lexicon_path).unwrap();
    let stats = StatsReader::open(&stats_path).unwrap();

    let config = BuilderConfig {
      window_size: 0,
      min_frequency: 1,
      min_cooccurrence: 1,
      ..BuilderConfig::default()
    };
    let builder = Builder::new(config, &lexicon, &stats);
    let output_dir = dir.path().join("out");
    let cancel = AtomicBool::new(false);
    builder.build(&built.index, &output_dir, &cancel).unwrap();
    let reader = ArtifactReader::open(&output_dir.join("artifact.bin")).unwrap();
    assert_eq!(reader.entry_count(), 0);
  }
}
