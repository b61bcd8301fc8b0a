//! Streaming access to annotated sentences (§3's `Sentence`, plus the
//! corpus-walking side of the external index that the builder and the
//! reference span engine both read from).
//!
//! Modeled as a `SentenceSource` trait so the builder (C4) and
//! [`crate::span_engine::InMemorySpanEngine`] share one notion of "the
//! corpus" without depending on a concrete file format. Two implementations
//! ship: [`JsonlCorpusSource`], which walks a directory of newline-delimited
//! JSON sentence files using a parallel directory walk (`jwalk` +
//! `rayon::iter::ParallelBridge`), and
//! [`InMemorySentenceSource`], a plain `Vec<Sentence>` wrapper used by tests.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use jwalk::{Parallelism, WalkDir as ParWalkDir};
use rayon::iter::{ParallelBridge, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::error::{CollocationsError, Result};
use crate::token::Token;

/// An immutable, indexed sentence: `sentenceId`, raw text, and its ordered
/// tokens (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentence {
  /// Monotone id assigned at index build.
  pub sentence_id: u64,
  /// Raw sentence text.
  pub text: String,
  /// Ordered, 0-based-contiguous tokens.
  pub tokens: Vec<Token>,
}

impl Sentence {
  /// Construct a sentence from its id, text, and tokens, as produced by an
  /// upstream tagging/parsing pipeline (out of scope here; see spec.md §1).
  pub fn new(sentence_id: u64, text: impl Into<String>, tokens: Vec<Token>) -> Self {
    Sentence {
      sentence_id,
      text: text.into(),
      tokens,
    }
  }
}

/// Streaming, possibly-parallel access to a corpus's sentences.
///
/// Implementors decide how sentences are stored; callers only get a
/// `for_each`-style visitor so a parallel implementation never has to
/// materialize the whole corpus in memory.
pub trait SentenceSource: Send + Sync {
  /// Visit every sentence, across however many worker threads the source
  /// chooses to use. `visit` must be safe to call concurrently.
  fn for_each(&self, visit: &(dyn Fn(&Sentence) + Send + Sync)) -> Result<()>;

  /// Total sentence count, if known without a full scan.
  fn len_hint(&self) -> Option<u64> {
    None
  }
}

/// A directory of newline-delimited JSON sentence files: the JSONL
/// concretization of "standard column-format annotated corpus" (spec.md §1).
/// One `Sentence` per line.
pub struct JsonlCorpusSource {
  root: PathBuf,
}

impl JsonlCorpusSource {
  /// Create a source rooted at `root`. Directory is walked lazily, on
  /// `for_each`.
  pub fn new(root: impl Into<PathBuf>) -> Self {
    JsonlCorpusSource { root: root.into() }
  }
}

impl SentenceSource for JsonlCorpusSource {
  fn for_each(&self, visit: &(dyn Fn(&Sentence) + Send + Sync)) -> Result<()> {
    let root = self.root.clone();
    let errors: Vec<CollocationsError> = ParWalkDir::new(&root)
      .parallelism(Parallelism::RayonNewPool(rayon::current_num_threads()))
      .skip_hidden(true)
      .sort(false)
      .into_iter()
      .filter_map(|each| {
        let entry = each.ok()?;
        let file_name = entry.file_name.to_str().unwrap_or("");
        if file_name.ends_with(".jsonl") {
          Some(entry.path())
        } else {
          None
        }
      })
      .par_bridge()
      .filter_map(|path| read_jsonl_file(&path, visit).err())
      .collect();
    errors.into_iter().next().map_or(Ok(()), Err)
  }
}

fn read_jsonl_file(
  path: &Path,
  visit: &(dyn Fn(&Sentence) + Send + Sync),
) -> Result<()> {
  let file = File::open(path).map_err(|e| CollocationsError::io(path, e))?;
  for line in BufReader::new(file).lines() {
    let line = line.map_err(|e| CollocationsError::io(path, e))?;
    if line.trim().is_empty() {
      continue;
    }
    let sentence: Sentence = serde_json::from_str(&line).map_err(|e| {
      CollocationsError::CorruptBlob(format!("{}: invalid sentence json: {e}", path.display()))
    })?;
    visit(&sentence);
  }
  Ok(())
}

/// A fixed in-memory corpus, used by tests and by
/// [`crate::span_engine::InMemorySpanEngine`].
pub struct InMemorySentenceSource {
  sentences: Vec<Sentence>,
}

impl InMemorySentenceSource {
  /// Wrap an already-assembled sentence list.
  pub fn new(sentences: Vec<Sentence>) -> Self {
    InMemorySentenceSource { sentences }
  }

  /// Borrow the underlying sentences in order.
  pub fn sentences(&self) -> &[Sentence] {
    &self.sentences
  }
}

impl SentenceSource for InMemorySentenceSource {
  fn for_each(&self, visit: &(dyn Fn(&Sentence) + Send + Sync)) -> Result<()> {
    self.sentences.iter().for_each(visit);
    Ok(())
  }

  fn len_hint(&self) -> Option<u64> {
    Some(self.sentences.len() as u64)
  }
}
