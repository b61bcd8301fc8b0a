//! The strict prior pass that resolves the cyclic builder/statistics-store
//! reference (spec.md §9 design note): lemma ids (C2) and term statistics
//! (C3) are both derived from one streaming pass over the corpus, before the
//! collocations builder (C4) ever runs, so C4 only ever *reads* C2/C3.
//!
//! The pass also produces the `CorpusIndex`: the C1-encoded token blob per
//! sentence that C4's Stage A decodes. This is the "opaque index handle"
//! spec.md §4.4.1 describes as the builder's input.

use dashmap::DashMap;

use crate::error::Result;
use crate::lexicon::LexiconData;
use crate::sentence::SentenceSource;
use crate::lexicon::LexiconBuilder;
use crate::stats::{StatsBuilder, TermStatsData};
use crate::token::{self, Token};

/// One indexed sentence: its id, raw text, and its C1-encoded token blob.
#[derive(Debug, Clone)]
pub struct IndexedSentence {
  /// Monotone sentence id.
  pub sentence_id: u64,
  /// Raw sentence text (used for concordance rendering).
  pub text: String,
  /// C1-encoded token sequence.
  pub blob: Vec<u8>,
}

/// The corpus index consumed by the collocations builder: a sentence-id
/// ordered list of encoded token blobs.
#[derive(Debug, Clone, Default)]
pub struct CorpusIndex {
  sentences: Vec<IndexedSentence>,
}

impl CorpusIndex {
  /// Sentences in ascending `sentence_id` order.
  pub fn sentences(&self) -> &[IndexedSentence] {
    &self.sentences
  }

  /// Total number of indexed sentences.
  pub fn len(&self) -> usize {
    self.sentences.len()
  }

  /// Whether the index has no sentences.
  pub fn is_empty(&self) -> bool {
    self.sentences.is_empty()
  }
}

/// Result of the strict prior pass: the corpus index plus the finalized
/// lexicon and term-statistics snapshots.
pub struct IndexBuildResult {
  /// Token blobs, one per sentence, in sentence-id order.
  pub index: CorpusIndex,
  /// Finalized C2 snapshot.
  pub lexicon: LexiconData,
  /// Finalized C3 snapshot.
  pub stats: TermStatsData,
}

/// Stream every sentence out of `source` exactly once, feeding C1 encoding,
/// the lemma lexicon, and the term-statistics accumulator concurrently.
pub fn build_index(source: &dyn SentenceSource) -> Result<IndexBuildResult> {
  let lexicon_builder = LexiconBuilder::new();
  let stats_builder = StatsBuilder::new();
  let blobs: DashMap<u64, (String, Vec<u8>)> = DashMap::new();

  source.for_each(&|sentence| {
    for t in &sentence.tokens {
      lexicon_builder.record(&t.lemma, &t.tag);
    }
    stats_builder.record_sentence(&sentence.tokens);
    let blob = token::encode(&sentence.tokens);
    blobs.insert(sentence.sentence_id, (sentence.text.clone(), blob));
  })?;

  let mut sentences: Vec<IndexedSentence> = blobs
    .into_iter()
    .map(|(sentence_id, (text, blob))| IndexedSentence {
      sentence_id,
      text,
      blob,
    })
    .collect();
  sentences.sort_by_key(|s| s.sentence_id);

  Ok(IndexBuildResult {
    index: CorpusIndex { sentences },
    lexicon: lexicon_builder.finish(),
    stats: stats_builder.finish(),
  })
}

/// Decode the token list for an indexed sentence. Thin wrapper so callers
/// don't need to import [`token::decode`] directly.
pub fn decode_tokens(sentence: &IndexedSentence) -> Result<Vec<Token>> {
  token::decode(&sentence.blob)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sentence::{InMemorySentenceSource, Sentence};
  use crate::token::Token;

  fn sentence(id: u64, words: &[(&str, &str)]) -> Sentence {
    let tokens = words
      .iter()
      .enumerate()
      .map(|(i, (lemma, tag))| Token::new(i as u32, *lemma, *lemma, *tag, 0, 0))
      .collect();
    Sentence::new(id, "text", tokens)
  }

  #[test]
  fn strict_prior_pass_populates_lexicon_stats_and_index() {
    let source = InMemorySentenceSource::new(vec![
      sentence(0, &[("cat", "NN"), ("sit", "VB")]),
      sentence(1, &[("cat", "NN"), ("mat", "NN")]),
    ]);
    let result = build_index(&source).unwrap();

    assert_eq!(result.index.len(), 2);
    assert_eq!(result.stats.total_tokens, 4);
    let cat_stats = result
      .stats
      .entries
      .iter()
      .find(|(l, _)| l == "cat")
      .map(|(_, s)| s)
      .unwrap();
    assert_eq!(cat_stats.total_frequency, 2);

    let cat_id = result
      .lexicon
      .entries
      .iter()
      .position(|e| e.lemma == "cat")
      .unwrap();
    assert_eq!(result.lexicon.entries[cat_id].frequency, 2);

    let first = &result.index.sentences()[0];
    assert_eq!(first.sentence_id, 0);
    let decoded = decode_tokens(first).unwrap();
    assert_eq!(decoded.len(), 2);
  }
}
