//! Query runtime (C6): relation dispatch (§4.6.1), pattern execution
//! (§4.6.2), and concordance extraction (§4.6.3) against a loaded artifact,
//! lexicon, term-statistics store, and an external [`SpanEngine`].

use std::collections::HashMap;

use tracing::{debug, info};

use crate::artifact::ArtifactReader;
use crate::error::{CollocationsError, Result};
use crate::lexicon::LexiconReader;
use crate::pattern::{self, RelationConfig};
use crate::scores::AssociationScores;
use crate::span_engine::{Hit, SpanEngine};
use crate::stats::StatsReader;

/// Runtime configuration for the query executor, constructed explicitly
/// and passed into [`QueryExecutor::new`] (spec.md §9's no-global-state
/// design note, same as [`crate::builder::BuilderConfig`]).
#[derive(Debug, Clone)]
pub struct QueryConfig {
  /// Default result cap when a caller doesn't specify one.
  pub default_limit: usize,
  /// Minimum cooccurrence for a live-pattern group to be scored at all
  /// (§4.6.2 step 5).
  pub min_cooccurrence: u32,
  /// Result cap applied before single-sentence concordance extraction.
  pub concordance_result_cap: usize,
  /// Tokens of raw context requested from the span engine on each side of
  /// a concordance match, before sentence trimming. Must exceed a typical
  /// sentence length so a match near a sentence edge still pulls in
  /// neighboring-sentence content for the trim step to cut away.
  pub concordance_context_tokens: u32,
}

impl Default for QueryConfig {
  fn default() -> Self {
    QueryConfig {
      default_limit: 50,
      min_cooccurrence: 2,
      concordance_result_cap: 100,
      concordance_context_tokens: 12,
    }
  }
}

/// One scored (headword, collocate) result, uniform across the precomputed
/// and live-pattern paths (§3's `Collocation`, with all four measures
/// always populated since both paths have the inputs to compute them).
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCollocate {
  /// The collocate lemma.
  pub lemma: String,
  /// Dominant tag of the collocate, when known.
  pub pos: String,
  /// Co-occurrences with the headword.
  pub cooccurrence: u64,
  /// Corpus-wide frequency of the collocate.
  pub frequency: u64,
  /// `logDice`, in `[0, 14]`.
  pub log_dice: f64,
  /// Cubed mutual information.
  pub mi3: f64,
  /// T-score.
  pub t_score: f64,
  /// Log-likelihood ratio.
  pub log_likelihood: f64,
}

/// One concordance line (§4.6.3): plain-text context trimmed to a single
/// sentence, with optional scored metadata.
#[derive(Debug, Clone)]
pub struct ConcordanceLine {
  /// The sentence the match came from.
  pub sentence_id: u64,
  /// Rendered left context, with a leading `<s>` if the sentence start is
  /// within the window.
  pub left: String,
  /// Rendered matched span.
  pub matched: String,
  /// Rendered right context, with a trailing `</s>` if the sentence end is
  /// within the window.
  pub right: String,
}

/// The query runtime: relation dispatch, pattern execution, and
/// concordance extraction over an already-open artifact/lexicon/stats and
/// an injected [`SpanEngine`].
pub struct QueryExecutor<'a> {
  relations: &'a RelationConfig,
  artifact: &'a ArtifactReader,
  lexicon: &'a LexiconReader,
  stats: &'a StatsReader,
  span_engine: &'a dyn SpanEngine,
  config: QueryConfig,
}

impl<'a> QueryExecutor<'a> {
  /// Construct an executor over already-open, read-only resources.
  pub fn new(
    relations: &'a RelationConfig,
    artifact: &'a ArtifactReader,
    lexicon: &'a LexiconReader,
    stats: &'a StatsReader,
    span_engine: &'a dyn SpanEngine,
    config: QueryConfig,
  ) -> Self {
    QueryExecutor {
      relations,
      artifact,
      lexicon,
      stats,
      span_engine,
      config,
    }
  }

  /// Dispatch a collocate lookup: precomputed artifact hit when possible
  /// (§4.6.1), otherwise live pattern execution (§4.6.2).
  pub fn lookup_collocates(
    &self,
    headword: &str,
    relation_id: &str,
    limit: Option<usize>,
    min_score: f64,
  ) -> Result<Vec<QueryCollocate>> {
    let headword = headword.to_lowercase();
    let limit = limit.unwrap_or(self.config.default_limit);
    let relation = self
      .relations
      .get(relation_id)
      .ok_or_else(|| {
        info!(relation = relation_id, "unknown relation requested");
        CollocationsError::UnknownRelation(relation_id.to_string())
      })?;

    if self.stats.get_frequency(&headword) == 0 {
      info!(headword = %headword, "unknown lemma requested");
      return Err(CollocationsError::UnknownLemma(headword));
    }

    if relation.is_default_window_relation() && self.artifact.has_lemma(&headword) {
      debug!(headword = %headword, relation = relation_id, "dispatch: precomputed artifact");
      return self.lookup_from_artifact(&headword, relation_id, limit, min_score);
    }

    debug!(headword = %headword, relation = relation_id, "dispatch: live pattern execution");
    self.lookup_from_pattern(&headword, relation_id, limit, min_score)
  }

  fn lookup_from_artifact(
    &self,
    headword: &str,
    relation_id: &str,
    limit: usize,
    min_score: f64,
  ) -> Result<Vec<QueryCollocate>> {
    let entry = self
      .artifact
      .get_collocations(headword)?
      .expect("has_lemma confirmed presence");
    let relation = self.relations.get(relation_id).expect("checked by caller");
    let parsed = pattern::parse_pattern(&relation.pattern)?;
    let pos_filter = parsed
      .slots
      .get(relation.collocate_position - 1)
      .and_then(|slot| slot.constraints.iter().find(|c| c.field == "tag"))
      .map(|c| c.value.clone());

    let total_tokens = self.lexicon.total_tokens();
    let mut results: Vec<QueryCollocate> = entry
      .collocations
      .iter()
      .filter(|c| pos_filter.as_deref().is_none_or(|tag| c.pos == tag))
      .map(|c| {
        let scores = AssociationScores::compute(
          c.cooccurrence,
          entry.headword_frequency,
          c.frequency,
          total_tokens,
        );
        QueryCollocate {
          lemma: c.lemma.clone(),
          pos: c.pos.clone(),
          cooccurrence: c.cooccurrence,
          frequency: c.frequency,
          log_dice: scores.log_dice,
          mi3: scores.mi3,
          t_score: scores.t_score,
          log_likelihood: scores.log_likelihood,
        }
      })
      .filter(|c| c.log_dice >= min_score)
      .collect();

    sort_and_truncate(&mut results, limit);
    Ok(results)
  }

  fn lookup_from_pattern(
    &self,
    headword: &str,
    relation_id: &str,
    limit: usize,
    min_score: f64,
  ) -> Result<Vec<QueryCollocate>> {
    let relation = self.relations.get(relation_id).expect("checked by caller");
    let mut results = self.execute_pattern_once(
      headword,
      relation.head_position,
      relation.collocate_position,
      &relation.pattern,
      min_score,
    )?;

    if relation.dual {
      let swapped = self.execute_pattern_once(
        headword,
        relation.collocate_position,
        relation.head_position,
        &relation.pattern,
        min_score,
      )?;
      let headword_frequency = self.stats.get_frequency(headword);
      results = merge_dual(results, swapped, self.stats, self.lexicon.total_tokens(), min_score, headword_frequency);
    }

    sort_and_truncate(&mut results, limit);
    Ok(results)
  }

  fn execute_pattern_once(
    &self,
    headword: &str,
    head_position: usize,
    collocate_position: usize,
    raw_pattern: &str,
    min_score: f64,
  ) -> Result<Vec<QueryCollocate>> {
    let parsed = pattern::parse_pattern(raw_pattern)?;
    let substituted = pattern::substitute_headword(&parsed, head_position, headword);
    let hits = self.span_engine.find(&substituted)?;

    let mut groups: HashMap<String, u64> = HashMap::new();
    for hit in &hits {
      if let Some(token) = hit.token_at(collocate_position) {
        if token.lemma == headword {
          continue;
        }
        *groups.entry(token.lemma.to_lowercase()).or_insert(0) += 1;
      }
    }

    let headword_frequency = self.stats.get_frequency(headword);
    let total_tokens = self.lexicon.total_tokens();
    let mut results = Vec::new();
    for (lemma, cooccurrence) in groups {
      if (cooccurrence as u32) < self.config.min_cooccurrence {
        continue;
      }
      let collocate_frequency = self.stats.get_frequency(&lemma);
      let scores = AssociationScores::compute(cooccurrence, headword_frequency, collocate_frequency, total_tokens);
      if scores.log_dice < min_score {
        continue;
      }
      let pos = self
        .lexicon
        .get_id(&lemma)
        .and_then(|id| self.lexicon.get_dominant_pos(id))
        .unwrap_or("")
        .to_string();
      results.push(QueryCollocate {
        lemma,
        pos,
        cooccurrence,
        frequency: collocate_frequency,
        log_dice: scores.log_dice,
        mi3: scores.mi3,
        t_score: scores.t_score,
        log_likelihood: scores.log_likelihood,
      });
    }
    Ok(results)
  }

  /// Substitute both head and collocate lemmas into the relation's pattern,
  /// execute it, and return single-sentence-trimmed concordance lines
  /// (§4.6.3), capped at `config.concordance_result_cap`.
  pub fn concordance(&self, word1: &str, word2: &str, relation_id: &str) -> Result<Vec<ConcordanceLine>> {
    let relation = self
      .relations
      .get(relation_id)
      .ok_or_else(|| CollocationsError::UnknownRelation(relation_id.to_string()))?;
    let parsed = pattern::parse_pattern(&relation.pattern)?;
    let substituted = pattern::substitute_both(
      &parsed,
      relation.head_position,
      &word1.to_lowercase(),
      relation.collocate_position,
      &word2.to_lowercase(),
    );
    let hits = self.span_engine.find(&substituted)?;

    let mut lines = Vec::new();
    for hit in hits.iter().take(self.config.concordance_result_cap) {
      lines.push(self.render_concordance_line(hit)?);
    }
    Ok(lines)
  }

  fn render_concordance_line(&self, hit: &Hit) -> Result<ConcordanceLine> {
    let context = self.config.concordance_context_tokens;
    let (left, matched, right) = self.span_engine.concordance(hit, context, context)?;
    Ok(ConcordanceLine {
      sentence_id: hit.sentence_id,
      left: trim_left_to_sentence(&left),
      matched,
      right: trim_right_to_sentence(&right),
    })
  }
}

/// A left-context string may carry `<s>`/`</s>` markers from sentences
/// before the one containing the match (§6.4). Keep only the text after
/// the last `<s>` — the start of the matched sentence is always the last
/// one emitted, since earlier sentences can only contribute markers before
/// it.
fn trim_left_to_sentence(raw: &str) -> String {
  match raw.rfind("<s>") {
    Some(idx) => raw[idx..].trim().to_string(),
    None => raw.trim().to_string(),
  }
}

/// Symmetric to [`trim_left_to_sentence`]: keep only the text up to and
/// including the first `</s>`, which always marks the end of the matched
/// sentence.
fn trim_right_to_sentence(raw: &str) -> String {
  match raw.find("</s>") {
    Some(idx) => raw[..idx + "</s>".len()].trim().to_string(),
    None => raw.trim().to_string(),
  }
}

fn sort_and_truncate(results: &mut Vec<QueryCollocate>, limit: usize) {
  results.sort_by(|a, b| {
    b.log_dice
      .partial_cmp(&a.log_dice)
      .unwrap_or(std::cmp::Ordering::Equal)
      .then_with(|| a.lemma.cmp(&b.lemma))
  });
  results.truncate(limit);
}

fn merge_dual(
  mut a: Vec<QueryCollocate>,
  b: Vec<QueryCollocate>,
  stats: &StatsReader,
  total_tokens: u64,
  min_score: f64,
  headword_frequency: u64,
) -> Vec<QueryCollocate> {
  let mut by_lemma: HashMap<String, u64> = HashMap::new();
  for c in &a {
    by_lemma.insert(c.lemma.clone(), c.cooccurrence);
  }
  for c in &b {
    *by_lemma.entry(c.lemma.clone()).or_insert(0) += c.cooccurrence;
  }
  a.clear();
  for (lemma, cooccurrence) in by_lemma {
    let frequency = stats.get_frequency(&lemma);
    let scores = AssociationScores::compute(cooccurrence, headword_frequency, frequency, total_tokens);
    if scores.log_dice < min_score {
      continue;
    }
    a.push(QueryCollocate {
      lemma,
      pos: String::new(),
      cooccurrence,
      frequency,
      log_dice: scores.log_dice,
      mi3: scores.mi3,
      t_score: scores.t_score,
      log_likelihood: scores.log_likelihood,
    });
  }
  a
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::indexing::build_index;
  use crate::sentence::{InMemorySentenceSource, Sentence};
  use crate::span_engine::InMemorySpanEngine;
  use crate::token::Token;
  use tempfile::tempdir;

  #[test]
  fn trim_left_drops_previous_sentence_content() {
    let raw = "<s> dog ran fast </s> <s> the big cat";
    assert_eq!(trim_left_to_sentence(raw), "<s> the big cat");
  }

  #[test]
  fn trim_left_is_noop_without_boundary() {
    assert_eq!(trim_left_to_sentence("the big"), "the big");
  }

  #[test]
  fn trim_right_drops_next_sentence_content() {
    let raw = "sat quietly </s> <s> a small dog ran";
    assert_eq!(trim_right_to_sentence(raw), "sat quietly </s>");
  }

  #[test]
  fn trim_right_is_noop_without_boundary() {
    assert_eq!(trim_right_to_sentence("sat quietly"), "sat quietly");
  }

  fn sentence(id: u64, words: &[(&str, &str, &str)]) -> Sentence {
    let tokens = words
      .iter()
      .enumerate()
      .map(|(i, (word, lemma, tag))| Token::new(i as u32, *word, *lemma, *tag, 0, 0))
      .collect();
    Sentence::new(id, "text", tokens)
  }

  fn relation_config() -> RelationConfig {
    RelationConfig::from_json(
      r#"{
        "version": "1",
        "relations": [
          {
            "id": "adj_noun",
            "name": "adjective-noun",
            "description": "adjective preceding noun",
            "pattern": "[tag=\"JJ\"] [tag=\"NN\"]",
            "head_position": 2,
            "collocate_position": 1,
            "dual": false,
            "default_slop": 0,
            "relation_type": "SURFACE",
            "exploration_enabled": true
          }
        ]
      }"#,
    )
    .unwrap()
  }

  #[test]
  fn unknown_relation_is_rejected() {
    let source = InMemorySentenceSource::new(vec![sentence(0, &[("cat", "cat", "NN")])]);
    let built = build_index(&source).unwrap();
    let dir = tempdir().unwrap();
    let lexicon_path = dir.path().join("lex.bin");
    let stats_path = dir.path().join("stats.bin");
    built.lexicon.write_to(&lexicon_path, 1).unwrap();
    built.stats.write_to(&stats_path).unwrap();
    let lexicon = LexiconReader::open(&lexicon_path).unwrap();
    let stats = StatsReader::open(&stats_path).unwrap();
    let artifact_path = dir.path().join("artifact.bin");
    crate::artifact::ArtifactData::default().write_to(&artifact_path).unwrap();
    let artifact = ArtifactReader::open(&artifact_path).unwrap();
    let engine = InMemorySpanEngine::from_index(&built.index);
    let relations = relation_config();

    let executor = QueryExecutor::new(&relations, &artifact, &lexicon, &stats, &engine, QueryConfig::default());
    assert!(matches!(
      executor.lookup_collocates("cat", "nonexistent", None, 0.0),
      Err(CollocationsError::UnknownRelation(_))
    ));
  }

  #[test]
  fn live_pattern_path_scores_and_sorts_results() {
    let source = InMemorySentenceSource::new(vec![
      sentence(0, &[("big", "big", "JJ"), ("dog", "dog", "NN")]),
      sentence(1, &[("big", "big", "JJ"), ("dog", "dog", "NN")]),
      sentence(2, &[("small", "small", "JJ"), ("dog", "dog", "NN")]),
    ]);
    let built = build_index(&source).unwrap();
    let dir = tempdir().unwrap();
    let lexicon_path = dir.path().join("lex.bin");
    let stats_path = dir.path().join("stats.bin");
    built.lexicon.write_to(&lexicon_path, 3).unwrap();
    built.stats.write_to(&stats_path).unwrap();
    let lexicon = LexiconReader::open(&lexicon_path).unwrap();
    let stats = StatsReader::open(&stats_path).unwrap();
    let artifact_path = dir.path().join("artifact.bin");
    crate::artifact::ArtifactData::default().write_to(&artifact_path).unwrap();
    let artifact = ArtifactReader::open(&artifact_path).unwrap();
    let engine = InMemorySpanEngine::from_index(&built.index);
    let relations = relation_config();

    let config = QueryConfig {
      min_cooccurrence: 1,
      ..QueryConfig::default()
    };
    let executor = QueryExecutor::new(&relations, &artifact, &lexicon, &stats, &engine, config);
    let results = executor.lookup_collocates("dog", "adj_noun", None, 0.0).unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().any(|r| r.lemma == "big" && r.cooccurrence == 2));
    assert!(results.iter().any(|r| r.lemma == "small" && r.cooccurrence == 1));
  }

  #[test]
  fn unknown_lemma_is_rejected() {
    let source = InMemorySentenceSource::new(vec![sentence(0, &[("cat", "cat", "NN")])]);
    let built = build_index(&source).unwrap();
    let dir = tempdir().unwrap();
    let lexicon_path = dir.path().join("lex.bin");
    let stats_path = dir.path().join("stats.bin");
    built.lexicon.write_to(&lexicon_path, 1).unwrap();
    built.stats.write_to(&stats_path).unwrap();
    let lexicon = LexiconReader::open(&lexicon_path).unwrap();
    let stats = StatsReader::open(&stats_path).unwrap();
    let artifact_path = dir.path().join("artifact.bin");
    crate::artifact::ArtifactData::default().write_to(&artifact_path).unwrap();
    let artifact = ArtifactReader::open(&artifact_path).unwrap();
    let engine = InMemorySpanEngine::from_index(&built.index);
    let relations = relation_config();

    let executor = QueryExecutor::new(&relations, &artifact, &lexicon, &stats, &engine, QueryConfig::default());
    assert!(matches!(
      executor.lookup_collocates("nonexistent", "adj_noun", None, 0.0),
      Err(CollocationsError::UnknownLemma(_))
    ));
  }
}
