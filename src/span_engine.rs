//! The positional/span search engine (§1, §6.4) is, per scope, an external
//! collaborator: this module defines its contract as the [`SpanEngine`]
//! trait and ships [`InMemorySpanEngine`], a sequential-scan reference
//! implementation over a [`CorpusIndex`] sufficient to drive the query
//! runtime (C6) end-to-end in tests and via the CLI.
//!
//! `deprel` constraints are never satisfiable by this reference engine: the
//! token model (§C1) carries no dependency arc, so `DEP`-type relations are
//! left for a real production span engine to serve.

use regex::RegexBuilder;

use crate::error::{CollocationsError, Result};
use crate::indexing::{decode_tokens, CorpusIndex, IndexedSentence};
use crate::pattern::{Pattern, TokenSlot};
use crate::token::Token;

/// One match of a compiled pattern against the corpus: the covered token
/// range `[start, end)` within sentence `sentence_id`, plus the decoded
/// tokens it covers (§6.4's "access to decoded tokens covered by the
/// match").
#[derive(Debug, Clone)]
pub struct Hit {
  /// The sentence the match was found in.
  pub sentence_id: u64,
  /// 0-based inclusive start position.
  pub start: u32,
  /// 0-based exclusive end position.
  pub end: u32,
  /// Tokens `[start, end)`, in position order.
  pub tokens: Vec<Token>,
}

impl Hit {
  /// The token at a 1-based position within the match's token slots.
  pub fn token_at(&self, position: usize) -> Option<&Token> {
    position.checked_sub(1).and_then(|i| self.tokens.get(i))
  }
}

/// The contract a positional/span search engine must provide (§6.4).
pub trait SpanEngine: Send + Sync {
  /// Execute a compiled span-near query; return every match.
  fn find(&self, pattern: &Pattern) -> Result<Vec<Hit>>;
  /// Corpus-wide term frequency for `value` in `field` (`lemma`, `word`,
  /// `tag`, `upos`, `xpos`).
  fn total_frequency(&self, field: &str, value: &str) -> u64;
  /// Annotated-token context around `hit`: `(left, matched, right)`, with
  /// inline `<s>`/`</s>` sentence-boundary markers.
  fn concordance(&self, hit: &Hit, before_tokens: u32, after_tokens: u32) -> Result<(String, String, String)>;
  /// Group `hits` by the surface/lemma of the token at 1-based `position`,
  /// counting per group, sorted by count descending then lemma ascending,
  /// truncated to `limit`.
  fn group(&self, hits: &[Hit], position: usize, limit: usize) -> Vec<(String, u32)>;
}

struct CompiledConstraint {
  field: String,
  positive: bool,
  regex: regex::Regex,
}

struct CompiledSlot {
  checks: Vec<CompiledConstraint>,
  gap: Option<(u32, u32)>,
}

fn compile_pattern(pattern: &Pattern) -> Result<Vec<CompiledSlot>> {
  pattern.slots.iter().map(compile_slot).collect()
}

fn compile_slot(slot: &TokenSlot) -> Result<CompiledSlot> {
  let checks = slot
    .constraints
    .iter()
    .map(|c| {
      let case_insensitive = matches!(c.field.as_str(), "lemma" | "word");
      let anchored = format!("^(?:{})$", c.value);
      let regex = RegexBuilder::new(&anchored)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| CollocationsError::InvalidPattern(format!("bad constraint value {:?}: {e}", c.value)))?;
      Ok(CompiledConstraint {
        field: c.field.clone(),
        positive: c.positive,
        regex,
      })
    })
    .collect::<Result<Vec<_>>>()?;
  Ok(CompiledSlot { checks, gap: slot.gap })
}

fn token_field_value<'a>(token: &'a Token, field: &str) -> Option<&'a str> {
  match field {
    "lemma" => Some(token.lemma.as_str()),
    "word" => Some(token.word.as_str()),
    "tag" | "xpos" => Some(token.tag.as_str()),
    "upos" => token.pos_group.as_deref(),
    // deprel has no backing data in this reference engine.
    _ => None,
  }
}

fn slot_matches(token: &Token, slot: &CompiledSlot) -> bool {
  slot.checks.iter().all(|c| {
    let value = token_field_value(token, &c.field).unwrap_or("");
    let matched = c.regex.is_match(value);
    matched == c.positive
  })
}

fn match_from(tokens: &[Token], pos: usize, slots: &[CompiledSlot]) -> Option<usize> {
  let Some((slot, rest)) = slots.split_first() else {
    return Some(pos);
  };
  let token = tokens.get(pos)?;
  if !slot_matches(token, slot) {
    return None;
  }
  let (min, max) = slot.gap.unwrap_or((0, 0));
  for skip in min..=max {
    let candidate = pos + 1 + skip as usize;
    if let Some(end) = match_from(tokens, candidate, rest) {
      return Some(end);
    }
  }
  None
}

/// Sequential-scan reference [`SpanEngine`] over a fixed corpus of
/// C1-encoded sentences. Not a scalability claim: a production deployment
/// is expected to supply its own engine backed by a real inverted index.
pub struct InMemorySpanEngine {
  sentences: Vec<IndexedSentence>,
}

impl InMemorySpanEngine {
  /// Index the sentences already produced by the strict prior pass.
  pub fn from_index(index: &CorpusIndex) -> Self {
    InMemorySpanEngine {
      sentences: index.sentences().to_vec(),
    }
  }

  /// Render up to `remaining` tokens preceding `end` in sentence `index`,
  /// walking into preceding sentences when `end` doesn't hold enough.
  /// Inserts `<s>`/`</s>` markers at every sentence boundary crossed, so a
  /// caller can trim back to the sentence actually containing a match.
  fn context_before(&self, mut index: usize, mut end: usize, mut remaining: usize) -> Result<String> {
    let mut parts: Vec<String> = Vec::new();
    loop {
      let tokens = decode_tokens(&self.sentences[index])?;
      let start = end.saturating_sub(remaining);
      if start < end {
        parts.push(render_tokens(&tokens[start..end]));
      }
      remaining -= end - start;
      if start == 0 {
        parts.push("<s>".to_string());
      }
      if remaining == 0 || start > 0 || index == 0 {
        break;
      }
      parts.push("</s>".to_string());
      index -= 1;
      end = decode_tokens(&self.sentences[index])?.len();
    }
    parts.reverse();
    Ok(normalize_spaces(&parts.join(" ")))
  }

  /// Symmetric to [`Self::context_before`]: renders up to `remaining`
  /// tokens following `start` in sentence `index`, walking into subsequent
  /// sentences as needed.
  fn context_after(&self, mut index: usize, mut start: usize, mut remaining: usize) -> Result<String> {
    let mut parts: Vec<String> = Vec::new();
    loop {
      let tokens = decode_tokens(&self.sentences[index])?;
      let len = tokens.len();
      let end = (start + remaining).min(len);
      if start < end {
        parts.push(render_tokens(&tokens[start..end]));
      }
      remaining -= end - start;
      if end == len {
        parts.push("</s>".to_string());
      }
      if remaining == 0 || end < len || index + 1 >= self.sentences.len() {
        break;
      }
      parts.push("<s>".to_string());
      index += 1;
      start = 0;
    }
    Ok(normalize_spaces(&parts.join(" ")))
  }
}

impl SpanEngine for InMemorySpanEngine {
  fn find(&self, pattern: &Pattern) -> Result<Vec<Hit>> {
    let compiled = compile_pattern(pattern)?;
    let mut hits = Vec::new();
    for sentence in &self.sentences {
      let tokens = decode_tokens(sentence)?;
      for start in 0..tokens.len() {
        if let Some(end) = match_from(&tokens, start, &compiled) {
          hits.push(Hit {
            sentence_id: sentence.sentence_id,
            start: start as u32,
            end: end as u32,
            tokens: tokens[start..end].to_vec(),
          });
        }
      }
    }
    Ok(hits)
  }

  fn total_frequency(&self, field: &str, value: &str) -> u64 {
    let value_lower = value.to_lowercase();
    let case_insensitive = matches!(field, "lemma" | "word");
    let mut total = 0u64;
    for sentence in &self.sentences {
      let Ok(tokens) = decode_tokens(sentence) else {
        continue;
      };
      for token in &tokens {
        if let Some(field_value) = token_field_value(token, field) {
          let is_match = if case_insensitive {
            field_value.eq_ignore_ascii_case(&value_lower)
          } else {
            field_value == value
          };
          if is_match {
            total += 1;
          }
        }
      }
    }
    total
  }

  fn concordance(&self, hit: &Hit, before_tokens: u32, after_tokens: u32) -> Result<(String, String, String)> {
    let index = self
      .sentences
      .iter()
      .position(|s| s.sentence_id == hit.sentence_id)
      .ok_or_else(|| CollocationsError::CorruptArtifact(format!("unknown sentence {}", hit.sentence_id)))?;
    let tokens = decode_tokens(&self.sentences[index])?;
    let matched = render_tokens(&tokens[hit.start as usize..hit.end as usize]);

    let left = self.context_before(index, hit.start as usize, before_tokens as usize)?;
    let right = self.context_after(index, hit.end as usize, after_tokens as usize)?;

    Ok((left, matched, right))
  }

  fn group(&self, hits: &[Hit], position: usize, limit: usize) -> Vec<(String, u32)> {
    let mut counts: std::collections::HashMap<String, u32> = std::collections::HashMap::new();
    for hit in hits {
      if let Some(token) = hit.token_at(position) {
        *counts.entry(token.lemma.to_lowercase()).or_insert(0) += 1;
      }
    }
    let mut groups: Vec<(String, u32)> = counts.into_iter().collect();
    groups.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    groups.truncate(limit);
    groups
  }
}

fn render_tokens(tokens: &[Token]) -> String {
  tokens
    .iter()
    .map(|t| t.word.as_str())
    .collect::<Vec<_>>()
    .join(" ")
}

fn normalize_spaces(s: &str) -> String {
  s.split_whitespace().collect::<Vec<_>>().join(" ")
}
