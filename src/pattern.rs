//! Grammatical-relation configuration and pattern language (§6.2, §6.3).
//!
//! A pattern is a whitespace-separated list of bracketed token slots, each
//! slot a conjunction of `field op "value"` constraints, with an optional
//! trailing `~{min,max}` gap. This module parses that language, validates a
//! relation configuration document against it, and implements the headword
//! substitution rule (§4.6.2 step 1).

use std::collections::HashSet;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CollocationsError, Result};

/// One field constraint within a token slot: `field op "value"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldConstraint {
  /// `lemma`, `word`, `tag`, `upos`, `xpos`, or `deprel`.
  pub field: String,
  /// `true` for `=`, `false` for `!=`.
  pub positive: bool,
  /// Regex pattern, possibly `|`-alternated; compared case-insensitively
  /// for `lemma`/`word`.
  pub value: String,
}

/// One token slot of a parsed pattern: a conjunction of constraints plus an
/// optional trailing gap.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TokenSlot {
  /// Constraints AND-combined.
  pub constraints: Vec<FieldConstraint>,
  /// `~{min,max}` gap of arbitrary tokens following this slot, if present.
  pub gap: Option<(u32, u32)>,
}

/// A parsed pattern: an ordered list of token slots.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pattern {
  /// Slots in pattern order.
  pub slots: Vec<TokenSlot>,
}

lazy_static! {
  static ref SLOT_RE: Regex =
    Regex::new(r#"\[(?P<body>[^\]]*)\](?:~\{(?P<min>\d+),(?P<max>\d+)\})?"#).unwrap();
  static ref CONSTRAINT_RE: Regex =
    Regex::new(r#"^(?P<field>lemma|word|tag|upos|xpos|deprel)\s*(?P<op>!=|=)\s*"(?P<value>[^"]*)"$"#)
      .unwrap();
  static ref HEAD_PLACEHOLDER_RE: Regex = Regex::new(r"\{head\}").unwrap();
}

/// Parse a pattern string into its token slots. Slots are matched as
/// bracketed groups rather than split on whitespace, since a conjunction's
/// `&`-separated clauses may themselves contain spaces.
pub fn parse_pattern(pattern: &str) -> Result<Pattern> {
  let mut slots = Vec::new();
  let mut consumed = 0usize;
  for captures in SLOT_RE.captures_iter(pattern) {
    let whole = captures.get(0).unwrap();
    let gap_text = pattern[consumed..whole.start()].trim();
    if !gap_text.is_empty() {
      return Err(CollocationsError::InvalidPattern(format!(
        "unexpected text between slots: {gap_text:?}"
      )));
    }
    consumed = whole.end();
    let body = captures.name("body").unwrap().as_str();
    let gap = match (captures.name("min"), captures.name("max")) {
      (Some(min), Some(max)) => {
        let min: u32 = min.as_str().parse().unwrap();
        let max: u32 = max.as_str().parse().unwrap();
        if min > max {
          return Err(CollocationsError::InvalidPattern(format!(
            "gap min {min} exceeds max {max} in slot {:?}",
            whole.as_str()
          )));
        }
        Some((min, max))
      }
      _ => None,
    };

    let mut constraints = Vec::new();
    for clause in body.split('&') {
      let clause = clause.trim();
      if clause.is_empty() {
        return Err(CollocationsError::InvalidPattern(format!(
          "empty constraint clause in slot {:?}",
          whole.as_str()
        )));
      }
      let cap = CONSTRAINT_RE.captures(clause).ok_or_else(|| {
        CollocationsError::InvalidPattern(format!("malformed constraint: {clause:?}"))
      })?;
      constraints.push(FieldConstraint {
        field: cap.name("field").unwrap().as_str().to_string(),
        positive: cap.name("op").unwrap().as_str() == "=",
        value: cap.name("value").unwrap().as_str().to_string(),
      });
    }
    slots.push(TokenSlot { constraints, gap });
  }

  let trailing = pattern[consumed..].trim();
  if !trailing.is_empty() {
    return Err(CollocationsError::InvalidPattern(format!(
      "unexpected trailing text: {trailing:?}"
    )));
  }
  if slots.is_empty() {
    return Err(CollocationsError::InvalidPattern(
      "pattern has no token slots".to_string(),
    ));
  }
  Ok(Pattern { slots })
}

/// Number of token slots in a pattern string, without fully validating its
/// constraint clauses. Used by config validation to check `tokenCount`.
pub fn count_slots(pattern: &str) -> usize {
  SLOT_RE.find_iter(pattern).count()
}

/// Escape a lemma for safe embedding in a double-quoted pattern value.
fn escape_lemma(lemma: &str) -> String {
  lemma.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Substitute the headword into `pattern` at `head_position` (1-based): the
/// slot at that index is rewritten to `[lemma = "<escaped_head>" &
/// <preserved_other_constraints>]` (§4.6.2 step 1).
pub fn substitute_headword(pattern: &Pattern, head_position: usize, headword: &str) -> Pattern {
  substitute_at(pattern, head_position, headword)
}

/// Substitute both head and collocate lemmas into their respective
/// positions, for concordance extraction (§4.6.3).
pub fn substitute_both(
  pattern: &Pattern,
  head_position: usize,
  headword: &str,
  collocate_position: usize,
  collocate: &str,
) -> Pattern {
  let once = substitute_at(pattern, head_position, headword);
  substitute_at(&once, collocate_position, collocate)
}

fn substitute_at(pattern: &Pattern, position: usize, lemma: &str) -> Pattern {
  let mut slots = pattern.slots.clone();
  if let Some(slot) = slots.get_mut(position - 1) {
    let preserved: Vec<FieldConstraint> = slot
      .constraints
      .iter()
      .filter(|c| c.field == "tag")
      .cloned()
      .collect();
    let mut constraints = vec![FieldConstraint {
      field: "lemma".to_string(),
      positive: true,
      value: escape_lemma(&lemma.to_lowercase()),
    }];
    constraints.extend(preserved);
    slot.constraints = constraints;
  }
  Pattern { slots }
}

/// A named grammatical relation (§3, §6.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDefinition {
  /// Unique id within a configuration document.
  pub id: String,
  /// Human-readable name.
  pub name: String,
  /// Human-readable description.
  pub description: String,
  /// The raw pattern string (§6.3), not yet parsed.
  pub pattern: String,
  /// 1-based index of the headword's slot.
  pub head_position: usize,
  /// 1-based index of the collocate's slot.
  pub collocate_position: usize,
  /// Whether the relation should be executed symmetrically.
  pub dual: bool,
  /// Default gap slop applied when the pattern doesn't specify one.
  pub default_slop: u32,
  /// `SURFACE` (window pattern) or `DEP` (dependency arrow).
  pub relation_type: String,
  /// Whether this relation is offered for interactive exploration.
  pub exploration_enabled: bool,
}

impl RelationDefinition {
  /// Whether this relation's pattern imposes no constraint beyond plain
  /// co-occurrence within the build window — i.e. it is the artifact's
  /// default window relation and a precomputed lookup may satisfy it
  /// directly (§4.6.1 step 2).
  pub fn is_default_window_relation(&self) -> bool {
    self.relation_type == "SURFACE"
      && count_slots(&self.pattern) == 2
      && !self.dual
  }
}

/// A loaded and validated relation configuration document (§6.2).
#[derive(Debug, Clone, Deserialize)]
struct RawRelationConfig {
  version: String,
  relations: Vec<RelationDefinition>,
  #[serde(default)]
  copulas: Option<serde_json::Value>,
}

/// The validated, in-memory relation configuration, shared read-only by all
/// query executors for the process lifetime.
#[derive(Debug, Clone)]
pub struct RelationConfig {
  /// Document format version, as loaded.
  pub version: String,
  relations: Vec<RelationDefinition>,
}

impl RelationConfig {
  /// Load and validate a relation configuration document from `path`
  /// (§6.2's fatal validation rules).
  pub fn load(path: &Path) -> Result<Self> {
    let bytes = std::fs::read(path).map_err(|e| CollocationsError::io(path, e))?;
    let raw: RawRelationConfig = serde_json::from_slice(&bytes)
      .map_err(|e| CollocationsError::InvalidConfig(format!("malformed JSON: {e}")))?;
    Self::from_raw(raw)
  }

  /// Parse and validate from an already-deserialized JSON string (used by
  /// tests and callers that already have the document in memory).
  pub fn from_json(text: &str) -> Result<Self> {
    let raw: RawRelationConfig = serde_json::from_str(text)
      .map_err(|e| CollocationsError::InvalidConfig(format!("malformed JSON: {e}")))?;
    Self::from_raw(raw)
  }

  fn from_raw(raw: RawRelationConfig) -> Result<Self> {
    if raw.version.trim().is_empty() {
      return Err(CollocationsError::InvalidConfig(
        "version must be non-empty".to_string(),
      ));
    }
    if raw.copulas.is_some() {
      return Err(CollocationsError::InvalidConfig(
        "copulas key must be absent; copulas must live inside patterns".to_string(),
      ));
    }

    let mut seen_ids = HashSet::new();
    for relation in &raw.relations {
      if relation.pattern.trim().is_empty() {
        return Err(CollocationsError::InvalidConfig(format!(
          "relation {:?}: pattern must be non-empty",
          relation.id
        )));
      }
      if HEAD_PLACEHOLDER_RE.is_match(&relation.pattern) {
        return Err(CollocationsError::InvalidConfig(format!(
          "relation {:?}: {{head}} placeholder is not allowed in patterns",
          relation.id
        )));
      }
      let parsed = parse_pattern(&relation.pattern).map_err(|e| {
        CollocationsError::InvalidConfig(format!("relation {:?}: {e}", relation.id))
      })?;
      let token_count = parsed.slots.len();
      if relation.head_position < 1 || relation.head_position > token_count {
        return Err(CollocationsError::InvalidConfig(format!(
          "relation {:?}: head_position {} out of range [1,{}]",
          relation.id, relation.head_position, token_count
        )));
      }
      if relation.collocate_position < 1 || relation.collocate_position > token_count {
        return Err(CollocationsError::InvalidConfig(format!(
          "relation {:?}: collocate_position {} out of range [1,{}]",
          relation.id, relation.collocate_position, token_count
        )));
      }
      if !seen_ids.insert(relation.id.clone()) {
        return Err(CollocationsError::InvalidConfig(format!(
          "duplicate relation id: {:?}",
          relation.id
        )));
      }
    }

    Ok(RelationConfig {
      version: raw.version,
      relations: raw.relations,
    })
  }

  /// Look up a relation by id.
  pub fn get(&self, id: &str) -> Option<&RelationDefinition> {
    self.relations.iter().find(|r| r.id == id)
  }

  /// All loaded relations, in document order.
  pub fn relations(&self) -> &[RelationDefinition] {
    &self.relations
  }
}
