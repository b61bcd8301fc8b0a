//! Token-sequence codec (C1): encode/decode a sentence's tokens as a compact
//! byte string suitable for column storage and random-position access.
//!
//! Layout: `varint(tokenCount)` followed by, for each token in position
//! order, `varint(position), lenPrefixedUtf8(word), lenPrefixedUtf8(lemma),
//! lenPrefixedUtf8(tag), varint(startOffset), varint(endOffset)`. Varints are
//! 7-bit little-endian with a continuation bit. Only these six fields are
//! part of the wire format; `pos_group` lives on `Token` as a data-model
//! convenience (§3) and is never persisted by this codec — it is always
//! `None` after `decode`.

use serde::{Deserialize, Serialize};

use crate::error::{CollocationsError, Result};

/// An annotated word occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
  /// 0-based position within the sentence.
  pub position: u32,
  /// Surface form.
  pub word: String,
  /// Lowercased lemma. Empty string is legal.
  pub lemma: String,
  /// Fine-grained part-of-speech tag (e.g. Penn Treebank).
  pub tag: String,
  /// Coarse part-of-speech (noun/verb/adj/adv/det/...). Not part of the C1
  /// wire format.
  pub pos_group: Option<String>,
  /// Byte offset into the sentence text where this token starts.
  pub start_offset: u32,
  /// Byte offset into the sentence text where this token ends.
  pub end_offset: u32,
}

impl Token {
  /// Construct a token with no coarse POS group set (the only shape the
  /// codec's round-trip invariant is defined over).
  pub fn new(
    position: u32,
    word: impl Into<String>,
    lemma: impl Into<String>,
    tag: impl Into<String>,
    start_offset: u32,
    end_offset: u32,
  ) -> Self {
    Token {
      position,
      word: word.into(),
      lemma: lemma.into(),
      tag: tag.into(),
      pos_group: None,
      start_offset,
      end_offset,
    }
  }
}

const MAX_VARINT_BYTES: usize = 5;

fn write_varint(out: &mut Vec<u8>, mut value: u32) {
  loop {
    let mut byte = (value & 0x7f) as u8;
    value >>= 7;
    if value != 0 {
      byte |= 0x80;
    }
    out.push(byte);
    if value == 0 {
      break;
    }
  }
}

fn read_varint(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
  let mut result: u32 = 0;
  let mut shift = 0u32;
  for i in 0..MAX_VARINT_BYTES {
    let byte = *bytes.get(*cursor + i).ok_or_else(|| {
      CollocationsError::CorruptBlob("truncated varint".to_string())
    })?;
    result |= ((byte & 0x7f) as u32) << shift;
    if byte & 0x80 == 0 {
      *cursor += i + 1;
      return Ok(result);
    }
    shift += 7;
  }
  Err(CollocationsError::CorruptBlob(
    "varint did not terminate within 5 bytes".to_string(),
  ))
}

fn write_string(out: &mut Vec<u8>, s: &str) {
  write_varint(out, s.len() as u32);
  out.extend_from_slice(s.as_bytes());
}

fn read_string(bytes: &[u8], cursor: &mut usize) -> Result<String> {
  let len = read_varint(bytes, cursor)? as usize;
  let end = cursor.checked_add(len).ok_or_else(|| {
    CollocationsError::CorruptBlob("string length overflow".to_string())
  })?;
  let slice = bytes.get(*cursor..end).ok_or_else(|| {
    CollocationsError::CorruptBlob("truncated string".to_string())
  })?;
  let s = std::str::from_utf8(slice)
    .map_err(|e| CollocationsError::CorruptBlob(format!("invalid utf8: {e}")))?
    .to_string();
  *cursor = end;
  Ok(s)
}

/// Encode a token list as a compact byte blob. Total; deterministic output.
pub fn encode(tokens: &[Token]) -> Vec<u8> {
  let mut out = Vec::new();
  write_varint(&mut out, tokens.len() as u32);
  for token in tokens {
    write_varint(&mut out, token.position);
    write_string(&mut out, &token.word);
    write_string(&mut out, &token.lemma);
    write_string(&mut out, &token.tag);
    write_varint(&mut out, token.start_offset);
    write_varint(&mut out, token.end_offset);
  }
  out
}

/// Decode a byte blob produced by [`encode`]. Fails with `CorruptBlob` if the
/// input is truncated or a varint does not terminate within 5 bytes.
pub fn decode(bytes: &[u8]) -> Result<Vec<Token>> {
  let mut cursor = 0usize;
  let count = read_varint(bytes, &mut cursor)? as usize;
  let mut tokens = Vec::with_capacity(count);
  for _ in 0..count {
    let position = read_varint(bytes, &mut cursor)?;
    let word = read_string(bytes, &mut cursor)?;
    let lemma = read_string(bytes, &mut cursor)?;
    let tag = read_string(bytes, &mut cursor)?;
    let start_offset = read_varint(bytes, &mut cursor)?;
    let end_offset = read_varint(bytes, &mut cursor)?;
    tokens.push(Token {
      position,
      word,
      lemma,
      tag,
      pos_group: None,
      start_offset,
      end_offset,
    });
  }
  Ok(tokens)
}

/// Sequential scan for the token at position `p`. Stops early once a decoded
/// position exceeds `p`, relying on positions being monotone in the blob.
pub fn token_at_position(bytes: &[u8], p: u32) -> Result<Option<Token>> {
  let mut cursor = 0usize;
  let count = read_varint(bytes, &mut cursor)? as usize;
  for _ in 0..count {
    let position = read_varint(bytes, &mut cursor)?;
    let word = read_string(bytes, &mut cursor)?;
    let lemma = read_string(bytes, &mut cursor)?;
    let tag = read_string(bytes, &mut cursor)?;
    let start_offset = read_varint(bytes, &mut cursor)?;
    let end_offset = read_varint(bytes, &mut cursor)?;
    if position == p {
      return Ok(Some(Token {
        position,
        word,
        lemma,
        tag,
        pos_group: None,
        start_offset,
        end_offset,
      }));
    }
    if position > p {
      break;
    }
  }
  Ok(None)
}

/// Tokens whose position lies in `[lo, hi]` (inclusive), using the same
/// early-stop optimization as [`token_at_position`].
pub fn tokens_in_range(bytes: &[u8], lo: u32, hi: u32) -> Result<Vec<Token>> {
  let mut cursor = 0usize;
  let count = read_varint(bytes, &mut cursor)? as usize;
  let mut out = Vec::new();
  for _ in 0..count {
    let position = read_varint(bytes, &mut cursor)?;
    let word = read_string(bytes, &mut cursor)?;
    let lemma = read_string(bytes, &mut cursor)?;
    let tag = read_string(bytes, &mut cursor)?;
    let start_offset = read_varint(bytes, &mut cursor)?;
    let end_offset = read_varint(bytes, &mut cursor)?;
    if position > hi {
      break;
    }
    if position >= lo {
      out.push(Token {
        position,
        word,
        lemma,
        tag,
        pos_group: None,
        start_offset,
        end_offset,
      });
    }
  }
  Ok(out)
}
