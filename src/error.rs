//! Error taxonomy shared by the builder, artifact reader, and query runtime.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A single error type covering every failure mode enumerated in the design.
///
/// Propagation follows a fixed policy: builder errors are recovered at the
/// sentence boundary wherever possible (the sentence is skipped and a counter
/// incremented), reader errors are returned to the caller and never panic,
/// and query errors carry an explicit kind so a caller can distinguish
/// client mistakes (`UnknownRelation`, `UnknownLemma`) from internal faults.
#[derive(Debug, Error)]
pub enum CollocationsError {
  /// Disk or memory-map failure.
  #[error("io error at {path}: {source}")]
  Io {
    /// path involved in the failed operation
    path: PathBuf,
    /// underlying error
    #[source]
    source: io::Error,
  },

  /// Artifact header magic/version mismatch or a blob failed to decode.
  #[error("corrupt artifact: {0}")]
  CorruptArtifact(String),

  /// A token-sequence blob (C1 codec) was truncated or had a runaway varint.
  #[error("corrupt token blob: {0}")]
  CorruptBlob(String),

  /// A lemma observed in the sentence stream has no frequency entry in the
  /// term statistics store. Downgraded to a warning and a skipped sentence;
  /// never aborts a build.
  #[error("inconsistent statistics: lemma {0:?} has no frequency entry")]
  InconsistentStatistics(String),

  /// A query referenced a relation id that is not in the loaded configuration.
  #[error("unknown relation: {0}")]
  UnknownRelation(String),

  /// A query referenced a headword lemma absent from the lexicon/statistics.
  #[error("unknown lemma: {0}")]
  UnknownLemma(String),

  /// A pattern string failed to parse, or referenced an out-of-range position.
  #[error("invalid pattern: {0}")]
  InvalidPattern(String),

  /// The relation configuration document failed validation (§6.2).
  #[error("invalid config: {0}")]
  InvalidConfig(String),

  /// The operation was cancelled via its cancellation signal.
  #[error("cancelled")]
  Cancelled,

  /// The operation exceeded its deadline.
  #[error("timed out")]
  Timeout,

  /// A build was requested against an output directory already locked by
  /// another in-progress builder.
  #[error("build already in progress for {0}")]
  AlreadyInProgress(PathBuf),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CollocationsError>;

impl CollocationsError {
  /// Wrap a raw `io::Error` with the path that was being operated on.
  pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
    CollocationsError::Io {
      path: path.into(),
      source,
    }
  }
}
