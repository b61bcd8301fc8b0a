//! Corpus collocation engine: a single-pass collocations builder, a
//! zero-copy binary artifact format, and a grammatical-relation query
//! runtime.
//!
//! The modules mirror the pipeline stages: [`token`] and [`sentence`] are
//! the input model, [`lexicon`] and [`stats`] are the strict prior pass's
//! outputs (see [`indexing`]), [`builder`] produces the [`artifact`] that
//! [`query`] and [`span_engine`] serve at read time, scored via [`scores`].

pub mod artifact;
pub mod builder;
pub mod error;
pub mod indexing;
pub mod lexicon;
pub mod pattern;
pub mod query;
pub mod scores;
pub mod sentence;
pub mod span_engine;
pub mod stats;
pub mod token;

pub use error::{CollocationsError, Result};
