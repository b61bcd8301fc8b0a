use std::sync::atomic::AtomicBool;

use collocations::artifact::ArtifactReader;
use collocations::builder::{Builder, BuilderConfig};
use collocations::indexing::build_index;
use collocations::lexicon::LexiconReader;
use collocations::pattern::RelationConfig;
use collocations::query::{QueryConfig, QueryExecutor};
use collocations::sentence::{InMemorySentenceSource, Sentence};
use collocations::span_engine::InMemorySpanEngine;
use collocations::stats::StatsReader;
use collocations::token::Token;
use tempfile::tempdir;

fn sentence(id: u64, words: &[(&str, &str, &str)]) -> Sentence {
  let tokens = words
    .iter()
    .enumerate()
    .map(|(i, (word, lemma, tag))| Token::new(i as u32, *word, *lemma, *tag, 0, 0))
    .collect();
  Sentence::new(id, words.iter().map(|(w, ..)| *w).collect::<Vec<_>>().join(" "), tokens)
}

fn surface_window_relation() -> RelationConfig {
  RelationConfig::from_json(
    r#"{
      "version": "1",
      "relations": [
        {
          "id": "window",
          "name": "surface window",
          "description": "plain co-occurrence window",
          "pattern": "[tag=\"NN\"] [tag=\"NN\"]",
          "head_position": 1,
          "collocate_position": 2,
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

// A built artifact for "cat" should be served from the precomputed artifact
// path rather than falling through to live pattern execution, since the
// configured relation is a bare two-slot SURFACE (non-dual) window (§4.6.1).
#[test]
fn default_window_relation_dispatches_to_precomputed_artifact() {
  let dir = tempdir().unwrap();
  let corpus = vec![
    sentence(0, &[("cat", "cat", "NN"), ("mat", "mat", "NN")]),
    sentence(1, &[("cat", "cat", "NN"), ("mat", "mat", "NN")]),
  ];
  let source = InMemorySentenceSource::new(corpus);
  let built = build_index(&source).unwrap();

  let lexicon_path = dir.path().join("lexicon.bin");
  let stats_path = dir.path().join("stats.bin");
  built.lexicon.write_to(&lexicon_path, built.index.len() as u64).unwrap();
  built.stats.write_to(&stats_path).unwrap();
  let lexicon = LexiconReader::open(&lexicon_path).unwrap();
  let stats = StatsReader::open(&stats_path).unwrap();

  let builder_config = BuilderConfig {
    min_frequency: 1,
    min_cooccurrence: 1,
    ..BuilderConfig::default()
  };
  let builder = Builder::new(builder_config, &lexicon, &stats);
  let output_dir = dir.path().join("out");
  let cancel = AtomicBool::new(false);
  builder.build(&built.index, &output_dir, &cancel).unwrap();

  let artifact = ArtifactReader::open(&output_dir.join("artifact.bin")).unwrap();
  assert!(artifact.has_lemma("cat"));

  let engine = InMemorySpanEngine::from_index(&built.index);
  let relations = surface_window_relation();
  let executor = QueryExecutor::new(&relations, &artifact, &lexicon, &stats, &engine, QueryConfig::default());
  let results = executor.lookup_collocates("cat", "window", None, 0.0).unwrap();
  assert!(results.iter().any(|r| r.lemma == "mat"));
}

// A concordance line spanning a sentence boundary must be trimmed to the
// sentence containing the match (spec.md §8 scenario 5).
#[test]
fn concordance_trims_to_matched_sentence() {
  let dir = tempdir().unwrap();
  let corpus = vec![
    sentence(0, &[("a", "a", "DT"), ("tiny", "tiny", "JJ"), ("mouse", "mouse", "NN"), ("squeaked", "squeak", "VBD")]),
    sentence(1, &[("the", "the", "DT"), ("big", "big", "JJ"), ("cat", "cat", "NN")]),
    sentence(2, &[("a", "a", "DT"), ("small", "small", "JJ"), ("dog", "dog", "NN"), ("ran", "run", "VBD")]),
  ];
  let source = InMemorySentenceSource::new(corpus);
  let built = build_index(&source).unwrap();

  let lexicon_path = dir.path().join("lexicon.bin");
  let stats_path = dir.path().join("stats.bin");
  built.lexicon.write_to(&lexicon_path, built.index.len() as u64).unwrap();
  built.stats.write_to(&stats_path).unwrap();
  let lexicon = LexiconReader::open(&lexicon_path).unwrap();
  let stats = StatsReader::open(&stats_path).unwrap();
  let artifact_path = dir.path().join("artifact.bin");
  collocations::artifact::ArtifactData::default().write_to(&artifact_path).unwrap();
  let artifact = ArtifactReader::open(&artifact_path).unwrap();

  let engine = InMemorySpanEngine::from_index(&built.index);
  let relations = RelationConfig::from_json(
    r#"{
      "version": "1",
      "relations": [
        {
          "id": "adj_noun",
          "name": "adjective-noun",
          "description": "adjective preceding noun",
          "pattern": "[tag=\"JJ\"] [tag=\"NN\"]",
          "head_position": 1,
          "collocate_position": 2,
          "dual": false,
          "default_slop": 0,
          "relation_type": "DEP",
          "exploration_enabled": true
        }
      ]
    }"#,
  )
  .unwrap();

  let executor = QueryExecutor::new(&relations, &artifact, &lexicon, &stats, &engine, QueryConfig::default());
  let lines = executor.concordance("big", "cat", "adj_noun").unwrap();
  assert_eq!(lines.len(), 1);
  // The default context window (12 tokens) reaches well past this 3-token
  // sentence on both sides, pulling in raw content from the neighboring
  // sentences that must then be trimmed away at the `<s>`/`</s>` markers.
  assert!(lines[0].left.starts_with("<s>"));
  assert!(lines[0].right.ends_with("</s>"));
  assert!(!lines[0].left.contains("mouse"));
  assert!(!lines[0].left.contains("squeaked"));
  assert!(!lines[0].right.contains("dog"));
  assert!(!lines[0].right.contains("ran"));
  assert_eq!(lines[0].left, "<s> the");
  assert_eq!(lines[0].right, "</s>");
}
