use std::sync::atomic::AtomicBool;

use collocations::builder::{Builder, BuilderConfig};
use collocations::indexing::build_index;
use collocations::sentence::{InMemorySentenceSource, Sentence};
use collocations::token::Token;
use collocations::artifact::ArtifactReader;
use collocations::lexicon::LexiconReader;
use collocations::stats::StatsReader;
use tempfile::tempdir;

fn sentence(id: u64, words: &[&str]) -> Sentence {
  let tokens = words
    .iter()
    .enumerate()
    .map(|(i, w)| Token::new(i as u32, *w, *w, "NN", 0, 0))
    .collect();
  Sentence::new(id, words.join(" "), tokens)
}

// Five sentences over {a,b,c,d} designed so a-b and a-c clear minCooccurrence
// but a-d does not (spec.md §8 scenario 1).
fn tiny_corpus() -> Vec<Sentence> {
  vec![
    sentence(0, &["a", "b", "c"]),
    sentence(1, &["a", "b", "c"]),
    sentence(2, &["a", "b"]),
    sentence(3, &["a", "c"]),
    sentence(4, &["a", "d"]),
  ]
}

#[test]
fn tiny_corpus_round_trip_matches_expected_collocates() {
  let dir = tempdir().unwrap();
  let source = InMemorySentenceSource::new(tiny_corpus());
  let built = build_index(&source).unwrap();

  let lexicon_path = dir.path().join("lexicon.bin");
  let stats_path = dir.path().join("stats.bin");
  built.lexicon.write_to(&lexicon_path, built.index.len() as u64).unwrap();
  built.stats.write_to(&stats_path).unwrap();
  let lexicon = LexiconReader::open(&lexicon_path).unwrap();
  let stats = StatsReader::open(&stats_path).unwrap();

  let config = BuilderConfig {
    min_frequency: 1,
    min_cooccurrence: 2,
    ..BuilderConfig::default()
  };
  let builder = Builder::new(config, &lexicon, &stats);
  let output_dir = dir.path().join("out");
  let cancel = AtomicBool::new(false);
  builder.build(&built.index, &output_dir, &cancel).unwrap();

  let reader = ArtifactReader::open(&output_dir.join("artifact.bin")).unwrap();
  let entry = reader.get_collocations("a").unwrap().unwrap();
  let collocates: Vec<&str> = entry.collocations.iter().map(|c| c.lemma.as_str()).collect();
  assert!(collocates.contains(&"b"));
  assert!(collocates.contains(&"c"));
  assert!(!collocates.contains(&"d"));
  assert!(!collocates.contains(&"a"));
}

#[test]
fn resume_after_interruption_yields_reader_equivalent_artifact() {
  let dir = tempdir().unwrap();
  let source = InMemorySentenceSource::new(tiny_corpus());
  let built = build_index(&source).unwrap();

  let lexicon_path = dir.path().join("lexicon.bin");
  let stats_path = dir.path().join("stats.bin");
  built.lexicon.write_to(&lexicon_path, built.index.len() as u64).unwrap();
  built.stats.write_to(&stats_path).unwrap();
  let lexicon = LexiconReader::open(&lexicon_path).unwrap();
  let stats = StatsReader::open(&stats_path).unwrap();

  let config = BuilderConfig {
    min_frequency: 1,
    min_cooccurrence: 2,
    ..BuilderConfig::default()
  };

  let output_dir = dir.path().join("out");
  let builder = Builder::new(config.clone(), &lexicon, &stats);
  let cancel = AtomicBool::new(false);
  builder.build(&built.index, &output_dir, &cancel).unwrap();
  let baseline = ArtifactReader::open(&output_dir.join("artifact.bin")).unwrap();
  let baseline_entry = baseline.get_collocations("a").unwrap().unwrap();

  let resumed_config = BuilderConfig { resume: true, ..config };
  let resumed_builder = Builder::new(resumed_config, &lexicon, &stats);
  let report = resumed_builder.build(&built.index, &output_dir, &cancel).unwrap();
  assert_eq!(report.resumed_entries, 0, "a fully finished artifact has nothing left to resume");

  let after = ArtifactReader::open(&output_dir.join("artifact.bin")).unwrap();
  let after_entry = after.get_collocations("a").unwrap().unwrap();
  assert_eq!(baseline_entry.collocations.len(), after_entry.collocations.len());
}

#[test]
fn empty_corpus_produces_valid_empty_artifact() {
  let dir = tempdir().unwrap();
  let source = InMemorySentenceSource::new(vec![]);
  let built = build_index(&source).unwrap();

  let lexicon_path = dir.path().join("lexicon.bin");
  let stats_path = dir.path().join("stats.bin");
  built.lexicon.write_to(&lexicon_path, built.index.len() as u64).unwrap();
  built.stats.write_to(&stats_path).unwrap();
  let lexicon = LexiconReader::open(&lexicon_path).unwrap();
  let stats = StatsReader::open(&stats_path).unwrap();

  let builder = Builder::new(BuilderConfig::default(), &lexicon, &stats);
  let output_dir = dir.path().join("out");
  let cancel = AtomicBool::new(false);
  let report = builder.build(&built.index, &output_dir, &cancel).unwrap();
  assert_eq!(report.entries_written, 0);

  let reader = ArtifactReader::open(&output_dir.join("artifact.bin")).unwrap();
  assert_eq!(reader.entry_count(), 0);
}
