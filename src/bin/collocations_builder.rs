//! CLI entry point for the single-pass collocations builder (§6.5): reads a
//! directory of JSONL sentence files, runs the strict prior pass (C2/C3),
//! then the collocations builder (C4), writing `lexicon.bin`, `stats.bin`,
//! and `artifact.bin` into the output directory.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use collocations::builder::{Builder, BuilderConfig};
use collocations::indexing::build_index;
use collocations::lexicon::LexiconReader;
use collocations::sentence::JsonlCorpusSource;
use collocations::stats::StatsReader;
use collocations::CollocationsError;

/// Build a collocations artifact from a corpus of JSONL sentence files.
#[derive(Parser, Debug)]
#[command(name = "collocations-builder", version, about)]
struct Cli {
  /// Directory of `*.jsonl` sentence files to index.
  index_path: PathBuf,
  /// Directory to write `lexicon.bin`, `stats.bin`, and `artifact.bin` into.
  output_path: PathBuf,

  /// Co-occurrence window size, in tokens on each side.
  #[arg(long, default_value_t = BuilderConfig::default().window_size)]
  window: u32,
  /// Maximum collocates retained per headword.
  #[arg(long = "top-k", default_value_t = BuilderConfig::default().top_k)]
  top_k: u32,
  /// Minimum headword corpus frequency to receive an entry.
  #[arg(long = "min-freq", default_value_t = BuilderConfig::default().min_frequency)]
  min_freq: u64,
  /// Minimum raw co-occurrence count for a collocate to survive.
  #[arg(long = "min-cooc", default_value_t = BuilderConfig::default().min_cooccurrence)]
  min_cooc: u32,
  /// Worker thread count for Stage A/B/C.
  #[arg(long, default_value_t = rayon::current_num_threads())]
  threads: usize,
  /// Number of headword-id shards.
  #[arg(long, default_value_t = BuilderConfig::default().shards)]
  shards: usize,
  /// Pair count at which a shard spills its in-memory map to disk.
  #[arg(long, default_value_t = BuilderConfig::default().spill_threshold)]
  spill: usize,
  /// Entries between durability checkpoints.
  #[arg(long, default_value_t = BuilderConfig::default().checkpoint_every)]
  checkpoint: usize,
  /// Resume an interrupted build against the same output directory.
  #[arg(long, default_value_t = false)]
  resume: bool,
}

fn main() -> ExitCode {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let cli = Cli::parse();
  run(cli)
}

fn run(cli: Cli) -> ExitCode {
  if !cli.index_path.is_dir() {
    error!(path = %cli.index_path.display(), "index path is not a directory");
    return ExitCode::from(1);
  }

  let cancel = Arc::new(AtomicBool::new(false));
  {
    let cancel = Arc::clone(&cancel);
    if let Err(e) = ctrlc_handler(cancel) {
      error!(error = %e, "failed to install signal handler");
    }
  }

  match build(&cli, &cancel) {
    Ok(()) => ExitCode::from(0),
    Err(CollocationsError::Cancelled) => {
      info!("build cancelled");
      ExitCode::from(130)
    }
    Err(e @ (CollocationsError::CorruptArtifact(_) | CollocationsError::CorruptBlob(_))) => {
      error!(error = %e, "corrupt input");
      ExitCode::from(3)
    }
    Err(e @ CollocationsError::Io { .. }) => {
      error!(error = %e, "i/o failure");
      ExitCode::from(2)
    }
    Err(e) => {
      error!(error = %e, "build failed");
      ExitCode::from(1)
    }
  }
}

fn build(cli: &Cli, cancel: &AtomicBool) -> collocations::Result<()> {
  std::fs::create_dir_all(&cli.output_path).map_err(|e| CollocationsError::io(&cli.output_path, e))?;

  info!(path = %cli.index_path.display(), "indexing corpus");
  let source = JsonlCorpusSource::new(&cli.index_path);
  let indexed = build_index(&source)?;

  let lexicon_path = cli.output_path.join("lexicon.bin");
  let stats_path = cli.output_path.join("stats.bin");
  indexed.lexicon.write_to(&lexicon_path, indexed.index.len() as u64)?;
  indexed.stats.write_to(&stats_path)?;

  let lexicon = LexiconReader::open(&lexicon_path)?;
  let stats = StatsReader::open(&stats_path)?;

  let config = BuilderConfig {
    window_size: cli.window,
    top_k: cli.top_k,
    min_frequency: cli.min_freq,
    min_cooccurrence: cli.min_cooc,
    shards: cli.shards,
    spill_threshold: cli.spill,
    threads: cli.threads,
    checkpoint_every: cli.checkpoint,
    resume: cli.resume,
  };

  info!(sentences = indexed.index.len(), ?config, "building collocations");
  let builder = Builder::new(config, &lexicon, &stats);
  let report = builder.build(&indexed.index, &cli.output_path, cancel)?;
  info!(
    entries_written = report.entries_written,
    sentences_skipped = report.sentences_skipped,
    resumed_entries = report.resumed_entries,
    "build complete"
  );
  Ok(())
}

fn ctrlc_handler(cancel: Arc<AtomicBool>) -> Result<(), String> {
  ctrlc::set_handler(move || {
    cancel.store(true, Ordering::Relaxed);
  })
  .map_err(|e| e.to_string())
}
