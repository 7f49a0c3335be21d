use anyhow::{Context, Result};
use clap::Parser;
use sift::{CorpusBuilder, MemStore, SearchOpts, SearchPool};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "sift")]
#[command(about = "Indexed regex search over a deduplicated source snapshot")]
struct Cli {
    /// Search pattern (regex)
    pattern: String,

    /// Directory to snapshot and search
    #[arg(short, long, default_value = ".")]
    path: PathBuf,

    /// Only search files whose path matches this regex
    #[arg(short = 'f', long)]
    file: Option<String>,

    /// Maximum number of results
    #[arg(short = 'm', long, default_value = "50")]
    max_matches: usize,

    /// Per-query wall-clock budget in seconds (0 disables)
    #[arg(long, default_value = "1")]
    timeout: u64,

    /// Disable the suffix-array index and scan everything
    #[arg(long)]
    no_index: bool,

    /// Worker threads (0 = one per core)
    #[arg(short = 'j', long, default_value = "0")]
    threads: usize,

    /// Walk these top-level directories first (space separated)
    #[arg(long)]
    order_root: Option<String>,

    /// Print ingestion and query statistics
    #[arg(long)]
    stats: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let files = collect_files(&cli.path)?;
    let mut store = MemStore::new();
    let refs: Vec<(&str, &[u8])> = files
        .iter()
        .map(|(path, bytes)| (path.as_str(), bytes.as_slice()))
        .collect();
    store.add_snapshot("HEAD", &refs);

    let mut builder = CorpusBuilder::new();
    if let Some(order) = &cli.order_root {
        builder.set_order_root(order.split_whitespace().map(String::from).collect());
    }
    builder.walk_ref(&store, "HEAD")?;
    let corpus = Arc::new(builder.finalize());

    if cli.stats {
        let s = corpus.stats();
        eprintln!("Bytes: {} (dedup: {})", s.bytes, s.dedup_bytes);
        eprintln!("Lines: {} (dedup: {})", s.lines, s.dedup_lines);
        eprintln!("Files: {} (dedup: {})", s.files, s.dedup_files);
    }

    let opts = SearchOpts {
        max_matches: cli.max_matches,
        timeout: if cli.timeout == 0 {
            None
        } else {
            Some(Duration::from_secs(cli.timeout))
        },
        use_index: !cli.no_index,
        perform_search: true,
    };

    let pool = SearchPool::new(Arc::clone(&corpus), cli.threads);
    let (results, stats) = pool.search(&cli.pattern, cli.file.as_deref(), &opts)?;

    sift::output::print_matches(&corpus, &results, !cli.no_color)?;

    if cli.stats {
        eprintln!(
            "Matches: {} (exit: {:?})",
            stats.matches, stats.exit_reason
        );
        eprintln!(
            "analyze: {:?} index: {:?} sort: {:?} scan: {:?} resolve: {:?}",
            stats.analyze_time,
            stats.index_time,
            stats.sort_time,
            stats.scan_time,
            stats.resolve_time
        );
    }

    Ok(())
}

/// Snapshot a directory: every non-hidden file that isn't ignored, as
/// `(relative path, bytes)`.
fn collect_files(root: &PathBuf) -> Result<Vec<(String, Vec<u8>)>> {
    let mut files = Vec::new();
    for entry in ignore::WalkBuilder::new(root).build() {
        let entry = entry?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        let rel = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        files.push((rel, bytes));
    }
    Ok(files)
}
