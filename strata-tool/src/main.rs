//! strata-tool - CLI for querying and layering strata indices
//!
//! # Commands
//!
//! - `query` - run queries against an index (interactive or batch)
//! - `layerify` - rewrite a single-layer index into a layered one
//!
//! # Examples
//!
//! ```bash
//! strata-tool query ./collection --algorithm wand --format trec < queries.txt
//! strata-tool layerify ./collection ./collection-layered --num-layers 2 --overlapping
//! ```

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::seq::SliceRandom;
use tracing::info;

use strata_core::{
    Config, IndexFiles, LayerSplitMode, LayeredIndexGenerator, QueryAlgorithm, QueryMode,
    QueryProcessor, QueryResponse, ResultFormat,
};

#[derive(Parser)]
#[command(name = "strata-tool")]
#[command(version, about = "Query and maintain strata inverted indices")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run queries against an index.
    Query {
        /// Index prefix (the directory/name the index files share).
        index_prefix: PathBuf,
        /// interactive | interactive-single | batch | batch-all
        #[arg(long, default_value = "interactive")]
        mode: String,
        /// default | daat-and | daat-or | layered-overlap |
        /// layered-overlap-merge | layered-taat | wand | wand2 | maxscore |
        /// maxscore2 | daat-and-top-positions
        #[arg(long, default_value = "default")]
        algorithm: String,
        /// trec | normal | compare | discard
        #[arg(long, default_value = "normal")]
        format: String,
        /// Stop words file (one word per line), applied at query time.
        #[arg(long)]
        stop_words: Option<PathBuf>,
        /// Configuration file (key = value lines).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Split a single-layer index into score-ordered layers.
    Layerify {
        input_prefix: PathBuf,
        output_prefix: PathBuf,
        #[arg(long, default_value_t = 2)]
        num_layers: usize,
        #[arg(long)]
        overlapping: bool,
        /// percentage | percentage-bounded | exponential
        #[arg(long, default_value = "percentage-bounded")]
        split_mode: String,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Query {
            index_prefix,
            mode,
            algorithm,
            format,
            stop_words,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let mode: QueryMode = mode.parse().context("bad --mode")?;
            let algorithm: QueryAlgorithm = algorithm.parse().context("bad --algorithm")?;
            let format: ResultFormat = format.parse().context("bad --format")?;
            run_query_command(&index_prefix, config, mode, algorithm, format, stop_words)
        }
        Command::Layerify {
            input_prefix,
            output_prefix,
            num_layers,
            overlapping,
            split_mode,
            config,
        } => {
            let mut config = load_config(config.as_deref())?;
            config.num_layers = num_layers;
            config.overlapping_layers = overlapping;
            let split_mode = match split_mode.as_str() {
                "percentage" => LayerSplitMode::Percentage,
                "percentage-bounded" => LayerSplitMode::PercentageFixedBounded,
                "exponential" => LayerSplitMode::ExponentiallyIncreasing,
                other => anyhow::bail!("unknown split mode '{other}'"),
            };
            let mut generator = LayeredIndexGenerator::new(
                &IndexFiles::new(&input_prefix),
                IndexFiles::new(&output_prefix),
                &config,
                split_mode,
            )?;
            generator.create_layered_index()?;
            Ok(())
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => {
            Config::from_file(path).with_context(|| format!("loading '{}'", path.display()))
        }
        None => Ok(Config::default()),
    }
}

fn run_query_command(
    index_prefix: &std::path::Path,
    config: Config,
    mode: QueryMode,
    algorithm: QueryAlgorithm,
    format: ResultFormat,
    stop_words: Option<PathBuf>,
) -> Result<()> {
    let files = IndexFiles::new(index_prefix);
    let mut processor = QueryProcessor::new(&files, config, algorithm, stop_words.as_deref())
        .context("opening index")?;
    info!(
        algorithm = processor.algorithm().name(),
        "index open, {} documents",
        processor.reader().collection_total_num_docs()
    );

    let stdin = io::stdin();
    match mode {
        QueryMode::Interactive | QueryMode::InteractiveSingle => {
            let mut line = String::new();
            loop {
                print!("Search: ");
                io::stdout().flush()?;
                line.clear();
                if stdin.lock().read_line(&mut line)? == 0 {
                    break;
                }
                let response = processor.run_query(line.trim_end())?;
                print_response(&processor, &response, line.trim_end(), 0, format);
                if mode == QueryMode::InteractiveSingle {
                    break;
                }
            }
        }
        QueryMode::Batch | QueryMode::BatchAll => {
            let mut queries: Vec<(u32, String)> = Vec::new();
            for line in stdin.lock().lines() {
                let line = line?;
                queries.push(split_query_label(&line));
            }
            // Plain batch mode times a small sample after warming the
            // cache on the rest; batch-all times the whole log, silently.
            let test_fraction = if mode == QueryMode::BatchAll { 1.0 } else { 0.01f32 };
            if test_fraction < 1.0 {
                queries.shuffle(&mut rand::thread_rng());
            }
            let num_test = ((test_fraction * queries.len() as f32).ceil() as usize)
                .clamp(1.min(queries.len()), queries.len());
            let num_warm_up = queries.len() - num_test;

            processor.set_warm_up(true);
            for (_, query) in &queries[..num_warm_up] {
                processor.run_query(query)?;
            }
            processor.reset_reader_stats();
            processor.set_warm_up(false);

            let silent = mode == QueryMode::BatchAll;
            for (qid, query) in &queries[num_warm_up..] {
                let response = processor.run_query(query)?;
                if !silent {
                    print_response(&processor, &response, query, *qid, format);
                }
            }
        }
    }

    print_stats_summary(&processor);
    Ok(())
}

/// Batch query lines may be labelled `N:query text`.
fn split_query_label(line: &str) -> (u32, String) {
    match line.split_once(':') {
        Some((label, rest)) if !rest.is_empty() => {
            (label.trim().parse().unwrap_or(0), rest.to_string())
        }
        _ => (0, line.to_string()),
    }
}

fn print_response(
    processor: &QueryProcessor,
    response: &QueryResponse,
    query: &str,
    qid: u32,
    format: ResultFormat,
) {
    match format {
        ResultFormat::Normal => {
            for result in &response.results {
                println!(
                    "Score: {:.2}\tDocID: {}\tURL: {}",
                    result.score,
                    result.doc_id,
                    processor.doc_url(result.doc_id)
                );
            }
            println!(
                "\nShowing {} results out of {}. ({:.4} seconds)",
                response.results.len(),
                response.total_results,
                response.elapsed.as_secs_f64()
            );
        }
        ResultFormat::Trec => {
            for (rank, result) in response.results.iter().enumerate() {
                println!(
                    "{qid}\tQ0\t{}\t{rank}\t{}\tSTANDARD",
                    processor.doc_url(result.doc_id),
                    result.score
                );
            }
        }
        ResultFormat::Compare => {
            println!("{query}");
            println!("num results: {}", response.results.len());
            for result in &response.results {
                println!("{:.2}\t{}", result.score, result.doc_id);
            }
        }
        ResultFormat::Discard => {}
    }
}

fn print_stats_summary(processor: &QueryProcessor) {
    let stats = processor.stats();
    let reader = processor.reader();
    let queries = stats.total_num_queries.max(1) as f64;

    println!("Number of queries executed: {}", stats.total_num_queries);
    println!(
        "Number of single term queries: {}",
        stats.num_single_term_queries
    );
    println!(
        "Total querying time: {:.4} seconds",
        stats.total_querying_time.as_secs_f64()
    );
    println!();
    println!("Early Termination Statistics:");
    println!(
        "Number of early terminated queries: {}",
        stats.num_early_terminated_queries
    );
    println!(
        "not_enough_results_definitely: {}",
        stats.not_enough_results_definitely
    );
    println!(
        "not_enough_results_possibly: {}",
        stats.not_enough_results_possibly
    );
    println!(
        "num_queries_containing_single_layered_terms: {}",
        stats.num_queries_containing_single_layered_terms
    );
    println!(
        "num_queries_kth_result_meeting_threshold: {}",
        stats.num_queries_kth_result_meeting_threshold
    );
    println!(
        "num_queries_kth_result_not_meeting_threshold: {}",
        stats.num_queries_kth_result_not_meeting_threshold
    );
    println!(
        "Average postings scored: {:.1}",
        stats.num_postings_scored as f64 / queries
    );
    println!(
        "Average postings skipped: {:.1}",
        stats.num_postings_skipped as f64 / queries
    );
    println!();
    println!("Per Query Statistics:");
    println!(
        "  Average data read from cache: {:.3} MiB",
        reader.total_cached_bytes_read() as f64 / queries / (1 << 20) as f64
    );
    println!(
        "  Average data read from disk: {:.3} MiB",
        reader.total_disk_bytes_read() as f64 / queries / (1 << 20) as f64
    );
    println!(
        "  Average query latency: {:.3} ms",
        stats.total_querying_time.as_secs_f64() / queries * 1000.0
    );
}
