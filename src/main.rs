use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use user_etl::config::{ConfigBuilder, ErrorPolicy};
use user_etl::etl::{Pipeline, ProgressReporter, ProgressState, TerminalDisplay};
use user_etl::logging::{init_logging, LogFormat};

/// Turns comma-delimited user lines into JSON records, appended to the output file.
#[derive(Debug, Parser)]
#[command(name = "user-etl", version, about)]
struct Cli {
    /// Input file, one `id,username,email,is_active,full_name` line per record
    #[arg(long, env = "ETL_INPUT_PATH", default_value = "users.txt")]
    input_path: PathBuf,

    /// Output file; existing content is kept and new records are appended
    #[arg(long, env = "ETL_OUTPUT_PATH", default_value = "processed_users.txt")]
    output_path: PathBuf,

    /// Lines per batch
    #[arg(long, env = "ETL_BATCH_SIZE", default_value_t = 100_000)]
    batch_size: usize,

    /// Writes allowed in flight at once
    #[arg(long, env = "ETL_MAX_CONCURRENT_WRITERS", default_value_t = 5)]
    max_concurrent_writers: usize,

    /// Simulated latency of the per-line enrichment call, in milliseconds
    #[arg(long, env = "ETL_TRANSFORM_LATENCY_MS", default_value_t = 200)]
    transform_latency_ms: u64,

    /// Drop invalid lines with a warning instead of aborting the run
    #[arg(long, env = "ETL_SKIP_INVALID")]
    skip_invalid: bool,

    /// Count input lines first so the progress bar shows a total
    #[arg(long, env = "ETL_COUNT_TOTAL")]
    count_total: bool,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "ETL_LOG", default_value = "info")]
    log: String,

    /// Log format: text or json
    #[arg(long, env = "ETL_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(&cli.log, cli.log_format)?;

    let config = ConfigBuilder::default()
        .input_path(cli.input_path)
        .output_path(cli.output_path)
        .batch_size(cli.batch_size)
        .max_concurrent_writers(cli.max_concurrent_writers)
        .transform_latency(Duration::from_millis(cli.transform_latency_ms))
        .error_policy(if cli.skip_invalid {
            ErrorPolicy::Skip
        } else {
            ErrorPolicy::Abort
        })
        .count_total(cli.count_total)
        .build()?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            ctrl_c.cancel();
        }
    });

    let progress = ProgressReporter::new(
        Arc::new(ProgressState::new()),
        Box::new(TerminalDisplay::new("Processing")),
    );
    let mut pipeline = Pipeline::new(config).with_progress(progress);

    info!(
        input = %pipeline.config().input_path().display(),
        output = %pipeline.config().output_path().display(),
        "starting"
    );
    let summary = pipeline.run(&cancel).await?;

    println!(
        "[*] Processing file took {} seconds.",
        summary.elapsed.as_secs_f64()
    );
    Ok(())
}
