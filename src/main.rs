// Licensed under the MIT License
// Copyright (c) 2025 Sijo Saju <sijo.saju@outlook.com>

// Use high-performance memory allocator unless build.rs disabled it
#[cfg(not(disable_mimalloc))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use qstream::controller::ControllerConfig;
use qstream::job::{DownloadJob, DownloadMode, JobMetrics};
use qstream::qtable::QTableStore;
use qstream::{ConsoleProgressBar, Downloader, DownloadError, QstreamConfig, RlController};

/// qstream - adaptive multi-stream downloader
#[derive(Parser)]
#[command(name = "qstream")]
#[command(about = "Multi-stream HTTP downloader with Q-learning connection control")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a file
    #[command(alias = "dl")]
    Download {
        /// URL to download
        url: String,
        /// Output path (optional)
        output: Option<PathBuf>,
        /// Number of parallel streams
        #[arg(short, long)]
        streams: Option<usize>,
        /// Single-stream browser-style download
        #[arg(long)]
        single: bool,
        /// Let the Q-learning controller resize the pool during the transfer
        #[arg(long, short)]
        adaptive: bool,
    },
    /// Q-learning controller maintenance
    #[command(subcommand)]
    Rl(RlCommands),
}

#[derive(Subcommand)]
enum RlCommands {
    /// Show learning statistics
    Stats,
    /// Clear the Q-table and persist the empty state
    Reset,
    /// Persist the Q-table now
    Save,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _ = qstream::logging::init_cli_logging(cli.verbose);

    let config = QstreamConfig::load()?;

    match cli.command {
        Commands::Download {
            url,
            output,
            streams,
            single,
            adaptive,
        } => {
            handle_download(config, url, output, streams, single, adaptive).await?;
        }
        Commands::Rl(command) => handle_rl(config, command)?,
    }

    Ok(())
}

fn build_controller(config: &QstreamConfig) -> anyhow::Result<RlController> {
    let store = QTableStore::new(config.q_table_path(), config.q_table_backup_path());
    Ok(RlController::with_store(
        ControllerConfig::from_config(config),
        store,
    )?)
}

async fn handle_download(
    config: QstreamConfig,
    url: String,
    output: Option<PathBuf>,
    streams: Option<usize>,
    single: bool,
    adaptive: bool,
) -> anyhow::Result<()> {
    let num_streams = streams
        .unwrap_or(config.streams.default_streams)
        .clamp(config.streams.min_streams, config.streams.max_streams);

    let mode = if single {
        DownloadMode::Single
    } else {
        DownloadMode::Multi
    };
    let use_rl = adaptive && !single;

    let bar = ConsoleProgressBar::new(0);
    let job = Arc::new(DownloadJob::new(
        url.clone(),
        mode,
        use_rl,
        num_streams,
        Some(bar.hook()),
    ));

    let controller = if use_rl {
        Some(Arc::new(Mutex::new(build_controller(&config)?)))
    } else {
        None
    };

    let downloader = Downloader::for_job(config, Arc::clone(&job), controller.clone())?;

    println!("⬇️  Downloading {url}");
    if use_rl {
        println!("🤖 Adaptive mode: starting at {num_streams} streams");
    } else if !single {
        println!("   {num_streams} parallel streams");
    }

    let run = downloader.run(output);
    tokio::pin!(run);
    let result = tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            job.request_cancel();
            bar.abandon("cancelled");
            println!("\nCancelling, waiting for streams to stop...");
            run.await
        }
    };

    match result {
        Ok(outcome) => {
            bar.finish("done");
            println!(
                "✅ Saved {} ({} bytes in {:.2}s, {:.2} MB/s)",
                outcome.path.display(),
                outcome.size,
                outcome.duration.as_secs_f64(),
                outcome.speed / (1024.0 * 1024.0)
            );
            print_metrics_report(&job.detailed_metrics());
            if let Some(controller) = &controller {
                print_rl_summary(&controller.lock().unwrap());
            }
            Ok(())
        }
        Err(DownloadError::Cancelled) => {
            println!("Download cancelled.");
            Ok(())
        }
        Err(e) => {
            bar.abandon("failed");
            Err(e.into())
        }
    }
}

fn print_metrics_report(metrics: &JobMetrics) {
    println!();
    println!("Download metrics");
    println!("  Total time:   {:.2}s", metrics.total_time_seconds);
    println!("  File size:    {:.2} MB", metrics.total_size_mb);
    println!(
        "  Throughput:   {:.2} Mbps ({:.2} MB/s)",
        metrics.throughput_mbps, metrics.throughput_mbs
    );
    println!("  Streams used: {}", metrics.num_streams_used);
    println!(
        "  Per stream:   {:.2} MB/s average",
        metrics.average_speed_per_stream
    );

    if !metrics.chunk_metrics.is_empty() {
        println!("  {:<8} {:>10} {:>10} {:>12}", "chunk", "size (MB)", "time (s)", "MB/s");
        for chunk in &metrics.chunk_metrics {
            println!(
                "  {:<8} {:>10.2} {:>10.2} {:>12.2}",
                chunk.chunk_id, chunk.size_mb, chunk.time_seconds, chunk.speed_mbs
            );
        }
    }
    if let (Some(fastest), Some(slowest)) = (&metrics.fastest_chunk, &metrics.slowest_chunk) {
        println!(
            "  Fastest chunk #{} at {:.2} MB/s, slowest #{} at {:.2} MB/s",
            fastest.chunk_id, fastest.speed_mbs, slowest.chunk_id, slowest.speed_mbs
        );
    }
}

fn print_rl_summary(controller: &RlController) {
    let stats = controller.stats();
    println!();
    println!("Controller");
    println!("  Connections:     {}", stats.current_connections);
    println!("  Q-table states:  {}", stats.q_table_size);
    println!("  Decisions:       {}", stats.total_decisions);
    println!("  Updates:         {}", stats.total_learning_updates);
    println!("  Avg reward:      {:.4}", stats.average_reward);
    println!("  Exploration:     {:.4}", stats.exploration_rate);
    println!(
        "  In optimal band: {:.1}% of decisions",
        stats.optimal_range_percentage
    );
}

fn handle_rl(config: QstreamConfig, command: RlCommands) -> anyhow::Result<()> {
    let mut controller = build_controller(&config)?;
    match command {
        RlCommands::Stats => {
            let stats = controller.stats();
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        RlCommands::Reset => {
            controller.reset()?;
            println!("Q-table cleared and persisted empty.");
        }
        RlCommands::Save => {
            controller.save()?;
            println!("Q-table saved to {}", config.q_table_path().display());
        }
    }
    Ok(())
}
