use std::path::PathBuf;

use anyhow::anyhow;
use bodyline_transport::ClientConfig;
use bodyline_transport::config::parse_duration;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "bodyline",
    about = "Bodyline: stream HTTP request and response bodies",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Client configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Deadline for the response head, e.g. "30s" or "500ms"
    #[arg(long, global = true)]
    timeout: Option<String>,
    /// Print the transfer report as JSON on stderr when done
    #[arg(long, global = true)]
    report: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a URL and write the body to stdout
    Get {
        url: String,
        /// Print one line per received chunk instead of the body
        #[arg(long)]
        chunks: bool,
    },
    /// Upload a file or inline text and write the response body to stdout.
    ///
    /// Files are streamed: a reader thread pushes chunks while the
    /// request is in flight, so the file is never loaded whole.
    Post {
        url: String,
        /// File to stream as the request body
        #[arg(short, long, conflicts_with = "data", required_unless_present = "data")]
        file: Option<PathBuf>,
        /// Inline request body
        #[arg(short, long)]
        data: Option<String>,
        /// Upload chunk size, e.g. "64KiB" or "1MiB"
        #[arg(long, default_value = "64KiB")]
        chunk_size: String,
        /// Chunks buffered between the reader thread and the connection
        #[arg(long)]
        capacity: Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bodyline=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };
    if let Some(timeout) = &cli.timeout {
        let timeout =
            parse_duration(timeout).ok_or_else(|| anyhow!("invalid --timeout {timeout:?}"))?;
        config = config.with_timeout(timeout);
    }

    commands::interrupt_on_ctrl_c();

    match cli.command {
        Commands::Get { url, chunks } => commands::get::get(config, &url, chunks, cli.report),
        Commands::Post {
            url,
            file,
            data,
            chunk_size,
            capacity,
        } => {
            let source = match (file, data) {
                (_, Some(data)) => commands::post::Source::Data(data),
                (Some(path), None) => commands::post::Source::File(path),
                (None, None) => anyhow::bail!("either --file or --data is required"),
            };
            let chunk_size = commands::post::parse_size(&chunk_size)
                .ok_or_else(|| anyhow!("invalid --chunk-size {chunk_size:?}"))?;
            if let Some(capacity) = capacity {
                config = config.with_upload_capacity(capacity);
            }
            commands::post::post(config, &url, source, chunk_size, cli.report)
        }
    }
}
