mod batch;
mod client;
mod dataset;

use anyhow::Result;
use batch::BatchOptions;
use clap::{Args, Parser, Subcommand};
use client::AsrClient;
use shared::ApiOutcome;
use std::path::PathBuf;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

const DEFAULT_DATASET_URL: &str =
    "https://www.dropbox.com/scl/fi/i9yvfqpf7p8uye5o8k1sj/common_voice.zip?rlkey=lz3dtjuhekc3xw4jnoeoqy5yu&dl=1";
const DEFAULT_API_URL: &str = "http://localhost:8001";
const DEFAULT_MANIFEST: &str = "cv-valid-dev.csv";

#[derive(Parser)]
#[command(name = "parrot")]
#[command(about = "Batch transcription client for the parrotd API")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the dataset, extract it, and transcribe every row
    Run(RunArgs),
    /// Download and extract the dataset without transcribing
    Fetch(FetchArgs),
    /// Transcribe a single audio file
    Transcribe(TranscribeArgs),
    /// Check that the transcription API is reachable
    Ping(PingArgs),
}

#[derive(Args)]
struct FetchArgs {
    /// Dataset archive URL
    #[arg(long, default_value = DEFAULT_DATASET_URL)]
    url: String,

    /// Where the downloaded archive is kept
    #[arg(long)]
    archive: Option<PathBuf>,

    /// Where the archive is extracted
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Manifest CSV filename to locate after extraction
    #[arg(long, default_value = DEFAULT_MANIFEST)]
    manifest: String,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    fetch: FetchArgs,

    /// Base URL of the transcription API
    #[arg(long, default_value = DEFAULT_API_URL)]
    api: String,

    /// Directory holding the audio clips (defaults next to the manifest)
    #[arg(long)]
    audio_dir: Option<PathBuf>,

    /// Results CSV path (defaults next to the manifest)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Only process the first N rows
    #[arg(long)]
    limit: Option<usize>,

    /// Pacing between API requests; 0 disables pacing
    #[arg(long, default_value_t = 10)]
    requests_per_second: u32,
}

#[derive(Args)]
struct TranscribeArgs {
    /// Audio file to transcribe
    file: PathBuf,

    #[arg(long, default_value = DEFAULT_API_URL)]
    api: String,
}

#[derive(Args)]
struct PingArgs {
    #[arg(long, default_value = DEFAULT_API_URL)]
    api: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::INFO)
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Fetch(args) => {
            let manifest = fetch(&args).await?;
            println!("Dataset ready, manifest at {}", manifest.display());
            Ok(())
        }
        Commands::Transcribe(args) => transcribe_one(args).await,
        Commands::Ping(args) => ping(args).await,
    }
}

fn default_archive_path() -> Result<PathBuf> {
    Ok(parrot_data_dir()?.join("common_voice.zip"))
}

fn default_data_dir() -> Result<PathBuf> {
    Ok(parrot_data_dir()?.join("datasets"))
}

fn parrot_data_dir() -> Result<PathBuf> {
    let dir = dirs::data_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?
        .join("parrot");
    Ok(dir)
}

/// Download + extract + locate; shared by `run` and `fetch`.
async fn fetch(args: &FetchArgs) -> Result<PathBuf> {
    let archive = match args.archive {
        Some(ref path) => path.clone(),
        None => default_archive_path()?,
    };
    let data_dir = match args.data_dir {
        Some(ref path) => path.clone(),
        None => default_data_dir()?,
    };

    dataset::download_archive(&args.url, &archive).await?;
    dataset::extract_archive(&archive, &data_dir)?;
    dataset::locate_manifest(&data_dir, &args.manifest)
}

async fn run(args: RunArgs) -> Result<()> {
    let client = AsrClient::new(&args.api)?;

    // Bail out before a multi-GiB download if the API is down
    match client.health().await {
        Ok(health) if health.is_healthy() => println!("ASR API is running and healthy"),
        Ok(health) => println!(
            "ASR API is running, model will load on first request ({})",
            health.model
        ),
        Err(e) => {
            eprintln!("Cannot connect to ASR API: {}", e);
            eprintln!("Make sure parrotd is running at {}", args.api);
            std::process::exit(1);
        }
    }

    let manifest = fetch(&args.fetch).await?;
    info!("Processing manifest {:?}", manifest);

    let opts = BatchOptions {
        manifest,
        audio_dir: args.audio_dir,
        output: args.output,
        limit: args.limit,
        requests_per_second: args.requests_per_second,
    };

    let report = batch::process_manifest(&client, &opts).await?;

    println!("Processing complete!");
    println!("  Successfully processed: {}", report.processed);
    println!("  Errors: {}", report.errors);
    println!("  Results saved to: {}", report.output_path.display());

    Ok(())
}

async fn transcribe_one(args: TranscribeArgs) -> Result<()> {
    let client = AsrClient::new(&args.api)?;

    match client.transcribe_file(&args.file).await {
        Ok(ApiOutcome::Ok(resp)) => {
            println!("{}", resp.transcription);
            info!("{}s of audio transcribed", resp.duration);
            Ok(())
        }
        Ok(ApiOutcome::Err(resp)) => {
            eprintln!("Error: {}", resp.error);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Failed to transcribe {}: {}", args.file.display(), e);
            std::process::exit(1);
        }
    }
}

async fn ping(args: PingArgs) -> Result<()> {
    let client = AsrClient::new(&args.api)?;

    match client.health().await {
        Ok(health) => {
            println!("Status: {}", health.status);
            println!("Model: {}", health.model);
            Ok(())
        }
        Err(e) => {
            eprintln!("Cannot connect to ASR API at {}: {}", args.api, e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_defaults() {
        let cli = Cli::parse_from(["parrot", "run"]);

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.api, DEFAULT_API_URL);
                assert_eq!(args.fetch.url, DEFAULT_DATASET_URL);
                assert_eq!(args.fetch.manifest, "cv-valid-dev.csv");
                assert_eq!(args.requests_per_second, 10);
                assert!(args.limit.is_none());
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn parses_run_with_overrides() {
        let cli = Cli::parse_from([
            "parrot",
            "run",
            "--api",
            "http://10.0.0.5:9000",
            "--limit",
            "25",
            "--data-dir",
            "/tmp/cv",
        ]);

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.api, "http://10.0.0.5:9000");
                assert_eq!(args.limit, Some(25));
                assert_eq!(args.fetch.data_dir, Some(PathBuf::from("/tmp/cv")));
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn parses_transcribe_command() {
        let cli = Cli::parse_from(["parrot", "transcribe", "clip.mp3"]);

        match cli.command {
            Commands::Transcribe(args) => {
                assert_eq!(args.file, PathBuf::from("clip.mp3"));
                assert_eq!(args.api, DEFAULT_API_URL);
            }
            _ => panic!("expected transcribe command"),
        }
    }

    #[test]
    fn parses_fetch_command() {
        let cli = Cli::parse_from(["parrot", "fetch", "--archive", "/tmp/cv.zip"]);

        match cli.command {
            Commands::Fetch(args) => {
                assert_eq!(args.archive, Some(PathBuf::from("/tmp/cv.zip")));
            }
            _ => panic!("expected fetch command"),
        }
    }

    #[test]
    fn parses_ping_command() {
        let cli = Cli::parse_from(["parrot", "ping", "--api", "http://localhost:8001"]);
        assert!(matches!(cli.command, Commands::Ping(_)));
    }
}
