use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use flip2pdf::{
    build_document, collect_images, parse_duration, parse_timeout, AssemblyError, Config, Downloader,
    FailurePolicy, FetchOptions, ProgressReporter, DEFAULT_HOST,
};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

#[derive(Parser)]
#[command(name = "flip2pdf")]
#[command(about = "CLI utility to download an online flipbook and save it as a single PDF")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a flipbook and convert it to a PDF
    Download {
        /// URL of the flipbook
        url: String,

        /// Name of the generated PDF (uses the book title if not specified)
        #[arg(long)]
        title: Option<String>,

        /// Skip TLS certificate validation
        #[arg(long)]
        insecure: bool,

        /// Number of parallel downloads
        #[arg(long, default_value = "1", value_parser = parse_threads)]
        threads: usize,

        /// Download attempts per page
        #[arg(long, default_value = "1")]
        retries: u32,

        /// Wait time between download attempts (e.g. 500ms, 2s)
        #[arg(long = "retry-delay", default_value = "1s", value_parser = parse_duration)]
        retry_delay: Duration,

        /// Keep the downloaded page images after the PDF is created
        #[arg(long = "keep-temp")]
        keep_temp: bool,

        /// Directory for the downloaded page images (derived from the title by default)
        #[arg(long = "temp-dir")]
        temp_dir: Option<PathBuf>,

        /// Output directory for the PDF
        #[arg(short = 'o', long = "out-dir", default_value = ".")]
        out_dir: PathBuf,

        /// Request timeout in seconds (0 disables it)
        #[arg(short = 't', long = "timeout", default_value = "30.0", value_parser = parse_timeout)]
        timeout: f64,

        /// Build the PDF even if some pages failed to download
        #[arg(long = "allow-partial")]
        allow_partial: bool,

        /// Host serving the flipbook assets
        #[arg(long, hide = true, default_value = DEFAULT_HOST, value_parser = parse_host)]
        host: Url,
    },
    /// Build a PDF from a directory of already downloaded page images
    Assemble {
        /// Directory containing the page images
        #[arg(short = 'd', long = "dir")]
        input_dir: PathBuf,

        /// Output file path for the PDF
        #[arg(short = 'o', long = "output", default_value = "flipbook.pdf")]
        output_file: PathBuf,
    },
}

fn parse_threads(s: &str) -> Result<usize, String> {
    let value = s.parse::<usize>().map_err(|_| "Not a number.")?;
    if value == 0 {
        return Err("Must be at least 1.".to_string());
    }
    Ok(value)
}

fn parse_host(s: &str) -> Result<Url, String> {
    let url = Url::parse(s).map_err(|e| e.to_string())?;
    if url.cannot_be_a_base() {
        return Err("Must be an http(s) origin.".to_string());
    }
    Ok(url)
}

async fn assemble(input_dir: &Path, output_file: &Path) -> Result<()> {
    if !input_dir.exists() {
        return Err(anyhow::anyhow!("Input directory '{}' does not exist", input_dir.display()));
    }

    info!("Scanning directory: {}", input_dir.display().to_string().green());
    let images = collect_images(input_dir).await?;

    info!("Found {} page images", images.len());
    let progress = ProgressReporter::new(images.len(), "Assembling");

    match build_document(&images, output_file, &progress).await {
        Ok(pages) => {
            info!(
                "Successfully assembled {} pages into: {}",
                pages,
                output_file.display().to_string().green()
            );
            Ok(())
        }
        Err(AssemblyError::OutputExists(path)) => {
            info!("Output file {} already exists", path.display().to_string().blue());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::from_default_env().add_directive("flip2pdf=info".parse().unwrap());

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let args = Args::parse();

    let result = match args.command {
        Commands::Download {
            url,
            title,
            insecure,
            threads,
            retries,
            retry_delay,
            keep_temp,
            temp_dir,
            out_dir,
            timeout,
            allow_partial,
            host,
        } => {
            let config = Config {
                host,
                title,
                insecure,
                timeout: Duration::from_secs_f64(timeout),
                fetch: FetchOptions {
                    concurrency: threads,
                    max_retries: retries,
                    retry_delay,
                },
                keep_temp,
                temp_dir,
                output_dir: out_dir,
                failure_policy: if allow_partial {
                    FailurePolicy::AssemblePartial
                } else {
                    FailurePolicy::Abort
                },
            };
            Downloader::new(config).run(&url).await.map(|_| ())
        }
        Commands::Assemble {
            input_dir,
            output_file,
        } => assemble(&input_dir, &output_file).await,
    };

    if let Err(e) = result {
        error!("{}", format!("Error: {:#}", e).red());
        process::exit(1);
    }
}
