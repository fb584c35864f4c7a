use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use chrono::{DateTime, Utc};
use clap::{error::ErrorKind, Parser};
use dlhd_rs::{
    config::{self, ExtractorConfig},
    pipeline::Extractor,
    synth::StreamDescriptor,
};
use log::{error, warn};
use serde::Serialize;

const EXIT_EXTRACTION_FAILED: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

#[derive(Parser, Debug)]
#[command(version, about = "Resolve a DLHD watch page into a playable HLS manifest")]
struct Args {
    /// Page URL that contains the stream (e.g. https://daddylive.sx/watch.php?id=123)
    #[arg(long)]
    url: String,

    /// Where to write the JSON result
    #[arg(long, env = "OUTPUT_PATH", default_value = "./dlhd_result.json")]
    output: PathBuf,

    /// Ignore the cache and resolve again
    #[arg(long)]
    force: bool,

    #[arg(long)]
    verbose: bool,

    /// Cache file, defaults to .dlhd_cache next to the executable
    #[arg(long, env = "DLHD_CACHE_FILE")]
    cache_file: Option<PathBuf>,

    /// Comma-separated proxy URLs
    #[arg(long, env = "DLHD_PROXIES", default_value = "")]
    proxies: String,

    /// Extra request headers as a JSON object
    #[arg(long = "headers", env = "DLHD_REQUEST_HEADERS", default_value = "{}")]
    request_headers: String,
}

#[derive(Serialize)]
struct Success<'a> {
    success: bool,
    input_url: &'a str,
    resolved_at: DateTime<Utc>,
    result: &'a StreamDescriptor,
}

#[derive(Serialize)]
struct Failure<'a> {
    success: bool,
    input_url: &'a str,
    error: String,
}

impl<'a> Failure<'a> {
    fn new(input_url: &'a str, error: impl ToString) -> Self {
        Self {
            success: false,
            input_url,
            error: error.to_string(),
        }
    }
}

fn emit<T: Serialize>(envelope: &T) {
    match serde_json::to_string(envelope) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Could not serialize result: {}", e),
    }
}

async fn write_output<T: Serialize>(path: &Path, envelope: &T) {
    let json = match serde_json::to_string_pretty(envelope) {
        Ok(json) => json,
        Err(e) => {
            warn!("Unable to serialize output file: {}", e);
            return;
        }
    };

    if let Err(e) = tokio::fs::write(path, json).await {
        warn!("Unable to write output file {}: {}", path.display(), e);
    }
}

async fn run(args: Args) -> ExitCode {
    let config = ExtractorConfig {
        extra_headers: config::parse_extra_headers(&args.request_headers),
        proxies: config::parse_proxies(&args.proxies),
        cache_path: args.cache_file.clone(),
        ..Default::default()
    };

    let extractor = match Extractor::new(config) {
        Ok(extractor) => extractor,
        Err(e) => {
            error!("{}", e);
            emit(&Failure::new(&args.url, e));
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    };

    let code = match extractor.extract(&args.url, args.force).await {
        Ok(stream) => {
            let envelope = Success {
                success: true,
                input_url: &args.url,
                resolved_at: Utc::now(),
                result: &stream,
            };
            write_output(&args.output, &envelope).await;
            emit(&envelope);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            emit(&Failure::new(&args.url, e));
            ExitCode::from(EXIT_EXTRACTION_FAILED)
        }
    };

    extractor.close().await;
    code
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    };

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    run(args).await
}
