use std::{path::PathBuf, process::ExitCode, time::Duration};

use artifact_fetch::{ArtifactReference, Credentials, Downloader, EventHandler, RetryPolicy};
use clap::Parser;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

#[derive(Parser, Debug)]
struct Args {
    /// URL of a package to download, instead of an image.
    #[arg(long)]
    artifact: bool,

    /// Token for the `Authorization: Bearer` header.
    #[arg(long, env = "ARTIFACTORY_TOKEN", conflicts_with = "username")]
    token: Option<String>,

    /// User for basic authentication.
    #[arg(short, long, env = "ARTIFACTORY_USER", requires = "password")]
    username: Option<String>,

    /// Password for basic authentication.
    #[arg(short, long, env = "ARTIFACTORY_PASSWORD")]
    password: Option<String>,

    /// Version sent in the `User-Agent` header.
    #[arg(long, default_value = "3.99")]
    client_version: String,

    /// Maximum number of parallel downloads.
    #[arg(short = 'j', long, default_value_t = 8)]
    jobs: usize,

    /// Attempts for each request.
    #[arg(long, default_value_t = 1)]
    attempts: u32,

    /// URL of the image manifest, or of the package with `--artifact`.
    url: String,

    /// Directory to write the artifact. It must be empty.
    target: PathBuf,
}

struct Logger;

impl EventHandler for Logger {
    fn registry_request(&self, url: &str) {
        tracing::debug!("GET {url}");
    }

    fn download_start(&self, blobs: usize, bytes: u64) {
        tracing::info!("downloading {blobs} blobs, {bytes} bytes");
    }

    fn blob_finished(&self, url: &str, bytes: u64) {
        tracing::info!("{bytes:>12} {url}");
    }
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();

    if args.target.is_dir() && args.target.read_dir()?.next().is_some() {
        eprintln!("Output dir already exists!");
        return Ok(ExitCode::FAILURE);
    }

    if !args.url.starts_with("http://") && !args.url.starts_with("https://") {
        eprintln!("Schema is missing in the URL. Use http:// or https://");
        return Ok(ExitCode::FAILURE);
    }

    let credentials = match (args.token, args.username, args.password) {
        (Some(token), _, _) => Some(Credentials::Bearer(token)),
        (None, Some(username), Some(password)) => Some(Credentials::Basic { username, password }),
        _ => None,
    };

    let reference = if args.artifact {
        ArtifactReference::resolve("", &args.url, credentials, &args.client_version)?
    } else {
        let mut url = args.url;
        if !url.ends_with("/manifest.json") {
            eprintln!("URL is not ending with manifest.json, appending one.");
            url = format!("{}/manifest.json", url.trim_end_matches('/'));
        }

        ArtifactReference::resolve(&url, "", credentials, &args.client_version)?
    };

    let downloaded = Downloader::new(reference)
        .max_concurrency(args.jobs)
        .retry(RetryPolicy {
            max_attempts: args.attempts.max(1),
            base_delay: Duration::from_millis(500),
        })
        .event_handler(Logger)
        .download(&args.target)?;

    println!(
        "{} ({:?}, {:?})",
        downloaded.path.display(),
        downloaded.kind,
        downloaded.artifact_type
    );

    Ok(ExitCode::SUCCESS)
}
