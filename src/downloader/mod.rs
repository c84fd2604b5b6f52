mod docker;
mod event_handler;
mod package;
mod transfer;

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    digest::DigestError,
    fs::PathError,
    http::{redact_url, Client, ClientOptions, Credentials, HttpError, RetryPolicy},
    manifests::{ManifestError, Platform},
    reference::{ArtifactKind, ArtifactReference, ArtifactType, ReferenceError},
};

pub use docker::DockerFetcher;
pub use event_handler::{EventHandler, NoEventHandler};
pub use package::{terraform_state_url, PackageFetcher};

/// Maximum number of threads to download blobs in parallel.
const DEFAULT_MAX_CONCURRENCY: usize = 8;

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ReferenceError),

    #[error("Invalid digest: {0}")]
    InvalidDigest(#[from] DigestError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] HttpError),

    #[error("Insufficient parts in {0}")]
    InsufficientUrlParts(String),

    #[error("Downloader was not found for artifact kind {0:?}")]
    UnsupportedArtifact(ArtifactKind),

    #[error("Unsafe destination: {0}")]
    PathTraversal(#[from] PathError),

    #[error("Invalid manifest: {0}")]
    Manifest(#[from] ManifestError),

    #[error("I/O error in {1}: {0}")]
    Io(io::Error, PathBuf),

    #[error("Operation interrupted.")]
    Interrupted,
}

macro_rules! try_io {
    ($path:expr, $e:expr $(,)?) => {
        $e.map_err(|e| $crate::FetchError::Io(::std::io::Error::from(e), $path.into()))?
    };
}

// Make visible to mods.
pub(crate) use try_io;

/// A strategy to download one kind of artifact.
pub trait Fetcher: Send + Sync {
    /// Download the artifact to the `target` directory, and return the
    /// path to give to the extractor.
    fn fetch(&self, ctx: &FetchContext, target: &Path) -> Result<PathBuf, FetchError>;

    /// Classify the downloaded artifact.
    fn classify(&self, local_path: &Path) -> ArtifactType;
}

/// Settings shared by all fetchers.
#[derive(Clone, Debug)]
pub(crate) struct Settings {
    pub max_concurrency: usize,
    pub platform: Platform,
}

/// State available to a [`Fetcher`] during a download.
pub struct FetchContext<'a> {
    pub(crate) client: Client<'a>,
    pub(crate) reference: &'a ArtifactReference,
    pub(crate) settings: &'a Settings,
    pub(crate) event_handler: &'a dyn EventHandler,
}

impl FetchContext<'_> {
    pub fn reference(&self) -> &ArtifactReference {
        self.reference
    }
}

/// Fetchers for each kind of artifact.
pub struct FetcherRegistry {
    fetchers: HashMap<ArtifactKind, Box<dyn Fetcher>>,
}

impl FetcherRegistry {
    /// Registry with no fetchers.
    pub fn empty() -> Self {
        FetcherRegistry {
            fetchers: HashMap::new(),
        }
    }

    /// Use `fetcher` for artifacts of `kind`.
    pub fn with(mut self, kind: ArtifactKind, fetcher: impl Fetcher + 'static) -> Self {
        self.fetchers.insert(kind, Box::new(fetcher));
        self
    }

    pub fn get(&self, kind: ArtifactKind) -> Option<&dyn Fetcher> {
        self.fetchers.get(&kind).map(|f| f.as_ref())
    }
}

impl Default for FetcherRegistry {
    fn default() -> Self {
        FetcherRegistry::empty()
            .with(ArtifactKind::Container, DockerFetcher)
            .with(ArtifactKind::SoftwarePackage, PackageFetcher)
            .with(ArtifactKind::Jar, PackageFetcher)
    }
}

/// Result of a download.
#[derive(Clone, Debug, PartialEq)]
pub struct Downloaded {
    /// Path to give to the extractor.
    pub path: PathBuf,

    pub kind: ArtifactKind,

    pub artifact_type: ArtifactType,
}

/// Download an artifact to a local directory.
///
/// # Examples
///
/// ```no_run
/// # use std::{path::Path, time::Duration};
/// # use artifact_fetch::*;
/// let reference = ArtifactReference::resolve(
///     "https://jfrog.example.com/artifactory/docker-local/app/1.0/manifest.json",
///     "",
///     Some(Credentials::Bearer("token".into())),
///     "3.99",
/// )?;
///
/// let downloaded = Downloader::new(reference)
///     .max_concurrency(4)
///     .timeout_read(Duration::from_secs(60))
///     .download(Path::new("/var/scan/downloaded"))?;
///
/// assert_eq!(downloaded.kind, ArtifactKind::Container);
/// # Ok::<(), FetchError>(())
/// ```
pub struct Downloader {
    reference: ArtifactReference,
    options: ClientOptions,
    settings: Settings,
    event_handler: Box<dyn EventHandler>,
    registry: FetcherRegistry,
}

impl Downloader {
    pub fn new(reference: ArtifactReference) -> Self {
        Downloader {
            reference,
            options: ClientOptions::default(),
            settings: Settings {
                max_concurrency: DEFAULT_MAX_CONCURRENCY,
                platform: Platform::default(),
            },
            event_handler: Box::new(NoEventHandler),
            registry: FetcherRegistry::default(),
        }
    }

    /// Timeout to connect to the server.
    pub fn timeout_connect(mut self, timeout: Duration) -> Self {
        self.options.timeout_connect = timeout;
        self
    }

    /// Timeout for each read from a socket.
    pub fn timeout_read(mut self, timeout: Duration) -> Self {
        self.options.timeout_read = timeout;
        self
    }

    /// Retry requests that fail with a transient error.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.options.retry = policy;
        self
    }

    /// Maximum number of blobs downloaded at the same time.
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.settings.max_concurrency = limit.max(1);
        self
    }

    /// Platform to select when the registry returns a manifest list.
    pub fn platform(mut self, platform: Platform) -> Self {
        self.settings.platform = platform;
        self
    }

    pub fn event_handler(mut self, event_handler: impl EventHandler) -> Self {
        self.event_handler = Box::new(event_handler);
        self
    }

    pub fn registry(mut self, registry: FetcherRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Download the artifact to `target`.
    ///
    /// `target` is created if it does not exist.
    pub fn download(self, target: &Path) -> Result<Downloaded, FetchError> {
        let kind = self.reference.kind;

        let fetcher = self
            .registry
            .get(kind)
            .ok_or(FetchError::UnsupportedArtifact(kind))?;

        try_io!(target, std::fs::create_dir_all(target));

        tracing::info!(?kind, url = %redact_url(&self.reference.source_url), "downloading artifact");

        let event_handler = self.event_handler.as_ref();
        let ctx = FetchContext {
            client: Client::new(
                self.reference.credentials.as_ref(),
                &self.reference.client_version,
                &self.options,
                event_handler,
            ),
            reference: &self.reference,
            settings: &self.settings,
            event_handler,
        };

        let path = fetcher.fetch(&ctx, target)?;
        let artifact_type = fetcher.classify(&path);

        event_handler.finished();

        Ok(Downloaded {
            path,
            kind,
            artifact_type,
        })
    }
}

/// Download the artifact at `image_manifest_url` or `artifact_url`
/// with the default settings.
///
/// Exactly one of the URLs must be non-empty.
pub fn download_artifact(
    image_manifest_url: &str,
    artifact_url: &str,
    credentials: Option<Credentials>,
    client_version: &str,
    target: &Path,
) -> Result<Downloaded, FetchError> {
    let reference = ArtifactReference::resolve(
        image_manifest_url,
        artifact_url,
        credentials,
        client_version,
    )?;

    Downloader::new(reference).download(target)
}
