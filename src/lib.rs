//! Download container images and packages from Artifactory, so they
//! can be processed by an extractor.
//!
//! Images are downloaded through the Docker API of Artifactory. Both
//! schema v2 (and OCI) manifests and legacy manifest lists are
//! supported. Other artifacts are downloaded as a single file.

pub mod digest;
pub mod fs;

mod downloader;
mod http;
mod manifests;
mod reference;

pub use digest::{Digest, DigestError};
pub use downloader::{
    download_artifact, terraform_state_url, DockerFetcher, Downloaded, Downloader, EventHandler,
    FetchContext, FetchError, Fetcher, FetcherRegistry, NoEventHandler, PackageFetcher,
};
pub use fs::PathError;
pub use http::{Credentials, HttpError, RetryPolicy};
pub use manifests::{
    BlobRef, LegacyEntry, ManifestDocument, ManifestError, Platform, SchemaV2Manifest,
};
pub use reference::{
    ArtifactKind, ArtifactReference, ArtifactType, ImageCoordinates, MediaType, ReferenceError,
    RegistryHost,
};
