mod mediatype;
mod parser;

use std::{fmt, path::Path};

use crate::http::Credentials;

pub use mediatype::MediaType;

/// Errors from building an [`ArtifactReference`].
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ReferenceError {
    #[error("IMAGE_MANIFEST_URL, ARTIFACT_URL - Definition of one of them is needed")]
    MissingUrl,

    #[error("IMAGE_MANIFEST_URL, ARTIFACT_URL - Only one of them needs to be defined")]
    ConflictingUrls,

    #[error("Invalid URL {0:?}: {1}")]
    InvalidUrl(String, url::ParseError),

    #[error("Missing registry host in {0:?}")]
    MissingHost(String),
}

/// Kind of artifact, which selects the retrieval strategy.
///
/// The numeric values are the ones expected by the extractor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Container = 1,
    SoftwarePackage = 2,
    Jar = 3,
}

impl ArtifactKind {
    /// Decide the kind of artifact from the URLs given by the caller.
    ///
    /// Any non-empty `image_manifest_url` is a container. Otherwise, the
    /// extension of `artifact_url` is checked to detect Java archives.
    ///
    /// # Examples
    ///
    /// ```
    /// # use artifact_fetch::ArtifactKind;
    /// assert_eq!(ArtifactKind::resolve("", "https://h/a/app.WAR"), ArtifactKind::Jar);
    /// assert_eq!(ArtifactKind::resolve("", "https://h/a/x.tar.gz"), ArtifactKind::SoftwarePackage);
    /// ```
    pub fn resolve(image_manifest_url: &str, artifact_url: &str) -> ArtifactKind {
        if !image_manifest_url.is_empty() {
            return ArtifactKind::Container;
        }

        // Use only the path, so the query string is not part of the extension.
        let path = match url::Url::parse(artifact_url) {
            Ok(url) => url.path().to_owned(),
            Err(_) => artifact_url.to_owned(),
        };

        let is_jar = Path::new(&path)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jar") || ext.eq_ignore_ascii_case("war"));

        if is_jar {
            ArtifactKind::Jar
        } else {
            ArtifactKind::SoftwarePackage
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// Classification of a downloaded artifact, used to select analyzers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArtifactType {
    Docker,
    Terraform,
    Other,
}

/// Artifact to download.
///
/// # Examples
///
/// ```
/// # use artifact_fetch::*;
/// let reference = ArtifactReference::resolve(
///     "",
///     "https://example.com/artifactory/generic/tool.jar",
///     Some(Credentials::Bearer("token".into())),
///     "3.99",
/// )
/// .unwrap();
///
/// assert_eq!(reference.kind, ArtifactKind::Jar);
/// assert_eq!(reference.registry_host().unwrap().as_str(), "https://example.com");
/// ```
#[derive(Clone, Debug)]
pub struct ArtifactReference {
    /// URL of the image manifest, or of the package.
    pub source_url: String,

    /// Credentials for every request.
    pub credentials: Option<Credentials>,

    /// Version sent in the `User-Agent` header.
    pub client_version: String,

    pub kind: ArtifactKind,
}

impl ArtifactReference {
    /// Build a reference from the caller inputs.
    ///
    /// Exactly one of `image_manifest_url` and `artifact_url` must be
    /// non-empty.
    pub fn resolve(
        image_manifest_url: &str,
        artifact_url: &str,
        credentials: Option<Credentials>,
        client_version: &str,
    ) -> Result<Self, ReferenceError> {
        let source_url = match (image_manifest_url.is_empty(), artifact_url.is_empty()) {
            (true, true) => return Err(ReferenceError::MissingUrl),
            (false, false) => return Err(ReferenceError::ConflictingUrls),
            (false, true) => image_manifest_url,
            (true, false) => artifact_url,
        };

        Ok(ArtifactReference {
            source_url: source_url.to_owned(),
            credentials,
            client_version: client_version.to_owned(),
            kind: ArtifactKind::resolve(image_manifest_url, artifact_url),
        })
    }

    /// Scheme and authority of `source_url`.
    pub fn registry_host(&self) -> Result<RegistryHost, ReferenceError> {
        RegistryHost::parse(&self.source_url)
    }

    /// Repository, path, and tag of the image.
    pub fn image_coordinates(&self) -> Result<ImageCoordinates, ReferenceError> {
        parser::image_coordinates(&self.source_url)
    }
}

/// Scheme and authority (`https://host:port`) of the registry.
#[derive(Clone, Debug, PartialEq)]
pub struct RegistryHost(String);

impl RegistryHost {
    pub fn parse(url: &str) -> Result<Self, ReferenceError> {
        parser::registry_host(url)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegistryHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Location of an image in an Artifactory Docker repository.
///
/// Manifest URLs have the form
/// `https://<host>/artifactory/<repository>/<image path>/<tag>/manifest.json`.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageCoordinates {
    pub repository: String,
    pub image_path: String,
    pub tag: String,
}

impl ImageCoordinates {
    /// Prefix of the Docker API for this image, without the host.
    pub(crate) fn api_path(&self) -> String {
        format!("v2/{}/{}", self.repository, self.image_path)
    }
}
