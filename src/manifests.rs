use std::{
    env::consts,
    fmt,
    io::{Read, Write},
    str::FromStr,
};

use crate::{
    digest::Digest,
    downloader::{try_io, FetchError},
    fs::Directory,
    http::Client,
    reference::{ImageCoordinates, MediaType, RegistryHost},
};

/// File to store the raw manifest.
pub(crate) const MANIFEST_FILE: &str = "manifest.json";

#[derive(thiserror::Error, Debug)]
pub enum ManifestError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("The manifest must be a JSON array or a JSON object.")]
    UnsupportedShape,

    #[error("No image for the platform {0}.")]
    MissingPlatform(Platform),

    #[error("The manifest index refers to another index.")]
    NestedIndex,

    #[error("Missing configuration in legacy manifest entry.")]
    MissingConfig,
}

/// Reference to a blob in a schema v2 manifest.
#[derive(serde::Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlobRef {
    /// Digest in the `algorithm:hash` form. It is validated before
    /// being used.
    pub digest: String,

    #[serde(default)]
    pub size: u64,

    #[serde(default)]
    pub media_type: Option<String>,
}

/// Docker schema v2 or OCI image manifest.
#[derive(serde::Deserialize, Clone, Debug, PartialEq)]
pub struct SchemaV2Manifest {
    pub config: BlobRef,
    pub layers: Vec<BlobRef>,
}

/// Item in a legacy manifest list, in the format written by `docker save`.
#[derive(serde::Deserialize, Clone, Debug, PartialEq)]
pub struct LegacyEntry {
    /// Layer paths, like `<digest>/layer.tar`.
    #[serde(rename = "Layers", default)]
    pub layers: Vec<String>,

    /// Path of the configuration file, relative to the manifest.
    #[serde(rename = "Config", default)]
    pub config: Option<String>,

    /// Configuration as a blob reference, used when `Config` is missing.
    #[serde(rename = "config", default)]
    pub config_descriptor: Option<BlobRef>,
}

/// Manifest returned by the registry.
#[derive(Clone, Debug, PartialEq)]
pub enum ManifestDocument {
    LegacyManifestList(Vec<LegacyEntry>),
    SchemaV2(SchemaV2Manifest),
}

impl ManifestDocument {
    /// Parse a manifest. The variant is selected by the top-level
    /// JSON value: an array is a legacy list, and an object is a
    /// schema v2 manifest.
    pub fn parse(body: &[u8]) -> Result<Self, ManifestError> {
        match first_token(body) {
            Some(b'[') => Ok(ManifestDocument::LegacyManifestList(serde_json::from_slice(
                body,
            )?)),

            Some(b'{') => Ok(ManifestDocument::SchemaV2(serde_json::from_slice(body)?)),

            _ => Err(ManifestError::UnsupportedShape),
        }
    }
}

fn first_token(body: &[u8]) -> Option<u8> {
    body.iter().copied().find(|b| !b.is_ascii_whitespace())
}

/// Platform to select from a manifest index.
#[derive(Clone, Debug, PartialEq)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
}

impl Default for Platform {
    fn default() -> Self {
        // Translate to golang architecture names.
        let architecture = match consts::ARCH {
            "aarch64" => "arm64",
            "x86" => "386",
            "x86_64" => "amd64",
            other => other,
        };

        Platform {
            architecture: architecture.to_owned(),
            os: "linux".to_owned(),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)
    }
}

/// Download the manifest for the image in `coordinates`, and store
/// it in `target`.
///
/// If the registry returns a manifest list, the manifest for
/// `platform` is downloaded, and its contents are verified against
/// the digest in the list.
pub(crate) fn fetch(
    http_client: &Client,
    host: &RegistryHost,
    coordinates: &ImageCoordinates,
    platform: &Platform,
    target: &Directory,
) -> Result<ManifestDocument, FetchError> {
    let accept = MediaType::accept_header();
    let manifest_path = target.path().join(MANIFEST_FILE);

    let mut tag = coordinates.tag.clone();
    let mut expected: Option<Digest> = None;

    loop {
        tracing::info!(%tag, "starting to download manifest.json");

        let url = format!("{}/{}/manifests/{}", host, coordinates.api_path(), tag);
        let response = http_client.get(&url, Some(&accept))?;

        let content_type = response
            .header("Content-Type")
            .and_then(|h| MediaType::from_str(h).ok());

        // If we have an expected digest, compute it during the download,
        // and verify it when the download is completed.
        let mut body = Vec::new();
        {
            let reader = response.into_reader();
            let mut reader: Box<dyn Read> = match &expected {
                Some(d) => Box::new(d.wrap_reader(reader)),
                None => Box::new(reader),
            };

            try_io!(&manifest_path, reader.read_to_end(&mut body));
        }

        let is_index = content_type.is_some_and(|c| c.is_index()) || has_manifests_list(&body);

        if is_index {
            if expected.is_some() {
                return Err(ManifestError::NestedIndex.into());
            }

            let digest = select_platform(platform, &body)?;
            tracing::info!(%digest, %platform, "selected manifest from index");

            tag = digest.source();
            expected = Some(digest);
            continue;
        }

        let mut file = try_io!(&manifest_path, target.create(MANIFEST_FILE));
        try_io!(&manifest_path, file.write_all(&body));

        return Ok(ManifestDocument::parse(&body)?);
    }
}

/// Check if `body` is a JSON object with a `manifests` list. Some
/// registries don't send the right `Content-Type` for indexes.
fn has_manifests_list(body: &[u8]) -> bool {
    #[derive(serde::Deserialize)]
    struct Probe {
        manifests: Option<Vec<serde::de::IgnoredAny>>,
    }

    first_token(body) == Some(b'{')
        && matches!(
            serde_json::from_slice::<Probe>(body),
            Ok(Probe {
                manifests: Some(_)
            })
        )
}

/// Parse a manifest index to get the digest for the specified platform.
///
/// Refs:
///
/// * https://distribution.github.io/distribution/spec/manifest-v2-2/#manifest-list
/// * https://github.com/opencontainers/image-spec/blob/main/image-index.md
fn select_platform(platform: &Platform, body: &[u8]) -> Result<Digest, FetchError> {
    #[derive(serde::Deserialize, Debug)]
    struct List {
        manifests: Vec<Item>,
    }

    #[derive(serde::Deserialize, Debug)]
    struct Item {
        digest: String,
        platform: Option<ItemPlatform>,
    }

    #[derive(serde::Deserialize, Debug)]
    struct ItemPlatform {
        architecture: String,
        os: String,
    }

    let List { manifests } = serde_json::from_slice(body).map_err(ManifestError::from)?;
    let item = manifests
        .into_iter()
        .find(|i| {
            i.platform.as_ref().is_some_and(|p| {
                p.architecture == platform.architecture && p.os == platform.os
            })
        })
        .ok_or_else(|| ManifestError::MissingPlatform(platform.clone()))?;

    Ok(Digest::try_from(item.digest)?)
}
