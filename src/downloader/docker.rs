use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use crate::{
    digest::{self, Digest, DigestError},
    fs::{relative_path, Directory},
    manifests::{self, LegacyEntry, ManifestDocument, ManifestError, SchemaV2Manifest, MANIFEST_FILE},
    reference::{ArtifactType, ImageCoordinates, RegistryHost},
};

use super::{transfer, transfer::BlobDescriptor, try_io, FetchContext, FetchError, Fetcher};

/// Files stored for each layer of a legacy image.
const LEGACY_LAYER_FILES: [&str; 3] = ["layer.tar", "VERSION", "json"];

/// Suffix of layer paths in a legacy manifest.
const LEGACY_LAYER_SUFFIX: &str = "/layer.tar";

const JSON_EXTENSION: &str = ".json";

/// Downloads container images from the Docker API of Artifactory.
pub struct DockerFetcher;

impl Fetcher for DockerFetcher {
    fn fetch(&self, ctx: &FetchContext, target: &Path) -> Result<PathBuf, FetchError> {
        let host = ctx.reference.registry_host()?;
        let coordinates = ctx.reference.image_coordinates()?;

        let directory = try_io!(target, Directory::new(target));

        let manifest = manifests::fetch(
            &ctx.client,
            &host,
            &coordinates,
            &ctx.settings.platform,
            &directory,
        )?;

        match manifest {
            ManifestDocument::LegacyManifestList(entries) => {
                fetch_legacy(ctx, &entries, &directory)?;
            }

            ManifestDocument::SchemaV2(manifest) => {
                let plan = DownloadPlan::new(&host, &coordinates, &manifest)?;

                tracing::info!(blobs = plan.blobs.len(), "starting to download layers");
                ctx.event_handler.download_start(plan.blobs.len(), plan.bytes);

                transfer::fetch_all(
                    &ctx.client,
                    &plan.blobs,
                    &directory,
                    ctx.settings.max_concurrency,
                    ctx.event_handler,
                )?;
            }
        }

        tracing::info!(path = %target.display(), "download_image finished");

        Ok(target.to_owned())
    }

    fn classify(&self, _local_path: &Path) -> ArtifactType {
        ArtifactType::Docker
    }
}

/// Blobs to download for a schema v2 manifest.
///
/// All digests are validated when the plan is built, before any
/// request is sent.
#[derive(Debug)]
pub(crate) struct DownloadPlan {
    pub blobs: Vec<BlobDescriptor>,

    /// Sum of the sizes in the manifest, for each distinct blob.
    pub bytes: u64,
}

impl DownloadPlan {
    pub fn new(
        host: &RegistryHost,
        coordinates: &ImageCoordinates,
        manifest: &SchemaV2Manifest,
    ) -> Result<Self, FetchError> {
        let blob_url = |digest: &Digest| {
            format!("{}/{}/blobs/{}", host, coordinates.api_path(), digest.source())
        };

        let mut plan = DownloadPlan {
            blobs: Vec::with_capacity(manifest.layers.len() + 1),
            bytes: 0,
        };

        let mut destinations = HashSet::new();

        let layers = manifest.layers.iter().map(|layer| (layer, ""));
        let config = std::iter::once((&manifest.config, JSON_EXTENSION));

        for (blob, extension) in layers.chain(config) {
            let digest = Digest::try_from(blob.digest.as_str())?;
            let destination = PathBuf::from(format!("{}{extension}", digest.hash_value()));

            // A layer can appear more than once, like the empty layer.
            // Each file is downloaded by a single worker.
            if !destinations.insert(destination.clone()) {
                continue;
            }

            plan.bytes = plan.bytes.saturating_add(blob.size);
            plan.blobs.push(BlobDescriptor {
                url: blob_url(&digest),
                destination,
                digest,
            });
        }

        Ok(plan)
    }
}

/// Download the layers of a legacy manifest, one file at a time.
///
/// Each layer is stored in its own directory, and the configuration of
/// each entry is downloaded after its layers.
///
/// The three files of a layer are siblings of `layer.tar` in the
/// Artifactory storage, so their URLs are `{base}{layer_id}/{file}`,
/// where `base` is the manifest URL without `manifest.json`.
fn fetch_legacy(
    ctx: &FetchContext,
    entries: &[LegacyEntry],
    directory: &Directory,
) -> Result<(), FetchError> {
    let manifest_url = ctx.reference.source_url.as_str();
    let layers_url = manifest_url.strip_suffix(MANIFEST_FILE).unwrap_or(manifest_url);

    for entry in entries {
        for layer in &entry.layers {
            let layer_id = layer.strip_suffix(LEGACY_LAYER_SUFFIX).unwrap_or(layer);
            digest::validate(layer_id)?;

            let layer_dir = PathBuf::from(layer_id);
            try_io!(
                directory.path().join(&layer_dir),
                directory.create_directory(&layer_dir)
            );

            for file in LEGACY_LAYER_FILES {
                let url = format!("{layers_url}{layer_id}/{file}");
                let bytes =
                    transfer::fetch(&ctx.client, &url, directory, &layer_dir.join(file), None)?;
                ctx.event_handler.blob_finished(&url, bytes);
            }
        }

        tracing::info!("downloaded layers, downloading config");

        let (url, file_name) = legacy_config(layers_url, entry)?;
        let destination = relative_path(&file_name)?;

        // `Config` may be nested, like `blobs/sha256/<hash>`.
        let mut parent = PathBuf::new();
        for component in destination.parent().into_iter().flat_map(Path::components) {
            parent.push(component);
            try_io!(
                directory.path().join(&parent),
                directory.create_directory(&parent)
            );
        }

        let bytes = transfer::fetch(&ctx.client, &url, directory, &destination, None)?;
        ctx.event_handler.blob_finished(&url, bytes);

        tracing::info!("downloaded config");
    }

    Ok(())
}

/// Compute the URL and the local file name for the configuration of a
/// legacy manifest entry.
///
/// If the entry has no `Config` path, the digest of its `config`
/// descriptor is stored as `<algorithm>__<hash>` next to the manifest.
fn legacy_config(layers_url: &str, entry: &LegacyEntry) -> Result<(String, String), FetchError> {
    let (url, name) = match (&entry.config, &entry.config_descriptor) {
        (Some(config), _) => (format!("{layers_url}{config}"), config.clone()),

        (None, Some(descriptor)) => {
            let (algorithm, hash) = descriptor
                .digest
                .split_once(':')
                .ok_or_else(|| DigestError::InvalidAlgorithm(descriptor.digest.clone()))?;

            digest::validate(hash)?;

            (
                format!("{layers_url}{algorithm}__{hash}"),
                hash.to_owned(),
            )
        }

        (None, None) => return Err(ManifestError::MissingConfig.into()),
    };

    let file_name = if name.ends_with(JSON_EXTENSION) {
        name
    } else {
        name + JSON_EXTENSION
    };

    Ok((url, file_name))
}
