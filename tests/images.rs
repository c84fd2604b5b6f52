use std::{collections::BTreeSet, fs, path::Path};

use artifact_fetch::{
    ArtifactKind, ArtifactReference, ArtifactType, Credentials, Downloader, Platform,
};

mod common;

use common::{
    blobs::{self, Blob},
    registry::{self, storage_prefix, Registry, RunningRegistry},
};

fn reference(registry: &RunningRegistry) -> ArtifactReference {
    ArtifactReference::resolve(
        &registry.manifest_url(),
        "",
        Some(Credentials::Bearer(registry::TOKEN.into())),
        registry::CLIENT_VERSION,
    )
    .unwrap()
}

fn list_dir(path: &Path) -> BTreeSet<String> {
    fs::read_dir(path)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect()
}

#[test]
fn schema_v2_manifest() {
    let target = tempfile::tempdir().unwrap();

    let layers = vec![Blob::layer("first layer"), Blob::layer("second layer")];
    let config = Blob::config(r#"{"test": true}"#);
    let manifest = blobs::manifest_v2(&config, &layers);

    let registry = Registry::new()
        .manifest(registry::TAG, blobs::MANIFEST_V2, manifest.clone())
        .blobs(&layers)
        .blobs([&config])
        .start();

    let downloaded = Downloader::new(reference(&registry))
        .download(target.path())
        .expect("download image");

    assert_eq!(downloaded.path, target.path());
    assert_eq!(downloaded.kind, ArtifactKind::Container);
    assert_eq!(downloaded.artifact_type, ArtifactType::Docker);

    let expected: BTreeSet<_> = [
        layers[0].digest.clone(),
        layers[1].digest.clone(),
        format!("{}.json", config.digest),
        "manifest.json".to_owned(),
    ]
    .into_iter()
    .collect();

    assert_eq!(list_dir(target.path()), expected);

    macro_rules! read {
        ($path:expr) => {
            fs::read(target.path().join($path)).expect("read file")
        };
    }

    assert_eq!(read!(&layers[0].digest), b"first layer");
    assert_eq!(read!(&layers[1].digest), b"second layer");
    assert_eq!(read!(format!("{}.json", config.digest)), br#"{"test": true}"#);
    assert_eq!(read!("manifest.json"), manifest);

    // Every request has the same headers.
    let requests = registry.requests();
    assert_eq!(requests.len(), 4);

    for request in &requests {
        assert_eq!(request.authorization.as_deref(), Some("Bearer eyToken"));
        assert_eq!(request.user_agent.as_deref(), Some("Xray/3.99"));
    }

    let accept = requests[0].accept.as_deref().unwrap();
    assert_eq!(requests[0].url, registry::manifest_path(registry::TAG));
    assert!(accept.contains("application/vnd.docker.distribution.manifest.v2+json"));
    assert!(accept.contains("application/vnd.oci.image.index.v1+json"));
}

#[test]
fn legacy_manifest_list() {
    let target = tempfile::tempdir().unwrap();

    let layer_ids = ["0a".repeat(32), "0b".repeat(32)];
    let config_name = format!("{}.json", "0c".repeat(32));

    let manifest = serde_json::json!([{
        "Config": config_name,
        "RepoTags": ["team/app:1.0"],
        "Layers": layer_ids.iter().map(|id| format!("{id}/layer.tar")).collect::<Vec<_>>(),
    }]);

    let prefix = storage_prefix();
    let mut registry = Registry::new()
        .manifest(
            registry::TAG,
            "application/json",
            serde_json::to_vec(&manifest).unwrap(),
        )
        .route(format!("{prefix}{config_name}"), None, "config");

    for id in &layer_ids {
        for file in ["layer.tar", "VERSION", "json"] {
            registry = registry.route(format!("{prefix}{id}/{file}"), None, format!("{id}:{file}"));
        }
    }

    let registry = registry.start();

    Downloader::new(reference(&registry))
        .download(target.path())
        .expect("download legacy image");

    let mut expected: BTreeSet<_> = layer_ids.iter().cloned().collect();
    expected.insert(config_name.clone());
    expected.insert("manifest.json".into());
    assert_eq!(list_dir(target.path()), expected);

    for id in &layer_ids {
        let layer_dir = target.path().join(id);
        assert_eq!(
            list_dir(&layer_dir),
            ["VERSION", "json", "layer.tar"].map(String::from).into()
        );

        for file in ["layer.tar", "VERSION", "json"] {
            let data = fs::read_to_string(layer_dir.join(file)).unwrap();
            assert_eq!(data, format!("{id}:{file}"));
        }
    }

    assert_eq!(
        fs::read_to_string(target.path().join(&config_name)).unwrap(),
        "config"
    );

    // Layers are downloaded in order, and the config is the last file.
    let urls: Vec<_> = registry.requests().into_iter().map(|r| r.url).collect();
    assert_eq!(urls.len(), 8);
    assert!(urls[1].ends_with(&format!("{}/layer.tar", layer_ids[0])));
    assert!(urls[2].ends_with(&format!("{}/VERSION", layer_ids[0])));
    assert!(urls[3].ends_with(&format!("{}/json", layer_ids[0])));
    assert!(urls[7].ends_with(&config_name));
}

#[test]
fn legacy_config_from_descriptor() {
    let target = tempfile::tempdir().unwrap();

    let layer_id = "1a".repeat(32);
    let config_hash = "1c".repeat(32);

    let manifest = serde_json::json!([{
        "Layers": [format!("{layer_id}/layer.tar")],
        "config": { "digest": format!("sha256:{config_hash}") },
    }]);

    let prefix = storage_prefix();
    let mut registry = Registry::new()
        .manifest(
            registry::TAG,
            "application/json",
            serde_json::to_vec(&manifest).unwrap(),
        )
        .route(format!("{prefix}sha256__{config_hash}"), None, "{}");

    for file in ["layer.tar", "VERSION", "json"] {
        registry = registry.route(format!("{prefix}{layer_id}/{file}"), None, file);
    }

    let registry = registry.start();

    Downloader::new(reference(&registry))
        .download(target.path())
        .expect("download legacy image");

    assert_eq!(
        fs::read_to_string(target.path().join(format!("{config_hash}.json"))).unwrap(),
        "{}"
    );
}

#[test]
fn select_image_from_index() {
    let target = tempfile::tempdir().unwrap();

    let layers = vec![Blob::layer("amd64 layer")];
    let config = Blob::config("{}");
    let manifest = Blob::new(blobs::MANIFEST_V2, blobs::manifest_v2(&config, &layers));

    let index = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": blobs::OCI_INDEX,
        "manifests": [
            {
                "digest": format!("sha256:{}", "ff".repeat(32)),
                "platform": { "architecture": "arm64", "os": "linux" },
            },
            {
                "digest": format!("sha256:{}", manifest.digest),
                "platform": { "architecture": "amd64", "os": "linux" },
            },
        ],
    });

    let registry = Registry::new()
        .manifest(
            registry::TAG,
            blobs::OCI_INDEX,
            serde_json::to_vec(&index).unwrap(),
        )
        .manifest(
            &format!("sha256:{}", manifest.digest),
            blobs::MANIFEST_V2,
            manifest.data.to_vec(),
        )
        .blobs(&layers)
        .blobs([&config])
        .start();

    Downloader::new(reference(&registry))
        .platform(Platform {
            architecture: "amd64".into(),
            os: "linux".into(),
        })
        .download(target.path())
        .expect("download image from index");

    assert_eq!(
        fs::read(target.path().join("manifest.json")).unwrap(),
        &*manifest.data
    );

    assert_eq!(
        fs::read(target.path().join(&layers[0].digest)).unwrap(),
        b"amd64 layer"
    );
}

#[test]
fn limit_parallel_downloads() {
    let target = tempfile::tempdir().unwrap();

    let layers: Vec<_> = (0..12)
        .map(|n| Blob::layer(&format!("layer {n}")))
        .collect();
    let config = Blob::config("{}");

    let registry = Registry::new()
        .manifest(
            registry::TAG,
            blobs::MANIFEST_V2,
            blobs::manifest_v2(&config, &layers),
        )
        .blobs(&layers)
        .blobs([&config])
        .start();

    Downloader::new(reference(&registry))
        .max_concurrency(2)
        .download(target.path())
        .expect("download image");

    // 12 layers, config, and manifest.
    assert_eq!(list_dir(target.path()).len(), 14);
}

#[test]
fn repeated_layers() {
    let target = tempfile::tempdir().unwrap();

    let empty = Blob::layer("empty layer");
    let layers = vec![empty.clone(), Blob::layer("app layer"), empty.clone()];
    let config = Blob::config("{}");

    let registry = Registry::new()
        .manifest(
            registry::TAG,
            blobs::MANIFEST_V2,
            blobs::manifest_v2(&config, &layers),
        )
        .blobs(&layers)
        .blobs([&config])
        .start();

    Downloader::new(reference(&registry))
        .download(target.path())
        .expect("download image with repeated layers");

    // 2 distinct layers, config, and manifest.
    assert_eq!(list_dir(target.path()).len(), 4);
    assert_eq!(
        fs::read(target.path().join(&empty.digest)).unwrap(),
        b"empty layer"
    );

    let empty_requests = registry
        .requests()
        .iter()
        .filter(|r| r.url == registry::blob_path(&empty.digest))
        .count();

    assert_eq!(empty_requests, 1);
}
