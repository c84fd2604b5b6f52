use std::fmt;

use serde::ser::SerializeStruct;
use sha2::{Digest, Sha256};

#[derive(Clone, Debug)]
pub struct Blob {
    pub media_type: &'static str,
    pub digest: String,
    pub data: Box<[u8]>,
}

impl serde::Serialize for Blob {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("Blob", 3)?;
        s.serialize_field("mediaType", self.media_type)?;
        s.serialize_field("digest", &format!("sha256:{}", self.digest))?;
        s.serialize_field("size", &self.data.len())?;
        s.end()
    }
}

pub const LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

pub const CONFIG: &str = "application/vnd.docker.container.image.v1+json";

pub const MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";

pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

impl Blob {
    pub fn new(media_type: &'static str, data: impl Into<Box<[u8]>>) -> Blob {
        let data = data.into();
        let digest = sha256(&data);

        Blob {
            media_type,
            digest,
            data,
        }
    }

    pub fn layer(data: &str) -> Blob {
        Blob::new(LAYER, data.as_bytes())
    }

    pub fn config(data: &str) -> Blob {
        Blob::new(CONFIG, data.as_bytes())
    }
}

/// Build the JSON of a schema v2 manifest.
pub fn manifest_v2(config: &Blob, layers: &[Blob]) -> Vec<u8> {
    #[derive(serde::Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Image<'a> {
        schema_version: u32,
        media_type: &'static str,
        config: &'a Blob,
        layers: &'a [Blob],
    }

    serde_json::to_vec(&Image {
        schema_version: 2,
        media_type: MANIFEST_V2,
        config,
        layers,
    })
    .unwrap()
}

pub fn sha256(data: &[u8]) -> String {
    HexString(Sha256::digest(data)).to_string()
}

/// Encode a byte buffer as hex string.
struct HexString<T>(T);

impl<T: AsRef<[u8]>> fmt::Display for HexString<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0
            .as_ref()
            .iter()
            .try_for_each(|byte| write!(f, "{:02x}", byte))
    }
}
