use std::{fmt, str::FromStr};

/// Generate the `MediaType` enum, its `FromStr` and `Display`
/// implementations, and the associated constant `ALL` with all
/// the valid values.
macro_rules! media_types {
    ($($variant:ident = $mediatype:expr,)*) => {
        /// Manifest media types accepted from the registry.
        #[non_exhaustive]
        #[derive(Copy, Clone, PartialEq, Debug)]
        pub enum MediaType {
            $(
                #[doc = concat!("Variant for `", $mediatype, "`.")]
                $variant,
            )*
        }

        impl MediaType {
            /// List with all known media types, in the order sent in
            /// the `Accept` header.
            pub(crate) const ALL: &[&str] = &[ $($mediatype),* ];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(MediaType::$variant => $mediatype,)*
                }
            }
        }

        impl FromStr for MediaType {
            type Err = InvalidMediaType;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                // Ignore parameters, like `; charset=utf-8`.
                let s = s.split(';').next().unwrap_or_default().trim_ascii();
                match s {
                    $($mediatype => Ok(MediaType::$variant),)*
                    _ => Err(InvalidMediaType),
                }
            }
        }

        impl fmt::Display for MediaType {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    }
}

media_types!(
    DockerManifestV1 = "application/vnd.docker.distribution.manifest.v1+json",
    DockerManifestV1Signed = "application/vnd.docker.distribution.manifest.v1+prettyjws",
    DockerManifestV2 = "application/vnd.docker.distribution.manifest.v2+json",
    OciManifestV1 = "application/vnd.oci.image.manifest.v1+json",
    DockerManifestList = "application/vnd.docker.distribution.manifest.list.v2+json",
    OciImageIndex = "application/vnd.oci.image.index.v1+json",
);

impl MediaType {
    /// Value for the `Accept` header in manifest requests.
    pub(crate) fn accept_header() -> String {
        MediaType::ALL.join(",")
    }

    /// Whether this type is a list of manifests for multiple platforms.
    pub fn is_index(&self) -> bool {
        matches!(self, MediaType::DockerManifestList | MediaType::OciImageIndex)
    }
}

#[derive(Debug)]
pub struct InvalidMediaType;

#[test]
fn accept_all_manifests() {
    let accept = MediaType::accept_header();

    assert!(accept.starts_with("application/vnd.docker.distribution.manifest.v1+json,"));
    assert!(accept.contains("application/vnd.docker.distribution.manifest.v1+prettyjws"));
    assert!(accept.ends_with(",application/vnd.oci.image.index.v1+json"));
    assert_eq!(accept.split(',').count(), 6);
}

#[test]
fn parse_content_type() {
    assert!(matches!(
        MediaType::from_str("application/vnd.oci.image.index.v1+json; charset=utf-8"),
        Ok(MediaType::OciImageIndex)
    ));

    assert!(MediaType::from_str("application/json").is_err());
}
