use std::{
    fmt,
    io::{self, Read},
};

use sha2::{Digest as _, Sha256};

/// Length of a hex-encoded SHA256 value.
const SHA256_HEX_LEN: usize = 256 / 8 * 2;

/// A validated content address for a blob.
///
/// Only SHA256 is accepted, and the hash value must be written with
/// lowercase hexadecimal digits.
///
/// # Examples
///
/// ```
/// # use artifact_fetch::Digest;
/// const HEX: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
///
/// let digest = Digest::try_from(format!("sha256:{HEX}")).unwrap();
/// assert_eq!(digest.hash_value(), HEX);
/// assert_eq!(digest.source(), format!("sha256:{HEX}"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(try_from = "String")]
pub struct Digest {
    hex: String,
}

/// Errors from the digest parser.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum DigestError {
    #[error("Invalid digest algorithm in {0:?}.")]
    InvalidAlgorithm(String),

    #[error("Not a sha256 hash: {0:?}.")]
    InvalidValue(String),
}

/// Check that `candidate` is a hex-encoded SHA256 value: exactly
/// 64 characters in `[0-9a-f]`.
pub fn validate(candidate: &str) -> Result<(), DigestError> {
    let valid = candidate.len() == SHA256_HEX_LEN
        && candidate.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));

    if valid {
        Ok(())
    } else {
        Err(DigestError::InvalidValue(candidate.to_owned()))
    }
}

impl Digest {
    /// Build a digest from a bare hash value, without the `sha256:` prefix.
    pub fn from_hex(hex: &str) -> Result<Self, DigestError> {
        validate(hex)?;
        Ok(Digest {
            hex: hex.to_owned(),
        })
    }

    /// Hash value, as a lowercase hex string.
    pub fn hash_value(&self) -> &str {
        &self.hex
    }

    /// Value in the `algorithm:hash` form used by registry URLs.
    pub fn source(&self) -> String {
        format!("sha256:{}", self.hex)
    }

    /// Return a `Read` instance to compute its digest.
    ///
    /// When all data from `reader` is consumed, it verifies that the
    /// computed digest is the expected one. If not, it returns an
    /// [`InvalidData`](::std::io::ErrorKind::InvalidData)
    /// error.
    pub fn wrap_reader<R: Read>(&self, reader: R) -> impl Read {
        DigestReader {
            hasher: Sha256::new(),
            expected: self.hex.clone(),
            reader,
        }
    }
}

impl TryFrom<String> for Digest {
    type Error = DigestError;

    fn try_from(source: String) -> Result<Self, Self::Error> {
        match source.strip_prefix("sha256:") {
            Some(hex) => Digest::from_hex(hex),
            None => Err(DigestError::InvalidAlgorithm(source)),
        }
    }
}

impl TryFrom<&str> for Digest {
    type Error = DigestError;

    fn try_from(source: &str) -> Result<Self, Self::Error> {
        Digest::try_from(source.to_owned())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.hex)
    }
}

struct DigestReader<R> {
    hasher: Sha256,
    expected: String,
    reader: R,
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let buf_len = buf.len();
        let n = self.reader.read(buf)?;

        if n == 0 && buf_len > 0 {
            // On EOF, compare the computed digest with the expected one.
            return self.check_hash();
        }

        self.hasher.update(&buf[..n]);

        Ok(n)
    }
}

impl<R> DigestReader<R> {
    fn check_hash(&mut self) -> io::Result<usize> {
        let computed = HexString(self.hasher.finalize_reset()).to_string();

        if computed != self.expected {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Invalid digest. Expected {}, got {}.",
                    self.expected, computed
                ),
            ));
        }

        Ok(0)
    }
}

/// Encode a byte buffer as hex string.
pub(crate) struct HexString<T>(pub T);

impl<T: AsRef<[u8]>> fmt::Display for HexString<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0
            .as_ref()
            .iter()
            .try_for_each(|byte| write!(f, "{:02x}", byte))
    }
}

#[test]
fn encode_hex_bytes() {
    assert_eq!(HexString(b"\x01\x20\xf0").to_string(), "0120f0");
}

#[test]
fn validate_sha256_values() {
    let valid = "0123456789abcdef".repeat(4);
    assert_eq!(validate(&valid), Ok(()));

    for invalid in [
        String::new(),
        "0123456789ABCDEF".repeat(4),
        "0123456789abcdef".repeat(4) + "0",
        valid[1..].to_owned(),
        format!("sha256:{valid}"),
        "0123456789abcdeg".repeat(4),
        "../".repeat(21) + "a",
    ] {
        assert!(validate(&invalid).is_err(), "{invalid:?} must be rejected");
    }
}

#[test]
fn parse_prefixed_digests() {
    let hex = "ab".repeat(32);

    assert_eq!(
        Digest::try_from(format!("sha256:{hex}")).unwrap().hash_value(),
        hex
    );

    assert!(matches!(
        Digest::try_from(format!("sha512:{hex}")),
        Err(DigestError::InvalidAlgorithm(_))
    ));

    assert!(matches!(
        Digest::try_from("sha256:0000"),
        Err(DigestError::InvalidValue(_))
    ));
}

#[test]
fn reject_invalid_content() {
    use std::io::Cursor;

    /// Digest for `abc`
    const DIGEST: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    let digest = Digest::from_hex(DIGEST).unwrap();
    let mut output = Vec::new();

    // Accept a valid digest.
    digest
        .wrap_reader(Cursor::new("abc"))
        .read_to_end(&mut output)
        .unwrap();

    assert_eq!(output, b"abc");

    // Reject an invalid digest.
    output.clear();
    let err = digest
        .wrap_reader(Cursor::new("abcx"))
        .read_to_end(&mut output)
        .unwrap_err();

    assert_eq!(err.kind(), io::ErrorKind::InvalidData);

    let msg = err.into_inner().unwrap().to_string();
    assert!(msg.contains(DIGEST));
    assert!(msg.contains("7571ce1f8e21c6b13dd7ec2c5ec7c9e4dd9852e209869511853f2f1f74b17927"));
}
