//! Content digests for module file sets
//!
//! A digest is printed as `<type>:<hex>`. Module digests hash a manifest
//! of per-file digests (`"<hex>  <path>\n"`, sorted by path), so the result
//! is independent of the order files were read in.

use sha2::{Digest as _, Sha256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{ModuleError, Result};

/// Digest types that are permanently rejected, with their string prefixes
pub const DEPRECATED_DIGEST_PREFIXES: [(&str, &str); 2] = [("b1", "b1-"), ("b3", "b3-")];

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestType {
    Sha256,
}

impl DigestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestType::Sha256 => "sha256",
        }
    }

    /// Length of the raw digest value in bytes
    pub fn byte_len(&self) -> usize {
        match self {
            DigestType::Sha256 => 32,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "sha256" => Some(DigestType::Sha256),
            _ => None,
        }
    }
}

impl fmt::Display for DigestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed content digest
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    digest_type: DigestType,
    value: Vec<u8>,
}

impl Digest {
    /// Compute a digest over raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            digest_type: DigestType::Sha256,
            value: Sha256::digest(data).to_vec(),
        }
    }

    /// Compute the digest of a file set
    ///
    /// `files` yields `(path, content)` pairs in any order.
    pub fn for_files<'a, I>(files: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        let mut entries: Vec<(&str, String)> = files
            .into_iter()
            .map(|(path, content)| (path, format!("{:x}", Sha256::digest(content))))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        let manifest: String = entries
            .iter()
            .map(|(path, hash)| format!("{}  {}\n", hash, path))
            .collect();
        Self::from_bytes(manifest.as_bytes())
    }

    /// Parse `<type>:<hex>`
    ///
    /// Deprecated digest prefixes are rejected before anything else.
    pub fn parse(s: &str) -> Result<Self> {
        check_not_deprecated(s)?;

        let invalid = |reason: &str| ModuleError::InvalidDigest {
            digest: s.to_string(),
            reason: reason.to_string(),
        };
        let (type_str, hex) = s.split_once(':').ok_or_else(|| invalid("expected <type>:<hex>"))?;
        let digest_type = DigestType::parse(type_str)
            .ok_or_else(|| invalid(&format!("unknown digest type {:?}", type_str)))?;
        let value = decode_hex(hex).ok_or_else(|| invalid("value is not valid hex"))?;
        if value.len() != digest_type.byte_len() {
            return Err(invalid(&format!(
                "expected {} bytes for {}, got {}",
                digest_type.byte_len(),
                digest_type,
                value.len()
            )));
        }
        Ok(Self { digest_type, value })
    }

    pub fn digest_type(&self) -> DigestType {
        self.digest_type
    }

    /// Raw digest bytes
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Verify that content matches this digest
    pub fn verify(&self, data: &[u8]) -> bool {
        *self == Self::from_bytes(data)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.digest_type)?;
        for byte in &self.value {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for Digest {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Reject digest strings carrying a deprecated type prefix
pub fn check_not_deprecated(s: &str) -> Result<()> {
    for (digest_type, prefix) in DEPRECATED_DIGEST_PREFIXES {
        if s.starts_with(prefix) {
            return Err(ModuleError::DeprecatedDigest {
                digest_type: digest_type.to_string(),
            });
        }
    }
    Ok(())
}

/// Decode lowercase hex, the only form [`Digest`] prints
fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
