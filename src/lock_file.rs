//! Lock file codec
//!
//! A lock file records the resolved dependency pins of a module set. Two
//! on-disk shapes exist: legacy (`v1beta1`, `v1`) pins carry
//! remote/owner/repository/commit, current (`v2`) pins carry a single
//! module name. Either shape can be encoded as YAML or JSON. Both decode
//! into the same [`ModuleKey`] list.

use std::fmt;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::LockConfig;
use crate::digest::{check_not_deprecated, Digest};
use crate::error::{ModuleError, Result};
use crate::module::ModuleKey;
use crate::module_set::ModuleSet;
use crate::name::ModuleFullName;

/// Header prepended to every written lock file
pub const LOCK_FILE_HEADER: &str = "# Generated by schema-modules. DO NOT EDIT.\n";

/// Default lock file name within a module directory
pub const DEFAULT_LOCK_FILE_NAME: &str = "modules.lock";

// =============================================================================
// Versions and formats
// =============================================================================

/// Schema version of a lock file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileVersion {
    V1Beta1,
    V1,
    #[default]
    V2,
}

const FILE_VERSIONS: [(FileVersion, &str); 3] = [
    (FileVersion::V1Beta1, "v1beta1"),
    (FileVersion::V1, "v1"),
    (FileVersion::V2, "v2"),
];

impl FileVersion {
    pub fn as_str(&self) -> &'static str {
        FILE_VERSIONS
            .iter()
            .find(|(v, _)| v == self)
            .map(|(_, s)| *s)
            .unwrap_or("unknown")
    }

    /// Parse a version string; the empty string means `v1beta1`
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(FileVersion::V1Beta1);
        }
        FILE_VERSIONS
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(v, _)| *v)
            .ok_or_else(|| ModuleError::UnknownFileVersion(s.to_string()))
    }

    /// Legacy versions track a commit per pin
    pub fn requires_commits(&self) -> bool {
        matches!(self, FileVersion::V1Beta1 | FileVersion::V1)
    }
}

impl fmt::Display for FileVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileVersion {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Text encoding of a lock file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockFormat {
    #[default]
    Yaml,
    Json,
}

// =============================================================================
// External shapes
// =============================================================================

#[derive(Deserialize)]
struct VersionHeader {
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExternalLockFileV1Beta1V1 {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    deps: Vec<ExternalDepV1Beta1V1>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExternalDepV1Beta1V1 {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    remote: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    owner: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    repository: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    branch: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    commit: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    create_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExternalLockFileV2 {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    deps: Vec<ExternalDepV2>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExternalDepV2 {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    digest: String,
}

// =============================================================================
// Lock File
// =============================================================================

/// A validated set of dependency pins at a file version
///
/// Pins are unique by full name and sorted by it. Digests stay lazy until
/// requested; call [`LockFile::validate_digests`] to force them.
#[derive(Debug, Clone)]
pub struct LockFile {
    file_version: FileVersion,
    dep_module_keys: Vec<ModuleKey>,
}

impl LockFile {
    /// Validate and sort `dep_module_keys`
    pub fn new(file_version: FileVersion, mut dep_module_keys: Vec<ModuleKey>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for key in &dep_module_keys {
            let name = key.full_name().to_string();
            if !seen.insert(name.clone()) {
                return Err(ModuleError::DuplicateModule(name));
            }
        }
        if file_version.requires_commits() {
            if let Some(key) = dep_module_keys.iter().find(|k| k.commit_id().is_empty()) {
                return Err(ModuleError::MissingField {
                    field: "commit",
                    module: Some(key.full_name().to_string()),
                });
            }
        }
        dep_module_keys.sort_by_cached_key(|k| k.full_name().to_string());
        Ok(Self {
            file_version,
            dep_module_keys,
        })
    }

    /// Lock the external dependencies of `module_set`
    pub fn from_module_set(file_version: FileVersion, module_set: &ModuleSet) -> Result<Self> {
        Self::new(file_version, module_set.deps().to_vec())
    }

    /// A new lock file at the same version with different pins
    pub fn with_dep_module_keys(&self, dep_module_keys: Vec<ModuleKey>) -> Result<Self> {
        Self::new(self.file_version, dep_module_keys)
    }

    pub fn file_version(&self) -> FileVersion {
        self.file_version
    }

    /// Pins, sorted by full name
    pub fn dep_module_keys(&self) -> &[ModuleKey] {
        &self.dep_module_keys
    }

    /// Force every lazy digest, failing on the first invalid one
    pub fn validate_digests(&self) -> Result<()> {
        for key in &self.dep_module_keys {
            key.digest()?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Read
    // -------------------------------------------------------------------------

    /// Decode a lock file, auto-detecting YAML or JSON
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data).map_err(|e| ModuleError::InvalidLockFile {
            version: "unknown".to_string(),
            message: format!("not valid UTF-8: {}", e),
        })?;
        let body = strip_comment_lines(text);
        if body.trim().is_empty() {
            return Self::new(FileVersion::V1Beta1, Vec::new());
        }
        let (format, header) = read_version(body).map_err(|message| ModuleError::InvalidLockFile {
            version: "unknown".to_string(),
            message,
        })?;
        let file_version = FileVersion::parse(header.version.as_deref().unwrap_or(""))?;
        let invalid = |message: String| ModuleError::InvalidLockFile {
            version: file_version.to_string(),
            message,
        };

        let dep_module_keys = match file_version {
            FileVersion::V1Beta1 | FileVersion::V1 => {
                let external: ExternalLockFileV1Beta1V1 = decode(format, body).map_err(invalid)?;
                external
                    .deps
                    .into_iter()
                    .map(dep_from_v1beta1_v1)
                    .collect::<Result<Vec<_>>>()?
            }
            FileVersion::V2 => {
                let external: ExternalLockFileV2 = decode(format, body).map_err(invalid)?;
                external
                    .deps
                    .into_iter()
                    .map(dep_from_v2)
                    .collect::<Result<Vec<_>>>()?
            }
        };

        debug!(
            version = %file_version,
            deps = dep_module_keys.len(),
            ?format,
            "Read lock file"
        );
        Self::new(file_version, dep_module_keys)
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_slice(&data)
    }

    pub fn read_from_path(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        Self::from_slice(&data)
    }

    /// Read the configured lock file in `dir`, if one exists
    pub fn read_from_dir(dir: &Path, config: &LockConfig) -> Result<Option<Self>> {
        let path = dir.join(&config.file_name);
        match fs::read(&path) {
            Ok(data) => Self::from_slice(&data).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // -------------------------------------------------------------------------
    // Write
    // -------------------------------------------------------------------------

    /// Encode with the header prepended
    pub fn to_bytes(&self, format: LockFormat) -> Result<Vec<u8>> {
        // Construction already enforced this; failing here is a bug
        if self.file_version.requires_commits() {
            if let Some(key) = self.dep_module_keys.iter().find(|k| k.commit_id().is_empty()) {
                return Err(ModuleError::internal(format!(
                    "{} lock files require commits, \
                     however we did not have a commit for module {:?}",
                    self.file_version,
                    key.full_name().to_string()
                )));
            }
        }

        let body = match self.file_version {
            FileVersion::V1Beta1 | FileVersion::V1 => {
                let mut deps = Vec::with_capacity(self.dep_module_keys.len());
                for key in &self.dep_module_keys {
                    let name = key.full_name();
                    deps.push(ExternalDepV1Beta1V1 {
                        remote: name.registry().to_string(),
                        owner: name.owner().to_string(),
                        repository: name.name().to_string(),
                        commit: key.commit_id().to_string(),
                        digest: key.digest()?.to_string(),
                        ..Default::default()
                    });
                }
                encode(
                    format,
                    &ExternalLockFileV1Beta1V1 {
                        version: self.file_version.to_string(),
                        deps,
                    },
                )?
            }
            FileVersion::V2 => {
                let mut deps = Vec::with_capacity(self.dep_module_keys.len());
                for key in &self.dep_module_keys {
                    deps.push(ExternalDepV2 {
                        name: key.full_name().to_string(),
                        digest: key.digest()?.to_string(),
                    });
                }
                encode(
                    format,
                    &ExternalLockFileV2 {
                        version: self.file_version.to_string(),
                        deps,
                    },
                )?
            }
        };

        let mut out = Vec::with_capacity(LOCK_FILE_HEADER.len() + body.len());
        out.extend_from_slice(LOCK_FILE_HEADER.as_bytes());
        out.extend_from_slice(body.as_bytes());
        Ok(out)
    }

    pub fn write<W: Write>(&self, mut writer: W, format: LockFormat) -> Result<()> {
        writer.write_all(&self.to_bytes(format)?)?;
        Ok(())
    }

    /// Write to `path` atomically: readers see the old file or the new one
    pub fn write_to_path(&self, path: &Path, format: LockFormat) -> Result<()> {
        let data = self.to_bytes(format)?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| ModuleError::from(e.error))?;

        info!(
            path = %path.display(),
            version = %self.file_version,
            deps = self.dep_module_keys.len(),
            "Wrote lock file"
        );
        Ok(())
    }

    /// Write the configured lock file into `dir`, returning its path
    pub fn write_to_dir(&self, dir: &Path, config: &LockConfig) -> Result<PathBuf> {
        let path = dir.join(&config.file_name);
        self.write_to_path(&path, config.format)?;
        Ok(path)
    }
}

fn dep_from_v1beta1_v1(dep: ExternalDepV1Beta1V1) -> Result<ModuleKey> {
    for (field, value) in [
        ("remote", &dep.remote),
        ("owner", &dep.owner),
        ("repository", &dep.repository),
    ] {
        if is_blank(value) {
            return Err(ModuleError::MissingField { field, module: None });
        }
    }
    let full_name = ModuleFullName::new(&dep.remote, &dep.owner, &dep.repository)?;
    if is_blank(&dep.commit) {
        return Err(ModuleError::MissingField {
            field: "commit",
            module: Some(full_name.to_string()),
        });
    }
    lazy_key(full_name, dep.commit, dep.digest)
}

fn dep_from_v2(dep: ExternalDepV2) -> Result<ModuleKey> {
    if is_blank(&dep.name) {
        return Err(ModuleError::MissingField {
            field: "module name",
            module: None,
        });
    }
    let full_name = ModuleFullName::parse(&dep.name)?;
    lazy_key(full_name, String::new(), dep.digest)
}

/// Required fields must hold more than whitespace
fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Pin whose digest string is parsed on first access
///
/// Missing and deprecated digests are rejected up front.
fn lazy_key(full_name: ModuleFullName, commit_id: String, digest: String) -> Result<ModuleKey> {
    if is_blank(&digest) {
        return Err(ModuleError::MissingField {
            field: "digest",
            module: Some(full_name.to_string()),
        });
    }
    check_not_deprecated(&digest)?;
    Ok(ModuleKey::new(full_name, commit_id, move || Digest::parse(&digest)))
}

/// Drop leading `#` comment lines (the generated header)
fn strip_comment_lines(text: &str) -> &str {
    let mut rest = text;
    while rest.starts_with('#') {
        rest = match rest.find('\n') {
            Some(end) => &rest[end + 1..],
            None => "",
        };
    }
    rest
}

fn detect_format(body: &str) -> LockFormat {
    if body.trim_start().starts_with('{') {
        LockFormat::Json
    } else {
        LockFormat::Yaml
    }
}

/// Read the version and settle the format used for the full decode
///
/// A leading `{` may also open a YAML flow mapping, so YAML is tried when
/// JSON fails. The JSON error is reported if both fail.
fn read_version(body: &str) -> std::result::Result<(LockFormat, VersionHeader), String> {
    let format = detect_format(body);
    match decode(format, body) {
        Ok(header) => Ok((format, header)),
        Err(json_error) if format == LockFormat::Json => decode(LockFormat::Yaml, body)
            .map(|header| (LockFormat::Yaml, header))
            .map_err(|_| json_error),
        Err(error) => Err(error),
    }
}

fn decode<T>(format: LockFormat, body: &str) -> std::result::Result<T, String>
where
    T: serde::de::DeserializeOwned,
{
    match format {
        LockFormat::Yaml => serde_yaml::from_str(body).map_err(|e| e.to_string()),
        LockFormat::Json => serde_json::from_str(body).map_err(|e| e.to_string()),
    }
}

fn encode<T: Serialize>(format: LockFormat, value: &T) -> Result<String> {
    let encoded = match format {
        LockFormat::Yaml => serde_yaml::to_string(value).map_err(|e| e.to_string()),
        LockFormat::Json => serde_json::to_string_pretty(value)
            .map(|s| s + "\n")
            .map_err(|e| e.to_string()),
    };
    encoded.map_err(|e| ModuleError::internal(format!("failed to encode lock file: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str, commit: &str) -> ModuleKey {
        ModuleKey::with_digest(
            ModuleFullName::parse(name).unwrap(),
            commit,
            Digest::from_bytes(name.as_bytes()),
        )
    }

    fn summary(lock: &LockFile) -> Vec<(String, String, String)> {
        lock.dep_module_keys()
            .iter()
            .map(|k| {
                (
                    k.full_name().to_string(),
                    k.commit_id().to_string(),
                    k.digest().unwrap().to_string(),
                )
            })
            .collect()
    }

    #[test]
    fn test_file_version_parse() {
        assert_eq!(FileVersion::parse("").unwrap(), FileVersion::V1Beta1);
        assert_eq!(FileVersion::parse("v1").unwrap(), FileVersion::V1);
        assert_eq!("v2".parse::<FileVersion>().unwrap(), FileVersion::V2);
        assert!(matches!(FileVersion::parse("v3"), Err(ModuleError::UnknownFileVersion(_))));
        assert_eq!(FileVersion::V1Beta1.to_string(), "v1beta1");
    }

    #[test]
    fn test_duplicate_full_names_rejected() {
        let err = LockFile::new(
            FileVersion::V2,
            vec![key("buf.build/acme/a", "1"), key("buf.build/acme/a", "2")],
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "duplicate module \"buf.build/acme/a\" attempted to be added to lock file"
        );
    }

    #[test]
    fn test_commit_requirements_by_version() {
        assert!(LockFile::new(FileVersion::V2, vec![key("buf.build/acme/a", "")]).is_ok());
        for version in [FileVersion::V1Beta1, FileVersion::V1] {
            let err = LockFile::new(version, vec![key("buf.build/acme/a", "")]).unwrap_err();
            assert!(matches!(err, ModuleError::MissingField { field: "commit", .. }));
            assert!(!err.is_internal());
        }
    }

    #[test]
    fn test_entries_sorted_by_full_name() {
        let lock = LockFile::new(
            FileVersion::V1,
            vec![key("buf.build/z/z", "1"), key("buf.build/a/a", "2"), key("a.dev/m/m", "3")],
        )
        .unwrap();
        let names: Vec<String> = summary(&lock).into_iter().map(|(n, _, _)| n).collect();
        assert_eq!(names, vec!["a.dev/m/m", "buf.build/a/a", "buf.build/z/z"]);
    }

    #[test]
    fn test_round_trip_every_version_and_format() {
        for version in [FileVersion::V1Beta1, FileVersion::V1, FileVersion::V2] {
            for format in [LockFormat::Yaml, LockFormat::Json] {
                for n in [0usize, 1, 3] {
                    let keys: Vec<ModuleKey> = (0..n)
                        .map(|i| key(&format!("buf.build/acme/m{}", n - i), &format!("c{}", i)))
                        .collect();
                    let lock = LockFile::new(version, keys).unwrap();
                    let bytes = lock.to_bytes(format).unwrap();
                    assert!(bytes.starts_with(LOCK_FILE_HEADER.as_bytes()));

                    let decoded = LockFile::from_slice(&bytes).unwrap();
                    assert_eq!(decoded.file_version(), version);
                    let mut expected = summary(&lock);
                    if !version.requires_commits() {
                        for entry in &mut expected {
                            entry.1.clear();
                        }
                    }
                    assert_eq!(summary(&decoded), expected, "{} {:?} n={}", version, format, n);
                }
            }
        }
    }

    #[test]
    fn test_legacy_and_current_shapes_agree() {
        let keys = vec![key("buf.build/acme/a", "c1"), key("buf.build/acme/b", "c2")];
        let legacy = LockFile::new(FileVersion::V1, keys.clone()).unwrap();
        let current = LockFile::new(FileVersion::V2, keys).unwrap();
        let legacy = LockFile::from_slice(&legacy.to_bytes(LockFormat::Yaml).unwrap()).unwrap();
        let current = LockFile::from_slice(&current.to_bytes(LockFormat::Json).unwrap()).unwrap();

        let names = |l: &LockFile| -> Vec<(String, String)> {
            l.dep_module_keys()
                .iter()
                .map(|k| (k.full_name().to_string(), k.digest().unwrap().to_string()))
                .collect()
        };
        assert_eq!(names(&legacy), names(&current));
    }

    #[test]
    fn test_read_legacy_yaml() {
        let digest = Digest::from_bytes(b"a");
        let data = format!(
            "# header\nversion: v1\ndeps:\n  - remote: buf.build\n    owner: acme\
             \n    repository: a\n    branch: main\n    commit: abc\n    digest: {}\
             \n    create_time: 2023-01-02T03:04:05Z\n",
            digest
        );
        let lock = LockFile::from_slice(data.as_bytes()).unwrap();
        assert_eq!(lock.file_version(), FileVersion::V1);
        assert_eq!(lock.dep_module_keys()[0].full_name().to_string(), "buf.build/acme/a");
        assert_eq!(lock.dep_module_keys()[0].digest().unwrap(), digest);
    }

    #[test]
    fn test_missing_version_defaults_to_v1beta1() {
        let digest = Digest::from_bytes(b"a");
        let data = format!(
            "deps:\n  - remote: buf.build\n    owner: acme\n    repository: a\
             \n    commit: abc\n    digest: {}\n",
            digest
        );
        let lock = LockFile::from_slice(data.as_bytes()).unwrap();
        assert_eq!(lock.file_version(), FileVersion::V1Beta1);
    }

    #[test]
    fn test_read_rejects_deprecated_digests() {
        let data = "version: v2\ndeps:\n  - name: buf.build/acme/a\n    digest: b3-AAAA\n";
        let err = LockFile::from_slice(data.as_bytes()).unwrap_err();
        assert!(
            matches!(&err, ModuleError::DeprecatedDigest { digest_type } if digest_type == "b3")
        );
        assert!(err.to_string().contains(crate::error::UPDATE_COMMAND));

        let data = "version: v1\ndeps:\n  - remote: buf.build\n    owner: acme\n    repository: a\
                    \n    commit: c\n    digest: b1-AAAA\n";
        let err = LockFile::from_slice(data.as_bytes()).unwrap_err();
        assert!(
            matches!(&err, ModuleError::DeprecatedDigest { digest_type } if digest_type == "b1")
        );
    }

    #[test]
    fn test_read_rejects_missing_fields() {
        let cases = [
            (
                "version: v1\ndeps:\n  - owner: acme\n    repository: a\
                 \n    commit: c\n    digest: x\n",
                "remote missing",
            ),
            (
                "version: v1\ndeps:\n  - remote: r\n    owner: acme\n    repository: a\
                 \n    digest: x\n",
                "no commit specified for module r/acme/a",
            ),
            ("version: v2\ndeps:\n  - name: r/acme/a\n", "no digest specified for module r/acme/a"),
            ("version: v2\ndeps:\n  - digest: x\n", "module name missing"),
            (
                "version: v1\ndeps:\n  - remote: r\n    owner: \"  \"\n    repository: a\
                 \n    commit: c\n    digest: x\n",
                "owner missing",
            ),
            (
                "version: v1\ndeps:\n  - remote: r\n    owner: acme\n    repository: a\
                 \n    commit: \"   \"\n    digest: x\n",
                "no commit specified for module r/acme/a",
            ),
            (
                "version: v2\ndeps:\n  - name: r/acme/a\n    digest: \" \"\n",
                "no digest specified for module r/acme/a",
            ),
            ("version: v2\ndeps:\n  - name: \"\t\"\n    digest: x\n", "module name missing"),
        ];
        for (data, message) in cases {
            let err = LockFile::from_slice(data.as_bytes()).unwrap_err();
            assert_eq!(err.to_string(), message);
        }
    }

    #[test]
    fn test_read_yaml_flow_mapping() {
        let digest = Digest::from_bytes(b"a");
        let data = format!(
            "{{version: v2, deps: [{{name: buf.build/acme/a, digest: \"{}\"}}]}}\n",
            digest
        );
        let lock = LockFile::from_slice(data.as_bytes()).unwrap();
        assert_eq!(lock.file_version(), FileVersion::V2);
        assert_eq!(lock.dep_module_keys()[0].digest().unwrap(), digest);

        let err = LockFile::from_slice(b"{version: v2, deps: [").unwrap_err();
        assert!(matches!(err, ModuleError::InvalidLockFile { .. }));
    }

    #[test]
    fn test_read_rejects_unknown_version_and_fields() {
        let err = LockFile::from_slice(b"version: v9\n").unwrap_err();
        assert!(matches!(err, ModuleError::UnknownFileVersion(v) if v == "v9"));

        let data = "version: v2\ndeps:\n  - name: r/o/n\n    digest: x\n    commit: c\n";
        let err = LockFile::from_slice(data.as_bytes()).unwrap_err();
        assert!(matches!(&err, ModuleError::InvalidLockFile { version, .. } if version == "v2"));

        let err = LockFile::from_slice(b"{\"version\": \"v2\", \"extra\": true}").unwrap_err();
        assert!(matches!(err, ModuleError::InvalidLockFile { .. }));
    }

    #[test]
    fn test_invalid_digest_surfaces_on_validate() {
        let data = "version: v2\ndeps:\n  - name: r/o/n\n    digest: sha256:nothex\n";
        let lock = LockFile::from_slice(data.as_bytes()).unwrap();
        assert!(matches!(lock.validate_digests(), Err(ModuleError::InvalidDigest { .. })));
    }

    #[test]
    fn test_with_dep_module_keys_revalidates() {
        let lock = LockFile::new(FileVersion::V1, vec![key("buf.build/acme/a", "c")]).unwrap();
        let edited = lock
            .with_dep_module_keys(vec![key("buf.build/acme/b", "d")])
            .unwrap();
        assert_eq!(lock.dep_module_keys().len(), 1);
        assert_eq!(edited.dep_module_keys()[0].full_name().to_string(), "buf.build/acme/b");
        assert!(lock.with_dep_module_keys(vec![key("buf.build/acme/b", "")]).is_err());
    }

    #[test]
    fn test_empty_document_is_empty_v1beta1() {
        let lock = LockFile::from_slice(LOCK_FILE_HEADER.as_bytes()).unwrap();
        assert_eq!(lock.file_version(), FileVersion::V1Beta1);
        assert!(lock.dep_module_keys().is_empty());
    }
}
