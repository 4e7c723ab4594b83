//! Modules and dependency pins
//!
//! A module is its schema files plus license and documentation. It also
//! carries the dependency pins it was resolved with. Configuration (lint,
//! breaking, excludes) is not part of a module and does not feed its digest.
//!
//! File contents are read from the backing [`ReadBucket`] only on request
//! and memoized per path.

use std::fmt;
use std::sync::Arc;

use crate::bucket::ReadBucket;
use crate::cache::{MemoCache, OnceValue};
use crate::digest::Digest;
use crate::error::{ModuleError, Result};
use crate::name::ModuleFullName;

/// Extension of schema source files
pub const PROTO_EXTENSION: &str = ".proto";

/// Path of the license file within a module
pub const LICENSE_PATH: &str = "LICENSE";

/// Documentation file names, in order of preference
pub const DOC_PATHS: [&str; 3] = ["buf.md", "README.md", "README.markdown"];

type DigestFn = dyn Fn() -> Result<Digest> + Send + Sync;

struct LazyDigest {
    value: OnceValue<Result<Digest>>,
    compute: Box<DigestFn>,
}

// =============================================================================
// Module Key
// =============================================================================

/// A dependency pin: full name, optional commit, and lazily computed digest
///
/// The digest function runs at most once per key (clones share it).
#[derive(Clone)]
pub struct ModuleKey {
    full_name: ModuleFullName,
    commit_id: String,
    digest: Arc<LazyDigest>,
}

impl ModuleKey {
    /// Create a key whose digest is produced by `get_digest` on first access
    pub fn new<F>(full_name: ModuleFullName, commit_id: impl Into<String>, get_digest: F) -> Self
    where
        F: Fn() -> Result<Digest> + Send + Sync + 'static,
    {
        Self {
            full_name,
            commit_id: commit_id.into(),
            digest: Arc::new(LazyDigest {
                value: OnceValue::new(),
                compute: Box::new(get_digest),
            }),
        }
    }

    /// Create a key with an already-known digest
    pub fn with_digest(
        full_name: ModuleFullName,
        commit_id: impl Into<String>,
        digest: Digest,
    ) -> Self {
        Self::new(full_name, commit_id, move || Ok(digest.clone()))
    }

    pub fn full_name(&self) -> &ModuleFullName {
        &self.full_name
    }

    /// Commit ID; empty when the pin does not track one
    pub fn commit_id(&self) -> &str {
        &self.commit_id
    }

    /// The digest, computed on first call and fixed afterwards
    pub fn digest(&self) -> Result<Digest> {
        self.digest
            .value
            .get_or_init(|| (self.digest.compute)())
            .clone()
    }
}

impl fmt::Debug for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleKey")
            .field("full_name", &self.full_name.to_string())
            .field("commit_id", &self.commit_id)
            .field(
                "digest",
                &self.digest.value.get().and_then(|d| d.as_ref().ok()).map(|d| d.to_string()),
            )
            .finish()
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.commit_id.is_empty() {
            write!(f, "{}", self.full_name)
        } else {
            write!(f, "{}:{}", self.full_name, self.commit_id)
        }
    }
}

// =============================================================================
// Module Files
// =============================================================================

/// Metadata of one schema file, without its content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoFileInfo {
    pub path: String,
    pub module_id: String,
    pub external_path: Option<String>,
}

/// A schema file with its content
#[derive(Debug, Clone)]
pub struct ProtoFile {
    pub info: ProtoFileInfo,
    pub content: Arc<Vec<u8>>,
}

impl ProtoFile {
    pub fn path(&self) -> &str {
        &self.info.path
    }

    /// Content as UTF-8 text
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.content).map_err(|e| ModuleError::Parse {
            path: self.info.path.clone(),
            line: 0,
            message: format!("file is not valid UTF-8: {}", e),
        })
    }
}

#[derive(Debug, Clone, Default)]
struct ModuleDocs {
    license: Option<String>,
    doc_path: Option<String>,
    doc: Option<String>,
}

struct ModuleFiles {
    bucket: Arc<dyn ReadBucket>,
    license_override: Option<String>,
    doc_override: Option<(String, String)>,
    paths: OnceValue<Result<Vec<String>>>,
    contents: MemoCache<String, Arc<Vec<u8>>>,
    docs: OnceValue<Result<ModuleDocs>>,
    digest: OnceValue<Result<Digest>>,
}

impl ModuleFiles {
    fn paths(&self) -> Result<Vec<String>> {
        self.paths.get_or_init(|| self.bucket.paths()).clone()
    }

    fn read(&self, path: &str) -> Result<Arc<Vec<u8>>> {
        self.contents
            .get_or_add(path.to_string(), || self.bucket.read(path).map(Arc::new))
    }

    fn read_text(&self, path: &str) -> Result<String> {
        let content = self.read(path)?;
        Ok(String::from_utf8_lossy(&content).into_owned())
    }

    fn proto_paths(&self) -> Result<Vec<String>> {
        Ok(self
            .paths()?
            .into_iter()
            .filter(|p| p.ends_with(PROTO_EXTENSION))
            .collect())
    }

    fn docs(&self) -> Result<ModuleDocs> {
        self.docs
            .get_or_init(|| {
                let paths = self.paths()?;
                let mut docs = ModuleDocs::default();

                docs.license = match &self.license_override {
                    Some(license) => Some(license.clone()),
                    None if paths.iter().any(|p| p == LICENSE_PATH) => {
                        Some(self.read_text(LICENSE_PATH)?)
                    }
                    None => None,
                };

                match &self.doc_override {
                    Some((path, content)) => {
                        docs.doc_path = Some(path.clone());
                        docs.doc = Some(content.clone());
                    }
                    None => {
                        if let Some(path) = detected_doc_path(&paths) {
                            docs.doc = Some(self.read_text(path)?);
                            docs.doc_path = Some(path.to_string());
                        }
                    }
                }
                Ok(docs)
            })
            .clone()
    }

    /// Digest over schema files, license, and documentation
    fn digest(&self) -> Result<Digest> {
        self.digest
            .get_or_init(|| {
                let mut files: Vec<(String, Arc<Vec<u8>>)> = Vec::new();
                for path in self.proto_paths()? {
                    let content = self.read(&path)?;
                    files.push((path, content));
                }
                // Raw bytes, so distinct non-UTF-8 content never collides
                let paths = self.paths()?;
                match &self.license_override {
                    Some(license) => {
                        let content = Arc::new(license.clone().into_bytes());
                        files.push((LICENSE_PATH.to_string(), content));
                    }
                    None if paths.iter().any(|p| p == LICENSE_PATH) => {
                        files.push((LICENSE_PATH.to_string(), self.read(LICENSE_PATH)?));
                    }
                    None => {}
                }
                match &self.doc_override {
                    Some((path, content)) => {
                        let content = Arc::new(content.clone().into_bytes());
                        files.push((path.clone(), content));
                    }
                    None => {
                        if let Some(path) = detected_doc_path(&paths) {
                            files.push((path.to_string(), self.read(path)?));
                        }
                    }
                }
                Ok(Digest::for_files(
                    files.iter().map(|(path, content)| (path.as_str(), content.as_slice())),
                ))
            })
            .clone()
    }
}

/// First of [`DOC_PATHS`] present in `paths`
fn detected_doc_path(paths: &[String]) -> Option<&'static str> {
    DOC_PATHS
        .iter()
        .copied()
        .find(|d| paths.iter().any(|p| p == d))
}

// =============================================================================
// Module
// =============================================================================

/// A resolved schema module
pub struct Module {
    id: String,
    full_name: Option<ModuleFullName>,
    commit_id: String,
    is_target: bool,
    deps: Vec<ModuleKey>,
    files: Arc<ModuleFiles>,
}

impl Module {
    /// Start building a module with the given ID and file source
    pub fn builder(id: impl Into<String>, bucket: Arc<dyn ReadBucket>) -> ModuleBuilder {
        ModuleBuilder {
            id: id.into(),
            bucket,
            full_name: None,
            commit_id: String::new(),
            is_target: true,
            license: None,
            doc: None,
            deps: Vec::new(),
        }
    }

    /// Unique ID within a module set
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Registry identity; `None` for local, unpublished modules
    pub fn full_name(&self) -> Option<&ModuleFullName> {
        self.full_name.as_ref()
    }

    pub fn commit_id(&self) -> &str {
        &self.commit_id
    }

    /// Whether this module's files are compiled by default
    pub fn is_target(&self) -> bool {
        self.is_target
    }

    /// Dependency pins this module was resolved with
    pub fn deps(&self) -> &[ModuleKey] {
        &self.deps
    }

    /// List schema files, sorted by path, without reading them
    pub fn proto_file_infos(&self) -> Result<Vec<ProtoFileInfo>> {
        Ok(self
            .files
            .proto_paths()?
            .into_iter()
            .map(|path| self.file_info(path))
            .collect())
    }

    /// Read one schema file
    pub fn get_proto_file(&self, path: &str) -> Result<ProtoFile> {
        if !path.ends_with(PROTO_EXTENSION) || !self.files.paths()?.iter().any(|p| p == path) {
            return Err(ModuleError::FileNotFound(path.to_string()));
        }
        let content = self.files.read(path)?;
        Ok(ProtoFile {
            info: self.file_info(path.to_string()),
            content,
        })
    }

    /// License text, empty if the module has none
    pub fn license_content(&self) -> Result<String> {
        Ok(self.files.docs()?.license.unwrap_or_default())
    }

    /// Documentation text, empty if the module has none
    pub fn doc_content(&self) -> Result<String> {
        Ok(self.files.docs()?.doc.unwrap_or_default())
    }

    /// Path of the documentation file, if any
    pub fn doc_path(&self) -> Result<Option<String>> {
        Ok(self.files.docs()?.doc_path)
    }

    /// Content digest, computed once
    pub fn digest(&self) -> Result<Digest> {
        self.files.digest()
    }

    /// A pin for this module, for named modules only
    ///
    /// The pin's digest is computed lazily from the module's files.
    pub fn module_key(&self) -> Option<ModuleKey> {
        let full_name = self.full_name.clone()?;
        let files = Arc::clone(&self.files);
        Some(ModuleKey::new(full_name, self.commit_id.clone(), move || files.digest()))
    }

    /// Human-readable identity: the full name if present, else the ID
    pub fn description(&self) -> String {
        match &self.full_name {
            Some(name) => name.to_string(),
            None => self.id.clone(),
        }
    }

    fn file_info(&self, path: String) -> ProtoFileInfo {
        ProtoFileInfo {
            external_path: self.files.bucket.external_path(&path),
            path,
            module_id: self.id.clone(),
        }
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id)
            .field("full_name", &self.full_name.as_ref().map(|n| n.to_string()))
            .field("commit_id", &self.commit_id)
            .field("is_target", &self.is_target)
            .field("deps", &self.deps)
            .finish()
    }
}

/// Builder for [`Module`]
pub struct ModuleBuilder {
    id: String,
    bucket: Arc<dyn ReadBucket>,
    full_name: Option<ModuleFullName>,
    commit_id: String,
    is_target: bool,
    license: Option<String>,
    doc: Option<(String, String)>,
    deps: Vec<ModuleKey>,
}

impl ModuleBuilder {
    pub fn full_name(mut self, full_name: ModuleFullName) -> Self {
        self.full_name = Some(full_name);
        self
    }

    pub fn commit_id(mut self, commit_id: impl Into<String>) -> Self {
        self.commit_id = commit_id.into();
        self
    }

    /// Mark as a dependency-only module (not compiled by default)
    pub fn target(mut self, is_target: bool) -> Self {
        self.is_target = is_target;
        self
    }

    /// Use this license instead of reading `LICENSE` from the bucket
    pub fn license(mut self, content: impl Into<String>) -> Self {
        self.license = Some(content.into());
        self
    }

    /// Use this documentation instead of detecting it from the bucket
    pub fn doc(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.doc = Some((path.into(), content.into()));
        self
    }

    pub fn deps(mut self, deps: Vec<ModuleKey>) -> Self {
        self.deps = deps;
        self
    }

    pub fn build(self) -> Module {
        Module {
            id: self.id,
            full_name: self.full_name,
            commit_id: self.commit_id,
            is_target: self.is_target,
            deps: self.deps,
            files: Arc::new(ModuleFiles {
                bucket: self.bucket,
                license_override: self.license,
                doc_override: self.doc,
                paths: OnceValue::new(),
                contents: MemoCache::new(),
                docs: OnceValue::new(),
                digest: OnceValue::new(),
            }),
        }
    }
}
