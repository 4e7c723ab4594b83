//! Compiled images
//!
//! An [`Image`] is the ordered, linked set of schema files produced from a
//! module set. Every file appears after the files it imports, paths are
//! unique, and each file records whether it was a build target and which
//! of its imports went unused.
//!
//! ```text
//! ModuleSet ─► index ─► parse (BFS waves) ─► order + cycle check ─► link ─► Image
//! ```

pub mod builder;
pub mod descriptor;
pub mod parser;
pub mod symbols;

pub use builder::{BuildOptions, ImageBuilder};
pub use descriptor::{FileDescriptor, Syntax};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{ModuleError, Result};
use crate::name::ModuleFullName;

/// One compiled schema file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFile {
    descriptor: FileDescriptor,
    module_full_name: Option<ModuleFullName>,
    commit_id: String,
    external_path: String,
    is_import: bool,
    is_syntax_unspecified: bool,
    unused_dependency_indexes: Vec<usize>,
}

impl ImageFile {
    /// `external_path` defaults to the file's path
    pub fn new(
        descriptor: FileDescriptor,
        module_full_name: Option<ModuleFullName>,
        commit_id: impl Into<String>,
        external_path: Option<String>,
        is_import: bool,
        unused_dependency_indexes: Vec<usize>,
    ) -> Self {
        Self {
            external_path: external_path.unwrap_or_else(|| descriptor.name.clone()),
            is_syntax_unspecified: descriptor.syntax.is_none(),
            descriptor,
            module_full_name,
            commit_id: commit_id.into(),
            is_import,
            unused_dependency_indexes,
        }
    }

    pub fn path(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &FileDescriptor {
        &self.descriptor
    }

    /// Owning module's name; `None` for unnamed local modules
    pub fn module_full_name(&self) -> Option<&ModuleFullName> {
        self.module_full_name.as_ref()
    }

    pub fn commit_id(&self) -> &str {
        &self.commit_id
    }

    /// Where the file lives outside the image, e.g. on disk
    pub fn external_path(&self) -> &str {
        &self.external_path
    }

    /// True if the file was only pulled in to satisfy an import
    pub fn is_import(&self) -> bool {
        self.is_import
    }

    /// True if the file declares neither `syntax` nor `edition`
    pub fn is_syntax_unspecified(&self) -> bool {
        self.is_syntax_unspecified
    }

    /// Indexes into the descriptor's dependencies that nothing references
    pub fn unused_dependency_indexes(&self) -> &[usize] {
        &self.unused_dependency_indexes
    }
}

/// Topologically ordered compiled files
#[derive(Debug, Clone)]
pub struct Image {
    files: Vec<ImageFile>,
    by_path: HashMap<String, usize>,
}

impl Image {
    /// Assemble an image from ordered files
    ///
    /// Paths must be unique, and any import present in the image must come
    /// before the file importing it. Imports absent from the image are
    /// allowed (see [`Image::without_imports`]).
    pub fn new(files: Vec<ImageFile>) -> Result<Self> {
        let mut by_path: HashMap<String, usize> = HashMap::with_capacity(files.len());
        for (index, file) in files.iter().enumerate() {
            if let Some(&first) = by_path.get(file.path()) {
                return Err(ModuleError::DuplicatePath {
                    path: file.path().to_string(),
                    first: files[first].external_path().to_string(),
                    second: file.external_path().to_string(),
                });
            }
            by_path.insert(file.path().to_string(), index);
        }
        for (index, file) in files.iter().enumerate() {
            for dep in &file.descriptor.dependencies {
                if by_path.get(dep).is_some_and(|&dep_index| dep_index > index) {
                    return Err(ModuleError::internal(format!(
                        "image file {} is ordered before its import {}",
                        file.path(),
                        dep
                    )));
                }
            }
        }
        Ok(Self { files, by_path })
    }

    /// Files in dependency order
    pub fn files(&self) -> &[ImageFile] {
        &self.files
    }

    pub fn get_file(&self, path: &str) -> Option<&ImageFile> {
        self.by_path.get(path).map(|&i| &self.files[i])
    }

    /// Files that were build targets
    pub fn target_files(&self) -> impl Iterator<Item = &ImageFile> {
        self.files.iter().filter(|f| !f.is_import())
    }

    /// A copy of this image with import-only files removed
    pub fn without_imports(&self) -> Image {
        let files: Vec<ImageFile> = self.target_files().cloned().collect();
        let by_path = files
            .iter()
            .enumerate()
            .map(|(i, f)| (f.path().to_string(), i))
            .collect();
        Image { files, by_path }
    }

    /// JSON array of the image's files, for downstream tools
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.files)
            .map_err(|e| ModuleError::internal(format!("failed to encode image: {}", e)))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, deps: &[&str], is_import: bool) -> ImageFile {
        let descriptor = FileDescriptor {
            name: path.to_string(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        };
        ImageFile::new(descriptor, None, "", None, is_import, Vec::new())
    }

    #[test]
    fn test_image_file_defaults() {
        let f = file("a.proto", &[], false);
        assert_eq!(f.external_path(), "a.proto");
        assert!(f.is_syntax_unspecified());
        assert!(f.module_full_name().is_none());
    }

    #[test]
    fn test_new_rejects_duplicate_paths() {
        let files = vec![file("a.proto", &[], false), file("a.proto", &[], true)];
        let err = Image::new(files).unwrap_err();
        assert!(matches!(err, ModuleError::DuplicatePath { path, .. } if path == "a.proto"));
    }

    #[test]
    fn test_new_rejects_misordered_files() {
        let files = vec![file("b.proto", &["a.proto"], false), file("a.proto", &[], true)];
        let err = Image::new(files).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_without_imports() {
        let files = vec![file("a.proto", &[], true), file("b.proto", &["a.proto"], false)];
        let image = Image::new(files).unwrap();
        assert_eq!(image.len(), 2);
        assert!(image.get_file("a.proto").unwrap().is_import());

        let targets = image.without_imports();
        assert_eq!(targets.len(), 1);
        assert!(targets.get_file("a.proto").is_none());
        assert_eq!(targets.files()[0].path(), "b.proto");
    }

    #[test]
    fn test_to_json() {
        let image = Image::new(vec![file("a.proto", &[], false)]).unwrap();
        let json = image.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["descriptor"]["name"], "a.proto");
        assert_eq!(value[0]["is_import"], false);
    }
}
