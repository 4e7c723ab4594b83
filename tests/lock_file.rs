//! Lock file tests against real module directories

use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use schema_modules::config::LockConfig;
use schema_modules::lock_file::LOCK_FILE_HEADER;
use schema_modules::{
    DirBucket, EngineConfig, Executor, FileVersion, LockFile, LockFormat, Module, ModuleFullName,
    ModuleSet,
};

fn dep_module(name: &str, commit: &str, proto: &str) -> (TempDir, Module) {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("dep.proto"), proto).unwrap();
    fs::write(dir.path().join("LICENSE"), "MIT\n").unwrap();
    let module = Module::builder(name, Arc::new(DirBucket::new(dir.path())))
        .full_name(ModuleFullName::parse(name).unwrap())
        .commit_id(commit)
        .target(false)
        .build();
    (dir, module)
}

/// A local module depending on two remote modules
fn module_set() -> (Vec<TempDir>, ModuleSet) {
    let alpha = "syntax = \"proto3\";\npackage alpha;\n";
    let beta = "syntax = \"proto3\";\npackage beta;\n";
    let (dir_a, a) = dep_module("buf.build/acme/alpha", "aaaa1111", alpha);
    let (dir_b, b) = dep_module("buf.build/acme/beta", "bbbb2222", beta);
    let local_dir = TempDir::new().unwrap();
    fs::write(local_dir.path().join("app.proto"), "syntax = \"proto3\";\n").unwrap();

    let local = Module::builder("local", Arc::new(DirBucket::new(local_dir.path())))
        .deps(vec![b.module_key().unwrap(), a.module_key().unwrap()])
        .build();
    let set = ModuleSet::builder().add_module(local).build().unwrap();
    (vec![dir_a, dir_b, local_dir], set)
}

#[test]
fn test_write_and_read_from_dir() {
    let (_dirs, set) = module_set();
    let out = TempDir::new().unwrap();
    let config = EngineConfig::default();

    let lock = LockFile::from_module_set(config.lock.file_version, &set).unwrap();
    let path = lock.write_to_dir(out.path(), &config.lock).unwrap();
    assert_eq!(path, out.path().join("modules.lock"));

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.starts_with(LOCK_FILE_HEADER));
    assert!(text.contains("version: v2"));

    let read = LockFile::read_from_dir(out.path(), &config.lock).unwrap().unwrap();
    assert_eq!(read.file_version(), FileVersion::V2);

    let names: Vec<String> = read
        .dep_module_keys()
        .iter()
        .map(|k| k.full_name().to_string())
        .collect();
    assert_eq!(names, vec!["buf.build/acme/alpha", "buf.build/acme/beta"]);
    for (written, read) in lock.dep_module_keys().iter().zip(read.dep_module_keys()) {
        assert_eq!(written.digest().unwrap(), read.digest().unwrap());
    }
}

#[test]
fn test_legacy_json_lock_keeps_commits() {
    let (_dirs, set) = module_set();
    let out = TempDir::new().unwrap();
    let config = LockConfig {
        file_name: "deps.lock.json".to_string(),
        file_version: FileVersion::V1,
        format: LockFormat::Json,
    };

    let lock = LockFile::from_module_set(config.file_version, &set).unwrap();
    lock.write_to_dir(out.path(), &config).unwrap();

    let read = LockFile::read_from_dir(out.path(), &config).unwrap().unwrap();
    assert_eq!(read.file_version(), FileVersion::V1);
    let commits: Vec<&str> = read.dep_module_keys().iter().map(|k| k.commit_id()).collect();
    assert_eq!(commits, vec!["aaaa1111", "bbbb2222"]);
    read.validate_digests().unwrap();
}

#[test]
fn test_missing_lock_file_reads_as_none() {
    let out = TempDir::new().unwrap();
    let read = LockFile::read_from_dir(out.path(), &LockConfig::default()).unwrap();
    assert!(read.is_none());
}

#[test]
fn test_digest_tracks_module_content() {
    let (dir, module) = dep_module("buf.build/acme/alpha", "c1", "syntax = \"proto3\";\n");
    let before = module.digest().unwrap();

    fs::write(dir.path().join("dep.proto"), "syntax = \"proto2\";\n").unwrap();
    let fresh = Module::builder("alpha", Arc::new(DirBucket::new(dir.path())))
        .full_name(ModuleFullName::parse("buf.build/acme/alpha").unwrap())
        .build();
    assert_ne!(before, fresh.digest().unwrap());

    let set = ModuleSet::builder().add_module(fresh).build().unwrap();
    let digests = set.digests(&Executor::new(2)).unwrap();
    assert_eq!(digests.len(), 1);
    assert!(digests[0].1.to_string().starts_with("sha256:"));
}
