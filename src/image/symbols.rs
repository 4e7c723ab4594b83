//! Symbol table and reference linking
//!
//! Every file contributes its package components and fully-qualified type,
//! service, and extension names to one table. Linking a file resolves each
//! reference in it with protobuf scoping rules, restricted to the files it
//! can see: itself, its direct imports, and whatever those re-export with
//! `import public`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{ModuleError, Result};

use super::descriptor::{
    EnumDescriptor, FieldDescriptor, FieldType, FileDescriptor, MessageDescriptor, OptionDecl,
    ServiceDescriptor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Package,
    Message,
    Enum,
    Service,
    Extension,
}

#[derive(Debug, Clone, Copy)]
struct Definition {
    kind: SymbolKind,
    file: usize,
}

/// Fully-qualified names (without leading dot) to their defining files
#[derive(Debug, Default)]
pub struct SymbolTable {
    defs: HashMap<String, Vec<Definition>>,
    paths: Vec<String>,
}

impl SymbolTable {
    /// Index all symbols of `files`; file indexes are positions in the slice
    pub fn build(files: &[Arc<FileDescriptor>]) -> Result<Self> {
        let mut table = Self::default();
        for (index, fd) in files.iter().enumerate() {
            table.paths.push(fd.name.clone());
            table.add_file(index, fd)?;
        }
        Ok(table)
    }

    fn add_file(&mut self, file: usize, fd: &FileDescriptor) -> Result<()> {
        let package = fd.package_name();
        if !package.is_empty() {
            let mut prefix = String::new();
            for part in package.split('.') {
                if !prefix.is_empty() {
                    prefix.push('.');
                }
                prefix.push_str(part);
                self.define(prefix.clone(), SymbolKind::Package, file)?;
            }
        }
        for message in &fd.messages {
            self.add_message(package, message, file)?;
        }
        for decl in &fd.enums {
            self.define(qualify(package, &decl.name), SymbolKind::Enum, file)?;
        }
        for service in &fd.services {
            self.define(qualify(package, &service.name), SymbolKind::Service, file)?;
        }
        for extension in &fd.extensions {
            self.define(qualify(package, &extension.name), SymbolKind::Extension, file)?;
        }
        Ok(())
    }

    fn add_message(&mut self, scope: &str, message: &MessageDescriptor, file: usize) -> Result<()> {
        let name = qualify(scope, &message.name);
        self.define(name.clone(), SymbolKind::Message, file)?;
        for nested in &message.nested_messages {
            self.add_message(&name, nested, file)?;
        }
        for decl in &message.enums {
            self.define(qualify(&name, &decl.name), SymbolKind::Enum, file)?;
        }
        for extension in &message.extensions {
            self.define(qualify(&name, &extension.name), SymbolKind::Extension, file)?;
        }
        Ok(())
    }

    /// Packages may be declared by many files; anything else exactly once
    fn define(&mut self, name: String, kind: SymbolKind, file: usize) -> Result<()> {
        let defs = self.defs.entry(name.clone()).or_default();
        let conflict = defs
            .iter()
            .find(|d| kind != SymbolKind::Package || d.kind != SymbolKind::Package)
            .map(|d| d.file);
        if let Some(first) = conflict {
            return Err(ModuleError::DuplicateSymbol {
                symbol: name,
                first: self.paths[first].clone(),
                second: self.paths[file].clone(),
            });
        }
        if !defs.iter().any(|d| d.file == file) {
            defs.push(Definition { kind, file });
        }
        Ok(())
    }

    fn lookup(&self, name: &str, visible: &HashSet<usize>) -> Option<Definition> {
        self.defs
            .get(name)?
            .iter()
            .find(|d| visible.contains(&d.file))
            .copied()
    }
}

/// Result of linking one file
#[derive(Debug, Clone)]
pub struct LinkedFile {
    pub descriptor: FileDescriptor,
    /// Indexes into `dependencies` of imports nothing in the file refers to
    pub unused_dependency_indexes: Vec<usize>,
}

/// Links files against a shared symbol table
pub struct Linker<'a> {
    files: &'a [Arc<FileDescriptor>],
    by_path: HashMap<&'a str, usize>,
    table: SymbolTable,
}

impl<'a> Linker<'a> {
    /// `files` must contain every file any of them imports
    pub fn new(files: &'a [Arc<FileDescriptor>]) -> Result<Self> {
        let by_path = files
            .iter()
            .enumerate()
            .map(|(i, fd)| (fd.name.as_str(), i))
            .collect();
        let table = SymbolTable::build(files)?;
        Ok(Self { files, by_path, table })
    }

    /// Resolve every reference in `files[file]` and find its unused imports
    pub fn link(&self, file: usize) -> Result<LinkedFile> {
        let fd = &self.files[file];
        let mut exposures = Vec::with_capacity(fd.dependencies.len());
        for dep in &fd.dependencies {
            let index = self.index_of(&fd.name, dep)?;
            exposures.push(self.exports(index)?);
        }
        let mut visible: HashSet<usize> = exposures.iter().flatten().copied().collect();
        visible.insert(file);

        let mut linker = FileLinker {
            table: &self.table,
            path: &fd.name,
            self_file: file,
            visible,
            exposures,
            used: vec![false; fd.dependencies.len()],
        };
        let mut descriptor = FileDescriptor::clone(fd);
        linker.file(&mut descriptor)?;

        let unused_dependency_indexes = (0..descriptor.dependencies.len())
            .filter(|&i| !linker.used[i] && !descriptor.is_public_dependency(i))
            .collect();
        Ok(LinkedFile {
            descriptor,
            unused_dependency_indexes,
        })
    }

    fn index_of(&self, importer: &str, path: &str) -> Result<usize> {
        self.by_path
            .get(path)
            .copied()
            .ok_or_else(|| ModuleError::ImportNotFound {
                file: importer.to_string(),
                import: path.to_string(),
            })
    }

    /// `file` plus everything it re-exports through `import public`, transitively
    fn exports(&self, file: usize) -> Result<HashSet<usize>> {
        let mut seen = HashSet::from([file]);
        let mut stack = vec![file];
        while let Some(current) = stack.pop() {
            let fd = &self.files[current];
            for &dep_index in &fd.public_dependencies {
                let Some(dep) = fd.dependencies.get(dep_index) else {
                    continue;
                };
                let index = self.index_of(&fd.name, dep)?;
                if seen.insert(index) {
                    stack.push(index);
                }
            }
        }
        Ok(seen)
    }
}

struct FileLinker<'a> {
    table: &'a SymbolTable,
    path: &'a str,
    self_file: usize,
    visible: HashSet<usize>,
    exposures: Vec<HashSet<usize>>,
    used: Vec<bool>,
}

impl FileLinker<'_> {
    fn file(&mut self, fd: &mut FileDescriptor) -> Result<()> {
        let package = fd.package_name().to_string();
        self.options(&package, &mut fd.options)?;
        for message in &mut fd.messages {
            self.message(&package, message)?;
        }
        for decl in &mut fd.enums {
            self.enum_decl(&package, decl)?;
        }
        for service in &mut fd.services {
            self.service(&package, service)?;
        }
        for extension in &mut fd.extensions {
            self.field(&package, extension)?;
        }
        Ok(())
    }

    fn message(&mut self, scope: &str, message: &mut MessageDescriptor) -> Result<()> {
        let name = qualify(scope, &message.name);
        self.options(&name, &mut message.options)?;
        for field in &mut message.fields {
            self.field(&name, field)?;
        }
        for oneof in &mut message.oneofs {
            self.options(&name, &mut oneof.options)?;
        }
        for nested in &mut message.nested_messages {
            self.message(&name, nested)?;
        }
        for decl in &mut message.enums {
            self.enum_decl(&name, decl)?;
        }
        for extension in &mut message.extensions {
            self.field(&name, extension)?;
        }
        Ok(())
    }

    fn enum_decl(&mut self, scope: &str, decl: &mut EnumDescriptor) -> Result<()> {
        let name = qualify(scope, &decl.name);
        self.options(&name, &mut decl.options)?;
        for value in &mut decl.values {
            self.options(&name, &mut value.options)?;
        }
        Ok(())
    }

    fn service(&mut self, scope: &str, service: &mut ServiceDescriptor) -> Result<()> {
        let name = qualify(scope, &service.name);
        self.options(&name, &mut service.options)?;
        for method in &mut service.methods {
            method.input_type = self.resolve(&name, &method.input_type, &[SymbolKind::Message])?.0;
            method.output_type = self
                .resolve(&name, &method.output_type, &[SymbolKind::Message])?
                .0;
            self.options(&name, &mut method.options)?;
        }
        Ok(())
    }

    fn field(&mut self, scope: &str, field: &mut FieldDescriptor) -> Result<()> {
        if let FieldType::Unresolved(type_name) = &field.field_type {
            let accept = [SymbolKind::Message, SymbolKind::Enum];
            let (name, kind) = self.resolve(scope, type_name, &accept)?;
            field.field_type = match kind {
                SymbolKind::Enum => FieldType::Enum(name),
                _ => FieldType::Message(name),
            };
        }
        if let Some(extendee) = &field.extendee {
            field.extendee = Some(self.resolve(scope, extendee, &[SymbolKind::Message])?.0);
        }
        self.options(scope, &mut field.options)
    }

    fn options(&mut self, scope: &str, options: &mut [OptionDecl]) -> Result<()> {
        for option in options {
            for part in option.name.iter_mut().filter(|p| p.is_extension) {
                part.name = self.resolve(scope, &part.name, &[SymbolKind::Extension])?.0;
            }
        }
        Ok(())
    }

    /// Resolve `name` from `scope`, returning `.fully.qualified.Name`
    ///
    /// Relative names are tried in `scope`, then each enclosing scope out to
    /// the root. A candidate counts only if its first component exists in
    /// that scope and the whole name has an accepted kind.
    fn resolve(
        &mut self,
        scope: &str,
        name: &str,
        accept: &[SymbolKind],
    ) -> Result<(String, SymbolKind)> {
        let found = match name.strip_prefix('.') {
            Some(absolute) => self.find(absolute, accept).map(|d| (absolute.to_string(), d)),
            None => {
                let first = name.split('.').next().unwrap_or(name);
                let mut current = scope;
                loop {
                    let anchor = qualify(current, first);
                    if self.table.lookup(&anchor, &self.visible).is_some() {
                        let candidate = qualify(current, name);
                        if let Some(def) = self.find(&candidate, accept) {
                            break Some((candidate, def));
                        }
                    }
                    if current.is_empty() {
                        break None;
                    }
                    current = match current.rfind('.') {
                        Some(dot) => &current[..dot],
                        None => "",
                    };
                }
            }
        };

        let (full_name, def) = found.ok_or_else(|| ModuleError::UnresolvedReference {
            file: self.path.to_string(),
            reference: name.to_string(),
        })?;
        self.mark_used(def.file);
        Ok((format!(".{}", full_name), def.kind))
    }

    fn find(&self, full_name: &str, accept: &[SymbolKind]) -> Option<Definition> {
        self.table
            .lookup(full_name, &self.visible)
            .filter(|d| accept.contains(&d.kind))
    }

    fn mark_used(&mut self, file: usize) {
        if file == self.self_file {
            return;
        }
        for (i, exposure) in self.exposures.iter().enumerate() {
            if exposure.contains(&file) {
                self.used[i] = true;
            }
        }
    }
}

/// `scope.name`, or `name` at the root scope
pub fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", scope, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::parser::parse_file;

    fn files(sources: &[(&str, &str)]) -> Vec<Arc<FileDescriptor>> {
        sources
            .iter()
            .map(|(path, src)| Arc::new(parse_file(path, src).unwrap()))
            .collect()
    }

    #[test]
    fn test_resolves_with_scoping_rules() {
        let files = files(&[(
            "a.proto",
            r#"
            syntax = "proto3";
            package acme.v1;
            message Outer {
                message Inner { Kind kind = 1; }
                enum Kind { KIND_UNSPECIFIED = 0; }
                Inner inner = 1;
                v1.Outer.Kind kind = 2;
                .acme.v1.Outer self = 3;
                map<string, Inner> by_name = 4;
            }
            "#,
        )]);
        let linker = Linker::new(&files).unwrap();
        let linked = linker.link(0).unwrap().descriptor;
        let outer = &linked.messages[0];
        assert_eq!(outer.fields[0].field_type, FieldType::Message(".acme.v1.Outer.Inner".into()));
        assert_eq!(outer.fields[1].field_type, FieldType::Enum(".acme.v1.Outer.Kind".into()));
        assert_eq!(outer.fields[2].field_type, FieldType::Message(".acme.v1.Outer".into()));
        assert_eq!(
            outer.fields[3].field_type,
            FieldType::Message(".acme.v1.Outer.ByNameEntry".into())
        );
        let inner = &outer.nested_messages[0];
        assert_eq!(inner.fields[0].field_type, FieldType::Enum(".acme.v1.Outer.Kind".into()));
        let entry = outer.nested_messages.iter().find(|m| m.is_map_entry).unwrap();
        assert_eq!(entry.fields[1].field_type, FieldType::Message(".acme.v1.Outer.Inner".into()));
    }

    #[test]
    fn test_unresolved_reference() {
        let files = files(&[("a.proto", "syntax = \"proto3\"; message M { Missing m = 1; }")]);
        let err = Linker::new(&files).unwrap().link(0).unwrap_err();
        assert!(matches!(err, ModuleError::UnresolvedReference { file, reference }
            if file == "a.proto" && reference == "Missing"));
    }

    #[test]
    fn test_unimported_files_are_invisible() {
        let files = files(&[
            ("b.proto", "syntax = \"proto3\"; package b; message B {}"),
            ("a.proto", "syntax = \"proto3\"; package a; message A { b.B b = 1; }"),
        ]);
        let err = Linker::new(&files).unwrap().link(1).unwrap_err();
        assert!(matches!(err, ModuleError::UnresolvedReference { .. }));
    }

    #[test]
    fn test_unused_and_public_imports() {
        let files = files(&[
            ("c.proto", "syntax = \"proto3\"; package c; message C {}"),
            ("b.proto", "syntax = \"proto3\"; package b; import public \"c.proto\"; message B {}"),
            ("u.proto", "syntax = \"proto3\"; package u; message U {}"),
            (
                "a.proto",
                r#"syntax = "proto3"; package a;
                import "u.proto";
                import "b.proto";
                message A { c.C c = 1; }"#,
            ),
        ]);
        let linker = Linker::new(&files).unwrap();
        let a = linker.link(3).unwrap();
        // c.C comes through b's public import, so b is used and u is not
        assert_eq!(a.unused_dependency_indexes, vec![0]);
        let field_type = &a.descriptor.messages[0].fields[0].field_type;
        assert_eq!(field_type, &FieldType::Message(".c.C".into()));

        // Public imports are never unused
        let b = linker.link(1).unwrap();
        assert!(b.unused_dependency_indexes.is_empty());
    }

    #[test]
    fn test_options_and_rpcs_count_as_uses() {
        let files = files(&[
            (
                "opts.proto",
                r#"syntax = "proto2"; package opts;
                message Base { extensions 100 to 200; }
                extend Base { optional string tag = 100; }"#,
            ),
            ("msgs.proto", "syntax = \"proto3\"; package msgs; message Req {} message Res {}"),
            (
                "svc.proto",
                r#"syntax = "proto3"; package svc;
                import "opts.proto";
                import "msgs.proto";
                service S {
                    rpc Call(msgs.Req) returns (msgs.Res) { option (opts.tag) = "x"; }
                }"#,
            ),
        ]);
        let linked = Linker::new(&files).unwrap().link(2).unwrap();
        assert!(linked.unused_dependency_indexes.is_empty());
        let method = &linked.descriptor.services[0].methods[0];
        assert_eq!(method.input_type, ".msgs.Req");
        assert_eq!(method.options[0].name[0].name, ".opts.tag");

        let opts = Linker::new(&files).unwrap().link(0).unwrap();
        assert_eq!(opts.descriptor.extensions[0].extendee.as_deref(), Some(".opts.Base"));
    }

    #[test]
    fn test_duplicate_symbols() {
        let files = files(&[
            ("a.proto", "syntax = \"proto3\"; package p; message M {}"),
            ("b.proto", "syntax = \"proto3\"; package p; message M {}"),
        ]);
        let err = Linker::new(&files).err().unwrap();
        assert!(matches!(err, ModuleError::DuplicateSymbol { symbol, first, second }
            if symbol == "p.M" && first == "a.proto" && second == "b.proto"));
    }

    #[test]
    fn test_shared_package_is_not_duplicate() {
        let files = files(&[
            ("a.proto", "syntax = \"proto3\"; package p.q; message A {}"),
            (
                "b.proto",
                "syntax = \"proto3\"; package p.q; import \"a.proto\"; message B { A a = 1; }",
            ),
        ]);
        let linked = Linker::new(&files).unwrap().link(1).unwrap();
        let field_type = &linked.descriptor.messages[0].fields[0].field_type;
        assert_eq!(field_type, &FieldType::Message(".p.q.A".into()));
    }
}
