//! Image Builder
//!
//! Compiles a [`ModuleSet`] into an [`Image`]:
//!
//! 1. Index every schema file of every module; paths are one global namespace.
//! 2. Parse the targets, then their imports, in breadth-first waves. Each wave
//!    runs on the executor and is merged only once it completes.
//! 3. Build the import graph, reject cycles, and sort it topologically with
//!    ties broken by path.
//! 4. Link every file and record its unused imports.
//!
//! Any failure aborts the build; no partial image is returned.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use tracing::{debug, info};

use crate::bucket::normalize_path;
use crate::cache::MemoCache;
use crate::config::EngineConfig;
use crate::digest::Digest;
use crate::error::{ModuleError, Result};
use crate::exec::{default_parallelism, CancellationToken, Executor};
use crate::module::{Module, ProtoFileInfo};
use crate::module_set::ModuleSet;

use super::descriptor::FileDescriptor;
use super::parser::parse_file;
use super::symbols::Linker;
use super::{Image, ImageFile};

/// Options for one build
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Maximum concurrent file reads and parses
    pub parallelism: usize,
    /// Return only target files
    pub exclude_imports: bool,
    /// Files to compile; `None` compiles every file of every target module
    pub target_paths: Option<Vec<String>>,
    /// Cancels the build from another thread (also used for timeouts)
    pub cancellation: CancellationToken,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            exclude_imports: false,
            target_paths: None,
            cancellation: CancellationToken::new(),
        }
    }
}

impl BuildOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            parallelism: config.build.parallelism.max(1),
            exclude_imports: config.build.exclude_imports,
            ..Default::default()
        }
    }

    pub fn with_target_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_paths = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}

/// Module ID, path, and content digest, so a changed file is reparsed
type ParseKey = (String, String, Digest);

struct IndexedFile {
    module: Arc<Module>,
    info: ProtoFileInfo,
}

/// Builds images, memoizing parsed files across builds
///
/// The cache keeps only the parses the most recent build used, so edited
/// files do not accumulate stale entries.
#[derive(Default)]
pub struct ImageBuilder {
    parsed: MemoCache<ParseKey, Arc<FileDescriptor>>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct file parses held in the cache
    pub fn cached_parses(&self) -> usize {
        self.parsed.len()
    }

    pub fn build(&self, module_set: &ModuleSet, options: &BuildOptions) -> Result<Image> {
        let exec =
            Executor::new(options.parallelism).with_cancellation(options.cancellation.clone());
        info!(
            modules = module_set.len(),
            parallelism = exec.parallelism(),
            "Building image"
        );

        let index = index_files(module_set, &exec)?;
        let targets = select_targets(&index, options)?;
        let parsed = self.parse_closure(&index, &targets, &exec)?;
        let order = topological_order(&parsed)?;
        exec.cancellation().check()?;

        let files: Vec<Arc<FileDescriptor>> = order
            .iter()
            .map(|path| Arc::clone(&parsed[path]))
            .collect();
        let linker = Linker::new(&files)?;

        let mut image_files = Vec::with_capacity(files.len());
        for (i, fd) in files.iter().enumerate() {
            let linked = linker.link(i)?;
            let entry = lookup(&index, &fd.name)?;
            image_files.push(ImageFile::new(
                linked.descriptor,
                entry.module.full_name().cloned(),
                entry.module.commit_id(),
                entry.info.external_path.clone(),
                !targets.contains(&fd.name),
                linked.unused_dependency_indexes,
            ));
        }
        exec.cancellation().check()?;

        let image = Image::new(image_files)?;
        let image = if options.exclude_imports {
            image.without_imports()
        } else {
            image
        };
        info!(
            files = image.len(),
            targets = targets.len(),
            "Built image"
        );
        Ok(image)
    }

    /// Parse the targets and everything they import
    fn parse_closure(
        &self,
        index: &HashMap<String, IndexedFile>,
        targets: &BTreeSet<String>,
        exec: &Executor,
    ) -> Result<HashMap<String, Arc<FileDescriptor>>> {
        let mut parsed: HashMap<String, Arc<FileDescriptor>> = HashMap::new();
        let mut used: HashSet<ParseKey> = HashSet::new();
        let mut frontier: Vec<String> = targets.iter().cloned().collect();
        let mut wave = 0;

        while !frontier.is_empty() {
            wave += 1;
            debug!(wave, files = frontier.len(), "Parsing wave");

            let results = exec.map(frontier, |path| {
                let (key, descriptor) = self.parse(lookup(index, &path)?)?;
                Ok((path, key, descriptor))
            })?;

            let mut next = BTreeSet::new();
            for (path, key, descriptor) in results {
                used.insert(key);
                for dep in &descriptor.dependencies {
                    if !index.contains_key(dep) {
                        return Err(ModuleError::ImportNotFound {
                            file: path.clone(),
                            import: dep.clone(),
                        });
                    }
                    next.insert(dep.clone());
                }
                parsed.insert(path, descriptor);
            }
            frontier = next.into_iter().filter(|p| !parsed.contains_key(p)).collect();
        }

        self.parsed.retain(|key| used.contains(key));
        Ok(parsed)
    }

    fn parse(&self, entry: &IndexedFile) -> Result<(ParseKey, Arc<FileDescriptor>)> {
        let file = entry.module.get_proto_file(&entry.info.path)?;
        let key = (
            entry.module.id().to_string(),
            file.info.path.clone(),
            Digest::from_bytes(&file.content),
        );
        let descriptor = self
            .parsed
            .get_or_add(key.clone(), || Ok(Arc::new(parse_file(file.path(), file.text()?)?)))?;
        Ok((key, descriptor))
    }
}

fn lookup<'a>(index: &'a HashMap<String, IndexedFile>, path: &str) -> Result<&'a IndexedFile> {
    index
        .get(path)
        .ok_or_else(|| ModuleError::internal(format!("file {} missing from index", path)))
}

/// Map every schema path to its module, rejecting paths claimed twice
fn index_files(module_set: &ModuleSet, exec: &Executor) -> Result<HashMap<String, IndexedFile>> {
    let listings = exec.map(module_set.modules().to_vec(), |module| {
        let infos = module.proto_file_infos()?;
        Ok((module, infos))
    })?;

    let mut index: HashMap<String, IndexedFile> = HashMap::new();
    for (module, infos) in listings {
        for info in infos {
            if let Some(existing) = index.get(&info.path) {
                return Err(ModuleError::DuplicatePath {
                    path: info.path,
                    first: existing.module.description(),
                    second: module.description(),
                });
            }
            index.insert(
                info.path.clone(),
                IndexedFile {
                    module: Arc::clone(&module),
                    info,
                },
            );
        }
    }
    debug!(files = index.len(), "Indexed module files");
    Ok(index)
}

fn select_targets(
    index: &HashMap<String, IndexedFile>,
    options: &BuildOptions,
) -> Result<BTreeSet<String>> {
    match &options.target_paths {
        Some(paths) => paths
            .iter()
            .map(|path| {
                let path = normalize_path(path);
                if index.contains_key(&path) {
                    Ok(path)
                } else {
                    Err(ModuleError::FileNotFound(path))
                }
            })
            .collect(),
        None => Ok(index
            .iter()
            .filter(|(_, entry)| entry.module.is_target())
            .map(|(path, _)| path.clone())
            .collect()),
    }
}

/// Order files so each follows its imports, ties broken by path
///
/// Edges point from an import to the file importing it. Kahn's algorithm
/// runs without recursion; any file left unordered sits on or behind a
/// cycle.
fn topological_order(parsed: &HashMap<String, Arc<FileDescriptor>>) -> Result<Vec<String>> {
    let mut paths: Vec<&str> = parsed.keys().map(String::as_str).collect();
    paths.sort_unstable();

    let mut graph: DiGraph<&str, ()> = DiGraph::with_capacity(paths.len(), paths.len() * 2);
    let nodes: HashMap<&str, NodeIndex> = paths
        .iter()
        .map(|&path| (path, graph.add_node(path)))
        .collect();
    for &path in &paths {
        let to = nodes[path];
        for dep in &parsed[path].dependencies {
            if let Some(&from) = nodes.get(dep.as_str()) {
                graph.update_edge(from, to, ());
            }
        }
    }

    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();
    let mut ready: BinaryHeap<Reverse<(&str, NodeIndex)>> = graph
        .node_indices()
        .filter(|n| in_degree[n.index()] == 0)
        .map(|n| Reverse((graph[n], n)))
        .collect();

    let mut order = Vec::with_capacity(paths.len());
    while let Some(Reverse((path, node))) = ready.pop() {
        order.push(path.to_string());
        for dependent in graph.neighbors_directed(node, Direction::Outgoing) {
            in_degree[dependent.index()] -= 1;
            if in_degree[dependent.index()] == 0 {
                ready.push(Reverse((graph[dependent], dependent)));
            }
        }
    }

    // Files on or behind a cycle never become ready
    if order.len() < graph.node_count() {
        let cycle = find_cycle(&graph)
            .ok_or_else(|| ModuleError::internal("import graph is cyclic but no cycle was found"))?;
        return Err(ModuleError::ImportCycle { cycle });
    }
    Ok(order)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// First cycle found by depth-first search from each file in path order,
/// as `[a, b, ..., a]` following imports
///
/// The walk keeps its own stack so that long import chains cannot exhaust
/// the thread stack.
fn find_cycle(graph: &DiGraph<&str, ()>) -> Option<Vec<String>> {
    let mut marks = vec![Mark::Unvisited; graph.node_count()];
    graph.node_indices().find_map(|root| match marks[root.index()] {
        Mark::Unvisited => cycle_from(graph, root, &mut marks),
        _ => None,
    })
}

/// Imports of `node`, sorted by path
fn sorted_imports(graph: &DiGraph<&str, ()>, node: NodeIndex) -> Vec<NodeIndex> {
    let mut imports: Vec<NodeIndex> = graph.neighbors_directed(node, Direction::Incoming).collect();
    imports.sort_by_key(|&n| graph[n]);
    imports
}

fn cycle_from(
    graph: &DiGraph<&str, ()>,
    root: NodeIndex,
    marks: &mut [Mark],
) -> Option<Vec<String>> {
    // Each frame is a file on the current path and its next import to try
    let mut path: Vec<(NodeIndex, Vec<NodeIndex>, usize)> = Vec::new();
    marks[root.index()] = Mark::OnStack;
    path.push((root, sorted_imports(graph, root), 0));

    while let Some((node, imports, next)) = path.last_mut() {
        let Some(&import) = imports.get(*next) else {
            marks[node.index()] = Mark::Done;
            path.pop();
            continue;
        };
        *next += 1;

        match marks[import.index()] {
            Mark::OnStack => {
                let start = path.iter().position(|(n, _, _)| *n == import)?;
                let mut cycle: Vec<String> = path[start..]
                    .iter()
                    .map(|(n, _, _)| graph[*n].to_string())
                    .collect();
                cycle.push(graph[import].to_string());
                return Some(cycle);
            }
            Mark::Unvisited => {
                marks[import.index()] = Mark::OnStack;
                path.push((import, sorted_imports(graph, import), 0));
            }
            Mark::Done => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::MemoryBucket;
    use crate::module::Module;
    use crate::name::ModuleFullName;

    fn module_set(files: &[(&str, &str)]) -> ModuleSet {
        let bucket = Arc::new(MemoryBucket::from_files(files.iter().map(|(p, c)| (*p, *c))));
        ModuleSet::builder()
            .add_module(Module::builder("local", bucket).build())
            .build()
            .unwrap()
    }

    fn options() -> BuildOptions {
        BuildOptions {
            parallelism: 2,
            ..Default::default()
        }
    }

    fn paths(image: &Image) -> Vec<&str> {
        image.files().iter().map(|f| f.path()).collect()
    }

    #[test]
    fn test_imports_come_first() {
        let set = module_set(&[
            ("a.proto", "syntax = \"proto3\"; package a; message A {}"),
            (
                "b.proto",
                "syntax = \"proto3\"; package b; import \"a.proto\"; message B { a.A a = 1; }",
            ),
        ]);
        let image = ImageBuilder::new()
            .build(&set, &options().with_target_paths(["b.proto"]))
            .unwrap();

        assert_eq!(paths(&image), vec!["a.proto", "b.proto"]);
        assert!(image.get_file("a.proto").unwrap().is_import());
        assert!(!image.get_file("b.proto").unwrap().is_import());
        assert!(image.get_file("b.proto").unwrap().unused_dependency_indexes().is_empty());
    }

    #[test]
    fn test_ties_broken_by_path() {
        let set = module_set(&[
            ("z.proto", "syntax = \"proto3\";"),
            ("m.proto", "syntax = \"proto3\";"),
            ("base.proto", "syntax = \"proto3\";"),
            ("top.proto", "syntax = \"proto3\"; import \"z.proto\"; import \"base.proto\";"),
        ]);
        let image = ImageBuilder::new().build(&set, &options()).unwrap();
        assert_eq!(paths(&image), vec!["base.proto", "m.proto", "z.proto", "top.proto"]);
    }

    #[test]
    fn test_cycle_names_both_files() {
        let set = module_set(&[
            ("a.proto", "syntax = \"proto3\"; import \"b.proto\";"),
            ("b.proto", "syntax = \"proto3\"; import \"a.proto\";"),
        ]);
        let err = ImageBuilder::new().build(&set, &options()).unwrap_err();
        match err {
            ModuleError::ImportCycle { cycle } => {
                assert_eq!(cycle, vec!["a.proto", "b.proto", "a.proto"])
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    fn chain(len: usize, closed: bool) -> HashMap<String, Arc<FileDescriptor>> {
        (0..len)
            .map(|i| {
                let path = format!("f{:05}.proto", i);
                let next = if i + 1 < len {
                    Some(format!("f{:05}.proto", i + 1))
                } else if closed {
                    Some("f00000.proto".to_string())
                } else {
                    None
                };
                let descriptor = FileDescriptor {
                    name: path.clone(),
                    dependencies: next.into_iter().collect(),
                    ..Default::default()
                };
                (path, Arc::new(descriptor))
            })
            .collect()
    }

    #[test]
    fn test_long_import_chains() {
        let order = topological_order(&chain(20_000, false)).unwrap();
        assert_eq!(order.first().map(String::as_str), Some("f19999.proto"));
        assert_eq!(order.last().map(String::as_str), Some("f00000.proto"));

        match topological_order(&chain(20_000, true)).unwrap_err() {
            ModuleError::ImportCycle { cycle } => {
                assert_eq!(cycle.len(), 20_001);
                assert_eq!(cycle.first(), cycle.last());
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_import_is_a_cycle() {
        let set = module_set(&[("a.proto", "syntax = \"proto3\"; import \"a.proto\";")]);
        let err = ImageBuilder::new().build(&set, &options()).unwrap_err();
        assert!(matches!(err, ModuleError::ImportCycle { cycle }
            if cycle == vec!["a.proto", "a.proto"]));
    }

    #[test]
    fn test_unused_import_index() {
        let set = module_set(&[
            ("a.proto", "syntax = \"proto3\"; package a; message A {}"),
            ("b.proto", "syntax = \"proto3\"; package b; message B {}"),
            (
                "c.proto",
                "syntax = \"proto3\"; package c; import \"a.proto\"; import \"b.proto\"; \
                 message C { a.A a = 1; }",
            ),
        ]);
        let image = ImageBuilder::new()
            .build(&set, &options().with_target_paths(["c.proto"]))
            .unwrap();
        assert_eq!(image.get_file("c.proto").unwrap().unused_dependency_indexes(), &[1]);
        assert!(image.get_file("b.proto").unwrap().is_import());
    }

    #[test]
    fn test_import_not_found() {
        let set = module_set(&[("a.proto", "syntax = \"proto3\"; import \"missing.proto\";")]);
        let err = ImageBuilder::new().build(&set, &options()).unwrap_err();
        assert!(matches!(err, ModuleError::ImportNotFound { file, import }
            if file == "a.proto" && import == "missing.proto"));
    }

    #[test]
    fn test_duplicate_path_across_modules() {
        let one = Arc::new(MemoryBucket::from_files([("a.proto", "syntax = \"proto3\";")]));
        let two = Arc::new(MemoryBucket::from_files([("a.proto", "syntax = \"proto2\";")]));
        let set = ModuleSet::builder()
            .add_module(Module::builder("one", one).build())
            .add_module(
                Module::builder("two", two)
                    .full_name(ModuleFullName::parse("buf.build/acme/two").unwrap())
                    .build(),
            )
            .build()
            .unwrap();
        let err = ImageBuilder::new().build(&set, &options()).unwrap_err();
        assert!(matches!(err, ModuleError::DuplicatePath { path, first, second }
            if path == "a.proto" && first == "one" && second == "buf.build/acme/two"));
    }

    #[test]
    fn test_unknown_target_path() {
        let set = module_set(&[("a.proto", "syntax = \"proto3\";")]);
        let err = ImageBuilder::new()
            .build(&set, &options().with_target_paths(["nope.proto"]))
            .unwrap_err();
        assert!(matches!(err, ModuleError::FileNotFound(p) if p == "nope.proto"));
    }

    #[test]
    fn test_canceled_build_returns_no_image() {
        let set = module_set(&[("a.proto", "syntax = \"proto3\";")]);
        let token = CancellationToken::new();
        token.cancel();
        let err = ImageBuilder::new()
            .build(&set, &options().with_cancellation(token))
            .unwrap_err();
        assert!(matches!(err, ModuleError::Canceled));
    }

    #[test]
    fn test_syntax_unspecified_and_exclude_imports() {
        let set = module_set(&[
            ("legacy.proto", "package legacy; message L {}"),
            (
                "new.proto",
                "syntax = \"proto3\"; import \"legacy.proto\"; message N { legacy.L l = 1; }",
            ),
        ]);
        let opts = BuildOptions {
            exclude_imports: true,
            ..options().with_target_paths(["new.proto"])
        };
        let image = ImageBuilder::new().build(&set, &opts).unwrap();
        assert_eq!(paths(&image), vec!["new.proto"]);

        let full = ImageBuilder::new().build(&set, &options()).unwrap();
        assert!(full.get_file("legacy.proto").unwrap().is_syntax_unspecified());
        assert!(!full.get_file("new.proto").unwrap().is_syntax_unspecified());
    }

    #[test]
    fn test_dependency_modules_are_not_targets() {
        let dep = Arc::new(MemoryBucket::from_files([(
            "dep/v1/dep.proto",
            "syntax = \"proto3\"; package dep.v1; message D {}",
        )]));
        let local = Arc::new(MemoryBucket::from_files([(
            "app/v1/app.proto",
            "syntax = \"proto3\"; package app.v1; import \"dep/v1/dep.proto\"; \
             message App { dep.v1.D d = 1; }",
        )]));
        let set = ModuleSet::builder()
            .add_module(Module::builder("app", local).build())
            .add_module(
                Module::builder("dep", dep)
                    .full_name(ModuleFullName::parse("buf.build/acme/dep").unwrap())
                    .commit_id("abc")
                    .target(false)
                    .build(),
            )
            .build()
            .unwrap();
        let image = ImageBuilder::new().build(&set, &options()).unwrap();
        let dep_file = image.get_file("dep/v1/dep.proto").unwrap();
        assert!(dep_file.is_import());
        assert_eq!(dep_file.commit_id(), "abc");
        assert_eq!(dep_file.module_full_name().unwrap().to_string(), "buf.build/acme/dep");
        assert_eq!(image.target_files().count(), 1);
    }

    #[test]
    fn test_stale_parses_are_dropped() {
        let builder = ImageBuilder::new();
        for version in 0..5 {
            let content = format!("syntax = \"proto3\"; message V{} {{}}", version);
            let set = module_set(&[("a.proto", content.as_str())]);
            builder.build(&set, &options()).unwrap();
        }
        assert_eq!(builder.cached_parses(), 1);
    }

    #[test]
    fn test_parses_are_memoized_across_builds() {
        let set = module_set(&[
            ("a.proto", "syntax = \"proto3\";"),
            ("b.proto", "syntax = \"proto3\"; import \"a.proto\";"),
        ]);
        let builder = ImageBuilder::new();
        builder.build(&set, &options()).unwrap();
        builder.build(&set, &options()).unwrap();
        assert_eq!(builder.cached_parses(), 2);
    }

    #[test]
    fn test_linked_references_are_fully_qualified() {
        let set = module_set(&[
            ("a.proto", "syntax = \"proto3\"; package acme.a; message A {}"),
            (
                "b.proto",
                "syntax = \"proto3\"; package acme.b; import \"a.proto\"; message B { a.A a = 1; }",
            ),
        ]);
        let image = ImageBuilder::new().build(&set, &options()).unwrap();
        let b = image.get_file("b.proto").unwrap().descriptor();
        assert_eq!(
            b.messages[0].fields[0].field_type,
            crate::image::descriptor::FieldType::Message(".acme.a.A".into())
        );
    }
}
