//! Source tree discovery and the file-level dependency graph.
//!
//! `SourceTree` walks a root directory, classifies headers and sources, runs
//! generators, scans every file for includes, and resolves them into a graph
//! of `FileNode`s held in an arena and addressed by `FileId`. Traversals use
//! a per-call visited set, so header cycles are safe and queries can run
//! concurrently.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use rayon::prelude::*;
use regex::Regex;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::generator::Generator;
use crate::scanner::{IncludeKind, IncludeScanner};
use crate::ui::Logger;

static MAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*int\s+main\s*\(\s*int\s+\w+\s*,\s*char\s*\*\*?\s*\w+\s*\[?\s*\]?\s*\)\s*\{")
        .expect("main signature regex")
});

/// Index of a `FileNode` within its owning `SourceTree`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Header,
    Source,
    /// A named group of sources built into a shared library. Library nodes
    /// have no path of their own.
    Library,
}

/// One discovered or generated file.
#[derive(Debug)]
pub struct FileNode {
    pub path: Option<PathBuf>,
    pub kind: FileKind,
    pub mod_time: SystemTime,
    pub binary_name: Option<String>,
    /// Files directly included by this one, in directive order, resolved
    /// against the search path. Unresolved includes are dropped.
    pub deps: Vec<FileId>,
    /// For a header, the sources that implement it.
    pub impl_files: Vec<FileId>,
    /// Linker tokens contributed by this file's bracket includes.
    pub libs: Vec<String>,
}

impl FileNode {
    /// Base name without extension; the default binary name.
    pub fn default_name(&self) -> Option<String> {
        let path = self.path.as_ref()?;
        let base = path.file_name()?.to_string_lossy();
        Some(match base.rfind('.') {
            Some(dot) => base[..dot].to_string(),
            None => base.into_owned(),
        })
    }

    /// Binary name override if set, else the default name.
    pub fn effective_name(&self) -> Option<String> {
        self.binary_name.clone().or_else(|| self.default_name())
    }
}

/// A rename rule: `regex` must match the entire default binary name; the
/// first rule that does supplies the replacement (capture groups allowed).
#[derive(Debug, Clone)]
pub struct RenameRule {
    pub regex: String,
    pub replace: String,
}

/// Result of scanning one file, applied to the arena after the worker pool
/// joins so each node is written exactly once.
struct ScanOutcome {
    id: FileId,
    impl_files: Vec<FileId>,
    deps: Vec<FileId>,
    libs: Vec<String>,
}

/// The file graph container. Configure the public fields, call [`process`]
/// once, then query.
///
/// [`process`]: SourceTree::process
pub struct SourceTree {
    pub src_root: PathBuf,
    /// Extra header search directories. With `auto_include`, every walked
    /// directory is appended here.
    pub include_dirs: Vec<PathBuf>,
    /// Subtrees pruned from the walk.
    pub exclude_dirs: Vec<PathBuf>,
    pub header_exts: Vec<String>,
    pub source_exts: Vec<String>,
    /// Library name to the sources compiled together into a shared library.
    pub libraries: HashMap<String, Vec<String>>,
    /// Bracket-include filename to the linker tokens it requires, e.g.
    /// `{"zlib.h": ["-lz"]}` or `{"libpq-fe.h": ["-L/usr/pgsql/lib", "-lpq"]}`.
    pub link_libraries: HashMap<String, Vec<String>>,
    /// Header path (relative to the root) to the source paths implementing
    /// it, for headers realized by more than one source.
    pub source_libs: HashMap<String, Vec<String>>,
    pub generators: Vec<Generator>,
    /// Where generator output goes (`<build_dir>/gen`). Required when
    /// generators are configured.
    pub build_dir: Option<PathBuf>,
    pub concurrency: usize,
    pub fast_scanning: bool,
    pub auto_include: bool,
    pub logger: Logger,

    nodes: Vec<FileNode>,
    index: HashMap<PathBuf, FileId>,
    source_ids: Vec<FileId>,
    processed: bool,
}

impl Default for SourceTree {
    fn default() -> Self {
        Self {
            src_root: PathBuf::new(),
            include_dirs: Vec::new(),
            exclude_dirs: Vec::new(),
            header_exts: Vec::new(),
            source_exts: Vec::new(),
            libraries: HashMap::new(),
            link_libraries: HashMap::new(),
            source_libs: HashMap::new(),
            generators: Vec::new(),
            build_dir: None,
            concurrency: 0,
            fast_scanning: false,
            auto_include: false,
            logger: Logger::default(),
            nodes: Vec::new(),
            index: HashMap::new(),
            source_ids: Vec::new(),
            processed: false,
        }
    }
}

impl SourceTree {
    pub fn new(src_root: impl Into<PathBuf>) -> Self {
        Self {
            src_root: src_root.into(),
            ..Self::default()
        }
    }

    pub fn node(&self, id: FileId) -> &FileNode {
        &self.nodes[id.0]
    }

    /// Entries of kind Source or Library that may become binaries.
    pub fn sources(&self) -> &[FileId] {
        &self.source_ids
    }

    /// Where generator output is written.
    pub fn gen_dir(&self) -> Option<PathBuf> {
        self.build_dir.as_ref().map(|dir| dir.join("gen"))
    }

    fn setup(&mut self) -> Result<()> {
        if self.src_root.as_os_str().is_empty() {
            return Err(Error::config("src_dir must not be empty"));
        }
        self.src_root =
            std::path::absolute(&self.src_root).map_err(|err| Error::io(&self.src_root, err))?;
        for dir in &mut self.include_dirs {
            if !dir.is_absolute() {
                *dir = self.src_root.join(&*dir);
            }
        }
        for dir in &mut self.exclude_dirs {
            if !dir.is_absolute() {
                *dir = self.src_root.join(&*dir);
            }
        }
        if self.header_exts.is_empty() {
            self.header_exts = [".h", ".hpp", ".hh", ".hxx"]
                .map(str::to_string)
                .to_vec();
        }
        if self.source_exts.is_empty() {
            self.source_exts = [".cc", ".cxx", ".c"].map(str::to_string).to_vec();
        }
        if self.concurrency == 0 {
            self.concurrency = 1;
        }
        if !self.generators.is_empty() && self.build_dir.is_none() {
            return Err(Error::config(
                "build_dir must be set when generators are used",
            ));
        }
        if let Some(dir) = self.build_dir.take() {
            self.build_dir = Some(std::path::absolute(&dir).map_err(|err| Error::io(&dir, err))?);
        }
        Ok(())
    }

    /// Classify `path` by extension and add it to the arena. Files with
    /// unknown extensions and already-seen paths are ignored.
    fn insert_file(&mut self, path: &Path, mod_time: SystemTime) {
        let ext = match path.extension() {
            Some(ext) => format!(".{}", ext.to_string_lossy()),
            None => return,
        };
        let is_source = self.source_exts.iter().any(|e| e == &ext);
        if !is_source && !self.header_exts.iter().any(|e| e == &ext) {
            return;
        }
        if self.index.contains_key(path) {
            return;
        }
        let id = FileId(self.nodes.len());
        self.nodes.push(FileNode {
            path: Some(path.to_path_buf()),
            kind: if is_source {
                FileKind::Source
            } else {
                FileKind::Header
            },
            mod_time,
            binary_name: None,
            deps: Vec::new(),
            impl_files: Vec::new(),
            libs: Vec::new(),
        });
        self.index.insert(path.to_path_buf(), id);
        if is_source {
            self.source_ids.push(id);
        }
    }

    /// Walk, generate, and scan the tree. Call exactly once.
    pub fn process(&mut self) -> Result<()> {
        if self.processed {
            return Err(Error::config("source tree already processed"));
        }
        self.setup()?;

        // Walk: classify files and collect pending generator inputs.
        let mut pending: Vec<(PathBuf, SystemTime, usize)> = Vec::new();
        let mut walker = WalkDir::new(&self.src_root)
            .sort_by_file_name()
            .into_iter();
        while let Some(entry) = walker.next() {
            let entry = entry.map_err(|err| {
                let path = err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| self.src_root.clone());
                match err.into_io_error() {
                    Some(io) => Error::io(&path, io),
                    None => Error::config(format!("walk failed under {}", path.display())),
                }
            })?;
            let path = entry.path().to_path_buf();
            if entry.file_type().is_dir() {
                if self.exclude_dirs.iter().any(|dir| dir == &path) {
                    walker.skip_current_dir();
                    continue;
                }
                if self.auto_include {
                    self.include_dirs.push(path);
                }
                continue;
            }
            let mod_time = entry
                .metadata()
                .map_err(|err| match err.into_io_error() {
                    Some(io) => Error::io(&path, io),
                    None => Error::config(format!("stat failed for {}", path.display())),
                })?
                .modified()
                .map_err(|err| Error::io(&path, err))?;
            for (index, gen) in self.generators.iter().enumerate() {
                if gen.matches(&path, &self.src_root) {
                    pending.push((path.clone(), mod_time, index));
                }
            }
            self.insert_file(&path, mod_time);
        }

        // Generate: stale outputs are rebuilt, then every output joins the
        // tree as a first-class file. Outputs are not re-offered to
        // generators.
        if let Some(gen_dir) = self.gen_dir() {
            fs::create_dir_all(&gen_dir).map_err(|err| Error::io(&gen_dir, err))?;
            self.include_dirs.push(gen_dir.clone());
            let mut executed: HashSet<Vec<PathBuf>> = HashSet::new();
            for (input, input_mtime, gen_index) in pending {
                let gen = &self.generators[gen_index];
                let outputs = gen.output_paths(&input, &gen_dir);
                let Some(oldest_output) = outputs.iter().map(|p| mtime_or_epoch(p)).min() else {
                    continue;
                };
                if oldest_output < input_mtime && !executed.contains(&outputs) {
                    gen.generate(&input, &gen_dir, &self.logger)?;
                    executed.insert(outputs.clone());
                }
                for output in outputs {
                    let mod_time = fs::metadata(&output)
                        .and_then(|meta| meta.modified())
                        .map_err(|err| Error::io(&output, err))?;
                    self.insert_file(&output, mod_time);
                }
            }
        }

        // Library targets: one pathless node per configured library, its
        // deps being the referenced sources.
        let mut library_names: Vec<String> = self.libraries.keys().cloned().collect();
        library_names.sort();
        for name in library_names {
            let mut deps = Vec::new();
            for source in &self.libraries[&name] {
                let path = self.src_root.join(source);
                let id = self.index.get(&path).copied().ok_or_else(|| {
                    Error::config(format!(
                        "unable to find source {source:?} for library {name:?}"
                    ))
                })?;
                deps.push(id);
            }
            let id = FileId(self.nodes.len());
            self.nodes.push(FileNode {
                path: None,
                kind: FileKind::Library,
                mod_time: UNIX_EPOCH,
                binary_name: Some(name),
                deps,
                impl_files: Vec::new(),
                libs: Vec::new(),
            });
            self.source_ids.push(id);
        }

        // Resolve source_libs to node ids up front; a missing source is a
        // configuration error.
        let mut source_libs: HashMap<PathBuf, Vec<FileId>> = HashMap::new();
        for (header, impls) in &self.source_libs {
            let mut ids = Vec::new();
            for source in impls {
                let path = self.src_root.join(source);
                let id = self.index.get(&path).copied().ok_or_else(|| {
                    Error::config(format!(
                        "unable to find source {source:?} for source_libs entry {header:?}"
                    ))
                })?;
                ids.push(id);
            }
            source_libs.insert(self.src_root.join(header), ids);
        }

        // Scan & resolve across a worker pool. Each worker produces the full
        // dep/impl/libs set for its file; results are applied once the pool
        // joins. The first I/O error is kept, the phase still drains.
        let tasks: Vec<(FileId, PathBuf, FileKind)> = self
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(index, node)| {
                node.path
                    .as_ref()
                    .map(|path| (FileId(index), path.clone(), node.kind))
            })
            .collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .build()
            .map_err(|err| Error::config(err.to_string()))?;
        let first_err: Mutex<Option<Error>> = Mutex::new(None);
        let outcomes: Vec<ScanOutcome> = pool.install(|| {
            tasks
                .par_iter()
                .filter_map(|(id, path, kind)| {
                    match self.scan_file(*id, path, *kind, &source_libs) {
                        Ok(outcome) => Some(outcome),
                        Err(err) => {
                            let mut cell = first_err.lock().unwrap();
                            if cell.is_none() {
                                *cell = Some(err);
                            }
                            None
                        }
                    }
                })
                .collect()
        });
        for outcome in outcomes {
            let node = &mut self.nodes[outcome.id.0];
            node.impl_files = outcome.impl_files;
            node.deps = outcome.deps;
            node.libs = outcome.libs;
        }
        self.processed = true;
        if let Some(err) = first_err.into_inner().unwrap() {
            return Err(err);
        }
        Ok(())
    }

    fn scan_file(
        &self,
        id: FileId,
        path: &Path,
        kind: FileKind,
        source_libs: &HashMap<PathBuf, Vec<FileId>>,
    ) -> Result<ScanOutcome> {
        let file = fs::File::open(path).map_err(|err| Error::io(path, err))?;
        let reader = BufReader::new(file);
        let scanner = if self.fast_scanning {
            IncludeScanner::fast(reader)
        } else {
            IncludeScanner::new(reader)
        };

        let mut impl_files = Vec::new();
        if kind == FileKind::Header {
            if let Some(ids) = source_libs.get(path) {
                impl_files = ids.clone();
            }
            if impl_files.is_empty() {
                if let Some(pair) = self.basename_pair(path) {
                    impl_files.push(pair);
                }
            }
        }

        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut deps = Vec::new();
        let mut seen = HashSet::new();
        let mut libs = Vec::new();
        for item in scanner {
            let include = item.map_err(|err| Error::io(path, err))?;
            if include.kind == IncludeKind::Bracket {
                if let Some(tokens) = self.link_libraries.get(&include.text) {
                    libs.extend(tokens.iter().cloned());
                }
            }
            for dir in std::iter::once(&parent).chain(self.include_dirs.iter()) {
                let candidate = dir.join(&include.text);
                if let Some(&dep) = self.index.get(&candidate) {
                    if dep != id && seen.insert(dep) {
                        deps.push(dep);
                    }
                    break;
                }
            }
        }
        Ok(ScanOutcome {
            id,
            impl_files,
            deps,
            libs,
        })
    }

    /// Same-directory same-basename source for a header, if any.
    fn basename_pair(&self, header: &Path) -> Option<FileId> {
        let text = header.to_string_lossy();
        let dot = text.rfind('.')?;
        for ext in &self.source_exts {
            let candidate = PathBuf::from(format!("{}{}", &text[..dot], ext));
            if let Some(&id) = self.index.get(&candidate) {
                return Some(id);
            }
        }
        None
    }

    /// Transitive closure over `deps`, depth-first in directive order, each
    /// node at most once, excluding the root.
    pub fn dep_list(&self, id: FileId) -> Vec<FileId> {
        self.collect_deps(id, false)
    }

    /// Like [`dep_list`], additionally recursing through the `impl_files`
    /// of every header encountered: everything needed to build a binary
    /// from a main source.
    ///
    /// [`dep_list`]: SourceTree::dep_list
    pub fn dep_list_follow_source(&self, id: FileId) -> Vec<FileId> {
        self.collect_deps(id, true)
    }

    fn collect_deps(&self, root: FileId, follow_source: bool) -> Vec<FileId> {
        let mut visited = HashSet::from([root]);
        let mut list = Vec::new();
        self.walk_deps(root, follow_source, &mut visited, &mut list);
        list
    }

    fn walk_deps(
        &self,
        id: FileId,
        follow_source: bool,
        visited: &mut HashSet<FileId>,
        list: &mut Vec<FileId>,
    ) {
        let node = &self.nodes[id.0];
        for &dep in &node.deps {
            if visited.insert(dep) {
                list.push(dep);
                self.walk_deps(dep, follow_source, visited, list);
            }
        }
        if follow_source && node.kind == FileKind::Header {
            for &impl_id in &node.impl_files {
                if visited.insert(impl_id) {
                    list.push(impl_id);
                    self.walk_deps(impl_id, follow_source, visited, list);
                }
            }
        }
    }

    /// Files no other file reaches (via `deps` or `impl_files`) that define
    /// a `main(int, char**)`. These are the autodetected binary entries.
    pub fn find_main_files(&self) -> Result<Vec<FileId>> {
        let mut in_degree: HashMap<FileId, usize> = HashMap::new();
        for &source in &self.source_ids {
            in_degree.entry(source).or_insert(0);
            for dep in self.dep_list_follow_source(source) {
                *in_degree.entry(dep).or_insert(0) += 1;
            }
        }
        let candidates: Vec<(FileId, PathBuf)> = self
            .source_ids
            .iter()
            .filter(|id| in_degree.get(*id) == Some(&0))
            .filter_map(|&id| self.nodes[id.0].path.clone().map(|path| (id, path)))
            .collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency.max(1))
            .build()
            .map_err(|err| Error::config(err.to_string()))?;
        let checked: Vec<Result<bool>> = pool.install(|| {
            candidates
                .par_iter()
                .map(|(_, path)| {
                    let bytes = fs::read(path).map_err(|err| Error::io(path, err))?;
                    let text = String::from_utf8_lossy(&bytes);
                    Ok(text.lines().any(|line| MAIN_RE.is_match(line)))
                })
                .collect()
        });

        let mut mains = Vec::new();
        for ((id, _), has_main) in candidates.into_iter().zip(checked) {
            if has_main? {
                mains.push(id);
            }
        }
        Ok(mains)
    }

    /// First source whose binary name matches, else first whose default
    /// name matches.
    pub fn find_source(&self, name: &str) -> Option<FileId> {
        self.source_ids
            .iter()
            .copied()
            .find(|&id| self.nodes[id.0].binary_name.as_deref() == Some(name))
            .or_else(|| {
                self.source_ids
                    .iter()
                    .copied()
                    .find(|&id| self.nodes[id.0].default_name().as_deref() == Some(name))
            })
    }

    /// All sources matching a glob pattern. A pattern without a separator
    /// matches effective binary names; one with a separator matches paths
    /// relative to the source root. Each effective name is emitted once,
    /// renamed sources winning over default-named ones.
    pub fn find_sources(&self, pattern: &str) -> Result<Vec<FileId>> {
        let use_full_path = pattern.contains(std::path::MAIN_SEPARATOR);
        let pattern_text = if use_full_path {
            self.src_root.join(pattern).to_string_lossy().into_owned()
        } else {
            pattern.to_string()
        };
        let compiled = glob::Pattern::new(&pattern_text)
            .map_err(|err| Error::pattern(pattern_text.clone(), err))?;

        let mut found_names: HashSet<String> = HashSet::new();
        let mut matches = Vec::new();
        let renamed_first = self
            .source_ids
            .iter()
            .filter(|&&id| self.nodes[id.0].binary_name.is_some())
            .chain(
                self.source_ids
                    .iter()
                    .filter(|&&id| self.nodes[id.0].binary_name.is_none()),
            );
        for &id in renamed_first {
            let node = &self.nodes[id.0];
            let qualified = match (&node.binary_name, &node.path) {
                (Some(name), Some(path)) => path
                    .parent()
                    .unwrap_or_else(|| Path::new(""))
                    .join(name)
                    .to_string_lossy()
                    .into_owned(),
                (Some(name), None) => name.clone(),
                (None, Some(path)) => {
                    let text = path.to_string_lossy();
                    match text.rfind('.') {
                        Some(dot) => text[..dot].to_string(),
                        None => text.into_owned(),
                    }
                }
                (None, None) => continue,
            };
            let base = Path::new(&qualified)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| qualified.clone());
            if found_names.contains(&base) {
                continue;
            }
            let candidate = if use_full_path { &qualified } else { &base };
            if compiled.matches(candidate) {
                found_names.insert(base);
                matches.push(id);
            }
        }
        Ok(matches)
    }

    /// Apply rename rules to every source's default name. A rule applies
    /// only when its regex matches the entire name; the first matching rule
    /// wins.
    pub fn rename(&mut self, rules: &[RenameRule]) -> Result<()> {
        let mut compiled = Vec::new();
        for rule in rules {
            compiled.push(
                Regex::new(&rule.regex).map_err(|err| Error::pattern(rule.regex.clone(), err))?,
            );
        }
        for index in 0..self.source_ids.len() {
            let id = self.source_ids[index];
            let Some(name) = self.nodes[id.0].default_name() else {
                continue;
            };
            for (re, rule) in compiled.iter().zip(rules) {
                let Some(found) = re.find(&name) else { continue };
                if found.start() == 0 && found.end() == name.len() {
                    let renamed = re.replace(&name, rule.replace.as_str()).into_owned();
                    self.nodes[id.0].binary_name = Some(renamed);
                    break;
                }
            }
        }
        Ok(())
    }
}

fn mtime_or_epoch(path: &Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .unwrap_or(UNIX_EPOCH)
}
