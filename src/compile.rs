//! Compile scheduler: turns entry files into objects and binaries.
//!
//! For each entry the transitive source set and linker tokens are computed
//! from the file graph; object compilations are deduplicated across entries
//! and run on a worker pool, then each entry links. Both phases skip work
//! whose outputs are newer than every input, and the first failure poisons
//! the build while remaining workers drain.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rayon::prelude::*;
use serde_json::json;

use crate::error::{Error, Result};
use crate::tree::{FileId, FileKind, SourceTree};
use crate::ui::Logger;

/// External tool driver for the object and link phases.
#[derive(Debug, Clone)]
pub struct Compiler {
    /// Command prefix invoked for both compiles and links, e.g. `["g++"]`
    /// or `["ccache", "g++"]`.
    pub tool: Vec<String>,
    pub include_dirs: Vec<PathBuf>,
    pub flags: Vec<String>,
    /// Objects go to `output_dir/obj`, binaries to `output_dir/bin`.
    pub output_dir: PathBuf,
    pub concurrency: usize,
    pub logger: Logger,
}

impl Default for Compiler {
    fn default() -> Self {
        Self {
            tool: vec!["g++".to_string()],
            include_dirs: Vec::new(),
            flags: Vec::new(),
            output_dir: PathBuf::new(),
            concurrency: 0,
            logger: Logger::default(),
        }
    }
}

impl Compiler {
    /// Where the binary for an entry will be written.
    pub fn bin_path(&self, tree: &SourceTree, entry: FileId) -> PathBuf {
        let node = tree.node(entry);
        let name = node.effective_name().unwrap_or_default();
        let mut path = self.output_dir.join("bin").join(name);
        if node.kind == FileKind::Library {
            let mut file = path.into_os_string();
            file.push(".so");
            path = PathBuf::from(file);
        }
        path
    }

    fn object_path(&self, source: &Path) -> PathBuf {
        let base = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = match base.rfind('.') {
            Some(dot) => &base[..dot],
            None => base.as_str(),
        };
        self.output_dir.join("obj").join(format!("{stem}.o"))
    }

    fn include_directives(&self) -> Vec<String> {
        self.include_dirs
            .iter()
            .map(|dir| format!("-I{}", dir.display()))
            .collect()
    }

    fn object_argv(&self, source: &Path, object: &Path) -> Vec<String> {
        let mut argv = self.tool.clone();
        argv.push("-o".to_string());
        argv.push(object.to_string_lossy().into_owned());
        argv.extend(self.flags.iter().cloned());
        argv.extend(self.include_directives());
        argv.push("-c".to_string());
        argv.push(source.to_string_lossy().into_owned());
        argv
    }

    fn link_argv(
        &self,
        binary: &Path,
        shared: bool,
        objects: &[PathBuf],
        libs: &[String],
    ) -> Vec<String> {
        let mut argv = self.tool.clone();
        argv.push("-o".to_string());
        argv.push(binary.to_string_lossy().into_owned());
        if shared {
            argv.push("-shared".to_string());
        }
        argv.extend(self.flags.iter().cloned());
        argv.extend(objects.iter().map(|o| o.to_string_lossy().into_owned()));
        argv.extend(libs.iter().cloned());
        argv
    }

    /// Convenience wrapper over [`compile_all`] for one entry.
    ///
    /// [`compile_all`]: Compiler::compile_all
    pub fn compile(&self, tree: &SourceTree, entry: FileId) -> Result<PathBuf> {
        let mut paths = self.compile_all(tree, &[entry])?;
        Ok(paths.remove(0))
    }

    /// Compile and link every entry, returning binary paths in entry order.
    pub fn compile_all(&self, tree: &SourceTree, entries: &[FileId]) -> Result<Vec<PathBuf>> {
        for sub in ["bin", "obj"] {
            let dir = self.output_dir.join(sub);
            fs::create_dir_all(&dir).map_err(|err| Error::io(&dir, err))?;
        }

        // Partition each entry's transitive closure into sources and linker
        // tokens, and union the sources across entries so each object is
        // built at most once per run.
        let mut entry_sources: Vec<Vec<FileId>> = Vec::with_capacity(entries.len());
        let mut entry_libs: Vec<Vec<String>> = Vec::with_capacity(entries.len());
        let mut unique: HashMap<PathBuf, FileId> = HashMap::new();
        for &entry in entries {
            let mut closure = tree.dep_list_follow_source(entry);
            closure.push(entry);
            let mut sources = Vec::new();
            let mut libs = Vec::new();
            for &dep in &closure {
                let node = tree.node(dep);
                if node.kind == FileKind::Source {
                    sources.push(dep);
                    if let Some(path) = &node.path {
                        unique.insert(path.clone(), dep);
                    }
                }
                libs.extend(node.libs.iter().cloned());
            }
            entry_sources.push(sources);
            entry_libs.push(libs);
        }

        let mut union: Vec<FileId> = unique.into_values().collect();
        union.sort_by_key(|&id| {
            tree.node(id)
                .path
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        });

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency.max(1))
            .build()
            .map_err(|err| Error::config(err.to_string()))?;
        let first_err: Mutex<Option<Error>> = Mutex::new(None);

        // Object phase.
        pool.install(|| {
            union.par_iter().for_each(|&source| {
                if first_err.lock().unwrap().is_some() {
                    return;
                }
                if let Err(err) = self.make_object(tree, source) {
                    let mut cell = first_err.lock().unwrap();
                    if cell.is_none() {
                        *cell = Some(err);
                    }
                }
            });
        });
        if let Some(err) = first_err.lock().unwrap().take() {
            return Err(err);
        }

        self.write_compile_commands(tree, &union)?;

        // Link phase.
        pool.install(|| {
            (0..entries.len()).into_par_iter().for_each(|index| {
                if first_err.lock().unwrap().is_some() {
                    return;
                }
                let objects: Vec<PathBuf> = entry_sources[index]
                    .iter()
                    .filter_map(|&id| tree.node(id).path.as_deref().map(|p| self.object_path(p)))
                    .collect();
                if let Err(err) =
                    self.make_binary(tree, entries[index], &objects, &entry_libs[index])
                {
                    let mut cell = first_err.lock().unwrap();
                    if cell.is_none() {
                        *cell = Some(err);
                    }
                }
            });
        });
        if let Some(err) = first_err.lock().unwrap().take() {
            return Err(err);
        }

        Ok(entries
            .iter()
            .map(|&entry| self.bin_path(tree, entry))
            .collect())
    }

    fn make_object(&self, tree: &SourceTree, source: FileId) -> Result<PathBuf> {
        let node = tree.node(source);
        let path = node
            .path
            .as_ref()
            .ok_or_else(|| Error::config("source node without a path"))?;
        let object = self.object_path(path);

        let mut inputs = vec![path.clone()];
        for dep in tree.dep_list(source) {
            let dep_node = tree.node(dep);
            if dep_node.kind == FileKind::Header {
                if let Some(header) = &dep_node.path {
                    inputs.push(header.clone());
                }
            }
        }
        if !needs_rebuild(&inputs, std::slice::from_ref(&object))? {
            return Ok(object);
        }

        let argv = self.object_argv(path, &object);
        self.logger.command(
            "Compiling",
            &object.file_name().unwrap_or_default().to_string_lossy(),
            &argv,
        );
        run_tool(&argv, path)?;
        Ok(object)
    }

    fn make_binary(
        &self,
        tree: &SourceTree,
        entry: FileId,
        objects: &[PathBuf],
        libs: &[String],
    ) -> Result<PathBuf> {
        let binary = self.bin_path(tree, entry);
        if !needs_rebuild(objects, std::slice::from_ref(&binary))? {
            return Ok(binary);
        }
        let shared = tree.node(entry).kind == FileKind::Library;
        let argv = self.link_argv(&binary, shared, objects, libs);
        self.logger.command(
            "Linking",
            &binary.file_name().unwrap_or_default().to_string_lossy(),
            &argv,
        );
        run_tool(&argv, &binary)?;
        Ok(binary)
    }

    /// Compile database for the whole source union, written next to the
    /// obj and bin directories so language servers can pick it up.
    fn write_compile_commands(&self, tree: &SourceTree, union: &[FileId]) -> Result<()> {
        let directory = tree.src_root.to_string_lossy();
        let entries: Vec<serde_json::Value> = union
            .iter()
            .filter_map(|&id| tree.node(id).path.as_ref())
            .map(|path| {
                let argv = self.object_argv(path, &self.object_path(path));
                json!({
                    "directory": directory,
                    "command": argv.join(" "),
                    "file": path.to_string_lossy(),
                })
            })
            .collect();
        let path = self.output_dir.join("compile_commands.json");
        let text = serde_json::to_string_pretty(&entries)
            .map_err(|err| Error::config(err.to_string()))?;
        fs::write(&path, text).map_err(|err| Error::io(&path, err))
    }
}

fn run_tool(argv: &[String], target: &Path) -> Result<()> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| Error::config("empty compile tool"))?;
    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|err| Error::Compiler {
            file: target.to_path_buf(),
            message: format!("failed to run {program:?}: {err}"),
        })?;
    if !status.success() {
        return Err(Error::Compiler {
            file: target.to_path_buf(),
            message: format!("command exited with {status}"),
        });
    }
    Ok(())
}

/// Rebuild iff the newest input is newer than the oldest output; a missing
/// output counts as infinitely old, an empty input set as the epoch.
fn needs_rebuild(inputs: &[PathBuf], outputs: &[PathBuf]) -> Result<bool> {
    let mut newest_input = UNIX_EPOCH;
    for path in inputs {
        let mtime = fs::metadata(path)
            .and_then(|meta| meta.modified())
            .map_err(|err| Error::io(path, err))?;
        if mtime > newest_input {
            newest_input = mtime;
        }
    }

    let mut oldest_output = SystemTime::now();
    for path in outputs {
        match fs::metadata(path).and_then(|meta| meta.modified()) {
            Ok(mtime) => {
                if mtime < oldest_output {
                    oldest_output = mtime;
                }
            }
            Err(_) => {
                oldest_output = UNIX_EPOCH;
                break;
            }
        }
    }
    Ok(newest_input > oldest_output)
}
