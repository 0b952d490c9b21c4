//! Ties the configuration, the source tree, and the compiler together.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::compile::Compiler;
use crate::config::{self, Config};
use crate::generator::{Generator, ShellGenerator, TypeGenerator};
use crate::tree::{FileId, RenameRule, SourceTree};
use crate::ui::Logger;

/// Options collected from the command line.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub config_path: Option<PathBuf>,
    pub src_dir: Option<PathBuf>,
    pub mode: String,
    pub concurrency: usize,
    pub fast_scanning: bool,
    pub list: bool,
    pub binary_names: Vec<String>,
    pub logger: Logger,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            config_path: None,
            src_dir: None,
            mode: "default".to_string(),
            concurrency: 1,
            fast_scanning: false,
            list: false,
            binary_names: Vec::new(),
            logger: Logger::default(),
        }
    }
}

struct ResolvedConfig {
    config: Config,
    src_dir: PathBuf,
    build_dir: PathBuf,
}

fn resolve(opts: &BuildOptions) -> Result<ResolvedConfig> {
    let config_path = match &opts.config_path {
        Some(path) => path.clone(),
        None => {
            let cwd = std::env::current_dir().context("failed to get working directory")?;
            config::search_upward(&cwd).with_context(|| {
                format!(
                    "no config file provided and no {} found in path",
                    config::CONFIG_FILE_NAME
                )
            })?
        }
    };
    let mut config = Config::load(&config_path)?;
    config.merge_platform(&config::platform_key());

    let config_dir = config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    if config.build_dir.as_os_str().is_empty() {
        bail!("build_dir must be set in {}", config_path.display());
    }
    let build_dir = if config.build_dir.is_absolute() {
        config.build_dir.clone()
    } else {
        config_dir.join(&config.build_dir)
    };

    let src_dir = match &opts.src_dir {
        Some(dir) => dir.clone(),
        None => {
            if config.src_dir.as_os_str().is_empty() {
                bail!("a source directory must be set through --src or src_dir");
            }
            if config.src_dir.is_absolute() {
                config.src_dir.clone()
            } else {
                config_dir.join(&config.src_dir)
            }
        }
    };

    config.modes.entry("default".to_string()).or_default();
    if !config.modes.contains_key(&opts.mode) {
        bail!("cannot find requested mode {:?}", opts.mode);
    }

    Ok(ResolvedConfig {
        config,
        src_dir,
        build_dir,
    })
}

/// The source directory the current configuration points at; used by the
/// watch loop.
pub fn source_dir(opts: &BuildOptions) -> Result<PathBuf> {
    Ok(resolve(opts)?.src_dir)
}

fn generators_from(config: &Config, src_dir: &Path) -> Vec<Generator> {
    let mut generators = Vec::new();
    for gen in &config.type_generators {
        generators.push(Generator::Type(TypeGenerator {
            input_ext: gen.input_ext.clone(),
            output_exts: gen.output_exts.clone(),
            command: gen.command.clone(),
        }));
    }
    for gen in &config.shell_generators {
        generators.push(Generator::Shell(ShellGenerator {
            input_paths: gen.input_paths.clone(),
            output_files: gen.output_files.clone(),
            script_path: src_dir.join(&gen.path),
        }));
    }
    generators
}

fn compile_tool(config: &Config) -> Vec<String> {
    if !config.compiler.is_empty() {
        return config.compiler.clone();
    }
    if let Ok(cxx) = std::env::var("CXX") {
        return vec![cxx];
    }
    vec!["g++".to_string()]
}

/// Run one full build (or listing). Returns the produced binary paths.
pub fn run(opts: &BuildOptions) -> Result<Vec<PathBuf>> {
    let ResolvedConfig {
        config,
        src_dir,
        build_dir,
    } = resolve(opts)?;
    fs::create_dir_all(&build_dir)
        .with_context(|| format!("failed to create build dir {}", build_dir.display()))?;

    let mut tree = SourceTree::new(&src_dir);
    tree.auto_include = config.auto_include;
    tree.include_dirs = config.includes.iter().map(PathBuf::from).collect();
    tree.exclude_dirs = config.excludes.iter().map(PathBuf::from).collect();
    tree.link_libraries = config.link_libraries.clone();
    tree.libraries = config
        .libraries
        .iter()
        .map(|(name, lib)| (name.clone(), lib.sources.clone()))
        .collect();
    tree.source_libs = config.source_libs.clone();
    tree.generators = generators_from(&config, &src_dir);
    tree.build_dir = Some(build_dir.clone());
    tree.concurrency = opts.concurrency;
    tree.fast_scanning = opts.fast_scanning;
    tree.logger = opts.logger;
    tree.process()
        .with_context(|| format!("failed to process source directory {}", src_dir.display()))?;

    let rules: Vec<RenameRule> = config
        .binary
        .rename
        .iter()
        .map(|rule| RenameRule {
            regex: rule.regex.clone(),
            replace: rule.replace.clone(),
        })
        .collect();
    tree.rename(&rules).context("failed to rename binaries")?;

    let mut flags = config.flags.clone();
    flags.extend(config.modes[&opts.mode].flags.iter().cloned());
    let compiler = Compiler {
        tool: compile_tool(&config),
        include_dirs: tree.include_dirs.clone(),
        flags,
        output_dir: build_dir.join(&opts.mode),
        concurrency: opts.concurrency,
        logger: opts.logger,
    };

    let mut entries: Vec<FileId> = Vec::new();
    let names = if opts.binary_names.is_empty() {
        vec!["*".to_string()]
    } else {
        opts.binary_names.clone()
    };
    for name in &names {
        if name == "*" {
            entries.extend(
                tree.find_main_files()
                    .context("failed to autodetect main files")?,
            );
        } else {
            entries.extend(
                tree.find_sources(name)
                    .with_context(|| format!("invalid pattern {name:?}"))?,
            );
        }
    }

    if opts.list {
        let mut sorted = entries;
        sorted.sort_by_key(|&id| {
            tree.node(id)
                .path
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        for &entry in &sorted {
            opts.logger
                .info(&compiler.bin_path(&tree, entry).display().to_string());
        }
        return Ok(Vec::new());
    }

    let bin_paths = compiler.compile_all(&tree, &entries)?;
    link_current(&build_dir, &bin_paths)?;
    Ok(bin_paths)
}

/// Point `build_dir/bin/<name>` at the freshly built artifact for each
/// binary, replacing stale links and leaving current ones alone.
fn link_current(build_dir: &Path, bin_paths: &[PathBuf]) -> Result<()> {
    let bin_dir = build_dir.join("bin");
    fs::create_dir_all(&bin_dir)
        .with_context(|| format!("failed to create {}", bin_dir.display()))?;
    for path in bin_paths {
        let Some(name) = path.file_name() else {
            continue;
        };
        let link = bin_dir.join(name);
        let target = PathBuf::from("..").join(
            path.strip_prefix(build_dir)
                .with_context(|| format!("binary {} outside build dir", path.display()))?,
        );
        match fs::read_link(&link) {
            Ok(existing) if existing == target => continue,
            Ok(_) => fs::remove_file(&link)
                .with_context(|| format!("failed to remove old symlink {}", link.display()))?,
            Err(_) => {}
        }
        make_link(&target, &link)
            .with_context(|| format!("failed to symlink {}", link.display()))?;
    }
    Ok(())
}

#[cfg(unix)]
fn make_link(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn make_link(target: &Path, link: &Path) -> std::io::Result<()> {
    // Symlinks need privileges on some platforms; fall back to a copy.
    fs::copy(link.parent().unwrap_or_else(|| Path::new(".")).join(target), link).map(|_| ())
}
