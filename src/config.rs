//! Configuration file parsing (`cppdep.yml`) and platform overrides.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

pub const CONFIG_FILE_NAME: &str = "cppdep.yml";

/// The on-disk configuration record. Every field is optional in the file;
/// required values are validated by the driver once the platform overrides
/// have been merged.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub src_dir: PathBuf,
    pub build_dir: PathBuf,
    pub auto_include: bool,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub flags: Vec<String>,
    /// Compile tool command prefix; defaults to `$CXX`, then `g++`.
    pub compiler: Vec<String>,
    /// Additive flag profiles selected with `--mode`.
    pub modes: HashMap<String, ModeConfig>,
    /// Bracket-include filename to linker tokens.
    pub link_libraries: HashMap<String, Vec<String>>,
    /// Shared-library targets built from explicit source lists.
    pub libraries: HashMap<String, LibraryConfig>,
    /// Header path to the sources implementing it.
    pub source_libs: HashMap<String, Vec<String>>,
    pub binary: BinaryConfig,
    pub type_generators: Vec<TypeGeneratorConfig>,
    pub shell_generators: Vec<ShellGeneratorConfig>,
    /// Platform-prefix keyed overrides, merged by `merge_platform`.
    pub platforms: HashMap<String, PlatformConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    pub flags: Vec<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub sources: Vec<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct BinaryConfig {
    pub rename: Vec<RenameRuleConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct RenameRuleConfig {
    pub regex: String,
    pub replace: String,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct TypeGeneratorConfig {
    pub input_ext: String,
    pub output_exts: Vec<String>,
    pub command: Vec<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ShellGeneratorConfig {
    pub input_paths: Vec<PathBuf>,
    pub output_files: Vec<PathBuf>,
    /// Script path relative to the source directory.
    pub path: PathBuf,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub excludes: Vec<String>,
    pub includes: Vec<String>,
    pub flags: Vec<String>,
    pub link_libraries: HashMap<String, Vec<String>>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Merge the overrides of the longest platform key that prefixes
    /// `platform`. List fields append; `link_libraries` entries replace.
    pub fn merge_platform(&mut self, platform: &str) {
        let mut matched: Option<&str> = None;
        for key in self.platforms.keys() {
            if platform.starts_with(key.as_str()) && key.len() > matched.map_or(0, str::len) {
                matched = Some(key.as_str());
            }
        }
        let Some(key) = matched.map(str::to_string) else {
            return;
        };
        let overrides = self.platforms[&key].clone();
        self.excludes.extend(overrides.excludes);
        self.includes.extend(overrides.includes);
        self.flags.extend(overrides.flags);
        for (include, tokens) in overrides.link_libraries {
            self.link_libraries.insert(include, tokens);
        }
    }
}

/// The platform string matched against `platforms` keys, e.g.
/// `linux-x86_64`.
pub fn platform_key() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

/// Walk up from `start` looking for `cppdep.yml`.
pub fn search_upward(start: &Path) -> Option<PathBuf> {
    let mut dir = start;
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
}
