//! Code generators run before scanning so their outputs join the file graph.
//!
//! Two variants share the capability set `{matches, output_paths, generate}`:
//! a type generator fires on every file with a given extension, a shell
//! generator fires on a fixed set of input paths and runs one script.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};
use crate::ui::Logger;

pub const INPUT_DIR_TOKEN: &str = "$CPPDEP_INPUT_DIR";
pub const INPUT_FILE_TOKEN: &str = "$CPPDEP_INPUT_FILE";
pub const OUTPUT_DIR_TOKEN: &str = "$CPPDEP_OUTPUT_DIR";
pub const OUTPUT_PREFIX_TOKEN: &str = "$CPPDEP_OUTPUT_PREFIX";

/// Per-extension generator: one invocation of `command` per matching input,
/// with `$CPPDEP_*` tokens substituted into every argument.
#[derive(Debug, Clone)]
pub struct TypeGenerator {
    pub input_ext: String,
    pub output_exts: Vec<String>,
    pub command: Vec<String>,
}

/// Fixed-input-set generator: one script whose declared outputs land in the
/// gen directory regardless of which input triggered it.
#[derive(Debug, Clone)]
pub struct ShellGenerator {
    pub input_paths: Vec<PathBuf>,
    pub output_files: Vec<PathBuf>,
    pub script_path: PathBuf,
}

#[derive(Debug, Clone)]
pub enum Generator {
    Type(TypeGenerator),
    Shell(ShellGenerator),
}

/// `gen_dir/<basename without extension>` for a given input.
fn output_prefix(input: &Path, gen_dir: &Path) -> PathBuf {
    let base = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = match base.rfind('.') {
        Some(dot) => &base[..dot],
        None => base.as_str(),
    };
    gen_dir.join(stem)
}

impl Generator {
    /// Whether this generator wants `path` as an input. Shell generators
    /// match the path relative to `src_root` exactly against their declared
    /// inputs.
    pub fn matches(&self, path: &Path, src_root: &Path) -> bool {
        match self {
            Generator::Type(gen) => path.to_string_lossy().ends_with(&gen.input_ext),
            Generator::Shell(gen) => match path.strip_prefix(src_root) {
                Ok(relative) => gen.input_paths.iter().any(|input| input.as_path() == relative),
                Err(_) => false,
            },
        }
    }

    /// The files this generator will produce for `input` under `gen_dir`.
    pub fn output_paths(&self, input: &Path, gen_dir: &Path) -> Vec<PathBuf> {
        match self {
            Generator::Type(gen) => {
                let prefix = output_prefix(input, gen_dir);
                gen.output_exts
                    .iter()
                    .map(|ext| {
                        let mut path = prefix.clone().into_os_string();
                        path.push(ext);
                        PathBuf::from(path)
                    })
                    .collect()
            }
            Generator::Shell(gen) => gen
                .output_files
                .iter()
                .map(|out| gen_dir.join(out))
                .collect(),
        }
    }

    /// Run the generator for `input`, writing outputs under `gen_dir`.
    pub fn generate(&self, input: &Path, gen_dir: &Path, logger: &Logger) -> Result<()> {
        let outputs: Vec<String> = self
            .output_paths(input, gen_dir)
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        logger.generating(&outputs);

        let mut cmd = match self {
            Generator::Type(gen) => {
                let substitutions = [
                    (
                        INPUT_DIR_TOKEN,
                        input
                            .parent()
                            .unwrap_or_else(|| Path::new(""))
                            .to_string_lossy()
                            .into_owned(),
                    ),
                    (INPUT_FILE_TOKEN, input.to_string_lossy().into_owned()),
                    (OUTPUT_DIR_TOKEN, gen_dir.to_string_lossy().into_owned()),
                    (
                        OUTPUT_PREFIX_TOKEN,
                        output_prefix(input, gen_dir).to_string_lossy().into_owned(),
                    ),
                ];
                let (program, args) = gen
                    .command
                    .split_first()
                    .ok_or_else(|| Error::config("type generator has an empty command"))?;
                let mut cmd = Command::new(program);
                for arg in args {
                    let mut arg = arg.clone();
                    for (token, value) in &substitutions {
                        arg = arg.replace(token, value);
                    }
                    cmd.arg(arg);
                }
                cmd
            }
            Generator::Shell(gen) => {
                let mut cmd = Command::new(&gen.script_path);
                cmd.current_dir(gen_dir);
                cmd
            }
        };

        let status = cmd.status().map_err(|err| Error::Generator {
            input: input.to_path_buf(),
            message: err.to_string(),
        })?;
        if !status.success() {
            return Err(Error::Generator {
                input: input.to_path_buf(),
                message: format!("command exited with {status}"),
            });
        }
        Ok(())
    }
}
