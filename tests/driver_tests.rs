//! End-to-end driver tests: config file in, binaries and symlinks out.

use std::fs;
use std::path::{Path, PathBuf};

use cppdep::driver::{self, BuildOptions};
use cppdep::ui::Logger;

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, contents).unwrap();
    path
}

fn stub_tool_yaml(dir: &Path) -> (String, PathBuf) {
    let script = write(
        dir,
        "fake-cxx.sh",
        "#!/bin/sh\n\
         log=\"$1\"; shift\n\
         printf '%s\\n' \"$*\" >> \"$log\"\n\
         out=\"\"\n\
         while [ \"$#\" -gt 0 ]; do\n\
         \x20 if [ \"$1\" = \"-o\" ]; then out=\"$2\"; fi\n\
         \x20 shift\n\
         done\n\
         touch \"$out\"\n",
    );
    let log = dir.join("fake-cxx.log");
    let yaml = format!(
        "compiler: [\"/bin/sh\", \"{}\", \"{}\"]",
        script.display(),
        log.display()
    );
    (yaml, log)
}

fn project(dir: &Path) -> (PathBuf, PathBuf) {
    let (compiler_yaml, log) = stub_tool_yaml(dir);
    let config = write(
        dir,
        "cppdep.yml",
        &format!(
            "src_dir: src\n\
             build_dir: build\n\
             {compiler_yaml}\n\
             modes:\n\
             \x20 opt:\n\
             \x20   flags: [\"-DOPT\"]\n"
        ),
    );
    write(
        dir,
        "src/main.cc",
        "#include \"a.h\"\nint main(int argc, char **argv) {\n  a();\n  return 0;\n}\n",
    );
    write(dir, "src/a.h", "void a();\n");
    write(dir, "src/a.cc", "#include \"a.h\"\nvoid a() {}\n");
    (config, log)
}

fn options(config: &Path) -> BuildOptions {
    BuildOptions {
        config_path: Some(config.to_path_buf()),
        logger: Logger::silent(),
        ..BuildOptions::default()
    }
}

#[test]
fn builds_autodetected_entries_and_links_current() {
    let dir = tempfile::tempdir().unwrap();
    let (config, _log) = project(dir.path());

    let paths = driver::run(&options(&config)).unwrap();
    assert_eq!(paths, [dir.path().join("build/default/bin/main")]);
    assert!(paths[0].exists());

    let link = dir.path().join("build/bin/main");
    let target = fs::read_link(&link).unwrap();
    assert_eq!(target, PathBuf::from("../default/bin/main"));

    // Rebuilding immediately afterwards points the symlink at the same
    // artifact and must not fail.
    let again = driver::run(&options(&config)).unwrap();
    assert_eq!(again, paths);
}

#[test]
fn modes_add_flags_and_separate_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let (config, log) = project(dir.path());

    let mut opts = options(&config);
    opts.mode = "opt".to_string();
    let paths = driver::run(&opts).unwrap();
    assert_eq!(paths, [dir.path().join("build/opt/bin/main")]);

    let text = fs::read_to_string(&log).unwrap();
    assert!(text.lines().any(|line| line.contains("-DOPT")));
}

#[test]
fn unknown_mode_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (config, _log) = project(dir.path());

    let mut opts = options(&config);
    opts.mode = "nope".to_string();
    let err = driver::run(&opts).unwrap_err();
    assert!(err.to_string().contains("mode"));
}

#[test]
fn list_mode_compiles_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (config, log) = project(dir.path());

    let mut opts = options(&config);
    opts.list = true;
    let paths = driver::run(&opts).unwrap();
    assert!(paths.is_empty());
    assert!(!log.exists(), "list mode ran external commands");
}

#[test]
fn explicit_binary_names_select_entries() {
    let dir = tempfile::tempdir().unwrap();
    let (config, _log) = project(dir.path());
    write(
        dir.path(),
        "src/other.cc",
        "int main(int argc, char **argv) { return 2; }\n",
    );

    let mut opts = options(&config);
    opts.binary_names = vec!["other".to_string()];
    let paths = driver::run(&opts).unwrap();
    assert_eq!(paths, [dir.path().join("build/default/bin/other")]);
    assert!(!dir.path().join("build/default/bin/main").exists());
}

#[test]
fn generators_feed_the_build() {
    let dir = tempfile::tempdir().unwrap();
    let (compiler_yaml, _log) = stub_tool_yaml(dir.path());
    let config = write(
        dir.path(),
        "cppdep.yml",
        &format!(
            "src_dir: src\n\
             build_dir: build\n\
             {compiler_yaml}\n\
             type_generators:\n\
             \x20 - input_ext: \".txtcc\"\n\
             \x20   output_exts: [\".cc\"]\n\
             \x20   command: [\"cp\", \"$CPPDEP_INPUT_FILE\", \"$CPPDEP_OUTPUT_PREFIX.cc\"]\n"
        ),
    );
    write(
        dir.path(),
        "src/tool.txtcc",
        "int main(int argc, char **argv) { return 0; }\n",
    );

    let paths = driver::run(&options(&config)).unwrap();
    assert_eq!(paths, [dir.path().join("build/default/bin/tool")]);

    let generated = dir.path().join("build/gen/tool.cc");
    assert!(generated.exists());

    // A second run with nothing changed must not regenerate.
    let first_mtime = fs::metadata(&generated).unwrap().modified().unwrap();
    driver::run(&options(&config)).unwrap();
    let second_mtime = fs::metadata(&generated).unwrap().modified().unwrap();
    assert_eq!(first_mtime, second_mtime);
}
