//! Compile scheduler tests.
//!
//! Scheduling, deduplication, and staleness are asserted with a stub
//! compile tool (a shell script that records its argv and touches its `-o`
//! target), so they run without a real toolchain. One smoke test uses g++
//! and skips itself when no compiler is installed.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread::sleep;
use std::time::Duration;

use cppdep::compile::Compiler;
use cppdep::error::Error;
use cppdep::tree::{RenameRule, SourceTree};
use cppdep::ui::Logger;

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, contents).unwrap();
    path
}

/// A stand-in compile tool: logs every invocation and touches the file
/// named by `-o`.
fn stub_tool(dir: &Path) -> (Vec<String>, PathBuf) {
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
    let tool = vec![
        "/bin/sh".to_string(),
        script.display().to_string(),
        log.display().to_string(),
    ];
    (tool, log)
}

/// (object compilations, links) recorded by the stub tool so far.
fn invocations(log: &Path) -> (usize, usize) {
    let text = fs::read_to_string(log).unwrap_or_default();
    let compiles = text.lines().filter(|line| line.contains(" -c ")).count();
    let links = text
        .lines()
        .filter(|line| !line.is_empty() && !line.contains(" -c "))
        .count();
    (compiles, links)
}

fn simple_tree(root: &Path) {
    write(
        root,
        "src/main.cc",
        "#include \"a.h\"\nint main(int argc, char **argv) {\n  a();\n  return 0;\n}\n",
    );
    write(root, "src/a.h", "void a();\n");
    write(
        root,
        "src/a.cc",
        "#include \"a.h\"\n#include <cstdio>\nvoid a() { printf(\"Hello World!\\n\"); }\n",
    );
}

fn processed_tree(root: &Path) -> SourceTree {
    let mut st = SourceTree::new(root.join("src"));
    st.logger = Logger::silent();
    st.process().unwrap();
    st
}

#[test]
fn incremental_build_skips_unchanged_work() {
    let dir = tempfile::tempdir().unwrap();
    simple_tree(dir.path());
    let (tool, log) = stub_tool(dir.path());
    let st = processed_tree(dir.path());
    let main = st.find_source("main").unwrap();

    let compiler = Compiler {
        tool,
        output_dir: dir.path().join("out"),
        logger: Logger::silent(),
        ..Compiler::default()
    };

    let binary = compiler.compile(&st, main).unwrap();
    assert_eq!(binary, dir.path().join("out/bin/main"));
    assert!(dir.path().join("out/obj/main.o").exists());
    assert!(dir.path().join("out/obj/a.o").exists());
    assert!(binary.exists());
    assert_eq!(invocations(&log), (2, 1));

    // Nothing changed: the second run must execute no external commands.
    compiler.compile(&st, main).unwrap();
    assert_eq!(invocations(&log), (2, 1));

    // Touching a header recompiles every dependent source and relinks.
    sleep(Duration::from_millis(30));
    write(dir.path(), "src/a.h", "void a();\n");
    compiler.compile(&st, main).unwrap();
    assert_eq!(invocations(&log), (4, 2));

    // Touching one source recompiles only it and relinks.
    sleep(Duration::from_millis(30));
    write(
        dir.path(),
        "src/main.cc",
        "#include \"a.h\"\nint main(int argc, char **argv) {\n  a();\n  return 0;\n}\n",
    );
    compiler.compile(&st, main).unwrap();
    assert_eq!(invocations(&log), (5, 3));
}

#[test]
fn compile_all_builds_shared_objects_once() {
    let dir = tempfile::tempdir().unwrap();
    simple_tree(dir.path());
    write(
        dir.path(),
        "src/mainb.cc",
        "#include \"a.h\"\nint main(int argc, char **argv) {\n  a();\n  return 1;\n}\n",
    );
    let (tool, log) = stub_tool(dir.path());
    let st = processed_tree(dir.path());

    let compiler = Compiler {
        tool,
        output_dir: dir.path().join("out"),
        logger: Logger::silent(),
        ..Compiler::default()
    };
    let entries = [
        st.find_source("main").unwrap(),
        st.find_source("mainb").unwrap(),
    ];
    let paths = compiler.compile_all(&st, &entries).unwrap();

    assert_eq!(
        paths,
        [
            dir.path().join("out/bin/main"),
            dir.path().join("out/bin/mainb"),
        ]
    );
    // a.o is shared between the two entries and compiled exactly once.
    assert_eq!(invocations(&log), (3, 2));
}

#[test]
fn link_line_carries_library_tokens() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "src/gzcat.cc",
        "#include <zlib.h>\nint main(int argc, char **argv) { return 0; }\n",
    );
    let (tool, log) = stub_tool(dir.path());

    let mut st = SourceTree::new(dir.path().join("src"));
    st.link_libraries
        .insert("zlib.h".to_string(), vec!["-lz".to_string()]);
    st.logger = Logger::silent();
    st.process().unwrap();

    let compiler = Compiler {
        tool,
        output_dir: dir.path().join("out"),
        logger: Logger::silent(),
        ..Compiler::default()
    };
    compiler
        .compile(&st, st.find_source("gzcat").unwrap())
        .unwrap();

    let text = fs::read_to_string(&log).unwrap();
    let link_line = text
        .lines()
        .find(|line| !line.contains(" -c "))
        .expect("link invocation recorded");
    assert!(link_line.contains("-lz"), "missing -lz in: {link_line}");
}

#[test]
fn renamed_entries_get_renamed_binaries() {
    let dir = tempfile::tempdir().unwrap();
    simple_tree(dir.path());
    let (tool, _log) = stub_tool(dir.path());

    let mut st = processed_tree(dir.path());
    st.rename(&[RenameRule {
        regex: "main".to_string(),
        replace: "hello_tool".to_string(),
    }])
    .unwrap();

    let compiler = Compiler {
        tool,
        output_dir: dir.path().join("out"),
        logger: Logger::silent(),
        ..Compiler::default()
    };
    let entry = st.find_source("hello_tool").unwrap();
    let binary = compiler.compile(&st, entry).unwrap();
    assert_eq!(binary, dir.path().join("out/bin/hello_tool"));
    assert!(binary.exists());
}

#[test]
fn library_targets_link_shared() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "src/a.cc", "int a() { return 1; }\n");
    write(dir.path(), "src/b.cc", "int b() { return 2; }\n");
    let (tool, log) = stub_tool(dir.path());

    let mut st = SourceTree::new(dir.path().join("src"));
    st.libraries.insert(
        "mylib".to_string(),
        vec!["a.cc".to_string(), "b.cc".to_string()],
    );
    st.logger = Logger::silent();
    st.process().unwrap();

    let compiler = Compiler {
        tool,
        output_dir: dir.path().join("out"),
        logger: Logger::silent(),
        ..Compiler::default()
    };
    let lib = st.find_source("mylib").unwrap();
    let path = compiler.compile(&st, lib).unwrap();

    assert_eq!(path, dir.path().join("out/bin/mylib.so"));
    let text = fs::read_to_string(&log).unwrap();
    let link_line = text.lines().find(|l| !l.contains(" -c ")).unwrap();
    assert!(link_line.contains("-shared"));
    assert_eq!(invocations(&log).0, 2);
}

#[test]
fn first_failure_poisons_the_build() {
    let dir = tempfile::tempdir().unwrap();
    simple_tree(dir.path());
    let st = processed_tree(dir.path());

    let compiler = Compiler {
        tool: vec!["/bin/sh".to_string(), "-c".to_string(), "exit 1".to_string()],
        output_dir: dir.path().join("out"),
        logger: Logger::silent(),
        ..Compiler::default()
    };
    let err = compiler
        .compile(&st, st.find_source("main").unwrap())
        .unwrap_err();
    assert!(matches!(err, Error::Compiler { .. }));
}

#[test]
fn compile_commands_cover_the_source_union() {
    let dir = tempfile::tempdir().unwrap();
    simple_tree(dir.path());
    let (tool, _log) = stub_tool(dir.path());
    let st = processed_tree(dir.path());

    let compiler = Compiler {
        tool,
        output_dir: dir.path().join("out"),
        logger: Logger::silent(),
        ..Compiler::default()
    };
    compiler.compile(&st, st.find_source("main").unwrap()).unwrap();

    let text = fs::read_to_string(dir.path().join("out/compile_commands.json")).unwrap();
    let db: serde_json::Value = serde_json::from_str(&text).unwrap();
    let entries = db.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries
        .iter()
        .any(|e| e["file"].as_str().unwrap().ends_with("main.cc")));
    assert!(entries
        .iter()
        .any(|e| e["file"].as_str().unwrap().ends_with("a.cc")));
}

#[test]
fn gplusplus_smoke_build_runs() {
    if Command::new("g++").arg("--version").output().is_err() {
        eprintln!("Skipping test: g++ not installed");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    simple_tree(dir.path());
    let st = processed_tree(dir.path());

    let compiler = Compiler {
        output_dir: dir.path().join("out"),
        logger: Logger::silent(),
        ..Compiler::default()
    };
    let binary = compiler
        .compile(&st, st.find_source("main").unwrap())
        .unwrap();

    let output = Command::new(&binary).output().unwrap();
    assert_eq!(String::from_utf8_lossy(&output.stdout), "Hello World!\n");
}
