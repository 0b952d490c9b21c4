//! # cppdep - dependency graph and easy compiles
//!
//! cppdep is an autodiscovering build driver for C/C++ source trees. Point
//! it at a source root and a small `cppdep.yml` and it finds every
//! translation unit, resolves `#include` directives into a file-level
//! dependency graph, runs code generators, detects binary entry points, and
//! compiles and links them incrementally and in parallel.
//!
//! ## Quick start
//!
//! ```bash
//! # build everything with a main()
//! cppdep '*'
//!
//! # build one binary with eight workers
//! cppdep -c 8 mytool
//! ```
//!
//! ## Module organization
//!
//! - [`tree`] - Source discovery and the file dependency graph
//! - [`compile`] - Incremental parallel compile/link scheduler
//! - [`scanner`] - `#include` extraction (full and fast modes)
//! - [`generator`] - Pluggable source generators
//! - [`config`] - `cppdep.yml` parsing and platform overrides
//! - [`driver`] - Orchestration used by the CLI

/// Compile scheduler: objects, binaries, staleness, parallelism.
pub mod compile;

/// Configuration file parsing (`cppdep.yml`).
pub mod config;

/// Orchestration: config to tree to compiler to symlinks.
pub mod driver;

/// Error taxonomy shared by the core modules.
pub mod error;

/// Code generators (per-extension and shell-script variants).
pub mod generator;

/// Include scanner.
pub mod scanner;

/// Source tree walking and the dependency graph.
pub mod tree;

/// Terminal output.
pub mod ui;

/// Rebuild-on-change loop.
pub mod watch;
