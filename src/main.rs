use std::path::PathBuf;

use clap::Parser;

use cppdep::driver::{self, BuildOptions};
use cppdep::ui::Logger;
use cppdep::watch;

#[derive(Parser)]
#[command(name = "cppdep")]
#[command(about = "Dependency graph and easy compiles for C/C++", version)]
struct Cli {
    /// Names of the binaries to build. The main source file should be
    /// NAME.cc; globbing expressions work too, and '*' on its own means
    /// all autodetected main source files.
    binary_names: Vec<String>,

    /// Path to the yaml config; defaults to the nearest cppdep.yml above
    /// the working directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// How many concurrent scan and compile workers to run.
    #[arg(short, long, default_value_t = 1)]
    concurrency: usize,

    /// Select a build mode.
    #[arg(long, default_value = "default")]
    mode: String,

    /// Enable fast file scanning (assumes includes sit at the top of each
    /// file).
    #[arg(long)]
    fast: bool,

    /// List the paths of all binaries that would be generated, without
    /// compiling them.
    #[arg(long)]
    list: bool,

    /// Path to the src directory, overriding the config.
    #[arg(long)]
    src: Option<PathBuf>,

    /// Print the compile and link commands being run.
    #[arg(short, long)]
    verbose: bool,

    /// Watch the source directory and rebuild on change.
    #[arg(long)]
    watch: bool,
}

fn main() {
    let cli = Cli::parse();
    let opts = BuildOptions {
        config_path: cli.config,
        src_dir: cli.src,
        mode: cli.mode,
        concurrency: cli.concurrency,
        fast_scanning: cli.fast,
        list: cli.list,
        binary_names: cli.binary_names,
        logger: Logger::verbose(cli.verbose),
    };

    let result = if cli.watch {
        watch::watch(&opts)
    } else {
        driver::run(&opts).map(|_| ())
    };
    if let Err(err) = result {
        opts.logger.error(&format!("{err:#}"));
        std::process::exit(1);
    }
}
