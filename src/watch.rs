//! Rebuild-on-change loop for `--watch`.

use std::sync::mpsc::channel;
use std::time::Duration;

use anyhow::Result;
use colored::*;
use notify::{RecursiveMode, Watcher};

use crate::driver::{self, BuildOptions};

/// Run one build, then keep rebuilding whenever something under the source
/// directory changes. Build failures are reported and the watch continues.
pub fn watch(opts: &BuildOptions) -> Result<()> {
    let src_dir = driver::source_dir(opts)?;
    println!(
        "{} Watching for changes in {}...",
        "watch:".cyan(),
        src_dir.display()
    );

    let (tx, rx) = channel();
    let notify_config = notify::Config::default().with_poll_interval(Duration::from_secs(1));
    let mut watcher = notify::RecommendedWatcher::new(tx, notify_config)?;
    watcher.watch(&src_dir, RecursiveMode::Recursive)?;

    run_once(opts);

    while rx.recv().is_ok() {
        // Let a burst of events settle, then drain it.
        std::thread::sleep(Duration::from_millis(100));
        while rx.try_recv().is_ok() {}
        println!("{} Change detected, rebuilding...", "watch:".yellow());
        run_once(opts);
    }
    Ok(())
}

fn run_once(opts: &BuildOptions) {
    if let Err(err) = driver::run(opts) {
        opts.logger.error(&format!("{err:#}"));
    }
}
