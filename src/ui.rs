//! Terminal output for the build driver.

use colored::*;

/// Printer handed to the tree builder and the compile scheduler.
///
/// `quiet` silences everything (used by tests); `verbose` swaps the
/// one-line progress messages for the full command lines being run.
#[derive(Debug, Clone, Copy, Default)]
pub struct Logger {
    pub verbose: bool,
    pub quiet: bool,
}

impl Logger {
    pub fn verbose(on: bool) -> Self {
        Self {
            verbose: on,
            quiet: false,
        }
    }

    /// Fully silent logger for test builds.
    pub fn silent() -> Self {
        Self {
            verbose: false,
            quiet: true,
        }
    }

    /// One progress line for an external command, or the whole argv when
    /// verbose.
    pub fn command(&self, action: &str, target: &str, argv: &[String]) {
        if self.quiet {
            return;
        }
        if self.verbose {
            println!("{}", argv.join(" "));
        } else {
            println!("{} {}", format!("{action}:").green(), target);
        }
    }

    pub fn generating(&self, outputs: &[String]) {
        if self.quiet {
            return;
        }
        println!("{} {}", "Generating:".cyan(), outputs.join(" "));
    }

    pub fn info(&self, message: &str) {
        if !self.quiet {
            println!("{message}");
        }
    }

    pub fn error(&self, message: &str) {
        if !self.quiet {
            eprintln!("{} {}", "error:".red().bold(), message);
        }
    }
}
