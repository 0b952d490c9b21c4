//! Include scanner: line-oriented extraction of `#include` directives.
//!
//! Two modes. Full mode looks at every line of the file. Fast mode assumes
//! all includes live in a prelude made up of comments, blank lines, and
//! preprocessor directives, and stops at the first line that is none of
//! those, which is an order-of-magnitude win on large trees.

use std::io::{self, BufRead};
use std::sync::LazyLock;

use regex::Regex;

static INCLUDE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\s*#include\s+["<]([^"<]*)([">])\s*"#).expect("include regex")
});
static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*//").expect("comment regex"));
static BLANK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*$").expect("blank regex"));
static DIRECTIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*#").expect("directive regex"));
static CONT_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*#.*\\$").expect("continuation start regex"));
static CONT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\$").expect("continuation regex"));
static BLOCK_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*/\*").expect("block comment start regex"));
static BLOCK_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*/\s*$").expect("block comment end regex"));

/// Whether an include used angle brackets or quotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeKind {
    /// `#include "…"` — a project include.
    Quote,
    /// `#include <…>` — a system include, eligible for link-library
    /// attachment.
    Bracket,
}

/// One recognized include directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Include {
    pub text: String,
    pub kind: IncludeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Full,
    Fast,
}

/// Iterator over the include directives of a byte stream.
///
/// No macro expansion, no conditional evaluation: every branch of an
/// `#if`/`#endif` region is visible to the scanner.
pub struct IncludeScanner<R> {
    reader: R,
    mode: Mode,
    in_continuation: bool,
    in_block_comment: bool,
    stopped: bool,
}

impl<R: BufRead> IncludeScanner<R> {
    /// Scanner that examines the whole stream.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            mode: Mode::Full,
            in_continuation: false,
            in_block_comment: false,
            stopped: false,
        }
    }

    /// Scanner that stops at the end of the file prelude.
    pub fn fast(reader: R) -> Self {
        Self {
            mode: Mode::Fast,
            ..Self::new(reader)
        }
    }

    fn read_line(&mut self) -> Option<io::Result<String>> {
        let mut buf = Vec::new();
        match self.reader.read_until(b'\n', &mut buf) {
            Err(err) => Some(Err(err)),
            Ok(0) => None,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                Some(Ok(String::from_utf8_lossy(&buf).into_owned()))
            }
        }
    }
}

impl<R: BufRead> Iterator for IncludeScanner<R> {
    type Item = io::Result<Include>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stopped {
            return None;
        }
        loop {
            let line = match self.read_line()? {
                Ok(line) => line,
                Err(err) => {
                    self.stopped = true;
                    return Some(Err(err));
                }
            };

            // A block comment opened mid-prelude holds the scan until its
            // closing line, which is itself consumed.
            if self.mode == Mode::Fast && self.in_block_comment {
                if BLOCK_END_RE.is_match(&line) {
                    self.in_block_comment = false;
                }
                continue;
            }

            if let Some(caps) = INCLUDE_RE.captures(&line) {
                if !caps[1].is_empty() {
                    let kind = if &caps[2] == ">" {
                        IncludeKind::Bracket
                    } else {
                        IncludeKind::Quote
                    };
                    return Some(Ok(Include {
                        text: caps[1].to_string(),
                        kind,
                    }));
                }
            }

            if self.mode == Mode::Full {
                continue;
            }

            if CONT_START_RE.is_match(&line) {
                self.in_continuation = true;
            } else if self.in_continuation && CONT_RE.is_match(&line) {
                // still inside a continued directive
            } else if COMMENT_RE.is_match(&line)
                || BLANK_RE.is_match(&line)
                || DIRECTIVE_RE.is_match(&line)
            {
                self.in_continuation = false;
            } else if BLOCK_START_RE.is_match(&line) {
                self.in_block_comment = !BLOCK_END_RE.is_match(&line);
            } else if self.in_continuation {
                self.in_continuation = false;
            } else {
                self.stopped = true;
                return None;
            }
        }
    }
}
