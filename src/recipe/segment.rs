// src/recipe/segment.rs

//! Splitting raw recipe text into command lines.
//!
//! A line ends at a newline that is not escaped by an odd run of
//! backslashes. Each line may start with any mix of `@` (silent), `+`
//! (recurse) and `-` (ignore failure), interleaved with blanks.

use std::sync::LazyLock;

use regex::Regex;

static SELF_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$[({]MAKE[)}]").expect("static regex is valid")
});

/// Per-line behaviour flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineFlags {
    /// Runs even under `-n`/`-q` and receives the jobserver handles.
    pub recurse: bool,
    /// Not echoed before running.
    pub silent: bool,
    /// A failure is reported but does not fail the target.
    pub ignore_errors: bool,
}

impl LineFlags {
    pub fn union(self, other: LineFlags) -> LineFlags {
        LineFlags {
            recurse: self.recurse || other.recurse,
            silent: self.silent || other.silent,
            ignore_errors: self.ignore_errors || other.ignore_errors,
        }
    }
}

/// One line of a recipe, still unexpanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub text: String,
    pub flags: LineFlags,
}

/// A recipe cut into its command lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentedRecipe {
    pub lines: Vec<CommandLine>,
    pub any_recurse: bool,
}

impl SegmentedRecipe {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }
}

/// Cut `text` into command lines.
pub fn segment(text: &str) -> SegmentedRecipe {
    let mut lines = Vec::new();
    let mut any_recurse = false;

    for raw in split_logical_lines(text) {
        let (mut flags, body) = strip_modifiers(raw);
        if body.trim().is_empty() {
            continue;
        }
        if references_self(body) {
            flags.recurse = true;
        }
        any_recurse |= flags.recurse;
        lines.push(CommandLine {
            text: body.to_string(),
            flags,
        });
    }

    SegmentedRecipe { lines, any_recurse }
}

/// Split on newlines not preceded by an odd number of backslashes.
///
/// Escaped newlines stay in the returned slices; the invocation builder
/// decides what they mean.
pub fn split_logical_lines(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut start = 0;

    for (i, &b) in bytes.iter().enumerate() {
        if b != b'\n' {
            continue;
        }
        let backslashes = bytes[start..i]
            .iter()
            .rev()
            .take_while(|&&c| c == b'\\')
            .count();
        if backslashes % 2 == 1 {
            continue;
        }
        out.push(&text[start..i]);
        start = i + 1;
    }

    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

/// Strip leading `@`, `+`, `-` and blanks, returning the flags they carried.
pub fn strip_modifiers(line: &str) -> (LineFlags, &str) {
    let mut flags = LineFlags::default();
    let mut rest = line;

    loop {
        let mut chars = rest.chars();
        match chars.next() {
            Some('@') => flags.silent = true,
            Some('+') => flags.recurse = true,
            Some('-') => flags.ignore_errors = true,
            Some(' ') | Some('\t') => {}
            _ => break,
        }
        rest = chars.as_str();
    }

    (flags, rest)
}

/// Whether unexpanded text invokes the tool itself via `$(MAKE)`/`${MAKE}`.
pub fn references_self(text: &str) -> bool {
    SELF_REFERENCE.is_match(text)
}
