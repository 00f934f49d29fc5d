// src/recipe/invocation.rs

//! Turning one expanded command line into an argument vector.
//!
//! Simple lines are split into words here and executed directly. Anything
//! that needs the shell (special characters, built-ins, leading variable
//! assignments, unterminated quotes, a non-default shell) is handed to the
//! configured interpreter with `-c`.

/// The interpreter lines fall back to when none is configured.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Characters that force interpreter mode when seen outside quotes.
const SHELL_CHARS: &[char] = &[
    '#', ';', '*', '?', '[', ']', '&', '|', '<', '>', '(', ')', '{', '}', '$', '`', '^', '~',
];

/// First words that only mean something to the shell itself.
const SHELL_BUILTINS: &[&str] = &[
    "cd", "eval", "exec", "exit", "login", "logout", "set", "umask", "wait", "while", "for",
    "case", "if", ":", ".", "break", "continue", "export", "read", "readonly", "shift", "times",
    "trap", "switch",
];

/// Interpreter settings relevant to classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    pub shell: String,
    /// Write interpreted lines to a scratch script instead of using `-c`.
    pub batch_mode: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            batch_mode: false,
        }
    }
}

impl ShellConfig {
    fn is_default_shell(&self) -> bool {
        self.shell == DEFAULT_SHELL
    }
}

/// How a command line is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Run `argv[0]` directly with the remaining words as arguments.
    Direct(Vec<String>),
    /// Run through the interpreter.
    ///
    /// With `script` set, the body must be written to a scratch file whose
    /// path is appended to `argv` before launching.
    Interpreted {
        argv: Vec<String>,
        script: Option<String>,
    },
}

impl Invocation {
    pub fn is_direct(&self) -> bool {
        matches!(self, Invocation::Direct(_))
    }
}

/// Classify `line` and build its argument vector.
///
/// Returns `None` when there is nothing to run: a blank line or the no-op
/// `:`.
pub fn build_invocation(line: &str, shell: &ShellConfig) -> Option<Invocation> {
    let line = line.trim_start_matches([' ', '\t']);
    if line.trim().is_empty() || line.trim() == ":" {
        return None;
    }

    if shell.is_default_shell() && !shell.batch_mode {
        if let Some(argv) = split_words(line) {
            if argv.is_empty() {
                return None;
            }
            return Some(Invocation::Direct(argv));
        }
    }

    interpreted(line, shell)
}

fn interpreted(line: &str, shell: &ShellConfig) -> Option<Invocation> {
    let collapsed = escape_line(line, false);
    if collapsed.trim().is_empty() {
        return None;
    }

    let shell_words: Vec<String> = shell.shell.split_whitespace().map(str::to_string).collect();

    if shell.batch_mode {
        return Some(Invocation::Interpreted {
            argv: shell_words,
            script: Some(collapsed),
        });
    }

    let escaped = escape_line(line, true);
    let argv = split_words(&format!("{} -c {}", shell.shell, escaped))
        .filter(|words| words.len() >= 3)
        .unwrap_or_else(|| {
            let mut argv = shell_words;
            argv.push("-c".to_string());
            argv.push(collapsed);
            argv
        });

    Some(Invocation::Interpreted { argv, script: None })
}

/// Collapse backslash-newline (plus the following blanks) into one space
/// and, when `escape` is set, backslash-escape everything the shell would
/// otherwise interpret while the line is re-split into words.
fn escape_line(line: &str, escape: bool) -> String {
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(line.len() * 2);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && chars.get(i + 1) == Some(&'\n') {
            i = skip_blanks(&chars, i + 2);
            if escape {
                out.push('\\');
            }
            out.push(' ');
            continue;
        }
        if escape && is_escapable(c) {
            out.push('\\');
        }
        out.push(c);
        i += 1;
    }

    out
}

/// Characters a backslash escapes outside quotes (other backslashes are kept
/// as written), and the set escaped before handing a line to `-c`.
fn is_escapable(c: char) -> bool {
    c == '\\' || c == '\'' || c == '"' || c.is_whitespace() || SHELL_CHARS.contains(&c)
}

fn skip_blanks(chars: &[char], mut i: usize) -> usize {
    while matches!(chars.get(i), Some(' ') | Some('\t')) {
        i += 1;
    }
    i
}

/// Split a line into words the way the shell would, or return `None` if the
/// shell is needed to interpret it.
fn split_words(line: &str) -> Option<Vec<String>> {
    let chars: Vec<char> = line.chars().collect();
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut seen_plain_word = false;
    let mut word_has_equals = false;
    let mut last_was_empty_quote = false;
    let mut i = skip_blanks(&chars, 0);

    while i < chars.len() {
        let c = chars[i];

        if let Some(q) = quote {
            if c == q {
                quote = None;
                if current.is_empty() {
                    last_was_empty_quote = true;
                }
            } else if c == '\\' && chars.get(i + 1) == Some(&'\n') {
                i += 2;
                if chars.get(i) == Some(&'\t') {
                    i += 1;
                }
                continue;
            } else if q == '"' && matches!(c, '\\' | '$' | '`') {
                return None;
            } else {
                current.push(c);
            }
            i += 1;
            continue;
        }

        if SHELL_CHARS.contains(&c) {
            return None;
        }

        match c {
            '=' => {
                if !seen_plain_word {
                    return None;
                }
                word_has_equals = true;
                current.push('=');
                i += 1;
            }
            '\\' => match chars.get(i + 1) {
                Some('\n') => {
                    i += 2;
                    if chars.get(i) == Some(&'\t') {
                        i += 1;
                    }
                    if !current.is_empty() {
                        if !end_word(&mut words, &mut current, &mut seen_plain_word, word_has_equals) {
                            return None;
                        }
                        word_has_equals = false;
                        last_was_empty_quote = false;
                    }
                    i = skip_blanks(&chars, i);
                }
                Some(&next) if is_escapable(next) => {
                    current.push(next);
                    i += 2;
                }
                Some(_) => {
                    current.push('\\');
                    i += 1;
                }
                // A lone trailing backslash is dropped.
                None => i += 1,
            },
            '\'' | '"' => {
                quote = Some(c);
                i += 1;
            }
            ' ' | '\t' => {
                if !end_word(&mut words, &mut current, &mut seen_plain_word, word_has_equals) {
                    return None;
                }
                word_has_equals = false;
                last_was_empty_quote = false;
                i = skip_blanks(&chars, i);
            }
            _ => {
                current.push(c);
                i += 1;
            }
        }
    }

    if quote.is_some() {
        return None;
    }

    if !current.is_empty() || last_was_empty_quote {
        words.push(current);
    }

    if words.len() == 1 && is_builtin(&words[0]) {
        return None;
    }

    Some(words)
}

/// Finish the current word. Returns `false` when the first word turned out
/// to be a shell built-in.
fn end_word(
    words: &mut Vec<String>,
    current: &mut String,
    seen_plain_word: &mut bool,
    word_has_equals: bool,
) -> bool {
    words.push(std::mem::take(current));
    *seen_plain_word |= !word_has_equals;
    !(words.len() == 1 && is_builtin(&words[0]))
}

fn is_builtin(word: &str) -> bool {
    SHELL_BUILTINS.contains(&word)
}
