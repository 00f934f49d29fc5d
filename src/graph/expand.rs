// src/graph/expand.rs

//! Minimal variable expansion for recipe lines.
//!
//! Supported references: `$@` (target), `$<` (first prerequisite), `$^`
//! (all prerequisites), `$(NAME)` / `${NAME}` and `$$`. Names resolve from
//! `[vars]`, then the environment; `MAKE` defaults to this executable.
//! Anything else is left untouched.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\$|\$@|\$<|\$\^|\$\(([A-Za-z_][A-Za-z0-9_]*)\)|\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .expect("static regex is valid")
});

#[derive(Debug, Clone)]
pub struct Expander {
    vars: BTreeMap<String, String>,
    make_program: String,
}

impl Expander {
    pub fn new(vars: BTreeMap<String, String>, make_program: impl Into<String>) -> Self {
        Self {
            vars,
            make_program: make_program.into(),
        }
    }

    pub fn with_make_program(mut self, program: impl Into<String>) -> Self {
        self.make_program = program.into();
        self
    }

    /// Path of the running executable, used for `$(MAKE)`.
    pub fn default_make_program() -> String {
        std::env::current_exe()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "parmake".to_string())
    }

    pub fn expand(&self, target: &str, deps: &[String], line: &str) -> String {
        REFERENCE
            .replace_all(line, |caps: &Captures<'_>| {
                if let Some(name) = caps.get(1).or_else(|| caps.get(2)) {
                    return self.lookup(name.as_str());
                }
                match &caps[0] {
                    "$$" => "$".to_string(),
                    "$@" => target.to_string(),
                    "$<" => deps.first().cloned().unwrap_or_default(),
                    "$^" => deps.join(" "),
                    other => other.to_string(),
                }
            })
            .into_owned()
    }

    fn lookup(&self, name: &str) -> String {
        if let Some(value) = self.vars.get(name) {
            return value.clone();
        }
        if name == "MAKE" {
            return self.make_program.clone();
        }
        std::env::var(name).unwrap_or_default()
    }
}
