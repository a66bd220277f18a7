//! Static pre-execution code scanning.
//!
//! [`validate_code`] rejects plugin source that references host globals,
//! performs dynamic code evaluation, or shows prototype-pollution-shaped
//! patterns — before the code is ever handed to an execution engine. This is
//! a defense-in-depth layer on top of runtime isolation, not a substitute
//! for it.

use std::sync::LazyLock;

use aho_corasick::AhoCorasick;
use regex::Regex;

use crate::error::{Result, SandboxError};

/// Fixed tokens that must not appear anywhere in plugin source.
///
/// Host globals and escape hatches the wrapped environment will shadow
/// anyway; rejecting them up front keeps the violation visible to the user
/// instead of silently evaluating to `undefined` at runtime.
const FORBIDDEN_TOKENS: &[&str] = &[
    "__proto__",
    "globalThis",
    "process.env",
    "process.exit",
    "process.binding",
    "require(",
    "child_process",
    "XMLHttpRequest",
    "importScripts",
    "Deno.",
    "Bun.",
    "setPrototypeOf",
    "__defineGetter__",
    "__defineSetter__",
];

static TOKEN_SCANNER: LazyLock<AhoCorasick> = LazyLock::new(|| {
    AhoCorasick::new(FORBIDDEN_TOKENS).expect("forbidden token set must compile")
});

/// Pattern-shaped violations that need flexible whitespace matching.
static PATTERN_SCANNERS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"\beval\s*\(").expect("static regex"),
            "eval(",
        ),
        (
            Regex::new(r"\bnew\s+Function\s*\(").expect("static regex"),
            "new Function(",
        ),
        (
            Regex::new(r"\bFunction\s*\(\s*['\x22]").expect("static regex"),
            "Function(...)",
        ),
        (
            Regex::new(r"\bimport\s*\(").expect("static regex"),
            "dynamic import(",
        ),
        (
            Regex::new(r"\.constructor\s*\(\s*['\x22]").expect("static regex"),
            "constructor invocation",
        ),
        (
            Regex::new(r"\bprototype\s*\[").expect("static regex"),
            "prototype[...] mutation",
        ),
        (
            Regex::new(r"\.\s*constructor\s*\.\s*prototype\b").expect("static regex"),
            "constructor.prototype mutation",
        ),
    ]
});

/// Scan plugin source for forbidden constructs.
///
/// The first match wins; its pattern and 1-based line number are reported in
/// the resulting [`SandboxError::SecurityViolation`].
pub fn validate_code(code: &str) -> Result<()> {
    if let Some(m) = TOKEN_SCANNER.find(code) {
        return Err(violation(
            FORBIDDEN_TOKENS[m.pattern().as_usize()],
            code,
            m.start(),
        ));
    }

    for (regex, label) in PATTERN_SCANNERS.iter() {
        if let Some(m) = regex.find(code) {
            return Err(violation(label, code, m.start()));
        }
    }

    Ok(())
}

fn violation(pattern: &str, code: &str, offset: usize) -> SandboxError {
    let line = code[..offset].bytes().filter(|&b| b == b'\n').count() + 1;
    tracing::warn!(pattern = %pattern, line, "static scan rejected plugin code");
    SandboxError::SecurityViolation {
        pattern: pattern.to_owned(),
        line,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
