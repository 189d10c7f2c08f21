//! Translation of `go` command diagnostics into [`UpdateError`]s.
//!
//! Rules are tried in table order and the first match wins. Text matching no
//! rule becomes [`UpdateError::DependencyFileNotParseable`].

use regex::Regex;
use std::sync::OnceLock;

use crate::error::UpdateError;

/// Lines of trailing stderr kept for unclassified failures.
const UNPARSEABLE_TAIL_LINES: usize = 10;

/// What a matching rule turns the failure into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A module could not be fetched or verified.
    Unresolvable,
    /// A module declares a different path than it was imported under.
    /// The pattern's first capture is the declared path, the second the
    /// discovered one.
    ModulePathMismatch,
}

/// One entry of the rule table.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyRule {
    pub kind: ErrorKind,
    pub pattern: &'static str,
}

/// The rule table, in priority order.
pub const RULES: &[ClassifyRule] = &[
    ClassifyRule {
        kind: ErrorKind::Unresolvable,
        pattern: r"go: .*: git fetch .*: exit status 128",
    },
    ClassifyRule {
        kind: ErrorKind::Unresolvable,
        pattern: r"verifying .*: checksum mismatch",
    },
    ClassifyRule {
        kind: ErrorKind::Unresolvable,
        pattern: r"build .*: cannot find module providing package",
    },
    ClassifyRule {
        kind: ErrorKind::ModulePathMismatch,
        pattern: r#"go: ([^@\s]+)(?:@[^\s]+)?: .* has non-.* module path "(.*)" at"#,
    },
    ClassifyRule {
        kind: ErrorKind::ModulePathMismatch,
        pattern: r#"go: ([^@\s]+)(?:@[^\s]+)?: .* unexpected module path "(.*)""#,
    },
    ClassifyRule {
        kind: ErrorKind::ModulePathMismatch,
        pattern: r"(?s)go: ([^@\s]+)(?:@[^\s]+)?: .* declares its path as: ([\S]*)",
    },
];

fn compiled_rules() -> &'static [(ErrorKind, Regex)] {
    static COMPILED: OnceLock<Vec<(ErrorKind, Regex)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        RULES
            .iter()
            .filter_map(|rule| Regex::new(rule.pattern).ok().map(|re| (rule.kind, re)))
            .collect()
    })
}

/// Classify toolchain stderr.
///
/// `go_mod` is the manifest path reported in path-mismatch and unparseable
/// errors.
pub fn classify(stderr: &str, go_mod: &str) -> UpdateError {
    for (kind, re) in compiled_rules() {
        let Some(caps) = re.captures(stderr) else {
            continue;
        };
        match kind {
            ErrorKind::Unresolvable => {
                let tail: String = stderr
                    .split_inclusive('\n')
                    .skip_while(|line| !re.is_match(line))
                    .collect();
                return UpdateError::DependencyFileNotResolvable(tail);
            }
            ErrorKind::ModulePathMismatch => {
                let group = |i| caps.get(i).map_or("", |m| m.as_str()).to_string();
                return UpdateError::ModulePathMismatch {
                    go_mod: go_mod.to_string(),
                    declared: group(1),
                    discovered: group(2),
                };
            }
        }
    }

    let lines: Vec<&str> = stderr.split_inclusive('\n').collect();
    let start = lines.len().saturating_sub(UNPARSEABLE_TAIL_LINES);
    UpdateError::DependencyFileNotParseable {
        file: go_mod.to_string(),
        message: lines[start..].concat().trim().to_string(),
    }
}
