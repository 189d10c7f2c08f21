//! Line-preserving `go.mod` editor.
//!
//! The file is held as its original lines. Edits touch only the line of the
//! affected requirement, so formatting, comments and unrelated directives
//! survive byte-for-byte.
//!
//! ```text
//! module example.com/app
//!
//! require example.com/single v1.0.0
//!
//! require (
//!     example.com/foo v1.0.0
//!     example.com/bar v0.2.0 // indirect
//! )
//!
//! replace example.com/bar => ../local-bar
//! ```

use std::fmt;
use thiserror::Error;

use crate::snapshot::{ManifestSnapshot, ModuleVersion, Replace, Require};

const INDIRECT: &str = "indirect";

/// Errors from editing a `go.mod`.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ModFileError {
    #[error("invalid module path '{0}'")]
    InvalidPath(String),

    #[error("invalid version '{version}' for module '{path}'")]
    InvalidVersion { path: String, version: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Module,
    Go,
    Require,
    Replace,
    Other,
}

impl Verb {
    fn parse(word: &str) -> Self {
        match word {
            "module" => Self::Module,
            "go" => Self::Go,
            "require" => Self::Require,
            "replace" => Self::Replace,
            _ => Self::Other,
        }
    }
}

/// One directive line, with the verb stripped for block members.
#[derive(Debug, Clone)]
struct Entry {
    line: usize,
    verb: Verb,
    /// Opening line of the enclosing block, if any.
    block: Option<usize>,
    /// Argument tokens, unquoted.
    args: Vec<String>,
    indirect: bool,
}

/// An editable `go.mod`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModFile {
    lines: Vec<String>,
}

impl ModFile {
    /// Wrap manifest text. Parsing is lenient; unknown lines are kept as-is.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.split('\n').map(String::from).collect(),
        }
    }

    /// The structured view of this file.
    #[must_use]
    pub fn snapshot(&self) -> ManifestSnapshot {
        let mut snap = ManifestSnapshot::default();
        for entry in self.entries() {
            match entry.verb {
                Verb::Module => {
                    if let Some(path) = entry.args.first() {
                        snap.module = Some(ModuleVersion {
                            path: path.clone(),
                            version: None,
                        });
                    }
                }
                Verb::Go => snap.go = entry.args.first().cloned(),
                Verb::Require => {
                    if let [path, version, ..] = entry.args.as_slice() {
                        snap.requires.push(Require {
                            path: path.clone(),
                            version: version.clone(),
                            indirect: entry.indirect,
                        });
                    }
                }
                Verb::Replace => {
                    if let Some(replace) = parse_replace(&entry.args) {
                        snap.replaces.push(replace);
                    }
                }
                Verb::Other => {}
            }
        }
        snap
    }

    /// Pin `path` at `version`, marking it `// indirect` when requested.
    ///
    /// Returns whether the text changed. An existing entry keeps its
    /// position, spacing and any other comment text.
    pub fn set_requirement(
        &mut self,
        path: &str,
        version: &str,
        indirect: bool,
    ) -> Result<bool, ModFileError> {
        validate(path, version)?;
        let entries = self.entries();

        if let Some(entry) = entries
            .iter()
            .find(|e| e.verb == Verb::Require && e.args.first().is_some_and(|p| p == path))
        {
            let current = entry.args.get(1).map(String::as_str);
            if current == Some(version) && entry.indirect == indirect {
                return Ok(false);
            }
            let version_token = if entry.block.is_some() { 1 } else { 2 };
            let line = &self.lines[entry.line];
            let mut updated = replace_token(line, version_token, version);
            if entry.indirect != indirect {
                updated = set_indirect_marker(&updated, indirect);
            }
            self.lines[entry.line] = updated;
            return Ok(true);
        }

        let marker = if indirect { " // indirect" } else { "" };
        let requires: Vec<&Entry> = entries.iter().filter(|e| e.verb == Verb::Require).collect();

        if let Some(open) = requires.iter().filter_map(|e| e.block).max() {
            let close = self.block_end(open);
            self.lines.insert(close, format!("\t{path} {version}{marker}"));
        } else if let Some(last) = requires.last() {
            let line = format!("require {path} {version}{marker}");
            self.lines.insert(last.line + 1, line);
        } else {
            if self.lines.last().is_some_and(String::is_empty) {
                self.lines.pop();
            }
            self.lines.extend([
                String::new(),
                format!("require {path} {version}{marker}"),
                String::new(),
            ]);
        }
        Ok(true)
    }

    /// Remove the requirement on `path`. Returns whether it was present.
    ///
    /// A block left empty is removed along with it.
    pub fn drop_requirement(&mut self, path: &str) -> bool {
        let entries = self.entries();
        let Some(entry) = entries
            .iter()
            .find(|e| e.verb == Verb::Require && e.args.first().is_some_and(|p| p == path))
        else {
            return false;
        };

        if let Some(open) = entry.block {
            let siblings = entries.iter().filter(|e| e.block == Some(open)).count();
            if siblings == 1 {
                let close = self.block_end(open);
                self.lines.drain(open..=close.min(self.lines.len() - 1));
                return true;
            }
        }
        self.lines.remove(entry.line);
        true
    }

    /// Index of the `)` closing the block opened at `open`.
    fn block_end(&self, open: usize) -> usize {
        self.lines
            .iter()
            .enumerate()
            .skip(open + 1)
            .find(|(_, l)| split_comment(l).0.trim() == ")")
            .map_or(self.lines.len(), |(i, _)| i)
    }

    fn entries(&self) -> Vec<Entry> {
        let mut entries = Vec::new();
        let mut block: Option<(Verb, usize)> = None;

        for (i, line) in self.lines.iter().enumerate() {
            let (code, comment) = split_comment(line);
            let tokens = tokenize(code);
            if tokens.is_empty() {
                continue;
            }

            if let Some((verb, open)) = block {
                if tokens == [")"] {
                    block = None;
                    continue;
                }
                entries.push(Entry {
                    line: i,
                    verb,
                    block: Some(open),
                    args: tokens.iter().map(|t| unquote(t)).collect(),
                    indirect: is_indirect(comment),
                });
                continue;
            }

            let verb = Verb::parse(tokens[0]);
            if tokens.len() == 2 && tokens[1] == "(" {
                block = Some((verb, i));
                continue;
            }
            entries.push(Entry {
                line: i,
                verb,
                block: None,
                args: tokens[1..].iter().map(|t| unquote(t)).collect(),
                indirect: is_indirect(comment),
            });
        }
        entries
    }
}

impl fmt::Display for ModFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines.join("\n"))
    }
}

fn validate(path: &str, version: &str) -> Result<(), ModFileError> {
    if path.is_empty() || path.chars().any(char::is_whitespace) || path.contains("//") {
        return Err(ModFileError::InvalidPath(path.to_string()));
    }
    if version.is_empty() || version.chars().any(char::is_whitespace) {
        return Err(ModFileError::InvalidVersion {
            path: path.to_string(),
            version: version.to_string(),
        });
    }
    Ok(())
}

/// Whitespace-separated tokens, with `(` and `)` split off on their own
/// (`require(` opens a block just like `require (`).
fn tokenize(code: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    for word in code.split_whitespace() {
        let mut rest = word;
        while let Some(i) = rest.find(['(', ')']) {
            if i > 0 {
                tokens.push(&rest[..i]);
            }
            tokens.push(&rest[i..=i]);
            rest = &rest[i + 1..];
        }
        if !rest.is_empty() {
            tokens.push(rest);
        }
    }
    tokens
}

fn split_comment(line: &str) -> (&str, Option<&str>) {
    match line.find("//") {
        Some(i) => (&line[..i], Some(&line[i + 2..])),
        None => (line, None),
    }
}

fn unquote(token: &str) -> String {
    token.trim_matches('"').to_string()
}

fn is_indirect(comment: Option<&str>) -> bool {
    comment.is_some_and(|c| {
        let c = c.trim();
        c == INDIRECT || c.starts_with("indirect;")
    })
}

fn parse_replace(args: &[String]) -> Option<Replace> {
    let arrow = args.iter().position(|a| a == "=>")?;
    let (old, new) = (&args[..arrow], &args[arrow + 1..]);
    Some(Replace {
        old: ModuleVersion {
            path: old.first()?.clone(),
            version: old.get(1).cloned(),
        },
        new: ModuleVersion {
            path: new.first()?.clone(),
            version: new.get(1).cloned(),
        },
    })
}

/// Swap the `n`th whitespace-separated token of the code part of `line`.
fn replace_token(line: &str, n: usize, replacement: &str) -> String {
    let (code, _) = split_comment(line);
    let mut start = None;
    let mut count = 0;
    let mut in_token = false;
    for (i, c) in code.char_indices() {
        if c.is_whitespace() {
            if in_token {
                if let Some(s) = start {
                    return format!("{}{}{}", &line[..s], replacement, &line[i..]);
                }
                count += 1;
            }
            in_token = false;
        } else if !in_token {
            in_token = true;
            if count == n {
                start = Some(i);
            }
        }
    }
    match start {
        Some(s) => format!("{}{}{}", &line[..s], replacement, &line[code.len()..]),
        None => line.to_string(),
    }
}

/// Add or remove the `// indirect` marker, keeping any other comment text.
fn set_indirect_marker(line: &str, indirect: bool) -> String {
    let (line, cr) = match line.strip_suffix('\r') {
        Some(stripped) => (stripped, "\r"),
        None => (line, ""),
    };
    let (code, comment) = split_comment(line);
    let rest = comment.map(|c| {
        let c = c.trim();
        c.strip_prefix(INDIRECT)
            .filter(|r| r.is_empty() || r.starts_with(';'))
            .map_or(c, |r| r.trim_start_matches(';').trim())
    });

    let body = match (indirect, rest) {
        (true, Some(r)) if !r.is_empty() => format!("{code}// indirect; {r}"),
        (true, _) => format!("{} // indirect", code.trim_end()),
        (false, Some(r)) if !r.is_empty() => format!("{code}// {r}"),
        (false, _) => code.trim_end().to_string(),
    };
    format!("{body}{cr}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const GO_MOD: &str = "module example.com/app\n\
                          \n\
                          go 1.21\n\
                          \n\
                          require example.com/single v1.0.0\n\
                          \n\
                          require (\n\
                          \texample.com/foo v1.0.0\n\
                          \texample.com/bar v0.2.0 // indirect\n\
                          \texample.com/noted v0.1.0 // keep this\n\
                          )\n\
                          \n\
                          replace example.com/bar => ../local-bar\n\
                          \n\
                          replace (\n\
                          \texample.com/baz v1.0.0 => example.com/fork v1.1.0\n\
                          )\n";

    #[test]
    fn display_round_trips() {
        assert_eq!(ModFile::parse(GO_MOD).to_string(), GO_MOD);
        assert_eq!(ModFile::parse("no newline").to_string(), "no newline");
    }

    #[test]
    fn snapshot_reads_directives() {
        let snap = ModFile::parse(GO_MOD).snapshot();
        assert_eq!(snap.module.unwrap().path, "example.com/app");
        assert_eq!(snap.go.as_deref(), Some("1.21"));

        let paths: Vec<_> = snap.requires.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "example.com/single",
                "example.com/foo",
                "example.com/bar",
                "example.com/noted"
            ]
        );
        assert!(snap.requires[2].indirect);
        assert!(!snap.requires[3].indirect);

        assert_eq!(snap.replaces.len(), 2);
        assert_eq!(snap.replaces[0].new.path, "../local-bar");
        assert_eq!(snap.replaces[1].old.version.as_deref(), Some("v1.0.0"));
        assert_eq!(snap.replaces[1].new.version.as_deref(), Some("v1.1.0"));
    }

    #[test]
    fn set_version_touches_only_that_line() {
        let mut m = ModFile::parse(GO_MOD);
        assert!(m.set_requirement("example.com/foo", "v1.2.0", false).unwrap());
        let expected = GO_MOD.replace("example.com/foo v1.0.0", "example.com/foo v1.2.0");
        assert_eq!(m.to_string(), expected);
    }

    #[test]
    fn set_single_line_requirement() {
        let mut m = ModFile::parse(GO_MOD);
        m.set_requirement("example.com/single", "v1.1.0", false)
            .unwrap();
        assert!(m.to_string().contains("require example.com/single v1.1.0\n"));
    }

    #[test]
    fn unchanged_requirement_is_noop() {
        let mut m = ModFile::parse(GO_MOD);
        assert!(!m.set_requirement("example.com/bar", "v0.2.0", true).unwrap());
        assert_eq!(m.to_string(), GO_MOD);
    }

    #[test]
    fn toggles_indirect_marker() {
        let mut m = ModFile::parse(GO_MOD);
        m.set_requirement("example.com/bar", "v0.2.0", false).unwrap();
        assert!(m.to_string().contains("\texample.com/bar v0.2.0\n"));

        m.set_requirement("example.com/foo", "v1.0.0", true).unwrap();
        assert!(m.to_string().contains("\texample.com/foo v1.0.0 // indirect\n"));
    }

    #[test]
    fn indirect_marker_keeps_other_comment() {
        let mut m = ModFile::parse(GO_MOD);
        m.set_requirement("example.com/noted", "v0.1.0", true).unwrap();
        assert!(m
            .to_string()
            .contains("\texample.com/noted v0.1.0 // indirect; keep this\n"));

        m.set_requirement("example.com/noted", "v0.1.0", false).unwrap();
        assert!(m.to_string().contains("\texample.com/noted v0.1.0 // keep this\n"));
    }

    #[test]
    fn new_requirement_goes_into_last_block() {
        let mut m = ModFile::parse(GO_MOD);
        m.set_requirement("example.com/new", "v3.0.0", true).unwrap();
        assert!(m.to_string().contains(
            "\texample.com/noted v0.1.0 // keep this\n\texample.com/new v3.0.0 // indirect\n)\n"
        ));
    }

    #[test]
    fn new_requirement_after_single_line() {
        let mut m = ModFile::parse("module m\n\nrequire example.com/a v1.0.0\n");
        m.set_requirement("example.com/b", "v1.0.0", false).unwrap();
        assert_eq!(
            m.to_string(),
            "module m\n\nrequire example.com/a v1.0.0\nrequire example.com/b v1.0.0\n"
        );
    }

    #[test]
    fn new_requirement_without_any_require() {
        let mut m = ModFile::parse("module m\n\ngo 1.21\n");
        m.set_requirement("example.com/a", "v1.0.0", false).unwrap();
        assert_eq!(
            m.to_string(),
            "module m\n\ngo 1.21\n\nrequire example.com/a v1.0.0\n"
        );

        let mut m = ModFile::parse("module m");
        m.set_requirement("example.com/a", "v1.0.0", false).unwrap();
        assert_eq!(m.to_string(), "module m\n\nrequire example.com/a v1.0.0\n");
    }

    #[test]
    fn drop_block_member() {
        let mut m = ModFile::parse(GO_MOD);
        assert!(m.drop_requirement("example.com/bar"));
        assert!(!m.to_string().contains("example.com/bar v0.2.0"));
        assert!(m.to_string().contains("replace example.com/bar => ../local-bar"));
        assert!(!m.drop_requirement("example.com/bar"));
    }

    #[test]
    fn drop_last_member_removes_block() {
        let mut m = ModFile::parse("module m\n\nrequire (\n\texample.com/a v1.0.0\n)\n");
        assert!(m.drop_requirement("example.com/a"));
        assert_eq!(m.to_string(), "module m\n\n");
    }

    #[test]
    fn drop_single_line() {
        let mut m = ModFile::parse(GO_MOD);
        assert!(m.drop_requirement("example.com/single"));
        assert!(!m.to_string().contains("example.com/single"));
    }

    #[test]
    fn quoted_paths_are_recognised() {
        let m = ModFile::parse("module m\n\nrequire \"example.com/q\" v1.0.0\n");
        assert_eq!(m.snapshot().requires[0].path, "example.com/q");
    }

    #[test]
    fn crlf_lines_keep_carriage_return() {
        let mut m = ModFile::parse("module m\r\nrequire (\r\n\texample.com/a v1.0.0\r\n)\r\n");
        m.set_requirement("example.com/a", "v1.1.0", true).unwrap();
        assert_eq!(
            m.to_string(),
            "module m\r\nrequire (\r\n\texample.com/a v1.1.0 // indirect\r\n)\r\n"
        );
    }

    #[test]
    fn rejects_bad_input() {
        let mut m = ModFile::parse(GO_MOD);
        assert_eq!(
            m.set_requirement("", "v1.0.0", false),
            Err(ModFileError::InvalidPath(String::new()))
        );
        assert!(matches!(
            m.set_requirement("example.com/foo", "v1 .0", false),
            Err(ModFileError::InvalidVersion { .. })
        ));
    }

    #[test]
    fn block_opener_without_space() {
        let text = "module m\n\nrequire(\n\texample.com/a v1.0.0\n)\n";
        let mut m = ModFile::parse(text);
        assert_eq!(m.snapshot().requires.len(), 1);

        assert!(m.set_requirement("example.com/a", "v1.1.0", false).unwrap());
        assert_eq!(
            m.to_string(),
            "module m\n\nrequire(\n\texample.com/a v1.1.0\n)\n"
        );

        assert!(m.set_requirement("example.com/b", "v0.1.0", true).unwrap());
        assert_eq!(
            m.to_string(),
            "module m\n\nrequire(\n\texample.com/a v1.1.0\n\texample.com/b v0.1.0 // indirect\n)\n"
        );
    }

    #[test]
    fn tokenize_splits_parentheses() {
        assert_eq!(tokenize("require("), vec!["require", "("]);
        assert_eq!(tokenize("  )  "), vec![")"]);
        assert_eq!(tokenize("example.com/a v1.0.0"), vec!["example.com/a", "v1.0.0"]);
    }
}
