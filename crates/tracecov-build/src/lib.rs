// SPDX-License-Identifier: AGPL-3.0

//! Build artifact loading and contract identification
//!
//! Artifacts come from a Truffle-style build directory. Each one carries a
//! signature table and a pair of bytecode masks computed once at load time,
//! so identifying the program behind an address is a straight comparison.

mod artifact;
mod library;
mod mask;

pub use artifact::{
    abi_signature, function_table, AbiItem, AbiParam, AstRoot, CompilerInfo, ContractArtifact,
    TruffleArtifact,
};
pub use library::ArtifactLibrary;
pub use mask::{MaskSegment, MaskedBytecode};

use anyhow::{Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use tracecov_exceptions::CoverageException;
use tracecov_logs::{debug, warn_code, ErrorCode};

pub const DEFAULT_ARTIFACTS_GLOB: &str = "build/contracts/**/*.json";

/// Translates a `**`/`*`/`?` glob into an anchored path regex
pub fn glob_to_regex(glob: &str) -> Result<Regex> {
    let mut pattern = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    pattern.push_str("(?:.*/)?");
                } else {
                    pattern.push_str(".*");
                }
            }
            '*' => pattern.push_str("[^/]*"),
            '?' => pattern.push_str("[^/]"),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).with_context(|| format!("Invalid artifacts glob: {}", glob))
}

/// Directory prefix of the glob that contains no wildcard
fn glob_base(glob: &str) -> PathBuf {
    let literal: Vec<&str> = glob
        .split('/')
        .take_while(|part| !part.contains(['*', '?']))
        .collect();
    // the last literal part is a file name when nothing wild follows
    let dir_parts = if literal.len() == glob.split('/').count() {
        &literal[..literal.len().saturating_sub(1)]
    } else {
        &literal[..]
    };
    let base = dir_parts.join("/");
    if base.is_empty() {
        if glob.starts_with('/') {
            PathBuf::from("/")
        } else {
            PathBuf::from(".")
        }
    } else {
        PathBuf::from(base)
    }
}

fn normalize(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/");
    match text.strip_prefix("./") {
        Some(rest) => rest.to_string(),
        None => text,
    }
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            walk(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

/// Files matching `glob`, in sorted path order
pub fn find_artifact_files(glob: &str) -> Result<Vec<PathBuf>> {
    let matcher = glob_to_regex(glob.strip_prefix("./").unwrap_or(glob))?;
    let base = glob_base(glob);
    if !base.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    walk(&base, &mut files)?;
    files.retain(|path| matcher.is_match(&normalize(path)));
    Ok(files)
}

/// Loads every artifact matching `glob`.
///
/// Fails when the glob matches no file at all. Files that cannot be parsed
/// or carry no bytecode are skipped with a warning.
pub fn load_artifacts(glob: &str) -> Result<ArtifactLibrary> {
    let files = find_artifact_files(glob)?;
    if files.is_empty() {
        return Err(CoverageException::NoArtifactsFound(glob.to_string()).into());
    }

    let mut artifacts = Vec::new();
    for path in &files {
        match ContractArtifact::from_file(path) {
            Ok(Some(artifact)) => {
                debug(
                    &format!("loaded {} from {}", artifact.name, path.display()),
                    true,
                );
                artifacts.push(artifact);
            }
            Ok(None) => {}
            Err(e) => warn_code(
                ErrorCode::ArtifactSkipped,
                &format!("Skipped {} due to parsing failure: {:#}", path.display(), e),
                false,
            ),
        }
    }

    Ok(ArtifactLibrary::new(artifacts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_to_regex() {
        let re = glob_to_regex("build/contracts/**/*.json").unwrap();
        assert!(re.is_match("build/contracts/Token.json"));
        assert!(re.is_match("build/contracts/nested/deep/Token.json"));
        assert!(!re.is_match("build/contracts/Token.json.bak"));
        assert!(!re.is_match("other/contracts/Token.json"));

        let re = glob_to_regex("out/?.json").unwrap();
        assert!(re.is_match("out/A.json"));
        assert!(!re.is_match("out/AB.json"));

        let re = glob_to_regex("out/*.json").unwrap();
        assert!(!re.is_match("out/sub/A.json"));
    }

    #[test]
    fn test_glob_base() {
        assert_eq!(
            glob_base("build/contracts/**/*.json"),
            PathBuf::from("build/contracts")
        );
        assert_eq!(glob_base("*.json"), PathBuf::from("."));
        assert_eq!(glob_base("/tmp/x/*.json"), PathBuf::from("/tmp/x"));
        assert_eq!(glob_base("build/A.json"), PathBuf::from("build"));
    }

    #[test]
    fn test_missing_directory_has_no_files() {
        let files = find_artifact_files("does/not/exist/**/*.json").unwrap();
        assert!(files.is_empty());
        let err = load_artifacts("does/not/exist/**/*.json").unwrap_err();
        assert!(err.to_string().contains("No artifacts match"));
    }
}
