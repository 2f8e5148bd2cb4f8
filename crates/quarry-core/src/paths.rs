//! # Path Identity Resolver
//!
//! The evaluation server treats file paths as byte-exact keys, but on
//! Windows and macOS the filesystem looks paths up case-insensitively, so
//! the same file can be addressed by many spellings. This module
//! canonicalizes a path to the exact casing stored in the directory
//! entries, walking from the root down and matching each component under a
//! case- and accent-insensitive fold.
//!
//! The walk is iterative, not recursive: the resolved prefix accumulates
//! one component at a time, so deeply nested paths cannot blow the stack.

use std::fs;
use std::path::{Component, Path, PathBuf};

use icu_casemap::CaseMapper;
use icu_normalizer::DecomposingNormalizer;

use crate::error::CoreError;

/// Fold a file name for case- and accent-insensitive comparison:
/// NFD-decompose, drop combining diacritical marks, then full Unicode
/// case folding. Mirrors the locale-aware base-sensitivity comparison the
/// server's lookup convention uses.
pub fn fold_name(name: &str) -> String {
    let decomposed = DecomposingNormalizer::new_nfd().normalize(name);
    let stripped: String = decomposed
        .chars()
        .filter(|c| !matches!(c, '\u{0300}'..='\u{036F}'))
        .collect();
    CaseMapper::new().fold_string(&stripped).into_owned()
}

/// True when the platform's filesystems look names up case-insensitively
/// while preserving the stored case.
fn ambiguous_case_platform() -> bool {
    cfg!(any(windows, target_os = "macos"))
}

/// Canonicalize `path` to the exact on-disk casing.
///
/// On case-sensitive platforms the input is returned unchanged. On
/// case-insensitive-but-case-preserving platforms, drive prefixes are
/// upper-cased (drive letters are canonically upper-case) and every other
/// component is replaced by the matching directory entry's stored name.
///
/// Fails with [`CoreError::PathResolution`] when no entry matches a
/// component under the fold.
pub fn canonical_path(path: &Path) -> Result<PathBuf, CoreError> {
    if !ambiguous_case_platform() {
        return Ok(path.to_path_buf());
    }
    let mut resolved = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => {
                let upper = prefix.as_os_str().to_string_lossy().to_uppercase();
                resolved.push(upper);
            }
            Component::RootDir => resolved.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                let name = name.to_string_lossy();
                resolved.push(match_entry(&resolved, &name, path)?);
            }
        }
    }
    Ok(resolved)
}

/// Find the directory entry of `parent` whose name folds equal to `want`.
fn match_entry(parent: &Path, want: &str, original: &Path) -> Result<std::ffi::OsString, CoreError> {
    let dir = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    let folded = fold_name(want);
    let entries = fs::read_dir(dir).map_err(|e| CoreError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| CoreError::io(dir, e))?;
        let on_disk = entry.file_name();
        if fold_name(&on_disk.to_string_lossy()) == folded {
            return Ok(on_disk);
        }
    }
    Err(CoreError::PathResolution(original.to_path_buf()))
}
