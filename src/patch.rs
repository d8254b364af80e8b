use std::{
    collections::BTreeMap,
    path::{Component, Path, PathBuf},
};

use log::debug;
use thiserror::Error;

const DEV_NULL: &str = "/dev/null";

#[derive(Error, Debug, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct PatchParseError {
    pub line: usize,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum PatchApplicationError {
    #[error("Patch `{patch}` failed on {}: hunk #{hunk} at line {line} does not match the source", file.display())]
    HunkMismatch {
        patch: String,
        file: PathBuf,
        hunk: usize,
        line: usize,
    },
    #[error("Patch `{patch}` cannot strip {strip} path components from `{path}`")]
    BadPath {
        patch: String,
        path: String,
        strip: usize,
    },
    #[error("Patch `{patch}` targets `{path}`, which is outside the source tree")]
    OutsideSourceTree { patch: String, path: String },
    #[error("Patch `{patch}` creates or deletes `{path}`, only modifications are supported")]
    Unsupported { patch: String, path: String },
    #[error("Patch `{patch}` has a malformed section for `{path}`: {message}")]
    Malformed {
        patch: String,
        path: String,
        message: String,
    },
    #[error("Patch `{patch}` could not access {}: {source}", file.display())]
    IO {
        patch: String,
        file: PathBuf,
        source: std::io::Error,
    },
}

/// A unified diff, possibly touching several files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub files: Vec<FilePatch>,
}

/// One `---`/`+++` section of a diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    pub old_path: String,
    pub new_path: String,
    /// Declared old start line of each hunk.
    pub hunk_starts: Vec<usize>,
    diff: String,
}

impl Patch {
    pub fn parse(text: &str) -> Result<Patch, PatchParseError> {
        let lines: Vec<&str> = text.split_inclusive('\n').collect();
        let headers: Vec<usize> = (0..lines.len())
            .filter(|&i| is_section_start(&lines[i..]))
            .collect();
        if headers.is_empty() {
            return Err(PatchParseError {
                line: 1,
                message: "no file headers found".to_string(),
            });
        }

        let mut files = Vec::with_capacity(headers.len());
        for (n, &start) in headers.iter().enumerate() {
            let end = headers.get(n + 1).copied().unwrap_or(lines.len());
            // drop `diff -ur ...` and similar lines between sections
            let end = (start + 2..end)
                .rev()
                .find(|&i| is_hunk_line(lines[i]))
                .map_or(start + 2, |i| i + 1);
            // headers are read here; diffy only sees the hunks
            let diff = lines[start + 2..end].concat();

            let parsed = diffy::Patch::from_str(&diff).map_err(|err| PatchParseError {
                line: start + 1,
                message: err.to_string(),
            })?;
            let hunk_starts: Vec<usize> = parsed
                .hunks()
                .iter()
                .map(|hunk| hunk.old_range().start())
                .collect();
            let new_path = header_path(&lines[start + 1][4..]).to_string();
            if hunk_starts.is_empty() {
                return Err(PatchParseError {
                    line: start + 1,
                    message: format!("no hunks for `{}`", new_path),
                });
            }

            files.push(FilePatch {
                old_path: header_path(&lines[start][4..]).to_string(),
                new_path,
                hunk_starts,
                diff,
            });
        }

        Ok(Patch { files })
    }

    /// Applies every file section below `dir`.
    ///
    /// Sections for the same file apply on top of each other. All files are
    /// computed before anything is written, so a mismatch leaves the tree
    /// untouched.
    pub fn apply_in(
        &self,
        name: &str,
        dir: &Path,
        strip: usize,
    ) -> Result<Vec<PathBuf>, PatchApplicationError> {
        let mut order = Vec::new();
        let mut contents: BTreeMap<PathBuf, String> = BTreeMap::new();
        for file_patch in &self.files {
            let relative = file_patch.target(name, strip)?;
            if !contents.contains_key(&relative) {
                let content = std::fs::read_to_string(dir.join(&relative)).map_err(|source| {
                    PatchApplicationError::IO {
                        patch: name.to_string(),
                        file: relative.clone(),
                        source,
                    }
                })?;
                contents.insert(relative.clone(), content);
                order.push(relative.clone());
            }
            if let Some(content) = contents.get_mut(&relative) {
                *content = file_patch.apply(name, &relative, content)?;
            }
        }

        for relative in &order {
            let Some(patched) = contents.get(relative) else {
                continue;
            };
            std::fs::write(dir.join(relative), patched).map_err(|source| {
                PatchApplicationError::IO {
                    patch: name.to_string(),
                    file: relative.clone(),
                    source,
                }
            })?;
            debug!("Patch `{}` applied to {}", name, relative.display());
        }
        Ok(order)
    }
}

impl FilePatch {
    /// Path of the patched file relative to the source root.
    pub fn target(&self, patch: &str, strip: usize) -> Result<PathBuf, PatchApplicationError> {
        if self.old_path == DEV_NULL || self.new_path == DEV_NULL {
            return Err(PatchApplicationError::Unsupported {
                patch: patch.to_string(),
                path: if self.old_path == DEV_NULL {
                    self.new_path.clone()
                } else {
                    self.old_path.clone()
                },
            });
        }
        let components: Vec<&str> = self.new_path.split('/').filter(|c| !c.is_empty()).collect();
        if components.len() <= strip {
            return Err(PatchApplicationError::BadPath {
                patch: patch.to_string(),
                path: self.new_path.clone(),
                strip,
            });
        }
        let target: PathBuf = components[strip..].iter().collect();
        if !is_inside_tree(&target) {
            return Err(PatchApplicationError::OutsideSourceTree {
                patch: patch.to_string(),
                path: self.new_path.clone(),
            });
        }
        Ok(target)
    }

    /// Applies this section to `content`. Hunks may sit at an offset from their
    /// declared lines; line endings of untouched lines are kept.
    pub fn apply(
        &self,
        patch: &str,
        file: &Path,
        content: &str,
    ) -> Result<String, PatchApplicationError> {
        let parsed =
            diffy::Patch::from_str(&self.diff).map_err(|err| PatchApplicationError::Malformed {
                patch: patch.to_string(),
                path: self.new_path.clone(),
                message: err.to_string(),
            })?;
        diffy::apply(content, &parsed).map_err(|err| {
            let hunk = failed_hunk(&err);
            PatchApplicationError::HunkMismatch {
                patch: patch.to_string(),
                file: file.to_path_buf(),
                hunk,
                line: self.hunk_starts.get(hunk.saturating_sub(1)).copied().unwrap_or(0),
            }
        })
    }
}

/// True for relative paths that cannot climb out of the directory they are joined to.
pub(crate) fn is_inside_tree(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

// `ApplyError` only exposes the 1-based hunk number through its message
fn failed_hunk(error: &diffy::ApplyError) -> usize {
    error
        .to_string()
        .rsplit('#')
        .next()
        .and_then(|n| n.trim().parse().ok())
        .unwrap_or(1)
}

fn is_section_start(lines: &[&str]) -> bool {
    matches!(
        lines,
        [old, new, hunk, ..]
            if old.starts_with("--- ") && new.starts_with("+++ ") && hunk.starts_with("@@")
    )
}

fn is_hunk_line(line: &str) -> bool {
    matches!(line.chars().next(), Some(' ' | '+' | '-' | '@' | '\\'))
}

/// `a/configure\t2012-02-25 09:03:23` -> `a/configure`
fn header_path(header: &str) -> &str {
    header.split('\t').next().unwrap_or(header).trim_end()
}
