//! Logical-to-physical path resolution with containment guarantees.
//!
//! Both storage backends funnel every operation through [`resolve`], which
//! maps a `(base, host, logical path)` triple to a location that is provably
//! inside `base`. Traversal tokens are stripped before the join rather than
//! canonicalized afterwards, so resolution never touches the filesystem and
//! works for paths that do not exist yet.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use crate::domain::content::LOGICAL_SEPARATOR;

/// Resolved physical paths at or below this length name a storage root or a
/// bare drive prefix and are rejected outright.
pub const MIN_PHYSICAL_PATH_LEN: usize = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("logical path is empty")]
    Empty,
    #[error("resolved path `{path}` is too short to be a storage target")]
    TooShort { path: String },
    #[error("resolved path `{path}` escapes the storage root")]
    EscapesRoot { path: String },
}

/// A physical location plus the folder marker carried over from the logical
/// form. `PathBuf` cannot represent a trailing separator, so the marker
/// travels as an explicit flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    path: PathBuf,
    is_folder: bool,
}

impl ResolvedPath {
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn into_path_buf(self) -> PathBuf {
        self.path
    }

    #[must_use]
    pub fn is_folder(&self) -> bool {
        self.is_folder
    }
}

/// Map `(base, host, logical)` to a physical path strictly below `base`.
///
/// The logical form uses forward slashes; a trailing slash marks a folder and
/// is preserved on the result as [`ResolvedPath::is_folder`]. A leading `~`
/// and empty, `.`, and `..` segments are stripped from both the host and the
/// logical path before the join, so parent tokens are neutralized instead of
/// trusted. After the join the result must clear the length floor and sit
/// strictly below `base` under case-insensitive comparison.
pub fn resolve(base: &Path, host: &str, logical: &str) -> Result<ResolvedPath, PathError> {
    if logical.is_empty() {
        return Err(PathError::Empty);
    }
    let is_folder = logical.ends_with(LOGICAL_SEPARATOR);

    let mut candidate = base.to_path_buf();
    for segment in segments_of(host) {
        candidate.push(segment);
    }
    for segment in segments_of(logical.trim_start_matches('~')) {
        candidate.push(segment);
    }

    let rendered = candidate.to_string_lossy();
    if rendered.chars().count() <= MIN_PHYSICAL_PATH_LEN {
        return Err(PathError::TooShort {
            path: rendered.into_owned(),
        });
    }
    if !is_strict_descendant(base, &candidate) {
        return Err(PathError::EscapesRoot {
            path: rendered.into_owned(),
        });
    }

    Ok(ResolvedPath {
        path: candidate,
        is_folder,
    })
}

/// Split on either separator flavor and drop segments that cannot name a
/// storage entry.
fn segments_of(raw: &str) -> impl Iterator<Item = &str> {
    raw.split([LOGICAL_SEPARATOR, '\\'])
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
}

/// Component-wise, case-insensitive prefix check. Equality with the base is
/// not containment: resolving to the root itself must fail. Candidates
/// carrying a parent token anywhere are never contained.
pub(crate) fn is_strict_descendant(base: &Path, candidate: &Path) -> bool {
    if has_parent_token(candidate) {
        return false;
    }
    let mut base_components = base.components();
    let mut candidate_components = candidate.components();
    loop {
        match (base_components.next(), candidate_components.next()) {
            (None, Some(_)) => return true,
            (None, None) | (Some(_), None) => return false,
            (Some(expected), Some(actual)) => {
                if !component_matches(expected, actual) {
                    return false;
                }
            }
        }
    }
}

/// Non-strict variant for the stores' post-resolution double checks: the
/// base itself counts as contained.
pub(crate) fn is_contained(base: &Path, candidate: &Path) -> bool {
    if has_parent_token(candidate) {
        return false;
    }
    let mut base_components = base.components();
    let mut candidate_components = candidate.components();
    loop {
        match (base_components.next(), candidate_components.next()) {
            (None, _) => return true,
            (Some(_), None) => return false,
            (Some(expected), Some(actual)) => {
                if !component_matches(expected, actual) {
                    return false;
                }
            }
        }
    }
}

fn has_parent_token(path: &Path) -> bool {
    path.components()
        .any(|component| matches!(component, Component::ParentDir))
}

fn component_matches(expected: Component<'_>, actual: Component<'_>) -> bool {
    let expected = expected.as_os_str().to_string_lossy();
    let actual = actual.as_os_str().to_string_lossy();
    expected.eq_ignore_ascii_case(&actual)
}
