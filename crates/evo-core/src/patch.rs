//! Patch inspection and outcomes
//!
//! Authored patches are classified before anything touches the sandbox.
//! Whitespace-only diffs, diffs that only delete files and (by policy) diffs
//! that only touch tests cannot improve the agent and are treated as no-ops.

use evo_archive::{Patch, SourceTree};
use serde::{Deserialize, Serialize};

/// Reason recorded for an empty patch
pub const EMPTY_PATCH: &str = "Empty patch";
/// Reason recorded for a patch without modified files
pub const NO_FILES_MODIFIED: &str = "No files modified";
/// Reason recorded for a test-only patch
pub const ONLY_TESTS: &str = "Only test files were modified";
/// Reason recorded for a patch worth evaluating
pub const VALID_PATCH: &str = "Valid patch with source file modifications";

/// Classification of an authored diff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatchInspection {
    /// Whitespace only
    Empty,
    /// No file header targets a surviving file
    NoFilesModified,
    /// Every touched file is a test file
    OnlyTests {
        /// Touched files
        files: Vec<String>,
    },
    /// At least one source file is modified
    Valid {
        /// Touched files
        files: Vec<String>,
    },
}

impl PatchInspection {
    /// Human-readable reason
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Empty => EMPTY_PATCH,
            Self::NoFilesModified => NO_FILES_MODIFIED,
            Self::OnlyTests { .. } => ONLY_TESTS,
            Self::Valid { .. } => VALID_PATCH,
        }
    }

    /// Whether the patch should be applied and evaluated
    #[must_use]
    pub fn is_valid(&self, reject_test_only: bool) -> bool {
        match self {
            Self::Valid { .. } => true,
            Self::OnlyTests { .. } => !reject_test_only,
            Self::Empty | Self::NoFilesModified => false,
        }
    }
}

/// Classify a diff by the files it touches
#[must_use]
pub fn inspect_patch(patch: &Patch) -> PatchInspection {
    if patch.is_blank() {
        return PatchInspection::Empty;
    }

    let mut files: Vec<String> = Vec::new();
    for line in patch.as_str().lines() {
        let Some(target) = line.strip_prefix("+++ ") else {
            continue;
        };
        let target = target.split('\t').next().unwrap_or(target).trim();
        if target == "/dev/null" {
            continue;
        }
        let path = target.strip_prefix("b/").unwrap_or(target).to_string();
        if !files.contains(&path) {
            files.push(path);
        }
    }

    if files.is_empty() {
        PatchInspection::NoFilesModified
    } else if files.iter().all(|f| is_test_file(f)) {
        PatchInspection::OnlyTests { files }
    } else {
        PatchInspection::Valid { files }
    }
}

/// Test files live under a `tests`/`test` directory or are named
/// `test_*` / `*_test.*`
#[must_use]
pub fn is_test_file(path: &str) -> bool {
    let mut components = path.split('/').peekable();
    while let Some(component) = components.next() {
        if components.peek().is_none() {
            let stem = component.split('.').next().unwrap_or(component);
            return component.starts_with("test_") || stem.ends_with("_test");
        }
        if component == "tests" || component == "test" {
            return true;
        }
    }
    false
}

/// What happened when the authored patch met the parent tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Patch applied; the child's resolved tree
    Applied(SourceTree),
    /// Nothing to evaluate
    Empty {
        /// Why the patch counts as empty
        reason: String,
    },
    /// Patch did not apply
    ApplyError(String),
}
