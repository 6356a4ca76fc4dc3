//! Surgical patch application
//!
//! Applies [`FileEdit`] instructions against a working checkout.
//! Create edits write full content; modify edits apply ordered
//! search/replace patches against the evolving in-memory content.
//!
//! Leniency rules: malformed and unmatched patches are skipped with a
//! warning, and an ambiguous search (multiple occurrences) replaces the
//! first occurrence only. Callers are responsible for providing enough
//! surrounding context to make `search` effectively unique. A modify
//! edit where zero patches applied leaves the file untouched on disk
//! and is reported as failed for that path.

use crate::edit::{EditAction, FileEdit};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Length of the search-text preview included in skip warnings
const SEARCH_PREVIEW_LEN: usize = 50;

/// Errors from applying a single file edit
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// Filesystem failure while reading or writing the target
    #[error("io error on {path}: {source}")]
    Io {
        /// Target path
        path: PathBuf,
        /// Underlying failure
        source: std::io::Error,
    },

    /// A modify edit named a file that does not exist
    #[error("cannot modify non-existent file: {0}")]
    MissingTarget(PathBuf),

    /// A create edit carried no content
    #[error("create edit has no content: {0}")]
    MissingContent(PathBuf),

    /// Every patch in a modify edit was skipped
    #[error("no patches applied to {0}")]
    NothingApplied(PathBuf),
}

/// Outcome of a successfully applied file edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedEdit {
    /// Path written, relative to the checkout
    pub path: String,
    /// Patches that matched and were applied
    pub patches_applied: usize,
    /// Patches requested
    pub patches_total: usize,
}

/// Apply one file edit under `repo_dir`
///
/// # Errors
/// - [`PatchError::MissingContent`] for a create edit without content
/// - [`PatchError::MissingTarget`] for a modify edit against a
///   non-existent file (no implicit create)
/// - [`PatchError::NothingApplied`] when every patch was skipped; the
///   file is left byte-for-byte unchanged
/// - [`PatchError::Io`] on filesystem failure
pub fn apply_file_edit(repo_dir: &Path, edit: &FileEdit) -> Result<AppliedEdit, PatchError> {
    let full_path = repo_dir.join(&edit.path);
    let io_err = |source| PatchError::Io {
        path: full_path.clone(),
        source,
    };

    match edit.action {
        EditAction::Create => {
            let content = edit
                .content
                .as_deref()
                .ok_or_else(|| PatchError::MissingContent(full_path.clone()))?;
            if let Some(parent) = full_path.parent() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
            fs::write(&full_path, content).map_err(io_err)?;
            info!(path = %edit.path, bytes = content.len(), "wrote file");
            Ok(AppliedEdit {
                path: edit.path.clone(),
                patches_applied: 0,
                patches_total: 0,
            })
        }
        EditAction::Modify => {
            if !full_path.exists() {
                return Err(PatchError::MissingTarget(full_path));
            }

            let mut content = fs::read_to_string(&full_path).map_err(io_err)?;
            let mut applied = 0usize;

            for patch in &edit.patches {
                // Empty search text would match at offset zero; treat it
                // like a missing field.
                let (Some(search), Some(replace)) = (&patch.search, &patch.replace) else {
                    warn!(path = %edit.path, "invalid patch format, skipping");
                    continue;
                };
                if search.is_empty() {
                    warn!(path = %edit.path, "invalid patch format, skipping");
                    continue;
                }

                if !content.contains(search.as_str()) {
                    warn!(
                        path = %edit.path,
                        search_preview = %preview(search),
                        "patch search text not found, skipping"
                    );
                    continue;
                }

                let occurrences = content.matches(search.as_str()).count();
                if occurrences > 1 {
                    warn!(path = %edit.path, occurrences, "patch search text not unique");
                }

                content = content.replacen(search.as_str(), replace, 1);
                applied += 1;
            }

            if applied == 0 {
                return Err(PatchError::NothingApplied(full_path));
            }

            fs::write(&full_path, &content).map_err(io_err)?;
            info!(
                path = %edit.path,
                patches_applied = applied,
                patches_total = edit.patches.len(),
                "applied patches to file"
            );
            Ok(AppliedEdit {
                path: edit.path.clone(),
                patches_applied: applied,
                patches_total: edit.patches.len(),
            })
        }
    }
}

/// Apply a batch of edits, returning the paths successfully written
///
/// Per-file failures are logged and skipped; callers use the returned
/// set to confirm what actually changed.
#[must_use]
pub fn write_edits(repo_dir: &Path, edits: &[FileEdit]) -> Vec<String> {
    let mut written = Vec::new();
    for edit in edits {
        match apply_file_edit(repo_dir, edit) {
            Ok(applied) => written.push(applied.path),
            Err(err) => error!(path = %edit.path, %err, "file edit failed"),
        }
    }
    written
}

fn preview(text: &str) -> String {
    if text.chars().count() <= SEARCH_PREVIEW_LEN {
        return text.to_string();
    }
    let head: String = text.chars().take(SEARCH_PREVIEW_LEN).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::Patch;
    use tempfile::TempDir;

    fn checkout_with(path: &str, content: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        let full = dir.path().join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
        dir
    }

    #[test]
    fn create_writes_content_and_parents() {
        let dir = TempDir::new().unwrap();
        let edit = FileEdit::create("deep/nested/new.rs", "fn main() {}\n");

        let applied = apply_file_edit(dir.path(), &edit).unwrap();
        assert_eq!(applied.path, "deep/nested/new.rs");
        assert_eq!(
            fs::read_to_string(dir.path().join("deep/nested/new.rs")).unwrap(),
            "fn main() {}\n"
        );
    }

    #[test]
    fn create_without_content_is_error() {
        let dir = TempDir::new().unwrap();
        let edit = FileEdit {
            path: "a.rs".into(),
            action: EditAction::Create,
            content: None,
            patches: Vec::new(),
        };
        assert!(matches!(
            apply_file_edit(dir.path(), &edit),
            Err(PatchError::MissingContent(_))
        ));
    }

    #[test]
    fn modify_missing_file_is_error_not_create() {
        let dir = TempDir::new().unwrap();
        let edit = FileEdit::modify("ghost.rs", vec![Patch::new("a", "b")]);

        assert!(matches!(
            apply_file_edit(dir.path(), &edit),
            Err(PatchError::MissingTarget(_))
        ));
        assert!(!dir.path().join("ghost.rs").exists());
    }

    #[test]
    fn patches_apply_in_order_and_see_prior_effects() {
        let dir = checkout_with("f.txt", "foo");
        let edit = FileEdit::modify(
            "f.txt",
            vec![Patch::new("foo", "bar"), Patch::new("bar", "baz")],
        );

        let applied = apply_file_edit(dir.path(), &edit).unwrap();
        assert_eq!(applied.patches_applied, 2);
        assert_eq!(fs::read_to_string(dir.path().join("f.txt")).unwrap(), "baz");
    }

    #[test]
    fn reordering_patches_changes_the_result() {
        let dir = checkout_with("f.txt", "foo");
        let edit = FileEdit::modify(
            "f.txt",
            vec![Patch::new("bar", "baz"), Patch::new("foo", "bar")],
        );

        let applied = apply_file_edit(dir.path(), &edit).unwrap();
        // First patch finds nothing; second rewrites foo -> bar.
        assert_eq!(applied.patches_applied, 1);
        assert_eq!(fs::read_to_string(dir.path().join("f.txt")).unwrap(), "bar");
    }

    #[test]
    fn unmatched_and_malformed_patches_are_skipped() {
        let dir = checkout_with("f.txt", "alpha beta gamma");
        let edit = FileEdit::modify(
            "f.txt",
            vec![
                Patch {
                    search: None,
                    replace: Some("x".into()),
                },
                Patch::new("delta", "epsilon"),
                Patch::new("beta", "BETA"),
            ],
        );

        let applied = apply_file_edit(dir.path(), &edit).unwrap();
        assert_eq!(applied.patches_applied, 1);
        assert_eq!(applied.patches_total, 3);
        assert_eq!(
            fs::read_to_string(dir.path().join("f.txt")).unwrap(),
            "alpha BETA gamma"
        );
    }

    #[test]
    fn empty_search_is_invalid_not_an_injection() {
        let dir = checkout_with("f.txt", "original content");
        let edit = FileEdit::modify("f.txt", vec![Patch::new("", "INJECTED")]);

        assert!(matches!(
            apply_file_edit(dir.path(), &edit),
            Err(PatchError::NothingApplied(_))
        ));
        assert_eq!(
            fs::read_to_string(dir.path().join("f.txt")).unwrap(),
            "original content"
        );

        // An empty search alongside a real patch is skipped, not applied.
        let mixed = FileEdit::modify(
            "f.txt",
            vec![Patch::new("", "INJECTED"), Patch::new("original", "patched")],
        );
        let applied = apply_file_edit(dir.path(), &mixed).unwrap();
        assert_eq!(applied.patches_applied, 1);
        assert_eq!(
            fs::read_to_string(dir.path().join("f.txt")).unwrap(),
            "patched content"
        );
    }

    #[test]
    fn zero_applied_leaves_file_untouched() {
        let original = "line one\nline two\n";
        let dir = checkout_with("f.txt", original);
        let edit = FileEdit::modify(
            "f.txt",
            vec![Patch::new("absent", "x"), Patch::new("also absent", "y")],
        );

        assert!(matches!(
            apply_file_edit(dir.path(), &edit),
            Err(PatchError::NothingApplied(_))
        ));
        assert_eq!(fs::read_to_string(dir.path().join("f.txt")).unwrap(), original);
    }

    #[test]
    fn ambiguous_search_replaces_first_occurrence_only() {
        let dir = checkout_with("f.txt", "x = 1; x = 1; x = 1;");
        let edit = FileEdit::modify("f.txt", vec![Patch::new("x = 1;", "y = 2;")]);

        let applied = apply_file_edit(dir.path(), &edit).unwrap();
        assert_eq!(applied.patches_applied, 1);
        assert_eq!(
            fs::read_to_string(dir.path().join("f.txt")).unwrap(),
            "y = 2; x = 1; x = 1;"
        );
    }

    #[test]
    fn write_edits_reports_only_successful_paths() {
        let dir = checkout_with("existing.txt", "hello world");
        let edits = vec![
            FileEdit::create("fresh.txt", "new content"),
            FileEdit::modify("existing.txt", vec![Patch::new("hello", "goodbye")]),
            FileEdit::modify("missing.txt", vec![Patch::new("a", "b")]),
            FileEdit::modify("existing.txt", vec![Patch::new("never there", "x")]),
        ];

        let written = write_edits(dir.path(), &edits);
        assert_eq!(written, vec!["fresh.txt".to_string(), "existing.txt".to_string()]);
    }

    #[test]
    fn preview_truncates_long_search_text() {
        let long = "a".repeat(80);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), SEARCH_PREVIEW_LEN + 3);
        assert_eq!(preview("short"), "short");
    }
}
