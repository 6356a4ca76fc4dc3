//! File-edit instructions produced by the generation call
//!
//! A generation response is an ordered list of [`FileEdit`] records,
//! each tagged `create` (with full content) or `modify` (with ordered
//! [`Patch`] records). Patch fields are optional at the wire level
//! because the generator may emit malformed entries; the engine skips
//! those rather than failing the whole file.

use serde::{Deserialize, Serialize};

/// One targeted search/replace edit
///
/// Application is sequential and stateful: each patch sees the file
/// content as left by the previous one. A patch has no identity beyond
/// its position in the list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    /// Exact text to locate
    #[serde(default)]
    pub search: Option<String>,
    /// Replacement text
    #[serde(default)]
    pub replace: Option<String>,
}

impl Patch {
    /// Create a well-formed patch
    #[inline]
    #[must_use]
    pub fn new(search: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            search: Some(search.into()),
            replace: Some(replace.into()),
        }
    }

    /// Both fields present, with non-empty search text
    #[inline]
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.search.as_deref().is_some_and(|s| !s.is_empty()) && self.replace.is_some()
    }
}

/// How a file edit is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditAction {
    /// Write full content to a new file
    Create,
    /// Apply ordered patches to an existing file
    Modify,
}

/// A file-level instruction from the generation call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEdit {
    /// Path relative to the working checkout
    pub path: String,
    /// Create or modify
    pub action: EditAction,
    /// Full content (create only)
    #[serde(default)]
    pub content: Option<String>,
    /// Ordered patches (modify only)
    #[serde(default)]
    pub patches: Vec<Patch>,
}

impl FileEdit {
    /// Create-edit with full content
    #[inline]
    #[must_use]
    pub fn create(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            action: EditAction::Create,
            content: Some(content.into()),
            patches: Vec::new(),
        }
    }

    /// Modify-edit with ordered patches
    #[inline]
    #[must_use]
    pub fn modify(path: impl Into<String>, patches: Vec<Patch>) -> Self {
        Self {
            path: path.into(),
            action: EditAction::Modify,
            content: None,
            patches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_well_formedness() {
        assert!(Patch::new("a", "b").is_well_formed());
        assert!(!Patch { search: None, replace: Some("b".into()) }.is_well_formed());
        assert!(!Patch { search: Some("a".into()), replace: None }.is_well_formed());
        assert!(!Patch::new("", "b").is_well_formed());
    }

    #[test]
    fn file_edit_deserializes_generator_output() {
        let raw = r#"{
            "path": "src/app.rs",
            "action": "modify",
            "patches": [
                { "search": "old", "replace": "new" },
                { "search": "dangling" }
            ]
        }"#;
        let edit: FileEdit = serde_json::from_str(raw).unwrap();
        assert_eq!(edit.action, EditAction::Modify);
        assert_eq!(edit.patches.len(), 2);
        assert!(edit.patches[0].is_well_formed());
        assert!(!edit.patches[1].is_well_formed());
    }

    #[test]
    fn create_edit_deserializes_without_patches() {
        let raw = r#"{ "path": "src/new.rs", "action": "create", "content": "fn main() {}" }"#;
        let edit: FileEdit = serde_json::from_str(raw).unwrap();
        assert_eq!(edit.action, EditAction::Create);
        assert!(edit.patches.is_empty());
        assert_eq!(edit.content.as_deref(), Some("fn main() {}"));
    }
}
