//! FORGE Patch System
//!
//! The coding agent's file-modification machinery:
//! - **FileEdit / Patch**: file-level instructions produced by the
//!   generation call: full content for new files, ordered
//!   search/replace patches for existing ones
//! - **Patch engine**: applies edits surgically, with replace-first
//!   semantics and best-effort skipping of unmatched patches
//! - **Context assembler**: decides which referenced files are create
//!   vs. modify targets, truncates large files head+tail, and renders
//!   the instruction payload for the generation call
//!
//! # Example
//!
//! ```rust,ignore
//! use forge_patch::{apply_file_edit, FileEdit, Patch};
//!
//! let edit = FileEdit::modify(
//!     "src/lib.rs",
//!     vec![Patch::new("fn old_name", "fn new_name")],
//! );
//! let applied = apply_file_edit(repo_dir, &edit)?;
//! println!("{}/{} patches applied", applied.patches_applied, applied.patches_total);
//! ```

#![warn(unreachable_pub)]

pub mod context;
pub mod edit;
pub mod engine;

// Re-exports
pub use context::{AssembledContext, ContextAssembler, RagContext, RetryContext, DEFAULT_LINE_BUDGET};
pub use edit::{EditAction, FileEdit, Patch};
pub use engine::{apply_file_edit, write_edits, AppliedEdit, PatchError};
