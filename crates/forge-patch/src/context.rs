//! Generation-context assembly
//!
//! Given a ticket's retrieval context, decides which referenced files
//! are create targets vs. modify targets, fetches (and truncates)
//! current content of modify targets, and renders the instruction
//! payload for the generation call.
//!
//! The retrieval context arrives either as raw serialized text or as
//! already-structured data; a parse failure is logged and treated as
//! "no lists available", falling back to a generic hint list.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Default line budget for embedded modify-target content
///
/// Files over the budget keep their head and tail, the two regions
/// most likely to anchor unique search text; the middle is elided.
pub const DEFAULT_LINE_BUDGET: usize = 300;

/// Parsed retrieval context: which files to create vs. modify
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RagContext {
    /// Paths the generator should create from scratch
    #[serde(default)]
    pub files_to_create: Vec<String>,
    /// Paths the generator should modify via surgical patches
    #[serde(default)]
    pub files_to_modify: Vec<String>,
}

impl RagContext {
    /// Parse from raw serialized text
    ///
    /// Returns `None` (after logging) when the text is not valid JSON;
    /// the caller falls back to its generic hint list.
    #[must_use]
    pub fn parse_raw(raw: &str) -> Option<Self> {
        match serde_json::from_str(raw) {
            Ok(ctx) => Some(ctx),
            Err(err) => {
                warn!(%err, "failed to parse rag context");
                None
            }
        }
    }

    /// Extract from already-structured data
    #[must_use]
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match serde_json::from_value(value.clone()) {
            Ok(ctx) => Some(ctx),
            Err(err) => {
                warn!(%err, "failed to parse rag context value");
                None
            }
        }
    }

    /// Neither list is populated
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files_to_create.is_empty() && self.files_to_modify.is_empty()
    }
}

/// Previous-attempt context carried into a retry prompt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryContext {
    /// Attempt number (first retry is 2)
    pub attempt: u32,
    /// Validation errors from the previous attempt
    pub validation_errors: Vec<String>,
}

/// Assembles generation payloads from tickets and checkouts
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    line_budget: usize,
}

impl ContextAssembler {
    /// Create an assembler with the default line budget
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            line_budget: DEFAULT_LINE_BUDGET,
        }
    }

    /// With a custom line budget
    #[inline]
    #[must_use]
    pub fn with_line_budget(mut self, budget: usize) -> Self {
        self.line_budget = budget;
        self
    }

    /// Fetch a modify target's current content, truncated to budget
    ///
    /// Returns `None` when the file does not exist under `repo_dir`.
    #[must_use]
    pub fn fetch_existing(&self, repo_dir: &Path, path: &str) -> Option<String> {
        let full_path = repo_dir.join(path);
        match fs::read_to_string(&full_path) {
            Ok(content) => Some(truncate_middle(&content, self.line_budget)),
            Err(_) => None,
        }
    }

    /// Resolve a ticket's retrieval context against a working checkout
    ///
    /// Modify targets that exist have their (possibly truncated)
    /// content fetched; missing ones are logged and left out of the
    /// embedded content while still appearing in the modify list.
    #[must_use]
    pub fn assemble(
        &self,
        repo_dir: &Path,
        rag_context: Option<&str>,
        fallback_hints: &[String],
    ) -> AssembledContext {
        let parsed = rag_context.and_then(RagContext::parse_raw).unwrap_or_default();

        let (files_to_create, files_to_modify) = if parsed.is_empty() {
            (fallback_hints.to_vec(), Vec::new())
        } else {
            (parsed.files_to_create, parsed.files_to_modify)
        };

        let mut existing = BTreeMap::new();
        for path in &files_to_modify {
            match self.fetch_existing(repo_dir, path) {
                Some(content) => {
                    existing.insert(path.clone(), content);
                }
                None => warn!(path = %path, "file to modify not found"),
            }
        }

        AssembledContext {
            files_to_create,
            files_to_modify,
            existing,
            fallback_hints: fallback_hints.to_vec(),
        }
    }
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// A resolved generation context, ready to render
#[derive(Debug, Clone)]
pub struct AssembledContext {
    /// Paths to create
    pub files_to_create: Vec<String>,
    /// Paths to modify
    pub files_to_modify: Vec<String>,
    /// Current content of modify targets, keyed by path
    pub existing: BTreeMap<String, String>,
    /// Generic hints used when no explicit lists were available
    pub fallback_hints: Vec<String>,
}

impl AssembledContext {
    /// Whether any modify targets are present
    #[inline]
    #[must_use]
    pub fn has_modifications(&self) -> bool {
        !self.files_to_modify.is_empty()
    }

    /// The files section of the generation payload
    ///
    /// Lists create targets and modify targets under separate headings
    /// and embeds each modify target's current content tagged with its
    /// path. Falls back to the generic hint instruction when neither
    /// list is populated.
    #[must_use]
    pub fn files_section(&self) -> String {
        let mut section = String::new();

        if !self.files_to_create.is_empty() {
            section.push_str("**Files to CREATE (new files):**\n");
            for path in &self.files_to_create {
                section.push_str("- ");
                section.push_str(path);
                section.push('\n');
            }
            section.push('\n');
        }

        if !self.files_to_modify.is_empty() {
            section.push_str("**Files to MODIFY (existing files - use surgical patches):**\n");
            for path in &self.files_to_modify {
                section.push_str("- ");
                section.push_str(path);
                section.push('\n');
            }
            section.push('\n');

            section.push_str("**Current content of files to modify:**\n\n");
            for (path, content) in &self.existing {
                section.push_str(&format!("<file path=\"{path}\">\n{content}\n</file>\n\n"));
            }
        }

        if section.is_empty() {
            if self.fallback_hints.is_empty() {
                section.push_str("Determine appropriate file structure");
            } else {
                section.push_str(&self.fallback_hints.join("\n"));
            }
        }

        section
    }

    /// Render the full instruction payload for the generation call
    #[must_use]
    pub fn render_prompt(
        &self,
        description: &str,
        acceptance_criteria: &[String],
        retry: Option<&RetryContext>,
    ) -> String {
        let mut prompt = String::new();

        prompt.push_str("## Task\n");
        prompt.push_str(description);
        prompt.push_str("\n\n");

        if !acceptance_criteria.is_empty() {
            prompt.push_str("## Acceptance Criteria\n");
            for criterion in acceptance_criteria {
                prompt.push_str("- ");
                prompt.push_str(criterion);
                prompt.push('\n');
            }
            prompt.push('\n');
        }

        prompt.push_str("## Files\n");
        prompt.push_str(&self.files_section());
        prompt.push('\n');

        prompt.push_str(OUTPUT_FORMAT);

        if let Some(retry) = retry {
            prompt.push_str("\n## Previous Attempt Failed\n");
            prompt.push_str(&format!("This is attempt {}. ", retry.attempt));
            prompt.push_str("Fix the following validation errors:\n");
            for err in &retry.validation_errors {
                prompt.push_str("- ");
                prompt.push_str(err);
                prompt.push('\n');
            }
        }

        prompt
    }
}

/// Output-format instructions appended to every generation payload
const OUTPUT_FORMAT: &str = r#"## Output Format
Respond with a JSON array of file edits.

### For NEW files:
```json
{
  "path": "src/new_module.rs",
  "action": "create",
  "content": "full file content"
}
```

### For MODIFYING existing files, use this format instead:
```json
{
  "path": "src/existing.rs",
  "action": "modify",
  "patches": [
    {
      "search": "exact text to find (include 2-5 lines of context for uniqueness)",
      "replace": "replacement text"
    }
  ]
}
```

CRITICAL RULES:
- For files listed under "Files to MODIFY": Use action "modify" with patches array
- Each patch needs unique "search" text (include surrounding context)
- NEVER regenerate entire files - only output the specific patches needed
- For NEW files: Use action "create" with full content
- Response must be valid JSON only
"#;

/// Truncate to a line budget, keeping head and tail
///
/// Content within budget is returned unchanged. Over budget, the first
/// and last `budget / 2` lines are kept and the elided middle is
/// replaced with a marker stating how many lines were dropped.
#[must_use]
pub fn truncate_middle(content: &str, budget: usize) -> String {
    let lines: Vec<&str> = content.split('\n').collect();
    if lines.len() <= budget {
        return content.to_string();
    }

    let half = budget / 2;
    let head = lines[..half].join("\n");
    let tail = lines[lines.len() - half..].join("\n");
    let omitted = lines.len() - budget;

    format!("{head}\n\n... [{omitted} lines truncated] ...\n\n{tail}")
}
