//! Idempotent pull-request merge
//!
//! Parses the PR URL, drives the external merge backend (the `gh` CLI
//! in production, squash-merge with source-branch deletion, bounded by
//! a timeout), and records the `merged` transition. A failure whose
//! text indicates the PR was already merged is treated as success:
//! a retried call or manual intervention must not fail the ticket for
//! a merge that already happened.

use crate::error::MergeError;
use forge_ticket::{TicketId, TicketStore};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::info;

/// Bound on the external merge call
pub const MERGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Failure text that marks a merge as already done
const ALREADY_MERGED_MARKER: &str = "already been merged";

static PR_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"github\.com/([^/]+)/([^/]+)/pull/(\d+)").expect("PR URL pattern is valid")
});

/// A parsed pull-request reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestRef {
    /// Repository owner
    pub owner: String,
    /// Repository name
    pub repo: String,
    /// Pull-request number
    pub number: u64,
}

impl PullRequestRef {
    /// Parse `<host>/<owner>/<repo>/pull/<number>` from a PR URL
    ///
    /// # Errors
    /// Returns [`MergeError::InvalidPrUrl`] when the URL does not
    /// match; a fatal input error, not retried.
    pub fn parse(pr_url: &str) -> Result<Self, MergeError> {
        let captures = PR_URL_RE
            .captures(pr_url)
            .ok_or_else(|| MergeError::InvalidPrUrl(pr_url.to_string()))?;
        let number = captures[3]
            .parse()
            .map_err(|_| MergeError::InvalidPrUrl(pr_url.to_string()))?;
        Ok(Self {
            owner: captures[1].to_string(),
            repo: captures[2].to_string(),
            number,
        })
    }

    /// `owner/repo` slug as the merge command expects it
    #[inline]
    #[must_use]
    pub fn repo_slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Merge result classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDisposition {
    /// The backend merged the PR
    Merged,
    /// The PR had already been merged; treated as success
    AlreadyMerged,
}

/// External merge invocation seam
#[async_trait::async_trait]
pub trait MergeBackend: Send + Sync {
    /// Squash-merge a PR and delete its source branch
    async fn merge(&self, pr: &PullRequestRef) -> Result<MergeDisposition, MergeError>;
}

/// Production backend: `gh pr merge --squash --delete-branch`
///
/// `GH_TOKEN` is taken from `GITHUB_TOKEN` when that is set, otherwise
/// from the environment's own `GH_TOKEN`.
#[derive(Debug, Clone)]
pub struct GhCli {
    program: String,
    timeout: Duration,
}

impl GhCli {
    /// Create with the default program name and timeout
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: "gh".to_string(),
            timeout: MERGE_TIMEOUT,
        }
    }

    /// With a custom `gh` binary
    #[inline]
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// With a custom call bound
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, bound: Duration) -> Self {
        self.timeout = bound;
        self
    }
}

impl Default for GhCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MergeBackend for GhCli {
    async fn merge(&self, pr: &PullRequestRef) -> Result<MergeDisposition, MergeError> {
        let mut cmd = Command::new(&self.program);
        cmd.args([
            "pr",
            "merge",
            &pr.number.to_string(),
            "--repo",
            &pr.repo_slug(),
            "--squash",
            "--delete-branch",
        ]);
        if let Some(token) = resolve_gh_token(
            std::env::var_os("GITHUB_TOKEN"),
            std::env::var_os("GH_TOKEN"),
        ) {
            cmd.env("GH_TOKEN", token);
        }
        // A timed-out call drops the child future; without this the
        // command would survive the timeout and could still merge after
        // the ticket has been failed.
        cmd.kill_on_drop(true);

        let output = timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| MergeError::Timeout(self.timeout))?
            .map_err(MergeError::Spawn)?;

        classify_merge_output(
            output.status.success(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        )
    }
}

/// Token handed to the merge command: `GITHUB_TOKEN` wins over an
/// already-set `GH_TOKEN`
fn resolve_gh_token(
    github_token: Option<std::ffi::OsString>,
    gh_token: Option<std::ffi::OsString>,
) -> Option<std::ffi::OsString> {
    github_token.or(gh_token)
}

/// Classify a merge command's result
///
/// The idempotence rule lives here: a failed call whose output text
/// (primary message or captured error stream) says the PR was already
/// merged is success, not failure.
pub(crate) fn classify_merge_output(
    status_success: bool,
    stdout: &str,
    stderr: &str,
) -> Result<MergeDisposition, MergeError> {
    if status_success {
        return Ok(MergeDisposition::Merged);
    }
    if stdout.contains(ALREADY_MERGED_MARKER) || stderr.contains(ALREADY_MERGED_MARKER) {
        return Ok(MergeDisposition::AlreadyMerged);
    }
    let detail = if stderr.trim().is_empty() {
        stdout.trim().to_string()
    } else {
        stderr.trim().to_string()
    };
    Err(MergeError::CommandFailed(detail))
}

/// Drives the merge backend and records the `merged` transition
pub struct MergeCoordinator {
    store: Arc<dyn TicketStore>,
    backend: Arc<dyn MergeBackend>,
}

impl MergeCoordinator {
    /// Create a coordinator over a store and backend
    #[inline]
    pub fn new(store: Arc<dyn TicketStore>, backend: Arc<dyn MergeBackend>) -> Self {
        Self { store, backend }
    }

    /// Merge a ticket's PR and transition the ticket to `merged`
    ///
    /// Safe to call again for an already-merged PR: both calls end in
    /// the `merged` state.
    ///
    /// # Errors
    /// - [`MergeError::InvalidPrUrl`] for a malformed URL (fatal input
    ///   error, no retry)
    /// - [`MergeError::Timeout`] / [`MergeError::CommandFailed`] /
    ///   [`MergeError::Spawn`] from the external call; the caller
    ///   converts these into a `sentinel_failed` transition
    pub async fn merge(
        &self,
        ticket_id: TicketId,
        pr_url: &str,
        branch_name: Option<&str>,
    ) -> Result<(), MergeError> {
        let pr = PullRequestRef::parse(pr_url)?;
        info!(
            ticket = %ticket_id,
            pr = pr.number,
            repo = %pr.repo_slug(),
            branch = branch_name.unwrap_or("<none>"),
            "merging PR"
        );

        match self.backend.merge(&pr).await? {
            MergeDisposition::Merged => {}
            MergeDisposition::AlreadyMerged => {
                info!(pr = pr.number, "PR was already merged");
            }
        }

        self.store.set_merged(ticket_id, pr_url).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pr_url_parses_owner_repo_number() {
        let pr = PullRequestRef::parse("https://github.com/acme/widgets/pull/42").unwrap();
        assert_eq!(pr.owner, "acme");
        assert_eq!(pr.repo, "widgets");
        assert_eq!(pr.number, 42);
        assert_eq!(pr.repo_slug(), "acme/widgets");
    }

    #[test]
    fn malformed_pr_urls_are_fatal() {
        for url in [
            "https://github.com/acme/widgets",
            "https://github.com/acme/widgets/issues/42",
            "not a url",
            "",
        ] {
            assert!(matches!(
                PullRequestRef::parse(url),
                Err(MergeError::InvalidPrUrl(_))
            ));
        }
    }

    #[test]
    fn successful_output_is_merged() {
        assert_eq!(
            classify_merge_output(true, "merged", "").unwrap(),
            MergeDisposition::Merged
        );
    }

    #[test]
    fn already_merged_text_is_success_in_either_stream() {
        assert_eq!(
            classify_merge_output(false, "", "pull request #42 has already been merged").unwrap(),
            MergeDisposition::AlreadyMerged
        );
        assert_eq!(
            classify_merge_output(false, "has already been merged", "").unwrap(),
            MergeDisposition::AlreadyMerged
        );
    }

    #[test]
    fn other_failures_propagate() {
        let err = classify_merge_output(false, "", "merge conflict detected").unwrap_err();
        assert!(matches!(err, MergeError::CommandFailed(ref text) if text.contains("conflict")));
    }

    #[test]
    fn github_token_takes_precedence_over_gh_token() {
        let github = std::ffi::OsString::from("from-github");
        let gh = std::ffi::OsString::from("from-gh");

        assert_eq!(
            resolve_gh_token(Some(github.clone()), Some(gh.clone())),
            Some(github.clone())
        );
        assert_eq!(resolve_gh_token(Some(github.clone()), None), Some(github));
        assert_eq!(resolve_gh_token(None, Some(gh.clone())), Some(gh));
        assert_eq!(resolve_gh_token(None, None), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timed_out_merge_kills_the_command() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("merged.marker");
        let script = dir.path().join("slow-gh.sh");
        std::fs::write(
            &script,
            format!("#!/bin/sh\nsleep 1\ntouch {}\n", marker.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let backend = GhCli::new()
            .with_program(script.to_string_lossy().into_owned())
            .with_timeout(Duration::from_millis(100));
        let pr = PullRequestRef::parse("https://github.com/acme/widgets/pull/42").unwrap();

        let err = backend.merge(&pr).await.unwrap_err();
        assert!(matches!(err, MergeError::Timeout(_)));

        // The command must not finish its work after the bound fired.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }
}
