//! The diff-review flow and its trigger sites.
//!
//! `open_review` builds the virtual documents, opens the comparison
//! view, and registers the [`ActiveDiff`]; the returned receiver is
//! what the agent's `open_diff` call blocks on. The remaining functions
//! are the independent triggers that can end a review: accept/reject
//! buttons, the `close_diff` tool call, and manual tab dismissal. Each
//! trigger composes `resolve` + `cleanup` + unregistration itself; the
//! one-shot guards inside [`ActiveDiff`] make the composition safe to
//! race.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bridge_core::{DiffId, DiffVerdict, SessionId};
use bridge_protocol::{CloseDiffResult, OpenDiffParams};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::diff::{ActiveDiff, DiffStateManager};
use crate::host::EditorHost;

/// URI scheme of the virtual documents backing a review.
pub const DIFF_SCHEME: &str = "bridge-diff";

/// Monotonic counter making every review's document identity unique,
/// even across repeated reviews of the same file.
static NEXT_REVIEW: AtomicU64 = AtomicU64::new(0);

/// Errors opening a review.
#[derive(Debug, Error)]
pub enum OpenReviewError {
    /// The original file exists but could not be read. A missing file
    /// is not an error - it is the new-file case, compared against an
    /// empty original.
    #[error("cannot read {path}: {source}")]
    UnreadableOriginal {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Opens a diff review and returns the receiver for its verdict.
///
/// The caller awaits the receiver; it resolves when any trigger
/// delivers a verdict. If the review is abandoned (tab closed without a
/// verdict) the receiver errors instead - by design the agent call is
/// left unanswered rather than fabricating a rejection.
pub fn open_review(
    host: &Arc<dyn EditorHost>,
    diffs: &DiffStateManager,
    session_id: Option<SessionId>,
    params: OpenDiffParams,
) -> Result<oneshot::Receiver<DiffVerdict>, OpenReviewError> {
    let original = host
        .read_original(&params.file_path)
        .map_err(|source| OpenReviewError::UnreadableOriginal {
            path: params.file_path.clone(),
            source,
        })?
        .unwrap_or_default();

    let review_nr = NEXT_REVIEW.fetch_add(1, Ordering::Relaxed);
    let original_uri = format!("{DIFF_SCHEME}://review-{review_nr}/original{}", params.file_path);
    let modified_uri = format!("{DIFF_SCHEME}://review-{review_nr}/modified{}", params.file_path);
    let diff_id = DiffId::from_modified_uri(&modified_uri);

    host.set_virtual_content(&original_uri, &original);
    host.set_virtual_content(&modified_uri, &params.new_contents);
    host.open_diff_view(&original_uri, &modified_uri, &params.tab_name);

    let cleanup = {
        let host = Arc::clone(host);
        let original_uri = original_uri.clone();
        let modified_uri = modified_uri.clone();
        let tab_name = params.tab_name.clone();
        move || {
            host.clear_virtual_content(&original_uri);
            host.clear_virtual_content(&modified_uri);
            host.close_diff_view(&tab_name);
        }
    };

    let (diff, rx) = ActiveDiff::new(
        diff_id,
        params.tab_name,
        session_id,
        original_uri,
        modified_uri,
        params.new_contents,
        cleanup,
    );

    info!(
        diff_id = %diff.diff_id,
        tab_name = %diff.tab_name,
        session_id = ?diff.session_id,
        "diff review opened"
    );
    diffs.register(diff);
    Ok(rx)
}

/// Accept button: the proposed contents are saved.
///
/// Returns false if no review holds this tab name.
pub fn accept_review(diffs: &DiffStateManager, tab_name: &str) -> bool {
    finish_review(diffs, tab_name, DiffVerdict::Saved)
}

/// Reject button: the proposal is declined.
pub fn reject_review(diffs: &DiffStateManager, tab_name: &str) -> bool {
    finish_review(diffs, tab_name, DiffVerdict::rejected())
}

/// The `close_diff` tool call. Treated as a rejection; closing a
/// review that is no longer open is the expected idempotent outcome,
/// reported via the `closed` flag rather than an error.
pub fn close_review_by_name(diffs: &DiffStateManager, tab_name: &str) -> CloseDiffResult {
    CloseDiffResult {
        closed: finish_review(diffs, tab_name, DiffVerdict::rejected()),
    }
}

/// The editor observed the review tab being closed without any verdict
/// action. Cleanup runs, but `resolve` is deliberately not invoked: the
/// waiting agent call stays pending so the client can distinguish
/// "closed" from "rejected".
pub fn dismiss_review(diffs: &DiffStateManager, tab_name: &str) -> bool {
    let Some(diff) = diffs.get_by_tab_name(tab_name) else {
        return false;
    };
    debug!(diff_id = %diff.diff_id, tab_name, "review dismissed without verdict");
    diff.cleanup();
    diffs.unregister(&diff.diff_id);
    true
}

fn finish_review(diffs: &DiffStateManager, tab_name: &str, verdict: DiffVerdict) -> bool {
    let Some(diff) = diffs.get_by_tab_name(tab_name) else {
        return false;
    };
    debug!(diff_id = %diff.diff_id, tab_name, saved = verdict.is_saved(), "review finished");
    diff.resolve(verdict);
    diff.cleanup();
    diffs.unregister(&diff.diff_id);
    true
}
