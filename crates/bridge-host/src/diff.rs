//! Registry of in-flight diff reviews.
//!
//! Each pending review is an [`ActiveDiff`] with two one-shot
//! operations: `resolve` delivers the verdict to the blocked agent call
//! (at most once), and `cleanup` releases the virtual documents and the
//! comparison view (exactly once, no matter how many triggers race to
//! fire it). The manager indexes reviews by id and by tab name; the
//! most recently registered review wins a tab-name lookup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bridge_core::{DiffId, DiffVerdict, SessionId};
use tokio::sync::oneshot;
use tracing::debug;

type CleanupFn = Box<dyn Fn() + Send + Sync>;

/// One pending diff-review interaction.
pub struct ActiveDiff {
    pub diff_id: DiffId,

    /// Review tab title. Not unique: a later review may reuse the name
    /// while an earlier one is still winding down.
    pub tab_name: String,

    /// Owning session, when the review was opened by an agent call.
    pub session_id: Option<SessionId>,

    /// Virtual document holding the on-disk contents.
    pub original_uri: String,

    /// Virtual document holding the proposed contents.
    pub modified_uri: String,

    /// The proposed file content, kept for the save path.
    pub new_contents: String,

    resolve_tx: Mutex<Option<oneshot::Sender<DiffVerdict>>>,
    cleaned_up: AtomicBool,
    cleanup: CleanupFn,
}

impl ActiveDiff {
    /// Creates the review record plus the receiver the blocked call
    /// waits on.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        diff_id: DiffId,
        tab_name: impl Into<String>,
        session_id: Option<SessionId>,
        original_uri: impl Into<String>,
        modified_uri: impl Into<String>,
        new_contents: impl Into<String>,
        cleanup: impl Fn() + Send + Sync + 'static,
    ) -> (Arc<Self>, oneshot::Receiver<DiffVerdict>) {
        let (tx, rx) = oneshot::channel();
        let diff = Arc::new(Self {
            diff_id,
            tab_name: tab_name.into(),
            session_id,
            original_uri: original_uri.into(),
            modified_uri: modified_uri.into(),
            new_contents: new_contents.into(),
            resolve_tx: Mutex::new(Some(tx)),
            cleaned_up: AtomicBool::new(false),
            cleanup: Box::new(cleanup),
        });
        (diff, rx)
    }

    /// Delivers the verdict to the waiting call.
    ///
    /// The continuation is single-use: any invocation after the first
    /// is a no-op, so trigger sites never need to guard against racing
    /// each other.
    pub fn resolve(&self, verdict: DiffVerdict) {
        let sender = match self.resolve_tx.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            Some(tx) => {
                if tx.send(verdict).is_err() {
                    debug!(diff_id = %self.diff_id, "verdict receiver already dropped");
                }
            }
            None => debug!(diff_id = %self.diff_id, "diff already resolved, ignoring"),
        }
    }

    /// Releases the virtual documents and closes the comparison view.
    ///
    /// Guarded by a one-shot flag: only the first invocation has
    /// effect.
    pub fn cleanup(&self) {
        if !self.cleaned_up.swap(true, Ordering::SeqCst) {
            (self.cleanup)();
        }
    }

    /// Whether `cleanup` has run.
    pub fn cleanup_ran(&self) -> bool {
        self.cleaned_up.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ActiveDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveDiff")
            .field("diff_id", &self.diff_id)
            .field("tab_name", &self.tab_name)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct DiffIndex {
    by_id: HashMap<DiffId, Arc<ActiveDiff>>,
    by_tab: HashMap<String, DiffId>,
}

impl DiffIndex {
    /// Removes one entry, dropping the tab-name mapping only if it
    /// still points at this diff - never a newer one sharing the name.
    fn remove(&mut self, diff_id: &DiffId) -> Option<Arc<ActiveDiff>> {
        let diff = self.by_id.remove(diff_id)?;
        if self.by_tab.get(&diff.tab_name) == Some(diff_id) {
            self.by_tab.remove(&diff.tab_name);
        }
        Some(diff)
    }
}

/// Tracks every in-flight review.
#[derive(Default)]
pub struct DiffStateManager {
    inner: Mutex<DiffIndex>,
}

impl DiffStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn index(&self) -> MutexGuard<'_, DiffIndex> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts a review. A tab name already mapped to a different diff
    /// is re-pointed at the new one.
    pub fn register(&self, diff: Arc<ActiveDiff>) {
        let mut index = self.index();
        index
            .by_tab
            .insert(diff.tab_name.clone(), diff.diff_id.clone());
        index.by_id.insert(diff.diff_id.clone(), diff);
    }

    /// Removes a review by id. Unknown ids are a no-op.
    pub fn unregister(&self, diff_id: &DiffId) {
        self.index().remove(diff_id);
    }

    pub fn get(&self, diff_id: &DiffId) -> Option<Arc<ActiveDiff>> {
        self.index().by_id.get(diff_id).cloned()
    }

    /// Most recently registered review holding this tab name.
    pub fn get_by_tab_name(&self, name: &str) -> Option<Arc<ActiveDiff>> {
        let index = self.index();
        let diff_id = index.by_tab.get(name)?;
        index.by_id.get(diff_id).cloned()
    }

    pub fn has_active_diffs(&self) -> bool {
        !self.index().by_id.is_empty()
    }

    /// Resolves every review owned by `session_id` as rejected with the
    /// "client disconnected" reason. Reviews owned by other sessions or
    /// by no session are untouched.
    pub fn close_all_for_session(&self, session_id: &SessionId) {
        let victims: Vec<Arc<ActiveDiff>> = {
            let mut index = self.index();
            let ids: Vec<DiffId> = index
                .by_id
                .values()
                .filter(|d| d.session_id.as_ref() == Some(session_id))
                .map(|d| d.diff_id.clone())
                .collect();
            ids.iter().filter_map(|id| index.remove(id)).collect()
        };

        if !victims.is_empty() {
            debug!(
                session_id = %session_id,
                count = victims.len(),
                "closing reviews for disconnected session"
            );
        }

        for diff in victims {
            diff.resolve(DiffVerdict::client_disconnected());
            diff.cleanup();
        }
    }
}
