//! Shared session state for the matching workflow.
//!
//! One `SessionState` per user session, shared via `Arc` between the
//! controllers and any spawned fetches. There is no field poking from the
//! outside: every mutation goes through a named transition
//! (`begin_search`, `search_succeeded`, `patients_loaded`,
//! `begin_selection`, `match_received`, ...) and every transition that
//! commits an asynchronous completion takes the generation it was issued
//! under, returning `false` when a newer user action has superseded it.
//! That generation check is the only cancellation mechanism — requests are
//! never aborted, their results are discarded on arrival.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde::Serialize;

use crate::matching::{sort_results, SortKey};
use crate::services::{Condition, MatchReply, MatchResult, Patient, Trial};

/// Displayed match results for the selected trial.
#[derive(Debug, Clone, Serialize)]
pub struct MatchView {
    pub trial_id: String,
    pub results: Vec<MatchResult>,
    pub exclusion_count: u32,
    pub sort_key: SortKey,
}

#[derive(Default)]
struct SessionInner {
    condition: Option<Condition>,
    trials: Vec<Trial>,
    patients: Vec<Patient>,
    searching: bool,
    /// Informational "no results" message; not an error.
    notice: Option<String>,
    /// Retryable search failure, with condition context.
    search_error: Option<String>,
    selected_trial: Option<String>,
    match_pending: bool,
    match_error: Option<String>,
    match_view: Option<MatchView>,
    expanded_patient: Option<String>,
}

pub struct SessionState {
    inner: RwLock<SessionInner>,
    /// Bumped by every `begin_search`; tags all downstream commits.
    search_generation: AtomicU64,
    /// Bumped by every trial selection (and every new search).
    selection_generation: AtomicU64,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(SessionInner::default()),
            search_generation: AtomicU64::new(0),
            selection_generation: AtomicU64::new(0),
        }
    }

    // ── Search transitions ──────────────────────────────────

    /// Start a new search: clears the trial selection and match display,
    /// raises the loading flag, and supersedes every outstanding search
    /// and match completion. Returns the generation tagging this search.
    pub fn begin_search(&self, condition: Condition) -> u64 {
        let generation = self.search_generation.fetch_add(1, Ordering::SeqCst) + 1;
        // A new search also invalidates any pending trial selection
        self.selection_generation.fetch_add(1, Ordering::SeqCst);

        if let Ok(mut inner) = self.inner.write() {
            inner.condition = Some(condition);
            inner.trials.clear();
            inner.patients.clear();
            inner.searching = true;
            inner.notice = None;
            inner.search_error = None;
            inner.selected_trial = None;
            inner.match_pending = false;
            inner.match_error = None;
            inner.match_view = None;
            inner.expanded_patient = None;
        }
        tracing::debug!(%condition, generation, "Search started");
        generation
    }

    /// Commit a non-empty trial list. Returns `false` (discarded) when a
    /// newer search has superseded `generation`.
    pub fn search_succeeded(&self, generation: u64, trials: Vec<Trial>) -> bool {
        self.commit_search(generation, |inner| {
            tracing::info!(count = trials.len(), "Search results committed");
            inner.trials = trials;
            inner.searching = false;
        })
    }

    /// Commit an explicit empty outcome with its user-visible message.
    pub fn search_empty(&self, generation: u64, message: String) -> bool {
        self.commit_search(generation, |inner| {
            inner.notice = Some(message);
            inner.searching = false;
        })
    }

    /// Commit a transport failure with enough context for a retry.
    pub fn search_failed(&self, generation: u64, error: String) -> bool {
        self.commit_search(generation, |inner| {
            inner.search_error = Some(error);
            inner.searching = false;
        })
    }

    /// Commit the loaded patient batch for this search's condition.
    pub fn patients_loaded(&self, generation: u64, patients: Vec<Patient>) -> bool {
        self.commit_search(generation, |inner| {
            tracing::debug!(count = patients.len(), "Patient batch committed");
            inner.patients = patients;
        })
    }

    fn commit_search(&self, generation: u64, apply: impl FnOnce(&mut SessionInner)) -> bool {
        if generation != self.search_generation.load(Ordering::SeqCst) {
            tracing::debug!(generation, "Discarding completion for superseded search");
            return false;
        }
        let Ok(mut inner) = self.inner.write() else {
            return false;
        };
        // Re-check under the lock so a concurrent begin_search cannot slip in
        if generation != self.search_generation.load(Ordering::SeqCst) {
            return false;
        }
        apply(&mut inner);
        true
    }

    // ── Selection / match transitions ───────────────────────

    /// Select a trial for matching. Returns `None` when a call for this
    /// same trial is still pending; otherwise supersedes any pending call
    /// for another trial, resets the expansion state, and returns the
    /// generation tagging this selection.
    pub fn begin_selection(&self, trial_id: &str) -> Option<u64> {
        let mut guard = self.inner.write().ok()?;
        if guard.match_pending && guard.selected_trial.as_deref() == Some(trial_id) {
            return None;
        }
        let generation = self.selection_generation.fetch_add(1, Ordering::SeqCst) + 1;
        guard.selected_trial = Some(trial_id.to_string());
        guard.match_pending = true;
        guard.match_error = None;
        guard.match_view = None;
        guard.expanded_patient = None;
        Some(generation)
    }

    /// Commit match results for the selection tagged `generation`.
    pub fn match_received(&self, generation: u64, reply: MatchReply) -> bool {
        self.commit_selection(generation, |inner| {
            let trial_id = inner.selected_trial.clone().unwrap_or_default();
            let mut results = reply.ranked_results;
            sort_results(&mut results, SortKey::default());
            inner.match_view = Some(MatchView {
                trial_id,
                results,
                exclusion_count: reply.exclusion_count,
                sort_key: SortKey::default(),
            });
            inner.match_pending = false;
        })
    }

    /// Commit a match failure for the selection tagged `generation`.
    pub fn match_failed(&self, generation: u64, error: &str) -> bool {
        self.commit_selection(generation, |inner| {
            inner.match_error = Some(error.to_string());
            inner.match_pending = false;
        })
    }

    fn commit_selection(&self, generation: u64, apply: impl FnOnce(&mut SessionInner)) -> bool {
        let Ok(mut inner) = self.inner.write() else {
            return false;
        };
        if generation != self.selection_generation.load(Ordering::SeqCst) {
            tracing::debug!(generation, "Discarding completion for superseded selection");
            return false;
        }
        apply(&mut inner);
        true
    }

    /// Re-sort the displayed results in place. No-op without results.
    pub fn set_sort_key(&self, key: SortKey) {
        if let Ok(mut inner) = self.inner.write() {
            if let Some(view) = inner.match_view.as_mut() {
                sort_results(&mut view.results, key);
                view.sort_key = key;
            }
        }
    }

    /// Open one patient's match detail; at most one is open at a time, and
    /// toggling the open patient closes it.
    pub fn toggle_expansion(&self, patient_id: &str) {
        if let Ok(mut inner) = self.inner.write() {
            if inner.expanded_patient.as_deref() == Some(patient_id) {
                inner.expanded_patient = None;
            } else {
                inner.expanded_patient = Some(patient_id.to_string());
            }
        }
    }

    // ── Read access ─────────────────────────────────────────

    pub fn condition(&self) -> Option<Condition> {
        self.inner.read().ok().and_then(|i| i.condition)
    }

    pub fn trials(&self) -> Vec<Trial> {
        self.inner.read().map(|i| i.trials.clone()).unwrap_or_default()
    }

    pub fn patients(&self) -> Vec<Patient> {
        self.inner.read().map(|i| i.patients.clone()).unwrap_or_default()
    }

    pub fn is_searching(&self) -> bool {
        self.inner.read().map(|i| i.searching).unwrap_or(false)
    }

    pub fn notice(&self) -> Option<String> {
        self.inner.read().ok().and_then(|i| i.notice.clone())
    }

    pub fn search_error(&self) -> Option<String> {
        self.inner.read().ok().and_then(|i| i.search_error.clone())
    }

    pub fn selected_trial(&self) -> Option<String> {
        self.inner.read().ok().and_then(|i| i.selected_trial.clone())
    }

    pub fn is_match_pending(&self) -> bool {
        self.inner.read().map(|i| i.match_pending).unwrap_or(false)
    }

    pub fn match_error(&self) -> Option<String> {
        self.inner.read().ok().and_then(|i| i.match_error.clone())
    }

    pub fn match_view(&self) -> Option<MatchView> {
        self.inner.read().ok().and_then(|i| i.match_view.clone())
    }

    pub fn expanded_patient(&self) -> Option<String> {
        self.inner.read().ok().and_then(|i| i.expanded_patient.clone())
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
