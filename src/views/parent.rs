// Parent View - every kid's balance, the pending queue, and review actions
//
// Review busy state is per entry: approving one row leaves the other rows
// actionable. A row stays busy until a summary fetched after its review has
// landed, so the list on screen always reflects the write.

use super::{
    expect_ack, expect_summary, failure_message, format_amount, still_working, Effect, Purpose,
    RefreshReason, Reply, SlowTimer,
};
use crate::client::{
    LedgerEntry, LedgerRequest, LedgerResponse, ReviewDecision, ReviewEntry, SummaryQuery,
};
use crate::config::{KidProfile, LedgerConfig};
use crate::error::{LedgerError, Result};
use crate::router::Route;
use crate::session::SessionStore;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{info, warn};

/// Rows asked for in a parent summary.
pub const PARENT_SUMMARY_LIMIT: u32 = 200;

/// Rows shown in the "recent (all)" list.
pub const PARENT_RECENT_CAP: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReviewState {
    Sending(ReviewDecision),
    /// Review accepted; waiting for refresh `after_seq` to complete.
    Settling { decision: ReviewDecision, after_seq: u64 },
}

impl ReviewState {
    fn decision(&self) -> ReviewDecision {
        match self {
            ReviewState::Sending(decision) => *decision,
            ReviewState::Settling { decision, .. } => *decision,
        }
    }
}

pub struct ParentView {
    session: SessionStore,
    kids: Vec<KidProfile>,
    slow: SlowTimer,
    reviews: HashMap<String, ReviewState>,
    refresh_seq: u64,
    silent_refresh: bool,
    refetch_pending: bool,

    pub token: String,
    pub loading: bool,
    pub refreshing: bool,
    pub error: String,
    pub status: String,
    pub success: String,

    pub recent: Vec<LedgerEntry>,
    pub balances: HashMap<String, f64>,
    pub last_updated_at: Option<String>,

    /// Cursor into `pending()`.
    pub selected: usize,
}

impl ParentView {
    pub fn new(session: SessionStore, config: &LedgerConfig) -> Result<Self> {
        let token = session.token()?;

        Ok(Self {
            session,
            kids: config.kids.clone(),
            slow: SlowTimer::default(),
            reviews: HashMap::new(),
            refresh_seq: 0,
            silent_refresh: false,
            refetch_pending: false,
            token,
            loading: true,
            refreshing: false,
            error: String::new(),
            status: String::new(),
            success: String::new(),
            recent: Vec::new(),
            balances: HashMap::new(),
            last_updated_at: None,
            selected: 0,
        })
    }

    pub fn mount(&mut self) -> Option<Effect> {
        if self.refreshing {
            return None;
        }
        Some(self.start_refresh(RefreshReason::Initial))
    }

    /// Manual refresh, also the Retry action.
    pub fn refresh(&mut self) -> Option<Effect> {
        if self.refreshing || !self.reviews.is_empty() {
            return None;
        }
        Some(self.start_refresh(RefreshReason::Manual))
    }

    pub fn review(&mut self, request_id: &str, decision: ReviewDecision) -> Option<Effect> {
        if self.loading || self.refreshing || self.reviews.contains_key(request_id) {
            return None;
        }
        self.error.clear();
        self.success.clear();
        self.status = match decision {
            ReviewDecision::Approved => "Approving…".to_string(),
            ReviewDecision::Denied => "Denying…".to_string(),
        };
        self.slow.arm();
        self.reviews
            .insert(request_id.to_string(), ReviewState::Sending(decision));

        let review = ReviewEntry {
            token: self.token.clone(),
            request_id: request_id.to_string(),
            decision,
            note: None,
            reviewer: None,
        };
        Some(Effect::call(
            Purpose::Review {
                request_id: request_id.to_string(),
                decision,
            },
            LedgerRequest::Review(review),
        ))
    }

    /// Review whichever pending row the cursor is on.
    pub fn review_selected(&mut self, decision: ReviewDecision) -> Option<Effect> {
        let request_id = self.pending().get(self.selected)?.request_id.clone();
        self.review(&request_id, decision)
    }

    pub fn logout(&mut self) -> Option<Effect> {
        if let Err(e) = self.session.clear_all() {
            warn!(error = %e, "clearing session failed");
            self.error = format!("Could not clear setup: {}", e);
            return None;
        }
        Some(Effect::Navigate(Route::Setup))
    }

    pub fn on_reply(&mut self, reply: Reply) -> Option<Effect> {
        match reply.purpose {
            Purpose::Review {
                request_id,
                decision,
            } => self.finish_review(request_id, decision, reply.outcome),
            Purpose::Refresh { seq } if seq == self.refresh_seq => self.finish_refresh(seq, reply.outcome),
            _ => None,
        }
    }

    pub fn tick(&mut self, now: Instant) {
        if self.slow.fire(now) && (self.refreshing || !self.reviews.is_empty()) {
            self.status = still_working(&self.status);
        }
    }

    // ------------------------------------------------------------------------
    // Display helpers
    // ------------------------------------------------------------------------

    pub fn pending(&self) -> Vec<&LedgerEntry> {
        self.recent.iter().filter(|entry| entry.is_pending()).collect()
    }

    pub fn visible_recent(&self) -> &[LedgerEntry] {
        let n = self.recent.len().min(PARENT_RECENT_CAP);
        &self.recent[..n]
    }

    /// Roster order, missing balances shown as zero.
    pub fn balance_rows(&self) -> Vec<(&str, String)> {
        self.kids
            .iter()
            .map(|kid| {
                let shown = if self.loading {
                    "…".to_string()
                } else {
                    format_amount(self.balances.get(kid.id).copied().unwrap_or(0.0))
                };
                (kid.name, shown)
            })
            .collect()
    }

    pub fn kid_name<'a>(&'a self, id: &'a str) -> &'a str {
        KidProfile::name_for(&self.kids, id)
    }

    pub fn is_entry_busy(&self, request_id: &str) -> bool {
        self.reviews.contains_key(request_id)
    }

    /// Decision in flight for this entry, if any.
    pub fn entry_action(&self, request_id: &str) -> Option<ReviewDecision> {
        self.reviews.get(request_id).map(ReviewState::decision)
    }

    pub fn can_review(&self, request_id: &str) -> bool {
        !(self.loading || self.refreshing || self.is_entry_busy(request_id))
    }

    pub fn select_next(&mut self) {
        let len = self.pending().len();
        if len == 0 {
            return;
        }
        self.selected = if self.selected >= len - 1 { 0 } else { self.selected + 1 };
    }

    pub fn select_previous(&mut self) {
        let len = self.pending().len();
        if len == 0 {
            return;
        }
        self.selected = if self.selected == 0 { len - 1 } else { self.selected - 1 };
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn start_refresh(&mut self, reason: RefreshReason) -> Effect {
        let silent = reason == RefreshReason::AfterWrite;
        self.error.clear();
        if !silent {
            self.success.clear();
            self.status = match reason {
                RefreshReason::Initial => "Loading Parent dashboard…".to_string(),
                _ => "Refreshing…".to_string(),
            };
        }

        self.refreshing = true;
        self.silent_refresh = silent;
        self.refresh_seq += 1;
        self.slow.arm();

        let query = SummaryQuery {
            limit: PARENT_SUMMARY_LIMIT,
            ..SummaryQuery::new(&self.token)
        };
        Effect::call(Purpose::Refresh { seq: self.refresh_seq }, LedgerRequest::Summary(query))
    }

    fn finish_review(
        &mut self,
        request_id: String,
        decision: ReviewDecision,
        outcome: std::result::Result<LedgerResponse, LedgerError>,
    ) -> Option<Effect> {
        if !matches!(self.reviews.get(&request_id), Some(ReviewState::Sending(_))) {
            return None;
        }

        match expect_ack(outcome, "review failed") {
            Ok(()) => {
                info!(request_id = %request_id, decision = decision.as_str(), "entry reviewed");
                self.success = match decision {
                    ReviewDecision::Approved => "Approved.".to_string(),
                    ReviewDecision::Denied => "Denied.".to_string(),
                };
                self.clear_status_if_idle();

                if self.refreshing {
                    // The in-flight refresh may predate this write; fetch once more after it
                    self.refetch_pending = true;
                    self.reviews.insert(
                        request_id,
                        ReviewState::Settling { decision, after_seq: self.refresh_seq + 1 },
                    );
                    None
                } else {
                    let effect = self.start_refresh(RefreshReason::AfterWrite);
                    self.reviews.insert(
                        request_id,
                        ReviewState::Settling { decision, after_seq: self.refresh_seq },
                    );
                    Some(effect)
                }
            }
            Err(e) => {
                self.error = failure_message("review", &e);
                self.reviews.remove(&request_id);
                self.clear_status_if_idle();
                self.disarm_if_idle();
                None
            }
        }
    }

    fn finish_refresh(
        &mut self,
        seq: u64,
        outcome: std::result::Result<LedgerResponse, LedgerError>,
    ) -> Option<Effect> {
        match expect_summary(outcome, "summary failed") {
            Ok(summary) => {
                self.recent = summary.recent;
                self.balances = summary.balances;
                self.last_updated_at = Some(Utc::now().to_rfc3339());
                let pending = self.pending().len();
                if self.selected >= pending {
                    self.selected = pending.saturating_sub(1);
                }
            }
            Err(e) => {
                self.error = failure_message("refresh", &e);
            }
        }

        self.refreshing = false;
        self.loading = false;
        if !self.silent_refresh {
            self.status.clear();
        }

        self.reviews.retain(|_, state| match state {
            ReviewState::Settling { after_seq, .. } => *after_seq > seq,
            ReviewState::Sending(_) => true,
        });

        if self.refetch_pending {
            self.refetch_pending = false;
            return Some(self.start_refresh(RefreshReason::AfterWrite));
        }

        self.clear_status_if_idle();
        self.disarm_if_idle();
        None
    }

    fn clear_status_if_idle(&mut self) {
        let sending = self
            .reviews
            .values()
            .any(|state| matches!(state, ReviewState::Sending(_)));
        if !sending && !self.refreshing {
            self.status.clear();
        }
    }

    fn disarm_if_idle(&mut self) {
        if !self.refreshing && self.reviews.is_empty() {
            self.slow.disarm();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{ack_ok, ack_rejected, entry, network_down, summary};
    use super::*;
    use crate::config::KIDS;
    use crate::db::MemoryBackend;
    use crate::session::Role;
    use crate::views::Call;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn config(kids: &[KidProfile]) -> LedgerConfig {
        LedgerConfig {
            api_url: "http://127.0.0.1:9/exec".to_string(),
            kids: kids.to_vec(),
            data_dir: PathBuf::from("/tmp/ledger-test"),
        }
    }

    fn view_with(kids: &[KidProfile]) -> (SessionStore, ParentView) {
        let session = SessionStore::new(Arc::new(MemoryBackend::new()));
        session.set_token("parent-tok").unwrap();
        session.set_role(Role::Parent).unwrap();
        let view = ParentView::new(session.clone(), &config(kids)).unwrap();
        (session, view)
    }

    fn take_call(effect: Option<Effect>) -> Call {
        match effect {
            Some(Effect::Call(call)) => call,
            other => panic!("expected a call, got {:?}", other),
        }
    }

    fn loaded(recent: Vec<LedgerEntry>) -> ParentView {
        let (_, mut view) = view_with(KIDS);
        let call = take_call(view.mount());
        view.on_reply(call.complete(summary(&[], recent)));
        view
    }

    #[test]
    fn test_mount_asks_for_parent_wide_summary() {
        let (_, mut view) = view_with(KIDS);
        let call = take_call(view.mount());
        match call.request {
            LedgerRequest::Summary(q) => {
                assert_eq!(q.token, "parent-tok");
                assert_eq!(q.kid_id, None);
                assert_eq!(q.limit, PARENT_SUMMARY_LIMIT);
            }
            other => panic!("unexpected request {:?}", other),
        }
        assert_eq!(view.status, "Loading Parent dashboard…");
    }

    #[test]
    fn test_shows_all_entries_and_pending_subset() {
        let view = loaded(vec![
            entry("r1", "k1", 5.0, "pending"),
            entry("r2", "k2", 2.0, "approved"),
            entry("r3", "k2", -1.0, "pending"),
        ]);

        assert_eq!(view.recent.len(), 3);
        let pending: Vec<&str> = view.pending().iter().map(|e| e.request_id.as_str()).collect();
        assert_eq!(pending, vec!["r1", "r3"]);
    }

    #[test]
    fn test_balance_rows_default_missing_to_zero() {
        let roster = [
            KidProfile { id: "k1", name: "Alice" },
            KidProfile { id: "k2", name: "Bob" },
        ];
        let (_, mut view) = view_with(&roster);
        assert_eq!(view.balance_rows()[0].1, "…");

        let call = take_call(view.mount());
        view.on_reply(call.complete(summary(&[("k1", 12.5)], vec![])));

        assert_eq!(
            view.balance_rows(),
            vec![("Alice", "12.50".to_string()), ("Bob", "0.00".to_string())]
        );
    }

    #[test]
    fn test_approve_refetches_before_clearing_busy() {
        let mut view = loaded(vec![entry("r1", "k1", 5.0, "pending")]);

        let call = take_call(view.review("r1", ReviewDecision::Approved));
        match &call.request {
            LedgerRequest::Review(r) => {
                assert_eq!(r.request_id, "r1");
                assert_eq!(r.decision, ReviewDecision::Approved);
            }
            other => panic!("unexpected request {:?}", other),
        }
        assert!(view.is_entry_busy("r1"));
        assert_eq!(view.entry_action("r1"), Some(ReviewDecision::Approved));
        assert_eq!(view.status, "Approving…");

        let refresh = take_call(view.on_reply(call.complete(ack_ok())));
        assert!(matches!(refresh.request, LedgerRequest::Summary(_)));
        assert!(view.is_entry_busy("r1"));

        let after = summary(&[("k1", 5.0)], vec![entry("r1", "k1", 5.0, "approved")]);
        assert_eq!(view.on_reply(refresh.complete(after)), None);
        assert!(!view.is_entry_busy("r1"));
        assert!(view.pending().is_empty());
        assert_eq!(view.success, "Approved.");
        assert_eq!(view.status, "");
    }

    #[test]
    fn test_busy_is_per_entry() {
        let mut view = loaded(vec![
            entry("r1", "k1", 5.0, "pending"),
            entry("r2", "k2", 3.0, "pending"),
        ]);

        let first = take_call(view.review("r1", ReviewDecision::Approved));
        assert_eq!(view.review("r1", ReviewDecision::Denied), None);
        assert!(!view.can_review("r1"));
        assert!(view.can_review("r2"));

        let second = take_call(view.review("r2", ReviewDecision::Denied));
        assert_eq!(view.refresh(), None, "manual refresh waits for reviews");

        // First review lands and starts a refresh
        let refresh = take_call(view.on_reply(first.complete(ack_ok())));

        // Second lands while that refresh is in flight: no extra call yet
        assert_eq!(view.on_reply(second.complete(ack_ok())), None);
        assert!(view.is_entry_busy("r2"));

        // First refresh clears r1 only and schedules a follow-up for r2
        let follow_up = take_call(view.on_reply(refresh.complete(summary(&[], vec![
            entry("r1", "k1", 5.0, "approved"),
            entry("r2", "k2", 3.0, "pending"),
        ]))));
        assert!(!view.is_entry_busy("r1"));
        assert!(view.is_entry_busy("r2"));

        assert_eq!(view.on_reply(follow_up.complete(summary(&[], vec![
            entry("r1", "k1", 5.0, "approved"),
            entry("r2", "k2", 3.0, "denied"),
        ]))), None);
        assert!(!view.is_entry_busy("r2"));
        assert!(view.pending().is_empty());
    }

    #[test]
    fn test_review_failure_clears_busy() {
        let mut view = loaded(vec![entry("r1", "k1", 5.0, "pending")]);

        let call = take_call(view.review("r1", ReviewDecision::Denied));
        assert_eq!(view.on_reply(call.complete(ack_rejected("Already reviewed"))), None);
        assert_eq!(view.error, "Already reviewed");
        assert!(!view.is_entry_busy("r1"));

        let call = take_call(view.review("r1", ReviewDecision::Denied));
        view.on_reply(call.complete(network_down()));
        assert_eq!(view.error, "Could not review (network error): connection refused");
        assert!(view.can_review("r1"));
    }

    #[test]
    fn test_review_blocked_while_loading() {
        let (_, mut view) = view_with(KIDS);
        take_call(view.mount());
        assert_eq!(view.review("r1", ReviewDecision::Approved), None);
    }

    #[test]
    fn test_selection_and_review_selected() {
        let mut view = loaded(vec![
            entry("r1", "k1", 5.0, "pending"),
            entry("r2", "k2", 2.0, "approved"),
            entry("r3", "k3", 1.0, "pending"),
        ]);

        view.select_next();
        assert_eq!(view.selected, 1);
        view.select_next();
        assert_eq!(view.selected, 0);
        view.select_previous();

        let call = take_call(view.review_selected(ReviewDecision::Approved));
        assert_eq!(call.purpose, Purpose::Review { request_id: "r3".into(), decision: ReviewDecision::Approved });
    }

    #[test]
    fn test_kid_name_falls_back_to_id() {
        let view = loaded(vec![]);
        assert_eq!(view.kid_name("k1"), "Alice");
        assert_eq!(view.kid_name("zz"), "zz");
    }

    #[test]
    fn test_recent_cap() {
        let rows = (0..50).map(|i| entry(&format!("r{}", i), "k1", 1.0, "approved")).collect();
        let view = loaded(rows);
        assert_eq!(view.visible_recent().len(), PARENT_RECENT_CAP);
    }
}
