// Child View - one kid's balance, recent entries and the new-entry form

use super::{
    expect_ack, expect_summary, failure_message, format_amount, still_working, Effect, Purpose,
    RefreshReason, Reply, SlowTimer,
};
use crate::client::{
    LedgerEntry, LedgerRequest, LedgerResponse, SubmitEntry, SummaryQuery, DEFAULT_SUMMARY_LIMIT,
};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::router::Route;
use crate::session::SessionStore;
use chrono::Utc;
use std::time::Instant;
use tracing::{info, warn};

/// Rows shown in the recent list.
pub const KID_RECENT_CAP: usize = 30;

/// The form opens with the most common chore filled in.
pub const DEFAULT_AMOUNT: &str = "5";
pub const DEFAULT_DESCRIPTION: &str = "dishwasher";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KidField {
    Amount,
    Description,
}

impl KidField {
    pub fn toggle(&self) -> Self {
        match self {
            KidField::Amount => KidField::Description,
            KidField::Description => KidField::Amount,
        }
    }
}

pub struct KidView {
    session: SessionStore,
    slow: SlowTimer,
    refresh_seq: u64,
    silent_refresh: bool,
    refetch_pending: bool,

    pub token: String,
    pub kid_id: String,
    pub kid_name: String,

    pub amount: String,
    pub description: String,
    pub focus: KidField,

    pub busy: bool,
    pub loading: bool,
    pub refreshing: bool,
    pub error: String,
    pub status: String,
    pub success: String,

    pub recent: Vec<LedgerEntry>,
    pub balance: Option<f64>,
    pub last_updated_at: Option<String>,
}

impl KidView {
    /// Session fields are read once, at mount.
    pub fn new(session: SessionStore, config: &LedgerConfig) -> Result<Self> {
        let token = session.token()?;
        let kid_id = session.kid_id()?;
        let kid_name = config.kid_name(&kid_id).to_string();

        Ok(Self {
            session,
            slow: SlowTimer::default(),
            refresh_seq: 0,
            silent_refresh: false,
            refetch_pending: false,
            token,
            kid_id,
            kid_name,
            amount: DEFAULT_AMOUNT.to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
            focus: KidField::Amount,
            busy: false,
            loading: true,
            refreshing: false,
            error: String::new(),
            status: String::new(),
            success: String::new(),
            recent: Vec::new(),
            balance: None,
            last_updated_at: None,
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
        if self.refreshing || self.busy {
            return None;
        }
        Some(self.start_refresh(RefreshReason::Manual))
    }

    pub fn submit(&mut self) -> Option<Effect> {
        if self.busy || self.refreshing {
            return None;
        }
        self.error.clear();
        self.success.clear();

        let entry = match SubmitEntry::new(&self.token, &self.kid_id, &self.amount, &self.description) {
            Ok(entry) => entry,
            Err(e) => {
                self.error = e.detail();
                return None;
            }
        };

        self.busy = true;
        self.status = "Submitting…".to_string();
        self.slow.arm();
        Some(Effect::call(Purpose::Submit, LedgerRequest::Submit(entry)))
    }

    /// "Change setup": forget the session and go back to Setup.
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
            Purpose::Submit => self.finish_submit(reply.outcome),
            Purpose::Refresh { seq } if seq == self.refresh_seq => self.finish_refresh(reply.outcome),
            _ => None,
        }
    }

    pub fn tick(&mut self, now: Instant) {
        if self.slow.fire(now) && (self.busy || self.refreshing) {
            self.status = still_working(&self.status);
        }
    }

    // ------------------------------------------------------------------------
    // Display helpers
    // ------------------------------------------------------------------------

    pub fn visible_recent(&self) -> &[LedgerEntry] {
        let n = self.recent.len().min(KID_RECENT_CAP);
        &self.recent[..n]
    }

    pub fn balance_display(&self) -> String {
        match (self.loading, self.balance) {
            (false, Some(balance)) => format_amount(balance),
            _ => "…".to_string(),
        }
    }

    pub fn submit_label(&self) -> &'static str {
        if self.busy {
            "Submitting…"
        } else if self.refreshing {
            "Refreshing…"
        } else {
            "Submit (creates pending request)"
        }
    }

    pub fn focused_input(&mut self) -> &mut String {
        match self.focus {
            KidField::Amount => &mut self.amount,
            KidField::Description => &mut self.description,
        }
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
                RefreshReason::Initial => "Loading your dashboard…".to_string(),
                _ => "Refreshing…".to_string(),
            };
        }

        self.refreshing = true;
        self.silent_refresh = silent;
        self.refresh_seq += 1;
        self.slow.arm();

        let query = SummaryQuery {
            limit: DEFAULT_SUMMARY_LIMIT,
            ..SummaryQuery::new(&self.token)
        };
        Effect::call(Purpose::Refresh { seq: self.refresh_seq }, LedgerRequest::Summary(query))
    }

    fn finish_submit(&mut self, outcome: std::result::Result<LedgerResponse, LedgerError>) -> Option<Effect> {
        match expect_ack(outcome, "submit failed") {
            Ok(()) => {
                info!(kid = %self.kid_id, "entry submitted");
                self.success = "Submitted (pending approval).".to_string();
                self.status.clear();
                self.description.clear();

                // Busy holds until a summary fetched after the write lands
                if self.refreshing {
                    self.refetch_pending = true;
                    None
                } else {
                    Some(self.start_refresh(RefreshReason::AfterWrite))
                }
            }
            Err(e) => {
                self.error = failure_message("submit", &e);
                self.status.clear();
                self.busy = false;
                self.slow.disarm();
                None
            }
        }
    }

    fn finish_refresh(&mut self, outcome: std::result::Result<LedgerResponse, LedgerError>) -> Option<Effect> {
        match expect_summary(outcome, "summary failed") {
            Ok(summary) => {
                self.balance = Some(summary.balance_for(&self.kid_id));
                let kid_id = self.kid_id.clone();
                self.recent = summary
                    .recent
                    .into_iter()
                    .filter(|entry| entry.kid_id == kid_id)
                    .collect();
                self.last_updated_at = Some(Utc::now().to_rfc3339());
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

        if self.refetch_pending {
            self.refetch_pending = false;
            return Some(self.start_refresh(RefreshReason::AfterWrite));
        }

        self.slow.disarm();
        if self.busy {
            self.busy = false;
            self.status.clear();
        }
        None
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
    use std::time::Duration;

    fn view_for(kid_id: &str) -> (SessionStore, KidView) {
        let session = SessionStore::new(Arc::new(MemoryBackend::new()));
        session.set_token("tok").unwrap();
        session.set_role(Role::Kid).unwrap();
        session.set_kid_id(kid_id).unwrap();

        let config = LedgerConfig {
            api_url: "http://127.0.0.1:9/exec".to_string(),
            kids: KIDS.to_vec(),
            data_dir: PathBuf::from("/tmp/ledger-test"),
        };
        let view = KidView::new(session.clone(), &config).unwrap();
        (session, view)
    }

    fn take_call(effect: Option<Effect>) -> Call {
        match effect {
            Some(Effect::Call(call)) => call,
            other => panic!("expected a call, got {:?}", other),
        }
    }

    fn loaded(kid_id: &str) -> (SessionStore, KidView) {
        let (session, mut view) = view_for(kid_id);
        let call = take_call(view.mount());
        assert_eq!(view.on_reply(call.complete(summary(&[], vec![]))), None);
        (session, view)
    }

    #[test]
    fn test_mount_reads_session_and_fetches_summary() {
        let (_, mut view) = view_for("k2");
        assert_eq!(view.kid_name, "Bob");
        assert!(view.loading);
        assert_eq!(view.balance_display(), "…");

        let call = take_call(view.mount());
        match &call.request {
            LedgerRequest::Summary(q) => {
                assert_eq!(q.token, "tok");
                assert_eq!(q.kid_id, None);
                assert_eq!(q.limit, 80);
            }
            other => panic!("unexpected request {:?}", other),
        }
        assert_eq!(view.status, "Loading your dashboard…");
    }

    #[test]
    fn test_recent_is_filtered_to_signed_in_kid() {
        let (_, mut view) = view_for("k1");
        let call = take_call(view.mount());

        let reply = summary(
            &[("k1", 7.0), ("k2", 1.0)],
            vec![entry("r1", "k1", 5.0, "pending"), entry("r2", "k2", 2.0, "approved")],
        );
        view.on_reply(call.complete(reply));

        assert_eq!(view.recent.len(), 1);
        assert_eq!(view.recent[0].request_id, "r1");
        assert_eq!(view.balance_display(), "7.00");
        assert!(!view.loading && !view.refreshing);
        assert!(view.last_updated_at.is_some());
    }

    #[test]
    fn test_missing_balance_is_zero() {
        let (_, mut view) = view_for("k3");
        let call = take_call(view.mount());
        view.on_reply(call.complete(summary(&[("k1", 7.0)], vec![])));
        assert_eq!(view.balance_display(), "0.00");
    }

    #[test]
    fn test_form_opens_prefilled_and_submits_as_is() {
        let (_, mut view) = loaded("k2");
        assert_eq!(view.amount, "5");
        assert_eq!(view.description, "dishwasher");

        let call = take_call(view.submit());
        match &call.request {
            LedgerRequest::Submit(s) => {
                assert_eq!(s.amount, 5.0);
                assert_eq!(s.description, "dishwasher");
                assert_eq!(s.kid_id, "k2");
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_second_refresh_while_in_flight_is_noop() {
        let (_, mut view) = view_for("k1");
        assert!(view.mount().is_some());
        assert_eq!(view.refresh(), None);
        assert_eq!(view.mount(), None);
    }

    #[test]
    fn test_invalid_amount_rejected_locally() {
        let (_, mut view) = loaded("k1");

        for bad in ["0", "abc", ""] {
            view.amount = bad.to_string();
            view.description = "dishwasher".to_string();
            assert_eq!(view.submit(), None);
            assert_eq!(view.error, "Amount must be a non-zero number (signed).");
            assert!(!view.busy);
        }

        view.amount = "5".to_string();
        view.description = "  ".to_string();
        assert_eq!(view.submit(), None);
        assert_eq!(view.error, "Description required.");
    }

    #[test]
    fn test_submit_then_refresh_before_idle() {
        let (_, mut view) = loaded("k1");
        view.amount = "5".to_string();
        view.description = "dishwasher".to_string();

        let call = take_call(view.submit());
        match &call.request {
            LedgerRequest::Submit(s) => {
                assert_eq!(s.amount, 5.0);
                assert_eq!(s.description, "dishwasher");
                assert_eq!(s.kid_id, "k1");
            }
            other => panic!("unexpected request {:?}", other),
        }
        assert!(view.busy);
        assert_eq!(view.submit(), None);
        assert_eq!(view.refresh(), None);

        let refresh = take_call(view.on_reply(call.complete(ack_ok())));
        assert!(matches!(refresh.purpose, Purpose::Refresh { .. }));
        assert!(view.busy, "busy holds until the post-write summary lands");
        assert_eq!(view.description, "");

        let after = summary(&[("k1", 0.0)], vec![entry("r9", "k1", 5.0, "pending")]);
        assert_eq!(view.on_reply(refresh.complete(after)), None);
        assert!(!view.busy);
        assert_eq!(view.recent.len(), 1);
        assert_eq!(view.success, "Submitted (pending approval).");
    }

    #[test]
    fn test_retry_uses_fresh_nonce() {
        let (_, mut view) = loaded("k1");
        view.amount = "1".to_string();
        view.description = "trash".to_string();

        let first = take_call(view.submit());
        let first_request = first.request.clone();
        view.on_reply(first.complete(network_down()));
        assert_eq!(view.error, "Could not submit (network error): connection refused");
        assert!(!view.busy);

        let second = take_call(view.submit());
        match (&first_request, &second.request) {
            (LedgerRequest::Submit(a), LedgerRequest::Submit(b)) => assert_ne!(a.nonce, b.nonce),
            other => panic!("unexpected requests {:?}", other),
        }
    }

    #[test]
    fn test_backend_rejection_is_verbatim() {
        let (_, mut view) = loaded("k1");
        view.amount = "-2".to_string();
        view.description = "candy".to_string();

        let call = take_call(view.submit());
        assert_eq!(view.on_reply(call.complete(ack_rejected("Kid is frozen"))), None);
        assert_eq!(view.error, "Kid is frozen");
        assert!(!view.busy);
        assert_eq!(view.description, "candy");
    }

    #[test]
    fn test_refresh_error_then_retry() {
        let (_, mut view) = view_for("k1");
        let call = take_call(view.mount());
        view.on_reply(call.complete(network_down()));
        assert_eq!(view.error, "Could not refresh (network error): connection refused");
        assert!(!view.loading);

        let retry = take_call(view.refresh());
        assert_eq!(view.error, "");
        assert_eq!(view.status, "Refreshing…");
        view.on_reply(retry.complete(summary(&[], vec![])));
        assert_eq!(view.status, "");
    }

    #[test]
    fn test_slow_notice_during_submit() {
        let (_, mut view) = loaded("k1");
        view.amount = "3".to_string();
        view.description = "lawn".to_string();
        take_call(view.submit());

        view.tick(Instant::now() + Duration::from_secs(3));
        assert_eq!(view.status, "Submitting… (still working…)");
    }

    #[test]
    fn test_logout_clears_session() {
        let (session, mut view) = loaded("k1");
        assert_eq!(view.logout(), Some(Effect::Navigate(Route::Setup)));
        assert!(!session.load().unwrap().is_complete());
    }

    #[test]
    fn test_visible_recent_is_capped() {
        let (_, mut view) = view_for("k1");
        let call = take_call(view.mount());
        let rows = (0..45).map(|i| entry(&format!("r{}", i), "k1", 1.0, "approved")).collect();
        view.on_reply(call.complete(summary(&[], rows)));

        assert_eq!(view.recent.len(), 45);
        assert_eq!(view.visible_recent().len(), KID_RECENT_CAP);
    }
}
