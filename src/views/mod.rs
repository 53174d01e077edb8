// View state machines - Setup, Kid, Parent
//
// Views never talk to the network themselves. An action returns an `Effect`
// (a ledger call to run, or a navigation), and the outcome of a call comes
// back through the view's `on_reply`. That keeps every view testable without
// a runtime and lets the shell drop replies meant for an unmounted view.

pub mod kid;
pub mod parent;
pub mod setup;

pub use kid::KidView;
pub use parent::ParentView;
pub use setup::SetupView;

use crate::client::{LedgerRequest, LedgerResponse, ReviewDecision, SummaryResponse};
use crate::error::LedgerError;
use crate::router::Route;
use std::time::{Duration, Instant};

/// After this long a pending call gets a "still working" notice.
pub const SLOW_THRESHOLD: Duration = Duration::from_millis(2500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    Initial,
    Manual,
    /// Follow-up to a write; keeps the success message and shows no status.
    AfterWrite,
}

/// What a call was made for, echoed back with its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Purpose {
    Validate,
    SaveValidate,
    Refresh { seq: u64 },
    Submit,
    Review { request_id: String, decision: ReviewDecision },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub purpose: Purpose,
    pub request: LedgerRequest,
}

impl Call {
    pub fn complete(self, outcome: Result<LedgerResponse, LedgerError>) -> Reply {
        Reply {
            purpose: self.purpose,
            outcome,
        }
    }
}

#[derive(Debug)]
pub struct Reply {
    pub purpose: Purpose,
    pub outcome: Result<LedgerResponse, LedgerError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Call(Call),
    Navigate(Route),
}

impl Effect {
    pub fn call(purpose: Purpose, request: LedgerRequest) -> Self {
        Effect::Call(Call { purpose, request })
    }
}

/// Fires once, `SLOW_THRESHOLD` after being armed.
#[derive(Debug, Default)]
pub struct SlowTimer {
    deadline: Option<Instant>,
}

impl SlowTimer {
    pub fn arm(&mut self) {
        self.deadline = Some(Instant::now() + SLOW_THRESHOLD);
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    /// True exactly once when `now` has passed the deadline.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Append the "still working" suffix to a status line.
pub(crate) fn still_working(status: &str) -> String {
    if status.is_empty() {
        "Still working…".to_string()
    } else {
        format!("{} (still working…)", status)
    }
}

/// Two decimals, sign kept.
pub fn format_amount(amount: f64) -> String {
    format!("{:.2}", amount)
}

/// Reply outcome as a user-facing message for the action named `what`.
pub(crate) fn failure_message(what: &str, err: &LedgerError) -> String {
    if err.is_transport() {
        format!("Could not {} (network error): {}", what, err.detail())
    } else {
        err.detail()
    }
}

pub(crate) fn expect_summary(
    outcome: Result<LedgerResponse, LedgerError>,
    fallback: &str,
) -> Result<SummaryResponse, LedgerError> {
    match outcome? {
        LedgerResponse::Summary(summary) => summary.into_result(fallback),
        LedgerResponse::Ack(_) => Err(LedgerError::Decode("expected a summary reply".to_string())),
    }
}

pub(crate) fn expect_ack(
    outcome: Result<LedgerResponse, LedgerError>,
    fallback: &str,
) -> Result<(), LedgerError> {
    match outcome? {
        LedgerResponse::Ack(ack) => ack.into_result(fallback),
        LedgerResponse::Summary(_) => Err(LedgerError::Decode("expected an ack reply".to_string())),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::client::{AckResponse, LedgerEntry, LedgerResponse, SummaryResponse};
    use crate::error::LedgerError;

    pub fn entry(request_id: &str, kid_id: &str, amount: f64, status: &str) -> LedgerEntry {
        serde_json::from_value(serde_json::json!({
            "request_id": request_id,
            "created_at": "2025-01-01T10:00:00Z",
            "kid_id": kid_id,
            "amount": amount,
            "description": format!("entry {}", request_id),
            "status": status,
        }))
        .unwrap()
    }

    pub fn summary(balances: &[(&str, f64)], recent: Vec<LedgerEntry>) -> Result<LedgerResponse, LedgerError> {
        Ok(LedgerResponse::Summary(SummaryResponse {
            ok: true,
            scope: None,
            balances: balances.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            recent,
            error: None,
        }))
    }

    pub fn ack_ok() -> Result<LedgerResponse, LedgerError> {
        Ok(LedgerResponse::Ack(AckResponse { ok: true, error: None }))
    }

    pub fn ack_rejected(msg: &str) -> Result<LedgerResponse, LedgerError> {
        Ok(LedgerResponse::Ack(AckResponse {
            ok: false,
            error: Some(msg.to_string()),
        }))
    }

    pub fn network_down() -> Result<LedgerResponse, LedgerError> {
        Err(LedgerError::Network("connection refused".to_string()))
    }
}
