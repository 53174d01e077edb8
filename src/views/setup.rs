// Setup Flow - token, role and kid identity

use super::{expect_summary, failure_message, Effect, Purpose, Reply, SlowTimer};
use crate::client::{LedgerRequest, LedgerResponse, SummaryQuery};
use crate::config::{KidProfile, LedgerConfig};
use crate::error::{LedgerError, Result};
use crate::router::Route;
use crate::session::{Role, Session, SessionStore};
use chrono::{SecondsFormat, Utc};
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupField {
    Role,
    Kid,
    Token,
    ValidateOnSave,
}

impl SetupField {
    pub fn next(&self, role: Role) -> Self {
        match (self, role) {
            (SetupField::Role, Role::Kid) => SetupField::Kid,
            (SetupField::Role, Role::Parent) => SetupField::Token,
            (SetupField::Kid, _) => SetupField::Token,
            (SetupField::Token, _) => SetupField::ValidateOnSave,
            (SetupField::ValidateOnSave, _) => SetupField::Role,
        }
    }

    pub fn previous(&self, role: Role) -> Self {
        match (self, role) {
            (SetupField::Role, _) => SetupField::ValidateOnSave,
            (SetupField::Kid, _) => SetupField::Role,
            (SetupField::Token, Role::Kid) => SetupField::Kid,
            (SetupField::Token, Role::Parent) => SetupField::Role,
            (SetupField::ValidateOnSave, _) => SetupField::Token,
        }
    }
}

pub struct SetupView {
    session: SessionStore,
    kids: Vec<KidProfile>,
    default_kid: String,
    slow: SlowTimer,
    stored: Session,

    pub token: String,
    pub role: Role,
    pub kid_id: String,
    pub validate_before_save: bool,
    pub focus: SetupField,

    pub error: String,
    pub success: String,
    pub status: String,
    pub saving: bool,
    pub validating: bool,
}

impl SetupView {
    pub fn new(session: SessionStore, config: &LedgerConfig) -> Result<Self> {
        let stored = session.load()?;
        let default_kid = config.default_kid_id();
        let kid_id = if stored.kid_id.is_empty() {
            default_kid.clone()
        } else {
            stored.kid_id.clone()
        };

        Ok(Self {
            session,
            kids: config.kids.clone(),
            default_kid,
            slow: SlowTimer::default(),
            token: stored.token.clone(),
            role: stored.role.unwrap_or(Role::Kid),
            kid_id,
            validate_before_save: true,
            focus: SetupField::Role,
            error: String::new(),
            success: String::new(),
            status: String::new(),
            saving: false,
            validating: false,
            stored,
        })
    }

    // ------------------------------------------------------------------------
    // Form state
    // ------------------------------------------------------------------------

    pub fn stored(&self) -> &Session {
        &self.stored
    }

    pub fn kid_options(&self) -> &[KidProfile] {
        &self.kids
    }

    pub fn current_token(&self) -> &str {
        self.token.trim()
    }

    pub fn is_setup_complete(&self) -> bool {
        self.stored.is_complete()
    }

    pub fn is_busy(&self) -> bool {
        self.saving || self.validating
    }

    pub fn has_unsaved_changes(&self) -> bool {
        let stored = &self.stored;
        let kid_changed = match self.role {
            Role::Kid => self.kid_id != stored.kid_id,
            Role::Parent => !stored.kid_id.is_empty(),
        };

        self.current_token() != stored.token.trim()
            || self.role != stored.role.unwrap_or(Role::Kid)
            || kid_changed
    }

    fn clear_messages(&mut self) {
        self.error.clear();
        self.success.clear();
        self.status.clear();
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = token.into();
        self.clear_messages();
    }

    pub fn push_token_char(&mut self, c: char) {
        self.token.push(c);
        self.clear_messages();
    }

    pub fn pop_token_char(&mut self) {
        self.token.pop();
        self.clear_messages();
    }

    pub fn set_role(&mut self, role: Role) {
        self.role = role;
        if role == Role::Parent && self.focus == SetupField::Kid {
            self.focus = SetupField::Role;
        }
        self.clear_messages();
    }

    pub fn set_kid(&mut self, kid_id: impl Into<String>) {
        self.kid_id = kid_id.into();
        self.clear_messages();
    }

    /// Step through the roster, wrapping at either end.
    pub fn cycle_kid(&mut self, forward: bool) {
        if self.kids.is_empty() {
            return;
        }
        let n = self.kids.len();
        let pos = self.kids.iter().position(|k| k.id == self.kid_id);
        let next = match (pos, forward) {
            (None, _) => 0,
            (Some(i), true) => (i + 1) % n,
            (Some(i), false) => (i + n - 1) % n,
        };
        let id = self.kids[next].id.to_string();
        self.set_kid(id);
    }

    pub fn toggle_validate_before_save(&mut self) {
        self.validate_before_save = !self.validate_before_save;
    }

    // ------------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------------

    /// Check the token against the endpoint without saving anything.
    pub fn validate(&mut self) -> Option<Effect> {
        if self.is_busy() {
            return None;
        }
        self.clear_messages();
        if self.current_token().is_empty() {
            self.error = "Please enter a token".to_string();
            return None;
        }

        self.validating = true;
        self.status = "Validating token…".to_string();
        self.slow.arm();
        Some(self.validation_call(Purpose::Validate))
    }

    /// Save the form, validating first when that preference is on.
    pub fn save(&mut self) -> Option<Effect> {
        if self.is_busy() {
            return None;
        }
        self.clear_messages();
        if self.current_token().is_empty() {
            self.error = "Please enter a token".to_string();
            return None;
        }

        self.saving = true;
        if self.validate_before_save {
            self.validating = true;
            self.status = "Saving… (validating token first)".to_string();
            self.slow.arm();
            return Some(self.validation_call(Purpose::SaveValidate));
        }

        self.status = "Saving…".to_string();
        self.commit()
    }

    /// Forget the stored setup and reset the form.
    pub fn clear(&mut self) -> Option<Effect> {
        if self.is_busy() {
            return None;
        }
        if let Err(e) = self.session.clear_all() {
            warn!(error = %e, "clearing session failed");
            self.error = format!("Could not clear setup: {}", e);
            return None;
        }

        self.stored = Session::default();
        self.token.clear();
        self.role = Role::Kid;
        self.kid_id = self.default_kid.clone();
        self.focus = SetupField::Role;
        self.error.clear();
        self.status.clear();
        self.success = "Cleared saved setup.".to_string();
        info!("setup cleared");
        None
    }

    pub fn on_reply(&mut self, reply: Reply) -> Option<Effect> {
        match reply.purpose {
            Purpose::Validate => {
                self.finish_validation(reply.outcome);
                None
            }
            Purpose::SaveValidate => {
                if self.finish_validation(reply.outcome) {
                    self.commit()
                } else {
                    self.saving = false;
                    self.status = "Save cancelled (token not validated). You can turn off validation and try again."
                        .to_string();
                    None
                }
            }
            _ => None,
        }
    }

    pub fn tick(&mut self, now: Instant) {
        if self.slow.fire(now) && self.validating {
            self.status = "Still validating… (network may be slow)".to_string();
        }
    }

    fn validation_call(&self, purpose: Purpose) -> Effect {
        let query = SummaryQuery {
            token: self.current_token().to_string(),
            kid_id: match self.role {
                Role::Kid => Some(self.kid_id.clone()),
                Role::Parent => None,
            },
            limit: 1,
        };
        Effect::call(purpose, LedgerRequest::Summary(query))
    }

    fn finish_validation(&mut self, outcome: std::result::Result<LedgerResponse, LedgerError>) -> bool {
        self.validating = false;
        self.slow.disarm();
        self.status.clear();

        match expect_summary(outcome, "Token validation failed") {
            Ok(_) => {
                self.success = "Token looks valid.".to_string();
                true
            }
            Err(e) => {
                self.error = failure_message("validate", &e);
                false
            }
        }
    }

    /// Overwrite the stored session with the form contents.
    fn commit(&mut self) -> Option<Effect> {
        let token = self.current_token().to_string();
        let role = self.role;
        let kid_id = match role {
            Role::Kid => self.kid_id.clone(),
            Role::Parent => String::new(),
        };
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let written = self
            .session
            .clear_all()
            .and_then(|_| self.session.set_token(&token))
            .and_then(|_| self.session.set_role(role))
            .and_then(|_| match role {
                Role::Kid => self.session.set_kid_id(&kid_id),
                Role::Parent => Ok(()),
            })
            .and_then(|_| self.session.set_setup_updated_at(&now));

        self.saving = false;
        self.status.clear();

        if let Err(e) = written {
            warn!(error = %e, "saving session failed");
            self.error = format!("Could not save setup: {}", e);
            return None;
        }

        self.stored = Session {
            token,
            role: Some(role),
            kid_id,
            setup_updated_at: Some(now),
        };
        self.success = format!("Saved. Redirecting to {}…", role.title());
        info!(role = role.as_str(), "setup saved");

        Some(Effect::Navigate(match role {
            Role::Kid => Route::Kid,
            Role::Parent => Route::Parent,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{ack_ok, network_down, summary};
    use super::*;
    use crate::client::SummaryResponse;
    use crate::config::KIDS;
    use crate::db::MemoryBackend;
    use crate::views::Call;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    fn config() -> LedgerConfig {
        LedgerConfig {
            api_url: "http://127.0.0.1:9/exec".to_string(),
            kids: KIDS.to_vec(),
            data_dir: PathBuf::from("/tmp/ledger-test"),
        }
    }

    fn fresh() -> (SessionStore, SetupView) {
        let session = SessionStore::new(Arc::new(MemoryBackend::new()));
        let view = SetupView::new(session.clone(), &config()).unwrap();
        (session, view)
    }

    fn take_call(effect: Option<Effect>) -> Call {
        match effect {
            Some(Effect::Call(call)) => call,
            other => panic!("expected a call, got {:?}", other),
        }
    }

    #[test]
    fn test_defaults_from_empty_store() {
        let (_, view) = fresh();
        assert_eq!(view.token, "");
        assert_eq!(view.role, Role::Kid);
        assert_eq!(view.kid_id, "k1");
        assert!(view.validate_before_save);
        assert!(!view.is_setup_complete());
        // The default kid counts as a change until it has been saved
        assert!(view.has_unsaved_changes());
    }

    #[test]
    fn test_save_with_empty_token_writes_nothing() {
        let (session, mut view) = fresh();
        view.set_token("   ");

        assert_eq!(view.save(), None);
        assert_eq!(view.error, "Please enter a token");
        assert!(!view.saving);
        assert_eq!(session.load().unwrap(), Session::default());
    }

    #[test]
    fn test_validate_scopes_to_kid() {
        let (_, mut view) = fresh();
        view.set_token(" tok ");
        view.set_kid("k2");

        let call = take_call(view.validate());
        assert_eq!(call.purpose, Purpose::Validate);
        assert_eq!(
            call.request,
            LedgerRequest::Summary(SummaryQuery {
                token: "tok".into(),
                kid_id: Some("k2".into()),
                limit: 1,
            })
        );
        assert!(view.validating);

        // Buttons are disabled while validating
        assert_eq!(view.validate(), None);
        assert_eq!(view.save(), None);
    }

    #[test]
    fn test_validate_for_parent_is_unscoped() {
        let (_, mut view) = fresh();
        view.set_token("tok");
        view.set_role(Role::Parent);

        let call = take_call(view.validate());
        match call.request {
            LedgerRequest::Summary(q) => assert_eq!(q.kid_id, None),
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_save_with_validation_success_writes_and_navigates() {
        let (session, mut view) = fresh();
        view.set_token("tok");
        view.set_kid("k3");

        let call = take_call(view.save());
        assert_eq!(call.purpose, Purpose::SaveValidate);
        assert!(view.saving && view.validating);
        assert_eq!(session.load().unwrap(), Session::default());

        let effect = view.on_reply(call.complete(summary(&[], vec![])));
        assert_eq!(effect, Some(Effect::Navigate(Route::Kid)));
        assert!(!view.saving && !view.validating);

        let stored = session.load().unwrap();
        assert_eq!(stored.token, "tok");
        assert_eq!(stored.role, Some(Role::Kid));
        assert_eq!(stored.kid_id, "k3");
        assert!(stored.setup_updated_at.is_some());
        assert!(view.is_setup_complete());
        assert!(!view.has_unsaved_changes());
    }

    #[test]
    fn test_save_rejected_by_backend_writes_nothing() {
        let (session, mut view) = fresh();
        view.set_token("tok");

        let call = take_call(view.save());
        let rejected = Ok(LedgerResponse::Summary(SummaryResponse {
            ok: false,
            error: Some("Invalid token".into()),
            ..SummaryResponse::default()
        }));

        assert_eq!(view.on_reply(call.complete(rejected)), None);
        assert_eq!(view.error, "Invalid token");
        assert!(view.status.starts_with("Save cancelled"));
        assert!(!view.saving);
        assert_eq!(session.load().unwrap(), Session::default());
    }

    #[test]
    fn test_validate_network_error_has_prefix() {
        let (_, mut view) = fresh();
        view.set_token("tok");

        let call = take_call(view.validate());
        view.on_reply(call.complete(network_down()));
        assert_eq!(view.error, "Could not validate (network error): connection refused");
        assert!(!view.validating);
    }

    #[test]
    fn test_unexpected_reply_kind_fails_validation() {
        let (_, mut view) = fresh();
        view.set_token("tok");

        let call = take_call(view.validate());
        view.on_reply(call.complete(ack_ok()));
        assert!(view.error.contains("network error"));
    }

    #[test]
    fn test_save_without_validation_for_parent() {
        let (session, mut view) = fresh();
        session.set_kid_id("k2").unwrap();
        view.set_token("tok");
        view.set_role(Role::Parent);
        view.toggle_validate_before_save();

        assert_eq!(view.save(), Some(Effect::Navigate(Route::Parent)));

        let stored = session.load().unwrap();
        assert_eq!(stored.role, Some(Role::Parent));
        assert_eq!(stored.kid_id, "");
    }

    #[test]
    fn test_clear_resets_form_and_store() {
        let (session, mut view) = fresh();
        view.set_token("tok");
        view.set_role(Role::Parent);
        view.toggle_validate_before_save();
        view.save();

        assert_eq!(view.clear(), None);
        assert_eq!(session.load().unwrap(), Session::default());
        assert_eq!(view.token, "");
        assert_eq!(view.role, Role::Kid);
        assert_eq!(view.kid_id, "k1");
        assert_eq!(view.success, "Cleared saved setup.");
    }

    #[test]
    fn test_slow_notice_does_not_change_outcome() {
        let (_, mut view) = fresh();
        view.set_token("tok");

        let call = take_call(view.validate());
        view.tick(Instant::now() + Duration::from_secs(3));
        assert_eq!(view.status, "Still validating… (network may be slow)");
        assert!(view.validating);

        view.on_reply(call.complete(summary(&[], vec![])));
        assert_eq!(view.success, "Token looks valid.");
        assert_eq!(view.status, "");
    }

    #[test]
    fn test_cycle_kid_wraps() {
        let (_, mut view) = fresh();
        view.cycle_kid(false);
        assert_eq!(view.kid_id, "k3");
        view.cycle_kid(true);
        assert_eq!(view.kid_id, "k1");
    }

    #[test]
    fn test_unsaved_changes_tracking() {
        let (_, mut view) = fresh();
        view.set_token("new");
        assert!(view.has_unsaved_changes());
        view.set_token("");
        view.set_role(Role::Parent);
        assert!(view.has_unsaved_changes());
    }
}
