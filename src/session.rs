// Session Store - token, role, kid id and last-saved stamp
// Read-through handle over a KvBackend; nothing is cached here

use crate::db::KvBackend;
use crate::error::Result;
use chrono::{DateTime, Local};
use std::fmt;
use std::sync::Arc;

const KEY_TOKEN: &str = "ledger_token";
const KEY_ROLE: &str = "ledger_role";
const KEY_KID_ID: &str = "ledger_kid_id";
const KEY_SETUP_UPDATED_AT: &str = "ledger_setup_updated_at";

const ALL_KEYS: [&str; 4] = [KEY_TOKEN, KEY_ROLE, KEY_KID_ID, KEY_SETUP_UPDATED_AT];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Kid,
    Parent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Kid => "kid",
            Role::Parent => "parent",
        }
    }

    /// Anything other than the two known roles reads as unset.
    pub fn parse(raw: &str) -> Option<Role> {
        match raw {
            "kid" => Some(Role::Kid),
            "parent" => Some(Role::Parent),
            _ => None,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Role::Kid => "Kid",
            Role::Parent => "Parent",
        }
    }

    pub fn toggle(&self) -> Role {
        match self {
            Role::Kid => Role::Parent,
            Role::Parent => Role::Kid,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the four stored fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub role: Option<Role>,
    pub kid_id: String,
    pub setup_updated_at: Option<String>,
}

impl Session {
    /// Token present and role chosen.
    pub fn is_complete(&self) -> bool {
        !self.token.trim().is_empty() && self.role.is_some()
    }
}

#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn KvBackend>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    pub fn token(&self) -> Result<String> {
        Ok(self.backend.get(KEY_TOKEN)?.unwrap_or_default())
    }

    pub fn set_token(&self, token: &str) -> Result<()> {
        self.backend.set(KEY_TOKEN, token.trim())
    }

    pub fn role(&self) -> Result<Option<Role>> {
        Ok(self.backend.get(KEY_ROLE)?.as_deref().and_then(Role::parse))
    }

    pub fn set_role(&self, role: Role) -> Result<()> {
        self.backend.set(KEY_ROLE, role.as_str())
    }

    pub fn kid_id(&self) -> Result<String> {
        Ok(self.backend.get(KEY_KID_ID)?.unwrap_or_default())
    }

    pub fn set_kid_id(&self, kid_id: &str) -> Result<()> {
        self.backend.set(KEY_KID_ID, kid_id)
    }

    pub fn setup_updated_at(&self) -> Result<Option<String>> {
        self.backend.get(KEY_SETUP_UPDATED_AT)
    }

    pub fn set_setup_updated_at(&self, stamp: &str) -> Result<()> {
        self.backend.set(KEY_SETUP_UPDATED_AT, stamp)
    }

    pub fn clear_all(&self) -> Result<()> {
        self.backend.remove_all(&ALL_KEYS)
    }

    pub fn load(&self) -> Result<Session> {
        Ok(Session {
            token: self.token()?,
            role: self.role()?,
            kid_id: self.kid_id()?,
            setup_updated_at: self.setup_updated_at()?,
        })
    }
}

/// Hide all but the ends of a token.
pub fn mask_token(raw: &str) -> String {
    let token = raw.trim();
    let chars: Vec<char> = token.chars().collect();
    let n = chars.len();

    if n == 0 {
        return "(empty)".to_string();
    }
    if n <= 8 {
        return format!("{} ({} chars)", "•".repeat(n), n);
    }

    let head: String = chars[..4].iter().collect();
    let tail: String = chars[n - 4..].iter().collect();
    format!("{}…{} ({} chars)", head, tail, n)
}

/// Local time for an RFC 3339 stamp; unparseable input comes back as-is.
pub fn format_stamp(stamp: Option<&str>) -> String {
    match stamp {
        None | Some("") => "—".to_string(),
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(dt) => dt.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
            Err(_) => raw.to_string(),
        },
    }
}
