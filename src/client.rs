// Ledger Client - submit / review / summary against the ledger endpoint
// One URL, POST, form-encoded body, `action` picks the operation

use crate::config::SOURCE_TAG;
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Default number of rows asked for in a summary.
pub const DEFAULT_SUMMARY_LIMIT: u32 = 80;

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EntryStatus {
    Pending,
    Approved,
    Denied,
    #[default]
    Unknown,
}

impl EntryStatus {
    /// Case-insensitive; anything unrecognised is `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => EntryStatus::Pending,
            "approved" => EntryStatus::Approved,
            "denied" => EntryStatus::Denied,
            _ => EntryStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Approved => "approved",
            EntryStatus::Denied => "denied",
            EntryStatus::Unknown => "unknown",
        }
    }
}

/// One row of the ledger sheet, as the endpoint reports it.
///
/// Sheet cells come back loosely typed: a typed-in "100" arrives as a
/// number, blank cells as `""` or `null`. One odd cell must not sink the
/// whole summary, so every field decodes leniently.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LedgerEntry {
    #[serde(default, deserialize_with = "de_text")]
    pub request_id: String,
    #[serde(default, deserialize_with = "de_text")]
    pub created_at: String,
    #[serde(default, deserialize_with = "de_text")]
    pub kid_id: String,
    #[serde(default, deserialize_with = "de_amount")]
    pub amount: f64,
    #[serde(default, deserialize_with = "de_text")]
    pub description: String,
    #[serde(default, deserialize_with = "de_status")]
    pub status: EntryStatus,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub reviewed_at: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub reviewed_by: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub review_note: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub nonce: Option<String>,
}

impl LedgerEntry {
    pub fn is_pending(&self) -> bool {
        self.status == EntryStatus::Pending
    }
}

/// Reply to `submit` and `review`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AckResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl AckResponse {
    /// `ok: false` becomes `Rejected`, using `fallback` when the endpoint gave no message.
    pub fn into_result(self, fallback: &str) -> Result<()> {
        if self.ok {
            Ok(())
        } else {
            Err(rejection(self.error, fallback))
        }
    }
}

/// Reply to `summary`: balances plus the most recent rows.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SummaryResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default, deserialize_with = "de_balances")]
    pub balances: HashMap<String, f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub recent: Vec<LedgerEntry>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SummaryResponse {
    pub fn into_result(self, fallback: &str) -> Result<SummaryResponse> {
        if self.ok {
            Ok(self)
        } else {
            Err(rejection(self.error, fallback))
        }
    }

    /// Approved balance for one kid; a kid with no approved rows has zero.
    pub fn balance_for(&self, kid_id: &str) -> f64 {
        self.balances.get(kid_id).copied().unwrap_or(0.0)
    }
}

fn rejection(error: Option<String>, fallback: &str) -> LedgerError {
    match error {
        Some(msg) if !msg.trim().is_empty() => LedgerError::Rejected(msg),
        _ => LedgerError::Rejected(fallback.to_string()),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f64),
    Text(String),
    Flag(bool),
}

impl NumberOrText {
    fn value(self) -> Option<f64> {
        let value = match self {
            NumberOrText::Number(n) => Some(n),
            NumberOrText::Text(s) => s.trim().parse::<f64>().ok(),
            NumberOrText::Flag(_) => None,
        };
        value.filter(|n| n.is_finite())
    }

    fn text(self) -> String {
        match self {
            NumberOrText::Number(n) => n.to_string(),
            NumberOrText::Text(s) => s,
            NumberOrText::Flag(b) => b.to_string(),
        }
    }
}

// Sheets hand back numbers as text now and then; blank or junk reads as zero
fn de_amount<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<NumberOrText>::deserialize(deserializer)?
        .and_then(NumberOrText::value)
        .unwrap_or(0.0))
}

fn de_text<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(de_opt_text(deserializer)?.unwrap_or_default())
}

fn de_opt_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<NumberOrText>::deserialize(deserializer)?.map(NumberOrText::text))
}

fn de_status<'de, D>(deserializer: D) -> std::result::Result<EntryStatus, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(EntryStatus::parse(&de_text(deserializer)?))
}

fn de_balances<'de, D>(deserializer: D) -> std::result::Result<HashMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<HashMap<String, NumberOrText>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(kid, v)| v.value().map(|n| (kid, n)))
        .collect())
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// REQUESTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Approved,
    Denied,
}

impl ReviewDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewDecision::Approved => "approved",
            ReviewDecision::Denied => "denied",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitEntry {
    pub token: String,
    pub kid_id: String,
    pub amount: f64,
    pub description: String,
    pub source: String,
    pub nonce: String,
}

impl SubmitEntry {
    /// Validate raw form input and stamp a fresh nonce.
    ///
    /// Fails with `Invalid` before anything is sent when the amount is not a
    /// finite non-zero number (after rounding to cents) or the description is
    /// blank.
    pub fn new(token: &str, kid_id: &str, amount_input: &str, description: &str) -> Result<Self> {
        let amount = parse_amount(amount_input)?;
        let description = description.trim();
        if description.is_empty() {
            return Err(LedgerError::Invalid("Description required.".to_string()));
        }

        Ok(Self {
            token: token.to_string(),
            kid_id: kid_id.to_string(),
            amount,
            description: description.to_string(),
            source: SOURCE_TAG.to_string(),
            nonce: fresh_nonce(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewEntry {
    pub token: String,
    pub request_id: String,
    pub decision: ReviewDecision,
    pub note: Option<String>,
    pub reviewer: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryQuery {
    pub token: String,
    pub kid_id: Option<String>,
    pub limit: u32,
}

impl SummaryQuery {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
            kid_id: None,
            limit: DEFAULT_SUMMARY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerRequest {
    Submit(SubmitEntry),
    Review(ReviewEntry),
    Summary(SummaryQuery),
}

impl LedgerRequest {
    pub fn action(&self) -> &'static str {
        match self {
            LedgerRequest::Submit(_) => "submit",
            LedgerRequest::Review(_) => "review",
            LedgerRequest::Summary(_) => "summary",
        }
    }

    /// Form body for this request. Absent optional fields are left out.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("action", self.action().to_string())];

        match self {
            LedgerRequest::Submit(s) => {
                fields.push(("token", s.token.clone()));
                fields.push(("kid_id", s.kid_id.clone()));
                fields.push(("amount", s.amount.to_string()));
                fields.push(("description", s.description.clone()));
                fields.push(("source", s.source.clone()));
                fields.push(("nonce", s.nonce.clone()));
            }
            LedgerRequest::Review(r) => {
                fields.push(("token", r.token.clone()));
                fields.push(("request_id", r.request_id.clone()));
                fields.push(("status", r.decision.as_str().to_string()));
                if let Some(note) = &r.note {
                    fields.push(("review_note", note.clone()));
                }
                if let Some(reviewer) = &r.reviewer {
                    fields.push(("reviewed_by", reviewer.clone()));
                }
            }
            LedgerRequest::Summary(q) => {
                fields.push(("token", q.token.clone()));
                if let Some(kid_id) = &q.kid_id {
                    fields.push(("kid_id", kid_id.clone()));
                }
                fields.push(("limit", q.limit.to_string()));
            }
        }

        fields
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerResponse {
    Ack(AckResponse),
    Summary(SummaryResponse),
}

/// Signed amount rounded to cents. Zero, NaN and infinities are refused.
pub fn parse_amount(input: &str) -> Result<f64> {
    let invalid = || LedgerError::Invalid("Amount must be a non-zero number (signed).".to_string());

    let value: f64 = input.trim().parse().map_err(|_| invalid())?;
    if !value.is_finite() {
        return Err(invalid());
    }

    let rounded = (value * 100.0).round() / 100.0;
    if !rounded.is_finite() || rounded == 0.0 {
        return Err(invalid());
    }
    Ok(rounded)
}

/// Millisecond clock plus 64 random bits; unique per attempt.
pub fn fresh_nonce() -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().timestamp_millis(), &random[..16])
}

// ============================================================================
// API TRAIT + HTTP CLIENT
// ============================================================================

#[async_trait]
pub trait LedgerApi: Send + Sync {
    async fn submit(&self, entry: &SubmitEntry) -> Result<AckResponse>;

    async fn review(&self, review: &ReviewEntry) -> Result<AckResponse>;

    async fn summary(&self, query: &SummaryQuery) -> Result<SummaryResponse>;

    async fn execute(&self, request: &LedgerRequest) -> Result<LedgerResponse> {
        match request {
            LedgerRequest::Submit(entry) => self.submit(entry).await.map(LedgerResponse::Ack),
            LedgerRequest::Review(review) => self.review(review).await.map(LedgerResponse::Ack),
            LedgerRequest::Summary(query) => self.summary(query).await.map(LedgerResponse::Summary),
        }
    }
}

pub struct HttpLedgerClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpLedgerClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    async fn post<T>(&self, request: &LedgerRequest) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let action = request.action();
        debug!(action, endpoint = %self.endpoint, "ledger request");

        let response = self
            .http
            .post(&self.endpoint)
            .form(&request.form_fields())
            .send()
            .await
            .map_err(|e| {
                warn!(action, error = %e, "ledger request failed");
                LedgerError::from(e)
            })?;

        let status = response.status();
        let body = response.text().await?;

        serde_json::from_str(&body).map_err(|e| {
            warn!(action, %status, error = %e, "ledger reply not decodable");
            LedgerError::Decode(format!("HTTP {}: {}", status.as_u16(), e))
        })
    }
}

#[async_trait]
impl LedgerApi for HttpLedgerClient {
    async fn submit(&self, entry: &SubmitEntry) -> Result<AckResponse> {
        self.post(&LedgerRequest::Submit(entry.clone())).await
    }

    async fn review(&self, review: &ReviewEntry) -> Result<AckResponse> {
        self.post(&LedgerRequest::Review(review.clone())).await
    }

    async fn summary(&self, query: &SummaryQuery) -> Result<SummaryResponse> {
        self.post(&LedgerRequest::Summary(query.clone())).await
    }
}
