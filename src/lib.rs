// Family Ledger - Core Library
// Session store, ledger client, router and views, shared by the TUI, the CLI and tests

pub mod app;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod router;
pub mod session;
pub mod views;

// Re-export commonly used types
pub use app::{App, Dispatch, Screen};
pub use client::{
    AckResponse, EntryStatus, HttpLedgerClient, LedgerApi, LedgerEntry, LedgerRequest,
    LedgerResponse, ReviewDecision, ReviewEntry, SubmitEntry, SummaryQuery, SummaryResponse,
};
pub use config::{KidProfile, LedgerConfig, KIDS};
pub use db::{KvBackend, MemoryBackend, SqliteBackend};
pub use error::{LedgerError, Result};
pub use router::{decide, Decision, Page, Route, Router};
pub use session::{Role, Session, SessionStore};
pub use views::{Effect, KidView, ParentView, Reply, SetupView};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
