// Build-time configuration: ledger endpoint and kid roster
// Runtime configuration: where the session file and log live

use std::env;
use std::path::PathBuf;

/// Apps Script web app (`/exec`) that owns the ledger sheet.
pub const DEFAULT_API_URL: &str = "https://script.google.com/macros/s/AKfycbzaFXY09GiuxI9MEefVqriWPFR5poe40-_Nhlgyg47flEdpwlC9nRqJPSn__Td_pxO2/exec";

/// Tag sent with every submission so the sheet can tell clients apart.
pub const SOURCE_TAG: &str = "tui";

/// Name of the SQLite file holding the session.
pub const SESSION_FILE: &str = "session.db";

/// Name of the log file written in TUI mode.
pub const LOG_FILE: &str = "ledger.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KidProfile {
    pub id: &'static str,
    pub name: &'static str,
}

/// Kid ids must match the Config tab of the ledger sheet.
pub const KIDS: &[KidProfile] = &[
    KidProfile { id: "k1", name: "Alice" },
    KidProfile { id: "k2", name: "Bob" },
    KidProfile { id: "k3", name: "Charlie" },
];

impl KidProfile {
    /// Display name for a kid id, falling back to the id itself.
    pub fn name_for<'a>(roster: &'a [KidProfile], id: &'a str) -> &'a str {
        roster
            .iter()
            .find(|k| k.id == id)
            .map(|k| k.name)
            .unwrap_or(id)
    }
}

/// Endpoint URL, overridable at compile time with `LEDGER_API_URL`.
pub fn api_url() -> &'static str {
    option_env!("LEDGER_API_URL").unwrap_or(DEFAULT_API_URL)
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub api_url: String,
    pub kids: Vec<KidProfile>,
    pub data_dir: PathBuf,
}

impl LedgerConfig {
    /// Resolve the data directory from `LEDGER_HOME`, then `$HOME/.family-ledger`,
    /// then `./.family-ledger`.
    pub fn from_env() -> Self {
        let data_dir = env::var_os("LEDGER_HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".family-ledger")))
            .unwrap_or_else(|| PathBuf::from(".family-ledger"));

        Self {
            api_url: api_url().to_string(),
            kids: KIDS.to_vec(),
            data_dir,
        }
    }

    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join(SESSION_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(LOG_FILE)
    }

    /// First kid in the roster, used as the Setup default.
    pub fn default_kid_id(&self) -> String {
        self.kids
            .first()
            .map(|k| k.id.to_string())
            .unwrap_or_else(|| "k1".to_string())
    }

    pub fn kid_name<'a>(&'a self, id: &'a str) -> &'a str {
        KidProfile::name_for(&self.kids, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> LedgerConfig {
        LedgerConfig {
            api_url: "http://127.0.0.1:9/exec".to_string(),
            kids: KIDS.to_vec(),
            data_dir: PathBuf::from("/tmp/ledger-test"),
        }
    }

    #[test]
    fn test_kid_name_lookup() {
        let config = test_config();
        assert_eq!(config.kid_name("k2"), "Bob");
        assert_eq!(config.kid_name("k9"), "k9");
    }

    #[test]
    fn test_default_kid_is_first_in_roster() {
        let config = test_config();
        assert_eq!(config.default_kid_id(), "k1");

        let empty = LedgerConfig { kids: Vec::new(), ..test_config() };
        assert_eq!(empty.default_kid_id(), "k1");
    }

    #[test]
    fn test_paths_live_in_data_dir() {
        let config = test_config();
        assert_eq!(config.session_path(), PathBuf::from("/tmp/ledger-test/session.db"));
        assert_eq!(config.log_path(), PathBuf::from("/tmp/ledger-test/ledger.log"));
    }
}
