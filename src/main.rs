// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{bail, Context, Result};
use family_ledger::app::{App, Screen};
use family_ledger::session::{format_stamp, mask_token};
use family_ledger::{HttpLedgerClient, LedgerConfig, SessionStore, SqliteBackend};
use std::env;
use std::fs;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let config = LedgerConfig::from_env();

    match args.get(1).map(String::as_str) {
        Some("status") => run_status(&config)?,
        Some("clear") => run_clear(&config)?,
        Some("balances") => run_balances(config)?,
        Some("help") | Some("--help") | Some("-h") => print_usage(),
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            std::process::exit(2);
        }
        // UI mode (default)
        None => run_ui_mode(config)?,
    }

    Ok(())
}

fn print_usage() {
    println!("family-ledger {}", family_ledger::VERSION);
    println!();
    println!("Usage:");
    println!("  family-ledger            Open the terminal UI");
    println!("  family-ledger status     Show the saved setup");
    println!("  family-ledger clear      Forget the saved setup");
    println!("  family-ledger balances   Print every kid's balance");
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_stderr_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

fn open_session(config: &LedgerConfig) -> Result<SessionStore> {
    fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;
    let path = config.session_path();
    let backend = SqliteBackend::open(&path)
        .with_context(|| format!("opening session store {}", path.display()))?;
    Ok(SessionStore::new(Arc::new(backend)))
}

fn run_status(config: &LedgerConfig) -> Result<()> {
    init_stderr_logging();
    let session = open_session(config)?.load()?;

    let role = session.role.map(|r| r.title()).unwrap_or("—");
    let kid = if session.kid_id.is_empty() {
        "—".to_string()
    } else {
        format!("{} ({})", config.kid_name(&session.kid_id), session.kid_id)
    };
    let token = if session.token.is_empty() {
        "—".to_string()
    } else {
        mask_token(&session.token)
    };

    println!("Setup:       {}", if session.is_complete() { "Ready" } else { "Incomplete" });
    println!("Role:        {}", role);
    println!("Kid:         {}", kid);
    println!("Token:       {}", token);
    println!("Last saved:  {}", format_stamp(session.setup_updated_at.as_deref()));
    println!("Endpoint:    {}", config.api_url);
    println!("Data dir:    {}", config.data_dir.display());
    Ok(())
}

fn run_clear(config: &LedgerConfig) -> Result<()> {
    init_stderr_logging();
    open_session(config)?.clear_all()?;
    println!("✓ Cleared saved setup");
    Ok(())
}

fn run_balances(config: LedgerConfig) -> Result<()> {
    init_stderr_logging();
    let session = open_session(&config)?;
    if !session.load()?.is_complete() {
        bail!("Setup is incomplete. Run `family-ledger` to save a token first.");
    }

    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    let api = HttpLedgerClient::new(config.api_url.clone());
    let (mut app, dispatches) = App::start(config, session, "/parent")?;
    runtime.block_on(app.drive(&api, dispatches))?;

    match &app.screen {
        Screen::Parent(view) if view.error.is_empty() => {
            for (name, amount) in view.balance_rows() {
                println!("{:<12} {:>10}", name, amount);
            }
            println!();
            println!("Pending: {}", view.pending().len());
            Ok(())
        }
        Screen::Parent(view) => bail!("{}", view.error),
        _ => bail!("Setup is incomplete. Run `family-ledger` to save a token first."),
    }
}

#[cfg(feature = "tui")]
fn run_ui_mode(config: LedgerConfig) -> Result<()> {
    use family_ledger::LedgerApi;
    use std::fs::OpenOptions;
    use std::sync::Mutex;

    let session = open_session(&config)?;

    // The terminal belongs to the UI; logs go to a file
    let log_path = config.log_path();
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening log file {}", log_path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .init();

    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    let api: Arc<dyn LedgerApi> = Arc::new(HttpLedgerClient::new(config.api_url.clone()));
    let (mut app, initial) = App::start(config, session, "/")?;

    ui::run_ui(&mut app, &runtime, api, initial)?;

    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_config: LedgerConfig) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use: family-ledger status | clear | balances");
    std::process::exit(1);
}
