//! Structured logging for debugging delve.
//!
//! Log levels:
//! - ERROR: Failures that end a run or a unit
//! - WARN: Guard detections, timeouts, step ceilings
//! - INFO: Run, delegation and orchestrator lifecycle
//! - DEBUG: Per-step traces
//! - TRACE: Suspension and resumption of computations
//!
//! Debug mode can be enabled with `--debug` flag or `DELVE_DEBUG=1` env var.
//! `RUST_LOG` overrides the level filter entirely.

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Initialize logging to ~/.delve/delve.log
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
pub fn init_with_debug(debug: bool) {
    let debug_enabled = debug || debug_from_env(std::env::var("DELVE_DEBUG").ok().as_deref());
    DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug_enabled)));

    let writer = match open_log_file() {
        Some((path, file)) => {
            LOG_PATH.set(path).ok();
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::sink),
    };

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .try_init();
}

fn open_log_file() -> Option<(PathBuf, File)> {
    let delve_dir = dirs::home_dir()?.join(".delve");
    std::fs::create_dir_all(&delve_dir).ok()?;
    let path = delve_dir.join("delve.log");
    // Truncate file on startup
    let file = File::create(&path).ok()?;
    Some((path, file))
}

fn debug_from_env(value: Option<&str>) -> bool {
    value
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "delve=debug"
    } else {
        "delve=info"
    }
}

/// Check if debug mode is enabled.
pub fn is_debug() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Where log output goes, once initialized with a home directory.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}
