use std::fs::{OpenOptions, create_dir_all};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{
    OnceLock,
    atomic::{AtomicBool, Ordering},
};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::paths;

const DIAG_ENV: &str = "MULTIWINDOW_DIAG";
const LOG_TARGET: &str = "multiwindow";

static DIAG_ENABLED: AtomicBool = AtomicBool::new(false);
static DIAG_ENABLED_INIT: OnceLock<()> = OnceLock::new();

/// Explicitly set diagnostics file output. Call early, before the first
/// window is allocated. If not called, falls back to MULTIWINDOW_DIAG.
pub fn set_enabled(enabled: bool) {
    DIAG_ENABLED.store(enabled, Ordering::Relaxed);
    let _ = DIAG_ENABLED_INIT.set(());
}

/// Installs `env_logger` as the `log` backend. Safe to call more than once;
/// later calls are ignored.
pub fn init_logger() {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(format!("{}=info", LOG_TARGET)),
    )
    .is_test(cfg!(test))
    .try_init();
}

fn diagnostics_enabled() -> bool {
    if DIAG_ENABLED_INIT.get().is_some() {
        return DIAG_ENABLED.load(Ordering::Relaxed);
    }

    let env_enabled = std::env::var(DIAG_ENV)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false);
    if env_enabled {
        DIAG_ENABLED.store(true, Ordering::Relaxed);
    }
    let _ = DIAG_ENABLED_INIT.set(());
    env_enabled
}

fn diagnostics_path() -> Option<PathBuf> {
    static PATH: OnceLock<Option<PathBuf>> = OnceLock::new();
    PATH.get_or_init(|| log_dir().map(|dir| dir.join("diagnostics.log")))
        .clone()
}

pub fn log_dir() -> Option<PathBuf> {
    static DIR: OnceLock<Option<PathBuf>> = OnceLock::new();
    DIR.get_or_init(|| paths::multiwindow_home().ok().map(|home| home.join("logs")))
        .clone()
}

/// Records a `key=value` style event line.
///
/// Every line goes through the `log` facade at info level. When diagnostics
/// are enabled the line is also appended to `~/.multiwindow/logs/diagnostics.log`
/// so that events from every window process end up in one place.
pub fn log(message: impl AsRef<str>) {
    let message = message.as_ref();
    log::info!(target: LOG_TARGET, "{}", message);
    append_to_file(message);
}

fn append_to_file(message: &str) {
    if !diagnostics_enabled() {
        return;
    }

    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown-time".to_string());
    let line = format!("[{}] pid={} {}\n", timestamp, std::process::id(), message);

    if let Some(path) = diagnostics_path() {
        if let Some(parent) = path.parent() {
            let _ = create_dir_all(parent);
        }
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&path) {
            let _ = file.write_all(line.as_bytes());
        }
    }
}

/// Records an event that indicates a broken invariant. Callers repair the
/// state themselves; this only makes the breakage loud in debug builds.
pub fn invariant_violation(message: impl AsRef<str>) {
    let message = message.as_ref();
    if cfg!(debug_assertions) {
        log::error!(target: LOG_TARGET, "invariant_violation {}", message);
    } else {
        log::warn!(target: LOG_TARGET, "invariant_violation {}", message);
    }
    append_to_file(&format!("invariant_violation {}", message));
}
