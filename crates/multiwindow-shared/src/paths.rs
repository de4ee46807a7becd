use std::io;
use std::path::PathBuf;

use crate::diagnostics;

const HOME_ENV: &str = "MULTIWINDOW_HOME";

/// Get the multiwindow state directory.
///
/// `MULTIWINDOW_HOME` overrides the default `~/.multiwindow`, which is how
/// tests and sandboxed hosts point every process at the same registry.
pub fn multiwindow_home() -> io::Result<PathBuf> {
    if let Some(dir) = std::env::var_os(HOME_ENV) {
        return Ok(PathBuf::from(dir));
    }
    let home = dirs::home_dir().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "Home directory not found")
    })?;
    Ok(home.join(".multiwindow"))
}

/// Root directory for registry snapshots, one subdirectory per profile.
pub fn registry_root() -> PathBuf {
    multiwindow_home().unwrap_or_else(|e| {
        diagnostics::log(format!(
            "registry_root_fallback error={} fallback={}",
            e,
            std::env::temp_dir().display()
        ));
        std::env::temp_dir().join("multiwindow")
    })
}

/// Config file location: `<config_dir>/multiwindow/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("multiwindow").join("config.toml"))
}

/// Maps an arbitrary profile name onto a safe directory name.
pub fn sanitize_profile_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        "default".to_string()
    } else {
        out
    }
}
