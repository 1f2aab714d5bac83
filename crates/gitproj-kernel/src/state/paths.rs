//! XDG Base Directory paths for gitproj state.
//!
//! | Purpose | XDG Variable | Default | gitproj Path |
//! |---------|--------------|---------|--------------|
//! | State DB | `$XDG_DATA_HOME` | `~/.local/share` | `$XDG_DATA_HOME/gitproj/enlistments/*.db` |
//! | Config | `$XDG_CONFIG_HOME` | `~/.config` | `$XDG_CONFIG_HOME/gitproj/config.toml` |

use std::path::PathBuf;

use directories::BaseDirs;

/// Get the data directory for persistent state.
///
/// Uses `$XDG_DATA_HOME/gitproj` or falls back to `~/.local/share/gitproj`.
pub fn data_dir() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| home_fallback().join(".local").join("share"))
        .join("gitproj")
}

/// Get the config directory.
///
/// Uses `$XDG_CONFIG_HOME/gitproj` or falls back to `~/.config/gitproj`.
pub fn config_dir() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.config_dir().to_path_buf())
        .unwrap_or_else(|| home_fallback().join(".config"))
        .join("gitproj")
}

pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// One SQLite database per enlistment lives here.
pub fn enlistments_dir() -> PathBuf {
    data_dir().join("enlistments")
}

pub fn enlistment_db(name: &str) -> PathBuf {
    enlistments_dir().join(format!("{name}.db"))
}

fn home_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
