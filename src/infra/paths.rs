// src/infra/paths.rs — Path management
//
// All paths respect the AMPSIZER_HOME environment variable for isolation.
// When unset, config lives in ~/.ampsizer/ and run artifacts in
// XDG_DATA_HOME/ampsizer/runs.

use directories::ProjectDirs;
use std::path::PathBuf;

/// Returns the AMPSIZER_HOME override, if set.
fn ampsizer_home() -> Option<PathBuf> {
    std::env::var_os("AMPSIZER_HOME").map(PathBuf::from)
}

/// Configuration directory: $AMPSIZER_HOME/ or ~/.ampsizer/
pub fn config_dir() -> PathBuf {
    if let Some(home) = ampsizer_home() {
        return home;
    }
    match directories::BaseDirs::new() {
        Some(base) => base.home_dir().join(".ampsizer"),
        None => PathBuf::from(".ampsizer"),
    }
}

/// Data directory: $AMPSIZER_HOME/data/ or ~/.local/share/ampsizer/
pub fn data_dir() -> PathBuf {
    if let Some(home) = ampsizer_home() {
        return home.join("data");
    }
    ProjectDirs::from("", "", "ampsizer")
        .map(|d| d.data_local_dir().to_path_buf())
        .unwrap_or_else(|| config_dir().join("data"))
}

/// Default root for per-run artifact directories.
pub fn runs_dir() -> PathBuf {
    data_dir().join("runs")
}

/// Config file path
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}
