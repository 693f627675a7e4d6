// src/infra/paths.rs — Config and data locations
//
// COUNSELDESK_HOME overrides everything: config.toml and data/ live under it.
// Otherwise the platform directories from `directories` are used.

use directories::ProjectDirs;
use std::path::PathBuf;

fn counseldesk_home() -> Option<PathBuf> {
    std::env::var_os("COUNSELDESK_HOME").map(PathBuf::from)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "counseldesk")
}

/// Configuration directory: $COUNSELDESK_HOME/ or the platform config dir.
pub fn config_dir() -> PathBuf {
    if let Some(home) = counseldesk_home() {
        return home;
    }
    project_dirs()
        .map(|d| d.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".counseldesk"))
}

/// Data directory: $COUNSELDESK_HOME/data/ or the platform data dir.
pub fn data_dir() -> PathBuf {
    if let Some(home) = counseldesk_home() {
        return home.join("data");
    }
    project_dirs()
        .map(|d| d.data_local_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".counseldesk/data"))
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

pub fn db_path() -> PathBuf {
    data_dir().join("counseldesk.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_file_names() {
        assert!(config_path().ends_with("config.toml"));
        assert!(db_path().ends_with("counseldesk.db"));
    }
}
