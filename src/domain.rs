use std::fs;
use std::io::Error;
use std::path::{Path, PathBuf};

use derive_setters::Setters;
use polars::error::PolarsError;
use ratatui::crossterm::event::KeyEvent;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::api::ApiError;
use crate::worker::Completion;

#[derive(Debug, Error)]
pub enum RegError {
    #[error("io error: {0}")]
    Io(#[from] Error),
    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("invalid config file: {0}")]
    Config(#[from] toml::de::Error),
    #[error("{0}")]
    LoadingFailed(String),
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("unknown file type, expected a .csv file")]
    UnknownFileType,
    #[error("missing columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
}

/// Endpoint family used to edit and soft-delete members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteStyle {
    /// `PATCH /edit_user/{id}` and `DELETE /delete_user/{id}`.
    #[default]
    Legacy,
    /// `PUT /members/{id}` and `DELETE /members/{id}`.
    Rest,
}

#[derive(Debug, Clone, Deserialize, Setters)]
#[serde(default)]
#[setters(prefix = "with_", into)]
pub struct RegConfig {
    pub server: String,
    pub token_file: Option<PathBuf>,
    pub log_file: PathBuf,
    pub log_level: String,
    pub page_size: usize,
    pub event_poll_time: u64,
    pub max_column_width: usize,
    pub download_dir: PathBuf,
    pub routes: RouteStyle,
}

impl Default for RegConfig {
    fn default() -> Self {
        Self {
            server: "http://localhost:5000/api".to_string(),
            token_file: None,
            log_file: PathBuf::from("regtv.log"),
            log_level: "info".to_string(),
            page_size: 10,
            event_poll_time: 100,
            max_column_width: 32,
            download_dir: PathBuf::from("."),
            routes: RouteStyle::Legacy,
        }
    }
}

impl RegConfig {
    /// Reads a TOML config file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, RegError> {
        let raw = fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RegError::FileNotFound(path.to_path_buf()),
            _ => RegError::Io(e),
        })?;
        let config: RegConfig = toml::from_str(&raw)?;
        debug!("Loaded config from {}: {config:?}", path.display());
        Ok(config)
    }

    /// Base url without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.server.trim_end_matches('/')
    }
}

/// Which key map the controller applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    Table,
    Edit,
    /// Every key goes to the model untranslated.
    Raw,
}

#[derive(Debug)]
pub enum Message {
    Quit,
    MoveUp,
    MoveDown,
    MoveLeft,
    MoveRight,
    MovePageUp,
    MovePageDown,
    MoveBeginning,
    MoveEnd,
    Search,
    Sort,
    Edit,
    Delete,
    Ban,
    Unban,
    Purge,
    NewRow,
    NextView,
    Refresh,
    Export,
    Import,
    CopyCell,
    CopyRow,
    Enter,
    PrevPage,
    NextPage,
    Help,
    Logout,
    Refreeze,
    Exit,
    Save,
    FocusNext,
    FocusPrev,
    StepUp,
    StepDown,
    Attach,
    RawKey(KeyEvent),
    Resize(u16, u16),
    Completed(Completion),
}

pub const HELP_TEXT: &str = "\
Navigation
  ↑↓←→ / hjkl   move            PgUp PgDn   scroll
  g / G         first / last    [ ]         previous / next page
  Tab           next view       Enter       documents / download

Table
  /   search            s   sort column
  F   refreeze widths   r   refresh
  y   copy cell         Y   copy row
  E   export csv        I   import csv

Rows
  e   edit      n   new row / upload document
  d   delete    b   ban       u   unban
  x   delete from archive

While editing
  Tab / Shift-Tab   next / previous field
  ↑ ↓               step number, date or circle
  Ctrl-O            attach declaration
  Ctrl-F / Ctrl-T   search / sort column
  Ctrl-S            save        Esc   cancel

  L   logout    ?   help        q   quit";

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn config_keeps_defaults_for_missing_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server = \"https://rejestr.example.org/api/\"").unwrap();
        writeln!(file, "routes = \"rest\"").unwrap();
        writeln!(file, "page_size = 25").unwrap();

        let config = RegConfig::load(file.path()).unwrap();
        assert_eq!(config.base_url(), "https://rejestr.example.org/api");
        assert_eq!(config.routes, RouteStyle::Rest);
        assert_eq!(config.page_size, 25);
        assert_eq!(config.event_poll_time, 100);
    }

    #[test]
    fn missing_config_is_reported() {
        let err = RegConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, RegError::FileNotFound(_)));
    }

    #[test]
    fn setters_override_fields() {
        let config = RegConfig::default()
            .with_server("http://10.0.0.2:5000")
            .with_page_size(50usize);
        assert_eq!(config.server, "http://10.0.0.2:5000");
        assert_eq!(config.page_size, 50);
    }
}
