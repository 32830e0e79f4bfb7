use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

/// Bearer token shared by the UI thread and the workers, optionally backed
/// by a file so a login survives restarts.
#[derive(Debug, Clone, Default)]
pub struct Session {
    token: Arc<RwLock<Option<String>>>,
    path: Option<PathBuf>,
}

impl Session {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn load(path: PathBuf) -> io::Result<Self> {
        let token = match fs::read_to_string(&path) {
            Ok(raw) => Some(raw.trim().to_string()).filter(|t| !t.is_empty()),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };
        debug!(
            "Session from {} (token present: {})",
            path.display(),
            token.is_some()
        );
        Ok(Self {
            token: Arc::new(RwLock::new(token)),
            path: Some(path),
        })
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|guard| guard.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn store(&self, token: &str) -> io::Result<()> {
        if let Ok(mut guard) = self.token.write() {
            *guard = Some(token.to_string());
        }
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, token)?;
        }
        Ok(())
    }

    pub fn clear(&self) -> io::Result<()> {
        if let Ok(mut guard) = self.token.write() {
            *guard = None;
        }
        if let Some(path) = &self.path {
            match fs::remove_file(path) {
                Ok(()) => debug!("Removed token file {}", path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Could not remove token file {}: {e}", path.display());
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("token");

        let session = Session::load(path.clone()).unwrap();
        assert!(!session.is_authenticated());
        session.store("abc.def.ghi").unwrap();

        let reloaded = Session::load(path.clone()).unwrap();
        assert_eq!(reloaded.token().as_deref(), Some("abc.def.ghi"));

        reloaded.clear().unwrap();
        assert!(!path.exists());
        assert_eq!(reloaded.token(), None);
        reloaded.clear().unwrap();
    }

    #[test]
    fn clones_share_the_token() {
        let session = Session::in_memory();
        let worker_copy = session.clone();
        session.store("t0k3n").unwrap();
        assert_eq!(worker_copy.token().as_deref(), Some("t0k3n"));
        worker_copy.clear().unwrap();
        assert!(!session.is_authenticated());
    }

    #[test]
    fn blank_token_file_means_logged_out() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), "  \n").unwrap();
        let session = Session::load(file.path().to_path_buf()).unwrap();
        assert!(!session.is_authenticated());
    }
}
