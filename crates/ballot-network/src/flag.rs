//! Persisted "was connected" flag.
//!
//! Advisory only: it decides whether a silent reconnect is attempted on
//! start-up. Nothing but the flag's presence is stored.

use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct SessionFlag {
    path: Option<PathBuf>,
}

impl SessionFlag {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// `<data_local_dir>/ballot-client/connected`, or a disabled flag when the
    /// platform has no such directory.
    pub fn default_location() -> Self {
        Self {
            path: dirs::data_local_dir().map(|d| d.join("ballot-client").join("connected")),
        }
    }

    /// A flag that is never set and never written.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_set(&self) -> bool {
        self.path.as_ref().map(|p| p.exists()).unwrap_or(false)
    }

    pub fn set(&self, connected: bool) -> io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if connected {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, b"1")
        } else {
            match std::fs::remove_file(path) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let flag = SessionFlag::at(dir.path().join("nested").join("connected"));
        assert!(!flag.is_set());
        flag.set(true).unwrap();
        assert!(flag.is_set());
        flag.set(false).unwrap();
        assert!(!flag.is_set());
        // Clearing twice is fine.
        flag.set(false).unwrap();
    }

    #[test]
    fn disabled_flag_is_inert() {
        let flag = SessionFlag::disabled();
        flag.set(true).unwrap();
        assert!(!flag.is_set());
        assert!(flag.path().is_none());
    }
}
