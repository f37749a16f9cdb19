// src/store/apply.rs — Write accepted candidates back to a user's netlist file
//
// Each replace keeps a timestamped copy of what was there before, so a
// candidate that later fails re-simulation can be rolled back.

use std::path::{Path, PathBuf};

use chrono::Utc;

use super::write_atomic;
use crate::infra::errors::SizerError;

/// A netlist file on disk that follows the run's candidates.
#[derive(Debug, Clone)]
pub struct NetlistTarget {
    path: PathBuf,
}

impl NetlistTarget {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file with `text`, returning where the previous contents
    /// were backed up. `None` means the file did not exist beforehand.
    pub fn replace(&self, text: &str) -> Result<Option<PathBuf>, SizerError> {
        let (dir, name) = self.split()?;

        let backup = if self.path.exists() {
            let backup = self.backup_path(&dir, &name);
            std::fs::copy(&self.path, &backup)?;
            Some(backup)
        } else {
            None
        };

        write_atomic(&dir, &name, text)?;
        tracing::debug!(
            path = %self.path.display(),
            backup = ?backup,
            "Netlist replaced"
        );
        Ok(backup)
    }

    /// Undo a `replace`: restore the backup, or remove the file when there
    /// was nothing to back up.
    pub fn revert(&self, backup: Option<&Path>) -> Result<(), SizerError> {
        match backup {
            Some(backup) => {
                let (dir, name) = self.split()?;
                let previous = std::fs::read_to_string(backup)?;
                write_atomic(&dir, &name, &previous)?;
            }
            None => match std::fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }
        tracing::debug!(path = %self.path.display(), "Netlist reverted");
        Ok(())
    }

    fn split(&self) -> Result<(PathBuf, String), SizerError> {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                SizerError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{} is not a file path", self.path.display()),
                ))
            })?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok((dir, name))
    }

    /// `<name>.bak.<UTC timestamp>`, with a counter when two replaces land
    /// in the same second.
    fn backup_path(&self, dir: &Path, name: &str) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let base = dir.join(format!("{name}.bak.{stamp}"));
        if !base.exists() {
            return base;
        }
        (1u32..)
            .map(|n| dir.join(format!("{name}.bak.{stamp}.{n}")))
            .find(|p| !p.exists())
            .unwrap_or(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn backups(dir: &Path) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.to_string_lossy().contains(".bak."))
            .collect();
        out.sort();
        out
    }

    #[test]
    fn test_replace_backs_up_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("amp.cir");
        std::fs::write(&path, "amp\nM1 d g 0 0 nmos W=1u\n.end\n").unwrap();

        let target = NetlistTarget::new(&path);
        let backup = target.replace("amp\nM1 d g 0 0 nmos W=2u\n.end\n").unwrap();

        let backup = backup.expect("existing file is backed up");
        assert!(backup
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("amp.cir.bak."));
        assert_eq!(
            std::fs::read_to_string(&backup).unwrap(),
            "amp\nM1 d g 0 0 nmos W=1u\n.end\n"
        );
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "amp\nM1 d g 0 0 nmos W=2u\n.end\n"
        );
    }

    #[test]
    fn test_replace_twice_keeps_both_backups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("amp.cir");
        std::fs::write(&path, "v0").unwrap();

        let target = NetlistTarget::new(&path);
        let first = target.replace("v1").unwrap().unwrap();
        let second = target.replace("v2").unwrap().unwrap();

        assert_ne!(first, second);
        assert_eq!(backups(dir.path()).len(), 2);
        assert_eq!(std::fs::read_to_string(&first).unwrap(), "v0");
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "v1");
    }

    #[test]
    fn test_revert_restores_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("amp.cir");
        std::fs::write(&path, "original").unwrap();

        let target = NetlistTarget::new(&path);
        let backup = target.replace("candidate").unwrap();
        target.revert(backup.as_deref()).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "original");
    }

    #[test]
    fn test_new_file_has_no_backup_and_revert_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.cir");

        let target = NetlistTarget::new(&path);
        let backup = target.replace("candidate").unwrap();
        assert!(backup.is_none());
        assert!(path.exists());

        target.revert(None).unwrap();
        assert!(!path.exists());
        // Reverting again is harmless
        target.revert(None).unwrap();
    }

    #[test]
    fn test_directory_path_rejected() {
        let target = NetlistTarget::new("/");
        assert!(target.replace("x").is_err());
    }
}
