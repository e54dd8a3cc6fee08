use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::errors::{WalletError, WalletResult};

/// Filesystem layout of the wallet data directory.
#[derive(Debug, Clone)]
pub struct WalletPaths {
    root_dir: PathBuf,
    /// Key/value document standing in for browser local storage.
    local_store_file: PathBuf,
    backup_dir: PathBuf,
    config_file: PathBuf,
}

impl WalletPaths {
    pub const LOCAL_STORE_FILENAME: &'static str = "local_store.json";
    pub const CONFIG_FILENAME: &'static str = "wallet.config";
    pub const BACKUP_EXTENSION: &'static str = "store.bak";

    /// Create a new path manager rooted at the provided directory.
    pub fn new(root: impl AsRef<Path>) -> WalletResult<Self> {
        let root_dir = root.as_ref().to_path_buf();
        if root_dir.as_os_str().is_empty() {
            return Err(WalletError::StorageError(
                "Wallet root directory cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            local_store_file: root_dir.join(Self::LOCAL_STORE_FILENAME),
            backup_dir: root_dir.join("backups"),
            config_file: root_dir.join(Self::CONFIG_FILENAME),
            root_dir,
        })
    }

    pub fn ensure_directories(&self) -> WalletResult<()> {
        fs::create_dir_all(&self.root_dir)?;
        fs::create_dir_all(&self.backup_dir)?;
        Ok(())
    }

    pub fn local_store_file(&self) -> &Path {
        &self.local_store_file
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Copy the local store file into `backups/` under a timestamped name.
    /// Returns `None` when there is nothing to back up yet.
    pub fn backup_local_store(&self) -> WalletResult<Option<PathBuf>> {
        if !self.local_store_file.exists() {
            return Ok(None);
        }
        fs::create_dir_all(&self.backup_dir)?;

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
        let backup_filename = format!("local_{}.{}", timestamp, Self::BACKUP_EXTENSION);
        let backup_path = self.backup_dir.join(backup_filename);

        fs::copy(&self.local_store_file, &backup_path)?;

        let original_size = fs::metadata(&self.local_store_file)?.len();
        let backup_size = fs::metadata(&backup_path)?.len();
        if original_size != backup_size {
            fs::remove_file(&backup_path)?;
            return Err(WalletError::StorageError(
                "Backup verification failed: size mismatch".to_string(),
            ));
        }

        Ok(Some(backup_path))
    }

    /// Backups of the local store, newest first.
    pub fn list_backups(&self) -> WalletResult<Vec<PathBuf>> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in fs::read_dir(&self.backup_dir)? {
            let path = entry?.path();
            let is_backup = path.is_file()
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.ends_with(Self::BACKUP_EXTENSION))
                    .unwrap_or(false);
            if is_backup {
                backups.push(path);
            }
        }

        // Names embed a sortable timestamp.
        backups.sort();
        backups.reverse();
        Ok(backups)
    }

    /// Delete old backups, keeping only the `keep_count` most recent.
    pub fn prune_backups(&self, keep_count: usize) -> WalletResult<usize> {
        let backups = self.list_backups()?;
        let mut deleted = 0;
        for path in backups.iter().skip(keep_count) {
            fs::remove_file(path)?;
            deleted += 1;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn layout_is_rooted_at_directory() {
        let temp_dir = TempDir::new().unwrap();
        let paths = WalletPaths::new(temp_dir.path()).unwrap();

        assert_eq!(
            paths.local_store_file(),
            temp_dir.path().join("local_store.json")
        );
        assert_eq!(paths.config_file(), temp_dir.path().join("wallet.config"));
        assert_eq!(paths.backup_dir(), temp_dir.path().join("backups"));
    }

    #[test]
    fn empty_root_rejected() {
        match WalletPaths::new("") {
            Err(WalletError::StorageError(msg)) => assert!(msg.contains("cannot be empty")),
            other => panic!("expected StorageError, got {:?}", other),
        }
    }

    #[test]
    fn backup_without_store_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let paths = WalletPaths::new(temp_dir.path()).unwrap();
        paths.ensure_directories().unwrap();
        assert!(paths.backup_local_store().unwrap().is_none());
    }

    #[test]
    fn backups_are_listed_and_pruned() {
        let temp_dir = TempDir::new().unwrap();
        let paths = WalletPaths::new(temp_dir.path()).unwrap();
        paths.ensure_directories().unwrap();
        fs::write(paths.local_store_file(), b"{}").unwrap();

        let mut created = Vec::new();
        for _ in 0..4 {
            created.push(paths.backup_local_store().unwrap().unwrap());
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        fs::write(paths.backup_dir().join("notes.txt"), b"ignored").unwrap();

        let listed = paths.list_backups().unwrap();
        assert_eq!(listed.len(), 4);
        assert_eq!(listed[0], created[3]);

        assert_eq!(paths.prune_backups(2).unwrap(), 2);
        assert_eq!(paths.list_backups().unwrap(), vec![created[3].clone(), created[2].clone()]);
    }
}
