use std::path::{Path, PathBuf};

use rusty_ulid::Ulid;

pub trait StorageManager: Send + Sync {
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()>;
    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>>;
    fn exists(&self, ident: &str) -> bool;
    fn delete(&self, ident: &str) -> std::io::Result<()>;
    fn list(&self) -> Vec<String>;
}

#[derive(Clone, Debug)]
pub struct BackendLocal {
    pub base_dir: PathBuf,
}

impl BackendLocal {
    pub fn new(storage_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        Ok(BackendLocal { base_dir: path })
    }

    fn path_of(&self, ident: &str) -> PathBuf {
        self.base_dir.join(ident)
    }
}

/// Prefix of in-flight temp files; never reported by `list`.
const TEMP_PREFIX: &str = ".tmp-";

impl StorageManager for BackendLocal {
    fn exists(&self, ident: &str) -> bool {
        std::fs::metadata(self.path_of(ident)).is_ok()
    }

    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path_of(ident))
    }

    // temp file + rename, so concurrent writers to the same ident never
    // leave a torn file behind and the last rename wins
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        let temp_path = self
            .base_dir
            .join(format!("{TEMP_PREFIX}{}-{ident}", Ulid::generate()));

        if let Err(err) = std::fs::write(&temp_path, data) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(err);
        }

        std::fs::rename(&temp_path, self.path_of(ident))
    }

    fn delete(&self, ident: &str) -> std::io::Result<()> {
        std::fs::remove_file(self.path_of(ident))
    }

    fn list(&self) -> Vec<String> {
        std::fs::read_dir(&self.base_dir)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .filter_map(|entry| {
                        let path = entry.path();
                        if path.is_file() {
                            path.file_name()
                                .and_then(|name| name.to_str())
                                .filter(|name| !name.starts_with(TEMP_PREFIX))
                                .map(|s| s.to_string())
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BackendLocal::new(tmp.path()).unwrap();

        store.write("a.json", b"[1]").unwrap();
        assert!(store.exists("a.json"));
        assert_eq!(store.read("a.json").unwrap(), b"[1]");
    }

    #[test]
    fn test_last_write_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BackendLocal::new(tmp.path()).unwrap();

        store.write("key", b"first").unwrap();
        store.write("key", b"second").unwrap();
        assert_eq!(store.read("key").unwrap(), b"second");
        assert_eq!(store.list(), vec!["key".to_string()]);
    }

    #[test]
    fn test_delete_and_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BackendLocal::new(tmp.path().join("nested")).unwrap();

        store.write("x", b"1").unwrap();
        store.delete("x").unwrap();
        assert!(!store.exists("x"));
        assert!(store.read("x").is_err());
        assert!(store.list().is_empty());
    }
}
