//! On-disk cache generations.
//!
//! Layout under the cache root:
//!
//! ```text
//! <root>/<generation name>/<sha256(key)>   one file per entry
//! <root>/.staging-<ulid>/                   install in progress, never listed
//! <root>/.trash-<ulid>/                     generation being replaced
//! ```
//!
//! Hidden directories outlive a crash mid-install or mid-commit; [`CacheStorage::sweep`]
//! removes them once their ULID is old enough that no live install can own them.
//!
//! Entry file: one JSON header line, `\n`, then the raw body.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use rusty_ulid::Ulid;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::storage::{BackendLocal, StorageManager};

use super::{FetchResponse, OfflineError};

const STAGING_PREFIX: &str = ".staging-";
const TRASH_PREFIX: &str = ".trash-";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryHeader {
    key: String,
    status: u16,
    #[serde(default)]
    content_type: Option<String>,
    stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub stored_at: DateTime<Utc>,
    pub response: FetchResponse,
}

/// Root of all generations.
#[derive(Debug, Clone)]
pub struct CacheStorage {
    root: PathBuf,
}

impl CacheStorage {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Names of committed generations, sorted.
    pub fn keys(&self) -> std::io::Result<Vec<String>> {
        let mut names: Vec<String> = std::fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Removes staging and trash directories created before `older_than`
    /// ago. A suffix that is not a ULID counts as stale. Returns the
    /// removed names.
    pub fn sweep(&self, older_than: Duration) -> std::io::Result<Vec<String>> {
        let cutoff = Utc::now() - older_than;
        let mut swept = vec![];

        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some(suffix) = name
                .strip_prefix(STAGING_PREFIX)
                .or_else(|| name.strip_prefix(TRASH_PREFIX))
            else {
                continue;
            };

            let stale = suffix
                .parse::<Ulid>()
                .map(|ulid| ulid.datetime() < cutoff)
                .unwrap_or(true);
            if stale && entry.path().is_dir() {
                std::fs::remove_dir_all(entry.path())?;
                swept.push(name);
            }
        }

        swept.sort();
        Ok(swept)
    }

    pub fn has(&self, name: &str) -> bool {
        !name.starts_with('.') && self.root.join(name).is_dir()
    }

    /// Opens (creating if needed) a committed generation.
    pub fn open(&self, name: &str) -> std::io::Result<Generation> {
        Generation::at(name, self.root.join(name))
    }

    pub fn delete(&self, name: &str) -> std::io::Result<bool> {
        let path = self.root.join(name);
        if !path.is_dir() {
            return Ok(false);
        }
        std::fs::remove_dir_all(path)?;
        Ok(true)
    }

    /// Fresh hidden generation for an install in progress.
    pub fn stage(&self) -> std::io::Result<Generation> {
        let name = format!("{STAGING_PREFIX}{}", Ulid::generate());
        Generation::at(&name, self.root.join(&name))
    }

    /// Publishes a staged generation under `name`, replacing any generation
    /// already there. Readers see either the old or the new generation.
    pub fn commit(&self, staged: Generation, name: &str) -> std::io::Result<Generation> {
        let target = self.root.join(name);

        let trash = if target.exists() {
            let trash = self.root.join(format!("{TRASH_PREFIX}{}", Ulid::generate()));
            std::fs::rename(&target, &trash)?;
            Some(trash)
        } else {
            None
        };

        std::fs::rename(&staged.store.base_dir, &target)?;

        if let Some(trash) = trash {
            if let Err(e) = std::fs::remove_dir_all(&trash) {
                log::warn!("cache: failed to remove replaced generation {trash:?}: {e}");
            }
        }

        Generation::at(name, target)
    }

    pub fn discard(&self, staged: Generation) -> std::io::Result<()> {
        std::fs::remove_dir_all(&staged.store.base_dir)
    }
}

/// Handle to one generation. Cheap to clone; clones may be used from
/// different tasks at the same time. Concurrent `put`s of the same key
/// leave exactly one of the written entries.
#[derive(Debug, Clone)]
pub struct Generation {
    name: String,
    store: BackendLocal,
}

impl Generation {
    fn at(name: &str, path: PathBuf) -> std::io::Result<Self> {
        Ok(Self {
            name: name.to_string(),
            store: BackendLocal::new(path)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.store.list().len()
    }

    pub fn match_key(&self, key: &str) -> Result<Option<CachedResponse>, OfflineError> {
        let ident = entry_ident(key);
        if !self.store.exists(&ident) {
            return Ok(None);
        }

        let data = self.store.read(&ident)?;
        let split = data
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| OfflineError::Corrupt(format!("{key}: missing header")))?;

        let header: EntryHeader = serde_json::from_slice(&data[..split])
            .map_err(|e| OfflineError::Corrupt(format!("{key}: {e}")))?;

        if header.key != key {
            return Err(OfflineError::Corrupt(format!(
                "{key}: entry belongs to {}",
                header.key
            )));
        }

        Ok(Some(CachedResponse {
            stored_at: header.stored_at,
            response: FetchResponse {
                status: header.status,
                content_type: header.content_type,
                body: data[split + 1..].to_vec(),
            },
        }))
    }

    /// [`match_key`](Self::match_key) on the blocking pool.
    pub async fn lookup(&self, key: &str) -> Result<Option<CachedResponse>, OfflineError> {
        let generation = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || generation.match_key(&key))
            .await
            .map_err(|e| OfflineError::Io(std::io::Error::other(e)))?
    }

    /// [`put`](Self::put) on the blocking pool.
    pub async fn store(&self, key: &str, response: FetchResponse) -> Result<(), OfflineError> {
        let generation = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || generation.put(&key, &response))
            .await
            .map_err(|e| OfflineError::Io(std::io::Error::other(e)))?
    }

    pub fn put(&self, key: &str, response: &FetchResponse) -> Result<(), OfflineError> {
        let header = EntryHeader {
            key: key.to_string(),
            status: response.status,
            content_type: response.content_type.clone(),
            stored_at: Utc::now(),
        };

        let mut data = serde_json::to_vec(&header)
            .map_err(|e| OfflineError::Corrupt(format!("{key}: {e}")))?;
        data.push(b'\n');
        data.extend_from_slice(&response.body);

        self.store.write(&entry_ident(key), &data)?;
        Ok(())
    }
}

fn entry_ident(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (CacheStorage, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        (CacheStorage::new(tmp.path().join("cache")).unwrap(), tmp)
    }

    #[test]
    fn test_put_and_match() {
        let (storage, _tmp) = storage();
        let generation = storage.open("oilcap-runtime-v1").unwrap();

        let response = FetchResponse::ok("application/json", "[]");
        generation.put("https://oil.example/data.json", &response).unwrap();

        let hit = generation
            .match_key("https://oil.example/data.json")
            .unwrap()
            .unwrap();
        assert_eq!(hit.response, response);
        assert!(generation.match_key("https://oil.example/other").unwrap().is_none());
    }

    #[test]
    fn test_body_may_contain_newlines() {
        let (storage, _tmp) = storage();
        let generation = storage.open("g").unwrap();

        let response = FetchResponse::ok("text/css", "a {}\n\nb {}\n");
        generation.put("k", &response).unwrap();
        assert_eq!(generation.match_key("k").unwrap().unwrap().response.body, response.body);
    }

    #[test]
    fn test_last_write_wins() {
        let (storage, _tmp) = storage();
        let generation = storage.open("g").unwrap();

        generation.put("k", &FetchResponse::ok("text/plain", "old")).unwrap();
        generation.put("k", &FetchResponse::ok("text/plain", "new")).unwrap();

        assert_eq!(generation.len(), 1);
        assert_eq!(generation.match_key("k").unwrap().unwrap().response.body, b"new");
    }

    #[test]
    fn test_concurrent_puts_do_not_corrupt() {
        let (storage, _tmp) = storage();
        let generation = storage.open("g").unwrap();

        std::thread::scope(|s| {
            for i in 0..8 {
                let generation = generation.clone();
                s.spawn(move || {
                    let body = format!("writer-{i}");
                    generation.put("shared", &FetchResponse::ok("text/plain", body)).unwrap();
                });
            }
        });

        let hit = generation.match_key("shared").unwrap().unwrap();
        assert!(String::from_utf8(hit.response.body).unwrap().starts_with("writer-"));
        assert_eq!(generation.len(), 1);
    }

    #[test]
    fn test_staging_is_invisible_until_commit() {
        let (storage, _tmp) = storage();

        let staged = storage.stage().unwrap();
        staged.put("k", &FetchResponse::ok("text/plain", "v")).unwrap();
        assert!(storage.keys().unwrap().is_empty());

        let committed = storage.commit(staged, "oilcap-precache-v1").unwrap();
        assert_eq!(storage.keys().unwrap(), vec!["oilcap-precache-v1"]);
        assert_eq!(committed.name(), "oilcap-precache-v1");
        assert!(committed.match_key("k").unwrap().is_some());
    }

    #[test]
    fn test_commit_replaces_existing() {
        let (storage, _tmp) = storage();

        let old = storage.open("p").unwrap();
        old.put("old", &FetchResponse::ok("text/plain", "1")).unwrap();

        let staged = storage.stage().unwrap();
        staged.put("new", &FetchResponse::ok("text/plain", "2")).unwrap();
        let committed = storage.commit(staged, "p").unwrap();

        assert!(committed.match_key("old").unwrap().is_none());
        assert!(committed.match_key("new").unwrap().is_some());
        assert_eq!(storage.keys().unwrap(), vec!["p"]);
    }

    #[test]
    fn test_discard_and_delete() {
        let (storage, _tmp) = storage();

        let staged = storage.stage().unwrap();
        storage.discard(staged).unwrap();

        storage.open("a").unwrap();
        assert!(storage.has("a"));
        assert!(storage.delete("a").unwrap());
        assert!(!storage.delete("a").unwrap());
        assert!(storage.keys().unwrap().is_empty());
    }

    #[test]
    fn test_sweep_removes_abandoned_hidden_dirs() {
        let (storage, tmp) = storage();
        let root = tmp.path().join("cache");

        // ULID from 2016: long abandoned
        std::fs::create_dir(root.join(".staging-01ARZ3NDEKTSV4RRFFQ69G5FAV")).unwrap();
        std::fs::create_dir(root.join(".trash-crashed")).unwrap();
        let live = storage.stage().unwrap();
        storage.open("oilcap-precache-v1").unwrap();

        let swept = storage.sweep(Duration::hours(1)).unwrap();
        assert_eq!(
            swept,
            vec![".staging-01ARZ3NDEKTSV4RRFFQ69G5FAV", ".trash-crashed"]
        );

        // an install started just now is left alone
        live.put("k", &FetchResponse::ok("text/plain", "v")).unwrap();
        assert_eq!(storage.commit(live, "p").unwrap().len(), 1);
        assert_eq!(storage.keys().unwrap(), vec!["oilcap-precache-v1", "p"]);
    }

    #[test]
    fn test_corrupt_entry_is_an_error() {
        let (storage, tmp) = storage();
        let generation = storage.open("g").unwrap();
        generation.put("k", &FetchResponse::ok("text/plain", "v")).unwrap();

        let path = tmp.path().join("cache").join("g").join(entry_ident("k"));
        std::fs::write(path, "garbage").unwrap();

        assert!(matches!(generation.match_key("k"), Err(OfflineError::Corrupt(_))));
    }
}
