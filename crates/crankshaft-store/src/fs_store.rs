use crate::{KvStore, StoreError, StoreResult, digest_json, io_error};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    fs::{self, File},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

const STORE_FILE: &str = "store.json";
const STORE_TMP_FILE: &str = "store.json.tmp";

#[derive(Serialize, Deserialize)]
struct StoreFile {
    digest: String,
    entries: BTreeMap<String, String>,
}

#[derive(Default)]
struct FsState {
    committed: BTreeMap<String, String>,
    pending: HashMap<String, Option<String>>,
    closed: bool,
}

/// Filesystem-backed store rooted at a directory holding `store.json`.
///
/// Each commit rewrites the whole file through a temp file and a rename, so a
/// crash leaves either the previous commit or the new one on disk.
pub struct FsKvStore {
    dir: PathBuf,
    state: Mutex<FsState>,
}

impl fmt::Debug for FsKvStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsKvStore").field("dir", &self.dir).finish()
    }
}

impl FsKvStore {
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        let committed = Self::load(&dir)?;
        log::debug!("opened store at {} ({} keys)", dir.display(), committed.len());
        Ok(Self {
            dir,
            state: Mutex::new(FsState {
                committed,
                ..FsState::default()
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn load(dir: &Path) -> StoreResult<BTreeMap<String, String>> {
        let path = dir.join(STORE_FILE);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(io_error(path, err)),
        };
        let file: StoreFile = serde_json::from_slice(&raw)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))?;
        let actual = digest_json(&file.entries)?;
        if actual != file.digest {
            return Err(StoreError::Corrupt(format!(
                "{}: digest mismatch (recorded {}, computed {actual})",
                path.display(),
                file.digest
            )));
        }
        Ok(file.entries)
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> StoreResult<()> {
        let file = StoreFile {
            digest: digest_json(entries)?,
            entries: entries.clone(),
        };
        let bytes = serde_json::to_vec(&file)?;
        let tmp = self.dir.join(STORE_TMP_FILE);
        let target = self.dir.join(STORE_FILE);
        {
            let mut out = File::create(&tmp).map_err(|e| io_error(&tmp, e))?;
            out.write_all(&bytes).map_err(|e| io_error(&tmp, e))?;
            out.sync_all().map_err(|e| io_error(&tmp, e))?;
        }
        fs::rename(&tmp, &target).map_err(|e| io_error(&target, e))?;
        sync_dir(&self.dir)
    }
}

impl KvStore for FsKvStore {
    fn has(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let guard = self.state.lock();
        if guard.closed {
            return Err(StoreError::Closed);
        }
        if let Some(pending) = guard.pending.get(key) {
            return Ok(pending.clone());
        }
        Ok(guard.committed.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut guard = self.state.lock();
        if guard.closed {
            return Err(StoreError::Closed);
        }
        guard.pending.insert(key.to_string(), Some(value.to_string()));
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let mut guard = self.state.lock();
        if guard.closed {
            return Err(StoreError::Closed);
        }
        guard.pending.insert(key.to_string(), None);
        Ok(())
    }

    fn commit(&self) -> StoreResult<()> {
        let mut guard = self.state.lock();
        if guard.closed {
            return Err(StoreError::Closed);
        }
        if guard.pending.is_empty() {
            return Ok(());
        }
        let mut next = guard.committed.clone();
        for (key, value) in &guard.pending {
            match value {
                Some(value) => {
                    next.insert(key.clone(), value.clone());
                }
                None => {
                    next.remove(key);
                }
            }
        }
        // On failure the pending set is kept so the caller may retry or abort.
        self.persist(&next)?;
        guard.committed = next;
        guard.pending.clear();
        Ok(())
    }

    fn abort(&self) -> StoreResult<()> {
        let mut guard = self.state.lock();
        if guard.closed {
            return Err(StoreError::Closed);
        }
        guard.pending.clear();
        Ok(())
    }

    fn close(&self) -> StoreResult<()> {
        let mut guard = self.state.lock();
        if !guard.pending.is_empty() {
            log::warn!(
                "closing store at {} with {} uncommitted writes",
                self.dir.display(),
                guard.pending.len()
            );
        }
        guard.pending.clear();
        guard.closed = true;
        Ok(())
    }
}

/// Make a rename inside `dir` durable.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> StoreResult<()> {
    File::open(dir)
        .and_then(|handle| handle.sync_all())
        .map_err(|e| io_error(dir, e))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> StoreResult<()> {
    Ok(())
}
