use crate::crypto::{Transcoder, is_valid_secret, set_perms_restrictive};
use crate::entry::{Entry, EntryId, ImportCandidate, Store};
use crate::error::{Error, Result};
use crate::query::{NameMatcher, Projection, project};
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Directory for our own files (config, protection key) under the data root.
pub const APP_DIR: &str = "totp-store";

const PLUGINS_DIR: [&str; 5] = ["Microsoft", "PowerToys", "PowerToys Run", "Settings", "Plugins"];

const V0_DIR: &str = "Zapic.Plugin.TOTP";
const V0_FILE: &str = "TOTPList.json";
const V1_DIR: &str = "TOTP";
const V1_FILE: &str = "Config.json";
const STORE_DIR: &str = "Community.PowerToys.Run.Plugin.TOTP";
const V2_FILE: &str = "OTPList.json";
const STORE_FILE: &str = "AuthenticatorsList.json";

/// Per-user data root (e.g. `%LOCALAPPDATA%` or `~/.local/share`).
pub fn default_data_root() -> Result<PathBuf> {
    dirs::data_local_dir().ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "cannot get local data dir",
        ))
    })
}

/// Every on-disk location the store has used, relative to one data root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Layout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn app_dir(&self) -> PathBuf {
        self.root.join(APP_DIR)
    }

    pub fn plugins_dir(&self) -> PathBuf {
        PLUGINS_DIR.iter().fold(self.root.clone(), |p, seg| p.join(seg))
    }

    pub fn v0_dir(&self) -> PathBuf {
        self.plugins_dir().join(V0_DIR)
    }

    pub fn v0_file(&self) -> PathBuf {
        self.v0_dir().join(V0_FILE)
    }

    pub fn v1_dir(&self) -> PathBuf {
        self.plugins_dir().join(V1_DIR)
    }

    pub fn v1_file(&self) -> PathBuf {
        self.v1_dir().join(V1_FILE)
    }

    /// Host-managed directory shared by the V2 and current files.
    pub fn store_dir(&self) -> PathBuf {
        self.plugins_dir().join(STORE_DIR)
    }

    pub fn v2_file(&self) -> PathBuf {
        self.store_dir().join(V2_FILE)
    }

    pub fn v2_version_file(&self) -> PathBuf {
        version_marker_path(&self.v2_file())
    }

    pub fn store_file(&self) -> PathBuf {
        self.store_dir().join(STORE_FILE)
    }
}

/// Sidecar marker next to a host-managed file: `OTPList.json` -> `OTPList_version.txt`.
pub fn version_marker_path(file: &Path) -> PathBuf {
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    file.with_file_name(format!("{stem}_version.txt"))
}

/// Write-then-rename so readers never see a half-written file.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "invalid target path",
        ))
    })?;
    std::fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.flush()?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    set_perms_restrictive(path)?;
    Ok(())
}

/// Serialize a store as indented JSON and replace the file atomically.
pub fn save(path: &Path, store: &Store) -> Result<()> {
    let s = serde_json::to_string_pretty(store)?;
    atomic_write(path, s.as_bytes())?;

    write_version_marker(path)
}

/// Create the sidecar marker for `file` unless one is already there.
pub(crate) fn write_version_marker(file: &Path) -> Result<()> {
    let marker = version_marker_path(file);
    if marker.exists() {
        return Ok(());
    }
    atomic_write(&marker, env!("CARGO_PKG_VERSION").as_bytes())
}

/// Read the current store, creating an empty one when absent.
///
/// Entries still holding a plaintext key are encrypted and the result is
/// persisted before returning, so callers only ever see encrypted entries.
pub fn load(path: &Path, transcoder: &Transcoder) -> Result<Store> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "no store file, creating an empty one");
        let store = Store::default();
        save(path, &store)?;
        return Ok(store);
    }

    let data = std::fs::read(path)?;
    let mut store: Store = serde_json::from_slice(&data).map_err(|source| Error::CorruptStore {
        path: path.to_path_buf(),
        source,
    })?;

    let upgraded = upgrade_unencrypted(&mut store, transcoder)?;
    if upgraded > 0 {
        tracing::info!(upgraded, "encrypted plaintext entries at load");
        save(path, &store)?;
    }
    tracing::debug!(entries = store.entries.len(), "store loaded");
    Ok(store)
}

/// Encrypt every entry with `is_encrypted == false` in place.
pub fn upgrade_unencrypted(store: &mut Store, transcoder: &Transcoder) -> Result<usize> {
    let mut upgraded = 0;
    for entry in store.entries.iter_mut().filter(|e| !e.is_encrypted) {
        entry.key = transcoder.encrypt(&entry.key)?;
        entry.is_encrypted = true;
        upgraded += 1;
    }
    Ok(upgraded)
}

/// Whether a commit drops candidates whose secret is already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupePolicy {
    #[default]
    Off,
    BySecret,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitSummary {
    pub added: usize,
    pub skipped_duplicates: usize,
}

#[derive(Debug)]
struct Inner {
    path: PathBuf,
    transcoder: Transcoder,
    store: Mutex<Store>,
}

/// Handle to the resident store. Clones share the same list and lock.
#[derive(Debug, Clone)]
pub struct Repository {
    inner: Arc<Inner>,
}

impl Repository {
    pub fn open(path: impl Into<PathBuf>, transcoder: Transcoder) -> Result<Self> {
        let path = path.into();
        let store = load(&path, &transcoder)?;
        Ok(Repository {
            inner: Arc::new(Inner {
                path,
                transcoder,
                store: Mutex::new(store),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn transcoder(&self) -> &Transcoder {
        &self.inner.transcoder
    }

    pub fn snapshot(&self) -> Store {
        self.inner.store.lock().clone()
    }

    pub fn with_store<R>(&self, f: impl FnOnce(&Store) -> R) -> R {
        f(&*self.inner.store.lock())
    }

    pub fn len(&self) -> usize {
        self.inner.store.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-read the file, dropping the resident copy.
    pub fn reload(&self) -> Result<()> {
        let mut guard = self.inner.store.lock();
        *guard = load(&self.inner.path, &self.inner.transcoder)?;
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let guard = self.inner.store.lock();
        save(&self.inner.path, &guard)
    }

    /// Encrypt and append user-selected candidates, then persist once.
    pub fn commit(
        &self,
        candidates: Vec<ImportCandidate>,
        policy: DedupePolicy,
    ) -> Result<CommitSummary> {
        if candidates.iter().any(|c| !is_valid_secret(&c.secret)) {
            return Err(Error::InvalidSecret);
        }

        let transcoder = &self.inner.transcoder;
        let mut guard = self.inner.store.lock();
        let before = guard.entries.len();

        let mut seen: Vec<Zeroizing<String>> = Vec::new();
        if policy == DedupePolicy::BySecret {
            for entry in &guard.entries {
                if !entry.is_encrypted {
                    seen.push(Zeroizing::new(entry.key.clone()));
                } else if let Ok(secret) = transcoder.decrypt(&entry.key) {
                    seen.push(secret);
                }
            }
        }

        let mut summary = CommitSummary::default();
        for candidate in candidates {
            if policy == DedupePolicy::BySecret
                && seen.iter().any(|s| s.as_str() == candidate.secret)
            {
                tracing::debug!(name = %candidate.name, "skipping duplicate secret");
                summary.skipped_duplicates += 1;
                continue;
            }
            let key = match transcoder.encrypt(&candidate.secret) {
                Ok(key) => key,
                Err(e) => {
                    guard.entries.truncate(before);
                    return Err(e);
                }
            };
            guard.entries.push(Entry {
                name: candidate.name,
                key,
                is_encrypted: true,
            });
            if policy == DedupePolicy::BySecret {
                seen.push(Zeroizing::new(candidate.secret));
            }
            summary.added += 1;
        }

        if summary.added > 0 {
            if let Err(e) = save(&self.inner.path, &guard) {
                guard.entries.truncate(before);
                return Err(e);
            }
        }
        tracing::info!(
            added = summary.added,
            skipped = summary.skipped_duplicates,
            "committed import"
        );
        Ok(summary)
    }

    pub fn rename(&self, id: &EntryId, new_name: &str) -> Result<()> {
        if new_name.is_empty() {
            return Err(Error::EmptyName);
        }
        let mut guard = self.inner.store.lock();
        let entry = guard
            .entries
            .iter_mut()
            .find(|e| id.matches(e))
            .ok_or(Error::EntryNotFound)?;
        let old = std::mem::replace(&mut entry.name, new_name.to_string());

        if let Err(e) = save(&self.inner.path, &guard) {
            if let Some(entry) = guard.entries.iter_mut().find(|e| id.matches(e)) {
                entry.name = old;
            }
            return Err(e);
        }
        Ok(())
    }

    pub fn delete(&self, id: &EntryId) -> Result<Entry> {
        let mut guard = self.inner.store.lock();
        let pos = guard
            .entries
            .iter()
            .position(|e| id.matches(e))
            .ok_or(Error::EntryNotFound)?;
        let removed = guard.entries.remove(pos);

        if let Err(e) = save(&self.inner.path, &guard) {
            guard.entries.insert(pos, removed);
            return Err(e);
        }
        tracing::info!(name = %removed.name, "entry deleted");
        Ok(removed)
    }

    /// Live codes / invalid markers for a search, read-only.
    pub fn project(&self, search: &str, matcher: &dyn NameMatcher, now: u64) -> Vec<Projection> {
        let guard = self.inner.store.lock();
        project(&guard.entries, &self.inner.transcoder, search, matcher, now)
    }

    /// Decrypted copies of every entry for the portable export, plus the
    /// number of entries that could not be decrypted.
    pub fn export_candidates(&self) -> (Vec<ImportCandidate>, usize) {
        let guard = self.inner.store.lock();
        let mut out = Vec::with_capacity(guard.entries.len());
        let mut unreadable = 0;
        for entry in &guard.entries {
            let secret = if entry.is_encrypted {
                match self.inner.transcoder.decrypt(&entry.key) {
                    Ok(s) => s.as_str().to_string(),
                    Err(e) => {
                        tracing::warn!(name = %entry.name, error = %e, "skipping unreadable entry");
                        unreadable += 1;
                        continue;
                    }
                }
            } else {
                entry.key.clone()
            };
            out.push(ImportCandidate {
                name: entry.name.clone(),
                secret,
            });
        }
        (out, unreadable)
    }
}
