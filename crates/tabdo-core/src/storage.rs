use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::{debug, error, info, instrument, warn};

use crate::store::Store;

/// Storage key used by the first app variant.
pub const CLASSIC_STORAGE_KEY: &str = "@toDos";

/// Storage key used by the second app variant; the default.
pub const DEFAULT_STORAGE_KEY: &str = "@toDos1";

/// String-to-string storage, the same shape as a mobile local store.
pub trait KeyValueStorage {
    fn get_item(&self, key: &str) -> anyhow::Result<Option<String>>;

    fn set_item(&mut self, key: &str, value: &str) -> anyhow::Result<()>;

    fn remove_item(&mut self, key: &str) -> anyhow::Result<()>;

    fn contains_item(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.get_item(key)?.is_some())
    }

    /// Copies the stored value of `from` to `to` without interpreting it.
    fn copy_item(&mut self, from: &str, to: &str) -> anyhow::Result<()> {
        let value = self
            .get_item(from)?
            .ok_or_else(|| anyhow!("nothing stored under {from}"))?;
        self.set_item(to, &value)
    }
}

/// One JSON file per key inside a data directory.
#[derive(Debug)]
pub struct FileStorage {
    pub data_dir: PathBuf,
}

impl FileStorage {
    #[instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        info!(data_dir = %data_dir.display(), "opened file storage");
        Ok(Self { data_dir })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", file_stem(key)))
    }
}

impl KeyValueStorage for FileStorage {
    #[instrument(skip(self))]
    fn get_item(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(raw) => {
                debug!(file = %path.display(), bytes = raw.len(), "read item");
                Ok(Some(raw))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(file = %path.display(), "no stored item");
                Ok(None)
            }
            Err(err) => Err(err).with_context(|| format!("failed reading {}", path.display())),
        }
    }

    #[instrument(skip(self, value))]
    fn set_item(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.path_for(key);
        write_atomic(&self.data_dir, &path, value.as_bytes())
    }

    #[instrument(skip(self))]
    fn remove_item(&mut self, key: &str) -> anyhow::Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed removing {}", path.display())),
        }
    }

    fn contains_item(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.path_for(key).exists())
    }

    /// Byte-for-byte copy, so files that are not valid UTF-8 survive.
    #[instrument(skip(self))]
    fn copy_item(&mut self, from: &str, to: &str) -> anyhow::Result<()> {
        let source = self.path_for(from);
        let bytes =
            fs::read(&source).with_context(|| format!("failed reading {}", source.display()))?;
        write_atomic(&self.data_dir, &self.path_for(to), &bytes)
    }
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    debug!(file = %path.display(), bytes = bytes.len(), "writing item atomically");

    let mut temp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    temp.write_all(bytes)?;
    temp.flush()?;
    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
    Ok(())
}

/// In-process storage, handy for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: HashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set_item(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> anyhow::Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Reads and writes the whole [`Store`] as one JSON blob under a single key.
#[derive(Debug)]
pub struct Persistence<S> {
    storage: S,
    key: String,
}

impl<S: KeyValueStorage> Persistence<S> {
    pub fn new(storage: S, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn backup_prefix(&self) -> String {
        format!("{}.corrupt-", self.key)
    }

    /// Loads the store; an absent or empty blob is an empty store.
    ///
    /// A blob that cannot be read as text or does not parse is copied to a
    /// fresh `<key>.corrupt-<millis>` key before an empty store is returned,
    /// so the next save cannot destroy it. If that copy fails the error is
    /// returned instead.
    #[instrument(skip(self), fields(key = %self.key))]
    pub fn load(&mut self) -> anyhow::Result<Store> {
        let raw = match self.storage.get_item(&self.key) {
            Ok(raw) => raw,
            Err(err) => {
                let reason = format!("{err:#}");
                self.preserve_corrupt(&reason)
                    .with_context(|| format!("failed to read stored to-dos under {}", self.key))?;
                return Ok(Store::default());
            }
        };

        let Some(raw) = raw else {
            info!("no stored to-dos yet, starting empty");
            return Ok(Store::default());
        };
        if raw.trim().is_empty() {
            info!("stored to-dos are empty, starting empty");
            return Ok(Store::default());
        }

        match serde_json::from_str::<Store>(&raw) {
            Ok(store) => {
                debug!(count = store.len(), category = ?store.active_category, "loaded store");
                Ok(store)
            }
            Err(err) => {
                self.preserve_corrupt(&err.to_string())?;
                Ok(Store::default())
            }
        }
    }

    fn preserve_corrupt(&mut self, reason: &str) -> anyhow::Result<String> {
        let prefix = self.backup_prefix();
        let mut millis = Utc::now().timestamp_millis();
        let mut backup = format!("{prefix}{millis}");
        while self.storage.contains_item(&backup)? {
            millis += 1;
            backup = format!("{prefix}{millis}");
        }

        error!(error = %reason, backup = %backup, "stored to-dos are unusable; backing up and starting empty");
        self.storage
            .copy_item(&self.key, &backup)
            .with_context(|| format!("failed to back up stored to-dos to {backup}"))?;
        warn!(backup = %backup, "unusable blob preserved");
        Ok(backup)
    }

    #[instrument(skip(self, store), fields(key = %self.key, count = store.len()))]
    pub fn save(&mut self, store: &Store) -> anyhow::Result<()> {
        let serialized = serde_json::to_string(store).context("failed to serialize to-dos")?;
        self.storage
            .set_item(&self.key, &serialized)
            .with_context(|| format!("failed to save to-dos under {}", self.key))?;
        debug!(bytes = serialized.len(), "saved store");
        Ok(())
    }
}

fn file_stem(key: &str) -> String {
    key.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '@' | '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
