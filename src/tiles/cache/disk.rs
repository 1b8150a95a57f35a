//! Persistent tile tier.
//!
//! Tiles live as individual files under the cache root; a bincode index next
//! to them records each entry's size and two sequence numbers (insertion and
//! last access). Sequence numbers come from one monotonic counter that is
//! persisted with the index, so eviction order survives restarts and is fully
//! determined by the access pattern.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::CacheKey;
use crate::core::config::{DiskCacheConfig, EvictionPolicy};
use crate::prelude::HashMap;
use crate::tiles::source::TileImage;
use crate::{MapError, Result};

const INDEX_FILE: &str = "index.bin";
const INDEX_VERSION: u32 = 1;
/// Access-only index changes are written after this many reads, on
/// mutation, or on drop
const ACCESS_FLUSH_INTERVAL: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct IndexEntry {
    source_id: String,
    relative_path: String,
    size: u64,
    inserted_seq: u64,
    last_access_seq: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    next_seq: u64,
    entries: Vec<(String, IndexEntry)>,
}

#[derive(Debug)]
pub struct DiskTier {
    root: PathBuf,
    max_bytes: u64,
    max_entries: usize,
    eviction: EvictionPolicy,
    entries: HashMap<String, IndexEntry>,
    total_bytes: u64,
    next_seq: u64,
    unsaved_accesses: usize,
}

impl DiskTier {
    /// Open (or create) the tier rooted at `config.path`
    pub fn open(config: &DiskCacheConfig) -> Result<Self> {
        fs::create_dir_all(&config.path).map_err(|e| {
            MapError::CacheIo(format!("cannot create {}: {}", config.path.display(), e))
        })?;

        let mut tier = Self {
            root: config.path.clone(),
            max_bytes: config.max_bytes,
            max_entries: config.max_entries.max(1),
            eviction: config.eviction,
            entries: HashMap::default(),
            total_bytes: 0,
            next_seq: 0,
            unsaved_accesses: 0,
        };

        match tier.load_index() {
            Ok(Some(index)) => {
                tier.next_seq = index.next_seq;
                for (key, entry) in index.entries {
                    tier.total_bytes += entry.size;
                    tier.entries.insert(key, entry);
                }
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!(
                    "discarding unreadable tile cache index in {}: {}",
                    tier.root.display(),
                    e
                );
            }
        }

        // Limits may have shrunk since the index was written
        tier.evict_to_limits(None)?;
        log::info!(
            "opened tile cache at {} with {} entries ({} bytes)",
            tier.root.display(),
            tier.entries.len(),
            tier.total_bytes
        );
        Ok(tier)
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    fn load_index(&self) -> std::result::Result<Option<IndexFile>, String> {
        let bytes = match fs::read(self.index_path()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.to_string()),
        };
        let index: IndexFile = bincode::deserialize(&bytes).map_err(|e| e.to_string())?;
        if index.version != INDEX_VERSION {
            return Err(format!("unsupported index version {}", index.version));
        }
        Ok(Some(index))
    }

    fn save_index(&mut self) -> Result<()> {
        let mut entries: Vec<(String, IndexEntry)> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let index = IndexFile {
            version: INDEX_VERSION,
            next_seq: self.next_seq,
            entries,
        };
        let bytes = bincode::serialize(&index).map_err(|e| MapError::CacheIo(e.to_string()))?;

        // write-then-rename so a crash never leaves a half-written index
        let tmp = self.root.join(format!("{}.tmp", INDEX_FILE));
        fs::write(&tmp, bytes).map_err(|e| MapError::CacheIo(e.to_string()))?;
        fs::rename(&tmp, self.index_path()).map_err(|e| MapError::CacheIo(e.to_string()))?;
        self.unsaved_accesses = 0;
        Ok(())
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Directory name for a source id: filesystem-safe text plus a hash so
    /// ids differing only in unsafe characters do not collide
    fn source_dir(source_id: &str) -> String {
        let safe: String = source_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}-{:016x}", safe, fxhash::hash64(source_id.as_bytes()))
    }

    fn relative_path(key: &CacheKey) -> String {
        format!(
            "{}/{}/{}/{}.tile",
            Self::source_dir(&key.source_id),
            key.tile.zoom,
            key.tile.x,
            key.tile.y
        )
    }

    fn absolute(&self, relative: &str) -> PathBuf {
        self.root.join(Path::new(relative))
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(&key.storage_key())
    }

    /// Read a tile. Missing, short or undecodable files are dropped from the
    /// index and reported as a miss.
    pub fn get(&mut self, key: &CacheKey) -> Result<Option<TileImage>> {
        let storage_key = key.storage_key();
        let Some(entry) = self.entries.get(&storage_key).cloned() else {
            return Ok(None);
        };

        let path = self.absolute(&entry.relative_path);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::warn!("tile file {} vanished, dropping entry", path.display());
                self.forget(&storage_key)?;
                return Ok(None);
            }
            Err(e) => return Err(MapError::CacheIo(format!("{}: {}", path.display(), e))),
        };

        if bytes.len() as u64 != entry.size {
            log::warn!(
                "tile file {} has {} bytes, expected {}; dropping entry",
                path.display(),
                bytes.len(),
                entry.size
            );
            self.forget(&storage_key)?;
            return Ok(None);
        }

        let image = match TileImage::from_bytes(bytes) {
            Ok(image) => image,
            Err(e) => {
                log::warn!("corrupt tile {}: {}; dropping entry", storage_key, e);
                self.forget(&storage_key)?;
                return Ok(None);
            }
        };

        let seq = self.next_seq();
        if let Some(entry) = self.entries.get_mut(&storage_key) {
            entry.last_access_seq = seq;
        }
        if self.eviction == EvictionPolicy::LeastRecentlyUsed {
            self.unsaved_accesses += 1;
            if self.unsaved_accesses >= ACCESS_FLUSH_INTERVAL {
                self.save_index()?;
            }
        }
        Ok(Some(image))
    }

    /// Write a tile, then evict until the tier is back within its limits
    pub fn put(&mut self, key: &CacheKey, image: &TileImage) -> Result<()> {
        let storage_key = key.storage_key();
        let relative_path = Self::relative_path(key);
        let path = self.absolute(&relative_path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| MapError::CacheIo(format!("{}: {}", parent.display(), e)))?;
        }
        fs::write(&path, image.bytes())
            .map_err(|e| MapError::CacheIo(format!("{}: {}", path.display(), e)))?;

        let seq = self.next_seq();
        let entry = IndexEntry {
            source_id: key.source_id.to_string(),
            relative_path,
            size: image.len() as u64,
            inserted_seq: seq,
            last_access_seq: seq,
        };
        if let Some(old) = self.entries.insert(storage_key.clone(), entry) {
            self.total_bytes = self.total_bytes.saturating_sub(old.size);
        }
        self.total_bytes += image.len() as u64;

        self.evict_to_limits(Some(&storage_key))?;
        self.save_index()
    }

    fn eviction_rank(&self, entry: &IndexEntry) -> u64 {
        match self.eviction {
            EvictionPolicy::LeastRecentlyUsed => entry.last_access_seq,
            EvictionPolicy::OldestInserted => entry.inserted_seq,
        }
    }

    /// Evict entries (never `keep`) until both limits hold or only `keep` is left
    fn evict_to_limits(&mut self, keep: Option<&str>) -> Result<()> {
        let mut evicted = 0usize;
        while self.entries.len() > self.max_entries || self.total_bytes > self.max_bytes {
            let victim = self
                .entries
                .iter()
                .filter(|(key, _)| Some(key.as_str()) != keep)
                .min_by_key(|(_, entry)| self.eviction_rank(entry))
                .map(|(key, _)| key.clone());
            let Some(victim) = victim else {
                break;
            };
            self.remove_entry(&victim)?;
            evicted += 1;
        }
        if evicted > 0 {
            log::debug!("evicted {} tiles from disk cache", evicted);
            if keep.is_none() {
                self.save_index()?;
            }
        }
        Ok(())
    }

    fn remove_entry(&mut self, storage_key: &str) -> Result<()> {
        if let Some(entry) = self.entries.remove(storage_key) {
            self.total_bytes = self.total_bytes.saturating_sub(entry.size);
            let path = self.absolute(&entry.relative_path);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(MapError::CacheIo(format!("{}: {}", path.display(), e))),
            }
        }
        Ok(())
    }

    fn forget(&mut self, storage_key: &str) -> Result<()> {
        self.remove_entry(storage_key)?;
        self.save_index()
    }

    /// Remove every tile of one source
    pub fn remove_source(&mut self, source_id: &str) -> Result<usize> {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.source_id == source_id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            self.remove_entry(key)?;
        }
        let dir = self.root.join(Self::source_dir(source_id));
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(MapError::CacheIo(format!("{}: {}", dir.display(), e))),
        }
        self.save_index()?;
        Ok(keys.len())
    }

    pub fn clear(&mut self) -> Result<()> {
        let keys: Vec<String> = self.entries.keys().cloned().collect();
        for key in &keys {
            self.remove_entry(key)?;
        }
        self.total_bytes = 0;
        self.save_index()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for DiskTier {
    fn drop(&mut self) {
        if self.unsaved_accesses > 0 {
            if let Err(e) = self.save_index() {
                log::warn!("could not persist tile cache index: {}", e);
            }
        }
    }
}
