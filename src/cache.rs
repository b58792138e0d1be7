use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const CACHE_INDEX_FILE: &str = "generated_images_cache.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageCacheEntry {
    pub content_key: String,
    pub file_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub source_prompt: String,
    pub owning_story_title: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheIndex {
    generated_images: HashMap<String, ImageCacheEntry>,
}

/// Owns the on-disk index of generated images. Lookups take the read lock;
/// inserts and evictions are serialized through the write lock so concurrent
/// render requests cannot race on the same content key.
pub struct ImageCache {
    index_path: PathBuf,
    index: RwLock<CacheIndex>,
}

impl ImageCache {
    pub fn open(images_dir: &Path) -> Self {
        let index_path = images_dir.join(CACHE_INDEX_FILE);
        let index = match fs::read_to_string(&index_path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(index) => index,
                Err(e) => {
                    warn!("could not parse image cache index, starting fresh: {e}");
                    CacheIndex::default()
                }
            },
            Err(_) => CacheIndex::default(),
        };
        Self {
            index_path,
            index: RwLock::new(index),
        }
    }

    /// A hit whose file no longer exists on disk is purged and reported as
    /// a miss.
    pub fn lookup(&self, content_key: &str) -> Option<PathBuf> {
        let stale = {
            let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
            match index.generated_images.get(content_key) {
                Some(entry) if entry.file_path.exists() => return Some(entry.file_path.clone()),
                Some(_) => true,
                None => false,
            }
        };
        if stale {
            let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
            index.generated_images.remove(content_key);
            Self::persist(&self.index_path, &index);
            debug!("purged cache entry {content_key}: file missing on disk");
        }
        None
    }

    pub fn insert(&self, entry: ImageCacheEntry) {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        index
            .generated_images
            .insert(entry.content_key.clone(), entry);
        Self::persist(&self.index_path, &index);
    }

    pub fn len(&self) -> usize {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generated_images
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Age-based eviction sweep: removes expired entries and their files.
    /// Returns how many entries were evicted.
    pub fn evict_older_than(&self, max_age_days: i64) -> usize {
        let cutoff = Utc::now() - chrono::Duration::days(max_age_days);
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        let expired: Vec<String> = index
            .generated_images
            .iter()
            .filter(|(_, entry)| entry.created_at < cutoff)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            if let Some(entry) = index.generated_images.remove(key) {
                if entry.file_path.exists() {
                    if let Err(e) = fs::remove_file(&entry.file_path) {
                        warn!("could not remove expired image {}: {e}", entry.file_path.display());
                    }
                }
            }
        }
        if !expired.is_empty() {
            Self::persist(&self.index_path, &index);
        }
        expired.len()
    }

    fn persist(path: &Path, index: &CacheIndex) {
        match serde_json::to_string_pretty(index) {
            Ok(data) => {
                if let Err(e) = fs::write(path, data) {
                    warn!("could not save image cache index: {e}");
                }
            }
            Err(e) => warn!("could not serialize image cache index: {e}"),
        }
    }
}
