//! Short-lived file id → path registry
//!
//! Fetched documents are written to disk and handed out by id; entries
//! expire after a TTL. Safe to share between concurrent sessions.

use std::path::{Path, PathBuf};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

/// Default lifetime of a registered file
pub const FILE_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
pub struct RegisteredFile {
    pub path: PathBuf,
    pub registered_at: Instant,
}

#[derive(Debug)]
pub struct FileRegistry {
    entries: DashMap<String, RegisteredFile>,
    ttl: Duration,
}

impl Default for FileRegistry {
    fn default() -> Self {
        Self::new(FILE_TTL)
    }
}

impl FileRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Register `path`, returning its new id
    pub fn insert(&self, path: impl AsRef<Path>) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.entries.insert(
            id.clone(),
            RegisteredFile {
                path: path.as_ref().to_path_buf(),
                registered_at: Instant::now(),
            },
        );
        id
    }

    /// Path for `id`; expired entries are dropped and report `None`
    pub fn lookup(&self, id: &str) -> Option<PathBuf> {
        let expired = {
            let entry = self.entries.get(id)?;
            if entry.registered_at.elapsed() < self.ttl {
                return Some(entry.path.clone());
            }
            true
        };
        if expired {
            self.entries.remove(id);
        }
        None
    }

    pub fn evict(&self, id: &str) -> Option<PathBuf> {
        self.entries.remove(id).map(|(_, file)| file.path)
    }

    /// Drop every expired entry, returning how many went
    pub fn evict_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, file| file.registered_at.elapsed() < self.ttl);
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            debug!(evicted, "Evicted expired file registrations");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let registry = FileRegistry::new(Duration::from_secs(60));
        let id = registry.insert("/tmp/a.md");
        assert_eq!(registry.lookup(&id), Some(PathBuf::from("/tmp/a.md")));

        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(registry.lookup(&id), None);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn evict_expired_keeps_fresh_entries() {
        let registry = FileRegistry::new(Duration::from_secs(60));
        registry.insert("/tmp/old.md");
        tokio::time::advance(Duration::from_secs(45)).await;
        let fresh = registry.insert("/tmp/new.md");
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(registry.evict_expired(), 1);
        assert_eq!(registry.lookup(&fresh), Some(PathBuf::from("/tmp/new.md")));
    }

    #[tokio::test]
    async fn concurrent_inserts_get_distinct_ids() {
        let registry = Arc::new(FileRegistry::default());
        let handles: Vec<_> = (0..16)
            .map(|n| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.insert(format!("/tmp/{n}.md")) })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(registry.len(), 16);
    }

    #[tokio::test]
    async fn evict_returns_path() {
        let registry = FileRegistry::default();
        let id = registry.insert("/tmp/x.md");
        assert_eq!(registry.evict(&id), Some(PathBuf::from("/tmp/x.md")));
        assert_eq!(registry.evict(&id), None);
    }
}
