//! In-memory reference implementation of the [`Database`] trait.
//!
//! Backs the default binary wiring and the test suites. Every operation is
//! modeled on what the real media database does, including the purge and
//! snapshot semantics a full rescan relies on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

use async_trait::async_trait;
use tracing::debug;

use crate::db::{
    AdminKey, Database, DatabaseError, DbResult, MediaFile, PlaylistRecord, QueueItem, RssFeed,
};

#[derive(Default)]
struct State {
    files: Vec<MediaFile>,
    playlists: Vec<PlaylistRecord>,
    queue: Vec<QueueItem>,
    rss: Vec<RssFeed>,
    rss_saved: Option<Vec<RssFeed>>,
    admin: HashMap<&'static str, i64>,
    post_scan_hooks: u32,
}

/// A complete [`Database`] held in process memory.
#[derive(Default)]
pub struct MemoryDatabase {
    state: Mutex<State>,
    next_id: AtomicU32,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            next_id: AtomicU32::new(1),
        }
    }

    fn alloc_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    // Inspection helpers, mostly for tests and status endpoints.

    pub fn file_count(&self) -> usize {
        self.state.lock().unwrap().files.len()
    }

    pub fn file_paths(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.files.iter().map(|f| f.path.clone()).collect()
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn rss_feeds(&self) -> Vec<RssFeed> {
        self.state.lock().unwrap().rss.clone()
    }

    pub fn admin_get_i64(&self, key: AdminKey) -> Option<i64> {
        self.state.lock().unwrap().admin.get(key.as_str()).copied()
    }

    pub fn post_scan_hook_count(&self) -> u32 {
        self.state.lock().unwrap().post_scan_hooks
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn file_add(&self, mut file: MediaFile) -> DbResult<u32> {
        let id = self.alloc_id();
        file.id = id;
        file.db_timestamp = Some(SystemTime::now());
        self.state.lock().unwrap().files.push(file);
        Ok(id)
    }

    async fn file_update(&self, file: MediaFile) -> DbResult<()> {
        let mut state = self.state.lock().unwrap();
        let row = state
            .files
            .iter_mut()
            .find(|f| f.id == file.id)
            .ok_or_else(|| DatabaseError::NotFound(format!("file {}", file.id)))?;
        *row = file;
        row.db_timestamp = Some(SystemTime::now());
        Ok(())
    }

    async fn playlist_add(&self, mut playlist: PlaylistRecord) -> DbResult<u32> {
        let id = self.alloc_id();
        playlist.id = id;
        self.state.lock().unwrap().playlists.push(playlist);
        Ok(id)
    }

    async fn playlist_update(&self, playlist: PlaylistRecord) -> DbResult<()> {
        let mut state = self.state.lock().unwrap();
        let row = state
            .playlists
            .iter_mut()
            .find(|p| p.id == playlist.id)
            .ok_or_else(|| DatabaseError::NotFound(format!("playlist {}", playlist.id)))?;
        *row = playlist;
        Ok(())
    }

    async fn queue_fetch_by_file_id(&self, file_id: u32) -> DbResult<Option<QueueItem>> {
        let state = self.state.lock().unwrap();
        Ok(state.queue.iter().find(|i| i.file_id == file_id).cloned())
    }

    async fn queue_add(&self, mut item: QueueItem) -> DbResult<u32> {
        let id = self.alloc_id();
        item.id = id;
        self.state.lock().unwrap().queue.push(item);
        Ok(id)
    }

    async fn queue_clear(&self) -> DbResult<()> {
        self.state.lock().unwrap().queue.clear();
        Ok(())
    }

    async fn queue_cleanup(&self) -> DbResult<()> {
        let mut state = self.state.lock().unwrap();
        let live: Vec<u32> = state.files.iter().map(|f| f.id).collect();
        state.queue.retain(|i| live.contains(&i.file_id));
        Ok(())
    }

    async fn purge_cruft(&self, older_than: SystemTime) -> DbResult<()> {
        let mut state = self.state.lock().unwrap();
        let before = state.files.len();
        state
            .files
            .retain(|f| matches!(f.db_timestamp, Some(ts) if ts >= older_than));
        debug!(purged = before - state.files.len(), "Purged stale file rows");
        Ok(())
    }

    async fn purge_all(&self) -> DbResult<()> {
        let mut state = self.state.lock().unwrap();
        state.files.clear();
        state.playlists.clear();
        state.rss.clear();
        Ok(())
    }

    async fn groups_cleanup(&self) -> DbResult<()> {
        Ok(())
    }

    async fn artwork_purge_cruft(&self, _older_than: SystemTime) -> DbResult<()> {
        Ok(())
    }

    async fn rss_snapshot(&self) -> DbResult<()> {
        let mut state = self.state.lock().unwrap();
        let feeds = state.rss.clone();
        state.rss_saved = Some(feeds);
        Ok(())
    }

    async fn rss_restore(&self) -> DbResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(saved) = state.rss_saved.take() {
            state.rss = saved;
        }
        Ok(())
    }

    async fn rss_feed_add(&self, feed: RssFeed) -> DbResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.rss.iter().any(|f| f.url == feed.url) {
            return Err(DatabaseError::InvalidRecord(format!(
                "feed already subscribed: {}",
                feed.url
            )));
        }
        state.rss.push(feed);
        Ok(())
    }

    async fn rss_feed_remove(&self, url: &str) -> DbResult<()> {
        let mut state = self.state.lock().unwrap();
        let before = state.rss.len();
        state.rss.retain(|f| f.url != url);
        if state.rss.len() == before {
            return Err(DatabaseError::NotFound(format!("feed {}", url)));
        }
        Ok(())
    }

    async fn admin_set_i64(&self, key: AdminKey, value: i64) -> DbResult<()> {
        self.state.lock().unwrap().admin.insert(key.as_str(), value);
        Ok(())
    }

    async fn hook_post_scan(&self) -> DbResult<()> {
        self.state.lock().unwrap().post_scan_hooks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_file_add_and_update() {
        let db = MemoryDatabase::new();
        let id = db
            .file_add(MediaFile {
                path: "/music/a.flac".into(),
                fname: "a.flac".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(db.file_count(), 1);

        db.file_update(MediaFile {
            id,
            path: "/music/a.flac".into(),
            fname: "a.flac".into(),
            title: "A".into(),
            ..Default::default()
        })
        .await
        .unwrap();
        assert_eq!(db.file_count(), 1);
    }

    #[tokio::test]
    async fn test_purge_cruft_removes_stale_rows() {
        let db = MemoryDatabase::new();
        db.file_add(MediaFile {
            path: "/music/old.flac".into(),
            fname: "old.flac".into(),
            ..Default::default()
        })
        .await
        .unwrap();

        let cutoff = SystemTime::now() + Duration::from_secs(1);
        db.purge_cruft(cutoff).await.unwrap();
        assert_eq!(db.file_count(), 0);
    }

    #[tokio::test]
    async fn test_rss_snapshot_survives_purge_all() {
        let db = MemoryDatabase::new();
        db.rss_feed_add(RssFeed {
            name: "Cast".into(),
            url: "http://example.com/rss".into(),
            limit: Some(10),
        })
        .await
        .unwrap();

        db.rss_snapshot().await.unwrap();
        db.purge_all().await.unwrap();
        assert!(db.rss_feeds().is_empty());

        db.rss_restore().await.unwrap();
        assert_eq!(db.rss_feeds().len(), 1);
    }

    #[tokio::test]
    async fn test_queue_cleanup_drops_orphans() {
        let db = MemoryDatabase::new();
        let id = db
            .file_add(MediaFile {
                path: "/music/a.flac".into(),
                fname: "a.flac".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        db.queue_add(QueueItem {
            file_id: id,
            ..Default::default()
        })
        .await
        .unwrap();
        db.queue_add(QueueItem {
            file_id: 9999,
            ..Default::default()
        })
        .await
        .unwrap();

        db.queue_cleanup().await.unwrap();
        assert_eq!(db.queue_len(), 1);
    }
}
