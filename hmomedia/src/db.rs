//! Database collaborator interface.
//!
//! The on-disk schema and SQL live outside this core; the coordinator and
//! the broadcast engine reach the database exclusively through this trait.
//! Implementations must be safe to call from any task.

use std::time::SystemTime;

use async_trait::async_trait;

/// Errors reported by the database collaborator.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("database failure: {0}")]
    Failure(String),
}

/// Result type for database operations.
pub type DbResult<T> = std::result::Result<T, DatabaseError>;

/// Keys of the admin key-value store used by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminKey {
    /// Wall-clock time of the last flushed database update notification.
    DbUpdate,
    /// Wall-clock time of the last database modification.
    DbModified,
}

impl AdminKey {
    pub fn as_str(self) -> &'static str {
        match self {
            AdminKey::DbUpdate => "db_update",
            AdminKey::DbModified => "db_modified",
        }
    }
}

/// A media file row, as saved by library source scanners.
#[derive(Debug, Clone, Default)]
pub struct MediaFile {
    /// Database id; 0 means "not yet stored" and selects insert over update.
    pub id: u32,
    pub path: String,
    pub fname: String,
    pub virtual_path: Option<String>,
    pub directory_id: Option<u32>,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Set by the database on insert/update; rows older than a scan's start
    /// time are purged as cruft.
    pub db_timestamp: Option<SystemTime>,
}

/// A stored playlist row.
#[derive(Debug, Clone, Default)]
pub struct PlaylistRecord {
    /// Database id; 0 means "not yet stored".
    pub id: u32,
    pub path: String,
    pub virtual_path: Option<String>,
    pub directory_id: Option<u32>,
    pub title: String,
}

/// One item of the play queue.
#[derive(Debug, Clone, Default)]
pub struct QueueItem {
    pub id: u32,
    pub file_id: u32,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub path: String,
}

/// An RSS feed subscription.
#[derive(Debug, Clone)]
pub struct RssFeed {
    pub name: String,
    pub url: String,
    /// Maximum number of feed items kept in the library.
    pub limit: Option<u32>,
}

/// Interface to the media database.
#[async_trait]
pub trait Database: Send + Sync {
    // ------------------------- media and playlists -------------------------

    /// Inserts a new media file row, returning its id.
    async fn file_add(&self, file: MediaFile) -> DbResult<u32>;

    /// Updates an existing media file row.
    async fn file_update(&self, file: MediaFile) -> DbResult<()>;

    /// Inserts a new playlist row, returning its id.
    async fn playlist_add(&self, playlist: PlaylistRecord) -> DbResult<u32>;

    /// Updates an existing playlist row.
    async fn playlist_update(&self, playlist: PlaylistRecord) -> DbResult<()>;

    // ------------------------------- queue ---------------------------------

    /// Fetches the queue item that refers to `file_id`.
    async fn queue_fetch_by_file_id(&self, file_id: u32) -> DbResult<Option<QueueItem>>;

    /// Appends an item to the play queue, returning its queue id.
    async fn queue_add(&self, item: QueueItem) -> DbResult<u32>;

    /// Empties the play queue.
    async fn queue_clear(&self) -> DbResult<()>;

    /// Drops queue items whose underlying file disappeared.
    async fn queue_cleanup(&self) -> DbResult<()>;

    // ------------------------------- purges --------------------------------

    /// Removes library rows not refreshed since `older_than`.
    async fn purge_cruft(&self, older_than: SystemTime) -> DbResult<()>;

    /// Wipes files, playlists, groups and related tables. RSS feeds go with
    /// them, which is why a full rescan snapshots feeds first.
    async fn purge_all(&self) -> DbResult<()>;

    /// Removes empty artist/album groups.
    async fn groups_cleanup(&self) -> DbResult<()>;

    /// Drops cached artwork whose source row disappeared before `older_than`.
    async fn artwork_purge_cruft(&self, older_than: SystemTime) -> DbResult<()>;

    // -------------------------------- RSS ----------------------------------

    /// Copies the RSS feed table aside, to survive a `purge_all`.
    async fn rss_snapshot(&self) -> DbResult<()>;

    /// Restores the RSS feed table from the last snapshot.
    async fn rss_restore(&self) -> DbResult<()>;

    /// Stores a feed subscription.
    async fn rss_feed_add(&self, feed: RssFeed) -> DbResult<()>;

    /// Removes a feed subscription by URL.
    async fn rss_feed_remove(&self, url: &str) -> DbResult<()>;

    // ----------------------------- maintenance -----------------------------

    /// Writes an admin key-value timestamp (seconds since the epoch).
    async fn admin_set_i64(&self, key: AdminKey, value: i64) -> DbResult<()>;

    /// Runs the post-scan maintenance hook (index refresh and the like).
    async fn hook_post_scan(&self) -> DbResult<()>;
}
