//! The library source abstraction.
//!
//! A source is one backend feeding the library: the local filesystem
//! scanner, a remote service, the RSS feed reader. Scanning methods are
//! mandatory (enforced by the trait); mutation methods are optional and
//! default to [`LibraryError::NotSupported`], which the coordinator treats
//! as "ask the next source".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::commands::QueueAdd;
use crate::error::{LibraryError, Result};

/// Parameters of a queue-add request, passed through to the sources.
#[derive(Debug, Clone)]
pub struct QueueAddRequest {
    /// Path or virtual path of the item(s) to enqueue.
    pub path: String,
    /// Queue position to insert at; `None` appends.
    pub position: Option<usize>,
    /// Reshuffle the queue after adding.
    pub reshuffle: bool,
    /// Queue item id the position is relative to.
    pub item_id: u32,
}

/// One pluggable library backend.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; every method is invoked on the
/// library worker task, never concurrently with itself.
///
/// # Examples
///
/// ```rust,no_run
/// use hmolibrary::{LibrarySource, Result};
///
/// #[derive(Debug)]
/// struct Filescanner;
///
/// #[async_trait::async_trait]
/// impl LibrarySource for Filescanner {
///     fn name(&self) -> &str {
///         "filescanner"
///     }
///
///     async fn initscan(&self) -> Result<()> {
///         // walk the configured directories
///         Ok(())
///     }
///
///     async fn rescan(&self) -> Result<()> {
///         Ok(())
///     }
///
///     async fn metarescan(&self) -> Result<()> {
///         Ok(())
///     }
///
///     async fn fullrescan(&self) -> Result<()> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait LibrarySource: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// One-time initialization. A failure disables the source: it stays in
    /// the registry but every scan skips it.
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Releases source resources at library shutdown.
    async fn deinit(&self) {}

    /// Hands the source a handle onto the coordinator, so it can post
    /// `update_trigger` / `exec_async` when it watches external events
    /// (inotify, remote webhooks, …). A failure disables the source.
    async fn register_events(&self, _library: crate::Library) -> Result<()> {
        Ok(())
    }

    /// Incremental scan run once at startup.
    async fn initscan(&self) -> Result<()>;

    /// Incremental rescan: pick up new, changed and deleted items.
    async fn rescan(&self) -> Result<()>;

    /// Re-read metadata of known items without rescanning the underlying
    /// storage.
    async fn metarescan(&self) -> Result<()>;

    /// Scan everything from scratch after the database was wiped.
    async fn fullrescan(&self) -> Result<()>;

    // --------------------- optional mutation methods ----------------------

    /// Adds the item at `item_vp` to the stored playlist at `playlist_vp`.
    async fn playlist_item_add(&self, _playlist_vp: &str, _item_vp: &str) -> Result<()> {
        Err(LibraryError::NotSupported)
    }

    /// Removes the stored playlist at `vp`.
    async fn playlist_remove(&self, _vp: &str) -> Result<()> {
        Err(LibraryError::NotSupported)
    }

    /// Adds the item(s) at `request.path` to the play queue.
    ///
    /// Returns [`LibraryError::PathInvalid`] when the path does not belong
    /// to this source, so the coordinator can try the next one.
    async fn queue_item_add(&self, _request: &QueueAddRequest) -> Result<QueueAdd> {
        Err(LibraryError::NotSupported)
    }

    /// Saves the current play queue as a playlist at `vp`.
    async fn queue_save(&self, _vp: &str) -> Result<()> {
        Err(LibraryError::NotSupported)
    }
}

/// A registered source plus its runtime `disabled` flag.
pub(crate) struct SourceEntry {
    pub(crate) source: Arc<dyn LibrarySource>,
    disabled: AtomicBool,
}

impl SourceEntry {
    pub(crate) fn new(source: Arc<dyn LibrarySource>) -> Self {
        Self {
            source,
            disabled: AtomicBool::new(false),
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.source.name()
    }

    pub(crate) fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    pub(crate) fn disable(&self) {
        self.disabled.store(true, Ordering::Relaxed);
    }
}
