//! The library coordinator: one worker task, serialized mutations.
//!
//! Scan skeleton, deferred update notifications and mutation dispatch all
//! live here. The worker drains the command queue; the public API on
//! [`Library`] is what request handlers call from any task.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use hmomedia::{
    AdminKey, Database, EventMask, ListenerBus, MediaFile, Player, PlaylistRecord, RssFeed,
};

use crate::commands::{Command, CommandQueue, QueueAdd};
use crate::error::{LibraryError, Result};
use crate::source::{LibrarySource, QueueAddRequest, SourceEntry};

/// After a database change is reported through `update_trigger`, wait this
/// long before notifying listeners of `DATABASE`. Bulk updates (tag editors,
/// file imports) collapse into a single notification. Scans do not use the
/// timer; they flush on completion instead.
const LIBRARY_UPDATE_WAIT: Duration = Duration::from_secs(5);

/// Configuration knobs of the coordinator.
#[derive(Debug, Clone, Copy, Default)]
pub struct LibraryOptions {
    /// File scanners are disabled: scans skip the cruft purge so untouched
    /// rows are not wiped.
    pub filescan_disable: bool,
    /// Keep the play queue across startup instead of clearing it.
    pub clear_queue_on_stop_disable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanKind {
    Init,
    Rescan,
    MetaRescan,
    FullRescan,
}

impl ScanKind {
    /// Whether this scan runs the cruft purge and post-scan hook.
    fn purges(self) -> bool {
        !matches!(self, ScanKind::FullRescan)
    }
}

impl fmt::Display for ScanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanKind::Init => write!(f, "init scan"),
            ScanKind::Rescan => write!(f, "rescan"),
            ScanKind::MetaRescan => write!(f, "meta rescan"),
            ScanKind::FullRescan => write!(f, "full-rescan"),
        }
    }
}

/// Counter and mask of database changes awaiting a listener notification.
#[derive(Default)]
struct DeferredUpdate {
    pending: u32,
    events: EventMask,
    deadline: Option<Instant>,
}

struct Inner {
    queue: CommandQueue,
    scanning: AtomicBool,
    exiting: AtomicBool,
    deferred: Mutex<DeferredUpdate>,
    /// Wakes the worker when the debounce deadline moved.
    debounce_rearmed: Notify,
    worker_id: Mutex<Option<tokio::task::Id>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    sources: Vec<SourceEntry>,
    db: Arc<dyn Database>,
    player: Arc<dyn Player>,
    listeners: Arc<ListenerBus>,
    options: LibraryOptions,
}

/// Handle onto the library coordinator (clonable, shared with request
/// handlers and sources).
#[derive(Clone)]
pub struct Library {
    inner: Arc<Inner>,
}

impl Library {
    /// Initializes the sources and starts the worker task.
    ///
    /// Source `init` / `register_events` failures disable the source but do
    /// not fail library startup. The worker begins with the init scan;
    /// `is_scanning` reports `true` until it completes.
    pub async fn init(
        sources: Vec<Arc<dyn LibrarySource>>,
        db: Arc<dyn Database>,
        player: Arc<dyn Player>,
        listeners: Arc<ListenerBus>,
        options: LibraryOptions,
    ) -> Library {
        let (queue, rx) = CommandQueue::new();
        let inner = Arc::new(Inner {
            queue,
            // the startup scan is already pending
            scanning: AtomicBool::new(true),
            exiting: AtomicBool::new(false),
            deferred: Mutex::new(DeferredUpdate::default()),
            debounce_rearmed: Notify::new(),
            worker_id: Mutex::new(None),
            worker: Mutex::new(None),
            sources: sources.into_iter().map(SourceEntry::new).collect(),
            db,
            player,
            listeners,
            options,
        });
        let library = Library { inner };

        for entry in &library.inner.sources {
            if let Err(err) = entry.source.init().await {
                error!(source = entry.name(), "Library source init failed: {}", err);
                entry.disable();
                continue;
            }
            if let Err(err) = entry.source.register_events(library.clone()).await {
                error!(
                    source = entry.name(),
                    "Library source event registration failed: {}", err
                );
                entry.disable();
            }
            info!(source = entry.name(), "Registered library source");
        }

        let worker = library.clone();
        let handle = tokio::spawn(worker.run(rx));
        *library.inner.worker.lock().unwrap() = Some(handle);

        library
    }

    // ----------------------------- public API ------------------------------

    /// True while a scan (including the startup scan) is running.
    pub fn is_scanning(&self) -> bool {
        self.inner.scanning.load(Ordering::SeqCst)
    }

    /// True once shutdown started.
    pub fn is_exiting(&self) -> bool {
        self.inner.exiting.load(Ordering::SeqCst)
    }

    /// Triggers an incremental rescan. No-op while a scan is running.
    pub fn rescan(&self) {
        self.trigger_scan(Command::Rescan, "rescan");
    }

    /// Triggers a metadata rescan. No-op while a scan is running.
    pub fn metarescan(&self) {
        self.trigger_scan(Command::MetaRescan, "metadata rescan");
    }

    /// Triggers a destructive full rescan. No-op while a scan is running.
    pub fn fullrescan(&self) {
        self.trigger_scan(Command::FullRescan, "full rescan");
    }

    fn trigger_scan(&self, command: Command, what: &str) {
        if self
            .inner
            .scanning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Scan already running, ignoring request to trigger a new {}", what);
            return;
        }
        if self.inner.queue.post(command).is_err() {
            self.inner.scanning.store(false, Ordering::SeqCst);
        }
    }

    /// Adds an item to a stored playlist. Fails fast during a scan.
    pub async fn playlist_item_add(&self, playlist_vp: &str, item_vp: &str) -> Result<()> {
        if self.is_scanning() {
            return Err(LibraryError::ScanInProgress);
        }
        let playlist_vp = playlist_vp.to_string();
        let item_vp = item_vp.to_string();
        self.inner
            .queue
            .post_sync(|done| Command::PlaylistItemAdd {
                playlist_vp,
                item_vp,
                done,
            })
            .await
    }

    /// Removes a stored playlist. Fails fast during a scan.
    pub async fn playlist_remove(&self, vp: &str) -> Result<()> {
        if self.is_scanning() {
            return Err(LibraryError::ScanInProgress);
        }
        let vp = vp.to_string();
        self.inner
            .queue
            .post_sync(|done| Command::PlaylistRemove { vp, done })
            .await
    }

    /// Adds the item(s) at a path to the play queue. Fails fast during a
    /// scan.
    pub async fn queue_item_add(
        &self,
        path: &str,
        position: Option<usize>,
        reshuffle: bool,
        item_id: u32,
    ) -> Result<QueueAdd> {
        if self.is_scanning() {
            return Err(LibraryError::ScanInProgress);
        }
        let request = QueueAddRequest {
            path: path.to_string(),
            position,
            reshuffle,
            item_id,
        };
        self.inner
            .queue
            .post_sync(|done| Command::QueueItemAdd { request, done })
            .await
    }

    /// Saves the play queue as a playlist. Fails fast during a scan.
    pub async fn queue_save(&self, vp: &str) -> Result<()> {
        if self.is_scanning() {
            return Err(LibraryError::ScanInProgress);
        }
        let vp = vp.to_string();
        self.inner
            .queue
            .post_sync(|done| Command::QueueSave { vp, done })
            .await
    }

    /// Subscribes an RSS feed and schedules a rescan to fetch its items.
    pub async fn rss_add(&self, name: &str, url: &str, limit: Option<u32>) -> Result<()> {
        self.inner
            .db
            .rss_feed_add(RssFeed {
                name: name.to_string(),
                url: url.to_string(),
                limit,
            })
            .await?;
        self.rescan();
        Ok(())
    }

    /// Removes an RSS feed subscription and rescans.
    pub async fn rss_remove(&self, url: &str) -> Result<()> {
        self.inner.db.rss_feed_remove(url).await?;
        self.rescan();
        Ok(())
    }

    /// Reports database changes. Within the library worker the handler runs
    /// inline (so changes made during a scan count toward its completion
    /// notification); from any other task the trigger goes through the
    /// command queue.
    pub fn update_trigger(&self, events: EventMask) {
        let worker_id = *self.inner.worker_id.lock().unwrap();
        let on_worker = match (tokio::task::try_id(), worker_id) {
            (Some(current), Some(worker)) => current == worker,
            _ => false,
        };
        if on_worker {
            self.handle_update_trigger(events);
        } else if self
            .inner
            .queue
            .post(Command::UpdateTrigger { events })
            .is_err()
        {
            debug!("Library shutting down, dropping update trigger");
        }
    }

    /// Runs `f` on the library worker, after the commands already queued.
    pub fn exec_async(&self, f: impl FnOnce() + Send + 'static) -> Result<()> {
        self.inner.queue.post(Command::Exec(Box::new(f)))
    }

    /// Stores a media file scanned by a source: insert when the record has
    /// no id yet, update otherwise.
    pub async fn media_save(&self, file: MediaFile) -> Result<u32> {
        if file.path.is_empty() || file.fname.is_empty() {
            error!(
                path = %file.path,
                fname = %file.fname,
                "Ignoring media file with missing values"
            );
            return Err(LibraryError::InvalidRecord("media file without path".into()));
        }
        if file.directory_id.is_none() || file.virtual_path.is_none() {
            // missing virtual_path or directory_id may misplace the file in
            // client browse trees
            warn!(path = %file.path, "Media file with missing virtual path or directory");
        }
        if file.id == 0 {
            Ok(self.inner.db.file_add(file).await?)
        } else {
            let id = file.id;
            self.inner.db.file_update(file).await?;
            Ok(id)
        }
    }

    /// Stores a playlist scanned by a source.
    pub async fn playlist_save(&self, playlist: PlaylistRecord) -> Result<u32> {
        if playlist.path.is_empty() {
            error!("Ignoring playlist file with missing path");
            return Err(LibraryError::InvalidRecord("playlist without path".into()));
        }
        if playlist.directory_id.is_none() || playlist.virtual_path.is_none() {
            warn!(path = %playlist.path, "Playlist with missing virtual path or directory");
        }
        if playlist.id == 0 {
            Ok(self.inner.db.playlist_add(playlist).await?)
        } else {
            let id = playlist.id;
            self.inner.db.playlist_update(playlist).await?;
            Ok(id)
        }
    }

    /// Stops the worker (after the commands already queued), then releases
    /// the sources.
    pub async fn shutdown(&self) {
        self.inner.exiting.store(true, Ordering::SeqCst);
        self.inner.queue.close();
        let handle = self.inner.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.await.is_err() {
                error!("Could not join library worker");
            }
        }
        for entry in &self.inner.sources {
            if !entry.is_disabled() {
                entry.source.deinit().await;
            }
        }
    }

    // ----------------------------- worker side -----------------------------

    async fn run(self, mut rx: mpsc::UnboundedReceiver<Command>) {
        *self.inner.worker_id.lock().unwrap() = tokio::task::try_id();

        self.run_scan(ScanKind::Init).await;

        loop {
            let deadline = self.inner.deferred.lock().unwrap().deadline;
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => self.dispatch(command).await,
                    None => break,
                },
                _ = debounce_wait(deadline) => self.flush_deferred_timer().await,
                _ = self.inner.debounce_rearmed.notified() => {}
            }
        }

        if !self.inner.exiting.load(Ordering::SeqCst) {
            error!("Library command loop terminated ahead of time");
        }
        if let Err(err) = self.inner.db.hook_post_scan().await {
            warn!("Post-scan hook failed during shutdown: {}", err);
        }
        debug!("Library worker stopped");
    }

    async fn dispatch(&self, command: Command) {
        match command {
            Command::Rescan => self.run_scan(ScanKind::Rescan).await,
            Command::MetaRescan => self.run_scan(ScanKind::MetaRescan).await,
            Command::FullRescan => self.run_scan(ScanKind::FullRescan).await,
            Command::PlaylistItemAdd {
                playlist_vp,
                item_vp,
                done,
            } => {
                let _ = done.send(self.playlist_item_add_inner(&playlist_vp, &item_vp).await);
            }
            Command::PlaylistRemove { vp, done } => {
                let _ = done.send(self.playlist_remove_inner(&vp).await);
            }
            Command::QueueItemAdd { request, done } => {
                let _ = done.send(self.queue_item_add_inner(&request).await);
            }
            Command::QueueSave { vp, done } => {
                let _ = done.send(self.queue_save_inner(&vp).await);
            }
            Command::UpdateTrigger { events } => self.handle_update_trigger(events),
            Command::Exec(f) => f(),
        }
    }

    /// The shared scan skeleton.
    async fn run_scan(&self, kind: ScanKind) {
        info!("Library {} triggered", kind);
        self.inner.listeners.notify(EventMask::UPDATE);
        let start = SystemTime::now();
        let started = Instant::now();

        match kind {
            ScanKind::FullRescan => {
                // destructive wipe: RSS subscriptions survive through the
                // snapshot taken before purge_all
                self.inner.player.playback_stop();
                self.log_db("clear queue", self.inner.db.queue_clear().await);
                self.log_db("snapshot RSS feeds", self.inner.db.rss_snapshot().await);
                self.log_db("purge library", self.inner.db.purge_all().await);
                self.log_db("restore RSS feeds", self.inner.db.rss_restore().await);
            }
            ScanKind::Init if !self.inner.options.clear_queue_on_stop_disable => {
                self.log_db("clear queue", self.inner.db.queue_clear().await);
            }
            _ => {}
        }

        for entry in &self.inner.sources {
            if entry.is_disabled() {
                info!(source = entry.name(), "Library source is disabled");
                continue;
            }
            info!(source = entry.name(), "Library {} on source", kind);
            let outcome = match kind {
                ScanKind::Init => entry.source.initscan().await,
                ScanKind::Rescan => entry.source.rescan().await,
                ScanKind::MetaRescan => entry.source.metarescan().await,
                ScanKind::FullRescan => entry.source.fullrescan().await,
            };
            if let Err(err) = outcome {
                error!(source = entry.name(), "Library {} failed: {}", kind, err);
            }
        }

        if kind.purges() && !self.inner.options.filescan_disable {
            self.purge_cruft(start).await;
            debug!("Running post library scan jobs");
            self.log_db("post-scan hook", self.inner.db.hook_post_scan().await);
        }

        let changes = self.inner.deferred.lock().unwrap().pending;
        info!(
            "Library {} completed in {:.0} sec ({} changes)",
            kind,
            started.elapsed().as_secs_f64(),
            changes
        );
        self.inner.scanning.store(false, Ordering::SeqCst);

        if self.flush_deferred_state().await {
            self.inner
                .listeners
                .notify(EventMask::UPDATE | EventMask::DATABASE);
        } else {
            self.inner.listeners.notify(EventMask::UPDATE);
        }
    }

    async fn purge_cruft(&self, start: SystemTime) {
        debug!("Purging old library content");
        self.log_db("purge cruft", self.inner.db.purge_cruft(start).await);
        self.log_db("cleanup groups", self.inner.db.groups_cleanup().await);
        self.log_db("cleanup queue", self.inner.db.queue_cleanup().await);

        debug!("Purging old artwork content");
        self.log_db(
            "purge artwork",
            self.inner.db.artwork_purge_cruft(start).await,
        );
    }

    fn log_db<T>(&self, what: &str, outcome: hmomedia::DbResult<T>) {
        if let Err(err) = outcome {
            error!("Database operation '{}' failed: {}", what, err);
        }
    }

    fn handle_update_trigger(&self, events: EventMask) {
        let mut deferred = self.inner.deferred.lock().unwrap();
        deferred.pending += 1;
        deferred.events |= events;

        // during a scan the completion path notifies; only arm the timer for
        // updates arriving outside one
        if !self.is_scanning() {
            deferred.deadline = Some(Instant::now() + LIBRARY_UPDATE_WAIT);
            drop(deferred);
            self.inner.debounce_rearmed.notify_one();
        }
    }

    /// Flushes counter, mask and deadline; writes the admin timestamps when
    /// there was anything to flush. Returns whether there was.
    async fn flush_deferred_state(&self) -> bool {
        let pending = {
            let mut deferred = self.inner.deferred.lock().unwrap();
            let pending = deferred.pending;
            deferred.pending = 0;
            deferred.events = EventMask::NONE;
            deferred.deadline = None;
            pending
        };
        if pending == 0 {
            return false;
        }

        debug!("Database changed ({} changes)", pending);
        let now = chrono::Utc::now().timestamp();
        self.log_db(
            "set update time",
            self.inner.db.admin_set_i64(AdminKey::DbUpdate, now).await,
        );
        self.log_db(
            "set modified time",
            self.inner.db.admin_set_i64(AdminKey::DbModified, now).await,
        );
        true
    }

    /// The debounce timer fired: emit the accumulated mask.
    async fn flush_deferred_timer(&self) {
        let events = {
            let deferred = self.inner.deferred.lock().unwrap();
            deferred.events
        };
        if self.flush_deferred_state().await && !events.is_empty() {
            self.inner.listeners.notify(events);
        }
    }

    async fn playlist_item_add_inner(&self, playlist_vp: &str, item_vp: &str) -> Result<()> {
        debug!("Adding item '{}' to playlist '{}'", item_vp, playlist_vp);

        let mut result = Err(LibraryError::NotSupported);
        for entry in &self.inner.sources {
            if entry.is_disabled() {
                debug!(source = entry.name(), "Library source is disabled");
                continue;
            }
            match entry.source.playlist_item_add(playlist_vp, item_vp).await {
                Ok(()) => {
                    debug!(
                        source = entry.name(),
                        "Added item '{}' to playlist '{}'", item_vp, playlist_vp
                    );
                    self.inner.listeners.notify(EventMask::STORED_PLAYLIST);
                    return Ok(());
                }
                Err(LibraryError::NotSupported) => {
                    debug!(
                        source = entry.name(),
                        "Library source does not support playlist_item_add"
                    );
                }
                Err(err) => result = Err(err),
            }
        }
        result
    }

    async fn playlist_remove_inner(&self, vp: &str) -> Result<()> {
        debug!("Removing playlist at path '{}'", vp);

        let mut result = Err(LibraryError::NotSupported);
        for entry in &self.inner.sources {
            if entry.is_disabled() {
                debug!(source = entry.name(), "Library source is disabled");
                continue;
            }
            match entry.source.playlist_remove(vp).await {
                Ok(()) => {
                    debug!(source = entry.name(), "Removed playlist '{}'", vp);
                    self.inner.listeners.notify(EventMask::STORED_PLAYLIST);
                    return Ok(());
                }
                Err(LibraryError::NotSupported) => {
                    debug!(
                        source = entry.name(),
                        "Library source does not support playlist_remove"
                    );
                }
                Err(err) => result = Err(err),
            }
        }
        result
    }

    async fn queue_item_add_inner(&self, request: &QueueAddRequest) -> Result<QueueAdd> {
        debug!("Add items for path '{}' to the queue", request.path);

        let mut result = Err(LibraryError::PathInvalid);
        for entry in &self.inner.sources {
            if entry.is_disabled() {
                debug!(source = entry.name(), "Library source is disabled");
                continue;
            }
            match entry.source.queue_item_add(request).await {
                Ok(add) => {
                    debug!(
                        source = entry.name(),
                        "Items for path '{}' added to the queue", request.path
                    );
                    return Ok(add);
                }
                // not this source's path, or not implemented: ask the next one
                Err(LibraryError::PathInvalid) | Err(LibraryError::NotSupported) => continue,
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        if let Err(err) = &result {
            error!(
                "Failed to add items for path '{}' to the queue: {}",
                request.path, err
            );
        }
        result
    }

    async fn queue_save_inner(&self, vp: &str) -> Result<()> {
        debug!("Saving queue to path '{}'", vp);

        let mut result = Err(LibraryError::NotSupported);
        for entry in &self.inner.sources {
            if entry.is_disabled() {
                debug!(source = entry.name(), "Library source is disabled");
                continue;
            }
            match entry.source.queue_save(vp).await {
                Ok(()) => {
                    debug!(source = entry.name(), "Saved queue to '{}'", vp);
                    self.inner.listeners.notify(EventMask::STORED_PLAYLIST);
                    return Ok(());
                }
                Err(LibraryError::NotSupported) => {
                    debug!(
                        source = entry.name(),
                        "Library source does not support queue_save"
                    );
                }
                Err(err) => result = Err(err),
            }
        }
        result
    }
}

async fn debounce_wait(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
