//! Coordinator integration tests: fake sources, in-memory database, paused
//! tokio clock for the debounce timing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use hmolibrary::{
    Library, LibraryError, LibraryOptions, LibrarySource, QueueAdd, QueueAddRequest, Result,
};
use hmomedia::{
    AdminKey, Database, EventMask, ListenerBus, MediaFile, MemoryDatabase, Player, PlayerSnapshot,
    QueueItem,
};

// ---------------------------------------------------------------------------
// fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakePlayer {
    stops: AtomicUsize,
}

impl Player for FakePlayer {
    fn status(&self) -> PlayerSnapshot {
        PlayerSnapshot::default()
    }

    fn playback_stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records which scan methods ran.
struct RecordingSource {
    name: &'static str,
    calls: Arc<Mutex<Vec<String>>>,
    fail_init: bool,
}

impl RecordingSource {
    fn new(name: &'static str) -> (Arc<Self>, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(Self {
                name,
                calls: calls.clone(),
                fail_init: false,
            }),
            calls,
        )
    }

    fn failing_init(name: &'static str) -> (Arc<Self>, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(Self {
                name,
                calls: calls.clone(),
                fail_init: true,
            }),
            calls,
        )
    }

    fn record(&self, what: &str) {
        self.calls.lock().unwrap().push(format!("{}:{}", self.name, what));
    }
}

#[async_trait]
impl LibrarySource for RecordingSource {
    fn name(&self) -> &str {
        self.name
    }

    async fn init(&self) -> Result<()> {
        if self.fail_init {
            return Err(LibraryError::Source("init failed".into()));
        }
        Ok(())
    }

    async fn initscan(&self) -> Result<()> {
        self.record("initscan");
        Ok(())
    }

    async fn rescan(&self) -> Result<()> {
        self.record("rescan");
        Ok(())
    }

    async fn metarescan(&self) -> Result<()> {
        self.record("metarescan");
        Ok(())
    }

    async fn fullrescan(&self) -> Result<()> {
        self.record("fullrescan");
        Ok(())
    }
}

/// Rescan blocks until released, to observe a scan in progress.
struct BlockingSource {
    gate: Arc<Notify>,
    rescans: AtomicUsize,
}

impl BlockingSource {
    fn new() -> (Arc<Self>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        (
            Arc::new(Self {
                gate: gate.clone(),
                rescans: AtomicUsize::new(0),
            }),
            gate,
        )
    }
}

#[async_trait]
impl LibrarySource for BlockingSource {
    fn name(&self) -> &str {
        "blocking"
    }

    async fn initscan(&self) -> Result<()> {
        Ok(())
    }

    async fn rescan(&self) -> Result<()> {
        self.rescans.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        Ok(())
    }

    async fn metarescan(&self) -> Result<()> {
        Ok(())
    }

    async fn fullrescan(&self) -> Result<()> {
        Ok(())
    }
}

/// Writes one file row and reports the change during full rescans, like a
/// real scanner would.
struct SeedingSource {
    db: Arc<MemoryDatabase>,
    library: Mutex<Option<Library>>,
}

impl SeedingSource {
    fn new(db: Arc<MemoryDatabase>) -> Arc<Self> {
        Arc::new(Self {
            db,
            library: Mutex::new(None),
        })
    }
}

#[async_trait]
impl LibrarySource for SeedingSource {
    fn name(&self) -> &str {
        "seeding"
    }

    async fn register_events(&self, library: Library) -> Result<()> {
        *self.library.lock().unwrap() = Some(library);
        Ok(())
    }

    async fn initscan(&self) -> Result<()> {
        Ok(())
    }

    async fn rescan(&self) -> Result<()> {
        Ok(())
    }

    async fn metarescan(&self) -> Result<()> {
        Ok(())
    }

    async fn fullrescan(&self) -> Result<()> {
        self.db
            .file_add(MediaFile {
                path: "/music/rescanned.flac".into(),
                fname: "rescanned.flac".into(),
                ..Default::default()
            })
            .await
            .map_err(LibraryError::Database)?;
        // report the change from within the scan; the completion
        // notification must pick it up
        let library = self.library.lock().unwrap().clone();
        if let Some(library) = library {
            library.update_trigger(EventMask::DATABASE);
        }
        Ok(())
    }
}

/// Queue behavior per source, for the first-success iteration tests.
struct QueueSource {
    name: &'static str,
    outcome: fn(&QueueAddRequest) -> Result<QueueAdd>,
    asked: AtomicBool,
}

impl QueueSource {
    fn new(name: &'static str, outcome: fn(&QueueAddRequest) -> Result<QueueAdd>) -> Arc<Self> {
        Arc::new(Self {
            name,
            outcome,
            asked: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl LibrarySource for QueueSource {
    fn name(&self) -> &str {
        self.name
    }

    async fn initscan(&self) -> Result<()> {
        Ok(())
    }

    async fn rescan(&self) -> Result<()> {
        Ok(())
    }

    async fn metarescan(&self) -> Result<()> {
        Ok(())
    }

    async fn fullrescan(&self) -> Result<()> {
        Ok(())
    }

    async fn queue_item_add(&self, request: &QueueAddRequest) -> Result<QueueAdd> {
        self.asked.store(true, Ordering::SeqCst);
        (self.outcome)(request)
    }

    async fn playlist_item_add(&self, _playlist_vp: &str, _item_vp: &str) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

struct Rig {
    library: Library,
    db: Arc<MemoryDatabase>,
    notifications: Arc<Mutex<Vec<EventMask>>>,
}

async fn rig_with(sources: Vec<Arc<dyn LibrarySource>>, options: LibraryOptions) -> Rig {
    let db = Arc::new(MemoryDatabase::new());
    let player = Arc::new(FakePlayer::default());
    let bus = Arc::new(ListenerBus::new());

    let notifications = Arc::new(Mutex::new(Vec::new()));
    let sink = notifications.clone();
    bus.add(
        EventMask::UPDATE | EventMask::DATABASE | EventMask::STORED_PLAYLIST,
        move |events| sink.lock().unwrap().push(events),
    );

    let library = Library::init(sources, db.clone(), player, bus, options).await;
    Rig {
        library,
        db,
        notifications,
    }
}

async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

fn taken(notifications: &Arc<Mutex<Vec<EventMask>>>) -> Vec<EventMask> {
    std::mem::take(&mut *notifications.lock().unwrap())
}

// ---------------------------------------------------------------------------
// scans
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_initscan_runs_at_startup() {
    let (source, calls) = RecordingSource::new("files");
    let rig = rig_with(vec![source], LibraryOptions::default()).await;

    assert!(rig.library.is_scanning());
    settle().await;
    assert!(!rig.library.is_scanning());

    assert_eq!(calls.lock().unwrap().as_slice(), ["files:initscan"]);
    // one UPDATE when the scan starts, one when it completes
    assert_eq!(
        taken(&rig.notifications),
        vec![EventMask::UPDATE, EventMask::UPDATE]
    );
    // the startup scan purges and runs the post-scan jobs
    assert!(rig.db.post_scan_hook_count() >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_source_is_skipped() {
    let (bad, bad_calls) = RecordingSource::failing_init("bad");
    let (good, good_calls) = RecordingSource::new("good");
    let rig = rig_with(vec![bad, good], LibraryOptions::default()).await;
    settle().await;

    rig.library.rescan();
    settle().await;

    assert!(bad_calls.lock().unwrap().is_empty());
    assert_eq!(
        good_calls.lock().unwrap().as_slice(),
        ["good:initscan", "good:rescan"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_scans_are_exclusive() {
    let (blocking, gate) = BlockingSource::new();
    let (recording, calls) = RecordingSource::new("other");
    let rig = rig_with(vec![blocking.clone(), recording], LibraryOptions::default()).await;
    settle().await;

    rig.library.rescan();
    settle().await;
    assert!(rig.library.is_scanning());

    // a second trigger while scanning is a no-op
    rig.library.rescan();
    rig.library.metarescan();
    rig.library.fullrescan();
    settle().await;

    gate.notify_one();
    settle().await;
    assert!(!rig.library.is_scanning());

    assert_eq!(blocking.rescans.load(Ordering::SeqCst), 1);
    let calls = calls.lock().unwrap();
    assert_eq!(
        calls
            .iter()
            .filter(|c| c.ends_with(":rescan"))
            .count(),
        1
    );
    assert!(!calls.iter().any(|c| c.ends_with(":metarescan")));
}

#[tokio::test(start_paused = true)]
async fn test_mutations_rejected_while_scanning() {
    let (blocking, gate) = BlockingSource::new();
    let rig = rig_with(vec![blocking], LibraryOptions::default()).await;
    settle().await;

    rig.library.rescan();
    settle().await;
    assert!(rig.library.is_scanning());

    assert!(matches!(
        rig.library.playlist_item_add("/pl", "/item").await,
        Err(LibraryError::ScanInProgress)
    ));
    assert!(matches!(
        rig.library.playlist_remove("/pl").await,
        Err(LibraryError::ScanInProgress)
    ));
    assert!(matches!(
        rig.library.queue_item_add("/x", None, false, 0).await,
        Err(LibraryError::ScanInProgress)
    ));
    assert!(matches!(
        rig.library.queue_save("/pl").await,
        Err(LibraryError::ScanInProgress)
    ));

    gate.notify_one();
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn test_fullrescan_preserves_rss_and_clears_queue() {
    let db = Arc::new(MemoryDatabase::new());
    let player = Arc::new(FakePlayer::default());
    let bus = Arc::new(ListenerBus::new());
    let notifications = Arc::new(Mutex::new(Vec::new()));
    let sink = notifications.clone();
    bus.add(EventMask::UPDATE | EventMask::DATABASE, move |events| {
        sink.lock().unwrap().push(events)
    });

    let source = SeedingSource::new(db.clone());
    let library = Library::init(
        vec![source],
        db.clone(),
        player.clone(),
        bus.clone(),
        LibraryOptions::default(),
    )
    .await;
    settle().await;

    // seed after the startup scan: three files, two feeds, one queue item
    for i in 0..3 {
        db.file_add(MediaFile {
            path: format!("/music/{i}.flac"),
            fname: format!("{i}.flac"),
            ..Default::default()
        })
        .await
        .unwrap();
    }
    for url in ["http://a/rss", "http://b/rss"] {
        db.rss_feed_add(hmomedia::RssFeed {
            name: url.into(),
            url: url.into(),
            limit: None,
        })
        .await
        .unwrap();
    }
    db.queue_add(QueueItem::default()).await.unwrap();
    let _ = taken(&notifications);

    library.fullrescan();
    settle().await;

    assert_eq!(player.stops.load(Ordering::SeqCst), 1);
    assert_eq!(db.queue_len(), 0, "full rescan empties the play queue");
    assert_eq!(
        db.file_paths(),
        vec!["/music/rescanned.flac".to_string()],
        "old file rows wiped, scanner repopulated"
    );
    assert_eq!(db.rss_feeds().len(), 2, "RSS feeds survive the wipe");

    let notified = taken(&notifications);
    assert_eq!(
        notified,
        vec![EventMask::UPDATE, EventMask::UPDATE | EventMask::DATABASE],
        "exactly one UPDATE|DATABASE at completion"
    );

    // the deferred state was flushed by the scan: no trailing notification
    tokio::time::sleep(Duration::from_secs(8)).await;
    settle().await;
    assert!(taken(&notifications).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_filescan_disable_skips_purge() {
    let (source, _calls) = RecordingSource::new("files");
    let rig = rig_with(
        vec![source],
        LibraryOptions {
            filescan_disable: true,
            ..Default::default()
        },
    )
    .await;

    // a stale row would be purged by the startup scan otherwise
    rig.db
        .file_add(MediaFile {
            path: "/music/stale.flac".into(),
            fname: "stale.flac".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    rig.library.rescan();
    settle().await;

    assert_eq!(rig.db.file_count(), 1, "no purge with filescan_disable");
}

// ---------------------------------------------------------------------------
// deferred update notifications
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_update_trigger_debounce_coalesces() {
    let (source, _calls) = RecordingSource::new("files");
    let rig = rig_with(vec![source], LibraryOptions::default()).await;
    settle().await;
    let _ = taken(&rig.notifications);

    // ten triggers over two seconds
    for _ in 0..10 {
        rig.library.update_trigger(EventMask::DATABASE);
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    settle().await;

    // four seconds after the last trigger: still quiet
    tokio::time::sleep(Duration::from_secs(4)).await;
    settle().await;
    assert!(taken(&rig.notifications).is_empty());

    // past the five-second window: exactly one coalesced notification
    tokio::time::sleep(Duration::from_millis(1200)).await;
    settle().await;
    assert_eq!(taken(&rig.notifications), vec![EventMask::DATABASE]);

    // the flush wrote the admin timestamps
    assert!(rig.db.admin_get_i64(AdminKey::DbUpdate).is_some());
    assert!(rig.db.admin_get_i64(AdminKey::DbModified).is_some());

    // nothing left pending
    tokio::time::sleep(Duration::from_secs(10)).await;
    settle().await;
    assert!(taken(&rig.notifications).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_update_trigger_mask_is_union() {
    let (source, _calls) = RecordingSource::new("files");
    let rig = rig_with(vec![source], LibraryOptions::default()).await;
    settle().await;
    let _ = taken(&rig.notifications);

    rig.library.update_trigger(EventMask::DATABASE);
    rig.library.update_trigger(EventMask::STORED_PLAYLIST);
    tokio::time::sleep(Duration::from_secs(6)).await;
    settle().await;

    assert_eq!(
        taken(&rig.notifications),
        vec![EventMask::DATABASE | EventMask::STORED_PLAYLIST]
    );
}

// ---------------------------------------------------------------------------
// mutations
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_queue_item_add_tries_next_source_on_path_invalid() {
    let first = QueueSource::new("first", |_| Err(LibraryError::PathInvalid));
    let second = QueueSource::new("second", |_| {
        Ok(QueueAdd {
            count: 2,
            new_item_id: 42,
        })
    });
    let rig = rig_with(
        vec![first.clone(), second.clone()],
        LibraryOptions::default(),
    )
    .await;
    settle().await;

    let added = rig
        .library
        .queue_item_add("/radio/stream", None, false, 0)
        .await
        .unwrap();
    assert_eq!(
        added,
        QueueAdd {
            count: 2,
            new_item_id: 42
        }
    );
    assert!(first.asked.load(Ordering::SeqCst));
    assert!(second.asked.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_queue_item_add_stops_on_fatal_error() {
    let first = QueueSource::new("first", |_| Err(LibraryError::Source("backend down".into())));
    let second = QueueSource::new("second", |_| {
        Ok(QueueAdd {
            count: 1,
            new_item_id: 1,
        })
    });
    let rig = rig_with(
        vec![first.clone(), second.clone()],
        LibraryOptions::default(),
    )
    .await;
    settle().await;

    let result = rig.library.queue_item_add("/x", None, false, 0).await;
    assert!(matches!(result, Err(LibraryError::Source(_))));
    assert!(
        !second.asked.load(Ordering::SeqCst),
        "a fatal error must not fall through to the next source"
    );
}

#[tokio::test(start_paused = true)]
async fn test_playlist_add_notifies_stored_playlist() {
    let source = QueueSource::new("pl", |_| Err(LibraryError::PathInvalid));
    let rig = rig_with(vec![source], LibraryOptions::default()).await;
    settle().await;
    let _ = taken(&rig.notifications);

    rig.library
        .playlist_item_add("/playlists/mine", "/music/a.flac")
        .await
        .unwrap();
    settle().await;

    assert_eq!(taken(&rig.notifications), vec![EventMask::STORED_PLAYLIST]);
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_mutation_reports_not_supported() {
    let (source, _calls) = RecordingSource::new("files");
    let rig = rig_with(vec![source], LibraryOptions::default()).await;
    settle().await;

    assert!(matches!(
        rig.library.queue_save("/pl").await,
        Err(LibraryError::NotSupported)
    ));
}

// ---------------------------------------------------------------------------
// lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_shutdown_rejects_further_commands() {
    let (source, _calls) = RecordingSource::new("files");
    let rig = rig_with(vec![source], LibraryOptions::default()).await;
    settle().await;

    rig.library.shutdown().await;
    assert!(rig.library.is_exiting());
    assert!(matches!(
        rig.library.playlist_remove("/pl").await,
        Err(LibraryError::Shutdown)
    ));
    assert!(rig.library.exec_async(|| {}).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_rss_add_stores_feed_and_rescans() {
    let (source, calls) = RecordingSource::new("rss");
    let rig = rig_with(vec![source], LibraryOptions::default()).await;
    settle().await;

    rig.library
        .rss_add("My Cast", "http://example.com/rss", Some(10))
        .await
        .unwrap();
    settle().await;

    assert_eq!(rig.db.rss_feeds().len(), 1);
    assert!(calls
        .lock()
        .unwrap()
        .iter()
        .any(|c| c.ends_with(":rescan")));
}
