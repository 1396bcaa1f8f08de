//! # hmomedia
//!
//! Common abstractions shared by the HMOMusic broadcast and library cores:
//!
//! - **Listener bus**: process-internal event notifications with per-listener
//!   event masks (`PLAYER`, `UPDATE`, `DATABASE`, `STORED_PLAYLIST`).
//! - **Player interface**: the snapshot the broadcast engine reads when the
//!   player signals a change, plus playback stop for destructive rescans.
//! - **Database interface**: queue lookups and maintenance, purges, RSS feed
//!   storage with snapshot/restore, the admin key-value timestamps and the
//!   post-scan hook.
//! - **[`MemoryDatabase`]**: a complete in-memory `Database` used by the
//!   default wiring and by the test suites.
//!
//! The real player, on-disk database and scanners live outside this core and
//! plug in through these traits.

pub mod db;
pub mod listener;
pub mod memory;
pub mod player;

pub use db::{
    AdminKey, Database, DatabaseError, DbResult, MediaFile, PlaylistRecord, QueueItem, RssFeed,
};
pub use listener::{EventMask, ListenerBus, ListenerId};
pub use memory::MemoryDatabase;
pub use player::{PlayState, Player, PlayerSnapshot};
