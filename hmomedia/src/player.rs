//! Player collaborator interface.
//!
//! The broadcast engine never talks to the player directly; it re-reads a
//! snapshot when the `PLAYER` event fires on the listener bus, and the
//! library coordinator stops playback before a destructive full rescan.

/// Playback state as the player reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Paused,
    Playing,
}

/// Last observed player state and current track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerSnapshot {
    /// File id of the queue item currently loaded, 0 when none.
    pub item_id: u32,
    pub state: PlayState,
}

impl Default for PlayerSnapshot {
    fn default() -> Self {
        Self {
            item_id: 0,
            state: PlayState::Stopped,
        }
    }
}

/// Interface to the media player.
///
/// Implementations must be cheap and non-blocking: `status` is called from
/// the broadcast driver's hot path.
pub trait Player: Send + Sync {
    /// Current playback snapshot.
    fn status(&self) -> PlayerSnapshot;

    /// Stops playback. Used by the library coordinator before wiping the
    /// database on a full rescan.
    fn playback_stop(&self);
}
