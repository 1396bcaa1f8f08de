//! Listener bus: masked event notifications between subsystems.
//!
//! Callbacks are synchronous and must be cheap (set a flag, push to a
//! channel); they run on whatever task calls [`ListenerBus::notify`].

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Bit mask of event kinds a listener subscribes to.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct EventMask(u16);

impl EventMask {
    pub const NONE: EventMask = EventMask(0);
    /// Playback state or current track changed.
    pub const PLAYER: EventMask = EventMask(1 << 0);
    /// A library update (scan) started or finished.
    pub const UPDATE: EventMask = EventMask(1 << 1);
    /// Database contents changed.
    pub const DATABASE: EventMask = EventMask(1 << 2);
    /// A stored playlist was created, modified or removed.
    pub const STORED_PLAYLIST: EventMask = EventMask(1 << 3);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set in `self`.
    pub fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when at least one bit is shared with `other`.
    pub fn intersects(self, other: EventMask) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for EventMask {
    type Output = EventMask;
    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: EventMask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EventMask {
    type Output = EventMask;
    fn bitand(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 & rhs.0)
    }
}

impl fmt::Debug for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(EventMask::PLAYER) {
            names.push("PLAYER");
        }
        if self.contains(EventMask::UPDATE) {
            names.push("UPDATE");
        }
        if self.contains(EventMask::DATABASE) {
            names.push("DATABASE");
        }
        if self.contains(EventMask::STORED_PLAYLIST) {
            names.push("STORED_PLAYLIST");
        }
        if names.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Identifier returned by [`ListenerBus::add`], used for removal.
pub type ListenerId = u64;

type Callback = Arc<dyn Fn(EventMask) + Send + Sync>;

struct Registration {
    id: ListenerId,
    mask: EventMask,
    callback: Callback,
}

/// Registry of event listeners with per-listener masks.
///
/// `notify` delivers to every listener whose mask intersects the notified
/// events, passing only the intersecting bits. Callbacks are invoked outside
/// the registry lock, so a callback may itself add or remove listeners.
#[derive(Default)]
pub struct ListenerBus {
    listeners: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
}

impl ListenerBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for the events in `mask`.
    pub fn add(&self, mask: EventMask, callback: impl Fn(EventMask) + Send + Sync + 'static) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self.listeners.lock().unwrap();
        listeners.push(Registration {
            id,
            mask,
            callback: Arc::new(callback),
        });
        id
    }

    /// Removes a listener; unknown ids are ignored.
    pub fn remove(&self, id: ListenerId) {
        let mut listeners = self.listeners.lock().unwrap();
        listeners.retain(|reg| reg.id != id);
    }

    /// Notifies every listener whose mask intersects `events`.
    pub fn notify(&self, events: EventMask) {
        if events.is_empty() {
            return;
        }
        let matching: Vec<(Callback, EventMask)> = {
            let listeners = self.listeners.lock().unwrap();
            listeners
                .iter()
                .filter(|reg| reg.mask.intersects(events))
                .map(|reg| (reg.callback.clone(), reg.mask & events))
                .collect()
        };
        for (callback, delivered) in matching {
            callback(delivered);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_mask_ops() {
        let m = EventMask::UPDATE | EventMask::DATABASE;
        assert!(m.contains(EventMask::UPDATE));
        assert!(m.contains(EventMask::DATABASE));
        assert!(!m.contains(EventMask::PLAYER));
        assert!(m.intersects(EventMask::DATABASE | EventMask::PLAYER));
        assert_eq!(format!("{:?}", m), "UPDATE|DATABASE");
    }

    #[test]
    fn test_notify_filters_by_mask() {
        let bus = ListenerBus::new();
        let player_hits = Arc::new(AtomicUsize::new(0));
        let db_hits = Arc::new(AtomicUsize::new(0));

        let hits = player_hits.clone();
        bus.add(EventMask::PLAYER, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });
        let hits = db_hits.clone();
        bus.add(EventMask::DATABASE, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });

        bus.notify(EventMask::PLAYER);
        bus.notify(EventMask::UPDATE | EventMask::DATABASE);

        assert_eq!(player_hits.load(Ordering::SeqCst), 1);
        assert_eq!(db_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delivered_mask_is_intersection() {
        let bus = ListenerBus::new();
        let seen = Arc::new(Mutex::new(EventMask::NONE));
        let seen_cb = seen.clone();
        bus.add(EventMask::DATABASE, move |events| {
            *seen_cb.lock().unwrap() = events;
        });

        bus.notify(EventMask::UPDATE | EventMask::DATABASE);
        assert_eq!(*seen.lock().unwrap(), EventMask::DATABASE);
    }

    #[test]
    fn test_remove() {
        let bus = ListenerBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_cb = hits.clone();
        let id = bus.add(EventMask::PLAYER, move |_| {
            hits_cb.fetch_add(1, Ordering::SeqCst);
        });

        bus.notify(EventMask::PLAYER);
        bus.remove(id);
        bus.notify(EventMask::PLAYER);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
