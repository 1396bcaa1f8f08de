//! The serialized command queue of the library worker.
//!
//! Commands are drained one at a time by the worker task; each completes in
//! a single dispatch. Synchronous commands carry a oneshot the caller awaits,
//! asynchronous ones return as soon as the command is enqueued.

use tokio::sync::{mpsc, oneshot};

use hmomedia::EventMask;

use crate::error::{LibraryError, Result};
use crate::source::QueueAddRequest;

/// Outcome of a queue-add: how many items entered the queue and the id of
/// the first one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueAdd {
    pub count: u32,
    pub new_item_id: u32,
}

/// A closure executed on the library worker.
pub(crate) type BoxedTask = Box<dyn FnOnce() + Send + 'static>;

pub(crate) enum Command {
    Rescan,
    MetaRescan,
    FullRescan,
    PlaylistItemAdd {
        playlist_vp: String,
        item_vp: String,
        done: oneshot::Sender<Result<()>>,
    },
    PlaylistRemove {
        vp: String,
        done: oneshot::Sender<Result<()>>,
    },
    QueueItemAdd {
        request: QueueAddRequest,
        done: oneshot::Sender<Result<QueueAdd>>,
    },
    QueueSave {
        vp: String,
        done: oneshot::Sender<Result<()>>,
    },
    UpdateTrigger {
        events: EventMask,
    },
    Exec(BoxedTask),
}

/// Sending half of the command queue.
///
/// Closing the queue (taking the sender) is how shutdown unblocks the
/// worker's dispatch loop.
pub(crate) struct CommandQueue {
    tx: std::sync::Mutex<Option<mpsc::UnboundedSender<Command>>>,
}

impl CommandQueue {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: std::sync::Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Enqueues a command, reporting `Shutdown` when the queue is closed.
    pub(crate) fn post(&self, command: Command) -> Result<()> {
        let guard = self.tx.lock().unwrap();
        match guard.as_ref() {
            Some(tx) => tx.send(command).map_err(|_| LibraryError::Shutdown),
            None => Err(LibraryError::Shutdown),
        }
    }

    /// Enqueues a synchronous command built around `done`, then awaits the
    /// worker's answer.
    pub(crate) async fn post_sync<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (done, answer) = oneshot::channel();
        self.post(build(done))?;
        answer.await.map_err(|_| LibraryError::Shutdown)?
    }

    /// Closes the queue; the worker's `recv` then drains and returns `None`.
    pub(crate) fn close(&self) {
        self.tx.lock().unwrap().take();
    }
}
