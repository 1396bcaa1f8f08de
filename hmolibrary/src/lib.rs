//! # hmolibrary
//!
//! The library coordinator of HMOMusic.
//!
//! A single worker task owns every mutation of the media library. External
//! callers post commands onto a serialized queue: scan requests are
//! fire-and-forget, mutations of stored playlists and the play queue block
//! the caller until the worker reports back. Scans iterate the registered
//! [`LibrarySource`]s in registration order; database-change notifications
//! are debounced for five seconds so bulk imports collapse into a single
//! `DATABASE` event for the listeners.
//!
//! Library sources (filesystem scanner, remote services, RSS feeds, …) are
//! external plugins implementing [`LibrarySource`]; the coordinator only
//! sequences them.

mod commands;
mod coordinator;
mod error;
mod source;

pub use commands::QueueAdd;
pub use coordinator::{Library, LibraryOptions};
pub use error::{LibraryError, Result};
pub use source::{LibrarySource, QueueAddRequest};
