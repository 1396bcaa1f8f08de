//! # hmobroadcast
//!
//! Moteur de diffusion MP3 de HMOMusic : un producteur (le player), un nombre
//! arbitraire de clients HTTP.
//!
//! Le player pousse ses blocs PCM par [`StreamingEngine::write`] sans jamais
//! bloquer ; une tâche pilote unique les encode en MP3 (via `hmomp3`) et
//! diffuse les octets encodés à chaque session enregistrée, en intercalant
//! les métadonnées ICY pour les clients qui les ont demandées. Quand le
//! player est en pause, un timer d'une seconde injecte du silence pour que
//! les clients ne raccrochent pas.
//!
//! ```text
//! player ──write()──► [canal PCM]  ──►  tâche pilote ──► encodeur MP3
//!        ──────────► [canal qualité] ─┘       │
//!                                             ▼
//!                            fan-out vers les sessions (+ ICY)
//! ```

pub mod engine;
pub mod http;
pub mod icy;
pub mod session;

pub use engine::{RegisterError, StreamingEngine};
pub use http::stream_router;
pub use icy::{icy_metadata_block, ICY_METAINT};
pub use session::SessionRegistry;
