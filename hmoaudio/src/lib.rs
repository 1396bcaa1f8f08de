//! # hmoaudio
//!
//! Types audio de base pour HMOMusic : description de qualité média
//! (fréquence / profondeur / canaux) et conversion des blocs PCM entiers
//! little-endian vers des échantillons stéréo `f32` normalisés.
//!
//! Ces types circulent entre le player (producteur de PCM) et le moteur de
//! diffusion MP3 (`hmobroadcast`), qui les transmet à l'encodeur (`hmomp3`).

pub mod bit_depth;
pub mod pcm;
pub mod quality;

pub use bit_depth::BitDepth;
pub use pcm::{pcm_to_stereo_pairs, silence_block, PcmError, PcmFrame};
pub use quality::MediaQuality;
