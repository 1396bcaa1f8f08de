//! # hmomp3
//!
//! Streaming PCM to MP3 encoding for the broadcast engine.
//!
//! The broadcast engine owns exactly one [`Mp3EncoderContext`] at a time,
//! bound to the media quality the player currently produces. When the player
//! switches quality the engine drops the context and builds a new one; the
//! encoder itself is stateless across contexts.
//!
//! The output side is fixed: 44100 Hz, 16-bit, stereo MP3 at 320 kbps.
//! Input at another sample rate is resampled with soxr before it reaches
//! LAME; mono input is duplicated onto both channels so LAME is always
//! configured for stereo.

mod encoder;
mod error;

pub use encoder::{Mp3EncoderContext, MP3_OUTPUT_QUALITY};
pub use error::Mp3EncodeError;
