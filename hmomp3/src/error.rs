//! Error types for MP3 encoding.

/// Errors that can occur while setting up or running the MP3 encoder.
#[derive(Debug, thiserror::Error)]
pub enum Mp3EncodeError {
    #[error("unsupported input quality {0}: {1}")]
    Unsupported(String, String),

    #[error("failed to build LAME encoder: {0}")]
    EncoderSetup(String),

    #[error("failed to build resampler: {0}")]
    ResamplerSetup(String),

    #[error("resampling failed: {0}")]
    Resample(String),

    #[error("MP3 encode error: {0}")]
    Encode(String),

    #[error(transparent)]
    Pcm(#[from] hmoaudio::PcmError),
}
