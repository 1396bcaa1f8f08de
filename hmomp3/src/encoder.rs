//! LAME encoder context with input-side resampling.

use bytes::BytesMut;
use mp3lame_encoder::{Builder, FlushNoGap, InterleavedPcm};
use soxr::format::Stereo;
use soxr::params::{QualityRecipe, QualitySpec, RuntimeSpec};
use soxr::Soxr;
use tracing::debug;

use hmoaudio::{pcm_to_stereo_pairs, MediaQuality};

use crate::error::Mp3EncodeError;

/// Fixed output quality of the broadcast stream.
pub const MP3_OUTPUT_QUALITY: MediaQuality = MediaQuality::new(44_100, 16, 2);

/// PCM to MP3 pipeline bound to one input quality.
///
/// Owned exclusively by the broadcast engine; rebuilt whenever the declared
/// input quality changes. Dropping the context releases the LAME encoder.
pub struct Mp3EncoderContext {
    quality: MediaQuality,
    resampler: Option<Soxr<Stereo<f32>>>,
    lame: mp3lame_encoder::Encoder,
}

impl Mp3EncoderContext {
    /// Builds an encoder pipeline for `quality` PCM input.
    ///
    /// Accepts 16/24/32-bit PCM with one or two channels; anything else is
    /// [`Mp3EncodeError::Unsupported`]. Input at a rate other than 44100 Hz
    /// gets a soxr resampler in front of LAME.
    pub fn new(quality: MediaQuality) -> Result<Self, Mp3EncodeError> {
        if quality.bit_depth().is_none() {
            return Err(Mp3EncodeError::Unsupported(
                quality.to_string(),
                format!("{}-bit PCM is not supported", quality.bits_per_sample),
            ));
        }
        if quality.channels == 0 || quality.channels > 2 {
            return Err(Mp3EncodeError::Unsupported(
                quality.to_string(),
                format!("{} channels, encoder takes mono or stereo", quality.channels),
            ));
        }

        let resampler = if quality.sample_rate != MP3_OUTPUT_QUALITY.sample_rate {
            let spec = QualitySpec::new(QualityRecipe::high());
            let soxr = Soxr::<Stereo<f32>>::new_with_params(
                quality.sample_rate as f64,
                MP3_OUTPUT_QUALITY.sample_rate as f64,
                spec,
                RuntimeSpec::default(),
            )
            .map_err(|e| Mp3EncodeError::ResamplerSetup(e.to_string()))?;
            Some(soxr)
        } else {
            None
        };

        let mut builder =
            Builder::new().ok_or_else(|| Mp3EncodeError::EncoderSetup("out of memory".into()))?;
        builder
            .set_num_channels(MP3_OUTPUT_QUALITY.channels)
            .map_err(|e| Mp3EncodeError::EncoderSetup(e.to_string()))?;
        builder
            .set_sample_rate(MP3_OUTPUT_QUALITY.sample_rate)
            .map_err(|e| Mp3EncodeError::EncoderSetup(e.to_string()))?;
        builder
            .set_brate(mp3lame_encoder::Bitrate::Kbps320)
            .map_err(|e| Mp3EncodeError::EncoderSetup(e.to_string()))?;
        builder
            .set_quality(mp3lame_encoder::Quality::Best)
            .map_err(|e| Mp3EncodeError::EncoderSetup(e.to_string()))?;
        let lame = builder
            .build()
            .map_err(|e| Mp3EncodeError::EncoderSetup(e.to_string()))?;

        debug!(quality = %quality, resampled = resampler.is_some(), "MP3 encoder ready");

        Ok(Self {
            quality,
            resampler,
            lame,
        })
    }

    /// The input quality this context was built for.
    pub fn quality(&self) -> MediaQuality {
        self.quality
    }

    /// Encodes one PCM block and appends the produced MP3 bytes to `out`.
    ///
    /// Returns the number of bytes appended. LAME buffers internally, so a
    /// successful call may append nothing until enough samples accumulate
    /// for a full MP3 frame.
    pub fn encode(&mut self, pcm: &[u8], out: &mut BytesMut) -> Result<usize, Mp3EncodeError> {
        let mut pairs = pcm_to_stereo_pairs(pcm, &self.quality)?;

        if let Some(soxr) = &mut self.resampler {
            let ratio =
                MP3_OUTPUT_QUALITY.sample_rate as f64 / self.quality.sample_rate as f64;
            let out_len = ((pairs.len() as f64) * ratio).ceil() as usize;
            let mut resampled = vec![[0.0f32; 2]; out_len];
            let _ = soxr
                .process(&pairs, &mut resampled)
                .map_err(|e| Mp3EncodeError::Resample(e.to_string()))?;
            pairs = resampled;
        }

        if pairs.is_empty() {
            return Ok(0);
        }

        let interleaved: &[f32] = bytemuck::cast_slice(&pairs);

        // LAME worst case: 1.25 x samples + 7200 bytes.
        let estimate = ((pairs.len() as f64) * 1.25 + 7200.0) as usize;
        let mut mp3: Vec<u8> = Vec::with_capacity(estimate);

        let written = self
            .lame
            .encode(InterleavedPcm(interleaved), mp3.spare_capacity_mut())
            .map_err(|e| Mp3EncodeError::Encode(format!("{:?}", e)))?;
        // SAFETY: LAME wrote exactly `written` bytes into the spare capacity.
        unsafe {
            mp3.set_len(written);
        }

        out.extend_from_slice(&mp3);
        Ok(written)
    }

    /// Flushes LAME's internal buffer, appending any pending MP3 frames.
    pub fn flush(&mut self, out: &mut BytesMut) -> Result<usize, Mp3EncodeError> {
        let mut mp3: Vec<u8> = Vec::with_capacity(7200);
        let written = self
            .lame
            .flush::<FlushNoGap>(mp3.spare_capacity_mut())
            .map_err(|e| Mp3EncodeError::Encode(format!("{:?}", e)))?;
        // SAFETY: LAME wrote exactly `written` bytes into the spare capacity.
        unsafe {
            mp3.set_len(written);
        }
        out.extend_from_slice(&mp3);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unsupported_bit_depth() {
        let err = Mp3EncoderContext::new(MediaQuality::new(44_100, 8, 2));
        assert!(matches!(err, Err(Mp3EncodeError::Unsupported(..))));
    }

    #[test]
    fn test_rejects_too_many_channels() {
        let err = Mp3EncoderContext::new(MediaQuality::new(44_100, 16, 6));
        assert!(matches!(err, Err(Mp3EncodeError::Unsupported(..))));
    }

    #[test]
    fn test_encode_produces_mp3_frames() {
        let quality = MediaQuality::new(44_100, 16, 2);
        let mut ctx = Mp3EncoderContext::new(quality).unwrap();
        let mut out = BytesMut::new();

        // 16 KiB of silence, well past LAME's internal buffering.
        let pcm = vec![0u8; 16 * 1024];
        let mut total = ctx.encode(&pcm, &mut out).unwrap();
        total += ctx.flush(&mut out).unwrap();

        assert!(total > 0);
        assert_eq!(out.len(), total);
        // MP3 frame sync: eleven set bits at the start of the stream.
        assert_eq!(out[0], 0xFF);
        assert_eq!(out[1] & 0xE0, 0xE0);
    }

    #[test]
    fn test_encode_resampled_input() {
        let quality = MediaQuality::new(48_000, 16, 2);
        let mut ctx = Mp3EncoderContext::new(quality).unwrap();
        let mut out = BytesMut::new();

        let pcm = vec![0u8; 48_000 * 4]; // one second of silence
        ctx.encode(&pcm, &mut out).unwrap();
        ctx.flush(&mut out).unwrap();
        assert!(!out.is_empty());
    }

    #[test]
    fn test_encode_mono_input() {
        let quality = MediaQuality::new(44_100, 16, 1);
        let mut ctx = Mp3EncoderContext::new(quality).unwrap();
        let mut out = BytesMut::new();

        let pcm = vec![0u8; 44_100 * 2];
        ctx.encode(&pcm, &mut out).unwrap();
        ctx.flush(&mut out).unwrap();
        assert!(!out.is_empty());
    }
}
