//! Blocs PCM et conversion vers le format interne de l'encodeur
//!
//! Le player écrit des blocs d'octets PCM entrelacés accompagnés de leur
//! qualité. L'encodeur MP3 consomme des paires stéréo `[f32; 2]` normalisées ;
//! ce module fait la conversion (décodage little-endian, extension de signe
//! pour le 24 bits, duplication du mono sur les deux canaux).

use crate::{BitDepth, MediaQuality};

/// Bloc PCM opaque produit par le player
///
/// La longueur de `data` doit être un multiple entier de la taille de frame
/// impliquée par `quality`.
#[derive(Debug, Clone)]
pub struct PcmFrame {
    pub quality: MediaQuality,
    pub data: bytes::Bytes,
}

impl PcmFrame {
    pub fn new(quality: MediaQuality, data: impl Into<bytes::Bytes>) -> Self {
        Self {
            quality,
            data: data.into(),
        }
    }

    /// Nombre d'échantillons par canal contenus dans le bloc
    pub fn samples(&self) -> usize {
        self.quality.bytes_to_samples(self.data.len())
    }
}

/// Erreurs de décodage PCM
#[derive(Debug, thiserror::Error)]
pub enum PcmError {
    #[error("unsupported bit depth: {0}")]
    UnsupportedBitDepth(u32),

    #[error("unsupported channel count: {0}")]
    UnsupportedChannels(u8),

    #[error("PCM block of {len} bytes is not a whole number of {frame}-byte frames")]
    TruncatedBlock { len: usize, frame: usize },
}

/// Bloc de silence : des frames à zéro pour `samples` échantillons par canal
pub fn silence_block(quality: &MediaQuality, samples: usize) -> Vec<u8> {
    vec![0u8; quality.samples_to_bytes(samples)]
}

/// Décode un bloc PCM entier little-endian en paires stéréo `f32` normalisées
///
/// Un flux mono est dupliqué sur les deux canaux ; au-delà de deux canaux le
/// bloc est refusé (l'encodeur MP3 ne les accepte pas).
pub fn pcm_to_stereo_pairs(data: &[u8], quality: &MediaQuality) -> Result<Vec<[f32; 2]>, PcmError> {
    let depth = quality
        .bit_depth()
        .ok_or(PcmError::UnsupportedBitDepth(quality.bits_per_sample))?;

    if quality.channels == 0 || quality.channels > 2 {
        return Err(PcmError::UnsupportedChannels(quality.channels));
    }

    let frame = quality.frame_bytes();
    if data.len() % frame != 0 {
        return Err(PcmError::TruncatedBlock {
            len: data.len(),
            frame,
        });
    }

    let scale = 1.0 / depth.max_value();
    let samples = data.len() / frame;
    let mut pairs = Vec::with_capacity(samples);

    match quality.channels {
        1 => {
            for raw in data.chunks_exact(depth.bytes()) {
                let s = decode_sample(raw, depth) * scale;
                pairs.push([s, s]);
            }
        }
        _ => {
            for raw in data.chunks_exact(frame) {
                let l = decode_sample(&raw[..depth.bytes()], depth) * scale;
                let r = decode_sample(&raw[depth.bytes()..], depth) * scale;
                pairs.push([l, r]);
            }
        }
    }

    Ok(pairs)
}

/// Décode un échantillon little-endian signé
#[inline(always)]
fn decode_sample(raw: &[u8], depth: BitDepth) -> f32 {
    match depth {
        BitDepth::B16 => i16::from_le_bytes([raw[0], raw[1]]) as f32,
        BitDepth::B24 => {
            // extension de signe : 3 octets placés en poids fort puis >> 8
            let v = i32::from_le_bytes([0, raw[0], raw[1], raw[2]]) >> 8;
            v as f32
        }
        BitDepth::B32 => i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(rate: u32, bits: u32, ch: u8) -> MediaQuality {
        MediaQuality::new(rate, bits, ch)
    }

    #[test]
    fn test_decode_16bit_stereo() {
        // deux frames : (max, min) puis (0, 0x4000)
        let mut data = Vec::new();
        data.extend_from_slice(&i16::MAX.to_le_bytes());
        data.extend_from_slice(&i16::MIN.to_le_bytes());
        data.extend_from_slice(&0i16.to_le_bytes());
        data.extend_from_slice(&0x4000i16.to_le_bytes());

        let pairs = pcm_to_stereo_pairs(&data, &q(44_100, 16, 2)).unwrap();
        assert_eq!(pairs.len(), 2);
        assert!((pairs[0][0] - (32767.0 / 32768.0)).abs() < 1e-6);
        assert!((pairs[0][1] + 1.0).abs() < 1e-6);
        assert_eq!(pairs[1][0], 0.0);
        assert!((pairs[1][1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_decode_24bit_sign_extension() {
        // -1 en 24 bits : 0xFF 0xFF 0xFF
        let data = vec![0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x80];
        let pairs = pcm_to_stereo_pairs(&data, &q(96_000, 24, 2)).unwrap();
        assert_eq!(pairs.len(), 1);
        assert!((pairs[0][0] - (-1.0 / 8_388_608.0)).abs() < 1e-9);
        // 0x800000 interprété signé = -2^23, soit -1.0 pleine échelle
        assert!((pairs[0][1] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_decode_32bit() {
        let mut data = Vec::new();
        data.extend_from_slice(&i32::MIN.to_le_bytes());
        data.extend_from_slice(&(i32::MAX / 2).to_le_bytes());
        let pairs = pcm_to_stereo_pairs(&data, &q(44_100, 32, 2)).unwrap();
        assert!((pairs[0][0] + 1.0).abs() < 1e-6);
        assert!((pairs[0][1] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_mono_duplicated() {
        let mut data = Vec::new();
        data.extend_from_slice(&0x2000i16.to_le_bytes());
        let pairs = pcm_to_stereo_pairs(&data, &q(44_100, 16, 1)).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0][0], pairs[0][1]);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            pcm_to_stereo_pairs(&[0, 0], &q(44_100, 8, 2)),
            Err(PcmError::UnsupportedBitDepth(8))
        ));
        assert!(matches!(
            pcm_to_stereo_pairs(&[0; 24], &q(44_100, 16, 6)),
            Err(PcmError::UnsupportedChannels(6))
        ));
        assert!(matches!(
            pcm_to_stereo_pairs(&[0; 5], &q(44_100, 16, 2)),
            Err(PcmError::TruncatedBlock { .. })
        ));
    }

    #[test]
    fn test_silence_block() {
        let block = silence_block(&q(44_100, 16, 2), 352);
        assert_eq!(block.len(), 1408);
        assert!(block.iter().all(|&b| b == 0));
    }
}
