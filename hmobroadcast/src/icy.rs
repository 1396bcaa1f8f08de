//! Métadonnées ICY (SHOUTcast)
//!
//! Un bloc ICY est un octet de longueur `n` suivi de `n × 16` octets de
//! charge utile : `StreamTitle='<titre>';` complété de zéros. Il est inséré
//! dans le flux audio tous les [`ICY_METAINT`] octets pour les clients ayant
//! envoyé `Icy-MetaData: 1`.
//!
//! Références : le format historique SHOUTcast,
//! <http://www.smackfu.com/stuff/programming/shoutcast.html>

use bytes::Bytes;

/// Intervalle en octets audio entre deux blocs de métadonnées
pub const ICY_METAINT: usize = 8192;

/// Longueur maximale du titre dans un bloc (255 mots de 16 octets moins
/// l'enrobage `StreamTitle='';`)
pub const ICY_METATITLE_MAX: usize = 4080;

const HEAD: &[u8] = b"StreamTitle='";
const TAIL: &[u8] = b"';";

/// Construit un bloc de métadonnées ICY pour `title`
///
/// Un titre absent ou vide produit le bloc minimal : l'unique octet `0x00`.
///
/// # Exemples
///
/// ```
/// use hmobroadcast::icy_metadata_block;
///
/// let block = icy_metadata_block(Some("Song - Artist"));
/// assert_eq!(block[0], 2); // 2 mots de 16 octets
/// assert_eq!(block.len(), 1 + 2 * 16);
/// assert!(block.starts_with(&[2]));
///
/// assert_eq!(icy_metadata_block(None).as_ref(), &[0u8]);
/// ```
pub fn icy_metadata_block(title: Option<&str>) -> Bytes {
    let title = match title {
        Some(t) if !t.is_empty() => t.as_bytes(),
        _ => return Bytes::from_static(&[0]),
    };

    let mut title_len = title.len().min(ICY_METATITLE_MAX);
    // un octet de longueur, en mots de 16 octets ; l'arrondi laisse toujours
    // au moins un octet nul final
    let mut words = (HEAD.len() + 2 + title_len) / 16 + 1;
    if words > u8::MAX as usize {
        words = u8::MAX as usize;
        title_len = words * 16 - HEAD.len() - TAIL.len();
    }

    let mut block = vec![0u8; 1 + words * 16];
    block[0] = words as u8;
    block[1..1 + HEAD.len()].copy_from_slice(HEAD);
    block[1 + HEAD.len()..1 + HEAD.len() + title_len].copy_from_slice(&title[..title_len]);
    block[1 + HEAD.len() + title_len..1 + HEAD.len() + title_len + TAIL.len()]
        .copy_from_slice(TAIL);

    Bytes::from(block)
}
