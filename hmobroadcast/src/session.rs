//! Registre des sessions de diffusion
//!
//! Chaque client HTTP connecté au flux est une [`StreamingSession`] : un
//! émetteur de chunks vers le corps de réponse, le drapeau ICY figé à la
//! création, et le compteur d'octets audio envoyés depuis le dernier bloc de
//! métadonnées. L'ensemble vit derrière un unique mutex ; le fan-out, les
//! insertions et les retraits sont les seules sections critiques.
//!
//! Le registre survit à un vidage (perte de l'encodeur : les clients sont
//! congédiés mais de nouveaux pourront revenir) ; après [`shutdown`] il est
//! définitivement hors service et toute insertion échoue.
//!
//! [`shutdown`]: SessionRegistry::shutdown

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::icy::{icy_metadata_block, ICY_METAINT};

/// Chunks en attente par client avant de commencer à en jeter
const SESSION_CHANNEL_CAPACITY: usize = 64;

/// Une session de diffusion : un client HTTP
struct StreamingSession {
    id: u64,
    /// Le client a demandé les métadonnées ICY (`Icy-MetaData: 1`)
    icy: bool,
    /// Octets audio envoyés depuis le dernier metablock (modulo ICY_METAINT)
    bytes_sent: usize,
    /// Poignée de réponse : la moitié émettrice du corps HTTP chunké
    tx: mpsc::Sender<Bytes>,
}

/// Bilan d'un fan-out
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Sessions servies
    pub delivered: usize,
    /// Sessions retirées car le client a raccroché
    pub disconnected: usize,
    /// Le registre est devenu vide au cours de ce fan-out
    pub emptied: bool,
}

/// Ensemble des sessions actives derrière un seul verrou
pub struct SessionRegistry {
    /// `None` après arrêt définitif : les callbacks tardifs ne doivent plus
    /// toucher aux sessions
    sessions: Mutex<Option<Vec<StreamingSession>>>,
    count: AtomicUsize,
    icy_count: AtomicUsize,
    next_id: AtomicU64,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(Some(Vec::new())),
            count: AtomicUsize::new(0),
            icy_count: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    /// Nombre de sessions actives (lecture sans verrou)
    pub fn session_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Nombre de sessions ICY actives
    pub fn icy_count(&self) -> usize {
        self.icy_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.session_count() == 0
    }

    /// Enregistre une nouvelle session et retourne la moitié réceptrice de
    /// sa poignée de réponse, plus `true` si elle fait passer le registre de
    /// vide à non-vide (l'appelant arme alors les timers du moteur).
    ///
    /// Retourne `None` après [`SessionRegistry::shutdown`].
    pub fn insert(&self, icy: bool) -> Option<(mpsc::Receiver<Bytes>, bool)> {
        let (tx, rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut guard = self.sessions.lock().unwrap();
        let sessions = guard.as_mut()?;

        let first = sessions.is_empty();
        sessions.push(StreamingSession {
            id,
            icy,
            bytes_sent: 0,
            tx,
        });
        self.count.store(sessions.len(), Ordering::Relaxed);
        if icy {
            self.icy_count.fetch_add(1, Ordering::Relaxed);
        }

        debug!(session = id, icy, "Streaming session registered");
        Some((rx, first))
    }

    /// Diffuse `chunk` à toutes les sessions, en y épissant le bloc ICY pour
    /// celles qui franchissent la frontière des [`ICY_METAINT`] octets.
    ///
    /// Le chunk partagé n'est jamais copié pour les sessions sans ICY : elles
    /// reçoivent des poignées `Bytes` sur le même tampon. Les sessions dont
    /// le client a raccroché (canal fermé) sont retirées au passage.
    pub fn fan_out(&self, chunk: Bytes, icy_title: Option<&str>) -> FanOutReport {
        let len = chunk.len();
        let mut report = FanOutReport::default();
        if len == 0 {
            return report;
        }

        let mut guard = self.sessions.lock().unwrap();
        let Some(sessions) = guard.as_mut() else {
            return report;
        };
        if sessions.is_empty() {
            return report;
        }

        sessions.retain_mut(|session| {
            let payload = if session.icy && session.bytes_sent + len > ICY_METAINT {
                // épissage : audio jusqu'à la frontière, metablock, reste
                let overflow = (session.bytes_sent + len) % ICY_METAINT;
                let block = icy_metadata_block(icy_title);
                let mut spliced = BytesMut::with_capacity(len + block.len());
                spliced.extend_from_slice(&chunk[..len - overflow]);
                spliced.extend_from_slice(&block);
                spliced.extend_from_slice(&chunk[len - overflow..]);
                session.bytes_sent = overflow;
                spliced.freeze()
            } else {
                session.bytes_sent += len;
                chunk.clone()
            };

            match session.tx.try_send(payload) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    // client trop lent : on jette le chunk, pas la session
                    warn!(session = session.id, "Client lagging, dropping chunk");
                    report.delivered += 1;
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    info!(session = session.id, "Client disconnected, closing session");
                    if session.icy {
                        self.icy_count.fetch_sub(1, Ordering::Relaxed);
                    }
                    report.disconnected += 1;
                    false
                }
            }
        });

        let remaining = sessions.len();
        self.count.store(remaining, Ordering::Relaxed);
        report.emptied = remaining == 0 && report.disconnected > 0;
        report
    }

    /// Congédie toutes les sessions (chacune reçoit sa fin de réponse par la
    /// fermeture de son canal). Le registre reste utilisable.
    pub fn drain_all(&self) {
        let drained = {
            let mut guard = self.sessions.lock().unwrap();
            match guard.as_mut() {
                Some(sessions) => std::mem::take(sessions),
                None => return,
            }
        };
        if !drained.is_empty() {
            info!(count = drained.len(), "Force closing all streaming sessions");
        }
        self.count.store(0, Ordering::Relaxed);
        self.icy_count.store(0, Ordering::Relaxed);
        // drop des senders = fin de corps HTTP pour chaque client
    }

    /// Arrêt définitif : vide le registre et refuse toute insertion future.
    pub fn shutdown(&self) {
        let mut guard = self.sessions.lock().unwrap();
        guard.take();
        self.count.store(0, Ordering::Relaxed);
        self.icy_count.store(0, Ordering::Relaxed);
    }
}
