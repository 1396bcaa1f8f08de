//! Moteur de diffusion : producteur non bloquant, tâche pilote, fan-out
//!
//! Côté producteur, le thread du player appelle [`StreamingEngine::write`]
//! avec ses blocs PCM : jamais de blocage, un canal saturé se vide par
//! l'abandon du bloc. Un changement de qualité est annoncé sur un second
//! canal avant le PCM correspondant ; la tâche pilote reconstruit alors
//! l'encodeur avant de consommer la suite.
//!
//! Côté consommateur, une unique tâche pilote draine le PCM, encode en MP3,
//! et diffuse aux sessions. Le timer de silence (1 s) et la lecture du canal
//! audio ne sont armés que lorsqu'au moins une session est enregistrée.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use hmoaudio::{silence_block, MediaQuality, PcmFrame};
use hmomedia::{Database, EventMask, ListenerBus, ListenerId, PlayState, Player, PlayerSnapshot, QueueItem};
use hmomp3::Mp3EncoderContext;

use crate::session::SessionRegistry;

/// Période d'injection de silence quand le player est en pause
const SILENCE_INTERVAL: Duration = Duration::from_secs(1);

/// Taille du bloc de silence, en échantillons par canal
const SILENCE_BLOCK_SAMPLES: usize = 352;

/// Blocs PCM en attente côté pilote avant d'en jeter côté producteur
const AUDIO_CHANNEL_CAPACITY: usize = 64;

/// Annonces de qualité en attente
const QUALITY_CHANNEL_CAPACITY: usize = 8;

/// Échec d'enregistrement d'une session
#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    /// L'encodeur MP3 n'est pas disponible ; requêtes dégradées en 404
    #[error("MP3 encoding is not available")]
    NotSupported,

    /// Le moteur est arrêté ; requêtes dégradées en 503
    #[error("streaming engine is shut down")]
    TornDown,
}

struct EngineInner {
    registry: SessionRegistry,
    /// Collant : l'encodeur n'a pas pu être construit pour la qualité courante
    not_supported: AtomicBool,
    /// Posé par le bus d'événements quand le player signale un changement
    player_changed: AtomicBool,
    /// Timers du pilote armés (vrai ssi au moins une session)
    armed: AtomicBool,
    /// Qualité annoncée côté producteur ; comparée à chaque write()
    declared: Mutex<Option<MediaQuality>>,
    /// Qualité effectivement encodée (None tant qu'aucun encodeur n'existe)
    active_quality: Mutex<Option<MediaQuality>>,
    audio_tx: mpsc::Sender<Bytes>,
    quality_tx: mpsc::Sender<MediaQuality>,
    /// Réveille le pilote quand le registre passe de vide à non-vide
    wake: Notify,
    shutdown: CancellationToken,
    listeners: Arc<ListenerBus>,
    listener_id: ListenerId,
}

/// Poignée du moteur de diffusion (clonable, partagée entre producteur et
/// handlers HTTP)
#[derive(Clone)]
pub struct StreamingEngine {
    inner: Arc<EngineInner>,
    driver: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl StreamingEngine {
    /// Démarre le moteur : crée les canaux, s'abonne aux changements du
    /// player et lance la tâche pilote.
    pub fn start(
        player: Arc<dyn Player>,
        db: Arc<dyn Database>,
        listeners: Arc<ListenerBus>,
        shutdown: CancellationToken,
    ) -> Self {
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_CHANNEL_CAPACITY);
        let (quality_tx, quality_rx) = mpsc::channel(QUALITY_CHANNEL_CAPACITY);

        let inner = Arc::new_cyclic(|weak: &std::sync::Weak<EngineInner>| {
            let weak = weak.clone();
            let listener_id = listeners.add(EventMask::PLAYER, move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.player_changed.store(true, Ordering::Relaxed);
                }
            });
            EngineInner {
                registry: SessionRegistry::new(),
                not_supported: AtomicBool::new(false),
                player_changed: AtomicBool::new(false),
                armed: AtomicBool::new(false),
                declared: Mutex::new(None),
                active_quality: Mutex::new(None),
                audio_tx,
                quality_tx,
                wake: Notify::new(),
                shutdown,
                listeners: listeners.clone(),
                listener_id,
            }
        });

        let driver = Driver {
            inner: inner.clone(),
            audio_rx,
            quality_rx,
            player,
            db,
            encoder: None,
            encoded: BytesMut::new(),
            snapshot: PlayerSnapshot::default(),
            icy_title: None,
        };
        let handle = tokio::spawn(driver.run());

        Self {
            inner,
            driver: Arc::new(Mutex::new(Some(handle))),
        }
    }

    // ------------------------- côté producteur ------------------------------

    /// Pousse un bloc PCM du player vers le moteur. Jamais bloquant.
    ///
    /// Sans session enregistrée le bloc est simplement ignoré (lecture du
    /// compteur sans verrou : au pire une frame perdue pendant un teardown).
    pub fn write(&self, frame: PcmFrame) {
        if self.inner.registry.is_empty() {
            return;
        }

        let mut declared = self.inner.declared.lock().unwrap();
        if *declared != Some(frame.quality) {
            match self.inner.quality_tx.try_send(frame.quality) {
                Ok(()) => *declared = Some(frame.quality),
                Err(TrySendError::Closed(_)) => {
                    debug!("Streaming channel already closed");
                    return;
                }
                Err(TrySendError::Full(_)) => {
                    // sans l'annonce, le PCM serait encodé sous la mauvaise
                    // qualité : on abandonne tout le bloc
                    warn!("Quality channel full, dropping PCM block");
                    return;
                }
            }
        }
        drop(declared);

        match self.inner.audio_tx.try_send(frame.data) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Streaming channel full, skipping write");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Streaming channel already closed");
            }
        }
    }

    // --------------------------- côté sessions ------------------------------

    /// Enregistre un client et retourne la moitié réceptrice de son corps de
    /// réponse.
    pub fn register(&self, icy: bool) -> Result<mpsc::Receiver<Bytes>, RegisterError> {
        if self.inner.not_supported.load(Ordering::Relaxed) {
            return Err(RegisterError::NotSupported);
        }
        let (rx, first) = self
            .inner
            .registry
            .insert(icy)
            .ok_or(RegisterError::TornDown)?;
        if first {
            self.inner.wake.notify_one();
        }
        Ok(rx)
    }

    /// Vrai si l'encodage MP3 est disponible
    pub fn is_supported(&self) -> bool {
        !self.inner.not_supported.load(Ordering::Relaxed)
    }

    pub fn session_count(&self) -> usize {
        self.inner.registry.session_count()
    }

    pub fn icy_count(&self) -> usize {
        self.inner.registry.icy_count()
    }

    /// Vrai si la tâche pilote a armé lecture audio et timer de silence
    pub fn timers_armed(&self) -> bool {
        self.inner.armed.load(Ordering::Relaxed)
    }

    /// Qualité PCM actuellement encodée
    pub fn active_quality(&self) -> Option<MediaQuality> {
        *self.inner.active_quality.lock().unwrap()
    }

    // ----------------------------- fin de vie -------------------------------

    /// Arrêt définitif : congédie les clients, ferme les canaux, libère
    /// l'encodeur et attend la fin de la tâche pilote.
    pub async fn shutdown(&self) {
        self.inner.registry.shutdown();
        self.inner.listeners.remove(self.inner.listener_id);
        self.inner.shutdown.cancel();
        self.inner.wake.notify_one();
        let handle = self.driver.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

// ============================================================================
// Tâche pilote
// ============================================================================

struct Driver {
    inner: Arc<EngineInner>,
    audio_rx: mpsc::Receiver<Bytes>,
    quality_rx: mpsc::Receiver<MediaQuality>,
    player: Arc<dyn Player>,
    db: Arc<dyn Database>,
    encoder: Option<Mp3EncoderContext>,
    /// Tampon partagé des octets MP3 en attente de fan-out
    encoded: BytesMut,
    snapshot: PlayerSnapshot,
    icy_title: Option<String>,
}

impl Driver {
    async fn run(mut self) {
        let mut silence = tokio::time::interval(SILENCE_INTERVAL);
        silence.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            if self.inner.shutdown.is_cancelled() {
                break;
            }

            // timers désarmés tant qu'aucune session n'écoute
            if self.inner.registry.is_empty() {
                self.inner.armed.store(false, Ordering::Relaxed);
                tokio::select! {
                    _ = self.inner.wake.notified() => {
                        silence.reset();
                        continue;
                    }
                    _ = self.inner.shutdown.cancelled() => break,
                }
            }
            self.inner.armed.store(true, Ordering::Relaxed);

            tokio::select! {
                biased;

                _ = self.inner.shutdown.cancelled() => break,

                Some(quality) = self.quality_rx.recv() => {
                    self.quality_change(quality);
                }

                Some(block) = self.audio_rx.recv() => {
                    self.on_audio(block).await;
                }

                _ = silence.tick() => {
                    self.on_silence_tick().await;
                }
            }
        }

        self.inner.armed.store(false, Ordering::Relaxed);
        self.inner.registry.shutdown();
        debug!("Streaming driver stopped");
    }

    /// Le player annonce une nouvelle qualité : l'ancien encodeur est détruit
    /// d'abord, puis un nouveau est construit. En cas d'échec le moteur passe
    /// `not_supported` et congédie toutes les sessions.
    fn quality_change(&mut self, quality: MediaQuality) {
        self.encoder.take();
        *self.inner.active_quality.lock().unwrap() = None;

        match Mp3EncoderContext::new(quality) {
            Ok(ctx) => {
                info!(quality = %quality, "Rebuilt MP3 encoder for new input quality");
                self.encoder = Some(ctx);
                self.inner.not_supported.store(false, Ordering::Relaxed);
                *self.inner.active_quality.lock().unwrap() = Some(quality);
            }
            Err(err) => {
                error!(quality = %quality, "Will not be able to stream MP3: {}", err);
                self.inner.not_supported.store(true, Ordering::Relaxed);
                self.streaming_end();
            }
        }
    }

    /// Un bloc PCM est arrivé : draine tout ce qui attend, encode, diffuse.
    async fn on_audio(&mut self, first: Bytes) {
        if !self.encode_block(first).await {
            return;
        }
        loop {
            // une annonce de qualité en attente prime sur le PCM qui la suit
            if let Ok(quality) = self.quality_rx.try_recv() {
                self.quality_change(quality);
            }
            match self.audio_rx.try_recv() {
                Ok(block) => {
                    if !self.encode_block(block).await {
                        return;
                    }
                }
                Err(_) => break,
            }
        }
        self.fan_out();
    }

    /// Tick du timer de silence : si le player est en pause, un bloc de zéros
    /// maintient le flux vivant.
    async fn on_silence_tick(&mut self) {
        if self.inner.player_changed.swap(false, Ordering::Relaxed) {
            self.refresh_player().await;
        }
        if self.snapshot.state != PlayState::Paused {
            return;
        }
        let Some(quality) = self.encoder.as_ref().map(|e| e.quality()) else {
            return;
        };
        let block = silence_block(&quality, SILENCE_BLOCK_SAMPLES);
        if self.encode(&block) {
            self.fan_out();
        }
    }

    async fn encode_block(&mut self, block: Bytes) -> bool {
        if self.inner.player_changed.swap(false, Ordering::Relaxed) {
            self.refresh_player().await;
        }
        self.encode(&block)
    }

    fn encode(&mut self, pcm: &[u8]) -> bool {
        if self.inner.not_supported.load(Ordering::Relaxed) {
            warn!("Streaming unsupported, dropping PCM block");
            return false;
        }
        let Some(encoder) = self.encoder.as_mut() else {
            warn!("No encoder yet, PCM received before quality announcement");
            return false;
        };
        match encoder.encode(pcm, &mut self.encoded) {
            Ok(_) => true,
            Err(err) => {
                error!("MP3 encoding failed: {}", err);
                false
            }
        }
    }

    /// Diffuse le tampon encodé accumulé à toutes les sessions.
    fn fan_out(&mut self) {
        if self.encoded.is_empty() {
            return;
        }
        let chunk = self.encoded.split().freeze();
        let report = self
            .inner
            .registry
            .fan_out(chunk, self.icy_title.as_deref());
        if report.emptied {
            info!("No more clients, will stop streaming");
        }
    }

    /// Recharge l'instantané du player et, si la piste a changé et que des
    /// clients ICY écoutent, le titre ICY courant.
    async fn refresh_player(&mut self) {
        let previous = self.snapshot;
        self.snapshot = self.player.status();

        if previous.item_id == self.snapshot.item_id || self.inner.registry.icy_count() == 0 {
            return;
        }

        self.icy_title = match self.db.queue_fetch_by_file_id(self.snapshot.item_id).await {
            Ok(Some(item)) => format_icy_title(&item),
            Ok(None) => None,
            Err(err) => {
                warn!(
                    item = self.snapshot.item_id,
                    "Could not fetch queue item for ICY title: {}", err
                );
                None
            }
        };
    }

    /// Congédie toutes les sessions (encodeur indisponible). Le registre
    /// reste ouvert pour d'éventuels clients futurs.
    fn streaming_end(&mut self) {
        self.inner.registry.drain_all();
        self.encoded.clear();
    }
}

/// `"titre - artiste"`, ou celui des deux qui est renseigné
fn format_icy_title(item: &QueueItem) -> Option<String> {
    match (item.title.is_empty(), item.artist.is_empty()) {
        (false, false) => Some(format!("{} - {}", item.title, item.artist)),
        (false, true) => Some(item.title.clone()),
        (true, false) => Some(item.artist.clone()),
        (true, true) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_icy_title() {
        let item = QueueItem {
            title: "Song".into(),
            artist: "Artist".into(),
            ..Default::default()
        };
        assert_eq!(format_icy_title(&item).as_deref(), Some("Song - Artist"));

        let item = QueueItem {
            title: "Song".into(),
            ..Default::default()
        };
        assert_eq!(format_icy_title(&item).as_deref(), Some("Song"));

        let item = QueueItem {
            artist: "Artist".into(),
            ..Default::default()
        };
        assert_eq!(format_icy_title(&item).as_deref(), Some("Artist"));

        assert_eq!(format_icy_title(&QueueItem::default()), None);
    }
}
