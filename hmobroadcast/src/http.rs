//! Point d'entrée HTTP du flux : `GET /stream.mp3`
//!
//! Le corps de réponse est un transfert chunké alimenté par le canal de la
//! session ; les en-têtes reproduisent ceux attendus par les clients
//! SHOUTcast historiques. `Icy-MetaData: 1` dans la requête active
//! l'intercalage des métadonnées.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::engine::{RegisterError, StreamingEngine};
use crate::icy::ICY_METAINT;

/// Identité annoncée dans l'en-tête `Server`
const SERVER_IDENT: &str = concat!("HMOMusic/", env!("CARGO_PKG_VERSION"));

/// Valeur figée de l'en-tête `Expires` (flux jamais cachable)
const EXPIRES: &str = "Mon, 31 Aug 2015 06:00:00 GMT";

/// État partagé des routes de diffusion
#[derive(Clone)]
pub struct StreamingState {
    pub engine: StreamingEngine,
    /// Nom affiché de la bibliothèque (en-tête `icy-name`)
    pub library_name: String,
}

/// Construit le router du flux MP3
///
/// # Exemples
///
/// ```ignore
/// let router = hmobroadcast::stream_router(engine, config.get_library_name());
/// let app = Router::new().merge(router);
/// ```
pub fn stream_router(engine: StreamingEngine, library_name: String) -> Router {
    let state = Arc::new(StreamingState {
        engine,
        library_name,
    });
    Router::new()
        .route("/stream.mp3", get(stream_mp3))
        .with_state(state)
}

async fn stream_mp3(
    State(state): State<Arc<StreamingState>>,
    headers: HeaderMap,
) -> Response {
    if !state.engine.is_supported() {
        warn!("Got MP3 streaming request, but cannot encode to MP3");
        return StatusCode::NOT_FOUND.into_response();
    }

    let wants_icy = headers
        .get("Icy-MetaData")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "1")
        .unwrap_or(false);

    let rx = match state.engine.register(wants_icy) {
        Ok(rx) => rx,
        Err(RegisterError::NotSupported) => {
            warn!("Got MP3 streaming request, but cannot encode to MP3");
            return StatusCode::NOT_FOUND.into_response();
        }
        Err(RegisterError::TornDown) => {
            warn!("Got MP3 streaming request during engine teardown");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    info!(icy = wants_icy, "Beginning mp3 streaming");

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "audio/mpeg")
        .header(header::SERVER, SERVER_IDENT)
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::PRAGMA, "no-cache")
        .header(header::EXPIRES, EXPIRES);

    if wants_icy {
        response = response
            .header("icy-name", state.library_name.as_str())
            .header("icy-metaint", ICY_METAINT.to_string());
    }

    response = response
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            "GET, POST, PUT, DELETE, OPTIONS",
        );

    match response.body(Body::from_stream(stream)) {
        Ok(response) => response,
        Err(err) => {
            warn!("Could not build streaming response: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
