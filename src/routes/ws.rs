//! Session WebSocket route configuration.

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::ws::ws_handler;
use crate::state::AppState;

/// `GET /ws/{session_id}` — WebSocket upgrade for one tutoring session.
///
/// After upgrade the client sends `session_start`, streams microphone audio
/// with `audio_start`/`audio_data`/`audio_stop`, posts `board_snapshot`s,
/// and may `barge_in`; the server replies with `speech_text`, `audio_chunk`,
/// `strokes`, `board_action`, and `state_update` frames.
pub fn create_ws_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws/{session_id}", get(ws_handler))
        .layer(TraceLayer::new_for_http())
}
