//! Shared application state.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::core::llm::{AnthropicModel, TutorModel};
use crate::core::stt::DeepgramStt;
use crate::core::strokes::{BoardWriter, LatexRenderer, StrokeWriter};
use crate::core::tts::{ElevenLabsSynth, SpeechSynth};

/// Process-wide state handed to every connection: the configuration and the
/// provider clients (behind their trait seams so tests can substitute
/// in-process fakes).
pub struct AppState {
    pub config: ServerConfig,
    pub model: Arc<dyn TutorModel>,
    pub synth: Arc<dyn SpeechSynth>,
    pub writer: Arc<dyn BoardWriter>,
    /// Absent when no STT credentials are configured; sessions then run
    /// voice-output-only with manual transcripts.
    pub stt: Option<Arc<DeepgramStt>>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        // One connection pool for every upstream HTTP call
        let http = reqwest::Client::new();

        let model = Arc::new(AnthropicModel::new(
            http.clone(),
            config.anthropic_api_key.clone(),
            config.llm_model.clone(),
        ));
        let synth = Arc::new(ElevenLabsSynth::new(
            http.clone(),
            config.elevenlabs_api_key.clone(),
            config.elevenlabs_voice_id.clone(),
        ));
        let writer = Arc::new(StrokeWriter::new(LatexRenderer::new(
            http,
            config.latex.clone(),
        )));
        let stt = config
            .deepgram_api_key
            .clone()
            .map(|key| Arc::new(DeepgramStt::new(key)));

        Self {
            config,
            model,
            synth,
            writer,
            stt,
        }
    }
}
