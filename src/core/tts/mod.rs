//! Streaming text-to-speech.
//!
//! One short-lived stream per tutor turn: open an ElevenLabs streaming
//! request, forward raw PCM chunks into the turn's audio channel as they
//! arrive, and stop promptly when the turn's cancellation token fires.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const ELEVENLABS_API_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";

/// Requested output encoding: raw PCM 16-bit little-endian, 22050 Hz mono.
const OUTPUT_FORMAT: &str = "pcm_22050";

const MODEL_ID: &str = "eleven_turbo_v2";

/// Soft timeout for opening the stream; retried once.
const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from one synthesis stream.
#[derive(Debug, Error)]
pub enum TtsError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned status {0}")]
    BadStatus(u16),

    #[error("stream open timed out")]
    OpenTimeout,
}

/// Seam between the orchestrator and the synthesis provider.
///
/// Implementations push raw PCM chunks into `audio_tx` as they arrive and
/// return when the stream ends or the token is cancelled. A closed receiver
/// also ends the stream (the session is going away).
#[async_trait]
pub trait SpeechSynth: Send + Sync {
    async fn stream(
        &self,
        text: &str,
        audio_tx: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> Result<(), TtsError>;
}

/// ElevenLabs streaming TTS client.
pub struct ElevenLabsSynth {
    client: reqwest::Client,
    api_key: Option<String>,
    voice_id: String,
}

impl ElevenLabsSynth {
    pub fn new(client: reqwest::Client, api_key: Option<String>, voice_id: String) -> Self {
        Self {
            client,
            api_key,
            voice_id,
        }
    }

    async fn open_stream(&self, api_key: &str, text: &str) -> Result<reqwest::Response, TtsError> {
        let url = format!(
            "{ELEVENLABS_API_URL}/{}/stream?output_format={OUTPUT_FORMAT}",
            self.voice_id
        );
        let body = json!({
            "text": text,
            "model_id": MODEL_ID,
            "voice_settings": { "stability": 0.5, "similarity_boost": 0.75 },
        });

        let request = self
            .client
            .post(&url)
            .header("xi-api-key", api_key)
            .json(&body);

        let response = tokio::time::timeout(OPEN_TIMEOUT, request.send())
            .await
            .map_err(|_| TtsError::OpenTimeout)??;

        let status = response.status();
        if !status.is_success() {
            return Err(TtsError::BadStatus(status.as_u16()));
        }
        Ok(response)
    }
}

#[async_trait]
impl SpeechSynth for ElevenLabsSynth {
    async fn stream(
        &self,
        text: &str,
        audio_tx: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> Result<(), TtsError> {
        let Some(api_key) = self.api_key.as_deref() else {
            debug!("TTS disabled (no API key); turn produces no audio");
            return Ok(());
        };

        // One retry on open failure; a dead provider should not kill the turn
        let response = match self.open_stream(api_key, text).await {
            Ok(response) => response,
            Err(first) => {
                warn!(error = %first, "TTS stream open failed, retrying once");
                self.open_stream(api_key, text).await?
            }
        };

        let mut body = response.bytes_stream();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("TTS stream cancelled mid-turn");
                    break;
                }
                chunk = body.next() => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            if bytes.is_empty() {
                                continue;
                            }
                            if audio_tx.send(bytes).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, "TTS stream aborted mid-body");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }
        Ok(())
    }
}
