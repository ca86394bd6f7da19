//! Deepgram streaming STT client.
//!
//! One WebSocket per listening period: microphone frames flow up from the
//! audio queue, transcript and voice-activity events flow back. The client
//! reconnects once after an unexpected upstream drop; a second failure
//! surfaces `SttEvent::Failed` and STT stays down for the session.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AudioQueue, SttError, SttEvent, passes_noise_filter};

const DEEPGRAM_WS_URL: &str = "wss://api.deepgram.com/v1/listen";

/// Backoff before the single reconnect attempt.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// How one upstream connection ended.
enum StreamEnd {
    /// The audio queue was closed (`audio_stop` or session teardown)
    AudioDone,
    /// The upstream went away while audio was still flowing
    Upstream,
}

/// Deepgram Nova-2 streaming client.
pub struct DeepgramStt {
    api_key: String,
}

impl DeepgramStt {
    pub fn new(api_key: String) -> Self {
        Self { api_key }
    }

    /// Streaming URL with the session's codec and VAD hints.
    pub fn build_url(&self) -> String {
        format!(
            "{DEEPGRAM_WS_URL}\
             ?model=nova-2\
             &language=en-US\
             &punctuate=true\
             &smart_format=true\
             &vad_events=true\
             &endpointing=500\
             &interim_results=true\
             &encoding=opus\
             &container=webm"
        )
    }

    /// Run the upstream for one listening period. Returns when the audio
    /// queue closes, the session token fires, or the connection fails twice.
    pub async fn run(
        &self,
        audio: Arc<AudioQueue>,
        events: mpsc::Sender<SttEvent>,
        cancel: CancellationToken,
    ) {
        let mut reconnects = 0u32;
        loop {
            match self.stream_once(&audio, &events, &cancel).await {
                Ok(StreamEnd::AudioDone) => {
                    debug!("STT upstream finished cleanly");
                    return;
                }
                Ok(StreamEnd::Upstream) | Err(_) if cancel.is_cancelled() => return,
                Ok(StreamEnd::Upstream) => {
                    warn!("STT upstream ended unexpectedly");
                }
                Err(err) => {
                    warn!(error = %err, "STT upstream error");
                }
            }

            if reconnects >= 1 {
                let _ = events
                    .send(SttEvent::Failed(
                        "speech recognition is unavailable; continuing without voice input"
                            .to_string(),
                    ))
                    .await;
                return;
            }
            reconnects += 1;
            info!("reconnecting STT upstream in {RECONNECT_BACKOFF:?}");
            // Stale frames would arrive mid-utterance on the new connection
            audio.drain_pending();
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
            }
        }
    }

    async fn stream_once(
        &self,
        audio: &Arc<AudioQueue>,
        events: &mpsc::Sender<SttEvent>,
        cancel: &CancellationToken,
    ) -> Result<StreamEnd, SttError> {
        let url = self.build_url();
        let host = url::Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| SttError::Connect("invalid upstream URL".to_string()))?;

        let request = Request::builder()
            .method("GET")
            .uri(url)
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", generate_key())
            .header("Authorization", format!("Token {}", self.api_key))
            .body(())
            .map_err(|e| SttError::Connect(e.to_string()))?;

        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| SttError::Connect(e.to_string()))?;
        debug!("STT upstream connected");

        let (mut sink, mut stream) = ws.split();

        // Writer half: drain the audio queue into the socket, then signal
        // end-of-stream so Deepgram flushes its final results.
        let writer_audio = audio.clone();
        let writer = tokio::spawn(async move {
            loop {
                match writer_audio.pop().await {
                    Some(frame) => {
                        if sink.send(Message::Binary(frame.to_vec())).await.is_err() {
                            return;
                        }
                    }
                    None => {
                        let _ = sink
                            .send(Message::Text(r#"{"type":"CloseStream"}"#.to_string()))
                            .await;
                        return;
                    }
                }
            }
        });

        // Reader half: surface transcripts and voice activity.
        let end = loop {
            tokio::select! {
                _ = cancel.cancelled() => break StreamEnd::AudioDone,
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        if handle_frame(&text, events).await.is_err() {
                            // Pipeline gone; session is tearing down
                            break StreamEnd::AudioDone;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "STT upstream closed");
                        break end_kind(audio);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        writer.abort();
                        return Err(SttError::WebSocket(err.to_string()));
                    }
                    None => break end_kind(audio),
                }
            }
        };
        writer.abort();
        Ok(end)
    }
}

fn end_kind(audio: &AudioQueue) -> StreamEnd {
    if audio.is_closed() {
        StreamEnd::AudioDone
    } else {
        StreamEnd::Upstream
    }
}

#[derive(Debug, Deserialize)]
struct DgFrame {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    channel: Option<DgChannel>,
    #[serde(default)]
    is_final: bool,
}

#[derive(Debug, Deserialize)]
struct DgChannel {
    #[serde(default)]
    alternatives: Vec<DgAlternative>,
}

#[derive(Debug, Deserialize)]
struct DgAlternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f32,
}

/// Map one upstream text frame to pipeline events. `Err` means the event
/// channel is closed.
async fn handle_frame(text: &str, events: &mpsc::Sender<SttEvent>) -> Result<(), ()> {
    let frame: DgFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            debug!(error = %err, "unparseable STT frame dropped");
            return Ok(());
        }
    };

    match frame.kind.as_str() {
        // Voice detected before any transcript exists — barge-in signal
        "SpeechStarted" => events.send(SttEvent::SpeechStarted).await.map_err(|_| ()),
        "Results" => {
            let Some(alt) = frame
                .channel
                .as_ref()
                .and_then(|c| c.alternatives.first())
            else {
                return Ok(());
            };
            let transcript = alt.transcript.trim();
            if transcript.is_empty() {
                return Ok(());
            }
            if !frame.is_final {
                return events
                    .send(SttEvent::Interim(transcript.to_string()))
                    .await
                    .map_err(|_| ());
            }
            if !passes_noise_filter(transcript, alt.confidence) {
                debug!(
                    transcript,
                    confidence = alt.confidence,
                    "final transcript filtered as noise"
                );
                return Ok(());
            }
            events
                .send(SttEvent::Final(transcript.to_string()))
                .await
                .map_err(|_| ())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::Receiver<SttEvent>) -> Vec<SttEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn speech_started_frames_become_events() {
        let (tx, mut rx) = mpsc::channel(8);
        handle_frame(r#"{"type":"SpeechStarted"}"#, &tx).await.unwrap();
        assert_eq!(drain(&mut rx), vec![SttEvent::SpeechStarted]);
    }

    #[tokio::test]
    async fn final_results_pass_the_noise_gate() {
        let (tx, mut rx) = mpsc::channel(8);
        let frame = r#"{"type":"Results","is_final":true,
            "channel":{"alternatives":[{"transcript":"what is two plus two","confidence":0.94}]}}"#;
        handle_frame(frame, &tx).await.unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![SttEvent::Final("what is two plus two".to_string())]
        );
    }

    #[tokio::test]
    async fn low_confidence_finals_are_dropped() {
        let (tx, mut rx) = mpsc::channel(8);
        let frame = r#"{"type":"Results","is_final":true,
            "channel":{"alternatives":[{"transcript":"what is two plus two","confidence":0.2}]}}"#;
        handle_frame(frame, &tx).await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn interim_results_flow_through_unfiltered() {
        let (tx, mut rx) = mpsc::channel(8);
        let frame = r#"{"type":"Results","is_final":false,
            "channel":{"alternatives":[{"transcript":"what","confidence":0.3}]}}"#;
        handle_frame(frame, &tx).await.unwrap();
        assert_eq!(drain(&mut rx), vec![SttEvent::Interim("what".to_string())]);
    }

    #[tokio::test]
    async fn unknown_and_malformed_frames_are_ignored() {
        let (tx, mut rx) = mpsc::channel(8);
        handle_frame(r#"{"type":"Metadata"}"#, &tx).await.unwrap();
        handle_frame("not json at all", &tx).await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn url_carries_codec_and_vad_hints() {
        let url = DeepgramStt::new("key".to_string()).build_url();
        for param in [
            "model=nova-2",
            "vad_events=true",
            "interim_results=true",
            "encoding=opus",
            "container=webm",
            "endpointing=500",
        ] {
            assert!(url.contains(param), "missing {param} in {url}");
        }
    }
}
