use async_trait::async_trait;
use mindflow_native_utils::capture::{CaptureSettings, capture_utterance};
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{CaptureError, SpeechInput};

pub const DEFAULT_TRANSCRIPTION_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-large-v3-turbo";

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Client for an OpenAI-compatible `/audio/transcriptions` endpoint.
pub struct WhisperTranscriber {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
}

impl WhisperTranscriber {
    pub fn new(base_url: impl Into<String>, api_key: Option<SecretString>, model: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Sends a WAV file for transcription.
    pub async fn transcribe(&self, wav: Vec<u8>) -> Result<String, CaptureError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| CaptureError::Transcription("no transcription API key configured".into()))?;

        let file = Part::bytes(wav)
            .file_name("answer.wav")
            .mime_str("audio/wav")
            .map_err(|e| CaptureError::Transcription(e.to_string()))?;
        let form = Form::new()
            .text("model", self.model.clone())
            .text("response_format", "json")
            .part("file", file);

        let resp = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| CaptureError::Transcription(e.to_string()))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| CaptureError::Transcription(e.to_string()))?;
        parse_transcription(status, &body)
    }
}

/// Extracts the transcript. A blank transcript counts as no speech.
pub fn parse_transcription(status: u16, body: &str) -> Result<String, CaptureError> {
    if !(200..300).contains(&status) {
        return Err(CaptureError::Transcription(format!(
            "endpoint returned {status}: {}",
            body.trim()
        )));
    }

    let parsed: TranscriptionResponse = serde_json::from_str(body)
        .map_err(|e| CaptureError::Transcription(format!("malformed response: {e}")))?;
    let text = parsed.text.trim();
    if text.is_empty() {
        return Err(CaptureError::NoSpeech);
    }
    Ok(text.to_string())
}

/// Microphone capture followed by remote transcription.
pub struct MicrophoneSpeechInput {
    settings: CaptureSettings,
    transcriber: WhisperTranscriber,
}

impl MicrophoneSpeechInput {
    pub fn new(settings: CaptureSettings, transcriber: WhisperTranscriber) -> Self {
        Self {
            settings,
            transcriber,
        }
    }
}

#[async_trait]
impl SpeechInput for MicrophoneSpeechInput {
    async fn listen(&self) -> Result<String, CaptureError> {
        // Fail before making the user talk into a microphone nobody will transcribe.
        if !self.transcriber.is_configured() {
            return Err(CaptureError::Transcription(
                "no transcription API key configured".into(),
            ));
        }

        tracing::info!("Listening...");
        let settings = self.settings.clone();
        // cpal streams are not Send, so the whole capture lives on a blocking thread.
        let utterance = tokio::task::spawn_blocking(move || capture_utterance(&settings))
            .await
            .map_err(|e| CaptureError::Device(format!("capture task failed: {e}")))?
            .map_err(|e| CaptureError::Device(format!("{e:#}")))?
            .ok_or(CaptureError::NoSpeech)?;

        let wav = utterance
            .to_wav()
            .map_err(|e| CaptureError::Device(format!("failed to encode audio: {e:#}")))?;
        let text = self.transcriber.transcribe(wav).await?;
        tracing::info!("You said: {}", text);
        Ok(text)
    }
}
