//! Speech in and out.
//!
//! Both directions are traits so the session pipeline can be driven by real
//! devices and services in the server and by mocks in tests. Each call returns
//! an explicit result; deciding whether a failure is shown, logged or ignored
//! is left to the caller.

pub mod transcribe;
pub mod tts;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use mindflow_native_utils::audio::data_uri;

pub use transcribe::{MicrophoneSpeechInput, WhisperTranscriber};
pub use tts::GoogleTranslateTts;

/// Encoded audio ready to hand to a player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

impl AudioClip {
    pub fn mp3(bytes: Vec<u8>) -> Self {
        Self {
            mime_type: "audio/mpeg",
            bytes,
        }
    }

    /// Base64 `data:` URI for inline browser playback.
    pub fn to_data_uri(&self) -> String {
        data_uri(self.mime_type, &self.bytes)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("there is no text to speak")]
    EmptyText,
    #[error("speech request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("speech service returned {status} for chunk {chunk}")]
    Status { status: u16, chunk: usize },
}

/// Why a capture produced no transcription.
///
/// All variants are recoverable: the session stays where it was and the user
/// may simply try again.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no speech was recognised")]
    NoSpeech,
    #[error("microphone unavailable: {0}")]
    Device(String),
    #[error("transcription failed: {0}")]
    Transcription(String),
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<AudioClip, SpeechError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpeechInput: Send + Sync {
    /// Captures one utterance and returns its transcription.
    async fn listen(&self) -> Result<String, CaptureError>;
}
