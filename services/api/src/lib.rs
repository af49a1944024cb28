//! HTTP frontend for MindFlow: serves the study page and drives one
//! [`StudySession`](mindflow_core::StudySession) per browser tab.

pub mod config;
pub mod routes;
pub mod sessions;

use std::sync::Arc;

use mindflow_core::speech::{GoogleTranslateTts, MicrophoneSpeechInput, WhisperTranscriber};
use mindflow_core::{OpenRouterClient, PdfTextSource, StudyPipeline};
use mindflow_native_utils::capture::CaptureSettings;

use crate::config::Config;
use crate::routes::AppState;
use crate::sessions::SessionRegistry;

/// Wires the production collaborators from the loaded configuration.
pub fn build_state(config: Config) -> AppState {
    let completion = OpenRouterClient::new(config.openrouter_api_key)
        .with_base_url(config.openrouter_base_url);

    let transcriber = WhisperTranscriber::new(
        config.transcription_base_url,
        config.transcription_api_key,
        config.transcription_model,
    );
    let settings = CaptureSettings {
        max_duration: config.listen_max,
        ..CaptureSettings::default()
    };
    let speech_in = MicrophoneSpeechInput::new(settings, transcriber);
    let speech_out = GoogleTranslateTts::new(config.tts_language);

    AppState {
        pipeline: Arc::new(StudyPipeline::new(
            Arc::new(completion),
            Arc::new(speech_in),
            Arc::new(speech_out),
        )),
        text_source: Arc::new(PdfTextSource),
        sessions: SessionRegistry::with_idle_timeout(config.session_idle_timeout),
    }
}
