use async_trait::async_trait;
use reqwest::Client;

use super::{AudioClip, SpeechError, SpeechOutput};

const TRANSLATE_TTS_URL: &str = "https://translate.google.com/translate_tts";

/// Longest piece of text the translate TTS endpoint accepts in one request.
pub const MAX_CHUNK_CHARS: usize = 100;

/// Text-to-speech through Google Translate's speech endpoint.
///
/// Long text is split into short chunks, each fetched as MP3, and the frames
/// concatenated into a single clip. Nothing touches the filesystem.
pub struct GoogleTranslateTts {
    client: Client,
    endpoint: String,
    language: String,
}

impl GoogleTranslateTts {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: TRANSLATE_TTS_URL.to_string(),
            language: language.into(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn fetch_chunk(
        &self,
        chunk: &str,
        idx: usize,
        total: usize,
    ) -> Result<Vec<u8>, SpeechError> {
        let total_str = total.to_string();
        let idx_str = idx.to_string();
        let len_str = chunk.chars().count().to_string();
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("ie", "UTF-8"),
                ("q", chunk),
                ("tl", self.language.as_str()),
                ("total", total_str.as_str()),
                ("idx", idx_str.as_str()),
                ("textlen", len_str.as_str()),
                ("client", "tw-ob"),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SpeechError::Status {
                status: status.as_u16(),
                chunk: idx,
            });
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

#[async_trait]
impl SpeechOutput for GoogleTranslateTts {
    async fn synthesize(&self, text: &str) -> Result<AudioClip, SpeechError> {
        let chunks = split_for_speech(text, MAX_CHUNK_CHARS);
        if chunks.is_empty() {
            return Err(SpeechError::EmptyText);
        }

        let mut mp3 = Vec::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            mp3.extend(self.fetch_chunk(chunk, idx, chunks.len()).await?);
        }
        tracing::info!(
            "Synthesized {} bytes of speech in {} chunk(s)",
            mp3.len(),
            chunks.len()
        );
        Ok(AudioClip::mp3(mp3))
    }
}

/// Splits text into pieces of at most `max_chars` characters.
///
/// Breaks fall on whitespace; a single word longer than the limit is cut
/// mid-word. Blank input yields no pieces.
pub fn split_for_speech(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();

        if word_len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        let needed = if current.is_empty() {
            word_len
        } else {
            current_len + 1 + word_len
        };
        if needed > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
