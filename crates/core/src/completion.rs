use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Model tried first for every completion.
pub const PRIMARY_MODEL: &str = "meta-llama/llama-3.1-8b-instruct:free";

/// Models the backend falls through, in order, when the primary fails.
pub const FALLBACK_MODELS: [&str; 2] = [
    "google/gemini-2.0-flash-exp:free",
    "mistralai/mistral-7b-instruct:free",
];

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("request to the completion endpoint failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("completion endpoint returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("completion endpoint returned no content")]
    Empty,
}

// `CompletionClient` is the only thing the study pipeline knows about the
// language model. The pipeline hands over a system prompt and a user prompt and
// gets back either text to show the user or a `CompletionError` to report.
//
// Keeping the model behind this trait lets the pipeline tests script exact
// replies with `MockCompletionClient`, and lets the HTTP tests plug in small
// hand-written clients, without any network access. Model choice and fallback
// order are an implementation detail of `OpenRouterClient`.

/// Produces one text completion for a system + user prompt pair.
///
/// Implementations must surface every failure as an error; an empty or blank
/// string is never a stand-in for "nothing came back".
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str)
    -> Result<String, CompletionError>;
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: content.to_string(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

/// Chat request body. `models` is OpenRouter's request-level fallback list:
/// the backend tries `model` first and then each entry in order.
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    #[serde(skip_serializing_if = "no_fallbacks")]
    pub models: &'a [String],
    pub messages: Vec<ChatMessage>,
}

fn no_fallbacks(models: &&[String]) -> bool {
    models.is_empty()
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub message: String,
    #[serde(default)]
    pub code: Option<serde_json::Value>,
}

/// OpenRouter chat-completions client with backend-side model fallback.
pub struct OpenRouterClient {
    client: Client,
    base_url: String,
    api_key: SecretString,
    primary_model: String,
    fallback_models: Vec<String>,
}

impl OpenRouterClient {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            client: Client::new(),
            base_url: OPENROUTER_BASE_URL.to_string(),
            api_key,
            primary_model: PRIMARY_MODEL.to_string(),
            fallback_models: FALLBACK_MODELS.iter().map(|m| m.to_string()).collect(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_models(mut self, primary: impl Into<String>, fallbacks: Vec<String>) -> Self {
        self.primary_model = primary.into();
        self.fallback_models = fallbacks;
        self
    }

    pub fn request<'a>(&'a self, system_prompt: &str, user_prompt: &str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.primary_model,
            models: &self.fallback_models,
            messages: vec![ChatMessage::system(system_prompt), ChatMessage::user(user_prompt)],
        }
    }
}

/// Pulls the first choice's text out of a response body.
///
/// The text is returned exactly as sent; callers display it verbatim.
pub fn parse_response(status: u16, body: &str) -> Result<String, CompletionError> {
    let parsed: Result<LlmResponse, _> = serde_json::from_str(body);

    if !(200..300).contains(&status) {
        let message = match parsed {
            Ok(LlmResponse {
                error: Some(err), ..
            }) => err.message,
            _ => body.trim().to_string(),
        };
        return Err(CompletionError::Api { status, message });
    }

    let resp = parsed.map_err(|e| CompletionError::Api {
        status,
        message: format!("malformed completion response: {e}"),
    })?;

    // OpenRouter reports some upstream failures in a 200 body.
    if let Some(err) = resp.error {
        let code = err
            .code
            .as_ref()
            .and_then(|c| c.as_u64())
            .and_then(|c| u16::try_from(c).ok())
            .unwrap_or(status);
        return Err(CompletionError::Api {
            status: code,
            message: err.message,
        });
    }

    if let Some(model) = &resp.model {
        tracing::debug!("Completion served by {}", model);
    }

    resp.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or(CompletionError::Empty)
}

// OpenRouter picks the model: `model` is tried first and the `models` list is
// walked in order when it fails, all within one HTTP request. Whatever comes
// back goes through `parse_response`, so transport, status and body errors all
// end up as a `CompletionError` rather than text.
#[async_trait]
impl CompletionClient for OpenRouterClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, CompletionError> {
        let body = self.request(system_prompt, user_prompt);
        tracing::info!(
            "Requesting completion from {} (fallbacks: {})",
            self.primary_model,
            self.fallback_models.join(", ")
        );

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let text = resp.text().await?;
        tracing::debug!("Completion endpoint answered {}", status);

        let result = parse_response(status, &text);
        if let Err(e) = &result {
            tracing::error!("Completion failed: {}", e);
        }
        result
    }
}
