use std::sync::Arc;

use serde::Serialize;

use crate::completion::{CompletionClient, CompletionError};
use crate::document::DocumentContext;
use crate::prompts;
use crate::speech::{AudioClip, CaptureError, SpeechError, SpeechInput, SpeechOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyState {
    /// No document loaded.
    Idle,
    /// Document loaded, no question asked yet.
    Ready,
    /// A question is pending an answer.
    Asked,
    /// Feedback has been given for the pending question.
    Answered,
}

/// Everything one user's study session remembers between actions.
#[derive(Debug, Clone)]
pub struct StudySession {
    state: StudyState,
    document: Option<DocumentContext>,
    pending_question: Option<String>,
    last_feedback: Option<String>,
}

impl Default for StudySession {
    fn default() -> Self {
        Self::new()
    }
}

impl StudySession {
    pub fn new() -> Self {
        Self {
            state: StudyState::Idle,
            document: None,
            pending_question: None,
            last_feedback: None,
        }
    }

    pub fn state(&self) -> StudyState {
        self.state
    }

    pub fn document(&self) -> Option<&DocumentContext> {
        self.document.as_ref()
    }

    pub fn pending_question(&self) -> Option<&str> {
        self.pending_question.as_deref()
    }

    pub fn last_feedback(&self) -> Option<&str> {
        self.last_feedback.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A message meant for the person using the app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, message)
    }
}

/// Why an action left the session where it was.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Upload a study PDF first!")]
    NoDocument,
    #[error("Click 'Ask Question' first!")]
    NoPendingQuestion,
    #[error("Couldn't hear you. Try again!")]
    CaptureMiss(#[source] CaptureError),
    #[error("API Error: {0}")]
    Completion(#[from] CompletionError),
}

impl PipelineError {
    /// The notice shown to the user for this failure.
    pub fn notice(&self) -> Notice {
        match self {
            PipelineError::NoDocument | PipelineError::NoPendingQuestion => {
                Notice::warning(self.to_string())
            }
            PipelineError::CaptureMiss(CaptureError::NoSpeech) => Notice::warning(self.to_string()),
            PipelineError::CaptureMiss(cause) => {
                Notice::warning(format!("{} ({})", self, cause))
            }
            PipelineError::Completion(_) => Notice::error(self.to_string()),
        }
    }
}

/// Result of a successful "ask question" action.
#[derive(Debug)]
pub struct QuestionOutcome {
    pub question: String,
    /// Spoken question; a failure here does not undo the question.
    pub speech: Result<AudioClip, SpeechError>,
}

/// Result of a successful "answer with voice" action.
#[derive(Debug)]
pub struct AnswerOutcome {
    pub transcript: String,
    pub feedback: String,
    /// Spoken feedback; a failure here does not undo the feedback.
    pub speech: Result<AudioClip, SpeechError>,
}

// `StudyPipeline` owns the rules of a study session: which action is allowed in
// which state and how far the state moves when something fails. It talks to the outside world only through the
// `CompletionClient`, `SpeechInput` and `SpeechOutput` traits, so the same code
// runs behind the axum server and inside the mockall tests below.
//
// State only advances after the model has answered. A failed completion or a
// missed capture leaves the session exactly as it was, and a failed speech
// synthesis is returned next to the text instead of undoing it.

/// Drives a [`StudySession`] through upload, question, answer and feedback.
///
/// The pipeline itself is stateless and shared; all per-user state lives in
/// the session passed to each call.
pub struct StudyPipeline {
    completion: Arc<dyn CompletionClient>,
    speech_in: Arc<dyn SpeechInput>,
    speech_out: Arc<dyn SpeechOutput>,
}

impl StudyPipeline {
    pub fn new(
        completion: Arc<dyn CompletionClient>,
        speech_in: Arc<dyn SpeechInput>,
        speech_out: Arc<dyn SpeechOutput>,
    ) -> Self {
        Self {
            completion,
            speech_in,
            speech_out,
        }
    }

    /// Attaches a freshly extracted document. Always succeeds, even for an
    /// empty context; any previous document and question are discarded.
    pub fn load_document(&self, session: &mut StudySession, context: DocumentContext) {
        tracing::info!(
            "Loading document ({} chars); {:?} -> Ready",
            context.char_count(),
            session.state
        );
        session.document = Some(context);
        session.pending_question = None;
        session.last_feedback = None;
        session.state = StudyState::Ready;
    }

    /// Asks the model for one question about the loaded document.
    ///
    /// On failure the session, including any earlier pending question, is
    /// left untouched.
    pub async fn ask_question(
        &self,
        session: &mut StudySession,
    ) -> Result<QuestionOutcome, PipelineError> {
        let document = session.document.as_ref().ok_or(PipelineError::NoDocument)?;

        let user_prompt = prompts::question_user_prompt(document);
        let question = self
            .completion
            .complete(prompts::QUESTION_SYSTEM_PROMPT, &user_prompt)
            .await?;

        tracing::info!("Question generated; {:?} -> Asked", session.state);
        session.pending_question = Some(question.clone());
        session.last_feedback = None;
        session.state = StudyState::Asked;

        let speech = self.speak(&question).await;
        Ok(QuestionOutcome { question, speech })
    }

    /// Captures a spoken answer to the pending question and asks the model to
    /// judge it.
    ///
    /// Without a pending question the microphone is never opened. A capture
    /// miss or a failed completion leaves the session unchanged.
    pub async fn answer_with_voice(
        &self,
        session: &mut StudySession,
    ) -> Result<AnswerOutcome, PipelineError> {
        let question = session
            .pending_question
            .clone()
            .ok_or(PipelineError::NoPendingQuestion)?;

        let transcript = self.speech_in.listen().await.map_err(|e| {
            tracing::warn!("Speech capture missed: {}", e);
            PipelineError::CaptureMiss(e)
        })?;

        let user_prompt = prompts::feedback_user_prompt(&question, &transcript);
        let feedback = self
            .completion
            .complete(prompts::FEEDBACK_SYSTEM_PROMPT, &user_prompt)
            .await?;

        tracing::info!("Feedback generated; {:?} -> Answered", session.state);
        session.last_feedback = Some(feedback.clone());
        session.state = StudyState::Answered;

        let speech = self.speak(&feedback).await;
        Ok(AnswerOutcome {
            transcript,
            feedback,
            speech,
        })
    }

    async fn speak(&self, text: &str) -> Result<AudioClip, SpeechError> {
        if text.trim().is_empty() {
            return Err(SpeechError::EmptyText);
        }
        let result = self.speech_out.synthesize(text).await;
        if let Err(e) = &result {
            tracing::error!("TTS Error: {}", e);
        }
        result
    }
}
