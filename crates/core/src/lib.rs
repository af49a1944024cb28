//! Core of the MindFlow PDF tutor.
//!
//! A [`StudyPipeline`](session::StudyPipeline) takes one user's
//! [`StudySession`](session::StudySession) from an uploaded document to a
//! generated question, captures a spoken answer and returns the model's
//! feedback. The language model, microphone and speech synthesis sit behind
//! traits so any frontend (or a test) can supply them.

pub mod completion;
pub mod document;
pub mod prompts;
pub mod session;
pub mod speech;

pub use completion::{CompletionClient, CompletionError, OpenRouterClient};
pub use document::{DocumentContext, MAX_CONTEXT_CHARS, PdfTextSource, TextSource};
pub use session::{
    AnswerOutcome, Notice, NoticeLevel, PipelineError, QuestionOutcome, StudyPipeline,
    StudySession, StudyState,
};
pub use speech::{AudioClip, CaptureError, SpeechError, SpeechInput, SpeechOutput};
