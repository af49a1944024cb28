use crate::document::DocumentContext;

/// Instruction for generating a question from the document.
pub const QUESTION_SYSTEM_PROMPT: &str =
    "You are a teacher. Ask one short question based on the text. No bold formatting.";

/// Instruction for judging the student's spoken answer.
pub const FEEDBACK_SYSTEM_PROMPT: &str =
    "Briefly tell the user if they are correct based on the PDF.";

pub fn question_user_prompt(context: &DocumentContext) -> String {
    format!("Text: {}", context.as_str())
}

pub fn feedback_user_prompt(question: &str, answer: &str) -> String {
    format!("Q: {question}\nAnswer: {answer}")
}
