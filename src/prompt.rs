//! Prompt assembly for the tutor.
//!
//! Two shapes: a *grounded* prompt carrying retrieved course material, and a
//! *general* prompt used when retrieval found nothing. Both are a system
//! message followed by a single user message.

use crate::completion::ChatMessage;
use crate::models::{RetrievalHit, Role, Turn};

pub const SYSTEM_INSTRUCTION: &str = "You are an AI tutor helping a student learn their course material. \
Explain concepts clearly and accurately, adapt to the student's level, and keep answers focused on the question.";

/// Returned in place of a model answer when the completion call fails.
pub const APOLOGY: &str = "I'm sorry, I couldn't generate an answer right now. Please try again in a moment.";

const GROUNDED_INSTRUCTIONS: &str = "Instructions:
- Begin your response by acknowledging that you found relevant information in the student's course materials.
- Clearly distinguish what comes from the course materials from anything you add from general knowledge.
- If the materials only partly answer the question, say so before supplementing them.";

const GENERAL_INSTRUCTIONS: &str = "Instructions:
- Begin your response by acknowledging that no relevant course materials were found for this question.
- If the question is academic, answer it from general knowledge.
- Encourage the student to upload relevant course materials so future answers can be grounded in them.";

/// Render prior turns as `Human:` / `Assistant:` lines.
///
/// A trailing user turn identical to `question` is the current question and
/// is dropped; only the `limit` most recent remaining turns are kept.
pub fn render_history(turns: &[Turn], question: &str, limit: usize) -> Option<String> {
    let mut turns = turns;
    if let Some((last, rest)) = turns.split_last() {
        if last.role == Role::User && last.content.trim() == question.trim() {
            turns = rest;
        }
    }
    let recent = &turns[turns.len().saturating_sub(limit)..];
    if recent.is_empty() {
        return None;
    }

    let lines: Vec<String> = recent
        .iter()
        .map(|turn| match turn.role {
            Role::User => format!("Human: {}", turn.content.trim()),
            Role::Assistant => format!("Assistant: {}", turn.content.trim()),
        })
        .collect();
    Some(lines.join("\n"))
}

fn history_block(turns: &[Turn], question: &str, limit: usize) -> String {
    match render_history(turns, question, limit) {
        Some(history) => format!("Previous conversation:\n{}\n\n", history),
        None => String::new(),
    }
}

pub fn grounded_prompt(
    question: &str,
    hits: &[RetrievalHit],
    turns: &[Turn],
    history_limit: usize,
) -> Vec<ChatMessage> {
    let materials: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
    let user = format!(
        "{}Course materials:\n{}\n\nStudent question: {}\n\n{}",
        history_block(turns, question, history_limit),
        materials.join("\n\n"),
        question.trim(),
        GROUNDED_INSTRUCTIONS
    );
    vec![ChatMessage::system(SYSTEM_INSTRUCTION), ChatMessage::user(user)]
}

pub fn general_prompt(question: &str, turns: &[Turn], history_limit: usize) -> Vec<ChatMessage> {
    let user = format!(
        "{}No course materials matched this question.\n\nStudent question: {}\n\n{}",
        history_block(turns, question, history_limit),
        question.trim(),
        GENERAL_INSTRUCTIONS
    );
    vec![ChatMessage::system(SYSTEM_INSTRUCTION), ChatMessage::user(user)]
}
