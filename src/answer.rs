//! Conversational answering over retrieved course material.
//!
//! A query ends in one of three shapes:
//!
//! | Outcome | Retrieval | Completion | `confidence` | `sources` | `context_used` |
//! |---------|-----------|------------|--------------|-----------|----------------|
//! | grounded | ≥ 1 hit | ok | mean(1 − distance) | distinct hit documents | hits |
//! | no matching material | no hits | ok | 0.5 | empty | 0 |
//! | completion failed | any | failed | 0 | empty | hits |
//!
//! Only an embedding failure on the query is surfaced as an error.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::completion::{ChatMessage, CompletionModel, CompletionParams};
use crate::config::Config;
use crate::error::{CompletionError, Result};
use crate::models::{AnswerResult, RetrievalHit, Scope, Turn};
use crate::prompt::{general_prompt, grounded_prompt, APOLOGY};
use crate::retrieve::Retriever;

/// Confidence reported when no course material matched.
pub const GENERAL_CONFIDENCE: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct AnswerOptions {
    pub top_k: usize,
    pub history_turns: usize,
    pub params: CompletionParams,
    pub deadline: Duration,
}

impl Default for AnswerOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            history_turns: 10,
            params: CompletionParams::default(),
            deadline: Duration::from_secs(60),
        }
    }
}

impl AnswerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            history_turns: config.retrieval.history_turns,
            params: CompletionParams::from(&config.completion),
            deadline: Duration::from_secs(config.completion.timeout_secs.max(1)),
        }
    }
}

pub struct Answerer {
    retriever: Retriever,
    completion: Arc<dyn CompletionModel>,
    options: AnswerOptions,
}

impl Answerer {
    pub fn new(
        retriever: Retriever,
        completion: Arc<dyn CompletionModel>,
        options: AnswerOptions,
    ) -> Self {
        Self {
            retriever,
            completion,
            options,
        }
    }

    pub async fn answer(
        &self,
        scope: &Scope,
        question: &str,
        prior_turns: &[Turn],
    ) -> Result<AnswerResult> {
        let hits = self
            .retriever
            .retrieve(question, scope, self.options.top_k)
            .await?;

        let messages = if hits.is_empty() {
            general_prompt(question, prior_turns, self.options.history_turns)
        } else {
            grounded_prompt(question, &hits, prior_turns, self.options.history_turns)
        };

        match self.complete(&messages).await {
            Ok(answer) => {
                let result = if hits.is_empty() {
                    AnswerResult {
                        answer,
                        sources: Vec::new(),
                        confidence: GENERAL_CONFIDENCE,
                        context_used: 0,
                    }
                } else {
                    AnswerResult {
                        answer,
                        sources: distinct_sources(&hits),
                        confidence: confidence(&hits),
                        context_used: hits.len(),
                    }
                };
                info!(
                    owner = %scope.owner,
                    course = %scope.course,
                    hits = hits.len(),
                    confidence = result.confidence,
                    "answered question"
                );
                Ok(result)
            }
            Err(e) => {
                error!(
                    owner = %scope.owner,
                    course = %scope.course,
                    model = self.completion.model_name(),
                    error = %e,
                    "completion failed; returning apology"
                );
                Ok(AnswerResult {
                    answer: APOLOGY.to_string(),
                    sources: Vec::new(),
                    confidence: 0.0,
                    context_used: hits.len(),
                })
            }
        }
    }

    async fn complete(&self, messages: &[ChatMessage]) -> std::result::Result<String, CompletionError> {
        let call = self.completion.complete(messages, self.options.params);
        match tokio::time::timeout(self.options.deadline, call).await {
            Ok(result) => result,
            Err(_) => Err(CompletionError::Timeout(self.options.deadline.as_secs())),
        }
    }
}

/// Mean of `1 - distance` over the hits, clamped to `[0, 1]`.
pub fn confidence(hits: &[RetrievalHit]) -> f32 {
    if hits.is_empty() {
        return 0.0;
    }
    let sum: f32 = hits.iter().map(|h| 1.0 - h.distance).sum();
    let mean = sum / hits.len() as f32;
    if mean.is_nan() {
        return 0.0;
    }
    mean.clamp(0.0, 1.0)
}

/// Document names of the hits, first occurrence order, without repeats.
pub fn distinct_sources(hits: &[RetrievalHit]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for hit in hits {
        if !sources.contains(&hit.document_name) {
            sources.push(hit.document_name.clone());
        }
    }
    sources
}
