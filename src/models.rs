//! Core data models used throughout the tutor core.
//!
//! These types represent the documents, chunks, retrieval hits, and answers
//! that flow through the ingestion and question-answering pipeline. Every
//! operation receives its `(owner, course)` [`Scope`] explicitly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ExtractError;

/// The closed set of document formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Pdf,
    Docx,
    Doc,
    Txt,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Pdf => "pdf",
            SourceType::Docx => "docx",
            SourceType::Doc => "doc",
            SourceType::Txt => "txt",
        }
    }

    /// Infer the source type from a file name's extension.
    pub fn from_file_name(name: &str) -> Result<Self, ExtractError> {
        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .unwrap_or_default();
        ext.parse()
    }
}

impl FromStr for SourceType {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(SourceType::Pdf),
            "docx" => Ok(SourceType::Docx),
            "doc" => Ok(SourceType::Doc),
            "txt" => Ok(SourceType::Txt),
            other => Err(ExtractError::UnsupportedType(other.to_string())),
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `(owner, course)` pair every stored chunk belongs to.
///
/// Both identifiers are opaque; the core never interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    pub owner: String,
    pub course: String,
}

impl Scope {
    pub fn new(owner: impl Into<String>, course: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            course: course.into(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.course)
    }
}

/// Document-level fields shared by every chunk row of one document.
#[derive(Debug, Clone)]
pub struct DocumentRef {
    pub scope: Scope,
    pub name: String,
    pub source_type: SourceType,
    pub blob_locator: String,
}

/// A chunk ready to be written to the vector store.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub index: i64,
    pub text: String,
    pub vector: Vec<f32>,
    pub metadata: serde_json::Value,
}

/// Summary of one document within a scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentInfo {
    pub name: String,
    pub source_type: SourceType,
    pub blob_locator: String,
    pub chunk_count: i64,
    pub created_at: i64,
}

/// One element of a search result.
///
/// `distance` is the cosine distance `1 - cos(q, v)` in `[0, 2]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalHit {
    pub chunk_id: i64,
    pub chunk_index: i64,
    pub text: String,
    pub distance: f32,
    pub document_name: String,
}

/// Who said a prior conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A prior turn of the conversation, supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The response object returned by the answerer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerResult {
    pub answer: String,
    pub sources: Vec<String>,
    pub confidence: f32,
    pub context_used: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_type_parses_known_tags() {
        assert_eq!("pdf".parse::<SourceType>().unwrap(), SourceType::Pdf);
        assert_eq!("DOCX".parse::<SourceType>().unwrap(), SourceType::Docx);
        assert_eq!(" doc ".parse::<SourceType>().unwrap(), SourceType::Doc);
        assert_eq!("txt".parse::<SourceType>().unwrap(), SourceType::Txt);
    }

    #[test]
    fn source_type_rejects_pptx() {
        let err = "pptx".parse::<SourceType>().unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedType(ref t) if t == "pptx"));
    }

    #[test]
    fn source_type_from_file_name() {
        assert_eq!(
            SourceType::from_file_name("notes.final.PDF").unwrap(),
            SourceType::Pdf
        );
        assert!(SourceType::from_file_name("README").is_err());
    }

    #[test]
    fn turn_serializes_lowercase_role() {
        let json = serde_json::to_value(Turn::assistant("hi")).unwrap();
        assert_eq!(json["role"], "assistant");
    }
}
