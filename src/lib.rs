//! # Course Tutor
//!
//! Retrieval-augmented question answering over course-scoped materials.
//!
//! Uploaded files are extracted, cleaned, chunked, embedded and stored per
//! `(owner, course)` scope. Questions are embedded, matched against that
//! scope's chunks, and answered by a completion model with the retrieved
//! material (or without it, when nothing matched).
//!
//! ## Architecture
//!
//! ```text
//! upload ──▶ extract ──▶ chunk ──▶ embed(batch) ──▶ ┌─────────────┐
//!                                                   │ VectorStore │
//! question ──▶ embed ──▶ search(owner, course) ◀────┤ SQLite+HNSW │
//!                  │                                └─────────────┘
//!                  ▼
//!              answerer ──▶ completion model ──▶ AnswerResult
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! tutor init
//! tutor ingest notes.pdf --owner u1 --course bio101
//! tutor ask "What does photosynthesis do?" --owner u1 --course bio101
//! tutor serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`extract`] | PDF / DOCX / TXT text extraction and cleaning |
//! | [`chunk`] | Overlapping sentence-aware chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`completion`] | Chat completion provider abstraction |
//! | [`blob`] | Object storage for uploaded files |
//! | [`store`] | Scoped vector storage and ANN index |
//! | [`retrieve`] | Query-time retrieval |
//! | [`prompt`] | Prompt assembly |
//! | [`answer`] | Grounded / general answering |
//! | [`ingest`] | Ingestion pipeline |
//! | [`service`] | Public operations |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod answer;
pub mod blob;
pub mod chunk;
pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod prompt;
pub mod retrieve;
pub mod server;
pub mod service;
pub mod store;
