//! redline - live grammar highlighting backed by an LLM annotator
//!
//! Text is split into delimited tokens, annotated by a language model, and
//! the flagged tokens are mapped back to character offsets for highlighting.

pub mod checker;
pub mod client;
pub mod config;
pub mod decoder;
pub mod error;
pub mod live;
pub mod llm;
pub mod render;
pub mod server;
pub mod session;
pub mod tokenizer;
