//! inflamind-llm — Grounded search client for the research assistant.
//! `backend` speaks the Gemini wire format; `knowledge` turns a backend call
//! into an always-settled answer with citations.

pub mod backend;
pub mod knowledge;
pub mod audit;

pub use backend::{FailureKind, GeminiBackend, GroundedRequest, LlmError, SearchBackend};
pub use knowledge::{KnowledgeAnswer, KnowledgeClient, KnowledgeSource};
