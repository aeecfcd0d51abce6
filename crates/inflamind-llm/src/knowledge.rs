//! Knowledge client — one grounded query in, one settled answer out.
//!
//! Every call resolves to a [`KnowledgeAnswer`]. A missing credential,
//! transport failure or undecodable response is logged and replaced by the
//! configured fallback answer; nothing is propagated to the caller.

use std::collections::HashSet;
use std::time::Instant;

use async_trait::async_trait;
use inflamind_common::Citation;
use inflamind_config::{
    Config, DEFAULT_EMPTY_ANSWER, DEFAULT_FALLBACK_ANSWER, DEFAULT_SYSTEM_INSTRUCTION,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::audit::QueryAuditEntry;
use crate::backend::{
    FailureKind, GeminiBackend, GroundedRequest, GroundedResponse, GroundingChunk, LlmError,
    SearchBackend,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
}

/// Anything that can answer a research query without failing.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    async fn query(&self, text: &str) -> KnowledgeAnswer;
}

pub struct KnowledgeClient<B = GeminiBackend> {
    backend: B,
    api_key: Option<SecretString>,
    system_instruction: String,
    search_grounding: bool,
    empty_answer: String,
    fallback_answer: String,
}

impl KnowledgeClient<GeminiBackend> {
    pub fn from_config(config: &Config) -> Self {
        let api_key = config.gemini.api_key
            .as_ref()
            .map(|k| SecretString::from(k.expose_secret().to_owned()));

        Self::new(GeminiBackend::from_config(&config.gemini), api_key)
            .with_system_instruction(config.assistant.system_instruction.clone())
            .with_search_grounding(config.gemini.search_grounding)
            .with_answers(
                config.assistant.empty_answer.clone(),
                config.assistant.fallback_answer.clone(),
            )
    }
}

impl<B: SearchBackend> KnowledgeClient<B> {
    pub fn new(backend: B, api_key: Option<SecretString>) -> Self {
        Self {
            backend,
            api_key,
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            search_grounding: true,
            empty_answer: DEFAULT_EMPTY_ANSWER.to_string(),
            fallback_answer: DEFAULT_FALLBACK_ANSWER.to_string(),
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = instruction.into();
        self
    }

    pub fn with_search_grounding(mut self, enabled: bool) -> Self {
        self.search_grounding = enabled;
        self
    }

    /// Override the placeholder for empty answers and the failure fallback.
    pub fn with_answers(mut self, empty: impl Into<String>, fallback: impl Into<String>) -> Self {
        self.empty_answer = empty.into();
        self.fallback_answer = fallback.into();
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn fallback(&self) -> KnowledgeAnswer {
        KnowledgeAnswer { answer: self.fallback_answer.clone(), citations: Vec::new() }
    }

    /// Run one query and return the settled answer with its audit record.
    pub async fn query_audited(&self, text: &str) -> (KnowledgeAnswer, QueryAuditEntry) {
        let started = Instant::now();
        let result = self.request(text).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        let model = self.backend.model_id();

        let (answer, failure) = match result {
            Ok(resp) => (self.normalize(resp), None),
            Err(e) => {
                let kind = e.kind();
                match kind {
                    FailureKind::Configuration => tracing::warn!(
                        model, failure = kind.as_str(), "Research query skipped: {}", e
                    ),
                    _ => tracing::error!(
                        model, failure = kind.as_str(), latency_ms, "Gemini API error: {}", e
                    ),
                }
                (self.fallback(), Some(kind))
            }
        };

        let audit = QueryAuditEntry::new(model, failure, &answer, latency_ms);
        tracing::info!(
            audit_id = %audit.id,
            model = %audit.model,
            outcome = ?audit.outcome,
            citations = audit.citation_count,
            latency_ms = audit.latency_ms,
            "Research query settled"
        );
        (answer, audit)
    }

    async fn request(&self, text: &str) -> Result<GroundedResponse, LlmError> {
        // Fail before building anything when there is no key.
        let api_key = self.api_key.as_ref().ok_or(LlmError::MissingCredential)?;

        tracing::debug!(query = text, "Sending grounded research query");
        let req = GroundedRequest {
            system_instruction: self.system_instruction.clone(),
            query: text.to_string(),
            search_grounding: self.search_grounding,
        };
        self.backend.generate(&req, api_key).await
    }

    fn normalize(&self, resp: GroundedResponse) -> KnowledgeAnswer {
        let answer = resp.text
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.empty_answer.clone());
        KnowledgeAnswer {
            answer,
            citations: extract_citations(&resp.grounding_chunks),
        }
    }
}

/// Map grounding chunks to citations, dropping incomplete entries and
/// repeated `(title, url)` pairs. First occurrence wins.
pub fn extract_citations(chunks: &[GroundingChunk]) -> Vec<Citation> {
    let mut seen = HashSet::new();
    chunks
        .iter()
        .filter_map(|chunk| chunk.web.as_ref())
        .filter_map(|web| Citation::new(web.title.as_deref(), web.uri.as_deref()))
        .filter(|c| seen.insert(c.clone()))
        .collect()
}

#[async_trait]
impl<B: SearchBackend> KnowledgeSource for KnowledgeClient<B> {
    async fn query(&self, text: &str) -> KnowledgeAnswer {
        self.query_audited(text).await.0
    }
}
