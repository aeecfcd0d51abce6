//! Test doubles and fixtures shared by Inflamind integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use inflamind_common::Citation;
use inflamind_llm::backend::{GroundedResponse, GroundingChunk};
use inflamind_llm::{GroundedRequest, KnowledgeAnswer, KnowledgeSource, LlmError, SearchBackend};
use secrecy::SecretString;
use tokio::sync::{Notify, Semaphore};
use tracing_subscriber::EnvFilter;

/// Install a test-friendly tracing subscriber. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("inflamind=debug,info")),
        )
        .with_test_writer()
        .try_init();
}

pub fn citation(title: &str, url: &str) -> Citation {
    Citation { title: title.to_string(), url: url.to_string() }
}

pub fn answer(text: &str, citations: Vec<Citation>) -> KnowledgeAnswer {
    KnowledgeAnswer { answer: text.to_string(), citations }
}

/// Gemini `generateContent` body with one candidate and the given web chunks.
pub fn gemini_response_json(text: &str, chunks: &[(Option<&str>, Option<&str>)]) -> serde_json::Value {
    let chunks: Vec<serde_json::Value> = chunks
        .iter()
        .map(|(title, uri)| serde_json::json!({ "web": { "title": title, "uri": uri } }))
        .collect();
    serde_json::json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": text }] },
            "groundingMetadata": { "groundingChunks": chunks }
        }]
    })
}

// ── KnowledgeSource doubles ───────────────────────────────────────────────────

/// Answers every query immediately with the same result and records queries.
pub struct StaticSource {
    answer: KnowledgeAnswer,
    queries: Mutex<Vec<String>>,
}

impl StaticSource {
    pub fn new(answer: KnowledgeAnswer) -> Self {
        Self { answer, queries: Mutex::new(Vec::new()) }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl KnowledgeSource for StaticSource {
    async fn query(&self, text: &str) -> KnowledgeAnswer {
        if let Ok(mut q) = self.queries.lock() {
            q.push(text.to_string());
        }
        self.answer.clone()
    }
}

/// Holds each query until the test calls [`GatedSource::release`].
pub struct GatedSource {
    answer: KnowledgeAnswer,
    gate: Semaphore,
    started: Notify,
    calls: AtomicUsize,
}

impl GatedSource {
    pub fn new(answer: KnowledgeAnswer) -> Self {
        Self {
            answer,
            gate: Semaphore::new(0),
            started: Notify::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Resolves once a query has reached the source.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    /// Let one pending (or future) query complete.
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KnowledgeSource for GatedSource {
    async fn query(&self, _text: &str) -> KnowledgeAnswer {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        self.answer.clone()
    }
}

/// A source whose query aborts, for exercising the session safety net.
pub struct PanickingSource;

#[async_trait]
impl KnowledgeSource for PanickingSource {
    async fn query(&self, _text: &str) -> KnowledgeAnswer {
        panic!("knowledge source blew up");
    }
}

// ── SearchBackend doubles ─────────────────────────────────────────────────────

/// Backend that returns a canned response, or an API error status.
pub struct ScriptedBackend {
    reply: Result<GroundedResponse, u16>,
    calls: AtomicUsize,
    requests: Mutex<Vec<GroundedRequest>>,
}

impl ScriptedBackend {
    pub fn answering(text: &str, chunks: &[(Option<&str>, Option<&str>)]) -> Self {
        let grounding_chunks = chunks
            .iter()
            .map(|(title, uri)| GroundingChunk::web(*title, *uri))
            .collect();
        Self::with_reply(Ok(GroundedResponse { text: Some(text.to_string()), grounding_chunks }))
    }

    pub fn failing(status: u16) -> Self {
        Self::with_reply(Err(status))
    }

    fn with_reply(reply: Result<GroundedResponse, u16>) -> Self {
        Self { reply, calls: AtomicUsize::new(0), requests: Mutex::new(Vec::new()) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GroundedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SearchBackend for ScriptedBackend {
    async fn generate(
        &self,
        req: &GroundedRequest,
        _api_key: &SecretString,
    ) -> Result<GroundedResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut r) = self.requests.lock() {
            r.push(req.clone());
        }
        match &self.reply {
            Ok(resp) => Ok(resp.clone()),
            Err(status) => Err(LlmError::ApiError {
                status: *status,
                message: "scripted failure".to_string(),
            }),
        }
    }

    fn model_id(&self) -> &str { "scripted" }
}
