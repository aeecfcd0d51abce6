//! Research session — the transcript plus a single in-flight flag.
//!
//! State lives in a `tokio::sync::watch` channel so readers can subscribe to
//! `{transcript, busy}` while the session mutates it. Acceptance of a query
//! (busy check, user message, busy = true) is one atomic channel update.

use std::sync::Arc;

use inflamind_common::Message;
use inflamind_config::AssistantConfig;
use inflamind_llm::KnowledgeSource;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Appended when the knowledge call aborts instead of settling.
pub const SAFETY_NET_ANSWER: &str = "發生未預期的錯誤，請稍後再試。";

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub transcript: Vec<Message>,
    pub busy: bool,
    pub draft: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Query was empty after trimming.
    Blank,
    /// Another query is still in flight.
    Busy,
    /// Suggestion index out of range.
    UnknownSuggestion,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The query was accepted; carries the assistant message that settled it.
    Answered(Message),
    Rejected(Rejection),
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Answered(_))
    }
}

pub struct ResearchSession {
    source: Arc<dyn KnowledgeSource>,
    state: Arc<watch::Sender<SessionSnapshot>>,
    suggestions: Vec<String>,
}

impl ResearchSession {
    /// Start a session whose transcript holds only `welcome`.
    pub fn new(source: Arc<dyn KnowledgeSource>, welcome: impl Into<String>) -> Self {
        let (state, _) = watch::channel(SessionSnapshot {
            transcript: vec![Message::assistant(welcome, Vec::new())],
            busy: false,
            draft: String::new(),
        });
        Self { source, state: Arc::new(state), suggestions: Vec::new() }
    }

    pub fn from_config(source: Arc<dyn KnowledgeSource>, config: &AssistantConfig) -> Self {
        Self::new(source, config.welcome_message.clone())
            .with_suggestions(config.suggested_queries.clone())
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn transcript(&self) -> Vec<Message> {
        self.state.borrow().transcript.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.state.borrow().busy
    }

    pub fn draft(&self) -> String {
        self.state.borrow().draft.clone()
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        let text = text.into();
        self.state.send_modify(|s| s.draft = text);
    }

    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    /// Submit whatever is currently in the draft.
    pub async fn submit_draft(&self) -> SubmitOutcome {
        let draft = self.draft();
        self.submit(&draft).await
    }

    pub async fn submit_suggestion(&self, index: usize) -> SubmitOutcome {
        match self.suggestions.get(index) {
            Some(query) => self.submit(query).await,
            None => SubmitOutcome::Rejected(Rejection::UnknownSuggestion),
        }
    }

    /// Ask the knowledge source one question.
    ///
    /// Blank queries and queries arriving while another is in flight are
    /// rejected without touching state. An accepted query always ends with
    /// exactly one assistant message and `busy == false`, even if the caller
    /// stops awaiting this future.
    pub async fn submit(&self, query: &str) -> SubmitOutcome {
        let text = query.trim();
        if text.is_empty() {
            debug!("Ignoring blank research query");
            return SubmitOutcome::Rejected(Rejection::Blank);
        }

        let mut accepted = false;
        self.state.send_if_modified(|s| {
            if s.busy {
                return false;
            }
            s.transcript.push(Message::user(text));
            s.draft.clear();
            s.busy = true;
            accepted = true;
            true
        });
        if !accepted {
            debug!("Research query rejected: request already in flight");
            return SubmitOutcome::Rejected(Rejection::Busy);
        }
        info!(chars = text.chars().count(), "Research query accepted");

        let settlement = Settlement::new(self.state.clone());
        let source = self.source.clone();
        let query = text.to_string();

        // The call runs on its own task so settlement survives a dropped caller.
        let task = tokio::spawn(async move {
            let answer = source.query(&query).await;
            settlement.settle(Message::assistant(answer.answer, answer.citations))
        });

        match task.await {
            Ok(message) => SubmitOutcome::Answered(message),
            Err(e) => {
                error!("Research query task aborted: {}", e);
                // Settlement's drop has already appended the safety-net reply.
                let last = self.state.borrow().transcript.last().cloned();
                SubmitOutcome::Answered(
                    last.unwrap_or_else(|| Message::assistant(SAFETY_NET_ANSWER, Vec::new())),
                )
            }
        }
    }
}

/// Completes an accepted query exactly once: either with the real answer via
/// [`Settlement::settle`], or with the safety-net reply when dropped unsettled.
struct Settlement {
    state: Arc<watch::Sender<SessionSnapshot>>,
    settled: bool,
}

impl Settlement {
    fn new(state: Arc<watch::Sender<SessionSnapshot>>) -> Self {
        Self { state, settled: false }
    }

    fn settle(mut self, message: Message) -> Message {
        self.finish(message.clone());
        message
    }

    fn finish(&mut self, message: Message) {
        self.state.send_modify(|s| {
            s.transcript.push(message);
            s.busy = false;
        });
        self.settled = true;
    }
}

impl Drop for Settlement {
    fn drop(&mut self) {
        if !self.settled {
            self.finish(Message::assistant(SAFETY_NET_ANSWER, Vec::new()));
        }
    }
}
