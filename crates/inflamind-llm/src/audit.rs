//! Audit records for research queries.
//! One entry per knowledge query, whether it succeeded or fell back.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::backend::FailureKind;
use crate::knowledge::KnowledgeAnswer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutcome {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAuditEntry {
    pub id: Uuid,
    pub model: String,
    pub outcome: QueryOutcome,
    pub failure: Option<FailureKind>,
    pub citation_count: usize,
    pub answer_hash: String,
    pub latency_ms: u64,
    pub called_at: chrono::DateTime<Utc>,
}

impl QueryAuditEntry {
    pub fn new(
        model: impl Into<String>,
        failure: Option<FailureKind>,
        answer: &KnowledgeAnswer,
        latency_ms: u64,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(answer.answer.as_bytes());
        let answer_hash = format!("{:x}", hasher.finalize());

        let outcome = match failure {
            Some(_) => QueryOutcome::Failed,
            None    => QueryOutcome::Succeeded,
        };

        Self {
            id: Uuid::new_v4(),
            model: model.into(),
            outcome,
            failure,
            citation_count: answer.citations.len(),
            answer_hash,
            latency_ms,
            called_at: Utc::now(),
        }
    }
}
