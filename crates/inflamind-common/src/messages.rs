//! Chat transcript types shared by the knowledge client and the research session.
//! A transcript is an append-only `Vec<Message>`; messages are never edited in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Citation
// ---------------------------------------------------------------------------

/// A web source backing an assistant answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub url: String,
}

impl Citation {
    /// Builds a citation only when both fields carry non-blank text.
    pub fn new(title: Option<&str>, url: Option<&str>) -> Option<Self> {
        let title = title.map(str::trim).filter(|t| !t.is_empty())?;
        let url = url.map(str::trim).filter(|u| !u.is_empty())?;
        Some(Self { title: title.to_string(), url: url.to_string() })
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User      => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self::build(Role::User, text.into(), Vec::new())
    }

    pub fn assistant(text: impl Into<String>, citations: Vec<Citation>) -> Self {
        Self::build(Role::Assistant, text.into(), citations)
    }

    fn build(role: Role, text: String, citations: Vec<Citation>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text,
            citations,
            created_at: Utc::now(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}
