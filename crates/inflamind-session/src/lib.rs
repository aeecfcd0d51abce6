//! inflamind-session — In-memory research chat session.
//! Holds the transcript, serializes queries through a busy flag, and
//! exposes a watch subscription for whatever renders the conversation.

pub mod session;

pub use session::{Rejection, ResearchSession, SessionSnapshot, SubmitOutcome, SAFETY_NET_ANSWER};
