//! Semantic classification layer - the escalation target behind the keyword
//! classifier.
//!
//! The adapter here is strictly a boundary: it renders the conversation into
//! a prompt, calls a pluggable [`llm::LlmClient`], and parses the reply into
//! a domain [`tagdesk_core::Tag`]. It owns session-continuity keys (merging
//! new turns into the stored context before analysis) but delegates session
//! persistence to the injected [`tagdesk_db::SessionStore`].
//!
//! Failure policy: a timeout or transport error is always surfaced as a
//! classified [`classifier::ClassifierError`]; the adapter never invents a
//! default tag. Deciding what a failure means belongs to the caller.

pub mod classifier;
pub mod llm;
mod response;

pub use classifier::{ClassifierError, LlmSemanticClassifier, SemanticClassifier};
pub use llm::{LlmClient, OpenAiChatClient};
