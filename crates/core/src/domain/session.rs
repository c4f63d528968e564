use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One conversational turn as the semantic classifier sees it. Sessions are
/// keyed externally by session id; the core never inspects the store's
/// internal representation beyond this ordered turn list.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionTurn {
    pub sender: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl SessionTurn {
    pub fn new(sender: impl Into<String>, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self { sender: sender.into(), text: text.into(), timestamp }
    }
}
