use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketId(pub String);

impl TicketId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for TicketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Externally supplied, stable identifier grouping all messages of one
/// customer interaction. Doubles as the semantic-classifier session key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Open,
    Pending,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Pending => "pending",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "pending" => Ok(Self::Pending),
            "closed" => Ok(Self::Closed),
            other => Err(DomainError::InvariantViolation(format!(
                "unknown ticket status `{other}` (expected open|pending|closed)"
            ))),
        }
    }
}

/// Closed enumeration of supported service lines. Adding a service requires a
/// code change so matching and routing stay exhaustive and type-checked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceType {
    Flight,
    Hotel,
    Visa,
    #[serde(rename = "eSIM")]
    Esim,
    Wallet,
    Other,
}

impl ServiceType {
    /// Declaration order; keyword scoring breaks ties by first-wins over it.
    pub const ALL: [ServiceType; 6] =
        [Self::Flight, Self::Hotel, Self::Visa, Self::Esim, Self::Wallet, Self::Other];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flight => "Flight",
            Self::Hotel => "Hotel",
            Self::Visa => "Visa",
            Self::Esim => "eSIM",
            Self::Wallet => "Wallet",
            Self::Other => "Other",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "flight" => Ok(Self::Flight),
            "hotel" => Ok(Self::Hotel),
            "visa" => Ok(Self::Visa),
            "esim" | "e-sim" => Ok(Self::Esim),
            "wallet" => Ok(Self::Wallet),
            "other" => Ok(Self::Other),
            other => Err(DomainError::InvariantViolation(format!(
                "unknown service type `{other}`"
            ))),
        }
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Cancellation,
    Modify,
    TopUp,
    Withdraw,
    OrderRecheck,
    PrePurchase,
    Others,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Self::Cancellation,
        Self::Modify,
        Self::TopUp,
        Self::Withdraw,
        Self::OrderRecheck,
        Self::PrePurchase,
        Self::Others,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancellation => "Cancellation",
            Self::Modify => "Modify",
            Self::TopUp => "Top Up",
            Self::Withdraw => "Withdraw",
            Self::OrderRecheck => "Order Re-Check",
            Self::PrePurchase => "Pre-Purchase",
            Self::Others => "Others",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cancellation" | "cancel" => Ok(Self::Cancellation),
            "modify" | "change" => Ok(Self::Modify),
            "top up" | "top_up" | "top-up" | "topup" => Ok(Self::TopUp),
            "withdraw" | "withdrawal" => Ok(Self::Withdraw),
            "order re-check" | "order_recheck" | "order recheck" | "recheck" => {
                Ok(Self::OrderRecheck)
            }
            "pre-purchase" | "pre_purchase" | "pre purchase" => Ok(Self::PrePurchase),
            "others" | "other" => Ok(Self::Others),
            other => Err(DomainError::InvariantViolation(format!("unknown category `{other}`"))),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance of a tag. `KeywordFallback` marks a keyword result that only
/// stands because the semantic classifier failed; it is distinct from a
/// genuine above-threshold keyword classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagMethod {
    Keyword,
    Semantic,
    KeywordFallback,
}

impl TagMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Semantic => "semantic",
            Self::KeywordFallback => "keyword_fallback",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keyword" => Ok(Self::Keyword),
            "semantic" => Ok(Self::Semantic),
            "keyword_fallback" => Ok(Self::KeywordFallback),
            other => Err(DomainError::InvariantViolation(format!("unknown tag method `{other}`"))),
        }
    }
}

impl std::fmt::Display for TagMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable classification value. A later ingestion replaces the ticket's
/// tag wholesale; tags are never mutated in place.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub service_type: ServiceType,
    pub category: Category,
    pub confidence: f64,
    pub method: TagMethod,
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
}

impl Tag {
    /// True when the classifier found no signal on either axis.
    pub fn is_sentinel(&self) -> bool {
        self.service_type == ServiceType::Other && self.category == Category::Others
    }

    pub fn with_method(mut self, method: TagMethod) -> Self {
        self.method = method;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Storage-assigned row id; `None` until persisted.
    pub id: Option<i64>,
    pub ticket_id: Option<TicketId>,
    pub text: String,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn key(&self) -> MessageKey {
        MessageKey {
            text: self.text.clone(),
            sender: self.sender.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Identity used to detect redelivered webhook payloads. The surrounding
/// system supplies no message id, so the tuple (text, sender, timestamp)
/// stands in for one.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub text: String,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate root for one conversation. `conversation_id` is the unique
/// natural key: re-ingestion for a known conversation appends messages and
/// may replace the tag, never creates a second ticket.
///
/// Closed tickets still accept messages and automatic re-tagging; the status
/// stays `Closed` until an explicit status update reopens it. Whether closed
/// tickets should instead freeze their tag is an open product decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub conversation_id: ConversationId,
    pub messages: Vec<Message>,
    pub current_tag: Option<Tag>,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency counter; 0 until first persisted.
    pub version: i64,
}

impl Ticket {
    pub fn new(conversation_id: ConversationId, now: DateTime<Utc>) -> Self {
        Self {
            id: TicketId::generate(),
            conversation_id,
            messages: Vec::new(),
            current_tag: None,
            status: TicketStatus::Open,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn append_message(&mut self, mut message: Message, now: DateTime<Utc>) {
        message.ticket_id = Some(self.id.clone());
        self.messages.push(message);
        self.updated_at = now;
    }

    pub fn replace_tag(&mut self, tag: Tag, now: DateTime<Utc>) {
        self.current_tag = Some(tag);
        self.updated_at = now;
    }

    pub fn can_transition_to(&self, next: TicketStatus) -> bool {
        matches!(
            (self.status, next),
            (TicketStatus::Open, TicketStatus::Pending)
                | (TicketStatus::Pending, TicketStatus::Open)
                | (TicketStatus::Closed, TicketStatus::Open)
                | (_, TicketStatus::Closed)
        )
    }

    pub fn transition_to(&mut self, next: TicketStatus, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            self.updated_at = now;
            return Ok(());
        }

        Err(DomainError::InvalidStatusTransition { from: self.status, to: next })
    }

    /// Full conversation text in send order, fed to the classifiers. Later
    /// messages can shift the service or category, so the whole history is
    /// always used, not just the newest batch.
    pub fn combined_text(&self) -> String {
        self.messages.iter().map(|m| m.text.as_str()).collect::<Vec<_>>().join(" ")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TicketStats {
    pub total: u64,
    pub open: u64,
    pub pending: u64,
    pub closed: u64,
    pub tagged: u64,
    pub average_confidence: f64,
}
