pub mod classifier;
pub mod config;
pub mod domain;
pub mod errors;
pub mod metrics;

pub use classifier::keyword::{KeywordClassifier, KeywordExplanation, KeywordTable};
pub use classifier::router::{ConfidenceRouter, Route};
pub use domain::session::SessionTurn;
pub use domain::ticket::{
    Category, ConversationId, Message, MessageKey, ServiceType, Tag, TagMethod, Ticket, TicketId,
    TicketStats, TicketStatus,
};
pub use errors::{DomainError, ServiceError};
pub use metrics::{MetricsRecorder, MetricsSnapshot};
