//! Application layer: the use cases the web layer calls.
//!
//! Everything here composes the lower crates and owns the cross-cutting
//! policies: per-conversation write serialization, degradation to the keyword
//! result when the semantic classifier fails, and the one local retry on an
//! optimistic-concurrency conflict. Handlers stay thin; this crate is where
//! the ingestion pipeline actually lives.

pub mod bootstrap;
pub mod ingest;
pub mod logging;
pub mod queries;

pub use bootstrap::{bootstrap, Application, BootstrapError};
pub use ingest::{IncomingMessage, IngestionOutcome, IngestionRequest, IngestionService};
pub use logging::init_logging;
pub use queries::{MessageView, TagExplanation, TicketDetails, TicketQueryService, TicketSummary};
