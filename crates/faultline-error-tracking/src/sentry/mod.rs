//! # Sentry Integration Module
//!
//! Sentry SDK compatibility:
//! - Envelope parsing
//! - Event mapping to the stored event format
//! - HTTP ingestion endpoints with project/DSN authentication
//!
//! ## Architecture
//!
//! ```text
//! Sentry SDK
//!     ↓
//! HTTP Handler (handlers.rs)
//!     ↓
//! Project authentication + body parsing (service.rs, envelope.rs)
//!     ↓
//! Event Mapper (mapper.rs)
//!     ↓
//! Error Ingestion Service
//!     ↓
//! Event store + processing job
//! ```

pub mod envelope;
pub mod handlers;
pub mod mapper;
pub mod service;
pub mod types;

pub use envelope::{Envelope, EnvelopeError, EnvelopeItem};
pub use service::{
    ProjectRecord, ProjectResolver, SeaOrmProjectResolver, SentryIngestionService,
    StaticProjectResolver,
};
pub use types::{SentryEnvelopeResponse, SentryEventPayload, SentryEventResponse};
