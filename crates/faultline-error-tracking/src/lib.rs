pub mod fingerprint;
pub mod handlers;
pub mod sentry;
pub mod services;

pub use fingerprint::{fingerprint_hash, normalize_message, FingerprintStrategy};
pub use handlers::handler;
pub use sentry::{Envelope, EnvelopeError, EnvelopeItem, SentryIngestionService};
pub use services::*;
