//! Sentry envelope parsing
//!
//! The envelope format is newline-delimited:
//! ```text
//! {envelope_header}\n
//! {item_header}\n
//! {item_payload}\n
//! ...
//! ```
//!
//! An item header may carry `length`, in which case the payload is exactly that
//! many bytes and may itself contain newlines (attachments).

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

use super::types::SentryEventPayload;

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("missing envelope header")]
    MissingHeader,
    #[error("invalid envelope header: {0}")]
    InvalidHeader(String),
    #[error("unexpected end of envelope: item declares {declared} bytes, {available} available")]
    UnexpectedEof { declared: usize, available: usize },
    #[error("Invalid item payload: {0}")]
    InvalidPayload(String),
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct EnvelopeHeaders {
    /// Present when the envelope carries an event
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub dsn: Option<String>,
    #[serde(default)]
    pub sent_at: Option<String>,
}

/// The type of an envelope item
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Event,
    Transaction,
    Attachment,
    Session,
    Sessions,
    ClientReport,
    UserReport,
    Span,
    /// An item type this parser does not know
    #[serde(other)]
    Unknown,
}

impl ItemType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Transaction => "transaction",
            Self::Attachment => "attachment",
            Self::Session => "session",
            Self::Sessions => "sessions",
            Self::ClientReport => "client_report",
            Self::UserReport => "user_report",
            Self::Span => "span",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemHeader {
    #[serde(rename = "type")]
    pub ty: ItemType,
    #[serde(default)]
    pub length: Option<usize>,
}

/// Items the ingestion path consumes; everything else is skipped while parsing
#[derive(Debug)]
pub enum EnvelopeItem {
    Event(Box<SentryEventPayload>),
}

#[derive(Debug)]
pub struct Envelope {
    header: EnvelopeHeaders,
    items: Vec<EnvelopeItem>,
}

/// Splits off one line, dropping the `\n` (and a preceding `\r`)
fn split_line(data: &[u8]) -> (&[u8], &[u8]) {
    let (line, rest) = match data.iter().position(|b| *b == b'\n') {
        Some(pos) => (&data[..pos], &data[pos + 1..]),
        None => (data, &data[data.len()..]),
    };
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    (line, rest)
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(|b| b.is_ascii_whitespace())
}

impl Envelope {
    pub fn from_slice(data: &[u8]) -> Result<Self, EnvelopeError> {
        let (header_line, mut rest) = split_line(data);
        if is_blank(header_line) {
            return Err(EnvelopeError::MissingHeader);
        }

        let header: EnvelopeHeaders = serde_json::from_slice(header_line)
            .map_err(|e| EnvelopeError::InvalidHeader(format!("Failed to parse header: {}", e)))?;

        let mut items = Vec::new();

        while !rest.is_empty() {
            let (line, after_header) = split_line(rest);
            if is_blank(line) {
                rest = after_header;
                continue;
            }

            let item_header: ItemHeader = match serde_json::from_slice(line) {
                Ok(h) => h,
                Err(e) => {
                    tracing::warn!("Failed to parse item header: {}. Skipping.", e);
                    rest = after_header;
                    continue;
                }
            };

            if after_header.is_empty() {
                tracing::warn!("Item header without payload. Skipping.");
                break;
            }

            let payload = match item_header.length {
                Some(length) => {
                    if after_header.len() < length {
                        return Err(EnvelopeError::UnexpectedEof {
                            declared: length,
                            available: after_header.len(),
                        });
                    }
                    let (payload, remaining) = after_header.split_at(length);
                    rest = remaining.strip_prefix(b"\n").unwrap_or(remaining);
                    payload
                }
                None => {
                    let (payload, remaining) = split_line(after_header);
                    rest = remaining;
                    payload
                }
            };

            match item_header.ty {
                ItemType::Event => {
                    let event: SentryEventPayload = serde_json::from_slice(payload).map_err(|e| {
                        EnvelopeError::InvalidPayload(format!("Failed to parse event: {}", e))
                    })?;
                    items.push(EnvelopeItem::Event(Box::new(event)));
                }
                other => {
                    tracing::debug!("Skipping envelope item type: {}", other);
                }
            }
        }

        Ok(Envelope { header, items })
    }

    pub fn header(&self) -> &EnvelopeHeaders {
        &self.header
    }

    pub fn items(&self) -> impl Iterator<Item = &EnvelopeItem> {
        self.items.iter()
    }

    pub fn into_items(self) -> Vec<EnvelopeItem> {
        self.items
    }
}
