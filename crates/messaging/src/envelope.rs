//! Message body encoding and routing metadata.
//!
//! An [`Envelope`] is the unit of publish: a JSON-encoded record plus the
//! [`Classification`] that tells the consumer which handler owns it. The
//! classification travels in the `controller` message header.

use std::fmt;
use std::str::FromStr;

use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::BasicProperties;
use serde::Serialize;

/// Header field carrying the classification string.
pub const CLASSIFICATION_HEADER: &str = "controller";

/// Content type set on every published message.
pub const CONTENT_TYPE: &str = "text/plain";

/// AMQP delivery mode 2: the broker writes the message to disk.
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// The closed set of message kinds the consumer knows how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// A technician performed a task; managers are told about it.
    Notification,
}

impl Classification {
    /// Every known classification, in declaration order.
    pub const ALL: [Classification; 1] = [Classification::Notification];

    /// Wire name carried in the `controller` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Notification => "notification",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The header value names no known classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown classification {0:?}")]
pub struct UnknownClassification(pub String);

impl FromStr for Classification {
    type Err = UnknownClassification;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Classification::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownClassification(s.to_string()))
    }
}

/// An encoded record ready to be published.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub body: Vec<u8>,
    pub classification: Classification,
}

impl Envelope {
    /// Serialize `record` as JSON and tag it with `classification`.
    pub fn encode<T: Serialize + ?Sized>(
        record: &T,
        classification: Classification,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            body: serde_json::to_vec(record)?,
            classification,
        })
    }

    /// Message properties: persistent, `text/plain`, classification header.
    pub fn properties(&self) -> BasicProperties {
        let mut headers = FieldTable::default();
        headers.insert(
            ShortString::from(CLASSIFICATION_HEADER),
            AMQPValue::LongString(LongString::from(self.classification.as_str())),
        );

        BasicProperties::default()
            .with_content_type(ShortString::from(CONTENT_TYPE))
            .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
            .with_headers(headers)
    }
}

/// Read the raw classification string from a message's headers.
///
/// Returns `None` when the header is absent or not a string value.
pub fn classification_header(headers: Option<&FieldTable>) -> Option<String> {
    let value = headers?
        .inner()
        .get(&ShortString::from(CLASSIFICATION_HEADER))?;
    match value {
        AMQPValue::LongString(s) => Some(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        AMQPValue::ShortString(s) => Some(s.as_str().to_string()),
        _ => None,
    }
}
