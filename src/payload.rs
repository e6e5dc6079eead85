// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Payloads
//!
//! Outbound payloads are either raw bytes, text or a structured (JSON) value.
//! Text and structured values both go on the wire as JSON, so a text payload is
//! sent as a JSON string and `"42"` arrives as the text `42`, not as a number.
//! When a value cannot be serialized its debug form is sent as text instead of
//! failing the publish.
//!
//! Inbound payloads are decoded the other way around: the body is parsed as JSON,
//! a JSON string is delivered as text, and a body that is not JSON at all is
//! delivered as (lossy UTF-8) text. Decoding never fails.

use crate::errors::AmqpError;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::warn;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Content type for text messages
pub const TEXT_CONTENT_TYPE: &str = "text/plain";
/// Content type for opaque binary messages
pub const BINARY_CONTENT_TYPE: &str = "application/octet-stream";

/// Outbound message content.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Raw(Vec<u8>),
    Text(String),
    Structured(Value),
}

/// A payload ready to go on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub body: Vec<u8>,
    pub content_type: &'static str,
}

impl Payload {
    /// Builds a structured payload from any serializable value.
    ///
    /// # Parameters
    /// * `value` - Any serializable value
    ///
    /// # Returns
    /// A structured payload, or the value's `Debug` text when it cannot be
    /// represented as JSON
    pub fn json<T>(value: &T) -> Payload
    where
        T: Serialize + fmt::Debug + ?Sized,
    {
        match serde_json::to_value(value) {
            Ok(v) => Payload::Structured(v),
            Err(err) => {
                warn!(
                    error = err.to_string(),
                    "payload is not serializable, sending its debug form"
                );
                Payload::Text(format!("{:?}", value))
            }
        }
    }

    pub fn encode(&self) -> Encoded {
        match self {
            Payload::Raw(bytes) => Encoded {
                body: bytes.clone(),
                content_type: BINARY_CONTENT_TYPE,
            },
            Payload::Text(text) => encode_json(&Value::String(text.clone()), text),
            Payload::Structured(value) => encode_json(value, &value.to_string()),
        }
    }
}

fn encode_json(value: &Value, fallback: &str) -> Encoded {
    match serde_json::to_vec(value) {
        Ok(body) => Encoded {
            body,
            content_type: JSON_CONTENT_TYPE,
        },
        Err(err) => {
            warn!(error = err.to_string(), "failure to encode json payload");
            Encoded {
                body: fallback.as_bytes().to_vec(),
                content_type: TEXT_CONTENT_TYPE,
            }
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Raw(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload::Raw(bytes.to_vec())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_owned())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Structured(value)
    }
}

/// Decoded content of a delivered message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundPayload {
    Structured(Value),
    Text(String),
}

impl InboundPayload {
    /// Parses `data` as JSON. JSON strings and bodies that are not JSON come
    /// back as text.
    pub fn decode(data: &[u8]) -> InboundPayload {
        match serde_json::from_slice::<Value>(data) {
            Ok(Value::String(text)) => InboundPayload::Text(text),
            Ok(value) => InboundPayload::Structured(value),
            Err(_) => InboundPayload::Text(String::from_utf8_lossy(data).into_owned()),
        }
    }

    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            InboundPayload::Structured(v) => Some(v),
            InboundPayload::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            InboundPayload::Text(t) => Some(t),
            InboundPayload::Structured(_) => None,
        }
    }

    /// Deserializes a structured payload into `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, AmqpError> {
        match self {
            InboundPayload::Structured(v) => {
                serde_json::from_value(v.clone()).map_err(|err| {
                    AmqpError::ConsumerError(format!("unexpected payload shape: {}", err))
                })
            }
            InboundPayload::Text(_) => Err(AmqpError::ConsumerError(
                "payload is not structured".to_owned(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{ser::Error, Deserialize, Serializer};
    use serde_json::json;

    struct Opaque;

    impl Serialize for Opaque {
        fn serialize<S: Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("opaque values cannot be serialized"))
        }
    }

    impl fmt::Debug for Opaque {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "opaque-handle")
        }
    }

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Order {
        id: u32,
        sku: String,
    }

    #[test]
    fn structured_payload_decodes_back() {
        let order = Order {
            id: 7,
            sku: "A-1".to_owned(),
        };
        let encoded = Payload::json(&order).encode();
        assert_eq!(encoded.content_type, JSON_CONTENT_TYPE);

        let decoded = InboundPayload::decode(&encoded.body);
        assert_eq!(decoded.as_structured(), Some(&json!({"id": 7, "sku": "A-1"})));
        assert_eq!(decoded.parse::<Order>().unwrap(), order);
    }

    #[test]
    fn unserializable_value_falls_back_to_text() {
        let payload = Payload::json(&Opaque);
        assert_eq!(payload, Payload::Text("opaque-handle".to_owned()));
        assert_eq!(payload.encode().body, br#""opaque-handle""#.to_vec());
    }

    #[test]
    fn json_looking_text_stays_text() {
        for text in ["42", "true", "null", r#"{"foo":"bar"}"#, "Hello test"] {
            let encoded = Payload::from(text).encode();
            assert_eq!(encoded.content_type, JSON_CONTENT_TYPE);
            assert_eq!(
                InboundPayload::decode(&encoded.body),
                InboundPayload::Text(text.to_owned())
            );
        }
    }

    #[test]
    fn structured_scalars_stay_structured() {
        let encoded = Payload::from(json!(42)).encode();
        assert_eq!(InboundPayload::decode(&encoded.body), InboundPayload::Structured(json!(42)));
    }

    #[test]
    fn undecodable_body_is_delivered_as_text() {
        let decoded = InboundPayload::decode(b"Hello test");
        assert_eq!(decoded, InboundPayload::Text("Hello test".to_owned()));
        assert!(decoded.parse::<Order>().is_err());

        let decoded = InboundPayload::decode(&[0xff, 0xfe, b'a']);
        assert_eq!(decoded.as_text(), Some("\u{fffd}\u{fffd}a"));
    }

    #[test]
    fn raw_bytes_are_sent_untouched() {
        let encoded = Payload::from(b"Hello World".as_slice()).encode();
        assert_eq!(encoded.body, b"Hello World".to_vec());
        assert_eq!(encoded.content_type, BINARY_CONTENT_TYPE);
    }
}
