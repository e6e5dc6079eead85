// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Offline Buffer
//!
//! Outbound messages that could not be handed to a live publisher channel are kept
//! here until one is available again. There is one FIFO queue per operation kind;
//! the two queues are replayed independently and carry no ordering relative to
//! each other.
//!
//! The buffer is bounded only by process memory and is lost on process exit.

use crate::{payload::Payload, publisher::PublishOptions};
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

/// AMQP delivery mode for messages that must survive a broker restart
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;
/// AMQP delivery mode for transient messages
pub const TRANSIENT_DELIVERY_MODE: u8 = 1;

/// The two outbound operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundKind {
    ExchangePublish,
    DirectSend,
}

/// Where an outbound message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Exchange {
        exchange: String,
        routing_key: String,
    },
    Queue(String),
}

impl Target {
    pub fn kind(&self) -> OutboundKind {
        match self {
            Target::Exchange { .. } => OutboundKind::ExchangePublish,
            Target::Queue(_) => OutboundKind::DirectSend,
        }
    }

    /// Exchange to publish on; direct sends go through the default exchange.
    pub fn exchange(&self) -> &str {
        match self {
            Target::Exchange { exchange, .. } => exchange,
            Target::Queue(_) => "",
        }
    }

    pub fn routing_key(&self) -> &str {
        match self {
            Target::Exchange { routing_key, .. } => routing_key,
            Target::Queue(queue) => queue,
        }
    }
}

/// Wire-level properties of a single publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageProperties {
    pub delivery_mode: u8,
    pub mandatory: bool,
    pub content_type: String,
    pub message_id: String,
    pub expiration: Option<String>,
    pub priority: Option<u8>,
    pub headers: BTreeMap<String, String>,
}

/// A unit of outbound work.
///
/// A message is consumed exactly once by a successful send, or moved back into the
/// [`OfflineBuffer`]. It keeps its message id across retries so consumers can spot
/// redeliveries.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub(crate) target: Target,
    pub(crate) payload: Payload,
    pub(crate) options: PublishOptions,
    pub(crate) message_id: String,
    pub(crate) trace_headers: BTreeMap<String, String>,
}

impl OutboundMessage {
    pub fn new(target: Target, payload: Payload, options: PublishOptions) -> OutboundMessage {
        OutboundMessage {
            target,
            payload,
            options,
            message_id: Uuid::new_v4().to_string(),
            trace_headers: BTreeMap::default(),
        }
    }

    pub(crate) fn with_trace_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.trace_headers = headers;
        self
    }

    pub fn kind(&self) -> OutboundKind {
        self.target.kind()
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Builds the wire properties; user headers win over trace headers.
    pub(crate) fn properties(&self, content_type: &str) -> MessageProperties {
        let mut headers = self.trace_headers.clone();
        headers.extend(self.options.headers.clone());

        MessageProperties {
            delivery_mode: if self.options.persistent {
                PERSISTENT_DELIVERY_MODE
            } else {
                TRANSIENT_DELIVERY_MODE
            },
            mandatory: self.options.mandatory,
            content_type: content_type.to_owned(),
            message_id: self.message_id.clone(),
            expiration: self.options.expiration.clone(),
            priority: self.options.priority,
            headers,
        }
    }
}

/// Pending outbound messages, one FIFO per [`OutboundKind`].
#[derive(Debug, Default)]
pub struct OfflineBuffer {
    exchange_publish: VecDeque<OutboundMessage>,
    direct_send: VecDeque<OutboundMessage>,
}

impl OfflineBuffer {
    pub fn new() -> OfflineBuffer {
        OfflineBuffer::default()
    }

    /// Appends a message behind everything already pending of the same kind.
    pub fn push(&mut self, msg: OutboundMessage) {
        self.side_mut(msg.kind()).push_back(msg);
    }

    /// Removes and returns every pending message of `kind`, oldest first.
    pub fn take(&mut self, kind: OutboundKind) -> VecDeque<OutboundMessage> {
        std::mem::take(self.side_mut(kind))
    }

    pub fn len_of(&self, kind: OutboundKind) -> usize {
        match kind {
            OutboundKind::ExchangePublish => self.exchange_publish.len(),
            OutboundKind::DirectSend => self.direct_send.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.exchange_publish.len() + self.direct_send.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn side_mut(&mut self, kind: OutboundKind) -> &mut VecDeque<OutboundMessage> {
        match kind {
            OutboundKind::ExchangePublish => &mut self.exchange_publish,
            OutboundKind::DirectSend => &mut self.direct_send,
        }
    }
}
