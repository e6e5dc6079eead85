// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Options
//!
//! This module provides the option types used when a queue is asserted (declared) and
//! when a consumer is attached to it. Both follow the builder pattern and both default
//! to the safe choice: durable queues and manual acknowledgement.

use std::collections::BTreeMap;

/// Constant for the header field used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Constant for the header field used to specify a dead letter routing key
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
/// Constant for the header field used to specify message TTL
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Constant for the header field used to specify maximum queue length
pub const AMQP_HEADERS_MAX_LENGTH: &str = "x-max-length";
/// Constant for the header field used to specify maximum queue size in bytes
pub const AMQP_HEADERS_MAX_LENGTH_BYTES: &str = "x-max-length-bytes";

/// Number of unacknowledged deliveries a subscriber may hold at once
pub const DEFAULT_PREFETCH: u16 = 10;

/// Value of an `x-*` queue argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueArgument {
    Int(i32),
    Str(String),
}

/// Options used when asserting a queue.
///
/// `AssertQueueOptions::default()` declares a durable, shared, non auto-deleting queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertQueueOptions {
    pub(crate) durable: bool,
    pub(crate) exclusive: bool,
    pub(crate) auto_delete: bool,
    pub(crate) passive: bool,
    pub(crate) ttl: Option<i32>,
    pub(crate) max_length: Option<i32>,
    pub(crate) max_length_bytes: Option<i32>,
    pub(crate) dead_letter_exchange: Option<String>,
    pub(crate) dead_letter_routing_key: Option<String>,
}

impl Default for AssertQueueOptions {
    fn default() -> Self {
        AssertQueueOptions {
            durable: true,
            exclusive: false,
            auto_delete: false,
            passive: false,
            ttl: None,
            max_length: None,
            max_length_bytes: None,
            dead_letter_exchange: None,
            dead_letter_routing_key: None,
        }
    }
}

impl AssertQueueOptions {
    /// Makes the queue transient; it will not survive a broker restart.
    pub fn transient(mut self) -> Self {
        self.durable = false;
        self
    }

    /// Makes the queue exclusive to the connection.
    ///
    /// Exclusive queues are deleted when the connection closes.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Sets the queue to auto-delete when its last consumer goes away.
    pub fn auto_delete(mut self) -> Self {
        self.auto_delete = true;
        self
    }

    /// Only checks that the queue exists, without creating it.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Sets the message Time-To-Live (TTL) for the queue.
    ///
    /// # Parameters
    /// * `ttl` - Time in milliseconds a message may stay in the queue
    ///
    /// # Returns
    /// The updated options, with `x-message-ttl` set
    pub fn ttl(mut self, ttl: i32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets the maximum number of messages the queue can hold.
    ///
    /// # Parameters
    /// * `max` - Maximum message count
    pub fn max_length(mut self, max: i32) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Sets the maximum size in bytes the queue can hold.
    pub fn max_length_bytes(mut self, max_bytes: i32) -> Self {
        self.max_length_bytes = Some(max_bytes);
        self
    }

    /// Routes rejected and expired messages to another exchange.
    ///
    /// # Parameters
    /// * `exchange` - The dead letter exchange
    /// * `routing_key` - Routing key used when dead-lettering
    ///
    /// # Returns
    /// The updated options, with both `x-dead-letter-*` arguments set
    pub fn dead_letter(mut self, exchange: &str, routing_key: &str) -> Self {
        self.dead_letter_exchange = Some(exchange.to_owned());
        self.dead_letter_routing_key = Some(routing_key.to_owned());
        self
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// The `x-*` declaration arguments implied by these options.
    ///
    /// # Returns
    /// A map from argument name to value, empty when no limits are set
    pub fn arguments(&self) -> BTreeMap<&'static str, QueueArgument> {
        let mut args = BTreeMap::new();

        if let Some(ttl) = self.ttl {
            args.insert(AMQP_HEADERS_MESSAGE_TTL, QueueArgument::Int(ttl));
        }
        if let Some(max) = self.max_length {
            args.insert(AMQP_HEADERS_MAX_LENGTH, QueueArgument::Int(max));
        }
        if let Some(max) = self.max_length_bytes {
            args.insert(AMQP_HEADERS_MAX_LENGTH_BYTES, QueueArgument::Int(max));
        }
        if let Some(exchange) = &self.dead_letter_exchange {
            args.insert(
                AMQP_HEADERS_DEAD_LETTER_EXCHANGE,
                QueueArgument::Str(exchange.clone()),
            );
        }
        if let Some(key) = &self.dead_letter_routing_key {
            args.insert(
                AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY,
                QueueArgument::Str(key.clone()),
            );
        }

        args
    }
}

/// Options used when attaching a consumer to a queue.
///
/// `ConsumeOptions::default()` uses manual acknowledgement and a prefetch of
/// [`DEFAULT_PREFETCH`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeOptions {
    pub(crate) no_ack: bool,
    pub(crate) exclusive: bool,
    pub(crate) consumer_tag: String,
    pub(crate) prefetch: u16,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        ConsumeOptions {
            no_ack: false,
            exclusive: false,
            consumer_tag: String::new(),
            prefetch: DEFAULT_PREFETCH,
        }
    }
}

impl ConsumeOptions {
    /// Lets the broker consider messages acknowledged as soon as they are delivered.
    pub fn no_ack(mut self) -> Self {
        self.no_ack = true;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Sets the consumer tag. An empty tag lets the broker generate one.
    pub fn consumer_tag(mut self, tag: &str) -> Self {
        self.consumer_tag = tag.to_owned();
        self
    }

    /// Limits how many unacknowledged deliveries the consumer may hold.
    ///
    /// # Parameters
    /// * `prefetch` - Maximum number of in-flight deliveries, passed to `basic.qos`
    pub fn prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn is_no_ack(&self) -> bool {
        self.no_ack
    }

    pub fn prefetch_count(&self) -> u16 {
        self.prefetch
    }
}
