// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Resilient publish/subscribe client for AMQP brokers.
//!
//! Publishes never fail from the caller's point of view: while the broker is
//! unreachable, outbound messages wait in an in-memory buffer and are replayed in
//! order once a publisher channel is available again. Delivery is at-least-once.

mod otel;

pub mod broker;
pub mod buffer;
pub mod channel;
pub mod client;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod errors;
pub mod payload;
pub mod publisher;
pub mod queue;

pub use client::AmqpClient;
pub use config::AmqpConfig;
pub use consumer::{handler_fn, InboundMessage, MessageHandler, Subscription, SubscriptionState};
pub use errors::AmqpError;
pub use payload::{InboundPayload, Payload};
pub use publisher::PublishOptions;
