// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Pub/Sub Client
//!
//! This module provides the error taxonomy shared by every layer of the client.
//! The `AmqpError` enum covers configuration validation, connection establishment,
//! channel setup, publishing, consuming and caller-supplied handler failures.
//!
//! Only configuration and connect errors are ever surfaced to the caller directly.
//! Everything that happens after the first connect is absorbed by the offline buffer
//! or escalated into a connection reset, and is visible through logs only.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Variants carrying a `String` hold the broker library's error text (or the
/// offending name) so the failure can be logged without keeping the source error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Missing or invalid configuration, fatal at startup
    #[error("invalid configuration: {0}")]
    ConfigurationError(String),

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// The operation needs a live connection and there is none
    #[error("not connected")]
    NotConnected,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error binding a consumer to a queue
    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    /// Error publishing a message
    #[error("failure to publish: {0}")]
    PublishingError(String),

    /// The broker refused a published message
    #[error("message was nacked by the broker")]
    NegativeConfirmation,

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// A caller-supplied message handler failed
    #[error("message handler failure: {0}")]
    HandlerError(String),
}
