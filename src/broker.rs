// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Client Capability
//!
//! The client core never talks to the wire directly. It consumes the three traits in
//! this module: a [`Broker`] that opens sessions, a [`BrokerConnection`] that opens
//! channels, and a [`BrokerChannel`] that publishes, declares, consumes and acks.
//!
//! Asynchronous failures are surfaced as event streams next to the handle they belong
//! to. A connection must always emit [`ConnectionEvent::Closed`] once it goes away,
//! whether the broker dropped it or [`BrokerConnection::close`] was called; a dropped
//! event sender is treated the same way.
//!
//! The production implementation lives in [`crate::channel`] and is backed by `lapin`.

use crate::{
    buffer::{MessageProperties, Target},
    config::SocketOptions,
    errors::AmqpError,
    queue::{AssertQueueOptions, ConsumeOptions},
};
use async_trait::async_trait;
use futures_util::{future::BoxFuture, stream::BoxStream};
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::mpsc;

/// Outcome of a publish on a confirm channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Ack,
    Nack,
}

/// Resolves once the broker confirmed (or refused) a publish.
pub type ConfirmFuture = BoxFuture<'static, Result<Confirmation, AmqpError>>;

/// Deliveries pushed by the broker to a consumer.
pub type DeliveryStream = BoxStream<'static, Result<InboundDelivery, AmqpError>>;

/// Asynchronous notifications about a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Error(String),
    Closed,
}

/// Asynchronous notifications about a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Error(String),
    Closed,
}

/// A freshly opened connection and its event feed.
pub struct Session {
    pub connection: Arc<dyn BrokerConnection>,
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

/// A freshly opened channel and its event feed.
pub struct OpenedChannel {
    pub channel: Arc<dyn BrokerChannel>,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// A message delivered to a consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundDelivery {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub data: Vec<u8>,
    pub headers: BTreeMap<String, String>,
}

/// Opens sessions to a broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self, url: &str, options: &SocketOptions) -> Result<Session, AmqpError>;
}

/// One live session to the broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Opens a channel; `confirm` puts it in publisher-confirm mode.
    async fn create_channel(&self, confirm: bool) -> Result<OpenedChannel, AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// A logical sub-session over a connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    fn is_open(&self) -> bool;

    async fn basic_qos(&self, prefetch: u16) -> Result<(), AmqpError>;

    async fn queue_declare(
        &self,
        queue: &str,
        options: &AssertQueueOptions,
    ) -> Result<(), AmqpError>;

    /// Hands a message to the broker. The returned future resolves with the
    /// broker's confirmation and does not need to be awaited before the next publish.
    async fn basic_publish(
        &self,
        target: &Target,
        body: &[u8],
        properties: &MessageProperties,
    ) -> Result<ConfirmFuture, AmqpError>;

    async fn basic_consume(
        &self,
        queue: &str,
        options: &ConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError>;

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError>;
}
