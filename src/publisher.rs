// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! This module owns the single confirm channel used for every outbound operation:
//! exchange publishes and direct queue sends. The channel is opened lazily on the
//! first send (or eagerly after a reconnect when messages are waiting), and every
//! time it opens the offline buffer is drained before anything else can be sent.
//!
//! A send that fails, or that the broker refuses to confirm, moves the message into
//! the offline buffer and resets the connection.

use crate::{
    broker::{BrokerChannel, ConfirmFuture, Confirmation},
    buffer::{OutboundKind, OutboundMessage, Target},
    connection::{observe_channel, ConnectionSupervisor, Core, LinkState},
    errors::AmqpError,
    otel,
    payload::Payload,
    queue::AssertQueueOptions,
};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error};

/// Delivery options of a publish or direct send.
///
/// The default is a persistent message without extra headers. Override single
/// fields with struct update syntax:
///
/// ```
/// use amqp_pubsub::publisher::PublishOptions;
///
/// let opts = PublishOptions { priority: Some(5), ..Default::default() };
/// assert!(opts.persistent);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOptions {
    pub persistent: bool,
    pub mandatory: bool,
    /// Per-message TTL in milliseconds, as the broker expects it
    pub expiration: Option<String>,
    pub priority: Option<u8>,
    pub headers: BTreeMap<String, String>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        PublishOptions {
            persistent: true,
            mandatory: false,
            expiration: None,
            priority: None,
            headers: BTreeMap::default(),
        }
    }
}

/// Entry point for outbound messages.
pub struct PublisherChannel {
    supervisor: Arc<ConnectionSupervisor>,
}

impl PublisherChannel {
    pub(crate) fn new(supervisor: Arc<ConnectionSupervisor>) -> PublisherChannel {
        PublisherChannel { supervisor }
    }

    /// Publishes to `exchange` with `routing_key`.
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Payload,
        options: PublishOptions,
    ) {
        let target = Target::Exchange {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
        };
        self.submit(OutboundMessage::new(target, payload, options))
            .await;
    }

    /// Sends straight to `queue` through the default exchange, asserting the
    /// queue first.
    pub async fn send_to_queue(&self, queue: &str, payload: Payload, options: PublishOptions) {
        let target = Target::Queue(queue.to_owned());
        self.submit(OutboundMessage::new(target, payload, options))
            .await;
    }

    async fn submit(&self, msg: OutboundMessage) {
        let msg = msg.with_trace_headers(otel::current_context_headers());

        let mut core = self.supervisor.lock().await;
        match ensure_open(&self.supervisor, &mut core).await {
            Some((link_id, channel)) => {
                dispatch(&self.supervisor, &mut core, link_id, channel, msg).await;
            }
            None => {
                debug!(
                    message_id = msg.message_id(),
                    "publisher channel unavailable, buffering message"
                );
                core.offline.push(msg);
            }
        }
    }
}

/// Returns the open publisher channel, creating it (and draining the offline
/// buffer) when there is a connection but no usable channel.
pub(crate) async fn ensure_open(
    supervisor: &Arc<ConnectionSupervisor>,
    core: &mut Core,
) -> Option<(u64, Arc<dyn BrokerChannel>)> {
    let link = match &core.state {
        LinkState::PublisherReady(link, channel) if channel.is_open() => {
            return Some((link.id, channel.clone()));
        }
        LinkState::PublisherReady(link, _) => {
            debug!(link = link.id, "publisher channel closed, reopening");
            link.clone()
        }
        LinkState::ConnectedNoChannel(link) => link.clone(),
        LinkState::Disconnected | LinkState::Connecting => return None,
    };

    debug!("creating publisher channel...");
    match link.connection.create_channel(true).await {
        Ok(opened) => {
            observe_channel("publisher", opened.events);
            core.state = LinkState::PublisherReady(link, opened.channel);
            debug!("publisher started");
        }
        Err(err) => {
            error!(error = err.to_string(), "error to create the publisher channel");
            core.reset("failure to create the publisher channel");
            return None;
        }
    }

    drain(supervisor, core).await;

    match &core.state {
        LinkState::PublisherReady(link, channel) => Some((link.id, channel.clone())),
        _ => None,
    }
}

fn ready_channel(core: &Core) -> Option<(u64, Arc<dyn BrokerChannel>)> {
    match &core.state {
        LinkState::PublisherReady(link, channel) => Some((link.id, channel.clone())),
        _ => None,
    }
}

/// Replays both buffer kinds, oldest first. Stops at the first failure: the failed
/// message and everything behind it go back to the buffer in order.
pub(crate) async fn drain(supervisor: &Arc<ConnectionSupervisor>, core: &mut Core) {
    for kind in [OutboundKind::ExchangePublish, OutboundKind::DirectSend] {
        let mut pending = core.offline.take(kind);
        if pending.is_empty() {
            continue;
        }
        debug!(?kind, count = pending.len(), "draining offline buffer");

        while let Some(msg) = pending.pop_front() {
            let sent = match ready_channel(core) {
                Some((link_id, channel)) => dispatch(supervisor, core, link_id, channel, msg).await,
                None => {
                    core.offline.push(msg);
                    false
                }
            };

            if !sent {
                pending.into_iter().for_each(|m| core.offline.push(m));
                return;
            }
        }
    }
}

/// Hands one message to the channel. On failure the message is buffered and the
/// link is reset; returns whether the message left the client.
async fn dispatch(
    supervisor: &Arc<ConnectionSupervisor>,
    core: &mut Core,
    link_id: u64,
    channel: Arc<dyn BrokerChannel>,
    msg: OutboundMessage,
) -> bool {
    match send(channel.as_ref(), &msg).await {
        Ok(confirm) => {
            watch_confirm(supervisor.clone(), link_id, msg, confirm);
            true
        }
        Err(err) => {
            error!(
                error = err.to_string(),
                message_id = msg.message_id(),
                "error publishing message, buffering"
            );
            core.offline.push(msg);
            core.reset("publish failure");
            false
        }
    }
}

async fn send(channel: &dyn BrokerChannel, msg: &OutboundMessage) -> Result<ConfirmFuture, AmqpError> {
    if let Target::Queue(queue) = msg.target() {
        channel
            .queue_declare(queue, &AssertQueueOptions::default())
            .await?;
    }

    let encoded = msg.payload().encode();
    channel
        .basic_publish(
            msg.target(),
            &encoded.body,
            &msg.properties(encoded.content_type),
        )
        .await
}

fn watch_confirm(
    supervisor: Arc<ConnectionSupervisor>,
    link_id: u64,
    msg: OutboundMessage,
    confirm: ConfirmFuture,
) {
    tokio::spawn(async move {
        let failure = match confirm.await {
            Ok(Confirmation::Ack) => {
                debug!(message_id = msg.message_id(), "message published");
                return;
            }
            Ok(Confirmation::Nack) => AmqpError::NegativeConfirmation,
            Err(err) => err,
        };

        error!(
            error = failure.to_string(),
            message_id = msg.message_id(),
            "publish was not confirmed, buffering"
        );

        let mut core = supervisor.lock().await;
        core.offline.push(msg);

        if core.link_id() == Some(link_id) {
            core.reset("publish not confirmed");
        } else if ready_channel(&core).is_some() {
            drain(&supervisor, &mut core).await;
        }
    });
}
