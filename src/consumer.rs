// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Subscriber
//!
//! Every subscription owns a dedicated channel. Setting one up takes four broker
//! round trips (open channel, prefetch, assert queue, consume) and any failure
//! along the way is fatal to the subscription and resets the whole connection.
//!
//! Deliveries are acknowledged before the handler runs, decoded as JSON with a
//! text fallback, and handed to the caller's [`MessageHandler`]. A handler error
//! is treated like a channel fault: the connection is reset.
//!
//! Subscriptions are not re-established when the connection is replaced; the
//! [`Subscription`] handle reports [`SubscriptionState::Closed`] and the caller
//! subscribes again if it needs to.

use crate::{
    broker::{BrokerChannel, DeliveryStream, InboundDelivery},
    connection::{observe_channel, ConnectionSupervisor},
    errors::AmqpError,
    otel::{self, CONSUMER_TRACER},
    payload::InboundPayload,
    queue::{AssertQueueOptions, ConsumeOptions},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use opentelemetry::{
    global,
    trace::{Span, Status},
    Context,
};
use std::{borrow::Cow, collections::BTreeMap, sync::Arc};
use tokio::sync::watch;
use tracing::{debug, error};

/// A decoded delivery as seen by a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub queue: String,
    pub payload: InboundPayload,
    pub redelivered: bool,
    pub headers: BTreeMap<String, String>,
}

/// Processes messages delivered to a subscription.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn exec(&self, ctx: &Context, msg: &InboundMessage) -> Result<(), AmqpError>;
}

/// Adapts a plain closure to [`MessageHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&InboundMessage) -> Result<(), AmqpError> + Send + Sync,
{
    async fn exec(&self, _ctx: &Context, msg: &InboundMessage) -> Result<(), AmqpError> {
        (self.0)(msg)
    }
}

/// Wraps a closure into a shareable handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(&InboundMessage) -> Result<(), AmqpError> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// Lifecycle of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Opening,
    Ready,
    Closed,
}

/// Handle to a running subscription.
#[derive(Debug, Clone)]
pub struct Subscription {
    queue: String,
    state: watch::Receiver<SubscriptionState>,
}

impl Subscription {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// Resolves once the subscription's channel is gone.
    pub async fn closed(&mut self) {
        let _ = self
            .state
            .wait_for(|state| *state == SubscriptionState::Closed)
            .await;
    }
}

/// Opens a subscriber channel on the current connection and starts consuming.
pub(crate) async fn subscribe(
    supervisor: &Arc<ConnectionSupervisor>,
    queue: &str,
    handler: Arc<dyn MessageHandler>,
    assert_options: AssertQueueOptions,
    consume_options: ConsumeOptions,
) -> Result<Subscription, AmqpError> {
    let (state_tx, state_rx) = watch::channel(SubscriptionState::Opening);

    let Some(link) = supervisor.connection().await else {
        state_tx.send_replace(SubscriptionState::Closed);
        return Err(AmqpError::NotConnected);
    };

    let setup = async {
        let opened = link.connection.create_channel(false).await?;
        observe_channel("subscriber", opened.events);
        let channel = opened.channel;

        channel.basic_qos(consume_options.prefetch).await?;
        channel.queue_declare(queue, &assert_options).await?;
        let deliveries = channel.basic_consume(queue, &consume_options).await?;

        Ok::<_, AmqpError>((channel, deliveries))
    };

    let (channel, deliveries) = match setup.await {
        Ok(ready) => ready,
        Err(err) => {
            error!(error = err.to_string(), queue, "failure to start the subscriber");
            state_tx.send_replace(SubscriptionState::Closed);
            supervisor.reset(link.id, "subscriber setup failure").await;
            return Err(err);
        }
    };

    state_tx.send_replace(SubscriptionState::Ready);
    debug!(queue, "worker started");

    let worker = Worker {
        supervisor: supervisor.clone(),
        link_id: link.id,
        queue: queue.to_owned(),
        channel,
        handler,
        no_ack: consume_options.no_ack,
    };
    tokio::spawn(worker.run(deliveries, state_tx));

    Ok(Subscription {
        queue: queue.to_owned(),
        state: state_rx,
    })
}

struct Worker {
    supervisor: Arc<ConnectionSupervisor>,
    link_id: u64,
    queue: String,
    channel: Arc<dyn BrokerChannel>,
    handler: Arc<dyn MessageHandler>,
    no_ack: bool,
}

impl Worker {
    async fn run(
        self,
        mut deliveries: DeliveryStream,
        state: watch::Sender<SubscriptionState>,
    ) {
        while let Some(result) = deliveries.next().await {
            match result {
                Ok(delivery) => {
                    if let Err(err) = self.process(&delivery).await {
                        error!(
                            error = err.to_string(),
                            queue = self.queue,
                            "failure to process delivery, closing connection"
                        );
                        self.supervisor
                            .reset(self.link_id, "subscriber delivery failure")
                            .await;
                        break;
                    }
                }
                Err(err) => error!(error = err.to_string(), "errors consume msg"),
            }
        }

        state.send_replace(SubscriptionState::Closed);
        debug!(queue = self.queue, "subscription closed");
    }

    /// Acks, decodes and dispatches one delivery.
    async fn process(&self, delivery: &InboundDelivery) -> Result<(), AmqpError> {
        if !self.no_ack {
            if let Err(err) = self.channel.basic_ack(delivery.delivery_tag).await {
                error!(error = err.to_string(), "error whiling ack msg");
                return Err(AmqpError::AckMessageError);
            }
        }

        let msg = InboundMessage {
            queue: self.queue.clone(),
            payload: InboundPayload::decode(&delivery.data),
            redelivered: delivery.redelivered,
            headers: delivery.headers.clone(),
        };

        let tracer = global::tracer(CONSUMER_TRACER);
        let (ctx, mut span) = otel::new_span(&delivery.headers, &tracer, &self.queue);

        match self.handler.exec(&ctx, &msg).await {
            Ok(()) => {
                debug!("message successfully processed");
                span.set_status(Status::Ok);
                Ok(())
            }
            Err(err) => {
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from("handler failure"),
                });
                Err(AmqpError::HandlerError(err.to_string()))
            }
        }
    }
}
