// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Pub/Sub Client
//!
//! `AmqpClient` is the public surface of the crate: an explicitly constructed client
//! with a `new → connect → publish/subscribe → close` lifecycle. It validates the
//! configuration, applies option defaults and coordinates the connection
//! supervisor, the publisher channel and the subscriber channels.
//!
//! ```no_run
//! use amqp_pubsub::{client::AmqpClient, config::AmqpConfig, consumer::handler_fn};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), amqp_pubsub::errors::AmqpError> {
//! let client = AmqpClient::with_lapin(AmqpConfig::new("amqp://localhost:5672/%2f"))?;
//! client.connect().await?;
//!
//! client
//!     .subscribe(
//!         "test.queue.json",
//!         handler_fn(|msg| {
//!             println!("{:?}", msg.payload);
//!             Ok(())
//!         }),
//!         None,
//!         None,
//!     )
//!     .await?;
//! client.publish("", "test.queue.json", json!({"foo": "bar"}), None).await;
//! # Ok(())
//! # }
//! ```

use crate::{
    broker::Broker,
    channel::LapinBroker,
    config::AmqpConfig,
    connection::ConnectionSupervisor,
    consumer::{self, MessageHandler, Subscription},
    errors::AmqpError,
    payload::Payload,
    publisher::{PublishOptions, PublisherChannel},
    queue::{AssertQueueOptions, ConsumeOptions},
};
use std::sync::Arc;
use tracing::{debug, error};

/// Resilient publish/subscribe client.
pub struct AmqpClient {
    config: AmqpConfig,
    supervisor: Arc<ConnectionSupervisor>,
    publisher: PublisherChannel,
}

impl AmqpClient {
    /// Creates a client over the given broker capability.
    ///
    /// Nothing touches the network before `connect` or `start`.
    ///
    /// # Parameters
    /// * `config` - Client configuration, the broker URL is required
    /// * `broker` - Broker implementation, usually [`LapinBroker`]
    ///
    /// # Returns
    /// The client, or `ConfigurationError` when no broker URL was configured
    pub fn new(config: AmqpConfig, broker: Arc<dyn Broker>) -> Result<AmqpClient, AmqpError> {
        config.validate()?;

        let supervisor = ConnectionSupervisor::new(
            broker,
            &config.amqp_url,
            config.effective_socket_options(),
        );
        let publisher = PublisherChannel::new(supervisor.clone());

        Ok(AmqpClient {
            config,
            supervisor,
            publisher,
        })
    }

    /// Creates a client talking to RabbitMQ through `lapin`.
    pub fn with_lapin(config: AmqpConfig) -> Result<AmqpClient, AmqpError> {
        AmqpClient::new(config, Arc::new(LapinBroker::new()))
    }

    pub fn config(&self) -> &AmqpConfig {
        &self.config
    }

    /// Startup hook: connects unless the configuration is inactive. A failed
    /// connect is logged and left to the background reconnect.
    pub async fn start(&self) {
        if !self.config.active {
            debug!("amqp client deactivated");
            return;
        }

        if let Err(err) = self.connect().await {
            error!(error = err.to_string(), "initial amqp connection failed");
        }
    }

    /// Connects to the broker. Only the first failure is reported; the client
    /// keeps retrying in the background after it.
    ///
    /// # Returns
    /// `Ok(())` once connected, `ConnectionError` when the attempt failed, or
    /// `NotConnected` while a background reconnect is in progress
    pub async fn connect(&self) -> Result<(), AmqpError> {
        self.supervisor.connect().await?;
        debug!("[AMQP] connected");
        Ok(())
    }

    /// Publishes to an exchange. Fire and forget: failures end up in the offline
    /// buffer and the logs.
    ///
    /// # Parameters
    /// * `exchange` - Target exchange, `""` for the default exchange
    /// * `routing_key` - Routing key, the queue name on the default exchange
    /// * `payload` - Text, bytes or a JSON value
    /// * `options` - Delivery options, `None` means a persistent message
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: impl Into<Payload>,
        options: Option<PublishOptions>,
    ) {
        self.publisher
            .publish(
                exchange,
                routing_key,
                payload.into(),
                options.unwrap_or_default(),
            )
            .await
    }

    /// Sends directly to a queue, with the same delivery guarantees as `publish`.
    /// The queue is asserted (durable) before each send.
    ///
    /// # Parameters
    /// * `queue` - Target queue name
    /// * `payload` - Text, bytes or a JSON value
    /// * `options` - Delivery options, `None` means a persistent message
    pub async fn send_to_queue(
        &self,
        queue: &str,
        payload: impl Into<Payload>,
        options: Option<PublishOptions>,
    ) {
        self.publisher
            .send_to_queue(queue, payload.into(), options.unwrap_or_default())
            .await
    }

    /// Starts consuming `queue` on a dedicated channel.
    ///
    /// # Parameters
    /// * `queue` - Queue to consume, asserted before consuming
    /// * `handler` - Called once per delivery, after the delivery is acknowledged
    /// * `assert_options` - Queue declaration options, `None` means a durable queue
    /// * `consume_options` - Consumer options, `None` means manual ack and a prefetch of 10
    ///
    /// # Returns
    /// A [`Subscription`] handle, or `NotConnected` when there is no connection.
    /// Setup failures reset the connection and are returned as well.
    pub async fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
        assert_options: Option<AssertQueueOptions>,
        consume_options: Option<ConsumeOptions>,
    ) -> Result<Subscription, AmqpError> {
        consumer::subscribe(
            &self.supervisor,
            queue,
            handler,
            assert_options.unwrap_or_default(),
            consume_options.unwrap_or_default(),
        )
        .await
    }

    /// Closes the connection and stops reconnecting. Messages published afterwards
    /// are buffered until `connect` is called again.
    pub async fn close(&self) {
        self.supervisor.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;

    #[test]
    fn rejects_empty_url_without_connecting() {
        let mut broker = MockBroker::new();
        broker.expect_connect().never();

        let err = AmqpClient::new(AmqpConfig::new(""), Arc::new(broker))
            .err()
            .unwrap();
        assert!(matches!(err, AmqpError::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn inactive_client_does_not_connect() {
        let mut broker = MockBroker::new();
        broker.expect_connect().never();

        let client =
            AmqpClient::new(AmqpConfig::new("amqp://localhost").inactive(), Arc::new(broker))
                .unwrap();
        client.start().await;
    }
}
