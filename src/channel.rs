// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channel Management
//!
//! This module implements the broker capability traits on top of `lapin`. It handles
//! the creation of connections to the RabbitMQ server, the channels opened on them,
//! and the translation between `lapin` types and the client's own message types.

use crate::{
    broker::{
        Broker, BrokerChannel, BrokerConnection, ChannelEvent, ConfirmFuture, Confirmation,
        ConnectionEvent, DeliveryStream, InboundDelivery, OpenedChannel, Session,
    },
    buffer::{MessageProperties, Target},
    config::SocketOptions,
    connection::EXPECTED_CLOSE_MESSAGE,
    errors::AmqpError,
    queue::{AssertQueueOptions, ConsumeOptions, QueueArgument},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        ConfirmSelectOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, LongInt, LongString, ShortString},
    uri::AMQPUri,
    BasicProperties, Channel, Connection, ConnectionProperties, ConnectionState,
};
use std::{collections::BTreeMap, str::FromStr, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Connection name announced to the broker when none is configured
pub const DEFAULT_CONNECTION_NAME: &str = "amqp-pubsub";

/// Reply code sent with a client-initiated connection close
const REPLY_SUCCESS: u16 = 200;

/// [`Broker`] backed by `lapin`.
#[derive(Debug, Clone, Default)]
pub struct LapinBroker {}

impl LapinBroker {
    pub fn new() -> LapinBroker {
        LapinBroker {}
    }
}

/// Builds the connection URI, folding the socket options into its query.
pub(crate) fn amqp_uri(url: &str, options: &SocketOptions) -> Result<AMQPUri, AmqpError> {
    let mut uri = AMQPUri::from_str(url).map_err(|err| {
        error!(error = err, "invalid amqp uri");
        AmqpError::ConnectionError(err)
    })?;

    if let Some(heartbeat) = options.heartbeat {
        uri.query.heartbeat = Some(heartbeat);
    }
    if let Some(channel_max) = options.channel_max {
        uri.query.channel_max = Some(channel_max);
    }
    if let Some(frame_max) = options.frame_max {
        uri.query.frame_max = Some(frame_max);
    }
    if let Some(timeout) = options.connection_timeout {
        uri.query.connection_timeout = Some(timeout);
    }

    Ok(uri)
}

fn connection_error_message(err: &lapin::Error) -> String {
    match err {
        lapin::Error::InvalidConnectionState(ConnectionState::Closing) => {
            EXPECTED_CLOSE_MESSAGE.to_owned()
        }
        other => other.to_string(),
    }
}

#[async_trait]
impl Broker for LapinBroker {
    async fn connect(&self, url: &str, options: &SocketOptions) -> Result<Session, AmqpError> {
        let uri = amqp_uri(url, options)?;
        let name = options
            .connection_name
            .clone()
            .unwrap_or_else(|| DEFAULT_CONNECTION_NAME.to_owned());
        let properties = ConnectionProperties::default().with_connection_name(LongString::from(name));

        let conn = match Connection::connect_uri(uri, properties).await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError(err.to_string()))
            }
        }?;
        debug!("amqp connected");

        let (events, rx) = mpsc::unbounded_channel();
        let on_error = events.clone();
        conn.on_error(move |err| {
            let _ = on_error.send(ConnectionEvent::Error(connection_error_message(&err)));
            let _ = on_error.send(ConnectionEvent::Closed);
        });

        Ok(Session {
            connection: Arc::new(LapinConnection { conn, events }),
            events: rx,
        })
    }
}

struct LapinConnection {
    conn: Connection,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

#[async_trait]
impl BrokerConnection for LapinConnection {
    async fn create_channel(&self, confirm: bool) -> Result<OpenedChannel, AmqpError> {
        debug!("creating amqp channel...");
        let channel = match self.conn.create_channel().await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }?;

        if confirm {
            if let Err(err) = channel
                .confirm_select(ConfirmSelectOptions { nowait: false })
                .await
            {
                error!(error = err.to_string(), "error to enable publisher confirms");
                return Err(AmqpError::ChannelError(err.to_string()));
            }
        }

        let (events, rx) = mpsc::unbounded_channel();
        let on_error = events.clone();
        channel.on_error(move |err| {
            let _ = on_error.send(ChannelEvent::Error(err.to_string()));
            let _ = on_error.send(ChannelEvent::Closed);
        });
        debug!("channel created");

        Ok(OpenedChannel {
            channel: Arc::new(LapinChannel { channel }),
            events: rx,
        })
    }

    async fn close(&self) -> Result<(), AmqpError> {
        let result = self.conn.close(REPLY_SUCCESS, "closing").await;
        let _ = self.events.send(ConnectionEvent::Closed);

        result.map_err(|err| AmqpError::ConnectionError(err.to_string()))
    }
}

struct LapinChannel {
    channel: Channel,
}

fn queue_arguments(options: &AssertQueueOptions) -> FieldTable {
    let args: BTreeMap<ShortString, AMQPValue> = options
        .arguments()
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                QueueArgument::Int(v) => AMQPValue::LongInt(LongInt::from(v)),
                QueueArgument::Str(v) => AMQPValue::LongString(LongString::from(v)),
            };
            (ShortString::from(key), value)
        })
        .collect();

    FieldTable::from(args)
}

fn basic_properties(props: &MessageProperties) -> BasicProperties {
    let headers: BTreeMap<ShortString, AMQPValue> = props
        .headers
        .iter()
        .map(|(key, value)| {
            (
                ShortString::from(key.clone()),
                AMQPValue::LongString(LongString::from(value.clone())),
            )
        })
        .collect();

    let mut properties = BasicProperties::default()
        .with_content_type(ShortString::from(props.content_type.clone()))
        .with_delivery_mode(props.delivery_mode)
        .with_message_id(ShortString::from(props.message_id.clone()))
        .with_headers(FieldTable::from(headers));

    if let Some(expiration) = &props.expiration {
        properties = properties.with_expiration(ShortString::from(expiration.clone()));
    }
    if let Some(priority) = props.priority {
        properties = properties.with_priority(priority);
    }

    properties
}

fn inbound_delivery(delivery: Delivery) -> InboundDelivery {
    let mut headers = BTreeMap::new();
    if let Some(table) = delivery.properties.headers() {
        for (key, value) in table.inner() {
            let value = match value {
                AMQPValue::LongString(v) => String::from_utf8_lossy(v.as_bytes()).into_owned(),
                AMQPValue::ShortString(v) => v.to_string(),
                _ => continue,
            };
            headers.insert(key.to_string(), value);
        }
    }

    InboundDelivery {
        delivery_tag: delivery.delivery_tag,
        redelivered: delivery.redelivered,
        data: delivery.data,
        headers,
    }
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }

    async fn basic_qos(&self, prefetch: u16) -> Result<(), AmqpError> {
        self.channel
            .basic_qos(prefetch, BasicQosOptions { global: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to configure qos");
                AmqpError::QoSDeclarationError(err.to_string())
            })
    }

    async fn queue_declare(
        &self,
        queue: &str,
        options: &AssertQueueOptions,
    ) -> Result<(), AmqpError> {
        debug!("creating queue: {}", queue);

        match self
            .channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: options.passive,
                    durable: options.durable,
                    exclusive: options.exclusive,
                    auto_delete: options.auto_delete,
                    nowait: false,
                },
                queue_arguments(options),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), queue, "error to declare the queue");
                Err(AmqpError::DeclareQueueError(queue.to_owned()))
            }
            _ => Ok(()),
        }
    }

    async fn basic_publish(
        &self,
        target: &Target,
        body: &[u8],
        properties: &MessageProperties,
    ) -> Result<ConfirmFuture, AmqpError> {
        let confirm = match self
            .channel
            .basic_publish(
                target.exchange(),
                target.routing_key(),
                BasicPublishOptions {
                    immediate: false,
                    mandatory: properties.mandatory,
                },
                body,
                basic_properties(properties),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError(err.to_string()))
            }
            Ok(confirm) => Ok(confirm),
        }?;

        Ok(Box::pin(async move {
            match confirm.await {
                Ok(confirmation) if confirmation.is_nack() => Ok(Confirmation::Nack),
                Ok(_) => Ok(Confirmation::Ack),
                Err(err) => Err(AmqpError::PublishingError(err.to_string())),
            }
        }))
    }

    async fn basic_consume(
        &self,
        queue: &str,
        options: &ConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError> {
        let consumer = match self
            .channel
            .basic_consume(
                queue,
                &options.consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: options.no_ack,
                    exclusive: options.exclusive,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::BindingConsumerError(queue.to_owned()))
            }
            Ok(c) => Ok(c),
        }?;

        Ok(consumer
            .map(|result| {
                result
                    .map(inbound_delivery)
                    .map_err(|err| AmqpError::ConsumerError(err.to_string()))
            })
            .boxed())
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                AmqpError::AckMessageError
            })
    }
}
