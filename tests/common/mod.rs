// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory broker used by the integration tests. Only the default exchange
//! routes: a publish to exchange `""` lands in the queue named by the routing key.

#![allow(dead_code)]

use amqp_pubsub::{
    broker::{
        Broker, BrokerChannel, BrokerConnection, ChannelEvent, ConfirmFuture, Confirmation,
        ConnectionEvent, DeliveryStream, InboundDelivery, OpenedChannel, Session,
    },
    buffer::{MessageProperties, Target},
    config::SocketOptions,
    errors::AmqpError,
    queue::{AssertQueueOptions, ConsumeOptions},
};
use async_trait::async_trait;
use futures_util::{stream, FutureExt, StreamExt};
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};
use tokio::sync::mpsc;

type DeliverySender = mpsc::UnboundedSender<Result<InboundDelivery, AmqpError>>;

#[derive(Default)]
struct State {
    unreachable: bool,
    connect_attempts: usize,
    fail_publishes: usize,
    nack_publishes: usize,
    next_tag: u64,
    queues: HashMap<String, VecDeque<InboundDelivery>>,
    declared: Vec<String>,
    consumers: HashMap<String, DeliverySender>,
    accepted: Vec<(String, Vec<u8>)>,
    acks: Vec<u64>,
    current: Option<Arc<FakeConnection>>,
}

impl State {
    fn route(&mut self, queue: &str, data: Vec<u8>) {
        self.next_tag += 1;
        let delivery = InboundDelivery {
            delivery_tag: self.next_tag,
            data,
            ..Default::default()
        };

        match self.consumers.get(queue) {
            Some(consumer) => {
                let _ = consumer.send(Ok(delivery));
            }
            None => self
                .queues
                .entry(queue.to_owned())
                .or_default()
                .push_back(delivery),
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeBroker {
    state: Arc<Mutex<State>>,
}

impl FakeBroker {
    pub fn new() -> FakeBroker {
        FakeBroker::default()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unwrap().unreachable = !reachable;
    }

    pub fn fail_next_publishes(&self, n: usize) {
        self.state.lock().unwrap().fail_publishes = n;
    }

    pub fn nack_next_publishes(&self, n: usize) {
        self.state.lock().unwrap().nack_publishes = n;
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.lock().unwrap().connect_attempts
    }

    /// Bodies accepted (and confirmed) by the broker, in arrival order.
    pub fn accepted(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().unwrap().accepted.clone()
    }

    pub fn acks(&self) -> Vec<u64> {
        self.state.lock().unwrap().acks.clone()
    }

    pub fn declared(&self) -> Vec<String> {
        self.state.lock().unwrap().declared.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .current
            .as_ref()
            .is_some_and(|c| c.open.load(Ordering::SeqCst))
    }

    /// Drops the current connection as if the broker went away.
    pub fn drop_connection(&self) {
        let current = self.state.lock().unwrap().current.take();
        if let Some(conn) = current {
            conn.shutdown(Some("socket closed by peer"));
        }
    }
}

#[async_trait]
impl Broker for FakeBroker {
    async fn connect(&self, _url: &str, _options: &SocketOptions) -> Result<Session, AmqpError> {
        let mut state = self.state.lock().unwrap();
        state.connect_attempts += 1;
        if state.unreachable {
            return Err(AmqpError::ConnectionError("connection refused".to_owned()));
        }

        let (events, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(FakeConnection {
            state: self.state.clone(),
            open: Arc::new(AtomicBool::new(true)),
            events,
        });
        state.current = Some(conn.clone());

        Ok(Session {
            connection: conn,
            events: rx,
        })
    }
}

pub struct FakeConnection {
    state: Arc<Mutex<State>>,
    open: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl FakeConnection {
    fn shutdown(&self, error: Option<&str>) {
        self.open.store(false, Ordering::SeqCst);
        self.state.lock().unwrap().consumers.clear();
        if let Some(error) = error {
            let _ = self.events.send(ConnectionEvent::Error(error.to_owned()));
        }
        let _ = self.events.send(ConnectionEvent::Closed);
    }
}

#[async_trait]
impl BrokerConnection for FakeConnection {
    async fn create_channel(&self, _confirm: bool) -> Result<OpenedChannel, AmqpError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(AmqpError::ChannelError("connection is closed".to_owned()));
        }

        let (_events, rx) = mpsc::unbounded_channel::<ChannelEvent>();
        Ok(OpenedChannel {
            channel: Arc::new(FakeChannel {
                state: self.state.clone(),
                open: self.open.clone(),
            }),
            events: rx,
        })
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.shutdown(None);
        Ok(())
    }
}

struct FakeChannel {
    state: Arc<Mutex<State>>,
    open: Arc<AtomicBool>,
}

impl FakeChannel {
    fn check_open(&self) -> Result<(), AmqpError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AmqpError::ChannelError("channel is closed".to_owned()))
        }
    }
}

#[async_trait]
impl BrokerChannel for FakeChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn basic_qos(&self, _prefetch: u16) -> Result<(), AmqpError> {
        self.check_open()
    }

    async fn queue_declare(
        &self,
        queue: &str,
        _options: &AssertQueueOptions,
    ) -> Result<(), AmqpError> {
        self.check_open()?;
        self.state.lock().unwrap().declared.push(queue.to_owned());
        Ok(())
    }

    async fn basic_publish(
        &self,
        target: &Target,
        body: &[u8],
        _properties: &MessageProperties,
    ) -> Result<ConfirmFuture, AmqpError> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();

        if state.fail_publishes > 0 {
            state.fail_publishes -= 1;
            return Err(AmqpError::PublishingError("channel closed".to_owned()));
        }
        if state.nack_publishes > 0 {
            state.nack_publishes -= 1;
            return Ok(async { Ok::<_, AmqpError>(Confirmation::Nack) }.boxed());
        }

        state
            .accepted
            .push((target.routing_key().to_owned(), body.to_vec()));
        if target.exchange().is_empty() {
            state.route(target.routing_key(), body.to_vec());
        }

        Ok(async { Ok::<_, AmqpError>(Confirmation::Ack) }.boxed())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        _options: &ConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError> {
        self.check_open()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.state.lock().unwrap();
        if let Some(stored) = state.queues.remove(queue) {
            for delivery in stored {
                let _ = tx.send(Ok(delivery));
            }
        }
        state.consumers.insert(queue.to_owned(), tx);

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.check_open()?;
        self.state.lock().unwrap().acks.push(delivery_tag);
        Ok(())
    }
}
