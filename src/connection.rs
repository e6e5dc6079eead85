// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Supervision
//!
//! This module owns the single broker connection and the state machine that tracks it:
//!
//! ```text
//!                 connect / close event
//!  Disconnected ─────────────────────────▶ Connecting ◀─┐ attempt failed,
//!       ▲                                     │         │ retry in 1s
//!       │ reset                               ├─────────┘
//!       │ (any channel fault)                 ▼
//!       ├──────────────────────────── ConnectedNoChannel
//!       │                                     │ ▲ publisher channel
//!       │                                     ▼ │ found closed
//!       └──────────────────────────── PublisherReady
//! ```
//!
//! Recovery is driven only by the connection's close event. Faults anywhere below
//! the connection go through [`Core::reset`], which closes the connection; the close
//! event then schedules the reconnect. Reconnect attempts run every
//! [`RECONNECT_DELAY`] with no cap until one succeeds or the client is closed.

use crate::{
    broker::{Broker, BrokerChannel, BrokerConnection, ChannelEvent, ConnectionEvent, Session},
    buffer::OfflineBuffer,
    config::SocketOptions,
    errors::AmqpError,
    publisher,
};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tracing::{debug, error, warn};

/// Fixed interval between reconnection attempts
pub const RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Error text emitted while a connection shuts down gracefully
pub const EXPECTED_CLOSE_MESSAGE: &str = "Connection closing";

/// A live connection together with the identity used to tell it apart from the
/// connections that preceded it.
#[derive(Clone)]
pub(crate) struct Link {
    pub(crate) id: u64,
    pub(crate) connection: Arc<dyn BrokerConnection>,
}

pub(crate) enum LinkState {
    Disconnected,
    Connecting,
    ConnectedNoChannel(Link),
    PublisherReady(Link, Arc<dyn BrokerChannel>),
}

impl fmt::Debug for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "Disconnected"),
            LinkState::Connecting => write!(f, "Connecting"),
            LinkState::ConnectedNoChannel(link) => write!(f, "ConnectedNoChannel({})", link.id),
            LinkState::PublisherReady(link, _) => write!(f, "PublisherReady({})", link.id),
        }
    }
}

/// Everything guarded by the supervisor lock. Holding the lock serializes
/// channel creation, buffer draining and new submissions.
pub(crate) struct Core {
    pub(crate) state: LinkState,
    pub(crate) offline: OfflineBuffer,
    /// Bumped by `close`. Connect attempts started under an older epoch are
    /// discarded when they finish.
    pub(crate) epoch: u64,
}

impl Core {
    pub(crate) fn link(&self) -> Option<&Link> {
        match &self.state {
            LinkState::ConnectedNoChannel(link) | LinkState::PublisherReady(link, _) => Some(link),
            LinkState::Disconnected | LinkState::Connecting => None,
        }
    }

    pub(crate) fn link_id(&self) -> Option<u64> {
        self.link().map(|link| link.id)
    }

    /// The reset edge: any connected state goes back to `Disconnected` and the
    /// connection is closed in the background. The close event of that connection
    /// schedules the reconnect.
    pub(crate) fn reset(&mut self, reason: &str) {
        match std::mem::replace(&mut self.state, LinkState::Disconnected) {
            LinkState::ConnectedNoChannel(link) | LinkState::PublisherReady(link, _) => {
                warn!(reason, link = link.id, "resetting amqp connection");
                tokio::spawn(close_connection(link.connection));
            }
            other => self.state = other,
        }
    }
}

async fn close_connection(connection: Arc<dyn BrokerConnection>) {
    if let Err(err) = connection.close().await {
        error!(error = err.to_string(), "failure to close the connection");
    }
}

/// Owns the broker connection and keeps it alive.
pub struct ConnectionSupervisor {
    broker: Arc<dyn Broker>,
    url: String,
    options: SocketOptions,
    core: Mutex<Core>,
    next_link_id: AtomicU64,
    shutdown: AtomicBool,
}

impl ConnectionSupervisor {
    pub(crate) fn new(
        broker: Arc<dyn Broker>,
        url: &str,
        options: SocketOptions,
    ) -> Arc<ConnectionSupervisor> {
        Arc::new(ConnectionSupervisor {
            broker,
            url: url.to_owned(),
            options,
            core: Mutex::new(Core {
                state: LinkState::Disconnected,
                offline: OfflineBuffer::new(),
                epoch: 0,
            }),
            next_link_id: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
        })
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().await
    }

    /// Makes one connection attempt on behalf of a caller.
    ///
    /// A failure is returned to the caller once; afterwards the supervisor keeps
    /// retrying in the background. Returns `NotConnected` without a new attempt
    /// while a background reconnect is already running.
    pub(crate) async fn connect(self: &Arc<Self>) -> Result<(), AmqpError> {
        let epoch = {
            let mut core = self.lock().await;
            match core.state {
                LinkState::ConnectedNoChannel(_) | LinkState::PublisherReady(..) => return Ok(()),
                LinkState::Connecting => return Err(AmqpError::NotConnected),
                LinkState::Disconnected => core.state = LinkState::Connecting,
            }
            core.epoch
        };
        self.shutdown.store(false, Ordering::SeqCst);

        debug!("creating amqp connection...");
        match self.broker.connect(&self.url, &self.options).await {
            Ok(session) => {
                if self.install(session, epoch).await {
                    Ok(())
                } else {
                    Err(AmqpError::NotConnected)
                }
            }
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                self.spawn_retry_loop(epoch);
                Err(err)
            }
        }
    }

    /// The connection of the current link, if any.
    pub(crate) async fn connection(&self) -> Option<Link> {
        self.lock().await.link().cloned()
    }

    /// Resets the link `link_id` if it is still the current one.
    pub(crate) async fn reset(&self, link_id: u64, reason: &str) {
        let mut core = self.lock().await;
        if core.link_id() == Some(link_id) {
            core.reset(reason);
        }
    }

    /// Stops reconnecting and closes the current connection.
    pub(crate) async fn close(&self) {
        self.shutdown.store(true, Ordering::SeqCst);

        let link = {
            let mut core = self.lock().await;
            let link = core.link().cloned();
            core.state = LinkState::Disconnected;
            core.epoch += 1;
            link
        };

        if let Some(link) = link {
            debug!(link = link.id, "closing amqp connection");
            close_connection(link.connection).await;
        }
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Makes `session` the current link. A session from an older epoch, or one
    /// that arrives when no attempt is pending, is closed instead.
    async fn install(self: &Arc<Self>, session: Session, epoch: u64) -> bool {
        let Session { connection, events } = session;

        let mut core = self.lock().await;
        if self.is_shutdown()
            || core.epoch != epoch
            || !matches!(core.state, LinkState::Connecting)
        {
            drop(core);
            debug!(epoch, "discarding stale amqp connection");
            close_connection(connection).await;
            return false;
        }

        let id = self.next_link_id.fetch_add(1, Ordering::SeqCst);
        core.state = LinkState::ConnectedNoChannel(Link { id, connection });
        tokio::spawn(watch_connection(self.clone(), id, events));
        debug!(link = id, "amqp connected");

        if !core.offline.is_empty() {
            debug!(
                pending = core.offline.len(),
                "reopening publisher to flush buffered messages"
            );
            publisher::ensure_open(self, &mut core).await;
        }
        true
    }

    fn spawn_retry_loop(self: &Arc<Self>, epoch: u64) {
        let supervisor = self.clone();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(RECONNECT_DELAY).await;

                if supervisor.lock().await.epoch != epoch {
                    debug!(epoch, "reconnect loop cancelled");
                    return;
                }

                debug!("reconnecting amqp connection...");
                match supervisor
                    .broker
                    .connect(&supervisor.url, &supervisor.options)
                    .await
                {
                    Ok(session) => {
                        supervisor.install(session, epoch).await;
                        return;
                    }
                    Err(err) => error!(error = err.to_string(), "failure to reconnect"),
                }
            }
        });
    }

    async fn on_closed(self: &Arc<Self>, link_id: u64) {
        let mut core = self.lock().await;

        match &core.state {
            LinkState::ConnectedNoChannel(link) | LinkState::PublisherReady(link, _)
                if link.id != link_id =>
            {
                return;
            }
            LinkState::Connecting => return,
            _ => {}
        }

        if self.is_shutdown() {
            core.state = LinkState::Disconnected;
            return;
        }

        warn!(link = link_id, "amqp connection closed, reconnecting");
        core.state = LinkState::Connecting;
        self.spawn_retry_loop(core.epoch);
    }
}

async fn watch_connection(
    supervisor: Arc<ConnectionSupervisor>,
    link_id: u64,
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::Error(message) => {
                if message != EXPECTED_CLOSE_MESSAGE {
                    error!(error = message, link = link_id, "connection error");
                }
            }
            ConnectionEvent::Closed => break,
        }
    }

    supervisor.on_closed(link_id).await;
}

/// Logs channel events. Channel faults never trigger recovery on their own.
pub(crate) fn observe_channel(role: &'static str, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ChannelEvent::Error(message) => error!(error = message, role, "channel error"),
                ChannelEvent::Closed => {
                    debug!(role, "channel closed");
                    break;
                }
            }
        }
    });
}
