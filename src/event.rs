//! # Session Events and the Application Callback
//!
//! The session reports everything that happens asynchronously — connection
//! outcomes, acknowledged requests, inbound messages, teardowns — through a
//! single [`SessionHandler`] registered when the client is created. Events are
//! dispatched synchronously, one at a time, in the order they occur.
//!
//! # Re-entrancy
//!
//! The handler runs while the client is mutably borrowed, so it cannot call
//! the client directly. Commands issued from inside a callback (republish on
//! receive, resubscribe after connect, and so on) go through the [`Outbox`]
//! instead: a bounded queue the client drains as soon as the callback
//! returns. A queued command whose connection is gone by the time it is
//! drained completes with [`RequestError::ConnectionLost`] — it never
//! disappears silently.

use heapless::{Deque, String, Vec};

use crate::error::ConnectReturnCode;
use crate::packet::{Publish, QoS};

/// Maximum length of a topic in a queued command.
pub const MAX_TOPIC_LEN: usize = 128;

/// Maximum payload size of a queued publish command.
pub const MAX_COMMAND_PAYLOAD: usize = 256;

/// Capacity of the re-entrancy command queue.
pub const OUTBOX_DEPTH: usize = 8;

/// Outcome of a connection attempt, delivered with [`MqttEvent::Connected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectStatus {
    /// The broker accepted the connection.
    Accepted,
    /// The broker answered the CONNECT with a refusal.
    Refused(ConnectReturnCode),
    /// No CONNACK arrived within the configured connect timeout.
    Timeout,
    /// The transport failed or closed before the handshake completed.
    TransportFailed,
}

/// Why an in-flight request completed without success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestError {
    /// The broker rejected the request (SUBACK failure code).
    Rejected,
    /// The connection was torn down before the acknowledgement arrived.
    ConnectionLost,
    /// A queued command could not be encoded or tracked when it was drained.
    Overflow,
}

/// Events delivered to the application's [`SessionHandler`].
///
/// `C` is the caller-supplied context attached to each request; it is handed
/// back verbatim with the matching completion.
#[derive(Debug)]
pub enum MqttEvent<'a, C> {
    /// A connection attempt finished, successfully or not.
    Connected { status: ConnectStatus },
    /// A subscribe request completed. On success carries the granted QoS.
    Subscribed {
        topic: &'a str,
        context: C,
        result: Result<QoS, RequestError>,
    },
    /// A publish completed: acknowledged for QoS >= 1, synthesized locally
    /// for QoS 0 (fire-and-forget has nothing to wait for).
    Published {
        context: C,
        result: Result<(), RequestError>,
    },
    /// A message arrived. Topic and payload views are only valid for the
    /// duration of the callback; copy whatever must outlive it.
    Message(Publish<'a>),
    /// The session ended — gracefully or because the connection died. Any
    /// in-flight requests have already been failed individually.
    Disconnected,
}

/// The application callback. One handler per client, registered at creation.
///
/// Handlers must not block: they run inline on the session's thread of
/// control, and nothing else makes progress until they return.
pub trait SessionHandler<C> {
    fn on_event(&mut self, outbox: &mut Outbox<C>, event: MqttEvent<'_, C>);
}

/// A command queued from inside a callback, with owned copies of the data.
#[derive(Debug)]
pub(crate) enum Command<C> {
    Publish {
        topic: String<MAX_TOPIC_LEN>,
        payload: Vec<u8, MAX_COMMAND_PAYLOAD>,
        qos: QoS,
        retain: bool,
        context: C,
    },
    Subscribe {
        topic: String<MAX_TOPIC_LEN>,
        qos: QoS,
        context: C,
    },
    Disconnect,
}

/// Bounded queue of deferred session commands, handed to every callback.
///
/// Topic and payload are copied inline, so the originals only need to live
/// for the duration of the queueing call. Each method returns `false` when
/// the queue is full or the data does not fit the inline storage.
pub struct Outbox<C> {
    commands: Deque<Command<C>, OUTBOX_DEPTH>,
}

impl<C> Outbox<C> {
    pub(crate) fn new() -> Self {
        Self {
            commands: Deque::new(),
        }
    }

    /// Queue a publish to be issued after the callback returns.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
        context: C,
    ) -> bool {
        let Ok(topic) = String::try_from(topic) else {
            return false;
        };
        let Ok(payload) = Vec::from_slice(payload) else {
            return false;
        };
        self.commands
            .push_back(Command::Publish {
                topic,
                payload,
                qos,
                retain,
                context,
            })
            .is_ok()
    }

    /// Queue a subscribe to be issued after the callback returns.
    pub fn subscribe(&mut self, topic: &str, qos: QoS, context: C) -> bool {
        let Ok(topic) = String::try_from(topic) else {
            return false;
        };
        self.commands
            .push_back(Command::Subscribe {
                topic,
                qos,
                context,
            })
            .is_ok()
    }

    /// Queue a graceful disconnect.
    pub fn disconnect(&mut self) -> bool {
        self.commands.push_back(Command::Disconnect).is_ok()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub(crate) fn pop(&mut self) -> Option<Command<C>> {
        self.commands.pop_front()
    }
}
