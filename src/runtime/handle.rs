//! Cross-task publish requests.
//!
//! Only the session task may touch the [`MqttClient`](crate::MqttClient);
//! other firmware tasks (sensor loops, shell, OTA) publish by queueing owned
//! requests on a channel. The session task drains the channel between
//! driving calls and forwards each request to the client.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use heapless::{String, Vec};

use crate::event::{MAX_COMMAND_PAYLOAD, MAX_TOPIC_LEN};
use crate::packet::QoS;

/// An owned publish request, carrying the context that will come back with
/// the `Published` completion event.
#[derive(Debug, Clone)]
pub struct PublishRequest<C> {
    pub topic: String<MAX_TOPIC_LEN>,
    pub payload: Vec<u8, MAX_COMMAND_PAYLOAD>,
    pub qos: QoS,
    pub retain: bool,
    pub context: C,
}

impl<C> PublishRequest<C> {
    /// Builds a request by copying topic and payload inline. Returns `None`
    /// when either does not fit the inline storage.
    pub fn new(topic: &str, payload: &[u8], qos: QoS, retain: bool, context: C) -> Option<Self> {
        let topic = String::try_from(topic).ok()?;
        let payload = Vec::from_slice(payload).ok()?;
        Some(Self {
            topic,
            payload,
            qos,
            retain,
            context,
        })
    }
}

pub type PublishRequestChannel<C, const DEPTH: usize> =
    Channel<CriticalSectionRawMutex, PublishRequest<C>, DEPTH>;

pub type PublishRequestSender<'a, C, const DEPTH: usize> =
    Sender<'a, CriticalSectionRawMutex, PublishRequest<C>, DEPTH>;

pub type PublishRequestReceiver<'a, C, const DEPTH: usize> =
    Receiver<'a, CriticalSectionRawMutex, PublishRequest<C>, DEPTH>;

/// A handle that lets a task publish MQTT messages without access to the
/// client. Cheap to copy and pass to multiple tasks.
pub struct PublisherHandle<'a, C, const DEPTH: usize> {
    tx: PublishRequestSender<'a, C, DEPTH>,
}

impl<'a, C, const DEPTH: usize> Clone for PublisherHandle<'a, C, DEPTH> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, C, const DEPTH: usize> Copy for PublisherHandle<'a, C, DEPTH> {}

impl<'a, C, const DEPTH: usize> PublisherHandle<'a, C, DEPTH> {
    /// Creates a new `PublisherHandle` from a channel sender.
    pub fn new(tx: PublishRequestSender<'a, C, DEPTH>) -> Self {
        Self { tx }
    }

    /// Publish a message, waiting if the channel is full.
    ///
    /// Returns `false` when topic or payload exceed the inline storage.
    pub async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
        context: C,
    ) -> bool {
        match PublishRequest::new(topic, payload, qos, retain, context) {
            Some(req) => {
                self.tx.send(req).await;
                true
            }
            None => false,
        }
    }

    /// Try to publish without waiting. Returns `false` if the channel is
    /// full or the data does not fit.
    pub fn try_publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
        context: C,
    ) -> bool {
        match PublishRequest::new(topic, payload, qos, retain, context) {
            Some(req) => self.tx.try_send(req).is_ok(),
            None => false,
        }
    }
}
