//! # Event-Driven MQTT Session Client for Modem-Backed Firmware
//!
//! `modem-mqtt` is a `no_std`, no-alloc MQTT 3.1.1 client for devices whose
//! network path runs through a cellular or Wi-Fi modem stack. The modem
//! driver supplies a byte stream (open, send, inbound-data and closure
//! notifications); this crate supplies everything between that stream and the
//! application: packet framing and codecs, the session lifecycle state
//! machine, in-flight request tracking, keep-alive, and a single callback
//! through which the application observes every asynchronous outcome.
//!
//! ## Core Features
//!
//! - **`no_std` & no-alloc:** buffers are `heapless` types sized by const
//!   generics; the client owns its TX/RX buffers and in-flight table for its
//!   entire lifetime.
//! - **Push-driven:** the firmware's session task feeds inbound bytes, time
//!   and closure notifications into the client; no operation blocks on a
//!   network round trip. Completions arrive as [`MqttEvent`]s.
//! - **Transport agnostic:** the [`MqttTransport`] trait covers any reliable
//!   ordered byte stream — the modem's TCP sockets, a TLS wrapper, or the
//!   bundled `embassy-net` [`TcpTransport`].
//! - **Policy-free core:** reconnecting is an application decision. The
//!   [`runtime`] module carries the usual backoff policy as a separate layer
//!   on top of the `Disconnected` event.
//!
//! ## Usage sketch
//!
//! ```ignore
//! struct App;
//!
//! impl SessionHandler<u32> for App {
//!     fn on_event(&mut self, outbox: &mut Outbox<u32>, event: MqttEvent<'_, u32>) {
//!         match event {
//!             MqttEvent::Connected { status: ConnectStatus::Accepted } => {
//!                 outbox.subscribe("device/cmd", QoS::AtMostOnce, 1);
//!             }
//!             MqttEvent::Message(msg) => {
//!                 // topic/payload views are valid for this call only
//!             }
//!             _ => {}
//!         }
//!     }
//! }
//!
//! let mut client: MqttClient<_, _, u32, 256, 128, 8> =
//!     MqttClient::new(transport, App, MqttOptions::default());
//! client.connect("198.51.100.7", 1883, &ConnectOptions::new("dev-01"), now).await?;
//! // then per iteration of the session task:
//! //   client.handle_incoming(&bytes, now).await   on modem data
//! //   client.transport_closed()                   on modem closure
//! //   client.tick(now).await                      when next_deadline() passes
//! ```

#![cfg_attr(not(test), no_std)]

pub mod client;
pub mod error;
pub mod event;
pub mod packet;
pub mod runtime;
pub mod transport;
pub mod util;

// Re-export key types for easier access at the crate root.
pub use client::{ConnectOptions, MqttClient, MqttOptions, SessionState};
pub use error::{ConnectReturnCode, MqttError, ProtocolError};
pub use event::{ConnectStatus, MqttEvent, Outbox, RequestError, SessionHandler};
pub use packet::{Publish, QoS, Will};
pub use transport::{MqttTransport, TcpTransport, TransportError};
