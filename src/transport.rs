//! # MQTT Transport Abstraction
//!
//! This module defines the `MqttTransport` trait, which abstracts the byte
//! stream the modem or network stack provides. The trait covers only the
//! outbound half of the stream — opening, sending, closing. Inbound bytes and
//! closure notifications travel the other way: the glue code that owns the
//! modem driver's callbacks pushes them into the session with
//! [`MqttClient::handle_incoming`](crate::client::MqttClient::handle_incoming)
//! and [`MqttClient::transport_closed`](crate::client::MqttClient::transport_closed).
//!
//! With the Rust 2024 Edition, this trait uses native `async fn`, removing the
//! need for the `#[async_trait]` macro.

use embassy_net::tcp::{ConnectError, Error as TcpError, TcpSocket};
use embassy_net::IpAddress;
use embassy_time::{Duration, Timer};
use embedded_io_async::Write;

/// A placeholder error type used in contexts where the actual transport error
/// is not known, such as in the `EncodePacket` trait.
#[derive(Debug, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorPlaceHolder;

impl TransportError for ErrorPlaceHolder {}

/// A marker trait for transport-related errors.
pub trait TransportError: core::fmt::Debug {}

/// A byte-stream transport carrying MQTT packets.
#[allow(async_fn_in_trait)]
pub trait MqttTransport {
    /// The error type returned by the transport.
    type Error: TransportError;

    /// Opens a stream to `host:port`.
    async fn open(&mut self, host: &str, port: u16) -> Result<(), Self::Error>;

    /// Sends a buffer of data over the transport.
    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error>;

    /// Closes the stream. Closing an already-closed stream is a no-op.
    async fn close(&mut self);
}

/// Errors of the bundled [`TcpTransport`].
#[derive(Debug)]
pub enum TcpTransportError {
    /// The host string is not an IPv4 literal. Name resolution belongs to the
    /// modem driver, which hands the session a resolved address.
    InvalidHost,
    /// The TCP connection could not be established.
    Connect(ConnectError),
    /// A send on the socket failed.
    Io(TcpError),
    /// The connection attempt did not complete within the configured timeout.
    Timeout,
}

impl TransportError for TcpTransportError {}

/// TCP transport implementation using `embassy-net`.
pub struct TcpTransport<'a> {
    socket: TcpSocket<'a>,
    open_timeout: Duration,
}

impl<'a> TcpTransport<'a> {
    /// Creates a new `TcpTransport` with the given socket and open timeout.
    pub fn new(socket: TcpSocket<'a>, open_timeout: Duration) -> Self {
        Self {
            socket,
            open_timeout,
        }
    }
}

impl<'a> MqttTransport for TcpTransport<'a> {
    type Error = TcpTransportError;

    async fn open(&mut self, host: &str, port: u16) -> Result<(), Self::Error> {
        let addr: core::net::Ipv4Addr =
            host.parse().map_err(|_| TcpTransportError::InvalidHost)?;
        let endpoint = (IpAddress::Ipv4(addr), port);

        // Race the connect against a timer, as the modem link can stall for
        // a long time without ever reporting failure. The select borrows the
        // socket, so its outcome is extracted before the socket is touched
        // again.
        let outcome = {
            let connect = self.socket.connect(endpoint);
            let timer = Timer::after(self.open_timeout);
            match futures::future::select(core::pin::pin!(connect), core::pin::pin!(timer)).await {
                futures::future::Either::Left((result, _)) => Some(result),
                futures::future::Either::Right(((), _)) => None,
            }
        };
        match outcome {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(TcpTransportError::Connect(e)),
            None => {
                self.socket.abort();
                Err(TcpTransportError::Timeout)
            }
        }
    }

    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        self.socket
            .write_all(buf)
            .await
            .map_err(TcpTransportError::Io)?;
        // Flush so the bytes actually reach the network, not just the socket
        // buffer.
        self.socket.flush().await.map_err(TcpTransportError::Io)
    }

    async fn close(&mut self) {
        self.socket.close();
    }
}
