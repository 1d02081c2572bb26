//! # Error Types
//!
//! Error types for the MQTT session client. Synchronous API errors
//! (`InvalidState`, `NotConnected`, capacity failures) are returned to the
//! caller directly; asynchronous failures (lost transport, refused or timed
//! out connect attempts) surface as session events instead.

use crate::transport::TransportError;

/// The primary error enum for the MQTT session client.
///
/// It is generic over the transport error type `T`, allowing it to wrap
/// specific errors from the underlying network transport (e.g., TCP over the
/// modem stack, UART).
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttError<T> {
    /// An error occurred in the underlying transport layer.
    Transport(T),
    /// A protocol-level error occurred, indicating a violation of the MQTT
    /// specification.
    Protocol(ProtocolError),
    /// The operation requires an established session and there is none.
    NotConnected,
    /// The operation is not valid in the session's current state, e.g. a
    /// second `connect` while a connection is already live.
    InvalidState,
    /// The TX buffer (or the destination buffer of an encode) cannot hold the
    /// packet.
    BufferTooSmall,
    /// The in-flight request table or a command queue is at capacity.
    QueueFull,
}

/// Allows automatic conversion of any transport error into an `MqttError`,
/// which is what makes the `?` operator work on transport results.
impl<T: TransportError> From<T> for MqttError<T> {
    fn from(err: T) -> Self {
        MqttError::Transport(err)
    }
}

impl<T: TransportError> MqttError<T> {
    /// Converts an `MqttError` carrying the placeholder transport error into
    /// one carrying the concrete transport error type `T`.
    ///
    /// Packet encode/decode functions are transport-agnostic and use
    /// [`crate::transport::ErrorPlaceHolder`]; the session bridges their
    /// results to its own error type with this method. Errors originating
    /// from packet logic never hold a transport error, so that arm is
    /// unreachable.
    pub fn cast_transport_error<E: TransportError>(other: MqttError<E>) -> MqttError<T> {
        match other {
            MqttError::Protocol(p) => MqttError::Protocol(p),
            MqttError::NotConnected => MqttError::NotConnected,
            MqttError::InvalidState => MqttError::InvalidState,
            MqttError::BufferTooSmall => MqttError::BufferTooSmall,
            MqttError::QueueFull => MqttError::QueueFull,
            MqttError::Transport(_) => panic!("Cannot cast a transport error"),
        }
    }
}

/// Return codes of a `CONNACK` packet, as defined by MQTT 3.1.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectReturnCode {
    /// The connection was accepted.
    Accepted,
    /// The broker does not support the requested MQTT protocol version.
    UnacceptableProtocolVersion,
    /// The client identifier is not valid.
    IdentifierRejected,
    /// The broker is unavailable.
    ServerUnavailable,
    /// The username or password is not valid.
    BadUserNameOrPassword,
    /// The client is not authorized to connect.
    NotAuthorized,
    /// A return code outside the range defined by the specification.
    Other(u8),
}

impl From<u8> for ConnectReturnCode {
    fn from(val: u8) -> Self {
        match val {
            0 => Self::Accepted,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            _ => Self::Other(val),
        }
    }
}

/// Specific MQTT protocol errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// A packet type the peer must not send (or an unknown type) was received.
    InvalidPacketType(u8),
    /// A packet was received that was not correctly formed.
    MalformedPacket,
    /// A field or packet exceeds the maximum encodable or bufferable size.
    PayloadTooLarge,
    /// A string field was not valid UTF-8.
    InvalidUtf8String,
}
