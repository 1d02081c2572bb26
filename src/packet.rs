//! # MQTT Packet Structures and Serialization
//!
//! This module defines the MQTT 3.1.1 control packet types and the traits for
//! encoding and decoding them to and from byte buffers. Only the packets a
//! client exchanges are modeled: the encoders cover the client-to-broker
//! direction, the [`decode`] dispatcher the broker-to-client direction.

use crate::error::{ConnectReturnCode, MqttError, ProtocolError};
use crate::transport::ErrorPlaceHolder;
use crate::util::{self, read_utf8_string, write_binary, write_utf8_string};
use heapless::Vec;

/// Represents the Quality of Service (QoS) levels for MQTT messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    pub(crate) fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

/// A trait for packets that can be encoded into a byte buffer.
pub trait EncodePacket {
    /// Encodes the packet into `buf`, returning the number of bytes written.
    fn encode(&self, buf: &mut [u8]) -> Result<usize, MqttError<ErrorPlaceHolder>>;
}

/// A trait for packets that can be decoded from a complete packet buffer.
pub trait DecodePacket<'a>: Sized {
    fn decode(buf: &'a [u8]) -> Result<Self, MqttError<ErrorPlaceHolder>>;
}

/// The fixed header at the start of every control packet.
///
/// [`FixedHeader::parse`] supports incremental reads: `Ok(None)` means the
/// buffer does not yet hold enough bytes to frame the packet, which is
/// distinct from a malformed length encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FixedHeader {
    /// Control packet type (the high nibble of the first byte).
    pub packet_type: u8,
    /// Type-specific flags (the low nibble of the first byte).
    pub flags: u8,
    /// Number of bytes following the fixed header.
    pub remaining_len: usize,
    /// Length of the fixed header itself (first byte plus length bytes).
    pub header_len: usize,
}

impl FixedHeader {
    pub fn parse(buf: &[u8]) -> Result<Option<FixedHeader>, MqttError<ErrorPlaceHolder>> {
        let Some(first) = buf.first() else {
            return Ok(None);
        };
        match util::read_remaining_length(&buf[1..])? {
            Some((remaining_len, len_bytes)) => Ok(Some(FixedHeader {
                packet_type: first >> 4,
                flags: first & 0x0F,
                remaining_len,
                header_len: 1 + len_bytes,
            })),
            None => Ok(None),
        }
    }

    /// Total size of the packet this header describes.
    pub fn packet_len(&self) -> usize {
        self.header_len + self.remaining_len
    }
}

/// An enumeration of the control packets a broker sends to a client.
#[derive(Debug)]
pub enum MqttPacket<'a> {
    ConnAck(ConnAck),
    Publish(Publish<'a>),
    PubAck(PubAck),
    PubRec(PubRec),
    PubRel(PubRel),
    PubComp(PubComp),
    SubAck(SubAck),
    PingResp,
}

/// Decodes one complete, exactly-framed packet buffer into an [`MqttPacket`].
///
/// Packet types that only ever travel client-to-broker (CONNECT, SUBSCRIBE,
/// PINGREQ, DISCONNECT) are rejected as `InvalidPacketType`.
pub fn decode(buf: &[u8]) -> Result<MqttPacket<'_>, MqttError<ErrorPlaceHolder>> {
    let packet_type = buf
        .first()
        .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?
        >> 4;
    let packet = match packet_type {
        2 => MqttPacket::ConnAck(ConnAck::decode(buf)?),
        3 => MqttPacket::Publish(Publish::decode(buf)?),
        4 => MqttPacket::PubAck(PubAck::decode(buf)?),
        5 => MqttPacket::PubRec(PubRec::decode(buf)?),
        6 => MqttPacket::PubRel(PubRel::decode(buf)?),
        7 => MqttPacket::PubComp(PubComp::decode(buf)?),
        9 => MqttPacket::SubAck(SubAck::decode(buf)?),
        13 => MqttPacket::PingResp,
        _ => {
            return Err(MqttError::Protocol(ProtocolError::InvalidPacketType(
                packet_type,
            )));
        }
    };
    Ok(packet)
}

fn put_u8(buf: &mut [u8], cursor: &mut usize, val: u8) -> Result<(), MqttError<ErrorPlaceHolder>> {
    *buf.get_mut(*cursor).ok_or(MqttError::BufferTooSmall)? = val;
    *cursor += 1;
    Ok(())
}

fn put_u16(
    buf: &mut [u8],
    cursor: &mut usize,
    val: u16,
) -> Result<(), MqttError<ErrorPlaceHolder>> {
    let slice = buf
        .get_mut(*cursor..*cursor + 2)
        .ok_or(MqttError::BufferTooSmall)?;
    slice.copy_from_slice(&val.to_be_bytes());
    *cursor += 2;
    Ok(())
}

fn put_slice(
    buf: &mut [u8],
    cursor: &mut usize,
    data: &[u8],
) -> Result<(), MqttError<ErrorPlaceHolder>> {
    let slice = buf
        .get_mut(*cursor..*cursor + data.len())
        .ok_or(MqttError::BufferTooSmall)?;
    slice.copy_from_slice(data);
    *cursor += data.len();
    Ok(())
}

/// Writes the remaining-length field reserved at `remaining_len_pos` and
/// compacts the packet content down onto it, returning the final packet size.
///
/// Encoders reserve 4 bytes for the length up front because its width is only
/// known once the content length is.
fn finish_packet(
    buf: &mut [u8],
    remaining_len_pos: usize,
    content_start: usize,
    content_end: usize,
) -> Result<usize, MqttError<ErrorPlaceHolder>> {
    let remaining_len = content_end - content_start;
    let len_bytes = util::write_variable_byte_integer_len(&mut buf[remaining_len_pos..], remaining_len)?;
    let header_len = remaining_len_pos + len_bytes;
    buf.copy_within(content_start..content_end, header_len);
    Ok(header_len + remaining_len)
}

// --- CONNECT ---

/// An optional "last will" message registered at connect time.
#[derive(Debug, Clone, Copy)]
pub struct Will<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
}

/// A CONNECT packet. The session is always requested as a clean session;
/// persistent sessions are not supported.
#[derive(Debug)]
pub struct Connect<'a> {
    pub client_id: &'a str,
    pub keep_alive: u16,
    pub username: Option<&'a str>,
    pub password: Option<&'a [u8]>,
    pub will: Option<Will<'a>>,
}

impl<'a> EncodePacket for Connect<'a> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, MqttError<ErrorPlaceHolder>> {
        // A password without a username is not encodable in 3.1.1.
        if self.password.is_some() && self.username.is_none() {
            return Err(MqttError::Protocol(ProtocolError::MalformedPacket));
        }

        let mut cursor = 0;
        put_u8(buf, &mut cursor, 0x10)?;
        let remaining_len_pos = cursor;
        cursor += 4;
        let content_start = cursor;

        cursor += write_utf8_string(buf.get_mut(cursor..).ok_or(MqttError::BufferTooSmall)?, "MQTT")?;
        put_u8(buf, &mut cursor, 4)?; // protocol level: MQTT 3.1.1

        let mut flags = 0x02; // clean session
        if let Some(will) = &self.will {
            flags |= 0x04 | ((will.qos as u8) << 3);
            if will.retain {
                flags |= 0x20;
            }
        }
        if self.password.is_some() {
            flags |= 0x40;
        }
        if self.username.is_some() {
            flags |= 0x80;
        }
        put_u8(buf, &mut cursor, flags)?;
        put_u16(buf, &mut cursor, self.keep_alive)?;

        cursor += write_utf8_string(
            buf.get_mut(cursor..).ok_or(MqttError::BufferTooSmall)?,
            self.client_id,
        )?;
        if let Some(will) = &self.will {
            cursor += write_utf8_string(
                buf.get_mut(cursor..).ok_or(MqttError::BufferTooSmall)?,
                will.topic,
            )?;
            cursor += write_binary(
                buf.get_mut(cursor..).ok_or(MqttError::BufferTooSmall)?,
                will.payload,
            )?;
        }
        if let Some(username) = self.username {
            cursor += write_utf8_string(
                buf.get_mut(cursor..).ok_or(MqttError::BufferTooSmall)?,
                username,
            )?;
        }
        if let Some(password) = self.password {
            cursor += write_binary(
                buf.get_mut(cursor..).ok_or(MqttError::BufferTooSmall)?,
                password,
            )?;
        }

        finish_packet(buf, remaining_len_pos, content_start, cursor)
    }
}

// --- CONNACK ---

/// A CONNACK packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnAck {
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

impl<'a> DecodePacket<'a> for ConnAck {
    fn decode(buf: &'a [u8]) -> Result<Self, MqttError<ErrorPlaceHolder>> {
        let header = FixedHeader::parse(buf)?
            .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?;
        if header.remaining_len < 2 {
            return Err(MqttError::Protocol(ProtocolError::MalformedPacket));
        }
        let ack_flags = *buf
            .get(header.header_len)
            .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?;
        let return_code = *buf
            .get(header.header_len + 1)
            .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?;
        Ok(ConnAck {
            session_present: (ack_flags & 0x01) != 0,
            return_code: ConnectReturnCode::from(return_code),
        })
    }
}

// --- PUBLISH ---

/// A PUBLISH packet, in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Publish<'a> {
    pub topic: &'a str,
    pub qos: QoS,
    pub retain: bool,
    pub payload: &'a [u8],
    /// Present if and only if `qos` is at least `AtLeastOnce`.
    pub packet_id: Option<u16>,
}

impl<'a> DecodePacket<'a> for Publish<'a> {
    fn decode(buf: &'a [u8]) -> Result<Self, MqttError<ErrorPlaceHolder>> {
        let header = FixedHeader::parse(buf)?
            .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?;
        let qos = QoS::from_bits((header.flags >> 1) & 0x03)
            .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?;
        let retain = (header.flags & 0x01) != 0;

        let end = header.packet_len();
        if buf.len() < end {
            return Err(MqttError::Protocol(ProtocolError::MalformedPacket));
        }
        let mut cursor = header.header_len;
        let topic = read_utf8_string(&mut cursor, buf)?;

        let packet_id = if qos != QoS::AtMostOnce {
            let id = u16::from_be_bytes(
                buf.get(cursor..cursor + 2)
                    .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?
                    .try_into()
                    .unwrap(),
            );
            cursor += 2;
            Some(id)
        } else {
            None
        };

        let payload = buf
            .get(cursor..end)
            .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?;

        Ok(Publish {
            topic,
            qos,
            retain,
            payload,
            packet_id,
        })
    }
}

impl<'a> EncodePacket for Publish<'a> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, MqttError<ErrorPlaceHolder>> {
        let mut cursor = 0;
        let mut flags = (self.qos as u8) << 1;
        if self.retain {
            flags |= 0x01;
        }
        put_u8(buf, &mut cursor, 0x30 | flags)?;
        let remaining_len_pos = cursor;
        cursor += 4;
        let content_start = cursor;

        cursor += write_utf8_string(
            buf.get_mut(cursor..).ok_or(MqttError::BufferTooSmall)?,
            self.topic,
        )?;
        if self.qos != QoS::AtMostOnce {
            let id = self
                .packet_id
                .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?;
            put_u16(buf, &mut cursor, id)?;
        }
        put_slice(buf, &mut cursor, self.payload)?;

        finish_packet(buf, remaining_len_pos, content_start, cursor)
    }
}

// --- PUBACK / PUBREC / PUBREL / PUBCOMP ---

fn decode_ack(buf: &[u8]) -> Result<u16, MqttError<ErrorPlaceHolder>> {
    let header =
        FixedHeader::parse(buf)?.ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?;
    if header.remaining_len < 2 {
        return Err(MqttError::Protocol(ProtocolError::MalformedPacket));
    }
    let id = u16::from_be_bytes(
        buf.get(header.header_len..header.header_len + 2)
            .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?
            .try_into()
            .unwrap(),
    );
    Ok(id)
}

fn encode_ack(
    buf: &mut [u8],
    first_byte: u8,
    packet_id: u16,
) -> Result<usize, MqttError<ErrorPlaceHolder>> {
    let mut cursor = 0;
    put_u8(buf, &mut cursor, first_byte)?;
    put_u8(buf, &mut cursor, 0x02)?;
    put_u16(buf, &mut cursor, packet_id)?;
    Ok(cursor)
}

/// A PUBACK packet (QoS 1 acknowledgement).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PubAck {
    pub packet_id: u16,
}

impl<'a> DecodePacket<'a> for PubAck {
    fn decode(buf: &'a [u8]) -> Result<Self, MqttError<ErrorPlaceHolder>> {
        Ok(PubAck {
            packet_id: decode_ack(buf)?,
        })
    }
}

impl EncodePacket for PubAck {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, MqttError<ErrorPlaceHolder>> {
        encode_ack(buf, 0x40, self.packet_id)
    }
}

/// A PUBREC packet (QoS 2 handshake, step one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PubRec {
    pub packet_id: u16,
}

impl<'a> DecodePacket<'a> for PubRec {
    fn decode(buf: &'a [u8]) -> Result<Self, MqttError<ErrorPlaceHolder>> {
        Ok(PubRec {
            packet_id: decode_ack(buf)?,
        })
    }
}

impl EncodePacket for PubRec {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, MqttError<ErrorPlaceHolder>> {
        encode_ack(buf, 0x50, self.packet_id)
    }
}

/// A PUBREL packet (QoS 2 handshake, step two). Carries the reserved flag
/// bits mandated by the specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PubRel {
    pub packet_id: u16,
}

impl<'a> DecodePacket<'a> for PubRel {
    fn decode(buf: &'a [u8]) -> Result<Self, MqttError<ErrorPlaceHolder>> {
        Ok(PubRel {
            packet_id: decode_ack(buf)?,
        })
    }
}

impl EncodePacket for PubRel {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, MqttError<ErrorPlaceHolder>> {
        encode_ack(buf, 0x62, self.packet_id)
    }
}

/// A PUBCOMP packet (QoS 2 handshake, final step).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PubComp {
    pub packet_id: u16,
}

impl<'a> DecodePacket<'a> for PubComp {
    fn decode(buf: &'a [u8]) -> Result<Self, MqttError<ErrorPlaceHolder>> {
        Ok(PubComp {
            packet_id: decode_ack(buf)?,
        })
    }
}

impl EncodePacket for PubComp {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, MqttError<ErrorPlaceHolder>> {
        encode_ack(buf, 0x70, self.packet_id)
    }
}

// --- SUBSCRIBE ---

/// A SUBSCRIBE packet carrying a single topic filter.
#[derive(Debug)]
pub struct Subscribe<'a> {
    pub packet_id: u16,
    pub topic: &'a str,
    pub qos: QoS,
}

impl<'a> EncodePacket for Subscribe<'a> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, MqttError<ErrorPlaceHolder>> {
        if self.packet_id == 0 {
            return Err(MqttError::Protocol(ProtocolError::MalformedPacket));
        }
        let mut cursor = 0;
        put_u8(buf, &mut cursor, 0x82)?;
        let remaining_len_pos = cursor;
        cursor += 4;
        let content_start = cursor;

        put_u16(buf, &mut cursor, self.packet_id)?;
        cursor += write_utf8_string(
            buf.get_mut(cursor..).ok_or(MqttError::BufferTooSmall)?,
            self.topic,
        )?;
        put_u8(buf, &mut cursor, self.qos as u8)?;

        finish_packet(buf, remaining_len_pos, content_start, cursor)
    }
}

// --- SUBACK ---

/// Return code a broker uses in SUBACK to reject a subscription.
pub const SUBACK_FAILURE: u8 = 0x80;

/// A SUBACK packet.
#[derive(Debug)]
pub struct SubAck {
    pub packet_id: u16,
    /// One code per requested topic: 0x00-0x02 is the granted QoS, 0x80 a
    /// failure.
    pub return_codes: Vec<u8, 8>,
}

impl<'a> DecodePacket<'a> for SubAck {
    fn decode(buf: &'a [u8]) -> Result<Self, MqttError<ErrorPlaceHolder>> {
        let header = FixedHeader::parse(buf)?
            .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?;
        if header.remaining_len < 3 {
            return Err(MqttError::Protocol(ProtocolError::MalformedPacket));
        }
        let end = header.packet_len();
        if buf.len() < end {
            return Err(MqttError::Protocol(ProtocolError::MalformedPacket));
        }
        let mut cursor = header.header_len;
        let packet_id = u16::from_be_bytes([buf[cursor], buf[cursor + 1]]);
        cursor += 2;

        let mut return_codes = Vec::new();
        while cursor < end {
            // Codes past the vec capacity are dropped; a single-topic client
            // only ever needs the first.
            let _ = return_codes.push(buf[cursor]);
            cursor += 1;
        }
        Ok(SubAck {
            packet_id,
            return_codes,
        })
    }
}

// --- PINGREQ / DISCONNECT ---

/// A PINGREQ packet.
#[derive(Debug)]
pub struct PingReq;

impl EncodePacket for PingReq {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, MqttError<ErrorPlaceHolder>> {
        if buf.len() < 2 {
            return Err(MqttError::BufferTooSmall);
        }
        buf[0] = 0xC0;
        buf[1] = 0x00;
        Ok(2)
    }
}

/// A DISCONNECT packet.
#[derive(Debug)]
pub struct Disconnect;

impl EncodePacket for Disconnect {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, MqttError<ErrorPlaceHolder>> {
        if buf.len() < 2 {
            return Err(MqttError::BufferTooSmall);
        }
        buf[0] = 0xE0;
        buf[1] = 0x00;
        Ok(2)
    }
}
