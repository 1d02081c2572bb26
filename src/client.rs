//! # MQTT Session State Machine
//!
//! [`MqttClient`] owns the whole lifecycle of one MQTT session: connecting,
//! tracking in-flight subscribe/publish requests, answering inbound traffic,
//! keep-alive pings, and deterministic teardown. It is a push-driven state
//! machine: the firmware's session task feeds it inbound bytes
//! ([`handle_incoming`](MqttClient::handle_incoming)), closure notifications
//! ([`transport_closed`](MqttClient::transport_closed)) and time
//! ([`tick`](MqttClient::tick)), and issues commands between those calls.
//!
//! No method blocks waiting for the network: commands return once their bytes
//! are handed to the transport, and completion arrives later through the
//! registered [`SessionHandler`]. All driving methods take `&mut self`, so the
//! serialization the session needs is enforced by the borrow checker rather
//! than a lock; the client never reads the clock itself — every entry point
//! takes `now`, which keeps the machine deterministic under test.
//!
//! The session performs no automatic reconnect. Retry policy lives above the
//! client, built on the `Disconnected` event (see [`crate::runtime`]).

use embassy_time::{Duration, Instant};
use heapless::{String, Vec};

use crate::error::{ConnectReturnCode, MqttError};
use crate::event::{
    Command, ConnectStatus, MAX_TOPIC_LEN, MqttEvent, Outbox, RequestError, SessionHandler,
};
use crate::packet::{
    self, ConnAck, Connect, Disconnect, EncodePacket, FixedHeader, MqttPacket, PingReq, PubAck,
    PubComp, PubRec, PubRel, Publish, QoS, SUBACK_FAILURE, Subscribe, Will,
};
use crate::transport::MqttTransport;

/// Client-level configuration, fixed for the lifetime of the client.
#[derive(Debug, Clone)]
pub struct MqttOptions {
    /// How long to wait for the broker's CONNACK before giving up on a
    /// connection attempt.
    pub connect_timeout: Duration,
}

impl Default for MqttOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// The immutable per-connection snapshot handed to [`MqttClient::connect`].
///
/// Only the client identifier is required; everything else is optional, as in
/// the underlying protocol.
#[derive(Debug, Clone)]
pub struct ConnectOptions<'a> {
    /// The client identifier, must be unique per broker.
    pub client_id: &'a str,
    /// Keep-alive interval in seconds; 0 disables keep-alive.
    pub keep_alive_seconds: u16,
    /// Optional username. Required if a password is given.
    pub username: Option<&'a str>,
    /// Optional password.
    pub password: Option<&'a [u8]>,
    /// Optional last-will message.
    pub will: Option<Will<'a>>,
}

impl<'a> ConnectOptions<'a> {
    pub fn new(client_id: &'a str) -> Self {
        Self {
            client_id,
            keep_alive_seconds: 0,
            username: None,
            password: None,
            will: None,
        }
    }
}

/// The connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    /// No transport connection. The only state `connect` is valid in.
    Idle,
    /// CONNECT sent, waiting for CONNACK.
    Connecting,
    /// Session established; subscribe/publish/disconnect are valid.
    Connected,
    /// DISCONNECT queued, teardown in progress.
    Disconnecting,
}

/// What a pending request is waiting for.
#[derive(Debug)]
enum PendingKind {
    /// SUBSCRIBE sent, awaiting SUBACK.
    Subscribe { topic: String<MAX_TOPIC_LEN> },
    /// QoS 1 PUBLISH sent, awaiting PUBACK.
    PublishAck,
    /// QoS 2 PUBLISH sent, awaiting PUBREC.
    PublishRec,
    /// PUBREL sent, awaiting PUBCOMP.
    PublishComp,
}

/// An in-flight request awaiting acknowledgement.
#[derive(Debug)]
struct Pending<C> {
    packet_id: u16,
    kind: PendingKind,
    context: C,
}

/// An MQTT 3.1.1 session client.
///
/// Type parameters: `T` is the transport, `H` the event handler, `C` the
/// opaque per-request context type returned with completions. `TX`/`RX` size
/// the staging buffers in bytes, `INFLIGHT` bounds the number of
/// unacknowledged requests.
pub struct MqttClient<T, H, C, const TX: usize, const RX: usize, const INFLIGHT: usize>
where
    T: MqttTransport,
    H: SessionHandler<C>,
    C: Copy,
{
    transport: T,
    handler: H,
    outbox: Outbox<C>,
    options: MqttOptions,
    state: SessionState,
    keep_alive: Duration,
    connect_deadline: Option<Instant>,
    ping_deadline: Option<Instant>,
    last_send: Option<Instant>,
    next_packet_id: u16,
    pending: Vec<Pending<C>, INFLIGHT>,
    rx: Vec<u8, RX>,
    tx: Vec<u8, TX>,
    close_pending: bool,
}

impl<T, H, C, const TX: usize, const RX: usize, const INFLIGHT: usize>
    MqttClient<T, H, C, TX, RX, INFLIGHT>
where
    T: MqttTransport,
    H: SessionHandler<C>,
    C: Copy,
{
    /// Creates a new client in the `Idle` state. The handler stays registered
    /// for the lifetime of the client.
    pub fn new(transport: T, handler: H, options: MqttOptions) -> Self {
        Self {
            transport,
            handler,
            outbox: Outbox::new(),
            options,
            state: SessionState::Idle,
            keep_alive: Duration::from_secs(0),
            connect_deadline: None,
            ping_deadline: None,
            last_send: None,
            next_packet_id: 1,
            pending: Vec::new(),
            rx: Vec::new(),
            tx: Vec::new(),
            close_pending: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Number of requests currently awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Opens the transport and starts the MQTT handshake.
    ///
    /// Valid only while `Idle`; a second connect while a connection is live
    /// fails with `InvalidState` and leaves the first connection untouched.
    /// A transport that cannot be opened is reported synchronously; once the
    /// CONNECT packet is on the wire, the outcome arrives as a
    /// `Connected { status }` event (accepted, refused, or timed out).
    pub async fn connect(
        &mut self,
        host: &str,
        port: u16,
        options: &ConnectOptions<'_>,
        now: Instant,
    ) -> Result<(), MqttError<T::Error>> {
        if self.state != SessionState::Idle {
            return Err(MqttError::InvalidState);
        }
        self.transport
            .open(host, port)
            .await
            .map_err(MqttError::Transport)?;

        let connect = Connect {
            client_id: options.client_id,
            keep_alive: options.keep_alive_seconds,
            username: options.username,
            password: options.password,
            will: options.will,
        };
        if let Err(e) = self.queue_packet(&connect) {
            self.transport.close().await;
            return Err(e);
        }

        #[cfg(feature = "log")]
        log::debug!(
            "connecting to {}:{} as {:?}",
            host,
            port,
            options.client_id
        );

        self.state = SessionState::Connecting;
        self.connect_deadline = Some(now + self.options.connect_timeout);
        self.keep_alive = Duration::from_secs(options.keep_alive_seconds as u64);
        self.pump(now).await;
        Ok(())
    }

    /// Subscribes to a single topic filter. Valid only while `Connected`.
    ///
    /// Returns the allocated packet identifier; the outcome arrives later as
    /// a `Subscribed` event carrying `context`.
    pub async fn subscribe(
        &mut self,
        topic: &str,
        qos: QoS,
        context: C,
        now: Instant,
    ) -> Result<u16, MqttError<T::Error>> {
        let id = self.subscribe_inner(topic, qos, context)?;
        self.pump(now).await;
        Ok(id)
    }

    /// Publishes a message. Valid only while `Connected`.
    ///
    /// QoS 0 is fire-and-forget: the message is sent and a `Published` event
    /// with an `Ok` result is synthesized immediately, trading delivery
    /// guarantees for throughput; `Ok(None)` is returned. For QoS 1 and 2 the
    /// returned packet identifier is tracked until the broker acknowledges
    /// it, and the `Published` event carries the real outcome.
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
        context: C,
        now: Instant,
    ) -> Result<Option<u16>, MqttError<T::Error>> {
        let id = self.publish_inner(topic, payload, qos, retain, context)?;
        self.pump(now).await;
        Ok(id)
    }

    /// Gracefully ends the session: sends DISCONNECT, fails any requests
    /// still in flight, closes the transport and emits `Disconnected`.
    /// Valid only while `Connected`.
    pub async fn disconnect(&mut self, now: Instant) -> Result<(), MqttError<T::Error>> {
        self.disconnect_inner()?;
        self.pump(now).await;
        Ok(())
    }

    /// Feeds bytes received from the transport into the session.
    ///
    /// Partial packets are buffered until the rest arrives; complete packets
    /// are handled immediately, dispatching events inline. Ignored while
    /// `Idle`.
    pub async fn handle_incoming(&mut self, data: &[u8], now: Instant) {
        if self.state == SessionState::Idle {
            return;
        }
        if self.rx.extend_from_slice(data).is_err() {
            // The frame can never be buffered, so waiting would livelock.
            #[cfg(feature = "log")]
            log::warn!("rx buffer overflow, tearing session down");
            self.teardown(true, ConnectStatus::TransportFailed);
            self.pump(now).await;
            return;
        }
        self.process_rx();
        self.pump(now).await;
    }

    /// Notifies the session that the transport reported closure or failure.
    ///
    /// Every in-flight request completes with `ConnectionLost`, then exactly
    /// one `Disconnected` event follows (or a failed `Connected` event if the
    /// handshake was still in progress). The client returns to `Idle` and a
    /// fresh `connect` is permitted — typically decided by the application
    /// from within the event.
    pub fn transport_closed(&mut self) {
        if self.state == SessionState::Idle {
            return;
        }
        self.teardown(false, ConnectStatus::TransportFailed);
        // No transport work can remain; commands the teardown callbacks
        // queued complete (as failures) right here.
        self.drain_outbox();
    }

    /// Drives the session timers: the connect-ack deadline, keep-alive pings
    /// and the ping grace window. Call whenever [`next_deadline`] passes.
    ///
    /// [`next_deadline`]: MqttClient::next_deadline
    pub async fn tick(&mut self, now: Instant) {
        match self.state {
            SessionState::Connecting => {
                if self.connect_deadline.is_some_and(|d| now >= d) {
                    #[cfg(feature = "log")]
                    log::warn!("no CONNACK within the connect timeout");
                    self.teardown(true, ConnectStatus::Timeout);
                }
            }
            SessionState::Connected => {
                if self.ping_deadline.is_some_and(|d| now >= d) {
                    #[cfg(feature = "log")]
                    log::warn!("keep-alive grace window elapsed, connection dead");
                    self.teardown(true, ConnectStatus::TransportFailed);
                } else if self.keep_alive.as_ticks() > 0
                    && self.ping_deadline.is_none()
                    && self.last_send.is_some_and(|t| now - t >= self.keep_alive)
                {
                    #[cfg(feature = "log")]
                    log::trace!("keep-alive ping");
                    if self.queue_or_teardown(&PingReq) {
                        // Half the interval past the ping makes 1.5x the
                        // keep-alive from the last packet sent.
                        let grace = Duration::from_ticks(self.keep_alive.as_ticks() / 2);
                        self.ping_deadline = Some(now + grace);
                    }
                }
            }
            _ => {}
        }
        self.pump(now).await;
    }

    /// The earliest instant at which [`tick`](MqttClient::tick) has work to
    /// do, if any. Lets the driving loop sleep precisely instead of polling.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            SessionState::Connecting => self.connect_deadline,
            SessionState::Connected => self.ping_deadline.or_else(|| {
                if self.keep_alive.as_ticks() > 0 {
                    self.last_send.map(|t| t + self.keep_alive)
                } else {
                    None
                }
            }),
            _ => None,
        }
    }

    // --- synchronous command cores ---

    fn subscribe_inner(
        &mut self,
        topic: &str,
        qos: QoS,
        context: C,
    ) -> Result<u16, MqttError<T::Error>> {
        if self.state != SessionState::Connected {
            return Err(MqttError::NotConnected);
        }
        if self.pending.is_full() {
            return Err(MqttError::QueueFull);
        }
        let owned_topic: String<MAX_TOPIC_LEN> =
            String::try_from(topic).map_err(|_| MqttError::BufferTooSmall)?;
        let packet_id = self.alloc_packet_id();
        self.queue_packet(&Subscribe {
            packet_id,
            topic,
            qos,
        })?;
        // Cannot fail: capacity was checked above.
        let _ = self.pending.push(Pending {
            packet_id,
            kind: PendingKind::Subscribe { topic: owned_topic },
            context,
        });
        Ok(packet_id)
    }

    fn publish_inner(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
        context: C,
    ) -> Result<Option<u16>, MqttError<T::Error>> {
        if self.state != SessionState::Connected {
            return Err(MqttError::NotConnected);
        }
        if qos == QoS::AtMostOnce {
            self.queue_packet(&Publish {
                topic,
                qos,
                retain,
                payload,
                packet_id: None,
            })?;
            self.emit(MqttEvent::Published {
                context,
                result: Ok(()),
            });
            return Ok(None);
        }

        if self.pending.is_full() {
            return Err(MqttError::QueueFull);
        }
        let packet_id = self.alloc_packet_id();
        self.queue_packet(&Publish {
            topic,
            qos,
            retain,
            payload,
            packet_id: Some(packet_id),
        })?;
        let kind = if qos == QoS::AtLeastOnce {
            PendingKind::PublishAck
        } else {
            PendingKind::PublishRec
        };
        let _ = self.pending.push(Pending {
            packet_id,
            kind,
            context,
        });
        Ok(Some(packet_id))
    }

    fn disconnect_inner(&mut self) -> Result<(), MqttError<T::Error>> {
        if self.state != SessionState::Connected {
            return Err(MqttError::InvalidState);
        }
        self.queue_packet(&Disconnect)?;
        self.state = SessionState::Disconnecting;
        Ok(())
    }

    /// Allocates a packet identifier: non-zero, wrapping, never one that is
    /// still attached to an in-flight request.
    fn alloc_packet_id(&mut self) -> u16 {
        loop {
            let id = self.next_packet_id;
            self.next_packet_id = match self.next_packet_id.wrapping_add(1) {
                0 => 1,
                v => v,
            };
            if !self.pending.iter().any(|p| p.packet_id == id) {
                return id;
            }
        }
    }

    /// Encodes a packet into the TX staging buffer.
    fn queue_packet(&mut self, packet: &impl EncodePacket) -> Result<(), MqttError<T::Error>> {
        let start = self.tx.len();
        // Expose the whole spare capacity to the encoder, then trim back to
        // the bytes actually written.
        let _ = self.tx.resize(TX, 0);
        match packet.encode(&mut self.tx[start..]) {
            Ok(n) => {
                self.tx.truncate(start + n);
                Ok(())
            }
            Err(e) => {
                self.tx.truncate(start);
                Err(MqttError::cast_transport_error(e))
            }
        }
    }

    /// Queues a packet the protocol obliges us to send (acknowledgements,
    /// pings). Failing to stage one leaves the session inconsistent, so the
    /// connection is torn down instead.
    fn queue_or_teardown(&mut self, packet: &impl EncodePacket) -> bool {
        match self.queue_packet(packet) {
            Ok(()) => true,
            Err(_) => {
                self.teardown(true, ConnectStatus::TransportFailed);
                false
            }
        }
    }

    fn emit(&mut self, event: MqttEvent<'_, C>) {
        self.handler.on_event(&mut self.outbox, event);
    }

    // --- inbound path ---

    fn process_rx(&mut self) {
        loop {
            let header = match FixedHeader::parse(&self.rx) {
                Ok(Some(h)) => h,
                Ok(None) => return,
                Err(_) => {
                    self.protocol_teardown();
                    return;
                }
            };
            let total = header.packet_len();
            if total > RX {
                // Can never be buffered in full.
                self.protocol_teardown();
                return;
            }
            if self.rx.len() < total {
                return;
            }
            if !self.handle_packet(total) {
                return;
            }
            self.rx.copy_within(total.., 0);
            let remaining = self.rx.len() - total;
            self.rx.truncate(remaining);
        }
    }

    /// Handles one complete packet at the front of the RX buffer. Returns
    /// `false` once the session has been torn down.
    fn handle_packet(&mut self, total: usize) -> bool {
        // Any inbound traffic proves the link is alive.
        self.ping_deadline = None;

        let packet = match packet::decode(&self.rx[..total]) {
            Ok(p) => p,
            Err(_e) => {
                #[cfg(feature = "log")]
                log::warn!("malformed packet from peer: {:?}", _e);
                self.protocol_teardown();
                return false;
            }
        };

        match self.state {
            SessionState::Connecting => match packet {
                MqttPacket::ConnAck(ack) => self.on_connack(ack),
                _ => self.protocol_teardown(),
            },
            SessionState::Connected => match packet {
                MqttPacket::Publish(publish) => {
                    let qos = publish.qos;
                    let packet_id = publish.packet_id;
                    self.handler
                        .on_event(&mut self.outbox, MqttEvent::Message(publish));
                    // The acknowledgement goes out whatever the callback did.
                    match (qos, packet_id) {
                        (QoS::AtLeastOnce, Some(id)) => {
                            self.queue_or_teardown(&PubAck { packet_id: id });
                        }
                        (QoS::ExactlyOnce, Some(id)) => {
                            self.queue_or_teardown(&PubRec { packet_id: id });
                        }
                        _ => {}
                    }
                }
                MqttPacket::PubAck(ack) => self.on_puback(ack.packet_id),
                MqttPacket::PubRec(rec) => self.on_pubrec(rec.packet_id),
                MqttPacket::PubRel(rel) => {
                    self.queue_or_teardown(&PubComp {
                        packet_id: rel.packet_id,
                    });
                }
                MqttPacket::PubComp(comp) => self.on_pubcomp(comp.packet_id),
                MqttPacket::SubAck(suback) => {
                    let code = suback.return_codes.first().copied();
                    self.on_suback(suback.packet_id, code);
                }
                MqttPacket::PingResp => {}
                MqttPacket::ConnAck(_) => self.protocol_teardown(),
            },
            // Late packets during teardown carry no meaning anymore.
            SessionState::Disconnecting | SessionState::Idle => {}
        }

        self.state != SessionState::Idle
    }

    fn on_connack(&mut self, ack: ConnAck) {
        self.connect_deadline = None;
        match ack.return_code {
            ConnectReturnCode::Accepted => {
                #[cfg(feature = "log")]
                log::debug!("session established");
                self.state = SessionState::Connected;
                self.emit(MqttEvent::Connected {
                    status: ConnectStatus::Accepted,
                });
            }
            code => {
                #[cfg(feature = "log")]
                log::warn!("connection refused: {:?}", code);
                self.teardown(true, ConnectStatus::Refused(code));
            }
        }
    }

    fn on_suback(&mut self, packet_id: u16, code: Option<u8>) {
        let Some(idx) = self
            .pending
            .iter()
            .position(|p| p.packet_id == packet_id && matches!(p.kind, PendingKind::Subscribe { .. }))
        else {
            #[cfg(feature = "log")]
            log::warn!("SUBACK for unknown packet {}", packet_id);
            return;
        };
        let Pending { kind, context, .. } = self.pending.swap_remove(idx);
        let PendingKind::Subscribe { topic } = kind else {
            return;
        };
        let result = match code {
            Some(SUBACK_FAILURE) | None => Err(RequestError::Rejected),
            Some(code) => QoS::from_bits(code).ok_or(RequestError::Rejected),
        };
        self.emit(MqttEvent::Subscribed {
            topic: topic.as_str(),
            context,
            result,
        });
    }

    fn on_puback(&mut self, packet_id: u16) {
        let Some(idx) = self
            .pending
            .iter()
            .position(|p| p.packet_id == packet_id && matches!(p.kind, PendingKind::PublishAck))
        else {
            #[cfg(feature = "log")]
            log::warn!("PUBACK for unknown packet {}", packet_id);
            return;
        };
        let Pending { context, .. } = self.pending.swap_remove(idx);
        self.emit(MqttEvent::Published {
            context,
            result: Ok(()),
        });
    }

    fn on_pubrec(&mut self, packet_id: u16) {
        let Some(idx) = self
            .pending
            .iter()
            .position(|p| p.packet_id == packet_id && matches!(p.kind, PendingKind::PublishRec))
        else {
            #[cfg(feature = "log")]
            log::warn!("PUBREC for unknown packet {}", packet_id);
            return;
        };
        self.pending[idx].kind = PendingKind::PublishComp;
        self.queue_or_teardown(&PubRel { packet_id });
    }

    fn on_pubcomp(&mut self, packet_id: u16) {
        let Some(idx) = self
            .pending
            .iter()
            .position(|p| p.packet_id == packet_id && matches!(p.kind, PendingKind::PublishComp))
        else {
            #[cfg(feature = "log")]
            log::warn!("PUBCOMP for unknown packet {}", packet_id);
            return;
        };
        let Pending { context, .. } = self.pending.swap_remove(idx);
        self.emit(MqttEvent::Published {
            context,
            result: Ok(()),
        });
    }

    // --- teardown and the outgoing pump ---

    fn protocol_teardown(&mut self) {
        self.teardown(true, ConnectStatus::TransportFailed);
    }

    /// Tears the session down exactly once: every in-flight request fails
    /// with `ConnectionLost` (each with its saved context), then a single
    /// terminal event follows — `Disconnected`, or a failed `Connected` if
    /// the handshake never completed.
    fn teardown(&mut self, close: bool, connect_status: ConnectStatus) {
        if self.state == SessionState::Idle {
            return;
        }
        let was_connecting = self.state == SessionState::Connecting;
        self.state = SessionState::Idle;
        self.connect_deadline = None;
        self.ping_deadline = None;
        self.last_send = None;
        self.keep_alive = Duration::from_secs(0);
        self.rx.clear();
        self.tx.clear();
        self.close_pending = close;

        #[cfg(feature = "log")]
        log::debug!("session closed ({} requests in flight)", self.pending.len());

        let pending = core::mem::take(&mut self.pending);
        for entry in pending {
            let Pending { kind, context, .. } = entry;
            match kind {
                PendingKind::Subscribe { topic } => self.emit(MqttEvent::Subscribed {
                    topic: topic.as_str(),
                    context,
                    result: Err(RequestError::ConnectionLost),
                }),
                PendingKind::PublishAck | PendingKind::PublishRec | PendingKind::PublishComp => {
                    self.emit(MqttEvent::Published {
                        context,
                        result: Err(RequestError::ConnectionLost),
                    });
                }
            }
        }

        if was_connecting {
            self.emit(MqttEvent::Connected {
                status: connect_status,
            });
        } else {
            self.emit(MqttEvent::Disconnected);
        }
    }

    /// Executes commands the handler queued during callbacks. Commands that
    /// can no longer run still complete — with a failure event — so the
    /// application never loses track of a request it issued.
    fn drain_outbox(&mut self) {
        while let Some(cmd) = self.outbox.pop() {
            match cmd {
                Command::Publish {
                    topic,
                    payload,
                    qos,
                    retain,
                    context,
                } => {
                    if self.state != SessionState::Connected {
                        self.emit(MqttEvent::Published {
                            context,
                            result: Err(RequestError::ConnectionLost),
                        });
                    } else if self
                        .publish_inner(&topic, &payload, qos, retain, context)
                        .is_err()
                    {
                        self.emit(MqttEvent::Published {
                            context,
                            result: Err(RequestError::Overflow),
                        });
                    }
                }
                Command::Subscribe {
                    topic,
                    qos,
                    context,
                } => {
                    if self.state != SessionState::Connected {
                        self.emit(MqttEvent::Subscribed {
                            topic: topic.as_str(),
                            context,
                            result: Err(RequestError::ConnectionLost),
                        });
                    } else if self.subscribe_inner(&topic, qos, context).is_err() {
                        self.emit(MqttEvent::Subscribed {
                            topic: topic.as_str(),
                            context,
                            result: Err(RequestError::Overflow),
                        });
                    }
                }
                Command::Disconnect => {
                    if self.state == SessionState::Connected {
                        let _ = self.disconnect_inner();
                    }
                }
            }
        }
    }

    /// Drains queued commands and flushes staged bytes until both are empty.
    ///
    /// Runs as a loop because each step can produce work for the other:
    /// flushing can fail and tear down, teardown dispatches events, and
    /// event callbacks queue commands.
    async fn pump(&mut self, now: Instant) {
        loop {
            self.drain_outbox();

            if !self.tx.is_empty() {
                let result = self.transport.send(&self.tx).await;
                self.tx.clear();
                match result {
                    Ok(()) => self.last_send = Some(now),
                    Err(_e) => {
                        #[cfg(feature = "log")]
                        log::warn!("transport send failed: {:?}", _e);
                        self.teardown(true, ConnectStatus::TransportFailed);
                    }
                }
            }

            if self.state == SessionState::Disconnecting {
                // The DISCONNECT is on the wire; finish the teardown locally.
                self.teardown(true, ConnectStatus::TransportFailed);
            }

            if self.close_pending {
                self.close_pending = false;
                self.transport.close().await;
            }

            if self.outbox.is_empty() && self.tx.is_empty() && !self.close_pending {
                break;
            }
        }
    }
}
