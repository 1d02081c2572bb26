//! Session lifecycle tests, driven over a scripted in-memory transport with
//! a deterministic clock.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use embassy_futures::block_on;
use embassy_time::Instant;

use modem_mqtt::client::{ConnectOptions, MqttClient, MqttOptions, SessionState};
use modem_mqtt::error::{ConnectReturnCode, MqttError};
use modem_mqtt::event::{ConnectStatus, MqttEvent, Outbox, RequestError, SessionHandler};
use modem_mqtt::packet::{EncodePacket, FixedHeader, Publish, QoS};
use modem_mqtt::transport::{MqttTransport, TransportError};

// --- mock transport ---

#[derive(Debug)]
struct MockError;

impl TransportError for MockError {}

#[derive(Clone, Default)]
struct TransportLog {
    sent: Rc<RefCell<Vec<u8>>>,
    opens: Rc<Cell<u32>>,
    closes: Rc<Cell<u32>>,
    fail_open: Rc<Cell<bool>>,
    fail_send: Rc<Cell<bool>>,
}

impl TransportLog {
    fn take_sent(&self) -> Vec<u8> {
        self.sent.borrow_mut().drain(..).collect()
    }

    /// Splits the raw sent byte stream back into packets.
    fn sent_packets(&self) -> Vec<Vec<u8>> {
        let bytes = self.take_sent();
        let mut packets = Vec::new();
        let mut rest = &bytes[..];
        while !rest.is_empty() {
            let header = FixedHeader::parse(rest)
                .expect("sent stream is well-formed")
                .expect("sent stream holds complete packets");
            let len = header.packet_len();
            packets.push(rest[..len].to_vec());
            rest = &rest[len..];
        }
        packets
    }
}

struct MockTransport {
    log: TransportLog,
}

impl MqttTransport for MockTransport {
    type Error = MockError;

    async fn open(&mut self, _host: &str, _port: u16) -> Result<(), Self::Error> {
        if self.log.fail_open.get() {
            return Err(MockError);
        }
        self.log.opens.set(self.log.opens.get() + 1);
        Ok(())
    }

    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        if self.log.fail_send.get() {
            return Err(MockError);
        }
        self.log.sent.borrow_mut().extend_from_slice(buf);
        Ok(())
    }

    async fn close(&mut self) {
        self.log.closes.set(self.log.closes.get() + 1);
    }
}

// --- recording handler ---

#[derive(Debug, Clone, PartialEq, Eq)]
enum Ev {
    Connected(ConnectStatus),
    Subscribed {
        topic: String,
        context: u32,
        result: Result<QoS, RequestError>,
    },
    Published {
        context: u32,
        result: Result<(), RequestError>,
    },
    Message {
        topic: String,
        payload: Vec<u8>,
    },
    Disconnected,
}

#[derive(Default)]
struct Recorder {
    events: Rc<RefCell<Vec<Ev>>>,
    /// Queue a QoS 0 publish from inside every `Message` callback.
    reply_on_message: Option<(String, Vec<u8>, u32)>,
}

impl SessionHandler<u32> for Recorder {
    fn on_event(&mut self, outbox: &mut Outbox<u32>, event: MqttEvent<'_, u32>) {
        let recorded = match &event {
            MqttEvent::Connected { status } => Ev::Connected(*status),
            MqttEvent::Subscribed {
                topic,
                context,
                result,
            } => Ev::Subscribed {
                topic: (*topic).to_owned(),
                context: *context,
                result: *result,
            },
            MqttEvent::Published { context, result } => Ev::Published {
                context: *context,
                result: *result,
            },
            MqttEvent::Message(publish) => Ev::Message {
                topic: publish.topic.to_owned(),
                payload: publish.payload.to_vec(),
            },
            MqttEvent::Disconnected => Ev::Disconnected,
        };
        let is_message = matches!(event, MqttEvent::Message(_));
        self.events.borrow_mut().push(recorded);

        if is_message {
            if let Some((topic, payload, context)) = &self.reply_on_message {
                assert!(outbox.publish(topic, payload, QoS::AtMostOnce, false, *context));
            }
        }
    }
}

// --- harness ---

type Client = MqttClient<MockTransport, Recorder, u32, 256, 256, 4>;

struct Harness {
    client: Client,
    log: TransportLog,
    events: Rc<RefCell<Vec<Ev>>>,
}

impl Harness {
    fn new() -> Self {
        Self::with_recorder(Recorder::default())
    }

    fn with_recorder(mut recorder: Recorder) -> Self {
        let log = TransportLog::default();
        let events = Rc::new(RefCell::new(Vec::new()));
        recorder.events = events.clone();
        let client = MqttClient::new(
            MockTransport { log: log.clone() },
            recorder,
            MqttOptions::default(),
        );
        Self {
            client,
            log,
            events,
        }
    }

    fn take_events(&self) -> Vec<Ev> {
        self.events.borrow_mut().drain(..).collect()
    }

    /// Connects with client id `c1` and keep-alive 10s, accepts the
    /// handshake, and clears the logs.
    fn connect_accepted(&mut self, now: Instant) {
        let mut options = ConnectOptions::new("c1");
        options.keep_alive_seconds = 10;
        block_on(self.client.connect("198.51.100.7", 1883, &options, now)).unwrap();
        block_on(self.client.handle_incoming(&connack(0), now));
        assert_eq!(self.take_events(), vec![Ev::Connected(ConnectStatus::Accepted)]);
        self.log.take_sent();
    }
}

fn t(secs: u64) -> Instant {
    Instant::from_secs(secs)
}

fn connack(code: u8) -> Vec<u8> {
    vec![0x20, 0x02, 0x00, code]
}

fn suback(packet_id: u16, code: u8) -> Vec<u8> {
    let id = packet_id.to_be_bytes();
    vec![0x90, 0x03, id[0], id[1], code]
}

fn ack(first_byte: u8, packet_id: u16) -> Vec<u8> {
    let id = packet_id.to_be_bytes();
    vec![first_byte, 0x02, id[0], id[1]]
}

fn inbound_publish(topic: &str, payload: &[u8], qos: QoS, packet_id: Option<u16>) -> Vec<u8> {
    let publish = Publish {
        topic,
        qos,
        retain: false,
        payload,
        packet_id,
    };
    let mut buf = [0u8; 512];
    let n = publish.encode(&mut buf).unwrap();
    buf[..n].to_vec()
}

// --- lifecycle ---

#[test]
fn happy_path_connect_subscribe_publish_qos0() {
    let mut h = Harness::new();
    let mut options = ConnectOptions::new("c1");
    options.keep_alive_seconds = 10;

    block_on(h.client.connect("198.51.100.7", 1883, &options, t(0))).unwrap();
    assert_eq!(h.client.state(), SessionState::Connecting);
    let sent = h.log.sent_packets();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0][0], 0x10); // CONNECT

    block_on(h.client.handle_incoming(&connack(0), t(0)));
    assert_eq!(h.client.state(), SessionState::Connected);
    assert_eq!(h.take_events(), vec![Ev::Connected(ConnectStatus::Accepted)]);

    let id = block_on(h.client.subscribe("t/1", QoS::AtMostOnce, 11, t(1))).unwrap();
    assert_eq!(id, 1);
    let sent = h.log.sent_packets();
    assert_eq!(sent[0][0], 0x82); // SUBSCRIBE

    block_on(h.client.handle_incoming(&suback(id, 0), t(1)));
    assert_eq!(
        h.take_events(),
        vec![Ev::Subscribed {
            topic: "t/1".into(),
            context: 11,
            result: Ok(QoS::AtMostOnce),
        }]
    );

    // QoS 0: no acknowledgement, completion is synthesized locally.
    let id = block_on(h.client.publish("t/1", b"hello", QoS::AtMostOnce, false, 22, t(2))).unwrap();
    assert_eq!(id, None);
    assert_eq!(
        h.take_events(),
        vec![Ev::Published {
            context: 22,
            result: Ok(()),
        }]
    );
    let sent = h.log.sent_packets();
    assert_eq!(sent[0][0] & 0xF0, 0x30); // PUBLISH
    assert_eq!(h.client.in_flight(), 0);
}

#[test]
fn second_connect_is_rejected_without_disturbing_the_first() {
    let mut h = Harness::new();
    block_on(h.client.connect("198.51.100.7", 1883, &ConnectOptions::new("c1"), t(0))).unwrap();

    // While the handshake is still in progress...
    let err =
        block_on(h.client.connect("198.51.100.7", 1883, &ConnectOptions::new("c2"), t(1)));
    assert!(matches!(err, Err(MqttError::InvalidState)));

    // ...and after it completed.
    block_on(h.client.handle_incoming(&connack(0), t(1)));
    let err =
        block_on(h.client.connect("198.51.100.7", 1883, &ConnectOptions::new("c2"), t(2)));
    assert!(matches!(err, Err(MqttError::InvalidState)));

    assert_eq!(h.client.state(), SessionState::Connected);
    assert_eq!(h.log.opens.get(), 1);
    assert_eq!(h.take_events(), vec![Ev::Connected(ConnectStatus::Accepted)]);
}

#[test]
fn open_failure_is_synchronous_and_leaves_idle() {
    let mut h = Harness::new();
    h.log.fail_open.set(true);
    let err = block_on(h.client.connect("198.51.100.7", 1883, &ConnectOptions::new("c1"), t(0)));
    assert!(matches!(err, Err(MqttError::Transport(_))));
    assert_eq!(h.client.state(), SessionState::Idle);
    assert!(h.take_events().is_empty());
}

#[test]
fn commands_require_a_connection() {
    let mut h = Harness::new();
    assert!(matches!(
        block_on(h.client.subscribe("t", QoS::AtMostOnce, 0, t(0))),
        Err(MqttError::NotConnected)
    ));
    assert!(matches!(
        block_on(h.client.publish("t", b"x", QoS::AtMostOnce, false, 0, t(0))),
        Err(MqttError::NotConnected)
    ));
    assert!(matches!(
        block_on(h.client.disconnect(t(0))),
        Err(MqttError::InvalidState)
    ));
}

// --- connect outcomes ---

#[test]
fn connack_refusal_reported_and_transport_closed() {
    let mut h = Harness::new();
    block_on(h.client.connect("198.51.100.7", 1883, &ConnectOptions::new("c1"), t(0))).unwrap();
    block_on(h.client.handle_incoming(&connack(4), t(0)));

    assert_eq!(
        h.take_events(),
        vec![Ev::Connected(ConnectStatus::Refused(
            ConnectReturnCode::BadUserNameOrPassword
        ))]
    );
    assert_eq!(h.client.state(), SessionState::Idle);
    assert_eq!(h.log.closes.get(), 1);
}

#[test]
fn connack_timeout_reported() {
    let mut h = Harness::new();
    block_on(h.client.connect("198.51.100.7", 1883, &ConnectOptions::new("c1"), t(0))).unwrap();
    assert_eq!(h.client.next_deadline(), Some(t(10)));

    // Just before the deadline nothing happens.
    block_on(h.client.tick(t(9)));
    assert!(h.take_events().is_empty());

    block_on(h.client.tick(t(10)));
    assert_eq!(h.take_events(), vec![Ev::Connected(ConnectStatus::Timeout)]);
    assert_eq!(h.client.state(), SessionState::Idle);
    assert_eq!(h.log.closes.get(), 1);
}

#[test]
fn transport_loss_while_connecting_fails_the_attempt() {
    let mut h = Harness::new();
    block_on(h.client.connect("198.51.100.7", 1883, &ConnectOptions::new("c1"), t(0))).unwrap();
    h.client.transport_closed();

    // The handshake never completed, so this is a failed connect, not a
    // disconnect of an established session.
    assert_eq!(
        h.take_events(),
        vec![Ev::Connected(ConnectStatus::TransportFailed)]
    );
    assert_eq!(h.client.state(), SessionState::Idle);
}

// --- acknowledgement matching ---

#[test]
fn interleaved_acks_complete_in_arrival_order() {
    let mut h = Harness::new();
    h.connect_accepted(t(0));

    let sub_id = block_on(h.client.subscribe("t/1", QoS::AtMostOnce, 1, t(1))).unwrap();
    let pub_a = block_on(h.client.publish("t/1", b"a", QoS::AtLeastOnce, false, 2, t(1)))
        .unwrap()
        .unwrap();
    let pub_b = block_on(h.client.publish("t/1", b"b", QoS::AtLeastOnce, false, 3, t(1)))
        .unwrap()
        .unwrap();
    assert_eq!(h.client.in_flight(), 3);

    // The broker acknowledges in an order of its own choosing.
    block_on(h.client.handle_incoming(&ack(0x40, pub_b), t(2)));
    block_on(h.client.handle_incoming(&suback(sub_id, 0), t(2)));
    block_on(h.client.handle_incoming(&ack(0x40, pub_a), t(2)));

    assert_eq!(
        h.take_events(),
        vec![
            Ev::Published {
                context: 3,
                result: Ok(()),
            },
            Ev::Subscribed {
                topic: "t/1".into(),
                context: 1,
                result: Ok(QoS::AtMostOnce),
            },
            Ev::Published {
                context: 2,
                result: Ok(()),
            },
        ]
    );
    assert_eq!(h.client.in_flight(), 0);
}

#[test]
fn each_ack_completes_exactly_once() {
    let mut h = Harness::new();
    h.connect_accepted(t(0));

    let id = block_on(h.client.publish("t", b"x", QoS::AtLeastOnce, false, 7, t(1)))
        .unwrap()
        .unwrap();
    block_on(h.client.handle_incoming(&ack(0x40, id), t(2)));
    // A duplicate ack no longer matches anything.
    block_on(h.client.handle_incoming(&ack(0x40, id), t(2)));

    assert_eq!(
        h.take_events(),
        vec![Ev::Published {
            context: 7,
            result: Ok(()),
        }]
    );
    assert_eq!(h.client.state(), SessionState::Connected);
}

#[test]
fn stray_acks_are_ignored() {
    let mut h = Harness::new();
    h.connect_accepted(t(0));

    block_on(h.client.handle_incoming(&ack(0x40, 99), t(1)));
    block_on(h.client.handle_incoming(&suback(42, 0), t(1)));

    assert!(h.take_events().is_empty());
    assert_eq!(h.client.state(), SessionState::Connected);
}

#[test]
fn suback_failure_code_rejects_the_subscription() {
    let mut h = Harness::new();
    h.connect_accepted(t(0));

    let id = block_on(h.client.subscribe("forbidden", QoS::AtLeastOnce, 5, t(1))).unwrap();
    block_on(h.client.handle_incoming(&suback(id, 0x80), t(1)));

    assert_eq!(
        h.take_events(),
        vec![Ev::Subscribed {
            topic: "forbidden".into(),
            context: 5,
            result: Err(RequestError::Rejected),
        }]
    );
}

// --- QoS 2 ---

#[test]
fn qos2_publish_runs_the_full_handshake() {
    let mut h = Harness::new();
    h.connect_accepted(t(0));

    let id = block_on(h.client.publish("t", b"x", QoS::ExactlyOnce, false, 8, t(1)))
        .unwrap()
        .unwrap();
    h.log.take_sent();
    assert!(h.take_events().is_empty());

    block_on(h.client.handle_incoming(&ack(0x50, id), t(2))); // PUBREC
    let sent = h.log.sent_packets();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0][0], 0x62); // PUBREL
    assert!(h.take_events().is_empty());
    assert_eq!(h.client.in_flight(), 1);

    block_on(h.client.handle_incoming(&ack(0x70, id), t(3))); // PUBCOMP
    assert_eq!(
        h.take_events(),
        vec![Ev::Published {
            context: 8,
            result: Ok(()),
        }]
    );
    assert_eq!(h.client.in_flight(), 0);
}

#[test]
fn qos2_interrupted_mid_handshake_fails_like_any_other_loss() {
    let mut h = Harness::new();
    h.connect_accepted(t(0));

    let id = block_on(h.client.publish("t", b"x", QoS::ExactlyOnce, false, 8, t(1)))
        .unwrap()
        .unwrap();
    block_on(h.client.handle_incoming(&ack(0x50, id), t(2))); // PUBREC, PUBREL goes out
    h.client.transport_closed();

    assert_eq!(
        h.take_events(),
        vec![
            Ev::Published {
                context: 8,
                result: Err(RequestError::ConnectionLost),
            },
            Ev::Disconnected,
        ]
    );
}

// --- inbound messages ---

#[test]
fn inbound_publishes_dispatch_and_acknowledge() {
    let mut h = Harness::new();
    h.connect_accepted(t(0));

    // QoS 0: no acknowledgement.
    block_on(h.client.handle_incoming(&inbound_publish("t/0", b"a", QoS::AtMostOnce, None), t(1)));
    assert!(h.log.sent_packets().is_empty());

    // QoS 1: PUBACK goes out whatever the handler does.
    block_on(h.client.handle_incoming(
        &inbound_publish("t/1", b"b", QoS::AtLeastOnce, Some(77)),
        t(1),
    ));
    let sent = h.log.sent_packets();
    assert_eq!(sent, vec![ack(0x40, 77)]);

    // QoS 2: PUBREC, then PUBCOMP when the broker releases.
    block_on(h.client.handle_incoming(
        &inbound_publish("t/2", b"c", QoS::ExactlyOnce, Some(78)),
        t(2),
    ));
    assert_eq!(h.log.sent_packets(), vec![ack(0x50, 78)]);
    block_on(h.client.handle_incoming(&ack(0x62, 78), t(2))); // PUBREL
    assert_eq!(h.log.sent_packets(), vec![ack(0x70, 78)]);

    assert_eq!(
        h.take_events(),
        vec![
            Ev::Message {
                topic: "t/0".into(),
                payload: b"a".to_vec(),
            },
            Ev::Message {
                topic: "t/1".into(),
                payload: b"b".to_vec(),
            },
            Ev::Message {
                topic: "t/2".into(),
                payload: b"c".to_vec(),
            },
        ]
    );
}

#[test]
fn packets_reassemble_across_partial_reads() {
    let mut h = Harness::new();
    let options = ConnectOptions::new("c1");
    block_on(h.client.connect("198.51.100.7", 1883, &options, t(0))).unwrap();

    // CONNACK drips in one byte at a time.
    for byte in connack(0) {
        assert_eq!(h.client.state(), SessionState::Connecting);
        block_on(h.client.handle_incoming(&[byte], t(0)));
    }
    assert_eq!(h.client.state(), SessionState::Connected);
    assert_eq!(h.take_events(), vec![Ev::Connected(ConnectStatus::Accepted)]);

    // A publish split mid-payload, followed by the start of another packet.
    let publish = inbound_publish("t/1", b"hello", QoS::AtMostOnce, None);
    let (front, back) = publish.split_at(4);
    block_on(h.client.handle_incoming(front, t(1)));
    assert!(h.take_events().is_empty());

    let mut rest = back.to_vec();
    rest.extend_from_slice(&ack(0x40, 5)); // stray, ignored
    block_on(h.client.handle_incoming(&rest, t(1)));
    assert_eq!(
        h.take_events(),
        vec![Ev::Message {
            topic: "t/1".into(),
            payload: b"hello".to_vec(),
        }]
    );
}

#[test]
fn reentrant_publish_from_message_callback_reaches_the_wire() {
    let recorder = Recorder {
        reply_on_message: Some(("reply".to_owned(), b"pong".to_vec(), 5)),
        ..Recorder::default()
    };
    let mut h = Harness::with_recorder(recorder);
    h.connect_accepted(t(0));

    block_on(h.client.handle_incoming(&inbound_publish("cmd", b"ping", QoS::AtMostOnce, None), t(1)));

    let sent = h.log.sent_packets();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0][0] & 0xF0, 0x30); // the queued reply went out
    assert_eq!(
        h.take_events(),
        vec![
            Ev::Message {
                topic: "cmd".into(),
                payload: b"ping".to_vec(),
            },
            Ev::Published {
                context: 5,
                result: Ok(()),
            },
        ]
    );
}

// --- teardown ---

#[test]
fn closure_fails_every_outstanding_request_then_disconnects_once() {
    let mut h = Harness::new();
    h.connect_accepted(t(0));

    block_on(h.client.subscribe("t/1", QoS::AtMostOnce, 1, t(1))).unwrap();
    block_on(h.client.publish("t", b"a", QoS::AtLeastOnce, false, 2, t(1))).unwrap();
    block_on(h.client.publish("t", b"b", QoS::ExactlyOnce, false, 3, t(1))).unwrap();
    assert_eq!(h.client.in_flight(), 3);

    h.client.transport_closed();

    assert_eq!(
        h.take_events(),
        vec![
            Ev::Subscribed {
                topic: "t/1".into(),
                context: 1,
                result: Err(RequestError::ConnectionLost),
            },
            Ev::Published {
                context: 2,
                result: Err(RequestError::ConnectionLost),
            },
            Ev::Published {
                context: 3,
                result: Err(RequestError::ConnectionLost),
            },
            Ev::Disconnected,
        ]
    );
    assert_eq!(h.client.state(), SessionState::Idle);
    assert_eq!(h.client.in_flight(), 0);

    // A second closure notification is a no-op: no duplicate Disconnected.
    h.client.transport_closed();
    assert!(h.take_events().is_empty());
}

#[test]
fn qos1_publish_lost_before_puback() {
    let mut h = Harness::new();
    h.connect_accepted(t(0));

    block_on(h.client.publish("t", b"x", QoS::AtLeastOnce, false, 9, t(1))).unwrap();
    h.client.transport_closed();

    assert_eq!(
        h.take_events(),
        vec![
            Ev::Published {
                context: 9,
                result: Err(RequestError::ConnectionLost),
            },
            Ev::Disconnected,
        ]
    );
}

#[test]
fn send_failure_tears_the_session_down() {
    let mut h = Harness::new();
    h.connect_accepted(t(0));

    h.log.fail_send.set(true);
    let result = block_on(h.client.publish("t", b"x", QoS::AtLeastOnce, false, 4, t(1)));
    // The command itself was accepted; the failure surfaces as events.
    assert!(result.is_ok());
    assert_eq!(
        h.take_events(),
        vec![
            Ev::Published {
                context: 4,
                result: Err(RequestError::ConnectionLost),
            },
            Ev::Disconnected,
        ]
    );
    assert_eq!(h.client.state(), SessionState::Idle);
}

#[test]
fn malformed_inbound_packet_is_fatal() {
    let mut h = Harness::new();
    h.connect_accepted(t(0));

    // Packet type 15 does not exist.
    block_on(h.client.handle_incoming(&[0xF0, 0x00], t(1)));

    assert_eq!(h.take_events(), vec![Ev::Disconnected]);
    assert_eq!(h.client.state(), SessionState::Idle);
    assert_eq!(h.log.closes.get(), 1);
}

#[test]
fn oversized_inbound_packet_is_fatal() {
    let mut h = Harness::new();
    h.connect_accepted(t(0));

    // Remaining length of 600 can never fit the 256-byte RX buffer.
    block_on(h.client.handle_incoming(&[0x30, 0xD8, 0x04], t(1)));

    assert_eq!(h.take_events(), vec![Ev::Disconnected]);
    assert_eq!(h.client.state(), SessionState::Idle);
}

#[test]
fn graceful_disconnect_sends_packet_and_fails_leftovers() {
    let mut h = Harness::new();
    h.connect_accepted(t(0));

    block_on(h.client.publish("t", b"x", QoS::AtLeastOnce, false, 6, t(1))).unwrap();
    h.log.take_sent();

    block_on(h.client.disconnect(t(2))).unwrap();

    let sent = h.log.sent_packets();
    assert_eq!(sent, vec![vec![0xE0, 0x00]]);
    assert_eq!(
        h.take_events(),
        vec![
            Ev::Published {
                context: 6,
                result: Err(RequestError::ConnectionLost),
            },
            Ev::Disconnected,
        ]
    );
    assert_eq!(h.client.state(), SessionState::Idle);
    assert_eq!(h.log.closes.get(), 1);

    // The client is reusable after a graceful teardown.
    block_on(h.client.connect("198.51.100.7", 1883, &ConnectOptions::new("c1"), t(3))).unwrap();
    assert_eq!(h.client.state(), SessionState::Connecting);
}

// --- capacity ---

#[test]
fn publish_exceeding_tx_buffer_fails_synchronously() {
    let mut h = Harness::new();
    h.connect_accepted(t(0));

    let payload = [0u8; 300]; // TX buffer is 256
    let err = block_on(h.client.publish("t", &payload, QoS::AtMostOnce, false, 0, t(1)));
    assert!(matches!(err, Err(MqttError::BufferTooSmall)));

    // No event, no packet, session unharmed.
    assert!(h.take_events().is_empty());
    assert!(h.log.sent_packets().is_empty());
    assert_eq!(h.client.state(), SessionState::Connected);
}

#[test]
fn in_flight_table_capacity_is_enforced() {
    let mut h = Harness::new();
    h.connect_accepted(t(0));

    for context in 0..4 {
        block_on(h.client.publish("t", b"x", QoS::AtLeastOnce, false, context, t(1))).unwrap();
    }
    let err = block_on(h.client.publish("t", b"x", QoS::AtLeastOnce, false, 4, t(1)));
    assert!(matches!(err, Err(MqttError::QueueFull)));

    // QoS 0 does not occupy a table slot and still goes through.
    let id = block_on(h.client.publish("t", b"x", QoS::AtMostOnce, false, 5, t(1))).unwrap();
    assert_eq!(id, None);
}

// --- keep-alive ---

#[test]
fn keepalive_pings_once_then_declares_the_link_dead() {
    let mut h = Harness::new();
    h.connect_accepted(t(0));
    assert_eq!(h.client.next_deadline(), Some(t(10)));

    // Nothing to do before the interval elapses.
    block_on(h.client.tick(t(9)));
    assert!(h.log.sent_packets().is_empty());

    // Idle for the full keep-alive: exactly one PINGREQ.
    block_on(h.client.tick(t(10)));
    assert_eq!(h.log.sent_packets(), vec![vec![0xC0, 0x00]]);
    block_on(h.client.tick(t(11)));
    assert!(h.log.sent_packets().is_empty());

    // Grace window is half the interval past the ping.
    assert_eq!(h.client.next_deadline(), Some(t(15)));
    block_on(h.client.tick(t(15)));
    assert_eq!(h.take_events(), vec![Ev::Disconnected]);
    assert_eq!(h.client.state(), SessionState::Idle);

    // A fresh connect is permitted afterwards.
    block_on(h.client.connect("198.51.100.7", 1883, &ConnectOptions::new("c1"), t(16))).unwrap();
    assert_eq!(h.client.state(), SessionState::Connecting);
}

#[test]
fn pingresp_keeps_the_session_alive() {
    let mut h = Harness::new();
    h.connect_accepted(t(0));

    block_on(h.client.tick(t(10)));
    assert_eq!(h.log.sent_packets(), vec![vec![0xC0, 0x00]]);

    block_on(h.client.handle_incoming(&[0xD0, 0x00], t(12)));
    block_on(h.client.tick(t(15)));
    assert!(h.take_events().is_empty());
    assert_eq!(h.client.state(), SessionState::Connected);

    // The next idle interval is measured from the ping we sent at t=10.
    block_on(h.client.tick(t(20)));
    assert_eq!(h.log.sent_packets(), vec![vec![0xC0, 0x00]]);
}

#[test]
fn any_traffic_resets_the_keepalive_timer() {
    let mut h = Harness::new();
    h.connect_accepted(t(0));

    // Sending traffic at t=8 pushes the idle deadline out.
    block_on(h.client.publish("t", b"x", QoS::AtMostOnce, false, 0, t(8))).unwrap();
    h.log.take_sent();
    h.take_events();

    block_on(h.client.tick(t(10)));
    assert!(h.log.sent_packets().is_empty());
    assert_eq!(h.client.next_deadline(), Some(t(18)));

    // Inbound traffic while a ping is outstanding clears the grace window.
    block_on(h.client.tick(t(18)));
    assert_eq!(h.log.sent_packets(), vec![vec![0xC0, 0x00]]);
    block_on(h.client.handle_incoming(
        &inbound_publish("t", b"y", QoS::AtMostOnce, None),
        t(19),
    ));
    h.take_events();
    block_on(h.client.tick(t(23)));
    assert_eq!(h.client.state(), SessionState::Connected);
}
