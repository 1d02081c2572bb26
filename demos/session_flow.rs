//! The classic modem-firmware MQTT flow, runnable on the host: connect,
//! subscribe once the broker accepts, publish once the subscription is
//! granted, and decide about reconnecting when the session ends.
//!
//! The transport is an in-memory stub and the broker's answers are scripted,
//! so the whole session lifecycle is visible without any network.

use std::cell::RefCell;
use std::rc::Rc;

use embassy_futures::block_on;
use embassy_time::{Duration, Instant};

use modem_mqtt::client::{ConnectOptions, MqttClient, MqttOptions};
use modem_mqtt::event::{ConnectStatus, MqttEvent, Outbox, SessionHandler};
use modem_mqtt::packet::QoS;
use modem_mqtt::runtime::{ReconnectPolicy, Reconnector};
use modem_mqtt::transport::{MqttTransport, TransportError};

const TOPIC: &str = "modem/example/topic";

#[derive(Debug)]
struct StubError;

impl TransportError for StubError {}

/// Records outbound bytes; inbound bytes are fed by the script in `main`.
struct StubTransport {
    sent: Rc<RefCell<Vec<u8>>>,
}

impl MqttTransport for StubTransport {
    type Error = StubError;

    async fn open(&mut self, host: &str, port: u16) -> Result<(), Self::Error> {
        println!("[transport] opening {host}:{port}");
        Ok(())
    }

    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        println!("[transport] sending {} bytes", buf.len());
        self.sent.borrow_mut().extend_from_slice(buf);
        Ok(())
    }

    async fn close(&mut self) {
        println!("[transport] closed");
    }
}

/// The application: reacts to each session event, issuing follow-up commands
/// through the outbox exactly like the firmware's event callback would.
struct App;

impl SessionHandler<&'static str> for App {
    fn on_event(&mut self, outbox: &mut Outbox<&'static str>, event: MqttEvent<'_, &'static str>) {
        match event {
            MqttEvent::Connected { status: ConnectStatus::Accepted } => {
                println!("[app] connected, subscribing to {TOPIC}");
                outbox.subscribe(TOPIC, QoS::AtMostOnce, TOPIC);
            }
            MqttEvent::Connected { status } => {
                println!("[app] connection failed: {status:?}");
            }
            MqttEvent::Subscribed { topic, result: Ok(qos), .. } => {
                println!("[app] subscribed to {topic} at {qos:?}, publishing a greeting");
                outbox.publish(TOPIC, b"my_data", QoS::AtMostOnce, false, "greeting");
            }
            MqttEvent::Subscribed { topic, result: Err(e), .. } => {
                println!("[app] subscription to {topic} failed: {e:?}");
            }
            MqttEvent::Published { context, result } => {
                println!("[app] publish '{context}' completed: {result:?}");
            }
            MqttEvent::Message(msg) => {
                println!(
                    "[app] message on {}: {}",
                    msg.topic,
                    String::from_utf8_lossy(msg.payload)
                );
            }
            MqttEvent::Disconnected => {
                println!("[app] disconnected");
            }
        }
    }
}

fn main() {
    let sent = Rc::new(RefCell::new(Vec::new()));
    let transport = StubTransport { sent: sent.clone() };
    let mut client: MqttClient<_, _, &'static str, 256, 256, 8> =
        MqttClient::new(transport, App, MqttOptions::default());
    let mut reconnector = Reconnector::new(ReconnectPolicy::new(
        Duration::from_secs(2),
        Duration::from_secs(60),
    ));

    let mut options = ConnectOptions::new("test_client_id");
    options.keep_alive_seconds = 10;

    block_on(async {
        let mut now = Instant::from_secs(0);
        client.connect("198.51.100.7", 1883, &options, now).await.unwrap();

        // Scripted broker: accept the connection, grant the subscription.
        client.handle_incoming(&[0x20, 0x02, 0x00, 0x00], now).await;
        client.handle_incoming(&[0x90, 0x03, 0x00, 0x01, 0x00], now).await;

        // The broker echoes our greeting back to the subscribed topic.
        let echo: Vec<u8> = {
            let mut packet = vec![0x30, (2 + TOPIC.len() + 7) as u8];
            packet.extend_from_slice(&(TOPIC.len() as u16).to_be_bytes());
            packet.extend_from_slice(TOPIC.as_bytes());
            packet.extend_from_slice(b"my_data");
            packet
        };
        client.handle_incoming(&echo, now).await;

        // Quiet link: the keep-alive machinery pings at the interval.
        now += Duration::from_secs(10);
        client.tick(now).await;
        client.handle_incoming(&[0xD0, 0x00], now).await;

        // The modem reports the carrier dropped; retry policy takes over.
        client.transport_closed();
        reconnector.note_disconnected(now);
        println!("[main] retry armed for {:?}", reconnector.retry_at());

        now += Duration::from_secs(2);
        if reconnector.due(now) {
            println!("[main] reconnecting");
            client.connect("198.51.100.7", 1883, &options, now).await.unwrap();
            client.handle_incoming(&[0x20, 0x02, 0x00, 0x00], now).await;
            reconnector.note_connected();
            client.disconnect(now).await.unwrap();
        }
    });

    println!("[main] {} bytes sent over the session", sent.borrow().len());
}
