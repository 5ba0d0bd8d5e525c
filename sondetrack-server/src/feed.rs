//! Live telemetry feed
//!
//! Connects to the IoT endpoint with MQTT over WebSocket, subscribes to the
//! telemetry topic and applies every packet to the tracking session.
//!
//! Credentials are fetched once at startup. When that fails the failure is
//! logged and raised on the map clients, and the feed carries on with an
//! unsigned URL; the reconnect loop below is the only retry path.

use chrono::Utc;
use rand::Rng;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, Publish, QoS, SubscribeReasonCode, Transport};
use std::cmp::min;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tokio_graceful_shutdown::SubsystemHandle;

use sondetrack_core::session::HandleOutcome;
use sondetrack_core::telemetry::Decoder;

use crate::credentials::{AwsCredentials, IdentityClient};
use crate::sigv4;
use crate::Session;

const MQTT_WSS_PORT: u16 = 443;
const KEEP_ALIVE: Duration = Duration::from_secs(30);

// Requests queued towards the event loop; we only ever send subscribes
const REQUEST_CHANNEL_CAPACITY: usize = 16;

// Packets with many receivers are well over rumqttc's 10 kB default
const MAX_PACKET_SIZE: usize = 256 * 1024;

// First reconnect delay, doubled on every failure up to --max-reconnect-ms
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

// Client ids are random integers in this range, as text
const CLIENT_ID_MAX: u32 = 100_000;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("shutdown")]
    Shutdown,
    #[error("connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
    #[error("client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

pub struct FeedReceiver {
    session: Session,
    key: String,
    decoder: Decoder,
    client_id: String,
    credentials: Option<AwsCredentials>,
    reconnect_delay: Duration,
    max_reconnect_delay: Duration,
}

impl FeedReceiver {
    pub fn new(session: Session) -> FeedReceiver {
        let args = session.args.clone();
        let client_id = rand::thread_rng().gen_range(1..=CLIENT_ID_MAX).to_string();
        log::debug!("{}: creating FeedReceiver with client id {}", args.host, client_id);

        FeedReceiver {
            key: format!("{}/{}", args.host, args.topic),
            decoder: args.decoder(),
            client_id,
            credentials: None,
            reconnect_delay: INITIAL_RECONNECT_DELAY,
            max_reconnect_delay: Duration::from_millis(args.max_reconnect_ms),
            session,
        }
    }

    async fn fetch_credentials(&mut self) {
        let args = self.session.args.clone();
        let client = IdentityClient::new(&args.region);
        match client.fetch(&args.identity_pool).await {
            Ok(credentials) => {
                log::debug!("{}: got credentials {:?}", self.key, credentials);
                self.credentials = Some(credentials);
            }
            Err(e) => {
                log::error!("{}: {}", self.key, e);
                self.session.alert(e.to_string());
            }
        }
    }

    fn mqtt_options(&self) -> MqttOptions {
        let args = &self.session.args;
        let url = sigv4::websocket_url(&args.host, &args.region, self.credentials.as_ref(), Utc::now());

        let mut options = MqttOptions::new(self.client_id.clone(), url, MQTT_WSS_PORT);
        options.set_transport(Transport::wss_with_default_config());
        options.set_keep_alive(KEEP_ALIVE);
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        options
    }

    //
    // Run one connection until it fails or shutdown is requested. Every
    // connection acknowledgement subscribes again, the broker does not
    // keep subscriptions of a clean session.
    //
    async fn socket_loop(&mut self, subsys: &SubsystemHandle) -> Result<(), FeedError> {
        let (client, mut eventloop) = AsyncClient::new(self.mqtt_options(), REQUEST_CHANNEL_CAPACITY);
        let topic = self.session.args.topic.clone();

        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    log::debug!("{}: shutdown", self.key);
                    let _ = client.try_disconnect();
                    return Err(FeedError::Shutdown);
                },

                event = eventloop.poll() => {
                    match on_event(event?) {
                        Some(FeedAction::Subscribe) => {
                            log::info!("{}: connected, subscribing", self.key);
                            self.reconnect_delay = INITIAL_RECONNECT_DELAY;
                            client.subscribe(topic.as_str(), QoS::AtMostOnce).await?;
                        }
                        Some(FeedAction::Subscribed(return_codes)) => {
                            log::debug!("{}: subscribed {:?}", self.key, return_codes);
                        }
                        Some(FeedAction::Message(publish)) => {
                            self.process_message(&publish.topic, &publish.payload);
                        }
                        None => {}
                    }
                },
            }
        }
    }

    /// Decode one message and apply it to the session
    ///
    /// Malformed messages are logged and dropped.
    pub fn process_message(&self, topic: &str, payload: &[u8]) -> Option<HandleOutcome> {
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("{}: message {}", topic, String::from_utf8_lossy(payload));
        }

        match self.decoder.decode(payload) {
            Ok(telemetry) => {
                let outcome = self.session.apply(telemetry);
                if outcome.created {
                    log::info!("{}: new sonde {}", self.key, outcome.id);
                } else {
                    log::debug!("{}: update for sonde {}", self.key, outcome.id);
                }
                Some(outcome)
            }
            Err(e) => {
                log::warn!("{}: dropping message on {}: {}", self.key, topic, e);
                None
            }
        }
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), FeedError> {
        self.fetch_credentials().await;

        loop {
            match self.socket_loop(&subsys).await {
                Err(FeedError::Shutdown) => {
                    return Ok(());
                }
                Err(e) => {
                    log::warn!(
                        "{}: {}, reconnecting in {} ms",
                        self.key,
                        e,
                        self.reconnect_delay.as_millis()
                    );
                }
                Ok(()) => {}
            }

            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    return Ok(());
                },
                _ = sleep(self.reconnect_delay) => {},
            }
            self.reconnect_delay = next_reconnect_delay(self.reconnect_delay, self.max_reconnect_delay);
        }
    }
}

/// What the connection loop does with one event loop notification
#[derive(Debug, PartialEq)]
pub enum FeedAction {
    /// Connection (re)established: subscribe to the topic
    Subscribe,
    Subscribed(Vec<SubscribeReasonCode>),
    Message(Publish),
}

pub fn on_event(event: Event) -> Option<FeedAction> {
    match event {
        Event::Incoming(Packet::ConnAck(_)) => Some(FeedAction::Subscribe),
        Event::Incoming(Packet::SubAck(ack)) => Some(FeedAction::Subscribed(ack.return_codes)),
        Event::Incoming(Packet::Publish(publish)) => Some(FeedAction::Message(publish)),
        _ => None,
    }
}

/// Double the delay, capped at `max`
pub fn next_reconnect_delay(current: Duration, max: Duration) -> Duration {
    min(current * 2, max)
}
