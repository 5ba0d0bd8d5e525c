//! SondeHub telemetry feed client
//!
//! Subscribes to the SondeHub MQTT feed (or replays auto_rx log files),
//! decodes every packet with `sondetrack-core`, keeps a [`TrackingSession`]
//! and streams the resulting map changes to browsers over a WebSocket.

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

use sondetrack_core::session::{HandleOutcome, SessionSettings, Station, TrackingSession};
use sondetrack_core::telemetry::{DecodeOptions, Decoder, SondeTelemetry};

pub mod credentials;
pub mod feed;
pub mod logging;
pub mod replay;
pub mod sigv4;
pub mod view;
pub mod web;

use view::{EventView, MapEvent};

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_HOST: &str = "af1y19ao046nq-ats.iot.us-east-1.amazonaws.com";
pub const DEFAULT_IDENTITY_POOL: &str = "us-east-1:ab2c2cbb-5722-423d-9a2e-efcf278dadee";
pub const DEFAULT_TOPIC: &str = "sondes";

// Map events buffered per WebSocket client before it starts lagging
const EVENT_CHANNEL_SIZE: usize = 1024;

#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// AWS region of the identity pool and the IoT endpoint
    #[arg(long, default_value = DEFAULT_REGION)]
    pub region: String,

    /// IoT endpoint serving MQTT over WebSocket
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Identity pool handing out anonymous credentials
    #[arg(long, default_value = DEFAULT_IDENTITY_POOL)]
    pub identity_pool: String,

    /// Topic carrying the telemetry packets
    #[arg(long, default_value = DEFAULT_TOPIC)]
    pub topic: String,

    /// Upper bound for the delay between reconnect attempts
    #[arg(long, default_value_t = 8000)]
    pub max_reconnect_ms: u64,

    /// Station latitude; 0 disables the line-of-sight display
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub station_lat: f64,

    /// Station longitude
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub station_lon: f64,

    /// Port of the HTTP/WebSocket interface
    #[arg(short, long, default_value_t = 5000)]
    pub port: u16,

    /// Replay auto_rx sonde log files instead of connecting to the feed
    #[arg(long, num_args = 1..)]
    pub replay: Vec<PathBuf>,

    /// Delay between replayed rows
    #[arg(long, default_value_t = 1000)]
    pub replay_interval_ms: u64,

    /// Forget sondes not heard for this many minutes
    #[arg(long)]
    pub max_age_minutes: Option<u64>,

    /// Drop packets with a bad sentence checksum
    #[arg(long, default_value_t = false)]
    pub verify_checksum: bool,

    /// Start with the auto-follow toggle off
    #[arg(long, default_value_t = false)]
    pub no_auto_follow: bool,
}

impl Cli {
    pub fn station(&self) -> Option<Station> {
        Station::from_config(self.station_lat, self.station_lon)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            station: self.station(),
            palette: Vec::new(),
            auto_follow: !self.no_auto_follow,
            max_age_ms: self.max_age_minutes.map(|m| m * 60 * 1000),
        }
    }

    pub fn decoder(&self) -> Decoder {
        Decoder::new(DecodeOptions {
            verify_checksum: self.verify_checksum,
        })
    }
}

/// Shared state of the running client
///
/// The tracker is written by one message-processing subsystem and by
/// follow requests from the web interface; everything else only reads it.
#[derive(Clone)]
pub struct Session {
    pub args: Arc<Cli>,
    pub tracker: Arc<RwLock<TrackingSession>>,
    events: broadcast::Sender<MapEvent>,
    // Replayed to clients that connect after the alert was raised
    last_alert: Arc<RwLock<Option<String>>>,
}

impl Session {
    pub fn new(args: Cli) -> Self {
        let tracker = TrackingSession::new(args.session_settings());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Session {
            args: Arc::new(args),
            tracker: Arc::new(RwLock::new(tracker)),
            events,
            last_alert: Arc::new(RwLock::new(None)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MapEvent> {
        self.events.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<MapEvent> {
        self.events.clone()
    }

    /// Send an event to every connected map client
    pub fn emit(&self, event: MapEvent) {
        // No receivers is fine, nobody is looking at the map
        let _ = self.events.send(event);
    }

    /// Apply one decoded message and broadcast the resulting map changes
    pub fn apply(&self, telemetry: SondeTelemetry) -> HandleOutcome {
        let mut view = EventView::new(|e| self.emit(e));
        let mut tracker = self.tracker.write().unwrap();
        tracker.handle(telemetry, now_ms(), &mut view)
    }

    /// Drop stale sondes, see [`TrackingSession::prune`]
    pub fn prune(&self) -> Vec<String> {
        let mut view = EventView::new(|e| self.emit(e));
        let mut tracker = self.tracker.write().unwrap();
        tracker.prune(now_ms(), &mut view)
    }

    /// Raise a blocking notification on every map client, including later ones
    pub fn alert(&self, message: String) {
        *self.last_alert.write().unwrap() = Some(message.clone());
        self.emit(MapEvent::Alert { message });
    }

    pub fn last_alert(&self) -> Option<String> {
        self.last_alert.read().unwrap().clone()
    }
}

/// Milliseconds since the epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
