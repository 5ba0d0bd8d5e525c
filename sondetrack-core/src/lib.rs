//! Platform-independent SondeHub telemetry library for sondetrack
//!
//! This crate contains everything that does not need I/O:
//!
//! - [`telemetry`]: decoding of SondeHub packets and habitat-style sentences
//! - [`receivers`]: the receiver map attached to every packet
//! - [`palette`]: colour assignment for newly seen sondes
//! - [`map`]: the [`MapView`](map::MapView) seam that a map display implements
//! - [`session`]: the per-sonde tracking state driven by decoded telemetry
//!
//! The server crate owns the network side (identity pool, MQTT, HTTP) and
//! feeds decoded telemetry into a [`TrackingSession`](session::TrackingSession).
//!
//! # Example
//!
//! ```rust,ignore
//! use sondetrack_core::map::NullView;
//! use sondetrack_core::session::{SessionSettings, TrackingSession};
//! use sondetrack_core::telemetry::decode_packet;
//!
//! let mut session = TrackingSession::new(SessionSettings::default());
//! let telemetry = decode_packet(payload)?;
//! session.handle(telemetry, now_ms, &mut NullView);
//! ```

pub mod map;
pub mod palette;
pub mod receivers;
pub mod session;
pub mod telemetry;

pub use map::{IconKind, MapView, MarkerIcon, Position};
pub use palette::{Colour, Palette};
pub use session::{SessionSettings, SondeTrack, Station, TrackingSession};
pub use telemetry::{decode_packet, DecodeError, SondeTelemetry};
