//! SondeHub Telemetry Decoding
//!
//! Packets arrive as JSON documents carrying a base64 encoded habitat
//! sentence plus the map of stations that received it:
//!
//! ```text
//! { "data": { "_raw": "JCRSU19...", ... },
//!   "receivers": { "N0CALL": { "time_created": "...", "time_uploaded": "..." } } }
//! ```
//!
//! The sentence itself is a comma separated line:
//!
//! ```text
//! $$RS_<serial>,<frame>,<HH:MM:SS>,<lat>,<lon>,<alt>,<vel_h>,<temp>,<humidity>,<comment>*<crc16>
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use sondetrack_core::telemetry::decode_packet;
//!
//! let telemetry = decode_packet(br#"{"data":{"_raw":"..."},"receivers":{}}"#)?;
//! println!("{} at {},{}", telemetry.id, telemetry.lat, telemetry.lon);
//! ```

mod checksum;
mod sentence;

pub use checksum::{crc16_ccitt, format_checksum};
pub use sentence::{encode_packet, encode_sentence, SentenceFields};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::receivers::Receivers;

/// Maximum number of comma separated fields taken from a sentence
pub const MAX_FIELDS: usize = 10;

/// Fields needed before the comment: id, frame, time, lat, lon, alt, vel_h, temp, humidity
pub const MIN_FIELDS: usize = 9;

/// Category tag given to everything that arrives over the feed
pub const TELEMETRY_TYPE: &str = "SondeHub";

/// Frequency placeholder in MHz; the sentence does not carry one
pub const PLACEHOLDER_FREQ_MHZ: f64 = 400.0;

/// Reasons a packet could not be turned into telemetry
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("packet is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("raw sentence is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("raw sentence is not UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("sentence has {found} fields, need at least 9")]
    FieldCount { found: usize },
    #[error("field '{field}' is not a number: '{value}'")]
    InvalidNumber { field: &'static str, value: String },
    #[error("checksum mismatch: sentence says {received}, computed {computed}")]
    Checksum { received: String, computed: String },
}

/// Packet as published on the feed topic
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Packet {
    pub data: PacketData,
    #[serde(default)]
    pub receivers: Receivers,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PacketData {
    #[serde(rename = "_raw")]
    pub raw: String,
}

/// One decoded telemetry record, the latest state of a sonde
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SondeTelemetry {
    pub id: String,
    pub frame: String,
    pub time: String,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub vel_h: f64,
    /// Never present in the sentence, always 0.0
    pub vel_v: f64,
    #[serde(rename = "type")]
    pub kind: String,
    pub freq: String,
    pub freq_float: f64,
    pub temp: f64,
    pub humidity: f64,
    pub comment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub receivers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_uploaded: Option<String>,
}

impl SondeTelemetry {
    /// Whether the sonde is coming down. Always false while `vel_v` is not decoded.
    pub fn is_descending(&self) -> bool {
        self.vel_v < 0.0
    }
}

/// Options for [`Decoder`]
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    /// Reject sentences whose `*XXXX` checksum does not match
    pub verify_checksum: bool,
}

/// Packet decoder
#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder {
    options: DecodeOptions,
}

impl Decoder {
    pub fn new(options: DecodeOptions) -> Self {
        Decoder { options }
    }

    /// Decode a JSON packet body into telemetry
    pub fn decode(&self, payload: &[u8]) -> Result<SondeTelemetry, DecodeError> {
        let packet: Packet = serde_json::from_slice(payload)?;
        self.decode_parsed(&packet)
    }

    /// Decode an already parsed packet
    pub fn decode_parsed(&self, packet: &Packet) -> Result<SondeTelemetry, DecodeError> {
        let raw = STANDARD.decode(packet.raw_trimmed())?;
        let line = String::from_utf8(raw)?;
        let fields = SentenceFields::parse(&line)?;

        if self.options.verify_checksum {
            fields.verify_checksum(line.trim())?;
        }

        let first = packet.receivers.first_report();
        Ok(SondeTelemetry {
            id: fields.id,
            frame: fields.frame,
            time: fields.time,
            lat: fields.lat,
            lon: fields.lon,
            alt: fields.alt,
            vel_h: fields.vel_h,
            vel_v: 0.0,
            kind: TELEMETRY_TYPE.to_string(),
            freq: format!("{}", PLACEHOLDER_FREQ_MHZ),
            freq_float: PLACEHOLDER_FREQ_MHZ,
            temp: fields.temp,
            humidity: fields.humidity,
            comment: fields.comment,
            checksum: fields.checksum,
            receivers: packet.receivers.station_ids(),
            datetime: first.and_then(|(_, r)| r.time_created.clone()),
            time_uploaded: first.and_then(|(_, r)| r.time_uploaded.clone()),
        })
    }
}

impl Packet {
    fn raw_trimmed(&self) -> &str {
        self.data.raw.trim()
    }
}

/// Decode a packet with default options
pub fn decode_packet(payload: &[u8]) -> Result<SondeTelemetry, DecodeError> {
    Decoder::default().decode(payload)
}
