//! Replay of auto_rx sonde log files
//!
//! Each log row is turned back into a feed packet and pushed through the
//! normal decode path, so a replay exercises exactly what the live feed
//! does. The first tenth of the shortest file is fed from every file at
//! once, so the map starts with some history; after that rows are taken
//! one per file per tick.
//!
//! Row layout: `datetime,id,frame,lat,lon,alt,temp,type,freq`

use chrono::{NaiveDateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tokio_graceful_shutdown::SubsystemHandle;

use sondetrack_core::telemetry::{encode_packet, encode_sentence, Decoder, SentenceFields};

use crate::Session;

const LOG_FIELDS: usize = 9;
const REPLAY_RECEIVER: &str = "REPLAY";
const SERIAL_PREFIX: &str = "RS_";

// One tenth of the shortest file is fed before the first tick
const INITIAL_FRACTION: usize = 10;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: no usable rows", .path.display())]
    Empty { path: PathBuf },
}

#[derive(Debug, Error, PartialEq)]
pub enum RowError {
    #[error("expected 9 fields, found {0}")]
    FieldCount(usize),
    #[error("invalid {field} '{value}'")]
    Invalid { field: &'static str, value: String },
}

/// One row of an auto_rx log
#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    pub datetime: NaiveDateTime,
    pub id: String,
    pub frame: String,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub temp: f64,
    pub kind: String,
    pub freq: String,
}

impl LogRow {
    pub fn parse(line: &str) -> Result<LogRow, RowError> {
        let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
        if fields.len() != LOG_FIELDS {
            return Err(RowError::FieldCount(fields.len()));
        }

        let datetime = NaiveDateTime::parse_from_str(fields[0], "%Y-%m-%dT%H:%M:%S%.f").map_err(|_| {
            RowError::Invalid {
                field: "datetime",
                value: fields[0].to_string(),
            }
        })?;

        Ok(LogRow {
            datetime,
            id: fields[1].to_string(),
            frame: fields[2].to_string(),
            lat: number("lat", fields[3])?,
            lon: number("lon", fields[4])?,
            alt: number("alt", fields[5])?,
            temp: number("temp", fields[6])?,
            kind: fields[7].to_string(),
            freq: fields[8].to_string(),
        })
    }

    /// The sentence auto_rx would have uploaded for this row
    pub fn to_sentence(&self) -> String {
        let id = if self.id.starts_with(SERIAL_PREFIX) {
            self.id.clone()
        } else {
            format!("{}{}", SERIAL_PREFIX, self.id)
        };
        encode_sentence(&SentenceFields {
            id,
            frame: self.frame.clone(),
            time: self.datetime.format("%H:%M:%S").to_string(),
            lat: self.lat,
            lon: self.lon,
            alt: self.alt,
            vel_h: 0.0,
            temp: self.temp,
            humidity: 0.0,
            comment: format!("{} {} MHz", self.kind, self.freq),
            checksum: None,
        })
    }
}

fn number(field: &'static str, value: &str) -> Result<f64, RowError> {
    value.parse::<f64>().map_err(|_| RowError::Invalid {
        field,
        value: value.to_string(),
    })
}

/// Rows of one log file, consumed front to back
#[derive(Debug)]
pub struct LogFile {
    key: String,
    rows: Vec<LogRow>,
    next: usize,
}

impl LogFile {
    /// Read a log file, skipping blank lines, comments and rows that do not parse
    pub fn load(path: &Path) -> Result<LogFile, ReplayError> {
        let content = fs::read_to_string(path).map_err(|source| ReplayError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let key = path.display().to_string();

        let mut rows = Vec::new();
        for (n, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match LogRow::parse(line) {
                Ok(row) => rows.push(row),
                Err(e) => log::warn!("{}: skipping line {}: {}", key, n + 1, e),
            }
        }
        if rows.is_empty() {
            return Err(ReplayError::Empty {
                path: path.to_path_buf(),
            });
        }
        log::info!("{}: {} rows to replay", key, rows.len());

        Ok(LogFile { key, rows, next: 0 })
    }

    pub fn next_row(&mut self) -> Option<&LogRow> {
        let row = self.rows.get(self.next)?;
        self.next += 1;
        Some(row)
    }

    pub fn is_done(&self) -> bool {
        self.next >= self.rows.len()
    }
}

/// Decode the next row of `file` and apply it; false when there is none or it was dropped
fn feed_next(decoder: &Decoder, session: &Session, file: &mut LogFile) -> bool {
    let Some(row) = file.next_row() else {
        return false;
    };
    let sentence = row.to_sentence();
    log::trace!("{}: {}", file.key, sentence.trim_end());

    let packet = encode_packet(&sentence, REPLAY_RECEIVER, Utc::now());
    match decoder.decode(packet.to_string().as_bytes()) {
        Ok(telemetry) => {
            session.apply(telemetry);
            true
        }
        Err(e) => {
            log::warn!("{}: dropping row: {}", file.key, e);
            false
        }
    }
}

pub struct ReplaySource {
    session: Session,
    decoder: Decoder,
    files: Vec<LogFile>,
    interval: Duration,
}

impl ReplaySource {
    pub fn new(session: Session) -> Result<ReplaySource, ReplayError> {
        let args = session.args.clone();
        let files = args
            .replay
            .iter()
            .map(|p| LogFile::load(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ReplaySource {
            decoder: args.decoder(),
            files,
            interval: Duration::from_millis(args.replay_interval_ms.max(1)),
            session,
        })
    }

    /// Feed the next row of every file through the decoder; returns the number applied
    pub fn tick(&mut self) -> usize {
        let mut applied = 0;
        for file in self.files.iter_mut() {
            if feed_next(&self.decoder, &self.session, file) {
                applied += 1;
            }
        }
        applied
    }

    /// Rows fed from each file before the first tick
    pub fn initial_rows(&self) -> usize {
        self.files.iter().map(|f| f.rows.len()).min().unwrap_or(0) / INITIAL_FRACTION
    }

    /// Feed the initial rows of every file; returns the number applied
    pub fn prime(&mut self) -> usize {
        let count = self.initial_rows();
        log::info!("injecting {} initial rows per file", count);

        let mut applied = 0;
        for file in self.files.iter_mut() {
            for _ in 0..count {
                if feed_next(&self.decoder, &self.session, file) {
                    applied += 1;
                }
            }
        }
        applied
    }

    pub fn is_done(&self) -> bool {
        self.files.iter().all(LogFile::is_done)
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), ReplayError> {
        self.prime();

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.is_done() {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    return Ok(());
                },
                _ = ticker.tick() => {
                    self.tick();
                },
            }
        }
        log::info!("replay finished, {} sondes tracked", self.session.tracker.read().unwrap().len());
        Ok(())
    }
}
