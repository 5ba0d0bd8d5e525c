//! Receiver reports attached to every packet
//!
//! Each station that uploaded a sentence adds an entry keyed by its
//! callsign. The map is kept ordered so that every selection made from it
//! is deterministic.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What one station reported about a packet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiverReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_uploaded: Option<String>,
    /// Anything else the station added (position, radio, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ReceiverReport {
    fn created_at(&self) -> Option<DateTime<FixedOffset>> {
        self.time_created
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
    }
}

/// All receivers of one packet, ordered by station id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Receivers(pub BTreeMap<String, ReceiverReport>);

impl Receivers {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Station ids in ascending order
    pub fn station_ids(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    /// The report the packet's timestamps are taken from
    ///
    /// Picks the station with the earliest parseable `time_created`.
    /// Stations whose time cannot be parsed come after all others; among
    /// equals the lowest station id wins.
    pub fn first_report(&self) -> Option<(&String, &ReceiverReport)> {
        self.0
            .iter()
            .min_by(|(id_a, a), (id_b, b)| {
                let order = match (a.created_at(), b.created_at()) {
                    (Some(ta), Some(tb)) => ta.cmp(&tb),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                };
                order.then_with(|| id_a.cmp(id_b))
            })
    }
}
