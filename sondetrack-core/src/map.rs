//! Map View Seam
//!
//! The tracking session never draws anything itself. It calls a
//! [`MapView`] for every visual change: paths, markers, line-of-sight
//! segments, panning and the telemetry table. The server implements it by
//! broadcasting events to browsers; tests implement it by recording calls.

use serde::{Deserialize, Serialize};

use crate::palette::Colour;
use crate::telemetry::SondeTelemetry;

/// A position on the map. Altitude is carried along for path samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub alt: f64,
}

impl Position {
    pub fn new(lat: f64, lon: f64, alt: f64) -> Self {
        Position { lat, lon, alt }
    }
}

impl From<&SondeTelemetry> for Position {
    fn from(t: &SondeTelemetry) -> Self {
        Position::new(t.lat, t.lon, t.alt)
    }
}

/// Marker icon shape, chosen by the sign of the vertical velocity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IconKind {
    Ascent,
    Descent,
}

impl IconKind {
    pub fn for_vertical_velocity(vel_v: f64) -> Self {
        if vel_v < 0.0 {
            IconKind::Descent
        } else {
            IconKind::Ascent
        }
    }
}

/// Marker icon: shape plus the sonde's colour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerIcon {
    pub kind: IconKind,
    pub colour: Colour,
}

/// One row of the telemetry table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub id: String,
    pub colour: Colour,
    pub following: bool,
    /// Milliseconds since the epoch when the sonde was last heard
    pub age: u64,
    pub latest: SondeTelemetry,
}

/// Everything a map display has to support
///
/// Ids are sonde ids; each sonde owns at most one path, one marker and one
/// line-of-sight segment.
pub trait MapView {
    /// Create a path for a new sonde, starting with one sample
    fn create_path(&mut self, id: &str, colour: &Colour, first: Position);
    /// Append one sample to an existing path
    fn extend_path(&mut self, id: &str, point: Position);
    /// Create a marker with a permanent id label
    fn create_marker(&mut self, id: &str, position: Position, icon: &MarkerIcon, label: &str);
    fn move_marker(&mut self, id: &str, position: Position);
    fn set_marker_icon(&mut self, id: &str, icon: &MarkerIcon);
    /// Create a line from the station to the sonde
    fn create_line_of_sight(&mut self, id: &str, station: Position, sonde: Position);
    fn update_line_of_sight(&mut self, id: &str, station: Position, sonde: Position);
    fn pan_to(&mut self, lat: f64, lon: f64);
    /// Redraw the telemetry table with the latest data of all sondes
    fn refresh_table(&mut self, rows: &[TableRow]);
    /// Remove everything drawn for a sonde
    fn remove_track(&mut self, id: &str);
}

/// A view that ignores everything, for headless use
#[derive(Debug, Default, Clone, Copy)]
pub struct NullView;

impl MapView for NullView {
    fn create_path(&mut self, _id: &str, _colour: &Colour, _first: Position) {}
    fn extend_path(&mut self, _id: &str, _point: Position) {}
    fn create_marker(&mut self, _id: &str, _position: Position, _icon: &MarkerIcon, _label: &str) {}
    fn move_marker(&mut self, _id: &str, _position: Position) {}
    fn set_marker_icon(&mut self, _id: &str, _icon: &MarkerIcon) {}
    fn create_line_of_sight(&mut self, _id: &str, _station: Position, _sonde: Position) {}
    fn update_line_of_sight(&mut self, _id: &str, _station: Position, _sonde: Position) {}
    fn pan_to(&mut self, _lat: f64, _lon: f64) {}
    fn refresh_table(&mut self, _rows: &[TableRow]) {}
    fn remove_track(&mut self, _id: &str) {}
}
