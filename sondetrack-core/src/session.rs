//! Sonde Tracking Session
//!
//! Holds the latest telemetry of every sonde heard in this session together
//! with the state of its visual representation (path, marker, line of
//! sight), the colour assignment and the follow state.
//!
//! All changes go through [`TrackingSession::handle`], which applies one
//! decoded message and mirrors the result into a [`MapView`].
//!
//! # Example
//!
//! ```rust,ignore
//! use sondetrack_core::session::{SessionSettings, Station, TrackingSession};
//!
//! let settings = SessionSettings {
//!     station: Station::from_config(-34.9, 138.6),
//!     ..Default::default()
//! };
//! let mut session = TrackingSession::new(settings);
//! let outcome = session.handle(telemetry, now_ms, &mut view);
//! if outcome.created {
//!     println!("new sonde {}", outcome.id);
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::map::{IconKind, MapView, MarkerIcon, Position, TableRow};
use crate::palette::{Colour, Palette};
use crate::telemetry::SondeTelemetry;

/// Fixed observer location, the start of every line-of-sight segment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub lat: f64,
    pub lon: f64,
}

impl Station {
    /// A latitude of exactly 0.0 means no station is configured
    pub fn from_config(lat: f64, lon: f64) -> Option<Station> {
        if lat == 0.0 {
            None
        } else {
            Some(Station { lat, lon })
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.lat, self.lon, 0.0)
    }
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub station: Option<Station>,
    /// Colour names, empty for the default palette
    pub palette: Vec<String>,
    /// Initial state of the auto-follow toggle
    pub auto_follow: bool,
    /// Drop sondes not heard for this many milliseconds, `None` keeps them forever
    pub max_age_ms: Option<u64>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            station: None,
            palette: Vec::new(),
            auto_follow: true,
            max_age_ms: None,
        }
    }
}

/// Everything known about one sonde
#[derive(Debug, Clone, Serialize)]
pub struct SondeTrack {
    pub latest: SondeTelemetry,
    /// Local time (ms since epoch) the sonde was last heard
    pub age: u64,
    pub colour: Colour,
    pub path: Vec<Position>,
    pub marker: Position,
    pub icon: IconKind,
    /// Station and sonde ends of the line-of-sight segment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_of_sight: Option<(Position, Position)>,
    /// Set on the first sonde of the session only
    pub following: bool,
}

impl SondeTrack {
    fn marker_icon(&self) -> MarkerIcon {
        MarkerIcon {
            kind: self.icon,
            colour: self.colour.clone(),
        }
    }
}

/// What [`TrackingSession::handle`] did with a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleOutcome {
    pub id: String,
    /// A new track was created
    pub created: bool,
    /// The map was panned to this sonde
    pub panned: bool,
}

/// Entry of the telemetry archive, as served to late joining clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Seconds since the epoch when the sonde was last heard
    pub timestamp: f64,
    pub latest_telem: SondeTelemetry,
    pub path: Vec<[f64; 3]>,
}

/// Tracking state for one session
#[derive(Debug)]
pub struct TrackingSession {
    station: Option<Station>,
    max_age_ms: Option<u64>,
    tracks: BTreeMap<String, SondeTrack>,
    palette: Palette,
    following: Option<String>,
    auto_follow: bool,
    seen_any: bool,
}

impl TrackingSession {
    pub fn new(settings: SessionSettings) -> Self {
        TrackingSession {
            station: settings.station,
            max_age_ms: settings.max_age_ms,
            tracks: BTreeMap::new(),
            palette: Palette::new(&settings.palette),
            following: None,
            auto_follow: settings.auto_follow,
            seen_any: false,
        }
    }

    /// Apply one decoded message
    pub fn handle<V: MapView + ?Sized>(
        &mut self,
        telemetry: SondeTelemetry,
        now_ms: u64,
        view: &mut V,
    ) -> HandleOutcome {
        let id = telemetry.id.clone();
        let position = Position::from(&telemetry);
        let created = !self.tracks.contains_key(&id);

        if created {
            self.create_track(telemetry, position, now_ms, view);
        } else {
            self.update_track(telemetry, position, now_ms, view);
        }

        view.refresh_table(&self.table_rows());

        if self.following.is_none() {
            self.following = Some(id.clone());
        }

        let panned = self.auto_follow && self.following.as_deref() == Some(id.as_str());
        if panned {
            view.pan_to(position.lat, position.lon);
        }

        HandleOutcome {
            id,
            created,
            panned,
        }
    }

    fn create_track<V: MapView + ?Sized>(
        &mut self,
        telemetry: SondeTelemetry,
        position: Position,
        now_ms: u64,
        view: &mut V,
    ) {
        let id = telemetry.id.clone();
        let colour = self.palette.claim();
        let icon = IconKind::for_vertical_velocity(telemetry.vel_v);

        let line_of_sight = self.station.map(|s| (s.position(), position));

        let track = SondeTrack {
            latest: telemetry,
            age: now_ms,
            colour,
            path: vec![position],
            marker: position,
            icon,
            line_of_sight,
            following: !self.seen_any,
        };
        self.seen_any = true;

        view.create_path(&id, &track.colour, position);
        view.create_marker(&id, position, &track.marker_icon(), &id);
        if let Some((station, sonde)) = track.line_of_sight {
            view.create_line_of_sight(&id, station, sonde);
        }

        self.tracks.insert(id, track);
    }

    fn update_track<V: MapView + ?Sized>(
        &mut self,
        telemetry: SondeTelemetry,
        position: Position,
        now_ms: u64,
        view: &mut V,
    ) {
        let station = self.station;
        let Some(track) = self.tracks.get_mut(&telemetry.id) else {
            return;
        };
        let id = telemetry.id.clone();

        track.icon = IconKind::for_vertical_velocity(telemetry.vel_v);
        track.latest = telemetry;
        track.age = now_ms;
        track.path.push(position);
        track.marker = position;

        view.extend_path(&id, position);
        view.move_marker(&id, position);
        view.set_marker_icon(&id, &track.marker_icon());

        if let Some(station) = station {
            track.line_of_sight = Some((station.position(), position));
            view.update_line_of_sight(&id, station.position(), position);
        }
    }

    /// Remove sondes that have not been heard for longer than the configured maximum age
    ///
    /// Returns the ids that were removed. Does nothing when no maximum age is set.
    pub fn prune<V: MapView + ?Sized>(&mut self, now_ms: u64, view: &mut V) -> Vec<String> {
        let Some(max_age) = self.max_age_ms else {
            return Vec::new();
        };

        let stale: Vec<String> = self
            .tracks
            .iter()
            .filter(|(_, t)| now_ms.saturating_sub(t.age) > max_age)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            self.tracks.remove(id);
            view.remove_track(id);
            if self.following.as_deref() == Some(id.as_str()) {
                self.following = None;
            }
        }
        if !stale.is_empty() {
            view.refresh_table(&self.table_rows());
        }
        stale
    }

    /// Draw every known track onto a fresh view
    pub fn redraw<V: MapView + ?Sized>(&self, view: &mut V) {
        for (id, track) in &self.tracks {
            let mut points = track.path.iter();
            if let Some(first) = points.next() {
                view.create_path(id, &track.colour, *first);
            }
            for point in points {
                view.extend_path(id, *point);
            }
            view.create_marker(id, track.marker, &track.marker_icon(), id);
            if let Some((station, sonde)) = track.line_of_sight {
                view.create_line_of_sight(id, station, sonde);
            }
        }
        view.refresh_table(&self.table_rows());
    }

    pub fn table_rows(&self) -> Vec<TableRow> {
        self.tracks
            .iter()
            .map(|(id, t)| TableRow {
                id: id.clone(),
                colour: t.colour.clone(),
                following: self.following.as_deref() == Some(id.as_str()),
                age: t.age,
                latest: t.latest.clone(),
            })
            .collect()
    }

    pub fn archive(&self) -> BTreeMap<String, ArchiveEntry> {
        self.tracks
            .iter()
            .map(|(id, t)| {
                (
                    id.clone(),
                    ArchiveEntry {
                        timestamp: t.age as f64 / 1000.0,
                        latest_telem: t.latest.clone(),
                        path: t.path.iter().map(|p| [p.lat, p.lon, p.alt]).collect(),
                    },
                )
            })
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&SondeTrack> {
        self.tracks.get(id)
    }

    pub fn tracks(&self) -> impl Iterator<Item = (&String, &SondeTrack)> {
        self.tracks.iter()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn station(&self) -> Option<Station> {
        self.station
    }

    /// The sonde the map follows, if any
    pub fn following(&self) -> Option<&str> {
        self.following.as_deref()
    }

    /// Follow a known sonde, or nobody with `None`
    ///
    /// Returns false and changes nothing when the id is unknown.
    pub fn set_following(&mut self, id: Option<&str>) -> bool {
        match id {
            None => {
                self.following = None;
                true
            }
            Some(id) if self.tracks.contains_key(id) => {
                self.following = Some(id.to_string());
                true
            }
            Some(_) => false,
        }
    }

    pub fn auto_follow(&self) -> bool {
        self.auto_follow
    }

    pub fn set_auto_follow(&mut self, enabled: bool) {
        self.auto_follow = enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::recording::{Call, RecordingView};

    fn telemetry(id: &str, lat: f64, lon: f64, alt: f64) -> SondeTelemetry {
        SondeTelemetry {
            id: id.to_string(),
            frame: "1".to_string(),
            time: "00:00:00".to_string(),
            lat,
            lon,
            alt,
            vel_h: 0.0,
            vel_v: 0.0,
            kind: "SondeHub".to_string(),
            freq: "400".to_string(),
            freq_float: 400.0,
            temp: -20.0,
            humidity: 50.0,
            comment: String::new(),
            checksum: None,
            receivers: vec!["N0CALL".to_string()],
            datetime: None,
            time_uploaded: None,
        }
    }

    fn with_station() -> TrackingSession {
        TrackingSession::new(SessionSettings {
            station: Station::from_config(-34.9, 138.6),
            ..Default::default()
        })
    }

    #[test]
    fn test_first_message_creates_track() {
        let mut session = with_station();
        let mut view = RecordingView::default();

        let outcome = session.handle(telemetry("A", -34.0, 138.0, 1000.0), 10, &mut view);
        assert!(outcome.created);
        assert_eq!(session.len(), 1);

        let track = session.get("A").unwrap();
        assert_eq!(track.path.len(), 1);
        assert_eq!(track.age, 10);
        assert!(track.line_of_sight.is_some());

        assert_eq!(view.count(|c| matches!(c, Call::CreatePath(..))), 1);
        assert_eq!(view.count(|c| matches!(c, Call::CreateMarker(..))), 1);
        assert_eq!(view.count(|c| matches!(c, Call::CreateLineOfSight(..))), 1);
        assert!(view.calls.contains(&Call::CreateMarker(
            "A".to_string(),
            Position::new(-34.0, 138.0, 1000.0),
            MarkerIcon {
                kind: IconKind::Ascent,
                colour: Colour("blue".to_string())
            },
            "A".to_string()
        )));
    }

    #[test]
    fn test_second_message_extends_track() {
        let mut session = with_station();
        let mut view = RecordingView::default();

        session.handle(telemetry("A", -34.0, 138.0, 1000.0), 10, &mut view);
        view.clear();
        let outcome = session.handle(telemetry("A", -34.1, 138.1, 1500.0), 20, &mut view);

        assert!(!outcome.created);
        assert_eq!(session.len(), 1);
        let track = session.get("A").unwrap();
        assert_eq!(track.path.len(), 2);
        assert_eq!(track.age, 20);
        assert_eq!(track.marker, Position::new(-34.1, 138.1, 1500.0));

        let expected = Position::new(-34.1, 138.1, 1500.0);
        assert_eq!(
            &view.calls[..5],
            &[
                Call::ExtendPath("A".to_string(), expected),
                Call::MoveMarker("A".to_string(), expected),
                Call::SetMarkerIcon(
                    "A".to_string(),
                    MarkerIcon {
                        kind: IconKind::Ascent,
                        colour: Colour("blue".to_string())
                    }
                ),
                Call::UpdateLineOfSight(
                    "A".to_string(),
                    Position::new(-34.9, 138.6, 0.0),
                    expected
                ),
                Call::RefreshTable(1),
            ]
        );
        assert_eq!(view.count(|c| matches!(c, Call::CreatePath(..))), 0);
    }

    #[test]
    fn test_colours_follow_first_seen_order() {
        let mut session = TrackingSession::new(SessionSettings {
            palette: vec!["red".to_string(), "green".to_string()],
            ..Default::default()
        });
        let mut view = RecordingView::default();

        for id in ["C", "A", "C", "B"] {
            session.handle(telemetry(id, 1.0, 1.0, 1.0), 0, &mut view);
        }
        assert_eq!(session.get("C").unwrap().colour.as_str(), "red");
        assert_eq!(session.get("A").unwrap().colour.as_str(), "green");
        assert_eq!(session.get("B").unwrap().colour.as_str(), "red");
    }

    #[test]
    fn test_only_first_sonde_is_marked_following() {
        let mut session = TrackingSession::new(SessionSettings::default());
        let mut view = RecordingView::default();

        session.handle(telemetry("A", 1.0, 1.0, 1.0), 0, &mut view);
        session.handle(telemetry("B", 2.0, 2.0, 2.0), 0, &mut view);
        session.handle(telemetry("A", 1.5, 1.5, 1.5), 0, &mut view);

        assert!(session.get("A").unwrap().following);
        assert!(!session.get("B").unwrap().following);
        assert_eq!(session.following(), Some("A"));
    }

    #[test]
    fn test_auto_follow_pans_to_followed_sonde_only() {
        let mut session = TrackingSession::new(SessionSettings::default());
        let mut view = RecordingView::default();

        assert!(session.handle(telemetry("A", 1.0, 2.0, 0.0), 0, &mut view).panned);
        assert!(!session.handle(telemetry("B", 3.0, 4.0, 0.0), 0, &mut view).panned);
        assert_eq!(view.count(|c| matches!(c, Call::PanTo(..))), 1);
        assert!(view.calls.contains(&Call::PanTo(1.0, 2.0)));

        session.set_auto_follow(false);
        assert!(!session.handle(telemetry("A", 1.0, 2.0, 0.0), 0, &mut view).panned);

        session.set_auto_follow(true);
        assert!(session.set_following(Some("B")));
        assert!(session.handle(telemetry("B", 5.0, 6.0, 0.0), 0, &mut view).panned);
        assert!(view.calls.contains(&Call::PanTo(5.0, 6.0)));
    }

    #[test]
    fn test_unknown_sonde_cannot_be_followed() {
        let mut session = TrackingSession::new(SessionSettings::default());
        assert!(!session.set_following(Some("nobody")));
        assert_eq!(session.following(), None);
        assert!(session.set_following(None));
    }

    #[test]
    fn test_no_station_means_no_line_of_sight() {
        assert!(Station::from_config(0.0, 138.6).is_none());

        let mut session = TrackingSession::new(SessionSettings {
            station: Station::from_config(0.0, 138.6),
            ..Default::default()
        });
        let mut view = RecordingView::default();
        session.handle(telemetry("A", 1.0, 1.0, 1.0), 0, &mut view);
        session.handle(telemetry("A", 2.0, 2.0, 2.0), 0, &mut view);

        assert!(session.get("A").unwrap().line_of_sight.is_none());
        assert_eq!(
            view.count(|c| matches!(
                c,
                Call::CreateLineOfSight(..) | Call::UpdateLineOfSight(..)
            )),
            0
        );
    }

    #[test]
    fn test_icon_stays_ascent_for_decoded_telemetry() {
        // vel_v is never decoded, so the descent icon is never selected
        let mut session = TrackingSession::new(SessionSettings::default());
        let mut view = RecordingView::default();
        session.handle(telemetry("A", 1.0, 1.0, 30000.0), 0, &mut view);
        session.handle(telemetry("A", 1.0, 1.0, 20000.0), 0, &mut view);
        assert_eq!(session.get("A").unwrap().icon, IconKind::Ascent);
        assert_eq!(
            view.count(|c| matches!(c, Call::SetMarkerIcon(_, i) if i.kind == IconKind::Descent)),
            0
        );
    }

    #[test]
    fn test_table_refreshed_on_every_message() {
        let mut session = TrackingSession::new(SessionSettings::default());
        let mut view = RecordingView::default();
        session.handle(telemetry("A", 1.0, 1.0, 1.0), 0, &mut view);
        session.handle(telemetry("B", 1.0, 1.0, 1.0), 0, &mut view);
        assert!(view.calls.contains(&Call::RefreshTable(1)));
        assert!(view.calls.contains(&Call::RefreshTable(2)));

        let rows = session.table_rows();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].following);
        assert!(!rows[1].following);
    }

    #[test]
    fn test_prune_disabled_by_default() {
        let mut session = TrackingSession::new(SessionSettings::default());
        let mut view = RecordingView::default();
        session.handle(telemetry("A", 1.0, 1.0, 1.0), 0, &mut view);
        assert!(session.prune(u64::MAX, &mut view).is_empty());
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn test_prune_removes_stale_tracks() {
        let mut session = TrackingSession::new(SessionSettings {
            max_age_ms: Some(1000),
            ..Default::default()
        });
        let mut view = RecordingView::default();
        session.handle(telemetry("A", 1.0, 1.0, 1.0), 0, &mut view);
        session.handle(telemetry("B", 1.0, 1.0, 1.0), 900, &mut view);

        let removed = session.prune(1500, &mut view);
        assert_eq!(removed, vec!["A".to_string()]);
        assert_eq!(session.len(), 1);
        assert_eq!(session.following(), None);
        assert!(view.calls.contains(&Call::RemoveTrack("A".to_string())));

        // The next message adopts a new follow target, but does not mark it as first
        session.handle(telemetry("B", 2.0, 2.0, 2.0), 1600, &mut view);
        assert_eq!(session.following(), Some("B"));
        assert!(!session.get("B").unwrap().following);
    }

    #[test]
    fn test_redraw_and_archive() {
        let mut session = with_station();
        let mut view = RecordingView::default();
        session.handle(telemetry("A", 1.0, 1.0, 1.0), 2000, &mut view);
        session.handle(telemetry("A", 2.0, 2.0, 2.0), 3000, &mut view);

        let mut fresh = RecordingView::default();
        session.redraw(&mut fresh);
        assert_eq!(
            fresh.calls,
            vec![
                Call::CreatePath(
                    "A".to_string(),
                    Colour("blue".to_string()),
                    Position::new(1.0, 1.0, 1.0)
                ),
                Call::ExtendPath("A".to_string(), Position::new(2.0, 2.0, 2.0)),
                Call::CreateMarker(
                    "A".to_string(),
                    Position::new(2.0, 2.0, 2.0),
                    MarkerIcon {
                        kind: IconKind::Ascent,
                        colour: Colour("blue".to_string())
                    },
                    "A".to_string()
                ),
                Call::CreateLineOfSight(
                    "A".to_string(),
                    Position::new(-34.9, 138.6, 0.0),
                    Position::new(2.0, 2.0, 2.0)
                ),
                Call::RefreshTable(1),
            ]
        );

        let archive = session.archive();
        let entry = &archive["A"];
        assert_eq!(entry.timestamp, 3.0);
        assert_eq!(entry.path, vec![[1.0, 1.0, 1.0], [2.0, 2.0, 2.0]]);
        assert_eq!(entry.latest_telem.lat, 2.0);
    }
}
