//! Map events for browser clients
//!
//! [`EventView`] implements the core [`MapView`] by turning every call into
//! a serialisable [`MapEvent`]. The web interface forwards these as JSON
//! over a WebSocket; the browser applies them to its map widget.

use serde::Serialize;

use sondetrack_core::map::{MapView, MarkerIcon, Position, TableRow};
use sondetrack_core::palette::Colour;

/// One change to apply to the browser map
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MapEvent {
    CreatePath {
        id: String,
        colour: Colour,
        point: Position,
    },
    ExtendPath {
        id: String,
        point: Position,
    },
    CreateMarker {
        id: String,
        position: Position,
        icon: MarkerIcon,
        label: String,
        permanent_label: bool,
    },
    MoveMarker {
        id: String,
        position: Position,
    },
    SetMarkerIcon {
        id: String,
        icon: MarkerIcon,
    },
    CreateLineOfSight {
        id: String,
        station: Position,
        sonde: Position,
    },
    UpdateLineOfSight {
        id: String,
        station: Position,
        sonde: Position,
    },
    PanTo {
        lat: f64,
        lon: f64,
    },
    RefreshTable {
        rows: Vec<TableRow>,
    },
    RemoveTrack {
        id: String,
    },
    /// Blocking notification, e.g. credentials could not be fetched
    Alert {
        message: String,
    },
    /// One log record of the server
    Log {
        level: String,
        timestamp: String,
        msg: String,
    },
}

/// [`MapView`] that hands every change to a sink as a [`MapEvent`]
pub struct EventView<F: FnMut(MapEvent)> {
    sink: F,
}

impl<F: FnMut(MapEvent)> EventView<F> {
    pub fn new(sink: F) -> Self {
        EventView { sink }
    }
}

impl<F: FnMut(MapEvent)> MapView for EventView<F> {
    fn create_path(&mut self, id: &str, colour: &Colour, first: Position) {
        (self.sink)(MapEvent::CreatePath {
            id: id.to_string(),
            colour: colour.clone(),
            point: first,
        });
    }

    fn extend_path(&mut self, id: &str, point: Position) {
        (self.sink)(MapEvent::ExtendPath {
            id: id.to_string(),
            point,
        });
    }

    fn create_marker(&mut self, id: &str, position: Position, icon: &MarkerIcon, label: &str) {
        (self.sink)(MapEvent::CreateMarker {
            id: id.to_string(),
            position,
            icon: icon.clone(),
            label: label.to_string(),
            permanent_label: true,
        });
    }

    fn move_marker(&mut self, id: &str, position: Position) {
        (self.sink)(MapEvent::MoveMarker {
            id: id.to_string(),
            position,
        });
    }

    fn set_marker_icon(&mut self, id: &str, icon: &MarkerIcon) {
        (self.sink)(MapEvent::SetMarkerIcon {
            id: id.to_string(),
            icon: icon.clone(),
        });
    }

    fn create_line_of_sight(&mut self, id: &str, station: Position, sonde: Position) {
        (self.sink)(MapEvent::CreateLineOfSight {
            id: id.to_string(),
            station,
            sonde,
        });
    }

    fn update_line_of_sight(&mut self, id: &str, station: Position, sonde: Position) {
        (self.sink)(MapEvent::UpdateLineOfSight {
            id: id.to_string(),
            station,
            sonde,
        });
    }

    fn pan_to(&mut self, lat: f64, lon: f64) {
        (self.sink)(MapEvent::PanTo { lat, lon });
    }

    fn refresh_table(&mut self, rows: &[TableRow]) {
        (self.sink)(MapEvent::RefreshTable {
            rows: rows.to_vec(),
        });
    }

    fn remove_track(&mut self, id: &str) {
        (self.sink)(MapEvent::RemoveTrack { id: id.to_string() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sondetrack_core::map::IconKind;

    #[test]
    fn test_events_are_tagged() {
        let mut events = Vec::new();
        {
            let mut view = EventView::new(|e| events.push(e));
            view.pan_to(-34.9, 138.6);
            view.create_marker(
                "ABC123",
                Position::new(1.0, 2.0, 3.0),
                &MarkerIcon {
                    kind: IconKind::Ascent,
                    colour: Colour("blue".to_string()),
                },
                "ABC123",
            );
        }

        assert_eq!(events.len(), 2);
        assert_eq!(
            serde_json::to_value(&events[0]).unwrap(),
            serde_json::json!({ "event": "pan_to", "lat": -34.9, "lon": 138.6 })
        );
        let marker = serde_json::to_value(&events[1]).unwrap();
        assert_eq!(marker["event"], "create_marker");
        assert_eq!(marker["icon"]["kind"], "ascent");
        assert_eq!(marker["permanent_label"], true);
        assert_eq!(marker["position"]["alt"], 3.0);
    }
}
