//! Colour assignment for tracked sondes
//!
//! Every newly seen sonde claims the next colour of a fixed palette. The
//! index wraps, so the ninth sonde shares the first sonde's colour.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker and path colours, in assignment order
pub const DEFAULT_COLOURS: [&str; 8] = [
    "blue", "green", "purple", "orange", "red", "yellow", "grey", "black",
];

/// A named display colour
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Colour(pub String);

impl Colour {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Colour {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rotating colour index over a palette
#[derive(Debug, Clone)]
pub struct Palette {
    colours: Vec<Colour>,
    next: usize,
}

impl Palette {
    /// Create a palette from the given colour names.
    ///
    /// An empty list falls back to [`DEFAULT_COLOURS`].
    pub fn new<S: AsRef<str>>(colours: &[S]) -> Self {
        let colours: Vec<Colour> = if colours.is_empty() {
            DEFAULT_COLOURS.iter().map(|c| Colour(c.to_string())).collect()
        } else {
            colours.iter().map(|c| Colour(c.as_ref().to_string())).collect()
        };
        Palette { colours, next: 0 }
    }

    /// Take the next colour and advance the index
    pub fn claim(&mut self) -> Colour {
        let colour = self.colours[self.next].clone();
        self.next = (self.next + 1) % self.colours.len();
        colour
    }

    pub fn len(&self) -> usize {
        self.colours.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colours.is_empty()
    }
}

impl Default for Palette {
    fn default() -> Self {
        Palette::new::<&str>(&[])
    }
}
