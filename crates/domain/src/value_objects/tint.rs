//! Token tint colour.
//!
//! Live state and the wire carry three floats in `[0, 1]`. Campaign files and
//! token exports carry three integers in `[0, 255]`. Readers cannot know which
//! one they got, so any component above 1.0 marks the 0-255 encoding.

use serde::{Deserialize, Serialize};

/// RGB multiplier applied to a token image, each channel in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct Tint {
    r: f64,
    g: f64,
    b: f64,
}

impl Tint {
    pub const WHITE: Tint = Tint {
        r: 1.0,
        g: 1.0,
        b: 1.0,
    };

    /// Builds a tint from float channels, clamping each into `[0, 1]`.
    pub fn new(r: f64, g: f64, b: f64) -> Self {
        Self {
            r: clamp_unit(r),
            g: clamp_unit(g),
            b: clamp_unit(b),
        }
    }

    /// Reads a tint in either encoding. Returns `None` unless exactly three
    /// components are given.
    pub fn from_components(components: &[f64]) -> Option<Self> {
        let [r, g, b] = <[f64; 3]>::try_from(components).ok()?;
        Some(Self::from_either_encoding([r, g, b]))
    }

    fn from_either_encoding(channels: [f64; 3]) -> Self {
        let byte_encoded = channels.iter().any(|c| *c > 1.0);
        let [r, g, b] = if byte_encoded {
            channels.map(|c| c / 255.0)
        } else {
            channels
        };
        Self::new(r, g, b)
    }

    /// The 0-255 encoding used in campaign files and token exports.
    pub fn to_bytes(self) -> [u8; 3] {
        self.channels().map(|c| (c * 255.0).round() as u8)
    }

    pub fn channels(self) -> [f64; 3] {
        [self.r, self.g, self.b]
    }

    pub fn r(&self) -> f64 {
        self.r
    }

    pub fn g(&self) -> f64 {
        self.g
    }

    pub fn b(&self) -> f64 {
        self.b
    }
}

impl Default for Tint {
    fn default() -> Self {
        Self::WHITE
    }
}

impl From<[f64; 3]> for Tint {
    fn from(channels: [f64; 3]) -> Self {
        Self::from_either_encoding(channels)
    }
}

impl From<Tint> for [f64; 3] {
    fn from(tint: Tint) -> Self {
        tint.channels()
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
