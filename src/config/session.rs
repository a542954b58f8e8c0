//! Defaults for interactive alignment sessions.
//!
//! A session starts from these values on `load` and returns to them on
//! `reset`. Thickness setters clamp into the allowed range instead of failing,
//! so a slider that overshoots still renders.

use serde::{Deserialize, Serialize};

use crate::processing::composite::{BOTH_COLOR, Channel, MAX_THICKNESS, MIN_THICKNESS, PRESENCE_THRESHOLD};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionDefaults {
    pub opacity: f32,
    pub thickness: u32,
    pub min_thickness: u32,
    pub max_thickness: u32,
    /// Channel of the lower (base) drawing.
    pub lower_channel: Channel,
    /// Channel of the upper (adjusted) drawing.
    pub upper_channel: Channel,
    pub presence_threshold: u8,
    pub both_color: [u8; 3],
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            thickness: MIN_THICKNESS,
            min_thickness: MIN_THICKNESS,
            max_thickness: MAX_THICKNESS,
            lower_channel: Channel::Red,
            upper_channel: Channel::Green,
            presence_threshold: PRESENCE_THRESHOLD,
            both_color: BOTH_COLOR,
        }
    }
}

impl SessionDefaults {
    pub fn clamp_thickness(&self, thickness: u32) -> u32 {
        thickness.clamp(self.min_thickness, self.max_thickness)
    }
}
