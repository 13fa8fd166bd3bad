use std::convert::TryFrom;

use chrono::Weekday;
use serde::{Deserialize, Serialize};

use crate::color::Color;

/// Length of the generated entity ids
const ID_LENGTH: usize = 8;

/// Generate a short, URL-safe, collision-resistant id
pub fn generate_id() -> String {
    nanoid::nanoid!(ID_LENGTH)
}

/// How the strip is currently being driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelMode {
    Fill = 1,
    Individual = 2,
    Animation = 3,
}

impl TryFrom<u8> for PixelMode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PixelMode::Fill),
            2 => Ok(PixelMode::Individual),
            3 => Ok(PixelMode::Animation),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Animation {
    pub id: String,
    pub name: String,
}

impl Animation {
    pub fn new(name: String) -> Self {
        Self {
            id: generate_id(),
            name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub id: String,
    pub name: String,
    pub pixels: Vec<Color>,
    pub brightness: u8,
}

impl Preset {
    /// The listing representation stored records decode into
    pub fn as_partial(&self) -> PartialPreset {
        PartialPreset {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialPreset {
    pub id: String,
    pub name: String,
}

/// What a schedule does when it fires, selecting exactly one payload slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Fill = 1,
    Preset = 2,
    Animation = 3,
}

/// Bitmask over the days of the week, Sunday in the lowest bit.
///
/// A mask of zero means "run once at the next occurrence, then disable".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleRepeats(pub u8);

impl ScheduleRepeats {
    pub const SUNDAY: ScheduleRepeats = ScheduleRepeats(1);
    pub const MONDAY: ScheduleRepeats = ScheduleRepeats(1 << 1);
    pub const TUESDAY: ScheduleRepeats = ScheduleRepeats(1 << 2);
    pub const WEDNESDAY: ScheduleRepeats = ScheduleRepeats(1 << 3);
    pub const THURSDAY: ScheduleRepeats = ScheduleRepeats(1 << 4);
    pub const FRIDAY: ScheduleRepeats = ScheduleRepeats(1 << 5);
    pub const SATURDAY: ScheduleRepeats = ScheduleRepeats(1 << 6);

    pub fn is_once(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, day: Weekday) -> bool {
        let bit = match day {
            Weekday::Sun => Self::SUNDAY,
            Weekday::Mon => Self::MONDAY,
            Weekday::Tue => Self::TUESDAY,
            Weekday::Wed => Self::WEDNESDAY,
            Weekday::Thu => Self::THURSDAY,
            Weekday::Fri => Self::FRIDAY,
            Weekday::Sat => Self::SATURDAY,
        };

        self.0 & bit.0 != 0
    }
}

impl std::ops::BitOr for ScheduleRepeats {
    type Output = ScheduleRepeats;

    fn bitor(self, rhs: Self) -> Self::Output {
        ScheduleRepeats(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub at: String,
    pub repeats: ScheduleRepeats,
    #[serde(rename = "type")]
    pub ty: ScheduleType,
    pub color: Option<Color>,
    pub preset: Option<String>,
    pub animation: Option<String>,
}

impl Schedule {
    pub fn as_partial(&self) -> PartialSchedule {
        PartialSchedule {
            id: self.id.clone(),
            name: self.name.clone(),
            enabled: self.enabled,
            at: self.at.clone(),
            repeats: self.repeats,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSchedule {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub at: String,
    pub repeats: ScheduleRepeats,
}
