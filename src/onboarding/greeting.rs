//! Time-of-day greeting selection.

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;

use crate::onboarding::texts::TextKey;

/// Source of wall-clock time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayPart {
    /// 06:00–12:00
    Morning,
    /// 12:00–18:00
    Day,
    /// 18:00–23:00
    Evening,
    Night,
}

impl DayPart {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=11 => DayPart::Morning,
            12..=17 => DayPart::Day,
            18..=22 => DayPart::Evening,
            _ => DayPart::Night,
        }
    }

    /// Bucket of `now` as seen in `timezone`.
    pub fn at(now: DateTime<Utc>, timezone: Tz) -> Self {
        Self::from_hour(now.with_timezone(&timezone).hour())
    }

    pub fn text_key(self) -> TextKey {
        match self {
            DayPart::Morning => TextKey::GreetingMorning,
            DayPart::Day => TextKey::GreetingDay,
            DayPart::Evening => TextKey::GreetingEvening,
            DayPart::Night => TextKey::GreetingNight,
        }
    }
}
