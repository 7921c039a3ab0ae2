use chrono::{NaiveTime, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Per-day availability window, `[start, end]` inclusive at minute precision.
///
/// `start > end` describes an overnight window that begins on `day_of_week`
/// and ends the following morning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBoundary {
    pub day_of_week: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub timezone: Tz,
}

impl TimeBoundary {
    pub fn new(day_of_week: Weekday, start: NaiveTime, end: NaiveTime, timezone: Tz) -> Self {
        Self {
            day_of_week,
            start,
            end,
            timezone,
        }
    }

    pub fn is_overnight(&self) -> bool {
        self.start > self.end
    }
}

/// Weekdays are stored as 0 = Monday .. 6 = Sunday.
pub fn weekday_from_db(value: i16) -> Option<Weekday> {
    match value {
        0 => Some(Weekday::Mon),
        1 => Some(Weekday::Tue),
        2 => Some(Weekday::Wed),
        3 => Some(Weekday::Thu),
        4 => Some(Weekday::Fri),
        5 => Some(Weekday::Sat),
        6 => Some(Weekday::Sun),
        _ => None,
    }
}

pub fn weekday_to_db(day: Weekday) -> i16 {
    day.num_days_from_monday() as i16
}

/// Read-only view of a recipient's do-not-disturb flag and weekly schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientAvailability {
    pub do_not_disturb_active: bool,
    boundaries: Vec<TimeBoundary>,
}

impl RecipientAvailability {
    /// Keeps at most one boundary per weekday (the first one given wins),
    /// ordered Monday first.
    pub fn new(do_not_disturb_active: bool, boundaries: Vec<TimeBoundary>) -> Self {
        let mut unique: Vec<TimeBoundary> = Vec::with_capacity(boundaries.len().min(7));
        for boundary in boundaries {
            if unique
                .iter()
                .all(|b| b.day_of_week != boundary.day_of_week)
            {
                unique.push(boundary);
            }
        }
        unique.sort_by_key(|b| b.day_of_week.num_days_from_monday());

        Self {
            do_not_disturb_active,
            boundaries: unique,
        }
    }

    pub fn always_available() -> Self {
        Self::default()
    }

    pub fn boundaries(&self) -> &[TimeBoundary] {
        &self.boundaries
    }

    pub fn boundary_for(&self, day: Weekday) -> Option<&TimeBoundary> {
        self.boundaries.iter().find(|b| b.day_of_week == day)
    }

    /// Timezone the schedule is interpreted in; boundaries of one identity
    /// share it, UTC when nothing is configured.
    pub fn timezone(&self) -> Tz {
        self.boundaries
            .first()
            .map(|b| b.timezone)
            .unwrap_or(Tz::UTC)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnergyLevel {
    Low,
    Medium,
    High,
}

impl EnergyLevel {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}
