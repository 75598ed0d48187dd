//! Interval scheduling algebra for the weekly heating program.
//!
//! A day's schedule is a fixed-capacity ordered array of non-overlapping
//! time-of-day ranges. Occupied slots form a contiguous prefix sorted by
//! start time; insertion merges overlapping or touching intervals so no two
//! stored intervals ever touch.

use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};

pub const SLOTS_PER_DAY: usize = 10;
pub const DAYS_PER_WEEK: usize = 7;

pub const SECONDS_PER_MINUTE: u32 = 60;
pub const SECONDS_PER_HOUR: u32 = 3_600;
pub const SECONDS_PER_DAY: u32 = 86_400;

/// A heating interval within one day, in seconds since local midnight.
/// Invariant: `start_sec < end_sec <= 86400`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSlot {
    #[serde(rename = "startSec")]
    pub start_sec: u32,
    #[serde(rename = "endSec")]
    pub end_sec: u32,
}

/// One day's schedule: up to [`SLOTS_PER_DAY`] intervals. Occupied slots
/// are a contiguous prefix, sorted ascending by start, pairwise disjoint
/// and non-touching; everything after the prefix is `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaySchedule {
    slots: [Option<IntervalSlot>; SLOTS_PER_DAY],
}

impl DaySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `[start_text, end_text)` given as `"HH:MM:SS"`, resolving
    /// overlaps by merging. An end time of exactly `00:00:00` means end of
    /// day. Returns false (schedule unchanged) for out-of-range or
    /// zero-length input, or when the array is full and nothing merges.
    pub fn insert(&mut self, start_text: &str, end_text: &str) -> bool {
        let start = parse_daytime(start_text);
        let mut end = parse_daytime(end_text);
        if end == 0 {
            end = SECONDS_PER_DAY;
        }

        if start >= SECONDS_PER_DAY || end > SECONDS_PER_DAY || start >= end {
            return false;
        }

        // First slot that is free or ends at/after the new start; every
        // occupied slot before it ends strictly before `start`.
        let index = match (0..SLOTS_PER_DAY).find(|&i| match self.slots[i] {
            None => true,
            Some(slot) => slot.end_sec >= start,
        }) {
            Some(index) => index,
            None => return false,
        };

        let Some(slot) = self.slots[index] else {
            self.slots[index] = Some(IntervalSlot {
                start_sec: start,
                end_sec: end,
            });
            return true;
        };

        // Fully contained: nothing to do.
        if start >= slot.start_sec && end <= slot.end_sec {
            return true;
        }

        // Ends strictly before this slot: shift the tail up to make room.
        if end < slot.start_sec {
            if self.slots[SLOTS_PER_DAY - 1].is_some() {
                return false;
            }
            for i in (index..SLOTS_PER_DAY - 1).rev() {
                self.slots[i + 1] = self.slots[i];
            }
            self.slots[index] = Some(IntervalSlot {
                start_sec: start,
                end_sec: end,
            });
            return true;
        }

        // Overlap or adjacency: grow this slot, absorbing every following
        // slot the new interval reaches, then compact the tail down.
        let mut merged = slot;
        merged.start_sec = merged.start_sec.min(start);

        let mut last = index;
        while last + 1 < SLOTS_PER_DAY {
            match self.slots[last + 1] {
                Some(next) if next.start_sec <= end => last += 1,
                _ => break,
            }
        }

        let absorbed_end = self.slots[last].map(|s| s.end_sec).unwrap_or(end);
        merged.end_sec = end.max(absorbed_end);
        self.slots[index] = Some(merged);

        let mut write = index + 1;
        for read in last + 1..SLOTS_PER_DAY {
            self.slots[write] = self.slots[read].take();
            write += 1;
        }
        for slot in &mut self.slots[write..] {
            *slot = None;
        }

        true
    }

    /// Marks every slot free. Idempotent.
    pub fn clear(&mut self) {
        self.slots = Default::default();
    }

    /// True iff the time of day falls inside a stored interval, inclusive
    /// on both ends.
    pub fn contains(&self, time_of_day_sec: u32) -> bool {
        if time_of_day_sec > SECONDS_PER_DAY {
            return false;
        }

        for slot in &self.slots {
            match slot {
                None => return false,
                Some(slot) if slot.end_sec >= time_of_day_sec => {
                    return time_of_day_sec >= slot.start_sec;
                }
                Some(_) => {}
            }
        }
        false
    }

    /// Renders `"HH:MM/HH:MM, HH:MM/HH:MM"` at minute resolution, empty
    /// when the day is fully free.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for slot in self.iter() {
            if !out.is_empty() {
                out.push_str(", ");
            }
            out.push_str(&format!(
                "{:02}:{:02}/{:02}:{:02}",
                slot.start_sec / SECONDS_PER_HOUR,
                (slot.start_sec % SECONDS_PER_HOUR) / SECONDS_PER_MINUTE,
                slot.end_sec / SECONDS_PER_HOUR,
                (slot.end_sec % SECONDS_PER_HOUR) / SECONDS_PER_MINUTE,
            ));
        }
        out
    }

    /// The occupied prefix, in order.
    pub fn iter(&self) -> impl Iterator<Item = &IntervalSlot> {
        self.slots.iter().map_while(|slot| slot.as_ref())
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots[0].is_none()
    }
}

/// Lenient `"HH:MM:SS"` parse: any field that fails to parse reads as
/// zero, so malformed input degrades toward midnight instead of erroring.
/// Out-of-range results are still rejected by the insert range check.
fn parse_daytime(text: &str) -> u32 {
    let mut fields = text.splitn(3, ':');
    let mut next = || {
        fields
            .next()
            .and_then(|field| field.trim().parse::<u32>().ok())
            .unwrap_or(0)
    };
    let hours = u64::from(next());
    let minutes = u64::from(next());
    let seconds = u64::from(next());

    // Summed in u64: a parseable but huge field must saturate, not wrap
    // back into the valid range.
    let total = hours * u64::from(SECONDS_PER_HOUR)
        + minutes * u64::from(SECONDS_PER_MINUTE)
        + seconds;
    u32::try_from(total).unwrap_or(u32::MAX)
}

/// Days indexed 0 = Sunday .. 6 = Saturday, matching `tm_wday`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Weekday {
    Sun,
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
}

impl Weekday {
    pub const ALL: [Weekday; DAYS_PER_WEEK] = [
        Self::Sun,
        Self::Mon,
        Self::Tue,
        Self::Wed,
        Self::Thu,
        Self::Fri,
        Self::Sat,
    ];

    pub fn index(self) -> usize {
        match self {
            Self::Sun => 0,
            Self::Mon => 1,
            Self::Tue => 2,
            Self::Wed => 3,
            Self::Thu => 4,
            Self::Fri => 5,
            Self::Sat => 6,
        }
    }

    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % DAYS_PER_WEEK]
    }

    pub fn from_chrono(weekday: chrono::Weekday) -> Self {
        Self::from_index(weekday.num_days_from_sunday() as usize)
    }

    /// Key used for this day's rendered program in state payloads.
    pub fn json_key(self) -> &'static str {
        match self {
            Self::Sun => "sundayProg",
            Self::Mon => "mondayProg",
            Self::Tue => "tuesdayProg",
            Self::Wed => "wednesdayProg",
            Self::Thu => "thursdayProg",
            Self::Fri => "fridayProg",
            Self::Sat => "saturdayProg",
        }
    }
}

/// The full weekly program: seven independently mutable day schedules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeekSchedule {
    days: [DaySchedule; DAYS_PER_WEEK],
}

impl WeekSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn day(&self, day: Weekday) -> &DaySchedule {
        &self.days[day.index()]
    }

    pub fn day_mut(&mut self, day: Weekday) -> &mut DaySchedule {
        &mut self.days[day.index()]
    }

    /// True iff the given local wall-clock instant falls inside that
    /// weekday's program.
    pub fn contains_local<Tz: chrono::TimeZone>(&self, now: &chrono::DateTime<Tz>) -> bool {
        let day = Weekday::from_chrono(now.weekday());
        self.day(day).contains(now.num_seconds_from_midnight())
    }
}
