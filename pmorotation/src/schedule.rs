//! Hourly schedule overrides
//!
//! A schedule entry pins a track to one (local date, hour) slot. While the
//! slot is current, the pinned track replaces the rotation's active track.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A (local calendar date, hour of day) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScheduleSlot {
    pub date: NaiveDate,
    pub hour: u8,
}

impl ScheduleSlot {
    /// Builds a slot, rejecting hours outside of `0..=23`.
    pub fn new(date: NaiveDate, hour: u32) -> Result<Self> {
        if hour > 23 {
            return Err(Error::InvalidHour(hour));
        }
        Ok(Self {
            date,
            hour: hour as u8,
        })
    }

    /// Parses a `YYYY-MM-DD` date
    pub fn parse(date: &str, hour: u32) -> Result<Self> {
        let date = parse_date(date)?;
        Self::new(date, hour)
    }
}

/// One scheduled override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub date: NaiveDate,
    pub hour: u8,
    #[serde(rename = "songId")]
    pub track_id: String,
}

impl ScheduleEntry {
    pub fn new(slot: ScheduleSlot, track_id: impl Into<String>) -> Self {
        Self {
            date: slot.date,
            hour: slot.hour,
            track_id: track_id.into(),
        }
    }

    pub fn slot(&self) -> ScheduleSlot {
        ScheduleSlot {
            date: self.date,
            hour: self.hour,
        }
    }

    fn matches(&self, slot: ScheduleSlot) -> bool {
        self.date == slot.date && self.hour == slot.hour
    }
}

/// Parses a calendar date in the `YYYY-MM-DD` form used by the planner
pub fn parse_date(date: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| Error::InvalidDate(date.to_string()))
}

/// Returns the track scheduled for `slot`, if any.
///
/// Exact match on date and hour; when the same slot appears twice the first
/// entry in stored order wins.
pub fn resolve_override(entries: &[ScheduleEntry], slot: ScheduleSlot) -> Option<&str> {
    entries
        .iter()
        .find(|entry| entry.matches(slot))
        .map(|entry| entry.track_id.as_str())
}

/// Ordered collection of schedule entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleTable {
    entries: Vec<ScheduleEntry>,
}

impl ScheduleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps entries as loaded, keeping their order (duplicates included).
    pub fn from_entries(entries: Vec<ScheduleEntry>) -> Self {
        Self { entries }
    }

    pub fn resolve_override(&self, slot: ScheduleSlot) -> Option<&str> {
        resolve_override(&self.entries, slot)
    }

    /// Assigns or clears a slot.
    ///
    /// Every existing entry for the slot is removed first, then the new one is
    /// appended when `track_id` is given and not empty.
    pub fn set_slot(&mut self, slot: ScheduleSlot, track_id: Option<&str>) {
        self.entries.retain(|entry| !entry.matches(slot));
        if let Some(id) = track_id.filter(|id| !id.is_empty()) {
            self.entries.push(ScheduleEntry::new(slot, id));
        }
    }

    /// Drops every entry pointing at `track_id`.
    ///
    /// Returns the number of removed entries.
    pub fn remove_track(&mut self, track_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.track_id != track_id);
        before - self.entries.len()
    }

    /// Entries of one day, by hour
    pub fn entries_for(&self, date: NaiveDate) -> Vec<&ScheduleEntry> {
        let mut day: Vec<&ScheduleEntry> =
            self.entries.iter().filter(|e| e.date == date).collect();
        day.sort_by_key(|e| e.hour);
        day
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ScheduleEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<ScheduleEntry> {
        self.entries
    }
}

impl<'a> IntoIterator for &'a ScheduleTable {
    type Item = &'a ScheduleEntry;
    type IntoIter = std::slice::Iter<'a, ScheduleEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(date: &str, hour: u32) -> ScheduleSlot {
        ScheduleSlot::parse(date, hour).unwrap()
    }

    #[test]
    fn test_resolve_override_exact_match() {
        let entries = vec![ScheduleEntry::new(slot("2024-03-10", 14), "S")];
        assert_eq!(resolve_override(&entries, slot("2024-03-10", 14)), Some("S"));
        assert_eq!(resolve_override(&entries, slot("2024-03-10", 15)), None);
        assert_eq!(resolve_override(&entries, slot("2024-03-11", 14)), None);
        assert_eq!(resolve_override(&[], slot("2024-03-10", 14)), None);
    }

    #[test]
    fn test_first_duplicate_wins() {
        let table = ScheduleTable::from_entries(vec![
            ScheduleEntry::new(slot("2024-03-10", 9), "first"),
            ScheduleEntry::new(slot("2024-03-10", 9), "second"),
        ]);
        assert_eq!(table.resolve_override(slot("2024-03-10", 9)), Some("first"));
    }

    #[test]
    fn test_set_slot_replaces_and_clears() {
        let mut table = ScheduleTable::from_entries(vec![
            ScheduleEntry::new(slot("2024-03-10", 9), "a"),
            ScheduleEntry::new(slot("2024-03-10", 9), "b"),
            ScheduleEntry::new(slot("2024-03-10", 10), "c"),
        ]);

        table.set_slot(slot("2024-03-10", 9), Some("d"));
        assert_eq!(table.len(), 2);
        assert_eq!(table.resolve_override(slot("2024-03-10", 9)), Some("d"));

        table.set_slot(slot("2024-03-10", 9), Some(""));
        assert_eq!(table.resolve_override(slot("2024-03-10", 9)), None);

        table.set_slot(slot("2024-03-10", 10), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_entries_for_day_sorted_by_hour() {
        let mut table = ScheduleTable::new();
        table.set_slot(slot("2024-03-10", 20), Some("late"));
        table.set_slot(slot("2024-03-11", 1), Some("other day"));
        table.set_slot(slot("2024-03-10", 6), Some("early"));

        let date = parse_date("2024-03-10").unwrap();
        let ids: Vec<&str> = table
            .entries_for(date)
            .iter()
            .map(|e| e.track_id.as_str())
            .collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[test]
    fn test_remove_track() {
        let mut table = ScheduleTable::new();
        table.set_slot(slot("2024-03-10", 1), Some("x"));
        table.set_slot(slot("2024-03-10", 2), Some("y"));
        table.set_slot(slot("2024-03-11", 1), Some("x"));
        assert_eq!(table.remove_track("x"), 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_invalid_slot_values() {
        assert!(matches!(
            ScheduleSlot::parse("2024-03-10", 24),
            Err(Error::InvalidHour(24))
        ));
        assert!(matches!(
            ScheduleSlot::parse("10/03/2024", 3),
            Err(Error::InvalidDate(_))
        ));
    }

    #[test]
    fn test_entry_serialized_shape() {
        let entry = ScheduleEntry::new(slot("2024-03-10", 14), "S");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"date": "2024-03-10", "hour": 14, "songId": "S"})
        );
    }
}
