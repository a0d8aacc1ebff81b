//! Slot placement rules
//!
//! Time math is same-day wall-clock minutes. Ranges never wrap past
//! midnight.

use crate::types::{minute_of_day, TimeSlot};
use crate::{Error, Result};
use chrono::NaiveTime;

/// Default minimum gap between two slots of one provider on one day
pub const DEFAULT_MIN_GAP_MINUTES: i64 = 90;

/// `end` must be strictly after `start`
pub fn validate_range(start: NaiveTime, end: NaiveTime) -> Result<()> {
    if end <= start {
        return Err(Error::Validation(
            "End time must be after start time.".to_string(),
        ));
    }
    Ok(())
}

/// Whether `[start, end]` keeps `gap` minutes clear of `[other_start, other_end]`
pub fn keeps_gap(
    start: NaiveTime,
    end: NaiveTime,
    other_start: NaiveTime,
    other_end: NaiveTime,
    gap: i64,
) -> bool {
    let (s, e) = (minute_of_day(start), minute_of_day(end));
    let (os, oe) = (minute_of_day(other_start), minute_of_day(other_end));
    e + gap <= os || s >= oe + gap
}

/// Full placement check against the provider's other slots that day
pub fn check_placement(
    start: NaiveTime,
    end: NaiveTime,
    existing: &[TimeSlot],
    gap: i64,
) -> Result<()> {
    validate_range(start, end)?;

    if let Some(clash) = existing
        .iter()
        .find(|slot| !keeps_gap(start, end, slot.start, slot.end, gap))
    {
        return Err(Error::Validation(format!(
            "Time slot {}-{} must be at least {} minutes apart from existing slot {}-{}.",
            start.format("%H:%M"),
            end.format("%H:%M"),
            gap,
            clash.start.format("%H:%M"),
            clash.end.format("%H:%M"),
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn slot(start: NaiveTime, end: NaiveTime) -> TimeSlot {
        TimeSlot {
            id: Uuid::new_v4(),
            window_id: Uuid::new_v4(),
            start,
            end,
        }
    }

    #[test]
    fn test_end_after_start() {
        assert!(validate_range(t(10, 0), t(10, 0)).is_err());
        assert!(validate_range(t(11, 0), t(10, 0)).is_err());
        assert!(validate_range(t(10, 0), t(10, 1)).is_ok());
    }

    #[test]
    fn test_gap_boundaries() {
        let existing = [slot(t(10, 0), t(11, 0))];
        // 60 minutes after the end is too close
        assert!(check_placement(t(12, 0), t(13, 0), &existing, 90).is_err());
        // exactly 90 minutes after is fine
        assert!(check_placement(t(12, 30), t(13, 30), &existing, 90).is_ok());
        // ending exactly 90 minutes before is fine
        assert!(check_placement(t(7, 30), t(8, 30), &existing, 90).is_ok());
        assert!(check_placement(t(7, 31), t(8, 31), &existing, 90).is_err());
        // overlap
        assert!(check_placement(t(10, 30), t(11, 30), &existing, 90).is_err());
    }

    #[test]
    fn test_no_existing_slots() {
        assert!(check_placement(t(0, 0), t(23, 59), &[], 90).is_ok());
    }
}
