//! Audio offset timecodes
//!
//! Offsets are stored as `mm:ss` or `hh:mm:ss` strings and handed to the
//! external pipeline verbatim; these helpers validate and convert them.

use crate::{Error, Result};

/// Default offset for a new project
pub const DEFAULT_OFFSET: &str = "00:00";

/// Parse `mm:ss` or `hh:mm:ss` into whole seconds.
///
/// Minutes and seconds fields must be below 60 when an hour field is
/// present; a two-field form allows any minute count (`90:00`).
///
/// # Examples
///
/// ```
/// use beatreel_common::timecode::parse_offset;
///
/// assert_eq!(parse_offset("01:30").unwrap(), 90);
/// assert_eq!(parse_offset("1:02:03").unwrap(), 3723);
/// assert!(parse_offset("1:2:3:4").is_err());
/// ```
pub fn parse_offset(value: &str) -> Result<u64> {
    let trimmed = value.trim();
    let invalid = || Error::InvalidInput(format!("Invalid time offset '{}': expected mm:ss or hh:mm:ss", value));

    let fields: Vec<&str> = trimmed.split(':').collect();
    if fields.iter().any(|f| f.is_empty() || !f.chars().all(|c| c.is_ascii_digit())) {
        return Err(invalid());
    }
    let numbers: Vec<u64> = fields
        .iter()
        .map(|f| f.parse::<u64>().map_err(|_| invalid()))
        .collect::<Result<_>>()?;

    let total = match numbers.as_slice() {
        [minutes, seconds] if *seconds < 60 => {
            minutes.checked_mul(60).and_then(|m| m.checked_add(*seconds))
        }
        [hours, minutes, seconds] if *minutes < 60 && *seconds < 60 => hours
            .checked_mul(3600)
            .and_then(|h| h.checked_add(minutes * 60 + seconds)),
        _ => return Err(invalid()),
    };
    total.ok_or_else(invalid)
}

/// Format whole seconds as `mm:ss`, or `hh:mm:ss` from one hour up.
pub fn format_offset(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// Validate and normalize an offset to its canonical form.
pub fn normalize_offset(value: &str) -> Result<String> {
    parse_offset(value).map(format_offset)
}
