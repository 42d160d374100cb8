//! Parsing and formatting of time positions.
//!
//! Accepted forms are plain seconds (`93.5`), `M:S` and `H:M:S`, with the
//! minute and second fields below 60. Valid range is 0 to 359999.99 seconds
//! (one second short of 100 hours).

use anyhow::{anyhow, bail, Result};

pub const MAX_SECONDS: f64 = 359_999.99;

/// Parses a time string into seconds.
pub fn string_to_seconds(s: &str) -> Result<f64> {
    let fields: Vec<&str> = s.split(':').collect();
    if fields.len() > 3 {
        bail!("too many ':' in time \"{}\"", s);
    }

    let mut total = 0.0f64;
    for (i, field) in fields.iter().enumerate() {
        let last = i == fields.len() - 1;
        let value: f64 = field
            .parse()
            .map_err(|_| anyhow!("bad time field \"{}\"", field))?;
        if value < 0.0 {
            bail!("negative time field \"{}\"", field);
        }
        // Minute and second fields of a multi-field time must stay below 60.
        if fields.len() > 1 && i > 0 && value >= 60.0 {
            bail!("time field \"{}\" must be below 60", field);
        }
        if !last && value.fract() != 0.0 {
            bail!("non-integer hour/minute field \"{}\"", field);
        }
        total = total * 60.0 + value;
    }

    if total > MAX_SECONDS {
        bail!("time {} out of range (max {})", s, MAX_SECONDS);
    }
    Ok(total)
}

/// Formats seconds as a canonical time string with centisecond precision.
///
/// Uses the shortest of `S.cc`, `M:SS.cc` and `H:MM:SS.cc`.
pub fn seconds_to_string(t: f64) -> String {
    let t = t.clamp(0.0, MAX_SECONDS);
    // Work in centiseconds so carries round the same way they parse back.
    let total_cs = (t * 100.0).round() as u64;
    let cs = total_cs % 100;
    let total_s = total_cs / 100;
    let s = total_s % 60;
    let m = (total_s / 60) % 60;
    let h = total_s / 3600;

    if h > 0 {
        format!("{}:{:02}:{:02}.{:02}", h, m, s, cs)
    } else if m > 0 {
        format!("{}:{:02}.{:02}", m, s, cs)
    } else {
        format!("{}.{:02}", s, cs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_seconds() {
        assert_eq!(string_to_seconds("0").unwrap(), 0.0);
        assert_eq!(string_to_seconds("93.5").unwrap(), 93.5);
        assert_eq!(string_to_seconds("359999.99").unwrap(), 359_999.99);
    }

    #[test]
    fn parses_minutes_and_hours() {
        assert_eq!(string_to_seconds("1:30").unwrap(), 90.0);
        assert_eq!(string_to_seconds("2:03:04.5").unwrap(), 7384.5);
    }

    #[test]
    fn rejects_malformed() {
        assert!(string_to_seconds("1:60").is_err());
        assert!(string_to_seconds("1:2:3:4").is_err());
        assert!(string_to_seconds("-5").is_err());
        assert!(string_to_seconds("abc").is_err());
        assert!(string_to_seconds("360000").is_err());
    }

    #[test]
    fn round_trips_through_format() {
        for &t in &[0.0, 0.25, 59.99, 60.0, 61.5, 3599.0, 3600.0, 7384.5, 359_999.99] {
            let s = seconds_to_string(t);
            let back = string_to_seconds(&s).unwrap();
            assert!((back - t).abs() < 0.005, "{} -> {} -> {}", t, s, back);
        }
    }

    #[test]
    fn formats_shortest_form() {
        assert_eq!(seconds_to_string(5.0), "5.00");
        assert_eq!(seconds_to_string(90.0), "1:30.00");
        assert_eq!(seconds_to_string(3661.25), "1:01:01.25");
    }
}
