use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};

/// Layout of every persisted and streamed timestamp.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_timestamp(at: &DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn now_timestamp() -> String {
    format_timestamp(&Local::now())
}

/// Parses a user-supplied local timestamp. Accepts `YYYY-MM-DD HH:MM:SS`,
/// `YYYY-MM-DDTHH:MM:SS` and a bare `YYYY-MM-DD` (midnight).
pub fn parse_timestamp(input: &str) -> Option<DateTime<Local>> {
    let s = input.trim();
    let naive = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    Local.from_local_datetime(&naive).earliest()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn timestamp_round_trips_through_text() {
        let parsed = parse_timestamp("2024-03-09 07:05:01").unwrap();
        assert_eq!(format_timestamp(&parsed), "2024-03-09 07:05:01");
    }

    #[test]
    fn accepts_t_separator_and_bare_date() {
        let t = parse_timestamp("2024-03-09T07:05:01").unwrap();
        assert_eq!(t.hour(), 7);

        let d = parse_timestamp("2024-03-09").unwrap();
        assert_eq!(d.day(), 9);
        assert_eq!(d.hour(), 0);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn now_timestamp_has_fixed_width() {
        assert_eq!(now_timestamp().len(), 19);
    }
}
