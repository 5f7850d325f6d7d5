use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};

const NAIVE_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Parse a source timestamp. Values carrying an offset keep it; naive values
/// (the source's "floating" timestamps) are interpreted in `local_offset`.
pub fn parse_timestamp(raw: &str, local_offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(ts);
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;

    local_offset.from_local_datetime(&naive).single()
}

/// Offset `hours` east of UTC, falling back to UTC for impossible values.
pub fn offset_hours(hours: i32) -> FixedOffset {
    FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| Utc.fix())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floating_timestamp_uses_local_offset() {
        let bogota = offset_hours(-5);
        let ts = parse_timestamp("2024-01-01T00:00:00.000", bogota).unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-01-01T00:00:00-05:00");
    }

    #[test]
    fn test_explicit_offset_is_kept() {
        let ts = parse_timestamp("2024-01-01T05:00:00+00:00", offset_hours(-5)).unwrap();
        assert_eq!(ts.offset().local_minus_utc(), 0);
    }

    #[test]
    fn test_other_formats() {
        let offset = offset_hours(-5);
        assert!(parse_timestamp("2024-01-01 13:45:00", offset).is_some());
        assert!(parse_timestamp("2024-01-01", offset).is_some());
        assert!(parse_timestamp("", offset).is_none());
        assert!(parse_timestamp("yesterday", offset).is_none());
    }
}
