//! Feed timestamp parsing
//!
//! Feeds disagree wildly about date formats. Parsing walks from the strict
//! library parsers down to a manual RFC 822 match with a named-zone table;
//! whatever survives comes out as UTC.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// Timestamp patterns seen in the wild, offset-bearing first
const OFFSET_PATTERNS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S %z",
    "%d %b %Y %H:%M:%S %z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%d %H:%M:%S%z",
];

const NAIVE_PATTERNS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%d-%m-%Y %H:%M:%S",
];

/// Named timezone abbreviations mapped to fixed offsets in seconds
const ZONE_OFFSETS: &[(&str, i32)] = &[
    ("IST", 5 * 3600 + 1800),
    ("GMT", 0),
    ("UTC", 0),
    ("PST", -8 * 3600),
    ("EST", -5 * 3600),
    ("BST", 3600),
    ("CET", 3600),
    ("JST", 9 * 3600),
    ("CST", -6 * 3600),
    ("MST", -7 * 3600),
];

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static DOUBLE_ZONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+(GMT|UTC)\s*([+-]\d{4})").unwrap());
static TRAILING_ZONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+([A-Z]{2,4})\s*$").unwrap());
static RFC822_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\w+),\s*(\d+)\s+(\w+)\s+(\d+)\s+(\d+):(\d+):(\d+)\s*([+-]\d{4}|\w+)?").unwrap()
});
static DATE_ONLY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{4}[-/]\d{1,2}[-/]\d{1,2})").unwrap());

/// Parse a feed timestamp into UTC. Returns None when nothing matches.
pub fn parse_feed_date(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let cleaned = clean_date_string(trimmed);

    try_library_parsers(&cleaned)
        .or_else(|| try_patterns(&cleaned))
        .or_else(|| try_manual_rfc822(trimmed))
        .or_else(|| try_date_only(trimmed))
}

fn clean_date_string(raw: &str) -> String {
    let collapsed = WHITESPACE_RE.replace_all(raw, " ");
    let no_double = DOUBLE_ZONE_RE.replace_all(&collapsed, " $2");
    let text = no_double.trim().to_string();

    // Rewrite a trailing named zone as its numeric offset so the strict
    // parsers never have to guess (RFC 2822 reads unknown names as +0000).
    if let Some(caps) = TRAILING_ZONE_RE.captures(&text) {
        if let Some((_, secs)) = ZONE_OFFSETS.iter().find(|(name, _)| *name == &caps[1]) {
            let sign = if *secs < 0 { '-' } else { '+' };
            let abs = secs.abs();
            let replacement = format!(" {}{:02}{:02}", sign, abs / 3600, (abs % 3600) / 60);
            return TRAILING_ZONE_RE
                .replace(&text, replacement.as_str())
                .trim()
                .to_string();
        }
    }
    text
}

fn try_library_parsers(cleaned: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(cleaned) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_rfc2822(cleaned) {
        return Some(parsed.with_timezone(&Utc));
    }
    None
}

fn try_patterns(cleaned: &str) -> Option<DateTime<Utc>> {
    for pattern in OFFSET_PATTERNS {
        if let Ok(parsed) = DateTime::parse_from_str(cleaned, pattern) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    for pattern in NAIVE_PATTERNS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(cleaned, pattern) {
            return Some(Utc.from_utc_datetime(&parsed));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(cleaned, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}

fn month_number(name: &str) -> Option<u32> {
    let idx = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ]
    .iter()
    .position(|m| name.starts_with(m))?;
    Some(idx as u32 + 1)
}

fn try_manual_rfc822(raw: &str) -> Option<DateTime<Utc>> {
    let caps = RFC822_RE.captures(raw)?;

    let day: u32 = caps[2].parse().ok()?;
    let month = month_number(&caps[3])?;
    let year: i32 = caps[4].parse().ok()?;
    let hour: u32 = caps[5].parse().ok()?;
    let minute: u32 = caps[6].parse().ok()?;
    let second: u32 = caps[7].parse().ok()?;

    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;

    let offset_secs = match caps.get(8).map(|m| m.as_str()) {
        Some(zone) if zone.starts_with('+') || zone.starts_with('-') => {
            let sign = if zone.starts_with('-') { -1 } else { 1 };
            let hours: i32 = zone[1..3].parse().ok()?;
            let minutes: i32 = zone[3..5].parse().ok()?;
            sign * (hours * 3600 + minutes * 60)
        }
        Some(zone) => ZONE_OFFSETS
            .iter()
            .find(|(name, _)| *name == zone)
            .map(|(_, secs)| *secs)
            .unwrap_or(0),
        None => 0,
    };

    let offset = FixedOffset::east_opt(offset_secs)?;
    let local = offset.from_local_datetime(&naive).single()?;
    Some(local.with_timezone(&Utc))
}

fn try_date_only(raw: &str) -> Option<DateTime<Utc>> {
    let caps = DATE_ONLY_RE.captures(raw)?;
    let date_part = caps[1].replace('/', "-");
    let date = NaiveDate::parse_from_str(&date_part, "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use rstest::rstest;

    #[rstest]
    #[case("Mon, 07 Aug 2023 15:30:00 +0530", "2023-08-07T10:00:00Z")]
    #[case("Tue, 08 Aug 2023 10:15:00 GMT", "2023-08-08T10:15:00Z")]
    #[case("2023-08-07T15:30:00Z", "2023-08-07T15:30:00Z")]
    #[case("2023-08-07T15:30:00+05:30", "2023-08-07T10:00:00Z")]
    #[case("2023-08-07 15:30:00", "2023-08-07T15:30:00Z")]
    #[case("07 Aug 2023 15:30:00 IST", "2023-08-07T10:00:00Z")]
    fn test_supported_formats(#[case] input: &str, #[case] expected: &str) {
        let parsed = parse_feed_date(input).expect("should parse");
        let expected = DateTime::parse_from_rfc3339(expected)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(parsed, expected, "input: {input}");
    }

    #[test]
    fn test_named_zone_table() {
        let pst = parse_feed_date("Mon, 07 Aug 2023 08:00:00 PST").unwrap();
        assert_eq!(pst.hour(), 16);

        let jst = parse_feed_date("Mon, 07 Aug 2023 09:00:00 JST").unwrap();
        assert_eq!(jst.hour(), 0);
    }

    #[test]
    fn test_date_only_fallback() {
        let parsed = parse_feed_date("posted on 2023/08/07 sometime").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2023, 8, 7, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_garbage_returns_none() {
        assert_eq!(parse_feed_date("not a date"), None);
        assert_eq!(parse_feed_date(""), None);
        assert_eq!(parse_feed_date("   "), None);
    }

    #[test]
    fn test_round_trip_is_utc() {
        let parsed = parse_feed_date("Mon, 07 Aug 2023 15:30:00 +0000").unwrap();
        let reparsed = parse_feed_date(&parsed.to_rfc3339()).unwrap();
        assert_eq!(parsed, reparsed);
    }
}
