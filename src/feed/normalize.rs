use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// HTML entities decoded after tag stripping. Nothing else is decoded.
const ENTITIES: [(&str, &str); 6] = [
    ("&nbsp;", " "),
    ("&amp;", "&"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
];

/// Converts an HTML-ish description into plain text.
///
/// Strips every `<...>` tag, decodes the fixed entity set above in order,
/// then trims surrounding whitespace.
///
/// # Examples
///
/// ```
/// use podsync::feed::sanitize_description;
///
/// assert_eq!(sanitize_description("<p>Tom &amp; Jerry</p>"), "Tom & Jerry");
/// ```
pub fn sanitize_description(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        text.push_str(&rest[..open]);
        match rest[open + 1..].find('>') {
            // A tag needs at least one character between the brackets
            Some(0) => {
                text.push_str("<>");
                rest = &rest[open + 2..];
            }
            Some(close) => rest = &rest[open + close + 2..],
            None => {
                text.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    text.push_str(rest);

    let decoded = ENTITIES
        .iter()
        .fold(text, |acc, (entity, replacement)| acc.replace(entity, replacement));

    decoded.trim().to_string()
}

/// Normalizes an `itunes:duration` value to a display string.
///
/// - `digits:digits` (optionally `:digits` again) passes through unchanged
/// - a positive integer is seconds, rendered `H:MM:SS` or `M:SS`
/// - anything else yields an empty string
///
/// # Examples
///
/// ```
/// use podsync::feed::normalize_duration;
///
/// assert_eq!(normalize_duration("125"), "2:05");
/// assert_eq!(normalize_duration("3:45"), "3:45");
/// assert_eq!(normalize_duration("abc"), "");
/// ```
pub fn normalize_duration(raw: &str) -> String {
    let value = raw.trim();

    if is_clock_format(value) {
        return value.to_string();
    }

    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return String::new();
    }

    match value.parse::<u64>() {
        Ok(seconds) if seconds > 0 => format_seconds(seconds),
        _ => String::new(),
    }
}

fn is_clock_format(value: &str) -> bool {
    let parts: Vec<&str> = value.split(':').collect();
    (2..=3).contains(&parts.len())
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}

fn format_seconds(total: u64) -> String {
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// Parses a feed date into unix seconds.
///
/// Accepts RFC 2822 (RSS), RFC 3339 (Atom) and a few naive forms that are
/// read as UTC. Returns `None` on any failure; an absent date means
/// "unknown" and sorts as oldest.
pub fn normalize_date(raw: &str) -> Option<i64> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.timestamp());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp());
    }

    const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%a, %d %b %Y %H:%M:%S"];
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.and_utc().timestamp());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp());
    }

    tracing::debug!(date = %value, "Unparseable feed date, treating as unknown");
    None
}
