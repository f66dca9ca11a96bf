//! Timestamp Matchers
//!
//! Compiles a [`TimeLayout`] into a regular expression that finds timestamps
//! written with that layout anywhere inside a log line.
//!
//! ## Group composition
//!
//! The layout may be embedded in a larger boundary pattern, with one
//! capturing group marking where the timestamp sits:
//!
//! ```text
//! ^\[(2006-01-02 15:04:05)\] (?:INFO|WARN)
//! ```
//!
//! Only the text inside the first capturing group is treated as a layout;
//! everything around it is kept as regex. Non-capturing groups are skipped
//! while looking for it, and `\(` / `\)` stand for literal parentheses
//! inside the layout.
//!
//! Tokens the layout compiler does not recognize are matched literally; no
//! validation of token combinations is attempted.

use crate::error::{Error, Result};
use crate::layout::{Field, LONG_DAYS, LONG_MONTHS, TimeLayout, Token};
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use std::borrow::Cow;
use std::ops::Range;

/// Name of the capture group holding the timestamp in compiled patterns
pub const TIMESTAMP_GROUP: &str = "timestamp";

/// Placeholder a multiline start pattern may use for the timestamp pattern
pub const TIMESTAMP_PLACEHOLDER: &str = "{timestamp}";

static LONG_MONTH_PATTERN: Lazy<String> =
    Lazy::new(|| format!("(?:{})", LONG_MONTHS.join("|")));
static MONTH_PATTERN: Lazy<String> = Lazy::new(|| alternation(&LONG_MONTHS, 3));
static LONG_DAY_PATTERN: Lazy<String> = Lazy::new(|| format!("(?:{})", LONG_DAYS.join("|")));
static DAY_PATTERN: Lazy<String> = Lazy::new(|| alternation(&LONG_DAYS, 3));

fn alternation(names: &[&str], len: usize) -> String {
    let short: Vec<&str> = names.iter().map(|n| &n[..len]).collect();
    format!("(?:{})", short.join("|"))
}

fn field_pattern(field: Field) -> &'static str {
    match field {
        Field::LongMonth => LONG_MONTH_PATTERN.as_str(),
        Field::Month => MONTH_PATTERN.as_str(),
        Field::LongWeekDay => LONG_DAY_PATTERN.as_str(),
        Field::WeekDay => DAY_PATTERN.as_str(),
        Field::LongYear => r"\d{4}",
        Field::ZeroYearDay => r"\d{3}",
        Field::UnderYearDay => r"(?:\d{3}| \d{2}|  \d)",
        Field::Year
        | Field::ZeroMonth
        | Field::ZeroDay
        | Field::Hour
        | Field::ZeroHour12
        | Field::ZeroMinute
        | Field::ZeroSecond => r"\d{2}",
        Field::UnderDay => r"(?:\d{2}| \d)",
        Field::NumMonth | Field::Day | Field::Hour12 | Field::Minute | Field::Second => {
            r"\d{1,2}"
        }
        Field::PM => "(?:AM|PM)",
        Field::Pm => "(?:am|pm)",
        Field::TzAbbr => r"(?:[A-Z]{3,5}|[+-]\d{4})",
        Field::IsoTz => r"(?:Z|[+-]\d{4})",
        Field::IsoColonTz => r"(?:Z|[+-]\d{2}:\d{2})",
        Field::IsoShortTz => r"(?:Z|[+-]\d{2})",
        Field::NumTz => r"[+-]\d{4}",
        Field::NumColonTz => r"[+-]\d{2}:\d{2}",
        Field::NumShortTz => r"[+-]\d{2}",
    }
}

fn fragment(token: &Token) -> Cow<'static, str> {
    match token {
        Token::Literal(text) => Cow::Owned(regex::escape(text)),
        Token::Field(field) => Cow::Borrowed(field_pattern(*field)),
        Token::Fraction {
            separator,
            digits,
            trim_zeros,
        } => {
            let sep = regex::escape(separator.encode_utf8(&mut [0; 4]));
            if *trim_zeros {
                Cow::Owned(format!(r"(?:{}\d{{1,{}}})?", sep, digits))
            } else {
                Cow::Owned(format!(r"{}\d{{{}}}", sep, digits))
            }
        }
    }
}

/// Regex fragment matching every value the layout formats
pub fn pattern(layout: &TimeLayout) -> String {
    match layout.epoch() {
        Some(unit) if unit.is_fractional() => r"\d+\.\d+".to_string(),
        Some(_) => r"\d+".to_string(),
        None => layout.tokens().iter().map(fragment).collect(),
    }
}

/// A boundary pattern split around its timestamp group
#[derive(Debug, Clone, PartialEq, Eq)]
struct Composition<'a> {
    prefix: &'a str,
    layout: String,
    suffix: &'a str,
}

fn unescape_parens(layout: &str) -> String {
    layout.replace(r"\(", "(").replace(r"\)", ")")
}

/// Locate the first capturing group, skipping `(?...)` groups and escapes
fn split_group(spec: &str) -> Result<Composition<'_>> {
    let bytes = spec.as_bytes();
    // (position of the group's paren, start of the layout inside it)
    let mut group = None;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'(' => {
                let rest = &spec[i + 1..];
                if rest.starts_with("?P<") || rest.starts_with("?<") {
                    if let Some(end) = rest.find('>') {
                        group = Some((i, i + end + 2));
                        break;
                    }
                } else if !rest.starts_with('?') {
                    group = Some((i, i + 1));
                    break;
                }
            }
            _ => {}
        }
        i += 1;
    }

    let Some((paren, open)) = group else {
        return Ok(Composition {
            prefix: "",
            layout: unescape_parens(spec),
            suffix: "",
        });
    };

    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b')' => {
                return Ok(Composition {
                    prefix: &spec[..paren],
                    layout: unescape_parens(&spec[open..i]),
                    suffix: &spec[i + 1..],
                });
            }
            _ => {}
        }
        i += 1;
    }
    Err(Error::UnclosedGroup(spec.to_string()))
}

/// Matcher for timestamps of one layout, optionally inside a boundary pattern
#[derive(Debug, Clone)]
pub struct CompiledMatcher {
    regex: Regex,
    layout: TimeLayout,
}

impl CompiledMatcher {
    /// Compile a bare layout or a boundary pattern with one capturing group
    pub fn compile(spec: &str) -> Result<Self> {
        let composition = split_group(spec)?;
        let layout = TimeLayout::new(&composition.layout)?;
        let source = format!(
            "{}(?P<{}>{}){}",
            composition.prefix,
            TIMESTAMP_GROUP,
            pattern(&layout),
            composition.suffix
        );
        Ok(Self {
            regex: Regex::new(&source)?,
            layout,
        })
    }

    /// Layout of the timestamp this matcher locates
    pub fn layout(&self) -> &TimeLayout {
        &self.layout
    }

    /// Source of the combined pattern
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    pub fn is_match(&self, line: &[u8]) -> bool {
        self.regex.is_match(line)
    }

    /// Byte span of the timestamp inside `event`
    pub fn find(&self, event: &[u8]) -> Option<Range<usize>> {
        self.regex
            .captures(event)?
            .name(TIMESTAMP_GROUP)
            .map(|m| m.range())
    }
}

/// Compile a multiline start pattern, substituting `{timestamp}` if present
pub fn multiline_start(pattern: &str, timestamp: Option<&CompiledMatcher>) -> Result<Regex> {
    let source = match timestamp {
        Some(matcher) if pattern.contains(TIMESTAMP_PLACEHOLDER) => {
            pattern.replace(TIMESTAMP_PLACEHOLDER, matcher.as_str())
        }
        _ => pattern.to_string(),
    };
    Ok(Regex::new(&source)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, FixedOffset, Months};

    const LAYOUTS: &[&str] = &[
        "Mon Jan _2 15:04:05 2006",
        "Mon Jan _2 15:04:05 MST 2006",
        "Mon Jan 02 15:04:05 -0700 2006",
        "02 Jan 06 15:04 MST",
        "02 Jan 06 15:04 -0700",
        "Monday, 02-Jan-06 15:04:05 MST",
        "Mon, 02 Jan 2006 15:04:05 MST",
        "Mon, 02 Jan 2006 15:04:05 -0700",
        "2006-01-02T15:04:05Z07:00",
        "2006-01-02T15:04:05.999999999Z07:00",
        "3:04PM",
        "Jan _2 15:04:05",
        "Jan _2 15:04:05.000",
        "Jan _2 15:04:05.000000",
        "Jan _2 15:04:05.000000000",
        "15:04:05 MST 2006/01/02",
        "January 2, 2006 3:04:05.999 pm",
        "2006-002 15:04:05,000",
        "unix",
        "unixmilli",
        "unixnano",
        "unix.milli",
        "unix.nano",
    ];

    fn assert_roundtrip(t: DateTime<FixedOffset>) {
        for layout in LAYOUTS {
            let matcher = CompiledMatcher::compile(layout).unwrap();
            let formatted = matcher.layout().format(&t);
            let found = matcher.find(formatted.as_bytes());
            assert_eq!(
                found,
                Some(0..formatted.len()),
                "pattern `{}` from layout `{}` does not match `{}`",
                matcher.as_str(),
                layout,
                formatted
            );
        }
    }

    fn bases() -> Vec<DateTime<FixedOffset>> {
        vec![
            DateTime::parse_from_rfc3339("2024-02-28T23:58:30.104030201Z").unwrap(),
            DateTime::parse_from_rfc3339("2019-07-04T09:03:07.5-07:00").unwrap(),
            DateTime::parse_from_rfc3339("2021-12-31T11:59:59+05:30").unwrap(),
        ]
    }

    #[test]
    fn test_roundtrip_across_milliseconds_and_seconds() {
        for base in bases() {
            for i in 0..1000 {
                assert_roundtrip(base + Duration::milliseconds(i));
            }
            for i in 0..60 {
                assert_roundtrip(base + Duration::seconds(i));
            }
        }
    }

    #[test]
    fn test_roundtrip_across_minutes_hours_days_years() {
        for base in bases() {
            for i in 0..60 {
                assert_roundtrip(base + Duration::minutes(i));
            }
            for i in 0..24 {
                assert_roundtrip(base + Duration::hours(i));
            }
            for i in 0..366 {
                assert_roundtrip(base + Duration::days(i));
            }
            for i in 0..100 {
                assert_roundtrip(base + Months::new(12 * i));
            }
        }
    }

    #[test]
    fn test_pattern_fragments() {
        let layout = TimeLayout::new("Jan _2 15:04:05.000").unwrap();
        assert_eq!(
            pattern(&layout),
            r"(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec) (?:\d{2}| \d) \d{2}:\d{2}:\d{2}\.\d{3}"
        );
        let layout = TimeLayout::new("unix.nano").unwrap();
        assert_eq!(pattern(&layout), r"\d+\.\d+");
    }

    #[test]
    fn test_group_composition_locates_timestamp() {
        let matcher = CompiledMatcher::compile(r"^\[(2006-01-02 15:04:05)\] ").unwrap();
        assert_eq!(matcher.layout().as_str(), "2006-01-02 15:04:05");

        let line = b"[2021-01-01 10:00:00] hello 2021-01-01 11:00:00";
        assert_eq!(matcher.find(line), Some(1..20));
        assert!(!matcher.is_match(b"continuation 2021-01-01 10:00:00"));
    }

    #[test]
    fn test_group_composition_skips_non_capturing_groups() {
        let matcher = CompiledMatcher::compile(r"^(?:INFO|WARN) (Jan _2 15:04:05)").unwrap();
        assert_eq!(matcher.layout().as_str(), "Jan _2 15:04:05");
        assert_eq!(matcher.find(b"WARN Mar  3 10:00:00 disk"), Some(5..20));
        assert_eq!(matcher.find(b"DEBUG Mar  3 10:00:00 disk"), None);
    }

    #[test]
    fn test_escaped_parentheses_stay_in_layout() {
        let matcher = CompiledMatcher::compile(r"^<(\(Mon\) 15:04:05)>").unwrap();
        assert_eq!(matcher.layout().as_str(), "(Mon) 15:04:05");
        let line = b"<(Sun) 10:20:30> ready";
        let span = matcher.find(line).unwrap();
        assert_eq!(&line[span], b"(Sun) 10:20:30");

        let bare = CompiledMatcher::compile(r"\(Mon\) 15:04").unwrap();
        assert_eq!(bare.layout().as_str(), "(Mon) 15:04");
    }

    #[test]
    fn test_named_group_marks_timestamp() {
        let matcher = CompiledMatcher::compile(r"^ts=(?P<when>2006-01-02) ").unwrap();
        assert_eq!(matcher.layout().as_str(), "2006-01-02");
        assert_eq!(matcher.find(b"ts=2020-05-06 x"), Some(3..13));
    }

    #[test]
    fn test_unclosed_group_is_an_error() {
        assert!(matches!(
            CompiledMatcher::compile(r"^\[(2006-01-02"),
            Err(Error::UnclosedGroup(_))
        ));
    }

    #[test]
    fn test_unknown_tokens_match_literally() {
        let matcher = CompiledMatcher::compile("hello world").unwrap();
        assert_eq!(matcher.find(b"say hello world"), Some(4..15));
    }

    #[test]
    fn test_multiline_start_placeholder() {
        let ts = CompiledMatcher::compile("2006-01-02").unwrap();
        let start = multiline_start(r"^{timestamp} ", Some(&ts)).unwrap();
        assert!(start.is_match(b"2020-01-01 first line"));
        assert!(!start.is_match(b"  at stack frame"));

        let plain = multiline_start(r"^\d", None).unwrap();
        assert!(plain.is_match(b"1 header"));
    }
}
