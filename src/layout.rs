//! Time Layouts
//!
//! A time layout describes how a timestamp is written into a log line, using
//! the reference-time notation (`Mon Jan 2 15:04:05 MST 2006`): each element
//! of the reference instant stands for the matching component of the value.
//!
//! Layouts are tokenized once by an ordered rule table. At every position the
//! rules are tried top to bottom and the first accepted prefix wins, so
//! `2006` is claimed before `2`, `002` before `02`, `15` before `1` and
//! `__2` before `_2`. Anything no rule claims is kept as literal text.
//!
//! Five whole-layout values bypass tokenization and describe epoch numbers:
//! `unix`, `unixmilli`, `unixnano` (integers) and `unix.milli`, `unix.nano`
//! (seconds with a fractional part).

use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeZone, Timelike};
use std::fmt::Write as _;

pub const LONG_MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Sunday first, matching `Weekday::num_days_from_sunday`
pub const LONG_DAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

const ZONE_ABBREVIATIONS: &[(&str, i32)] = &[
    ("UTC", 0),
    ("GMT", 0),
    ("EST", -5 * 3600),
    ("EDT", -4 * 3600),
    ("CST", -6 * 3600),
    ("CDT", -5 * 3600),
    ("MST", -7 * 3600),
    ("MDT", -6 * 3600),
    ("PST", -8 * 3600),
    ("PDT", -7 * 3600),
];

/// A date/time component placeholder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// `January`
    LongMonth,
    /// `Jan`
    Month,
    /// `1`
    NumMonth,
    /// `01`
    ZeroMonth,
    /// `Monday`
    LongWeekDay,
    /// `Mon`
    WeekDay,
    /// `2`
    Day,
    /// `_2`
    UnderDay,
    /// `02`
    ZeroDay,
    /// `__2`
    UnderYearDay,
    /// `002`
    ZeroYearDay,
    /// `15`
    Hour,
    /// `3`
    Hour12,
    /// `03`
    ZeroHour12,
    /// `4`
    Minute,
    /// `04`
    ZeroMinute,
    /// `5`
    Second,
    /// `05`
    ZeroSecond,
    /// `2006`
    LongYear,
    /// `06`
    Year,
    /// `PM`
    PM,
    /// `pm`
    Pm,
    /// `MST`
    TzAbbr,
    /// `Z0700`
    IsoTz,
    /// `Z07:00`
    IsoColonTz,
    /// `Z07`
    IsoShortTz,
    /// `-0700`
    NumTz,
    /// `-07:00`
    NumColonTz,
    /// `-07`
    NumShortTz,
}

/// One element of a tokenized layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(String),
    Field(Field),
    /// `.000` (fixed width) or `.999` (trailing zeros trimmed)
    Fraction {
        separator: char,
        digits: usize,
        trim_zeros: bool,
    },
}

/// Epoch-number layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochUnit {
    Seconds,
    Millis,
    Nanos,
    SecondsMillis,
    SecondsNanos,
}

impl EpochUnit {
    fn from_layout(layout: &str) -> Option<Self> {
        match layout {
            "unix" => Some(Self::Seconds),
            "unixmilli" => Some(Self::Millis),
            "unixnano" => Some(Self::Nanos),
            "unix.milli" => Some(Self::SecondsMillis),
            "unix.nano" => Some(Self::SecondsNanos),
            _ => None,
        }
    }

    /// Whether values carry a `.fraction` part
    pub fn is_fractional(self) -> bool {
        matches!(self, Self::SecondsMillis | Self::SecondsNanos)
    }
}

struct Rule {
    prefix: &'static str,
    field: Field,
    accept: fn(&str) -> bool,
}

fn any(_: &str) -> bool {
    true
}

fn not_lowercase(rest: &str) -> bool {
    !rest.starts_with(|c: char| c.is_ascii_lowercase())
}

// `_2006` is a literal underscore followed by the year.
fn not_long_year(rest: &str) -> bool {
    !rest.starts_with("006")
}

const fn rule(prefix: &'static str, field: Field) -> Rule {
    Rule {
        prefix,
        field,
        accept: any,
    }
}

/// Ordered tokenization rules, longest candidates first within each lead character
const RULES: &[Rule] = &[
    rule("January", Field::LongMonth),
    Rule {
        prefix: "Jan",
        field: Field::Month,
        accept: not_lowercase,
    },
    rule("Monday", Field::LongWeekDay),
    Rule {
        prefix: "Mon",
        field: Field::WeekDay,
        accept: not_lowercase,
    },
    rule("MST", Field::TzAbbr),
    rule("002", Field::ZeroYearDay),
    rule("01", Field::ZeroMonth),
    rule("02", Field::ZeroDay),
    rule("03", Field::ZeroHour12),
    rule("04", Field::ZeroMinute),
    rule("05", Field::ZeroSecond),
    rule("06", Field::Year),
    rule("15", Field::Hour),
    rule("1", Field::NumMonth),
    rule("2006", Field::LongYear),
    rule("2", Field::Day),
    rule("3", Field::Hour12),
    rule("4", Field::Minute),
    rule("5", Field::Second),
    rule("__2", Field::UnderYearDay),
    Rule {
        prefix: "_2",
        field: Field::UnderDay,
        accept: not_long_year,
    },
    rule("PM", Field::PM),
    rule("pm", Field::Pm),
    rule("Z07:00", Field::IsoColonTz),
    rule("Z0700", Field::IsoTz),
    rule("Z07", Field::IsoShortTz),
    rule("-07:00", Field::NumColonTz),
    rule("-0700", Field::NumTz),
    rule("-07", Field::NumShortTz),
];

fn match_rule(rest: &str) -> Option<(usize, Token)> {
    RULES.iter().find_map(|r| {
        let tail = rest.strip_prefix(r.prefix)?;
        (r.accept)(tail).then(|| (r.prefix.len(), Token::Field(r.field)))
    })
}

fn match_fraction(rest: &str) -> Option<(usize, Token)> {
    let mut chars = rest.chars();
    let separator = chars.next().filter(|c| *c == '.' || *c == ',')?;
    let digit = chars.next().filter(|c| *c == '0' || *c == '9')?;
    let digits = rest[1..].chars().take_while(|c| *c == digit).count();
    if rest[1 + digits..].starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    Some((
        1 + digits,
        Token::Fraction {
            separator,
            digits,
            trim_zeros: digit == '9',
        },
    ))
}

/// Split a layout into literal text and placeholders
pub fn tokenize(layout: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut rest = layout;

    while let Some(c) = rest.chars().next() {
        match match_fraction(rest).or_else(|| match_rule(rest)) {
            Some((len, token)) => {
                if !literal.is_empty() {
                    tokens.push(Token::Literal(std::mem::take(&mut literal)));
                }
                tokens.push(token);
                rest = &rest[len..];
            }
            None => {
                literal.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }
    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    tokens
}

/// Parse outcome before it is wrapped with layout context
type Parsed = std::result::Result<DateTime<FixedOffset>, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Epoch(EpochUnit),
    Tokens(Vec<Token>),
}

/// A parsed time layout, able to format and parse timestamps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeLayout {
    source: String,
    kind: Kind,
}

impl TimeLayout {
    pub fn new(layout: &str) -> Result<Self> {
        if layout.is_empty() {
            return Err(Error::InvalidLayout {
                layout: layout.to_string(),
                reason: "layout is empty".to_string(),
            });
        }
        let kind = match EpochUnit::from_layout(layout) {
            Some(unit) => Kind::Epoch(unit),
            None => Kind::Tokens(tokenize(layout)),
        };
        Ok(Self {
            source: layout.to_string(),
            kind,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn epoch(&self) -> Option<EpochUnit> {
        match self.kind {
            Kind::Epoch(unit) => Some(unit),
            Kind::Tokens(_) => None,
        }
    }

    /// Tokens of a reference-time layout, empty for epoch layouts
    pub fn tokens(&self) -> &[Token] {
        match &self.kind {
            Kind::Epoch(_) => &[],
            Kind::Tokens(tokens) => tokens,
        }
    }

    /// Render `t` the way this layout writes timestamps
    pub fn format(&self, t: &DateTime<FixedOffset>) -> String {
        let mut out = String::with_capacity(self.source.len() + 8);
        match &self.kind {
            Kind::Epoch(unit) => format_epoch(&mut out, *unit, t),
            Kind::Tokens(tokens) => {
                for token in tokens {
                    format_token(&mut out, token, t);
                }
            }
        }
        out
    }

    /// Parse a timestamp written with this layout
    pub fn parse(&self, value: &str) -> Result<DateTime<FixedOffset>> {
        let parsed = match &self.kind {
            Kind::Epoch(unit) => parse_epoch(*unit, value),
            Kind::Tokens(tokens) => parse_tokens(tokens, value),
        };
        parsed.map_err(|reason| Error::TimestampParse {
            value: value.to_string(),
            layout: self.source.clone(),
            reason,
        })
    }
}

fn push_offset(out: &mut String, offset_secs: i32, colon: bool, minutes: bool) {
    let zone = offset_secs / 60;
    out.push(if zone < 0 { '-' } else { '+' });
    let zone = zone.abs();
    let _ = write!(out, "{:02}", zone / 60);
    if minutes {
        if colon {
            out.push(':');
        }
        let _ = write!(out, "{:02}", zone % 60);
    }
}

fn format_token(out: &mut String, token: &Token, t: &DateTime<FixedOffset>) {
    let field = match token {
        Token::Literal(text) => {
            out.push_str(text);
            return;
        }
        Token::Fraction {
            separator,
            digits,
            trim_zeros,
        } => {
            let nanos = format!("{:09}", t.nanosecond() % 1_000_000_000);
            let mut frac = &nanos[..(*digits).min(9)];
            if *trim_zeros {
                frac = frac.trim_end_matches('0');
            }
            if !frac.is_empty() {
                out.push(*separator);
                out.push_str(frac);
            }
            return;
        }
        Token::Field(field) => *field,
    };

    let hour12 = match t.hour() % 12 {
        0 => 12,
        h => h,
    };
    let offset = t.offset().local_minus_utc();
    let _ = match field {
        Field::LongMonth => write!(out, "{}", LONG_MONTHS[t.month0() as usize]),
        Field::Month => write!(out, "{}", &LONG_MONTHS[t.month0() as usize][..3]),
        Field::NumMonth => write!(out, "{}", t.month()),
        Field::ZeroMonth => write!(out, "{:02}", t.month()),
        Field::LongWeekDay => {
            write!(out, "{}", LONG_DAYS[t.weekday().num_days_from_sunday() as usize])
        }
        Field::WeekDay => write!(
            out,
            "{}",
            &LONG_DAYS[t.weekday().num_days_from_sunday() as usize][..3]
        ),
        Field::Day => write!(out, "{}", t.day()),
        Field::UnderDay => write!(out, "{:>2}", t.day()),
        Field::ZeroDay => write!(out, "{:02}", t.day()),
        Field::UnderYearDay => write!(out, "{:>3}", t.ordinal()),
        Field::ZeroYearDay => write!(out, "{:03}", t.ordinal()),
        Field::Hour => write!(out, "{:02}", t.hour()),
        Field::Hour12 => write!(out, "{}", hour12),
        Field::ZeroHour12 => write!(out, "{:02}", hour12),
        Field::Minute => write!(out, "{}", t.minute()),
        Field::ZeroMinute => write!(out, "{:02}", t.minute()),
        Field::Second => write!(out, "{}", t.second()),
        Field::ZeroSecond => write!(out, "{:02}", t.second()),
        Field::LongYear => write!(out, "{:04}", t.year()),
        Field::Year => write!(out, "{:02}", t.year().rem_euclid(100)),
        Field::PM => write!(out, "{}", if t.hour() >= 12 { "PM" } else { "AM" }),
        Field::Pm => write!(out, "{}", if t.hour() >= 12 { "pm" } else { "am" }),
        Field::TzAbbr => {
            // Fixed offsets carry no zone name; fall back to -0700 form.
            if offset == 0 {
                out.push_str("UTC");
            } else {
                push_offset(out, offset, false, true);
            }
            Ok(())
        }
        Field::IsoTz | Field::IsoColonTz | Field::IsoShortTz if offset == 0 => {
            out.push('Z');
            Ok(())
        }
        Field::IsoTz | Field::NumTz => {
            push_offset(out, offset, false, true);
            Ok(())
        }
        Field::IsoColonTz | Field::NumColonTz => {
            push_offset(out, offset, true, true);
            Ok(())
        }
        Field::IsoShortTz | Field::NumShortTz => {
            push_offset(out, offset, false, false);
            Ok(())
        }
    };
}

fn format_epoch(out: &mut String, unit: EpochUnit, t: &DateTime<FixedOffset>) {
    let _ = match unit {
        EpochUnit::Seconds => write!(out, "{}", t.timestamp()),
        EpochUnit::Millis => write!(out, "{}", t.timestamp_millis()),
        EpochUnit::Nanos => write!(
            out,
            "{}",
            t.timestamp() as i128 * 1_000_000_000 + t.timestamp_subsec_nanos() as i128
        ),
        EpochUnit::SecondsMillis => {
            write!(out, "{}.{:03}", t.timestamp(), t.timestamp_subsec_millis())
        }
        EpochUnit::SecondsNanos => {
            write!(out, "{}.{:09}", t.timestamp(), t.timestamp_subsec_nanos())
        }
    };
}

fn parse_epoch(unit: EpochUnit, value: &str) -> Parsed {
    let (whole, frac) = match value.split_once('.') {
        Some((w, f)) if unit.is_fractional() => (w, f),
        None if !unit.is_fractional() => (value, ""),
        _ => return Err("unexpected epoch shape".to_string()),
    };
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return Err("epoch value is not a number".to_string());
    }
    let number: i128 = whole.parse().map_err(|_| "epoch value out of range".to_string())?;
    let (secs, nanos) = match unit {
        EpochUnit::Seconds => (number, 0),
        EpochUnit::Millis => (number / 1_000, (number % 1_000) * 1_000_000),
        EpochUnit::Nanos => (number / 1_000_000_000, number % 1_000_000_000),
        EpochUnit::SecondsMillis | EpochUnit::SecondsNanos => {
            (number, i128::from(parse_nanos(frac)?))
        }
    };
    let secs = i64::try_from(secs).map_err(|_| "epoch value out of range".to_string())?;
    DateTime::from_timestamp(secs, nanos as u32)
        .map(|t| t.fixed_offset())
        .ok_or_else(|| "epoch value out of range".to_string())
}

fn parse_nanos(digits: &str) -> std::result::Result<u32, String> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err("fractional second is not a number".to_string());
    }
    let mut padded: String = digits.chars().take(9).collect();
    while padded.len() < 9 {
        padded.push('0');
    }
    padded
        .parse()
        .map_err(|_| "fractional second out of range".to_string())
}

#[derive(Default)]
struct Fields {
    year: Option<i32>,
    month: Option<u32>,
    day: Option<u32>,
    year_day: Option<u32>,
    hour: u32,
    minute: u32,
    second: u32,
    nanos: u32,
    pm: Option<bool>,
    offset: Option<i32>,
}

impl Fields {
    fn build(self) -> Parsed {
        let year = self.year.unwrap_or(0);
        let date = match (self.year_day, self.month, self.day) {
            (Some(yday), None, None) => NaiveDate::from_yo_opt(year, yday),
            (_, month, day) => {
                NaiveDate::from_ymd_opt(year, month.unwrap_or(1), day.unwrap_or(1))
            }
        }
        .ok_or_else(|| "day out of range".to_string())?;

        let hour = match self.pm {
            Some(true) if self.hour < 12 => self.hour + 12,
            Some(false) if self.hour == 12 => 0,
            _ => self.hour,
        };
        let naive = date
            .and_hms_nano_opt(hour, self.minute, self.second, self.nanos)
            .ok_or_else(|| "time out of range".to_string())?;
        let offset = FixedOffset::east_opt(self.offset.unwrap_or(0))
            .ok_or_else(|| "zone offset out of range".to_string())?;
        offset
            .from_local_datetime(&naive)
            .single()
            .ok_or_else(|| "ambiguous local time".to_string())
    }
}

fn take_digits(s: &str, min: usize, max: usize) -> Option<(u32, &str)> {
    let len = s.bytes().take(max).take_while(u8::is_ascii_digit).count();
    if len < min {
        return None;
    }
    Some((s[..len].parse().ok()?, &s[len..]))
}

fn take_name<'a>(s: &'a str, names: &[&str], abbreviated: bool) -> Option<(usize, &'a str)> {
    names.iter().enumerate().find_map(|(i, name)| {
        let full: &str = name;
        let name = if abbreviated { &full[..3] } else { full };
        let head = s.get(..name.len())?;
        head.eq_ignore_ascii_case(name)
            .then(|| (i, &s[name.len()..]))
    })
}

fn take_offset(s: &str, colon: bool, minutes: bool) -> Option<(i32, &str)> {
    let sign = match s.chars().next()? {
        '+' => 1,
        '-' => -1,
        _ => return None,
    };
    let (hours, mut rest) = take_digits(&s[1..], 2, 2)?;
    let mut mins = 0;
    if minutes {
        if colon {
            rest = rest.strip_prefix(':')?;
        }
        let (m, r) = take_digits(rest, 2, 2)?;
        mins = m;
        rest = r;
    }
    Some((sign * (hours as i32 * 3600 + mins as i32 * 60), rest))
}

fn take_zone_abbreviation(s: &str) -> Option<(i32, &str)> {
    if s.starts_with(['+', '-']) {
        return take_offset(s, false, true);
    }
    let len = s.bytes().take_while(u8::is_ascii_uppercase).count();
    if !(3..=5).contains(&len) {
        return None;
    }
    let offset = ZONE_ABBREVIATIONS
        .iter()
        .find(|(name, _)| *name == &s[..len])
        .map_or(0, |(_, offset)| *offset);
    Some((offset, &s[len..]))
}

fn bad(field: Field, rest: &str) -> String {
    format!("bad {:?} at '{}'", field, rest)
}

fn parse_tokens(tokens: &[Token], value: &str) -> Parsed {
    let mut fields = Fields::default();
    let mut rest = value;

    for (i, token) in tokens.iter().enumerate() {
        let field = match token {
            Token::Literal(text) => {
                rest = rest
                    .strip_prefix(text.as_str())
                    .ok_or_else(|| format!("expected '{}' at '{}'", text, rest))?;
                continue;
            }
            Token::Fraction {
                digits, trim_zeros, ..
            } => {
                let mut chars = rest.chars();
                let has_sep = matches!(chars.next(), Some('.' | ','));
                let has_digit = chars.next().is_some_and(|c| c.is_ascii_digit());
                if *trim_zeros && !(has_sep && has_digit) {
                    continue;
                }
                if !has_sep {
                    return Err(format!("expected fractional second at '{}'", rest));
                }
                let len = rest[1..].bytes().take_while(u8::is_ascii_digit).count();
                if !*trim_zeros && len != *digits {
                    return Err(format!("expected {} fractional digits at '{}'", digits, rest));
                }
                fields.nanos = parse_nanos(&rest[1..1 + len])?;
                rest = &rest[1 + len..];
                continue;
            }
            Token::Field(field) => *field,
        };

        match field {
            Field::LongMonth | Field::Month => {
                let (i, r) = take_name(rest, &LONG_MONTHS, field == Field::Month)
                    .ok_or_else(|| bad(field, rest))?;
                fields.month = Some(i as u32 + 1);
                rest = r;
            }
            Field::LongWeekDay | Field::WeekDay => {
                let (_, r) = take_name(rest, &LONG_DAYS, field == Field::WeekDay)
                    .ok_or_else(|| bad(field, rest))?;
                rest = r;
            }
            Field::NumMonth | Field::ZeroMonth => {
                let min = if field == Field::ZeroMonth { 2 } else { 1 };
                let (m, r) = take_digits(rest, min, 2).ok_or_else(|| bad(field, rest))?;
                fields.month = Some(m);
                rest = r;
            }
            Field::Day | Field::UnderDay | Field::ZeroDay => {
                if field == Field::UnderDay {
                    rest = rest.strip_prefix(' ').unwrap_or(rest);
                }
                let min = if field == Field::ZeroDay { 2 } else { 1 };
                let (d, r) = take_digits(rest, min, 2).ok_or_else(|| bad(field, rest))?;
                fields.day = Some(d);
                rest = r;
            }
            Field::UnderYearDay | Field::ZeroYearDay => {
                let (d, r) = if field == Field::UnderYearDay {
                    take_digits(rest.trim_start_matches(' '), 1, 3)
                } else {
                    take_digits(rest, 3, 3)
                }
                .ok_or_else(|| bad(field, rest))?;
                fields.year_day = Some(d);
                rest = r;
            }
            Field::Hour | Field::Hour12 | Field::ZeroHour12 => {
                let min = if field == Field::Hour12 { 1 } else { 2 };
                let (h, r) = take_digits(rest, min, 2).ok_or_else(|| bad(field, rest))?;
                if field != Field::Hour && h > 12 {
                    return Err(bad(field, rest));
                }
                fields.hour = h;
                rest = r;
            }
            Field::Minute | Field::ZeroMinute => {
                let min = if field == Field::ZeroMinute { 2 } else { 1 };
                let (m, r) = take_digits(rest, min, 2).ok_or_else(|| bad(field, rest))?;
                fields.minute = m;
                rest = r;
            }
            Field::Second | Field::ZeroSecond => {
                let min = if field == Field::ZeroSecond { 2 } else { 1 };
                let (s, r) = take_digits(rest, min, 2).ok_or_else(|| bad(field, rest))?;
                fields.second = s;
                rest = r;
                // A fraction the layout does not spell out is still accepted.
                let layout_has_fraction = matches!(tokens.get(i + 1), Some(Token::Fraction { .. }));
                let mut chars = rest.chars();
                if !layout_has_fraction
                    && matches!(chars.next(), Some('.' | ','))
                    && chars.next().is_some_and(|c| c.is_ascii_digit())
                {
                    let len = rest[1..].bytes().take_while(u8::is_ascii_digit).count();
                    fields.nanos = parse_nanos(&rest[1..1 + len])?;
                    rest = &rest[1 + len..];
                }
            }
            Field::LongYear => {
                let (y, r) = take_digits(rest, 4, 4).ok_or_else(|| bad(field, rest))?;
                fields.year = Some(y as i32);
                rest = r;
            }
            Field::Year => {
                let (y, r) = take_digits(rest, 2, 2).ok_or_else(|| bad(field, rest))?;
                fields.year = Some(if y >= 69 { 1900 + y as i32 } else { 2000 + y as i32 });
                rest = r;
            }
            Field::PM | Field::Pm => {
                let head = rest.get(..2).ok_or_else(|| bad(field, rest))?;
                fields.pm = Some(match head.to_ascii_uppercase().as_str() {
                    "PM" => true,
                    "AM" => false,
                    _ => return Err(bad(field, rest)),
                });
                rest = &rest[2..];
            }
            Field::TzAbbr => {
                let (offset, r) = take_zone_abbreviation(rest).ok_or_else(|| bad(field, rest))?;
                fields.offset = Some(offset);
                rest = r;
            }
            Field::IsoTz | Field::IsoColonTz | Field::IsoShortTz
                if rest.starts_with('Z') =>
            {
                fields.offset = Some(0);
                rest = &rest[1..];
            }
            Field::IsoTz | Field::NumTz => {
                let (offset, r) = take_offset(rest, false, true).ok_or_else(|| bad(field, rest))?;
                fields.offset = Some(offset);
                rest = r;
            }
            Field::IsoColonTz | Field::NumColonTz => {
                let (offset, r) = take_offset(rest, true, true).ok_or_else(|| bad(field, rest))?;
                fields.offset = Some(offset);
                rest = r;
            }
            Field::IsoShortTz | Field::NumShortTz => {
                let (offset, r) = take_offset(rest, false, false).ok_or_else(|| bad(field, rest))?;
                fields.offset = Some(offset);
                rest = r;
            }
        }
    }

    if !rest.is_empty() {
        return Err(format!("extra text '{}'", rest));
    }
    fields.build()
}
