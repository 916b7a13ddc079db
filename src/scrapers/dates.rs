//! Date parsing for the listing's inconsistent formats.
//!
//! The listing prints dates as `September 23, 2025`, `23 Sep 2025`,
//! `23 Sep 25`, ISO `2025-09-23`, and frequently without a year at all
//! (`23 Sep`). Year-less dates are resolved against the other postings on the
//! same page, which the site lists newest first.

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

static DAY_MONTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})\s+([A-Za-z]{3,9})\.?$").unwrap());
static MONTH_DAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z]{3,9})\.?\s+(\d{1,2})$").unwrap());

// Two-digit years first: `%Y` would read `25` as the year 25.
const FULL_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d %b %y",
    "%d %B %y",
    "%d %b %Y",
    "%d %B %Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%m/%d/%Y",
];

/// A date as printed, before year resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialDate {
    Full(NaiveDate),
    /// Month and day with the year left off.
    MonthDay { month: u32, day: u32 },
    Unparsed,
}

impl PartialDate {
    pub fn full(&self) -> Option<NaiveDate> {
        match self {
            PartialDate::Full(d) => Some(*d),
            _ => None,
        }
    }
}

/// Parse one date string in any of the listing's formats.
pub fn parse_partial(text: &str) -> PartialDate {
    let text = text.trim().trim_end_matches(['.', ',']);
    if text.is_empty() {
        return PartialDate::Unparsed;
    }
    for fmt in FULL_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
            return PartialDate::Full(d);
        }
    }

    let (day, month) = if let Some(caps) = DAY_MONTH_RE.captures(text) {
        (caps[1].parse::<u32>().ok(), month_number(&caps[2]))
    } else if let Some(caps) = MONTH_DAY_RE.captures(text) {
        (caps[2].parse::<u32>().ok(), month_number(&caps[1]))
    } else {
        (None, None)
    };

    match (month, day) {
        // 2000 is a leap year, so 29 Feb validates here.
        (Some(month), Some(day)) if NaiveDate::from_ymd_opt(2000, month, day).is_some() => {
            PartialDate::MonthDay { month, day }
        }
        _ => PartialDate::Unparsed,
    }
}

/// Parse a date that must already carry its year.
pub fn parse_full(text: &str) -> Option<NaiveDate> {
    parse_partial(text).full()
}

fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_ascii_lowercase();
    let prefix = lower.get(..3)?;
    let n = match prefix {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(n)
}

/// Month/day in `year`, moving 29 Feb to 28 Feb in non-leap years.
fn in_year(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
        .or_else(|| NaiveDate::from_ymd_opt(year, month, day.saturating_sub(1)))
}

/// Resolve a year-less date so it is not later than `ceiling`.
pub fn on_or_before(month: u32, day: u32, ceiling: NaiveDate) -> Option<NaiveDate> {
    let candidate = in_year(ceiling.year(), month, day)?;
    if candidate > ceiling {
        in_year(ceiling.year() - 1, month, day)
    } else {
        Some(candidate)
    }
}

/// Resolve a year-less date so it is not earlier than `floor`.
fn on_or_after(month: u32, day: u32, floor: NaiveDate) -> Option<NaiveDate> {
    let candidate = in_year(floor.year(), month, day)?;
    if candidate < floor {
        in_year(floor.year() + 1, month, day)
    } else {
        Some(candidate)
    }
}

/// Resolve the years of a page's dates, listed newest first.
///
/// A forward pass resolves each year-less date against the nearest resolved
/// date above it (it must not be newer); a backward pass resolves what is left
/// against the nearest resolved date below it (it must not be older). Anything
/// still unresolved is placed on or before `today`. Unparsed entries stay
/// `None`.
pub fn resolve_page_dates(dates: &[PartialDate], today: NaiveDate) -> Vec<Option<NaiveDate>> {
    let mut resolved: Vec<Option<NaiveDate>> = dates.iter().map(PartialDate::full).collect();

    let mut newer: Option<NaiveDate> = None;
    for (i, date) in dates.iter().enumerate() {
        match (resolved[i], date) {
            (Some(d), _) => newer = Some(d),
            (None, PartialDate::MonthDay { month, day }) => {
                if let Some(ceiling) = newer {
                    resolved[i] = on_or_before(*month, *day, ceiling);
                    newer = resolved[i].or(newer);
                }
            }
            _ => {}
        }
    }

    let mut older: Option<NaiveDate> = None;
    for i in (0..dates.len()).rev() {
        match (resolved[i], &dates[i]) {
            (Some(d), _) => older = Some(d),
            (None, PartialDate::MonthDay { month, day }) => {
                if let Some(floor) = older {
                    resolved[i] = on_or_after(*month, *day, floor);
                    older = resolved[i].or(older);
                }
            }
            _ => {}
        }
    }

    for (i, date) in dates.iter().enumerate() {
        if let (None, PartialDate::MonthDay { month, day }) = (resolved[i], date) {
            resolved[i] = on_or_before(*month, *day, today);
        }
    }

    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_full_formats() {
        assert_eq!(parse_full("2021-03-01"), Some(ymd(2021, 3, 1)));
        assert_eq!(parse_full("September 23, 2025"), Some(ymd(2025, 9, 23)));
        assert_eq!(parse_full("Sep 23, 2025"), Some(ymd(2025, 9, 23)));
        assert_eq!(parse_full("23 Sep 2025"), Some(ymd(2025, 9, 23)));
        assert_eq!(parse_full("23 Sep 25"), Some(ymd(2025, 9, 23)));
        assert_eq!(parse_full("  5 January 2024 "), Some(ymd(2024, 1, 5)));
    }

    #[test]
    fn test_parse_year_less() {
        assert_eq!(
            parse_partial("23 Sep"),
            PartialDate::MonthDay { month: 9, day: 23 }
        );
        assert_eq!(
            parse_partial("Feb 29"),
            PartialDate::MonthDay { month: 2, day: 29 }
        );
        assert_eq!(parse_full("23 Sep"), None);
    }

    #[test]
    fn test_parse_garbage_is_unparsed() {
        assert_eq!(parse_partial(""), PartialDate::Unparsed);
        assert_eq!(parse_partial("yesterday"), PartialDate::Unparsed);
        assert_eq!(parse_partial("31 Feb"), PartialDate::Unparsed);
        assert_eq!(parse_partial("2021-13-01"), PartialDate::Unparsed);
    }

    #[test]
    fn test_resolve_uses_newer_neighbor_across_new_year() {
        let dates = vec![
            PartialDate::Full(ymd(2025, 1, 2)),
            parse_partial("31 Dec"),
            parse_partial("30 Dec"),
        ];
        let resolved = resolve_page_dates(&dates, ymd(2025, 6, 1));
        assert_eq!(
            resolved,
            vec![
                Some(ymd(2025, 1, 2)),
                Some(ymd(2024, 12, 31)),
                Some(ymd(2024, 12, 30))
            ]
        );
    }

    #[test]
    fn test_resolve_uses_older_neighbor_when_first_lacks_year() {
        let dates = vec![
            parse_partial("2 Jan"),
            PartialDate::Full(ymd(2024, 12, 31)),
        ];
        let resolved = resolve_page_dates(&dates, ymd(2025, 6, 1));
        assert_eq!(resolved[0], Some(ymd(2025, 1, 2)));
    }

    #[test]
    fn test_resolve_falls_back_to_today_and_never_future() {
        let today = ymd(2025, 3, 10);
        let dates = vec![parse_partial("9 Mar"), parse_partial("11 Mar")];
        let resolved = resolve_page_dates(&dates, today);
        assert_eq!(resolved[0], Some(ymd(2025, 3, 9)));
        assert_eq!(resolved[1], Some(ymd(2024, 3, 11)));
    }

    #[test]
    fn test_resolve_keeps_unparsed_as_none() {
        let dates = vec![PartialDate::Unparsed, PartialDate::Full(ymd(2024, 5, 1))];
        let resolved = resolve_page_dates(&dates, ymd(2025, 1, 1));
        assert_eq!(resolved, vec![None, Some(ymd(2024, 5, 1))]);
    }
}
