//! Field Extractor: turns row-groups into [`ParsedRecord`]s.
//!
//! Three independent sub-parsers run per block:
//!
//! 1. **Status row** ([`read_status_row`], [`parse_status`]): decision,
//!    decision date, and on the site's five-cell layout also institution,
//!    program/degree, the date-added text and the result link.
//! 2. **Badges** ([`classify_badge`], [`parse_badges`]): each fragment is
//!    classified on its own into a [`Badge`] variant.
//! 3. **Comment** ([`parse_comment`]): third-row text, verbatim.
//!
//! A sub-parser that cannot make sense of its input leaves its fields at the
//! null/unknown value. Nothing here returns an error.
//!
//! Dates are resolved per page in [`extract_page`], because year-less dates
//! borrow their year from neighboring postings.

use crate::models::{Origin, ParsedRecord, RawPage, Status, UNKNOWN_INSTITUTION};
use crate::scrapers::dates::{self, PartialDate};
use crate::scrapers::segment::{BadgeRow, CommentRow, EntryBlock, STATUS_KEYWORD_RE, StatusRow};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, trace};
use url::Url;

static RESULT_LINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/result/(\d+)").unwrap());
static ON_DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bon\s+(.+)$").unwrap());
static GPA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^gpa\s*:?\s*(\d+(?:\.\d+)?)$").unwrap());
static GRE_SECTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^gre\s*(v|verbal|q|quant|quantitative|aw|awa|writing)\s*:?\s*(\d+(?:\.\d+)?)$")
        .unwrap()
});
static GRE_TOTAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^gre\s*(?:total)?\s*:?\s*(\d+)$").unwrap());
static TERM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(fall|spring|summer|winter)\s*'?\s*(\d{4}|\d{2})$").unwrap());
static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+(?:\.\d+)?$").unwrap());
static PROGRAM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z&,'()/\- ]*[A-Za-z)]$").unwrap());

const DEGREES: &[(&str, &str)] = &[
    ("ms", "MS"),
    ("msc", "MSc"),
    ("ma", "MA"),
    ("meng", "MEng"),
    ("mba", "MBA"),
    ("mfa", "MFA"),
    ("mph", "MPH"),
    ("mpp", "MPP"),
    ("mpa", "MPA"),
    ("med", "MEd"),
    ("march", "MArch"),
    ("llm", "LLM"),
    ("masters", "Masters"),
    ("phd", "PhD"),
    ("dphil", "DPhil"),
    ("edd", "EdD"),
    ("psyd", "PsyD"),
    ("jd", "JD"),
    ("md", "MD"),
    ("dnp", "DNP"),
];

const GPA_RANGE: std::ops::RangeInclusive<f64> = 0.0..=5.0;
const GRE_TOTAL_RANGE: std::ops::RangeInclusive<u16> = 260..=340;
const GRE_SECTION_RANGE: std::ops::RangeInclusive<u16> = 130..=170;
const GRE_WRITING_RANGE: std::ops::RangeInclusive<f64> = 0.0..=6.0;

// ── Status row ──

/// Fields the status row can supply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListedFields {
    pub institution: Option<String>,
    pub program: Option<String>,
    pub degree: Option<String>,
    pub date_added: Option<String>,
    pub status_text: String,
    pub result_href: Option<String>,
}

/// Read a status row positionally when it has the site's layout, otherwise
/// only look for the cell carrying the decision.
pub fn read_status_row(row: &StatusRow) -> ListedFields {
    let cells = &row.cells;
    let keyword_cell = cells
        .iter()
        .position(|c| STATUS_KEYWORD_RE.is_match(&c.text));
    let result_href = cells
        .iter()
        .flat_map(|c| c.links.iter())
        .find(|href| RESULT_LINK_RE.is_match(href))
        .cloned();
    if cells.len() >= 4 {
        let program_cell = &cells[1];
        let program = match program_cell.spans.first() {
            Some(span) => non_empty(span),
            None => non_empty(&program_cell.text),
        };
        let degree = if program_cell.spans.len() > 1 {
            program_cell.spans.last().and_then(|s| non_empty(s))
        } else {
            None
        };
        let status_idx = keyword_cell.unwrap_or(3);
        ListedFields {
            institution: non_empty(&cells[0].text),
            program,
            degree,
            date_added: non_empty(&cells[2].text),
            status_text: cells[status_idx].text.clone(),
            result_href,
        }
    } else {
        let status_text = keyword_cell
            .map(|i| cells[i].text.clone())
            .or_else(|| cells.last().map(|c| c.text.clone()))
            .unwrap_or_default();
        ListedFields {
            status_text,
            result_href,
            ..ListedFields::default()
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Map decision text to the status vocabulary and pull out its date.
///
/// Handles `Accepted on 23 Sep`, `Rejected on 5 Jan 2024`,
/// `Accepted 2021-03-01` and `Wait listed on Feb 2`. The date is read after
/// `on` when the site names a channel first, as in
/// `Accepted via E-mail on 15 Feb`.
///
/// # Returns
/// The mapped [`Status`] (unknown keywords give [`Status::Other`]) and the
/// date as far as it could be read.
pub fn parse_status(text: &str) -> (Status, PartialDate) {
    let Some(m) = STATUS_KEYWORD_RE.find(text) else {
        let date = ON_DATE_RE
            .captures(text)
            .map(|c| dates::parse_partial(&c[1]))
            .unwrap_or(PartialDate::Unparsed);
        return (Status::Other, date);
    };

    let keyword = m.as_str().to_ascii_lowercase();
    let status = if keyword.starts_with("accepted") {
        Status::Accepted
    } else if keyword.starts_with("rejected") {
        Status::Rejected
    } else if keyword.starts_with("interview") {
        Status::Interview
    } else {
        Status::WaitListed
    };

    let rest = text[m.end()..].trim_start_matches([' ', ':', '-']);
    let date = match ON_DATE_RE.captures(rest).map(|c| dates::parse_partial(&c[1])) {
        Some(date) if date != PartialDate::Unparsed => date,
        _ => dates::parse_partial(rest),
    };
    (status, date)
}

// ── Badges ──

/// One classified badge fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum Badge {
    Gpa(f64),
    GreTotal(u16),
    GreVerbal(u16),
    GreQuant(u16),
    GreWriting(f64),
    Term(String),
    Origin(Origin),
    Degree(&'static str),
    Program(String),
    /// Fallback for fragments of no known shape, or out-of-range scores.
    Unrecognized(String),
}

/// Classify a badge fragment by its shape.
pub fn classify_badge(fragment: &str) -> Badge {
    let text = fragment.trim();
    let unrecognized = || Badge::Unrecognized(text.to_string());

    if let Some(caps) = GPA_RE.captures(text) {
        return match caps[1].parse::<f64>() {
            Ok(v) if GPA_RANGE.contains(&v) => Badge::Gpa(v),
            _ => unrecognized(),
        };
    }
    if let Some(caps) = GRE_SECTION_RE.captures(text) {
        let section = caps[1].to_ascii_lowercase();
        let value = &caps[2];
        return match section.as_str() {
            "aw" | "awa" | "writing" => match value.parse::<f64>() {
                Ok(v) if GRE_WRITING_RANGE.contains(&v) => Badge::GreWriting(v),
                _ => unrecognized(),
            },
            s => match value.parse::<u16>() {
                Ok(v) if GRE_SECTION_RANGE.contains(&v) => {
                    if s.starts_with('v') {
                        Badge::GreVerbal(v)
                    } else {
                        Badge::GreQuant(v)
                    }
                }
                _ => unrecognized(),
            },
        };
    }
    if let Some(caps) = GRE_TOTAL_RE.captures(text) {
        return match caps[1].parse::<u16>() {
            Ok(v) if GRE_TOTAL_RANGE.contains(&v) => Badge::GreTotal(v),
            _ => unrecognized(),
        };
    }
    if let Some(caps) = TERM_RE.captures(text) {
        let season = capitalize(&caps[1]);
        let year = match caps[2].len() {
            2 => format!("20{}", &caps[2]),
            _ => caps[2].to_string(),
        };
        return Badge::Term(format!("{season} {year}"));
    }
    if let Some(origin) = origin_of(text) {
        return Badge::Origin(origin);
    }
    if let Some(degree) = degree_of(text) {
        return Badge::Degree(degree);
    }
    if NUMBER_RE.is_match(text) {
        if text.contains('.') {
            if let Ok(v) = text.parse::<f64>() {
                if GPA_RANGE.contains(&v) {
                    return Badge::Gpa(v);
                }
            }
        } else if let Ok(v) = text.parse::<u16>() {
            if GRE_TOTAL_RANGE.contains(&v) {
                return Badge::GreTotal(v);
            }
        }
        return unrecognized();
    }
    if text.len() >= 3 && PROGRAM_RE.is_match(text) {
        return Badge::Program(text.to_string());
    }
    unrecognized()
}

fn origin_of(text: &str) -> Option<Origin> {
    match text.to_ascii_lowercase().as_str() {
        "international" => Some(Origin::International),
        "american" | "domestic" | "us" | "u.s." | "u.s" => Some(Origin::Domestic),
        "other" | "other urm" => Some(Origin::Other),
        _ => None,
    }
}

fn degree_of(text: &str) -> Option<&'static str> {
    let token: String = text
        .chars()
        .filter(|c| !matches!(c, '.' | ' '))
        .collect::<String>()
        .to_ascii_lowercase();
    DEGREES
        .iter()
        .find(|(k, _)| *k == token)
        .map(|(_, canonical)| *canonical)
}

fn capitalize(s: &str) -> String {
    let lower = s.to_ascii_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Fields the badge row can supply. First badge of each kind wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BadgeFields {
    pub program: Option<String>,
    pub degree: Option<String>,
    pub term: Option<String>,
    pub origin: Option<Origin>,
    pub gpa: Option<f64>,
    pub gre_total: Option<u16>,
    pub gre_verbal: Option<u16>,
    pub gre_quant: Option<u16>,
    pub gre_writing: Option<f64>,
    pub unrecognized: Vec<String>,
}

/// Classify every fragment of a badge row and fold the results.
///
/// # Arguments
/// * `row` - The posting's badge row, as split by the segmenter.
///
/// # Returns
/// The fields the row supplied. Fragments of no known shape, including
/// out-of-range scores, are kept in `unrecognized` and set no field.
pub fn parse_badges(row: &BadgeRow) -> BadgeFields {
    let mut out = BadgeFields::default();
    for fragment in &row.fragments {
        match classify_badge(fragment) {
            Badge::Gpa(v) => {
                out.gpa.get_or_insert(v);
            }
            Badge::GreTotal(v) => {
                out.gre_total.get_or_insert(v);
            }
            Badge::GreVerbal(v) => {
                out.gre_verbal.get_or_insert(v);
            }
            Badge::GreQuant(v) => {
                out.gre_quant.get_or_insert(v);
            }
            Badge::GreWriting(v) => {
                out.gre_writing.get_or_insert(v);
            }
            Badge::Term(t) => {
                out.term.get_or_insert(t);
            }
            Badge::Origin(o) => {
                out.origin.get_or_insert(o);
            }
            Badge::Degree(d) => {
                out.degree.get_or_insert_with(|| d.to_string());
            }
            Badge::Program(p) => {
                out.program.get_or_insert(p);
            }
            Badge::Unrecognized(text) => {
                trace!(fragment = %text, "Ignoring unrecognized badge");
                out.unrecognized.push(text);
            }
        }
    }
    out
}

// ── Comment ──

/// The applicant's free text, verbatim. `None` for two-row postings.
pub fn parse_comment(row: Option<&CommentRow>) -> Option<String> {
    row.map(|c| c.text.clone())
}

// ── Whole page ──

/// Per-block extraction before page-level date resolution.
#[derive(Debug, Clone)]
struct Draft {
    listed: ListedFields,
    badges: BadgeFields,
    comment: Option<String>,
    status: Status,
    status_date: PartialDate,
    date_added: PartialDate,
    rank: u32,
}

fn draft_block(block: &EntryBlock) -> Draft {
    let listed = read_status_row(&block.status);
    let (status, status_date) = parse_status(&listed.status_text);
    let date_added = listed
        .date_added
        .as_deref()
        .map(dates::parse_partial)
        .unwrap_or(PartialDate::Unparsed);
    Draft {
        badges: parse_badges(&block.badges),
        comment: parse_comment(block.comment.as_ref()),
        status,
        status_date,
        date_added,
        rank: block.rank,
        listed,
    }
}

/// Extract every block of a page into records, in page order.
///
/// `base_url` resolves relative result links.
pub fn extract_page(page: &RawPage, blocks: &[EntryBlock], base_url: &Url) -> Vec<ParsedRecord> {
    let drafts: Vec<Draft> = blocks.iter().map(draft_block).collect();
    let today = page.fetched_at.date_naive();

    let listed_dates: Vec<PartialDate> = drafts.iter().map(|d| d.date_added).collect();
    let own_dates = dates::resolve_page_dates(&listed_dates, today);

    (0..drafts.len())
        .map(|i| {
            let date_added = own_dates[i]
                .or_else(|| neighbor_date(&own_dates, i))
                .or_else(|| drafts[i].status_date.full())
                .unwrap_or(today);
            build_record(page.index, &drafts[i], date_added, base_url)
        })
        .collect()
}

/// Nearest resolved date above (newer), else below.
fn neighbor_date(dates: &[Option<NaiveDate>], i: usize) -> Option<NaiveDate> {
    dates[..i]
        .iter()
        .rev()
        .flatten()
        .next()
        .or_else(|| dates[i + 1..].iter().flatten().next())
        .copied()
}

fn build_record(page: u32, d: &Draft, date_added: NaiveDate, base_url: &Url) -> ParsedRecord {
    let status_date = match d.status_date {
        PartialDate::Full(date) => Some(date),
        PartialDate::MonthDay { month, day } => dates::on_or_before(month, day, date_added),
        PartialDate::Unparsed => None,
    };

    let institution = d
        .listed
        .institution
        .clone()
        .unwrap_or_else(|| UNKNOWN_INSTITUTION.to_string());
    if institution == UNKNOWN_INSTITUTION {
        debug!(page, rank = d.rank, "Institution unresolved");
    }

    let result_id = d
        .listed
        .result_href
        .as_deref()
        .and_then(|href| RESULT_LINK_RE.captures(href))
        .and_then(|c| c[1].parse::<i64>().ok());
    let url = d
        .listed
        .result_href
        .as_deref()
        .and_then(|href| base_url.join(href).ok())
        .map(|u| u.to_string());

    ParsedRecord {
        institution,
        program: d
            .listed
            .program
            .clone()
            .or_else(|| d.badges.program.clone())
            .unwrap_or_default(),
        degree_level: d
            .listed
            .degree
            .clone()
            .or_else(|| d.badges.degree.clone())
            .unwrap_or_default(),
        status: d.status,
        status_date,
        date_added,
        term: d.badges.term.clone(),
        origin: d.badges.origin,
        gpa: d.badges.gpa,
        gre_total: d.badges.gre_total,
        gre_verbal: d.badges.gre_verbal,
        gre_quant: d.badges.gre_quant,
        gre_writing: d.badges.gre_writing,
        comment: d.comment.clone(),
        result_id,
        url,
        source_page: page,
        source_rank: d.rank,
        corrected_institution: None,
        corrected_program: None,
    }
}
