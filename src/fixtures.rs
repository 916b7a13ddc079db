//! Test helpers: listing markup builders, canned records and a fake listing.

use crate::error::FetchError;
use crate::models::{Origin, ParsedRecord, RawPage, Status};
use crate::scrapers::fetch::PageSource;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Mutex;

pub fn ymd(iso: &str) -> NaiveDate {
    NaiveDate::parse_from_str(iso, "%Y-%m-%d").unwrap()
}

/// One posting rendered the way the listing renders it.
#[derive(Debug, Clone)]
pub struct Entry {
    result_id: i64,
    institution: String,
    program: String,
    degree: String,
    date_text: String,
    status: String,
    badges: Vec<String>,
    comment: Option<String>,
}

impl Entry {
    pub fn new(result_id: i64, date_added: &str) -> Self {
        let date = ymd(date_added);
        Self {
            result_id,
            institution: "Test University".to_string(),
            program: "Software Engineering".to_string(),
            degree: "MS".to_string(),
            date_text: date.format("%B %-d, %Y").to_string(),
            status: format!("Accepted on {}", date.format("%-d %b")),
            badges: vec![
                "Fall 2026".to_string(),
                "International".to_string(),
                "GPA 3.90".to_string(),
            ],
            comment: None,
        }
    }

    pub fn institution(mut self, name: &str) -> Self {
        self.institution = name.to_string();
        self
    }

    pub fn status(mut self, text: &str) -> Self {
        self.status = text.to_string();
        self
    }

    /// Override the printed date-added text.
    pub fn date_text(mut self, text: &str) -> Self {
        self.date_text = text.to_string();
        self
    }

    pub fn badges(mut self, badges: &[&str]) -> Self {
        self.badges = badges.iter().map(|b| b.to_string()).collect();
        self
    }

    pub fn comment(mut self, text: &str) -> Self {
        self.comment = Some(text.to_string());
        self
    }

    pub fn status_row(&self) -> String {
        format!(
            r#"<tr>
  <td class="tw-py-5"><div class="tw-font-medium tw-text-gray-900">{inst}</div></td>
  <td class="tw-py-5"><div class="tw-flex tw-gap-2"><span>{program}</span><svg viewBox="0 0 2 2"></svg><span>{degree}</span></div></td>
  <td class="tw-whitespace-nowrap">{date}</td>
  <td><div class="tw-inline-flex tw-items-center tw-rounded-md">{status}</div></td>
  <td><a href="/result/{id}">See More</a></td>
</tr>"#,
            inst = self.institution,
            program = self.program,
            degree = self.degree,
            date = self.date_text,
            status = self.status,
            id = self.result_id,
        )
    }

    pub fn badge_row(&self) -> String {
        let badges: String = self
            .badges
            .iter()
            .map(|b| format!(r#"<div class="tw-inline-flex tw-items-center">{b}</div>"#))
            .collect();
        format!(
            r#"<tr class="tw-border-none"><td colspan="3"><div class="tw-flex tw-gap-2">{badges}</div></td></tr>"#
        )
    }

    pub fn comment_row(&self) -> Option<String> {
        self.comment.as_ref().map(|c| {
            format!(
                r#"<tr class="tw-border-none"><td colspan="100%"><p class="tw-text-gray-500">{c}</p></td></tr>"#
            )
        })
    }

    pub fn rows(&self) -> String {
        format!(
            "{}{}{}",
            self.status_row(),
            self.badge_row(),
            self.comment_row().unwrap_or_default()
        )
    }
}

/// A listing page wrapping raw `<tr>` markup.
pub fn page_with_rows(rows: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html><head><title>Admissions Results</title></head>
<body>
<table class="tw-min-w-full">
  <thead><tr><th>School</th><th>Program</th><th>Added On</th><th>Decision</th><th></th></tr></thead>
  <tbody>{rows}</tbody>
</table>
</body></html>"#
    )
}

pub fn page(entries: &[Entry]) -> String {
    let rows: String = entries.iter().map(Entry::rows).collect();
    page_with_rows(&rows)
}

/// A page fetched at noon UTC on `fetched_on`.
pub fn raw_page(index: u32, html: &str, fetched_on: NaiveDate) -> RawPage {
    let mut raw = RawPage::new(index, html);
    raw.fetched_at = fetched_on.and_hms_opt(12, 0, 0).unwrap().and_utc();
    raw
}

/// A fully populated record with a unique result id.
pub fn record(page: u32, rank: u32, date_added: &str) -> ParsedRecord {
    let result_id = i64::from(page) * 1000 + i64::from(rank);
    ParsedRecord {
        institution: "Test University".to_string(),
        program: "Software Engineering".to_string(),
        degree_level: "MS".to_string(),
        status: Status::Accepted,
        status_date: Some(ymd("2025-09-20")),
        date_added: ymd(date_added),
        term: Some("Fall 2026".to_string()),
        origin: Some(Origin::International),
        gpa: Some(3.5),
        gre_total: Some(320),
        gre_verbal: Some(160),
        gre_quant: Some(160),
        gre_writing: Some(4.5),
        comment: None,
        result_id: Some(result_id),
        url: Some(format!("https://www.thegradcafe.com/result/{result_id}")),
        source_page: page,
        source_rank: rank,
        corrected_institution: None,
        corrected_program: None,
    }
}

#[derive(Debug, Clone)]
enum FakePage {
    Html(String),
    Status(u16),
}

/// In-memory listing. Pages not configured answer 404.
#[derive(Debug)]
pub struct FakeListing {
    pages: HashMap<u32, FakePage>,
    fetched_on: NaiveDate,
    calls: Mutex<Vec<u32>>,
}

impl FakeListing {
    pub fn new(fetched_on: &str) -> Self {
        Self {
            pages: HashMap::new(),
            fetched_on: ymd(fetched_on),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_page(mut self, index: u32, entries: &[Entry]) -> Self {
        self.pages.insert(index, FakePage::Html(page(entries)));
        self
    }

    pub fn with_html(mut self, index: u32, html: String) -> Self {
        self.pages.insert(index, FakePage::Html(html));
        self
    }

    pub fn with_status(mut self, index: u32, status: u16) -> Self {
        self.pages.insert(index, FakePage::Status(status));
        self
    }

    /// Page indices requested so far, in order.
    pub fn calls(&self) -> Vec<u32> {
        self.calls.lock().unwrap().clone()
    }
}

impl PageSource for FakeListing {
    async fn fetch_page(&self, page: u32) -> Result<RawPage, FetchError> {
        self.calls.lock().unwrap().push(page);
        match self.pages.get(&page) {
            Some(FakePage::Html(html)) => Ok(raw_page(page, html, self.fetched_on)),
            Some(FakePage::Status(status)) => Err(FetchError::Status {
                url: format!("https://www.thegradcafe.com/survey/index.php?page={page}"),
                status: *status,
            }),
            None => Err(FetchError::Status {
                url: format!("https://www.thegradcafe.com/survey/index.php?page={page}"),
                status: 404,
            }),
        }
    }
}

/// `count` postings all added on `date_added`, with ids starting at `first_id`.
pub fn entries_on(first_id: i64, count: usize, date_added: &str) -> Vec<Entry> {
    (0..count as i64)
        .map(|i| Entry::new(first_id + i, date_added))
        .collect()
}
