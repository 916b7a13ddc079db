//! Entry Segmenter: splits a listing page into per-posting row-groups.
//!
//! Every `tbody > tr` is classified into a [`Row`] variant. A [`Row::Status`]
//! row opens a new block; the rows after it, up to the next status row,
//! belong to that block. Only `[Status, Badges]` and
//! `[Status, Badges, Comment]` are valid shapes. Anything else is reported as
//! a [`MalformedBlock`] and dropped without touching its neighbors.
//!
//! # Site markup
//!
//! ```text
//! <tr>                                  status row: five plain cells
//!   <td>institution</td> <td><span>program</span><span>degree</span></td>
//!   <td>date added</td> <td>Accepted on 23 Sep</td> <td><a href="/result/1">
//! <tr><td colspan="3"> <div class="tw-inline-flex">GPA 3.9</div> …   badges
//! <tr><td colspan="100%"><p>free text</p></td></tr>                  comment
//! ```
//!
//! Older pages carry badges as a plain `<td>` holding a delimited list
//! (`MS, Computer Science, Fall 2021`); those are recognized by content.

use crate::scrapers::extract::{Badge, classify_badge};
use crate::utils::collapse_whitespace;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::fmt;
use tracing::{debug, warn};

static ROW_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("tbody > tr").unwrap());
static SPAN_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("span").unwrap());
static LINK_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
static PARAGRAPH_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("p").unwrap());
static BADGE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"[class*="inline-flex"]"#).unwrap());

/// Status keywords that mark a row as the start of a posting.
pub static STATUS_KEYWORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(accepted|rejected|interview(?:ed)?|wait[\s-]*listed)\b").unwrap()
});

static FRAGMENT_DELIMITERS: &[char] = &[',', ';', '|', '•', '·'];

/// One table cell of a status row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Cell {
    pub text: String,
    /// Text of each `<span>` in the cell, in order.
    pub spans: Vec<String>,
    /// `href` of each link in the cell.
    pub links: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusRow {
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BadgeRow {
    pub fragments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommentRow {
    pub text: String,
}

/// A classified table row.
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    Status(StatusRow),
    Badges(BadgeRow),
    Comment(CommentRow),
    /// Fallback for any row that matches no known signature.
    Unrecognized(String),
}

impl Row {
    /// Short name of the variant, used in logs and [`MalformedBlock::shape`].
    pub fn kind(&self) -> &'static str {
        match self {
            Row::Status(_) => "status",
            Row::Badges(_) => "badges",
            Row::Comment(_) => "comment",
            Row::Unrecognized(_) => "unrecognized",
        }
    }
}

/// The rows of one posting.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryBlock {
    pub status: StatusRow,
    pub badges: BadgeRow,
    pub comment: Option<CommentRow>,
    /// 1-based position of the block among the page's boundaries.
    pub rank: u32,
}

impl EntryBlock {
    /// Build a block, enforcing the two valid shapes.
    pub fn from_rows(rows: Vec<Row>, rank: u32) -> Result<Self, MalformedBlock> {
        let shape: Vec<&'static str> = rows.iter().map(Row::kind).collect();
        let mut it = rows.into_iter();
        match (it.next(), it.next(), it.next(), it.next()) {
            (Some(Row::Status(status)), Some(Row::Badges(badges)), None, None) => Ok(Self {
                status,
                badges,
                comment: None,
                rank,
            }),
            (
                Some(Row::Status(status)),
                Some(Row::Badges(badges)),
                Some(Row::Comment(comment)),
                None,
            ) => Ok(Self {
                status,
                badges,
                comment: Some(comment),
                rank,
            }),
            _ => Err(MalformedBlock { rank, shape }),
        }
    }

    /// Whether the posting had a third, free-text row.
    pub fn has_comment(&self) -> bool {
        self.comment.is_some()
    }

    /// Number of table rows the posting occupied: 2 or 3.
    pub fn row_count(&self) -> usize {
        if self.has_comment() { 3 } else { 2 }
    }
}

/// A row-group that was dropped because of its shape.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedBlock {
    pub rank: u32,
    pub shape: Vec<&'static str>,
}

impl fmt::Display for MalformedBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "block {} has {} rows [{}]",
            self.rank,
            self.shape.len(),
            self.shape.join(", ")
        )
    }
}

/// Result of segmenting one page.
#[derive(Debug, Clone, Default)]
pub struct Segmentation {
    pub blocks: Vec<EntryBlock>,
    pub malformed: Vec<MalformedBlock>,
    /// Rows seen before the first status row.
    pub orphan_rows: usize,
    /// Number of status rows found, well-formed or not.
    pub boundaries: usize,
}

/// Split a page's table body into row-groups.
///
/// # Arguments
/// * `html` - Full page body as fetched.
///
/// # Returns
/// The well-formed blocks in page order, plus the malformed groups and
/// boundary counts the session uses to detect the end of the listing.
pub fn segment_page(html: &str) -> Segmentation {
    let document = Html::parse_document(html);
    let rows: Vec<Row> = document.select(&ROW_SELECTOR).filter_map(classify_row).collect();
    group_rows(rows)
}

/// Group classified rows at status-row boundaries.
pub fn group_rows(rows: Vec<Row>) -> Segmentation {
    let mut seg = Segmentation::default();
    let mut current: Option<Vec<Row>> = None;

    for row in rows {
        match row {
            Row::Status(_) => {
                if let Some(group) = current.take() {
                    close_block(&mut seg, group);
                }
                seg.boundaries += 1;
                current = Some(vec![row]);
            }
            other => match current.as_mut() {
                Some(group) => group.push(other),
                None => {
                    seg.orphan_rows += 1;
                    warn!(kind = other.kind(), "Row before first posting; dropping");
                }
            },
        }
    }
    if let Some(group) = current.take() {
        close_block(&mut seg, group);
    }

    debug!(
        blocks = seg.blocks.len(),
        malformed = seg.malformed.len(),
        orphans = seg.orphan_rows,
        "Segmented page"
    );
    seg
}

fn close_block(seg: &mut Segmentation, rows: Vec<Row>) {
    let rank = seg.boundaries as u32;
    match EntryBlock::from_rows(rows, rank) {
        Ok(block) => seg.blocks.push(block),
        Err(malformed) => {
            warn!(%malformed, "Malformed row-group; skipping");
            seg.malformed.push(malformed);
        }
    }
}

/// Classify one `<tr>`. Rows without cells are spacers and yield `None`.
pub fn classify_row(row: ElementRef<'_>) -> Option<Row> {
    let cells: Vec<ElementRef<'_>> = row
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|e| matches!(e.value().name(), "td" | "th"))
        .collect();
    if cells.is_empty() {
        return None;
    }

    let text = element_text(row);
    let spans_columns = |c: &ElementRef<'_>| c.value().attr("colspan").is_some();

    if cells.len() >= 2 && !cells.iter().any(spans_columns) {
        return Some(Row::Status(StatusRow {
            cells: cells.iter().map(|c| read_cell(*c)).collect(),
        }));
    }

    if let [cell] = cells.as_slice() {
        let has_paragraph = cell.select(&PARAGRAPH_SELECTOR).next().is_some();
        if cell.value().attr("colspan") == Some("100%") || has_paragraph {
            return Some(Row::Comment(CommentRow {
                text: comment_text(*cell),
            }));
        }
        if !spans_columns(cell) && STATUS_KEYWORD_RE.is_match(&text) {
            return Some(Row::Status(StatusRow {
                cells: vec![read_cell(*cell)],
            }));
        }
        if spans_columns(cell) || cell.select(&BADGE_SELECTOR).next().is_some() {
            return Some(Row::Badges(BadgeRow {
                fragments: badge_fragments(*cell),
            }));
        }
        let fragments = badge_fragments(*cell);
        if reads_as_badges(&fragments) {
            return Some(Row::Badges(BadgeRow { fragments }));
        }
    }

    Some(Row::Unrecognized(text))
}

/// A plain cell reads as badges when it is a delimited list, or a single
/// fragment of a recognizable badge shape. A lone name-like word is not enough.
fn reads_as_badges(fragments: &[String]) -> bool {
    match fragments {
        [] => false,
        [single] => !matches!(
            classify_badge(single),
            Badge::Unrecognized(_) | Badge::Program(_)
        ),
        _ => true,
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

fn read_cell(cell: ElementRef<'_>) -> Cell {
    Cell {
        text: element_text(cell),
        spans: cell
            .select(&SPAN_SELECTOR)
            .map(element_text)
            .filter(|s| !s.is_empty())
            .collect(),
        links: cell
            .select(&LINK_SELECTOR)
            .filter_map(|a| a.value().attr("href"))
            .map(str::to_string)
            .collect(),
    }
}

/// Badge elements when the site marks them, otherwise a delimited list.
fn badge_fragments(cell: ElementRef<'_>) -> Vec<String> {
    let badges: Vec<String> = cell
        .select(&BADGE_SELECTOR)
        .map(element_text)
        .filter(|s| !s.is_empty())
        .collect();
    if !badges.is_empty() {
        return badges;
    }
    element_text(cell)
        .split(FRAGMENT_DELIMITERS)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn comment_text(cell: ElementRef<'_>) -> String {
    let paragraphs: Vec<String> = cell
        .select(&PARAGRAPH_SELECTOR)
        .map(element_text)
        .filter(|s| !s.is_empty())
        .collect();
    if paragraphs.is_empty() {
        element_text(cell)
    } else {
        paragraphs.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Entry, page, page_with_rows};

    #[test]
    fn test_two_and_three_row_blocks() {
        let html = page(&[
            Entry::new(103, "2025-09-23").comment("This is a new comment."),
            Entry::new(101, "2025-09-22"),
        ]);
        let seg = segment_page(&html);
        assert_eq!(seg.blocks.len(), 2);
        assert!(seg.malformed.is_empty());
        assert_eq!(seg.blocks[0].row_count(), 3);
        assert_eq!(
            seg.blocks[0].comment.as_ref().unwrap().text,
            "This is a new comment."
        );
        assert_eq!(seg.blocks[1].row_count(), 2);
        assert!(!seg.blocks[1].has_comment());
        assert_eq!(seg.blocks[1].rank, 2);
    }

    #[test]
    fn test_status_row_cells_are_read() {
        let html = page(&[Entry::new(103, "2025-09-23")]);
        let seg = segment_page(&html);
        let cells = &seg.blocks[0].status.cells;
        assert_eq!(cells.len(), 5);
        assert_eq!(cells[0].text, "Test University");
        assert_eq!(cells[1].spans, vec!["Software Engineering", "MS"]);
        assert_eq!(cells[4].links, vec!["/result/103"]);
    }

    #[test]
    fn test_badges_from_inline_flex_divs() {
        let html = page(&[Entry::new(1, "2025-09-23").badges(&["American", "GPA 4.00", "GRE 330"])]);
        let seg = segment_page(&html);
        assert_eq!(
            seg.blocks[0].badges.fragments,
            vec!["American", "GPA 4.00", "GRE 330"]
        );
    }

    #[test]
    fn test_badges_from_delimited_text() {
        let html = page_with_rows(
            r#"<tr><td>Accepted 2021-03-01</td></tr>
               <tr><td colspan="3">MS, Computer Science, Fall 2021, International, GPA 3.8</td></tr>"#,
        );
        let seg = segment_page(&html);
        assert_eq!(seg.blocks.len(), 1);
        assert_eq!(
            seg.blocks[0].badges.fragments,
            vec!["MS", "Computer Science", "Fall 2021", "International", "GPA 3.8"]
        );
    }

    #[test]
    fn test_badges_from_plain_delimited_cell() {
        let html = page_with_rows(
            r#"<tr><td>Accepted 2021-03-01</td></tr>
               <tr><td>MS, Computer Science, Fall 2021, International, GPA 3.8</td></tr>"#,
        );
        let seg = segment_page(&html);
        assert!(seg.malformed.is_empty());
        assert_eq!(seg.blocks.len(), 1);
        assert_eq!(seg.blocks[0].badges.fragments.len(), 5);
    }

    #[test]
    fn test_plain_cell_classification() {
        let html = page_with_rows(
            r#"<tr><td>Rejected</td></tr>
               <tr><td>GPA 3.2</td></tr>
               <tr><td>Rejected</td></tr>
               <tr><td>sponsored</td></tr>"#,
        );
        let seg = segment_page(&html);
        assert_eq!(seg.blocks.len(), 1);
        assert_eq!(seg.blocks[0].badges.fragments, vec!["GPA 3.2"]);
        assert_eq!(seg.malformed[0].shape, vec!["status", "unrecognized"]);
    }

    #[test]
    fn test_four_row_block_is_isolated() {
        let bad = Entry::new(2, "2025-09-22").comment("first");
        let bad_rows = format!(
            "{}<tr><td colspan=\"100%\"><p>second comment</p></td></tr>",
            bad.rows()
        );
        let rows = format!(
            "{}{}{}",
            Entry::new(1, "2025-09-23").rows(),
            bad_rows,
            Entry::new(3, "2025-09-21").comment("ok").rows()
        );
        let seg = segment_page(&page_with_rows(&rows));
        assert_eq!(seg.boundaries, 3);
        assert_eq!(seg.blocks.len(), 2);
        assert_eq!(seg.malformed.len(), 1);
        assert_eq!(seg.malformed[0].rank, 2);
        assert_eq!(seg.malformed[0].shape.len(), 4);
        assert_eq!(seg.blocks[0].rank, 1);
        assert_eq!(seg.blocks[1].rank, 3);
        assert_eq!(seg.blocks[1].comment.as_ref().unwrap().text, "ok");
    }

    #[test]
    fn test_status_without_badges_is_malformed() {
        // Status row followed directly by a comment row.
        let rows = format!(
            "{}{}",
            Entry::new(1, "2025-09-23").status_row(),
            r#"<tr class="tw-border-none"><td colspan="100%"><p>orphan comment</p></td></tr>"#
        );
        let seg = segment_page(&page_with_rows(&rows));
        assert!(seg.blocks.is_empty());
        assert_eq!(seg.malformed[0].shape, vec!["status", "comment"]);
    }

    #[test]
    fn test_single_status_row_is_malformed() {
        let seg = segment_page(&page_with_rows(&Entry::new(1, "2025-09-23").status_row()));
        assert!(seg.blocks.is_empty());
        assert_eq!(seg.malformed.len(), 1);
    }

    #[test]
    fn test_orphan_rows_before_first_status_are_dropped() {
        let rows = format!(
            "{}{}",
            r#"<tr><td colspan="3"><div class="tw-inline-flex">GPA 3.1</div></td></tr>"#,
            Entry::new(1, "2025-09-23").rows()
        );
        let seg = segment_page(&page_with_rows(&rows));
        assert_eq!(seg.orphan_rows, 1);
        assert_eq!(seg.blocks.len(), 1);
    }

    #[test]
    fn test_page_without_table_has_no_blocks() {
        let seg = segment_page("<html><body><p>No results</p></body></html>");
        assert_eq!(seg.boundaries, 0);
        assert!(seg.blocks.is_empty());
    }

    #[test]
    fn test_spacer_rows_are_ignored() {
        let rows = format!(
            "{}<tr></tr>{}",
            Entry::new(1, "2025-09-23").status_row(),
            Entry::new(1, "2025-09-23").badge_row()
        );
        let seg = segment_page(&page_with_rows(&rows));
        assert_eq!(seg.blocks.len(), 1);
    }

    #[test]
    fn test_group_rows_unrecognized_row_breaks_shape() {
        let rows = vec![
            Row::Status(StatusRow { cells: vec![] }),
            Row::Unrecognized("advert".to_string()),
            Row::Badges(BadgeRow { fragments: vec![] }),
        ];
        let seg = group_rows(rows);
        assert!(seg.blocks.is_empty());
        assert_eq!(
            seg.malformed[0].to_string(),
            "block 1 has 3 rows [status, unrecognized, badges]"
        );
    }
}
