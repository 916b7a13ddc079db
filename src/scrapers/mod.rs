//! Listing access and parsing.
//!
//! # Submodules
//!
//! - [`robots`]: Permission Gate over the site's `robots.txt`
//! - [`fetch`]: Page Fetcher, one listing page per call
//! - [`segment`]: Entry Segmenter, table rows to per-posting row-groups
//! - [`extract`]: Field Extractor, row-groups to records
//! - [`dates`]: the listing's date formats and year inference

pub mod dates;
pub mod extract;
pub mod fetch;
pub mod robots;
pub mod segment;
