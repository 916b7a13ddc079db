//! Ingestion of graduate-admissions postings from The GradCafe.
//!
//! The listing is an HTML table where each posting spans two or three rows:
//! a status row, a row of badges, and an optional comment. This crate pages
//! through it, turns every posting into a [`models::ParsedRecord`] and loads
//! the records into SQLite keyed by a stable natural key, so repeated runs
//! only add what is new.
//!
//! - [`scrapers`]: permission gate, page fetcher, segmenter, field extractor
//! - [`session`]: paging with bulk or incremental stop rules
//! - [`correction`]: external name normalization
//! - [`store`], [`loader`]: persistence
//! - [`pipeline`]: one run end to end

pub mod cli;
pub mod config;
pub mod correction;
pub mod error;
pub mod loader;
pub mod models;
pub mod outputs;
pub mod pipeline;
pub mod retry;
pub mod scrapers;
pub mod session;
pub mod store;
pub mod utils;

#[cfg(test)]
mod fixtures;
