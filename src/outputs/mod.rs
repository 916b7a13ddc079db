//! Output generation.
//!
//! - [`json`]: writes a session's parsed records to a dated JSON snapshot
//!
//! ```text
//! output_dir/
//! ├── 2025-09-23/
//! │   ├── bulk_061502.json
//! │   └── incremental_181007.json
//! ```

pub mod json;
