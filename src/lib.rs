//! Batch-edits XML documents inside zip archives.
//!
//! A list of [`Rule`]s sets the direct text of matched elements. Elements
//! are matched by local name, ignoring any namespace prefix, or by an XPath
//! 1.0 expression. [`apply_rules`] rewrites one document,
//! [`transform`] rewrites every `.xml` entry of an archive into a new
//! archive, copying everything else and reporting each entry to an
//! [`AuditSink`].
//!
//! ```no_run
//! use xml_batch_edit::{transform, CsvAuditLog, Rule};
//!
//! let rules = vec![Rule::tag("C_STI_ORIG", "NEW")?];
//! let log = CsvAuditLog::create("export_fixed.zip.log.csv")?;
//! let stats = transform("export.zip", "export_fixed.zip", &rules, log)?;
//! println!("{} of {} entries changed", stats.xml_changed, stats.total_files);
//! # Ok::<(), xml_batch_edit::Error>(())
//! ```
//!
//! Underneath is a small XML tree: [`Document`] owns every node, and
//! [`Element`] is a copyable id into it.

mod archive;
mod audit;
mod central;
mod document;
mod element;
mod encoding;
mod engine;
mod error;
mod parser;
mod rule;
mod stats;
mod xpath;

pub use crate::archive::{
    transform, transform_archives, transform_with_options, CancelToken, TransformOptions,
};
pub use crate::audit::{
    AuditRow, AuditSink, AuditStatus, CsvAuditLog, MemoryAuditLog, SUMMARY_MARKER,
};
pub use crate::document::{Document, Node};
pub use crate::element::Element;
pub use crate::encoding::{detect_declared_encoding, DECL_SCAN_LEN};
pub use crate::engine::{apply_rules, RuleOutcome};
pub use crate::error::{Error, Result};
pub use crate::parser::{ReadOptions, DEFAULT_MAX_DEPTH};
pub use crate::rule::{MatchStrategy, Mode, Preset, Rule};
pub use crate::stats::{EntryStatus, ProcessStats};
pub use crate::xpath::select_elements;
