//! Byte-serving: range parsing, ranged file responses and live remux

pub mod range;
pub mod remux;
pub mod serve;

pub use range::{parse_range, ByteRange, RangeDecision};
pub use remux::{RemuxPipe, RemuxStream, FMP4_CONTENT_TYPE};
pub use serve::{attachment_disposition, serve_file, ServeOptions, FALLBACK_CONTENT_TYPE};
