//! File service library
//!
//! Resumable and single-shot uploads with content dedup, stable public
//! names, range streaming and live fragmented-MP4 remux.

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
pub mod storage;
pub mod stream;
pub mod upload;
