//! Local filesystem storage

pub mod atomic;
mod layout;

pub use layout::StorageLayout;
