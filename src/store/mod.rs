//! Persistent record repository backed by Fjall
//!
//! One partition per record family, JSON values. All state persistence for
//! jobs, channel scans/items and external media goes through this module.

mod error;
mod keys;
mod records;

pub use error::{Result, StoreError};
pub use records::RecordStore;
